use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessage,
    ChatCompletionToolType, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    FunctionCall,
};
use async_stream::stream;
use futures::{Stream, StreamExt};
use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::{error, info};

use common::{
    error::AppError,
    llm::{LlmClient, LlmEvent, RequestContext, StreamFinish},
    storage::{
        db::SurrealDbClient,
        types::{
            conversation::Conversation,
            message::{Message, MessageMeta, MessageRole, ToolCallRecord},
            repository::Repository,
            session::Session,
        },
    },
    utils::{config::AppConfig, embedding::Embedder},
};

use crate::{
    events::{QueryEvent, SourceCollector},
    prompt::{title_from_query, SYSTEM_PROMPT},
    tools::{execute_tool, tool_definitions, ToolContext, ToolExecution},
};

/// Messages of history loaded per turn (user/assistant only; tool traffic is
/// transcript-internal and never persisted).
const HISTORY_WINDOW: usize = 20;
/// Tool rounds allowed before the final turn omits tools entirely.
const MAX_TOOL_ITERATIONS: usize = 6;
const LLM_CALL_TIMEOUT: Duration = Duration::from_secs(60);
const TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-conversation locks serializing turns, which keeps sequence numbers
/// contiguous without store-side transactions.
#[derive(Default)]
struct ConversationLocks {
    inner: StdMutex<HashMap<String, Arc<TokioMutex<()>>>>,
}

impl ConversationLocks {
    fn lock_for(&self, conversation_id: &str) -> Arc<TokioMutex<()>> {
        let mut map = match self.inner.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            map.entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(TokioMutex::new(()))),
        )
    }
}

pub struct QueryEngine {
    db: Arc<SurrealDbClient>,
    config: AppConfig,
    locks: ConversationLocks,
}

impl QueryEngine {
    pub fn new(db: Arc<SurrealDbClient>, config: AppConfig) -> Self {
        Self {
            db,
            config,
            locks: ConversationLocks::default(),
        }
    }

    /// Run one conversational turn, returning the event stream.
    ///
    /// Resolution failures (unknown session or repository, no usable
    /// provider) surface as errors here, before any streaming starts; from
    /// then on problems arrive as in-stream `Error` events.
    pub async fn query(
        &self,
        session_id: &str,
        repo_id: &str,
        user_text: &str,
    ) -> Result<impl Stream<Item = QueryEvent> + Send + 'static, AppError> {
        if user_text.trim().is_empty() {
            return Err(AppError::Validation("query must not be empty".to_string()));
        }

        let session = Session::get_required(session_id, &self.db).await?;
        Repository::get_required(repo_id, &self.db).await?;

        let preferences = session.preferences;
        let chat_ctx = RequestContext::for_chat(preferences.as_ref(), &self.config)?;
        let embedding_ctx = RequestContext::for_embedding(preferences.as_ref(), &self.config)?;

        let conversation = Conversation::find_or_create(
            session_id,
            repo_id,
            &title_from_query(user_text),
            SYSTEM_PROMPT,
            &self.db,
        )
        .await?;

        info!(
            conversation_id = %conversation.id,
            repo_id,
            provider = chat_ctx.provider.as_str(),
            model = %chat_ctx.model,
            "starting query turn"
        );

        let lock = self.locks.lock_for(&conversation.id);
        let db = Arc::clone(&self.db);
        let repo_id = repo_id.to_string();
        let user_text = user_text.to_string();

        let events = stream! {
            let turn_guard = lock.lock_owned().await;

            let history = match Message::last_n(&conversation.id, HISTORY_WINDOW, &db).await {
                Ok(history) => history,
                Err(err) => {
                    yield QueryEvent::Error { error: err.to_string() };
                    return;
                }
            };

            // The user turn is durable before the model sees it.
            let user_sequence = match Message::next_sequence_number(&conversation.id, &db).await {
                Ok(sequence) => sequence,
                Err(err) => {
                    yield QueryEvent::Error { error: err.to_string() };
                    return;
                }
            };
            let user_message = Message::new(
                conversation.id.clone(),
                MessageRole::User,
                user_text.clone(),
                None,
                user_sequence,
            );
            if let Err(err) = db.store_item(user_message).await {
                yield QueryEvent::Error { error: err.to_string() };
                return;
            }
            let _ = Conversation::set_message_count(&conversation.id, user_sequence, &db).await;

            let mut messages = transcript_messages(&conversation.system_prompt, &history, &user_text);

            let llm = LlmClient::new(chat_ctx);
            let embedder = Embedder::new(&embedding_ctx);

            let mut partial = PartialTurn::new(Arc::clone(&db), conversation.id.clone(), turn_guard);
            let mut sources = SourceCollector::default();
            let mut executed: Vec<ToolCallRecord> = Vec::new();
            let mut iteration = 0usize;

            loop {
                let include_tools = iteration < MAX_TOOL_ITERATIONS;
                let request = match build_request(llm.model(), &messages, include_tools) {
                    Ok(request) => request,
                    Err(err) => {
                        yield QueryEvent::Error { error: err.to_string() };
                        return;
                    }
                };

                let llm_stream = match timeout(LLM_CALL_TIMEOUT, llm.stream_chat(request)).await {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(err)) => {
                        yield QueryEvent::Error { error: err.to_string() };
                        return;
                    }
                    Err(_) => {
                        yield QueryEvent::Error { error: "LLM call timed out".to_string() };
                        return;
                    }
                };
                futures::pin_mut!(llm_stream);

                let mut turn_calls: Vec<(String, String, String)> = Vec::new();
                let mut finish = StreamFinish::Stop;

                while let Some(event) = llm_stream.next().await {
                    match event {
                        LlmEvent::ContentDelta(delta) => {
                            partial.append_content(&delta);
                            yield QueryEvent::AnswerChunk { content: delta };
                        }
                        LlmEvent::ToolCall { id, name, arguments } => {
                            turn_calls.push((id, name, arguments));
                        }
                        LlmEvent::Finished(reason) => {
                            finish = reason;
                        }
                        LlmEvent::StreamError(message) => {
                            // Mid-turn provider failure: surface it and let
                            // the partial turn persist as truncated.
                            yield QueryEvent::Error { error: message };
                            return;
                        }
                    }
                }

                // The forced tool-less turn is always terminal, whatever the
                // provider claims.
                if !include_tools || finish != StreamFinish::ToolCalls || turn_calls.is_empty() {
                    break;
                }

                let provider_calls: Vec<ChatCompletionMessageToolCall> = turn_calls
                    .iter()
                    .map(|(id, name, arguments)| ChatCompletionMessageToolCall {
                        id: id.clone(),
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionCall {
                            name: name.clone(),
                            arguments: arguments.clone(),
                        },
                    })
                    .collect();
                if let Ok(assistant_turn) = ChatCompletionRequestAssistantMessageArgs::default()
                    .tool_calls(provider_calls)
                    .build()
                {
                    messages.push(assistant_turn.into());
                }

                for (id, name, arguments) in turn_calls {
                    // String-encoded arguments parse exactly once, here.
                    let args_value: serde_json::Value =
                        serde_json::from_str(&arguments).unwrap_or_else(|_| serde_json::json!({}));

                    yield QueryEvent::ToolCall {
                        tool: name.clone(),
                        args: args_value.clone(),
                    };

                    let tool_ctx = ToolContext {
                        db: &db,
                        embedder: &embedder,
                        repo_id: &repo_id,
                    };
                    let execution =
                        match timeout(TOOL_TIMEOUT, execute_tool(&name, &args_value, &tool_ctx))
                            .await
                        {
                            Ok(execution) => execution,
                            Err(_) => ToolExecution::error("timeout"),
                        };

                    yield QueryEvent::ToolResult {
                        tool: name.clone(),
                        result_count: execution.result_count,
                    };

                    sources.extend(execution.sources);
                    executed.push(ToolCallRecord {
                        id: id.clone(),
                        name,
                        arguments,
                    });
                    partial.set_tool_calls(executed.clone());

                    if let Ok(tool_message) = ChatCompletionRequestToolMessageArgs::default()
                        .content(execution.result.to_string())
                        .tool_call_id(id)
                        .build()
                    {
                        messages.push(tool_message.into());
                    }
                }

                iteration += 1;
            }

            match partial.finish().await {
                Ok(()) => {
                    let tool_calls = executed.into_iter().map(|call| call.name).collect();
                    yield QueryEvent::Done {
                        sources: sources.into_sources(),
                        tool_calls,
                    };
                }
                Err(err) => {
                    yield QueryEvent::Error { error: err.to_string() };
                }
            }
        };

        Ok(events)
    }
}

/// System prompt + windowed history + the new user turn.
fn transcript_messages(
    system_prompt: &str,
    history: &[Message],
    user_text: &str,
) -> Vec<ChatCompletionRequestMessage> {
    let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(history.len() + 2);
    messages.push(ChatCompletionRequestSystemMessage::from(system_prompt.to_string()).into());

    for message in history {
        match message.role {
            MessageRole::User => {
                messages
                    .push(ChatCompletionRequestUserMessage::from(message.content.clone()).into());
            }
            MessageRole::Assistant => {
                if let Ok(assistant) = ChatCompletionRequestAssistantMessageArgs::default()
                    .content(message.content.clone())
                    .build()
                {
                    messages.push(assistant.into());
                }
            }
        }
    }

    messages.push(ChatCompletionRequestUserMessage::from(user_text.to_string()).into());
    messages
}

fn build_request(
    model: &str,
    messages: &[ChatCompletionRequestMessage],
    include_tools: bool,
) -> Result<CreateChatCompletionRequest, AppError> {
    let mut builder = CreateChatCompletionRequestArgs::default();
    builder
        .model(model)
        .messages(messages.to_vec())
        .stream(true);
    if include_tools {
        builder.tools(tool_definitions());
    }

    builder.build().map_err(AppError::from)
}

/// Accumulates the assistant turn and guarantees persistence: a completed
/// turn persists through `finish`, a dropped one (client disconnect or
/// stream failure) persists with `truncated = true` while still holding the
/// conversation lock.
struct PartialTurn {
    db: Arc<SurrealDbClient>,
    conversation_id: String,
    content: String,
    tool_calls: Vec<ToolCallRecord>,
    guard: Option<OwnedMutexGuard<()>>,
    finished: bool,
}

impl PartialTurn {
    fn new(db: Arc<SurrealDbClient>, conversation_id: String, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            db,
            conversation_id,
            content: String::new(),
            tool_calls: Vec::new(),
            guard: Some(guard),
            finished: false,
        }
    }

    fn append_content(&mut self, delta: &str) {
        self.content.push_str(delta);
    }

    fn set_tool_calls(&mut self, calls: Vec<ToolCallRecord>) {
        self.tool_calls = calls;
    }

    async fn finish(&mut self) -> Result<(), AppError> {
        self.finished = true;
        let result = persist_assistant_message(
            &self.db,
            &self.conversation_id,
            std::mem::take(&mut self.content),
            std::mem::take(&mut self.tool_calls),
            false,
        )
        .await;
        self.guard.take();
        result
    }
}

impl Drop for PartialTurn {
    fn drop(&mut self) {
        if self.finished || (self.content.is_empty() && self.tool_calls.is_empty()) {
            return;
        }

        let db = Arc::clone(&self.db);
        let conversation_id = std::mem::take(&mut self.conversation_id);
        let content = std::mem::take(&mut self.content);
        let tool_calls = std::mem::take(&mut self.tool_calls);
        let guard = self.guard.take();

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                // Keep the conversation lock until the truncated write lands.
                let _guard = guard;
                if let Err(err) =
                    persist_assistant_message(&db, &conversation_id, content, tool_calls, true)
                        .await
                {
                    error!(
                        %conversation_id,
                        error = %err,
                        "failed to persist truncated assistant message"
                    );
                }
            });
        }
    }
}

async fn persist_assistant_message(
    db: &SurrealDbClient,
    conversation_id: &str,
    content: String,
    tool_calls: Vec<ToolCallRecord>,
    truncated: bool,
) -> Result<(), AppError> {
    let sequence = Message::next_sequence_number(conversation_id, db).await?;
    let mut message = Message::new(
        conversation_id.to_string(),
        MessageRole::Assistant,
        content,
        (!tool_calls.is_empty()).then_some(tool_calls),
        sequence,
    );
    if truncated {
        message.provider_meta = Some(MessageMeta { truncated: true });
    }

    db.store_item(message).await?;
    Conversation::set_message_count(conversation_id, sequence, db).await?;

    Ok(())
}
