use std::collections::BTreeMap;
use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCallChunk, CreateChatCompletionRequest,
        CreateChatCompletionResponse, FinishReason,
    },
    Client,
};
use async_stream::stream;
use futures::{Stream, StreamExt};

use crate::error::AppError;

use super::{
    limiter::{limiter_for, TokenBucket},
    provider::RequestContext,
    retry::call_with_retries,
};

/// Terminal state of one streamed assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFinish {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
}

/// Events surfaced from a streaming chat call. Tool-call argument deltas are
/// buffered internally and emitted as whole `ToolCall` events once the
/// provider signals `finish_reason = tool_calls`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmEvent {
    ContentDelta(String),
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    Finished(StreamFinish),
    StreamError(String),
}

/// Provider-agnostic chat client. Construction is cheap; one instance per
/// request context.
pub struct LlmClient {
    ctx: RequestContext,
    client: Client<OpenAIConfig>,
    limiter: Arc<TokenBucket>,
}

impl LlmClient {
    pub fn new(ctx: RequestContext) -> Self {
        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key(&ctx.api_key)
                .with_api_base(ctx.provider.base_url()),
        );
        let limiter = limiter_for(ctx.provider, &ctx.api_key);

        Self {
            ctx,
            client,
            limiter,
        }
    }

    pub fn model(&self) -> &str {
        &self.ctx.model
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    /// Non-streaming completion with the standard retry policy.
    pub async fn complete(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<CreateChatCompletionResponse, AppError> {
        self.limiter.acquire().await;
        call_with_retries("chat completion", || {
            let request = request.clone();
            async move { self.client.chat().create(request).await }
        })
        .await
    }

    /// Streaming completion. Retries apply to stream creation only;
    /// mid-stream failures surface as a single `StreamError` event.
    pub async fn stream_chat(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<impl Stream<Item = LlmEvent> + Send, AppError> {
        self.limiter.acquire().await;
        let mut inner = call_with_retries("chat stream", || {
            let request = request.clone();
            async move { self.client.chat().create_stream(request).await }
        })
        .await?;

        let events = stream! {
            let mut accumulator = ToolCallAccumulator::default();

            while let Some(result) = inner.next().await {
                match result {
                    Ok(response) => {
                        let Some(choice) = response.choices.first() else {
                            continue;
                        };

                        if let Some(content) = choice.delta.content.as_ref() {
                            if !content.is_empty() {
                                yield LlmEvent::ContentDelta(content.clone());
                            }
                        }

                        if let Some(chunks) = choice.delta.tool_calls.as_ref() {
                            accumulator.absorb(chunks);
                        }

                        if let Some(reason) = choice.finish_reason {
                            if matches!(reason, FinishReason::ToolCalls) {
                                for call in accumulator.take_calls() {
                                    yield call;
                                }
                            }
                            yield LlmEvent::Finished(map_finish(reason));
                            return;
                        }
                    }
                    Err(err) => {
                        yield LlmEvent::StreamError(err.to_string());
                        return;
                    }
                }
            }

            // Stream ended without an explicit finish marker.
            yield LlmEvent::Finished(StreamFinish::Stop);
        };

        Ok(events)
    }
}

fn map_finish(reason: FinishReason) -> StreamFinish {
    match reason {
        FinishReason::ToolCalls | FinishReason::FunctionCall => StreamFinish::ToolCalls,
        FinishReason::Length => StreamFinish::Length,
        FinishReason::ContentFilter => StreamFinish::ContentFilter,
        FinishReason::Stop => StreamFinish::Stop,
    }
}

/// Buffers tool-call fragments keyed by their stream index until the turn
/// finishes. Providers split `arguments` across many deltas; the id and name
/// usually arrive in the first fragment only.
#[derive(Default)]
struct ToolCallAccumulator {
    pending: BTreeMap<u32, PendingToolCall>,
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn absorb(&mut self, chunks: &[ChatCompletionMessageToolCallChunk]) {
        for chunk in chunks {
            let pending = self.pending.entry(chunk.index).or_default();
            if let Some(id) = chunk.id.as_ref() {
                pending.id.clone_from(id);
            }
            if let Some(function) = chunk.function.as_ref() {
                if let Some(name) = function.name.as_ref() {
                    pending.name.push_str(name);
                }
                if let Some(arguments) = function.arguments.as_ref() {
                    pending.arguments.push_str(arguments);
                }
            }
        }
    }

    fn take_calls(&mut self) -> Vec<LlmEvent> {
        std::mem::take(&mut self.pending)
            .into_values()
            .filter(|call| !call.name.is_empty())
            .map(|call| LlmEvent::ToolCall {
                id: call.id,
                name: call.name,
                arguments: call.arguments,
            })
            .collect()
    }
}
