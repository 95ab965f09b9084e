//! Tool registry for the conversation loop: argument schemas, typed
//! validation, handlers and the sources each result contributes.
//!
//! Tools never raise; an unknown name, bad arguments or a failed lookup all
//! come back as a `{"error": ...}` result the assistant can react to.

use async_openai::types::{ChatCompletionTool, ChatCompletionToolType, FunctionObject};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use common::{
    storage::{
        db::SurrealDbClient,
        types::{repo_file::RepoFile, repository::Repository},
    },
    utils::embedding::Embedder,
};
use retrieval_pipeline::{hybrid_search, search::DEFAULT_TOP_K};

use crate::events::SourceRef;

/// Most-imported files surfaced by `get_repo_overview`.
const OVERVIEW_KEY_FILES: usize = 10;

pub struct ToolContext<'a> {
    pub db: &'a SurrealDbClient,
    pub embedder: &'a Embedder,
    pub repo_id: &'a str,
}

/// Outcome of one tool invocation.
#[derive(Debug)]
pub struct ToolExecution {
    pub result: Value,
    pub result_count: u64,
    pub sources: Vec<SourceRef>,
}

impl ToolExecution {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            result: json!({ "error": message.into() }),
            result_count: 0,
            sources: Vec::new(),
        }
    }
}

/// JSON-schema tool definitions sent with every chat request.
pub fn tool_definitions() -> Vec<ChatCompletionTool> {
    vec![
        tool(
            "search_code",
            "Hybrid semantic and lexical search over the repository's file \
             summaries and code chunks. Returns ranked files with matching \
             code elements.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Natural-language or code search query"
                    },
                    "top_k": {
                        "type": "integer",
                        "description": "Number of files to return (default 5)"
                    }
                },
                "required": ["query"]
            }),
        ),
        tool(
            "get_repo_overview",
            "The stored repository overview plus its key files and their \
             summaries.",
            json!({
                "type": "object",
                "properties": {}
            }),
        ),
        tool(
            "get_file_by_path",
            "Full content and structural record of one file, by its \
             repo-relative path.",
            json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Repo-relative file path, e.g. src/parser.py"
                    }
                },
                "required": ["path"]
            }),
        ),
        tool(
            "find_function",
            "Locate a function or method by exact name across all files.",
            json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "Exact function name"
                    }
                },
                "required": ["name"]
            }),
        ),
    ]
}

fn tool(name: &str, description: &str, parameters: Value) -> ChatCompletionTool {
    ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObject {
            name: name.to_string(),
            description: Some(description.to_string()),
            parameters: Some(parameters),
            strict: None,
        },
    }
}

/// Dispatch one tool call. Arguments arrive as the already-parsed JSON
/// object; validation happens here by typed deserialization.
pub async fn execute_tool(name: &str, args: &Value, ctx: &ToolContext<'_>) -> ToolExecution {
    debug!(tool = name, repo_id = %ctx.repo_id, "executing tool");

    match name {
        "search_code" => search_code(args, ctx).await,
        "get_repo_overview" => get_repo_overview(ctx).await,
        "get_file_by_path" => get_file_by_path(args, ctx).await,
        "find_function" => find_function(args, ctx).await,
        other => ToolExecution::error(format!("unknown tool '{other}'")),
    }
}

async fn search_code(args: &Value, ctx: &ToolContext<'_>) -> ToolExecution {
    #[derive(Deserialize)]
    struct SearchCodeArgs {
        query: String,
        #[serde(default = "default_top_k")]
        top_k: usize,
    }

    fn default_top_k() -> usize {
        DEFAULT_TOP_K
    }

    let args: SearchCodeArgs = match serde_json::from_value(args.clone()) {
        Ok(args) => args,
        Err(err) => return ToolExecution::error(format!("invalid arguments: {err}")),
    };

    let results = match hybrid_search(ctx.db, ctx.embedder, ctx.repo_id, &args.query, args.top_k)
        .await
    {
        Ok(results) => results,
        Err(err) => return ToolExecution::error(format!("search failed: {err}")),
    };

    let sources = results
        .iter()
        .flat_map(|result| {
            if result.code_elements.is_empty() {
                vec![SourceRef::file(result.path.clone())]
            } else {
                result
                    .code_elements
                    .iter()
                    .map(|element| {
                        SourceRef::span(result.path.clone(), element.line_start, element.line_end)
                    })
                    .collect()
            }
        })
        .collect();

    ToolExecution {
        result_count: results.len() as u64,
        result: json!({ "results": results }),
        sources,
    }
}

async fn get_repo_overview(ctx: &ToolContext<'_>) -> ToolExecution {
    let repo = match Repository::get_required(ctx.repo_id, ctx.db).await {
        Ok(repo) => repo,
        Err(err) => return ToolExecution::error(format!("repository unavailable: {err}")),
    };

    let Some(overview) = repo.overview else {
        return ToolExecution::error("no overview has been generated for this repository");
    };

    let key_files: Vec<Value> = match RepoFile::most_imported(ctx.repo_id, OVERVIEW_KEY_FILES, ctx.db)
        .await
    {
        Ok(files) => files
            .into_iter()
            .filter_map(|file| {
                file.summary
                    .map(|summary| json!({ "path": file.path, "summary": summary }))
            })
            .collect(),
        Err(err) => return ToolExecution::error(format!("key file lookup failed: {err}")),
    };

    let sources = key_files
        .iter()
        .filter_map(|entry| entry["path"].as_str().map(SourceRef::file))
        .collect();

    ToolExecution {
        result_count: 1 + key_files.len() as u64,
        result: json!({ "overview": overview, "key_files": key_files }),
        sources,
    }
}

async fn get_file_by_path(args: &Value, ctx: &ToolContext<'_>) -> ToolExecution {
    #[derive(Deserialize)]
    struct GetFileArgs {
        path: String,
    }

    let args: GetFileArgs = match serde_json::from_value(args.clone()) {
        Ok(args) => args,
        Err(err) => return ToolExecution::error(format!("invalid arguments: {err}")),
    };

    let file = match RepoFile::get_by_path(ctx.repo_id, &args.path, ctx.db).await {
        Ok(Some(file)) => file,
        Ok(None) => return ToolExecution::error(format!("file not found: {}", args.path)),
        Err(err) => return ToolExecution::error(format!("file lookup failed: {err}")),
    };

    let sources = vec![SourceRef::file(file.path.clone())];

    ToolExecution {
        result_count: 1,
        result: json!({
            "path": file.path,
            "language": file.language,
            "content": file.content,
            "summary": file.summary,
            "functions": file.functions,
            "classes": file.classes,
            "dependencies": file.dependencies,
        }),
        sources,
    }
}

async fn find_function(args: &Value, ctx: &ToolContext<'_>) -> ToolExecution {
    #[derive(Deserialize)]
    struct FindFunctionArgs {
        name: String,
    }

    let args: FindFunctionArgs = match serde_json::from_value(args.clone()) {
        Ok(args) => args,
        Err(err) => return ToolExecution::error(format!("invalid arguments: {err}")),
    };

    let files = match RepoFile::find_function(ctx.repo_id, &args.name, ctx.db).await {
        Ok(files) => files,
        Err(err) => return ToolExecution::error(format!("function lookup failed: {err}")),
    };

    let mut matches = Vec::new();
    let mut sources = Vec::new();
    for file in files {
        for function in file
            .functions
            .iter()
            .filter(|function| function.name == args.name)
        {
            sources.push(SourceRef::span(
                file.path.clone(),
                function.line_start,
                function.line_end,
            ));
            matches.push(json!({ "path": file.path, "function": function }));
        }
    }

    ToolExecution {
        result_count: matches.len() as u64,
        result: json!({ "matches": matches }),
        sources,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::llm::{Provider, RequestContext};
    use common::storage::types::repo_file::FunctionInfo;
    use uuid::Uuid;

    fn test_embedder() -> Embedder {
        Embedder::new(&RequestContext {
            provider: Provider::OpenAi,
            model: "text-embedding-3-small".to_string(),
            api_key: "sk-test".to_string(),
        })
    }

    async fn setup() -> SurrealDbClient {
        let db = SurrealDbClient::memory("tools_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.ensure_initialized(3).await.expect("indexes");
        db
    }

    #[test]
    fn definitions_cover_the_catalog() {
        let definitions = tool_definitions();
        let names: Vec<&str> = definitions
            .iter()
            .map(|tool| tool.function.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "search_code",
                "get_repo_overview",
                "get_file_by_path",
                "find_function"
            ]
        );

        for definition in &definitions {
            assert!(definition.function.parameters.is_some());
        }
    }

    #[tokio::test]
    async fn unknown_tool_returns_error_result() {
        let db = setup().await;
        let embedder = test_embedder();
        let ctx = ToolContext {
            db: &db,
            embedder: &embedder,
            repo_id: "r1",
        };

        let execution = execute_tool("rm_rf", &json!({}), &ctx).await;
        assert_eq!(execution.result_count, 0);
        assert!(execution.result["error"]
            .as_str()
            .is_some_and(|e| e.contains("unknown tool")));
    }

    #[tokio::test]
    async fn invalid_arguments_return_error_result() {
        let db = setup().await;
        let embedder = test_embedder();
        let ctx = ToolContext {
            db: &db,
            embedder: &embedder,
            repo_id: "r1",
        };

        let execution = execute_tool("get_file_by_path", &json!({ "file": "a.py" }), &ctx).await;
        assert_eq!(execution.result_count, 0);
        assert!(execution.result["error"]
            .as_str()
            .is_some_and(|e| e.contains("invalid arguments")));
    }

    #[tokio::test]
    async fn get_file_by_path_returns_structural_view() {
        let db = setup().await;
        let embedder = test_embedder();

        let mut file = RepoFile::new(
            "r1".to_string(),
            "a.py".to_string(),
            "python".to_string(),
            "def run():\n    pass\n".to_string(),
        );
        file.functions = vec![FunctionInfo {
            name: "run".to_string(),
            signature: "def run()".to_string(),
            line_start: 1,
            line_end: 2,
            ..Default::default()
        }];
        file.dependencies.imports = vec!["b.py".to_string()];
        db.store_item(file).await.expect("store file");

        let ctx = ToolContext {
            db: &db,
            embedder: &embedder,
            repo_id: "r1",
        };

        let execution = execute_tool("get_file_by_path", &json!({ "path": "a.py" }), &ctx).await;
        assert_eq!(execution.result_count, 1);
        assert_eq!(execution.result["path"], "a.py");
        assert_eq!(execution.result["functions"][0]["name"], "run");
        assert_eq!(execution.result["dependencies"]["imports"][0], "b.py");
        assert_eq!(execution.sources, vec![SourceRef::file("a.py")]);

        let missing = execute_tool("get_file_by_path", &json!({ "path": "zz.py" }), &ctx).await;
        assert!(missing.result["error"]
            .as_str()
            .is_some_and(|e| e.contains("not found")));
    }

    #[tokio::test]
    async fn find_function_matches_exact_names_only() {
        let db = setup().await;
        let embedder = test_embedder();

        let mut file = RepoFile::new(
            "r1".to_string(),
            "a.py".to_string(),
            "python".to_string(),
            String::new(),
        );
        file.functions = vec![
            FunctionInfo {
                name: "parse".to_string(),
                signature: "def parse(text)".to_string(),
                line_start: 3,
                line_end: 9,
                ..Default::default()
            },
            FunctionInfo {
                name: "parse_all".to_string(),
                signature: "def parse_all(items)".to_string(),
                line_start: 11,
                line_end: 15,
                ..Default::default()
            },
        ];
        db.store_item(file).await.expect("store file");

        let ctx = ToolContext {
            db: &db,
            embedder: &embedder,
            repo_id: "r1",
        };

        let execution = execute_tool("find_function", &json!({ "name": "parse" }), &ctx).await;
        assert_eq!(execution.result_count, 1);
        assert_eq!(execution.result["matches"][0]["function"]["name"], "parse");
        assert_eq!(execution.sources, vec![SourceRef::span("a.py", 3, 9)]);
    }

    #[tokio::test]
    async fn get_repo_overview_uses_cached_overview() {
        let db = setup().await;
        let embedder = test_embedder();

        let mut repo = Repository::new(
            "s1".to_string(),
            "https://github.com/acme/widget".to_string(),
            "acme".to_string(),
            "widget".to_string(),
        );
        repo.overview = Some("A widget factory.".to_string());
        let repo_id = repo.id.clone();
        db.store_item(repo).await.expect("store repo");

        let mut file = RepoFile::new(
            repo_id.clone(),
            "core.py".to_string(),
            "python".to_string(),
            String::new(),
        );
        file.summary = Some("Core factory logic".to_string());
        file.dependencies.imported_by = vec!["a.py".to_string()];
        db.store_item(file).await.expect("store file");

        let ctx = ToolContext {
            db: &db,
            embedder: &embedder,
            repo_id: &repo_id,
        };

        let execution = execute_tool("get_repo_overview", &json!({}), &ctx).await;
        assert_eq!(execution.result["overview"], "A widget factory.");
        assert_eq!(execution.result["key_files"][0]["path"], "core.py");
        assert_eq!(execution.sources, vec![SourceRef::file("core.py")]);
    }
}
