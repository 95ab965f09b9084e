use serde::{Deserialize, Serialize};

/// A `(file_path, line span)` citation collected from tool results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceRef {
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_start: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_end: Option<u32>,
}

impl SourceRef {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            file_path: path.into(),
            line_start: None,
            line_end: None,
        }
    }

    pub fn span(path: impl Into<String>, line_start: u32, line_end: u32) -> Self {
        Self {
            file_path: path.into(),
            line_start: Some(line_start),
            line_end: Some(line_end),
        }
    }
}

/// Events emitted over the query stream, serialized one JSON object per SSE
/// `data:` line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryEvent {
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    ToolResult {
        tool: String,
        result_count: u64,
    },
    AnswerChunk {
        content: String,
    },
    Done {
        sources: Vec<SourceRef>,
        tool_calls: Vec<String>,
    },
    Error {
        error: String,
    },
}

/// Collects sources across a turn, deduplicated in first-seen order.
#[derive(Debug, Default)]
pub struct SourceCollector {
    sources: Vec<SourceRef>,
}

impl SourceCollector {
    pub fn extend(&mut self, incoming: Vec<SourceRef>) {
        for source in incoming {
            if !self.sources.contains(&source) {
                self.sources.push(source);
            }
        }
    }

    pub fn into_sources(self) -> Vec<SourceRef> {
        self.sources
    }
}
