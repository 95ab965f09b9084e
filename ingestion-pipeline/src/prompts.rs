//! Prompt construction for the summarization and overview calls, plus the
//! deterministic chunk descriptions fed to the code index.

use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use common::{
    error::AppError,
    storage::types::repo_file::{ClassInfo, FunctionInfo, RepoFile},
};

/// Overview stored verbatim for repositories with no text files.
pub const EMPTY_REPO_OVERVIEW: &str =
    "This repository contains no parseable text files; there is nothing to summarize.";

pub const SUMMARIZE_SYSTEM_MESSAGE: &str = "\
You are a precise code documentation assistant. Summarize the given source \
file in 3 to 6 sentences: its purpose, the key functions and classes listed \
in the structural outline, and how it fits into a larger codebase. Do not \
quote long code fragments and do not speculate beyond the file contents.";

pub const OVERVIEW_SYSTEM_MESSAGE: &str = "\
You are a precise code documentation assistant. Given per-file summaries of \
the most imported files in a repository, write a repository overview: what \
the project does, its main components, and how they fit together. Be \
concrete and keep it under 300 words.";

const CONTENT_CHAR_LIMIT: usize = 12_000;

pub fn build_summary_request(
    model: &str,
    file: &RepoFile,
) -> Result<CreateChatCompletionRequest, AppError> {
    let outline = structural_outline(file);
    let body = truncate_chars(&file.content, CONTENT_CHAR_LIMIT);
    let truncated = body.chars().count() < file.content.chars().count();

    let user_message = format!(
        "Language: {language}\nPath: {path}\nStructural outline:\n{outline}\n\
         Content{marker}:\n{body}",
        language = file.language,
        path = file.path,
        marker = if truncated { " (truncated)" } else { "" },
    );

    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages([
            ChatCompletionRequestSystemMessage::from(SUMMARIZE_SYSTEM_MESSAGE).into(),
            ChatCompletionRequestUserMessage::from(user_message).into(),
        ])
        .build()?;

    Ok(request)
}

pub fn build_overview_request(
    model: &str,
    repo_name: &str,
    file_summaries: &[(String, String)],
) -> Result<CreateChatCompletionRequest, AppError> {
    let summaries = file_summaries
        .iter()
        .map(|(path, summary)| format!("## {path}\n{summary}"))
        .collect::<Vec<_>>()
        .join("\n\n");

    let user_message = format!("Repository: {repo_name}\n\nFile summaries:\n\n{summaries}");

    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages([
            ChatCompletionRequestSystemMessage::from(OVERVIEW_SYSTEM_MESSAGE).into(),
            ChatCompletionRequestUserMessage::from(user_message).into(),
        ])
        .build()?;

    Ok(request)
}

/// Compact function/class listing included for grounding.
pub fn structural_outline(file: &RepoFile) -> String {
    let mut lines = Vec::new();

    for class in &file.classes {
        lines.push(format!(
            "- class {} (lines {}-{}), methods: [{}]",
            class.name,
            class.line_start,
            class.line_end,
            class.methods.join(", ")
        ));
    }
    for function in file.functions.iter().filter(|f| !f.is_method) {
        lines.push(format!(
            "- {} (lines {}-{})",
            function.signature, function.line_start, function.line_end
        ));
    }

    if lines.is_empty() {
        "- (no parsed structure)".to_string()
    } else {
        lines.join("\n")
    }
}

/// Deterministic natural-language description of a function chunk.
pub fn describe_function(path: &str, function: &FunctionInfo) -> String {
    let role = if function.is_method {
        match &function.parent_class {
            Some(class) => format!("Method `{}` of class `{class}`", function.name),
            None => format!("Method `{}`", function.name),
        }
    } else {
        format!("Function `{}`", function.name)
    };

    let params = if function.parameters.is_empty() {
        "no parameters".to_string()
    } else {
        format!("parameters: {}", function.parameters.join(", "))
    };

    format!(
        "{role} in {path}, lines {}-{}. Signature: `{}`; {params}.",
        function.line_start, function.line_end, function.signature
    )
}

/// Deterministic natural-language description of a class chunk.
pub fn describe_class(path: &str, class: &ClassInfo) -> String {
    let methods = if class.methods.is_empty() {
        "no methods".to_string()
    } else {
        format!("methods: {}", class.methods.join(", "))
    };

    format!(
        "Class `{}` in {path}, lines {}-{}; {methods}.",
        class.name, class.line_start, class.line_end
    )
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_function() -> FunctionInfo {
        FunctionInfo {
            name: "parse".to_string(),
            parent_class: Some("Parser".to_string()),
            is_method: true,
            signature: "def parse(self, text)".to_string(),
            line_start: 10,
            line_end: 22,
            parameters: vec!["text".to_string()],
        }
    }

    #[test]
    fn function_description_is_deterministic() {
        let function = sample_function();
        let first = describe_function("src/parser.py", &function);
        let second = describe_function("src/parser.py", &function);
        assert_eq!(first, second);
        assert!(first.contains("Method `parse` of class `Parser`"));
        assert!(first.contains("lines 10-22"));
    }

    #[test]
    fn class_description_lists_methods() {
        let class = ClassInfo {
            name: "Parser".to_string(),
            line_start: 5,
            line_end: 40,
            methods: vec!["parse".to_string(), "reset".to_string()],
        };
        let description = describe_class("src/parser.py", &class);
        assert!(description.contains("Class `Parser`"));
        assert!(description.contains("methods: parse, reset"));
    }

    #[test]
    fn outline_handles_unparsed_files() {
        let file = RepoFile::new(
            "r1".to_string(),
            "notes.md".to_string(),
            "markdown".to_string(),
            "# notes".to_string(),
        );
        assert_eq!(structural_outline(&file), "- (no parsed structure)");
    }

    #[test]
    fn truncate_chars_respects_boundary() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
    }
}
