//! Structural parsing across the supported languages.
//!
//! One generic syntax-tree strategy: tree-sitter with a grammar selected by
//! extension, then per-language node-kind rules to lift the tree into the
//! uniform structural record (functions, classes, imports). Line spans are
//! 1-based inclusive.

mod languages;

pub use languages::{display_language_for_path, Language};

use common::{
    error::AppError,
    storage::types::repo_file::{ClassInfo, FunctionInfo},
};
use tree_sitter::{Node, Parser};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedStructure {
    pub functions: Vec<FunctionInfo>,
    pub classes: Vec<ClassInfo>,
    pub imports: Vec<String>,
}

/// Parse one file's source text into the uniform structural record.
///
/// Syntax errors are reported as `AppError::Processing`; the caller stores
/// the file with `parsed = false` and moves on.
pub fn parse_source(language: Language, source: &str) -> Result<ParsedStructure, AppError> {
    let mut parser = Parser::new();
    parser
        .set_language(&language.grammar())
        .map_err(|e| AppError::InternalError(format!("loading {} grammar: {e}", language.name())))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| AppError::Processing(format!("{} parse returned no tree", language.name())))?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(AppError::Processing(format!(
            "{} source contains syntax errors",
            language.name()
        )));
    }

    let bytes = source.as_bytes();
    let rules = language.rules();

    let mut functions = Vec::new();
    for kind in rules.function_kinds {
        for node in find_by_kind(root, kind) {
            if let Some(function) = extract_function(language, node, bytes) {
                functions.push(function);
            }
        }
    }
    functions.sort_by_key(|f| (f.line_start, f.name.clone()));

    let mut classes = Vec::new();
    for kind in rules.class_kinds {
        for node in find_by_kind(root, kind) {
            if let Some(class) = extract_class(language, node, bytes) {
                classes.push(class);
            }
        }
    }
    classes.sort_by_key(|c| (c.line_start, c.name.clone()));

    for class in &mut classes {
        class.methods = functions
            .iter()
            .filter(|f| {
                f.parent_class.as_deref() == Some(class.name.as_str())
                    && f.line_start >= class.line_start
                    && f.line_end <= class.line_end
            })
            .map(|f| f.name.clone())
            .collect();
    }

    let mut imports = Vec::new();
    for kind in rules.import_kinds {
        for node in find_by_kind(root, kind) {
            imports.extend(extract_import(language, node, bytes));
        }
    }
    imports.dedup();

    Ok(ParsedStructure {
        functions,
        classes,
        imports,
    })
}

/// Depth-first collection of all nodes of one kind.
fn find_by_kind<'a>(node: Node<'a>, kind: &str) -> Vec<Node<'a>> {
    let mut results = Vec::new();
    collect_by_kind(node, kind, &mut results);
    results
}

fn collect_by_kind<'a>(node: Node<'a>, kind: &str, results: &mut Vec<Node<'a>>) {
    if node.kind() == kind {
        results.push(node);
    }

    let mut cursor = node.walk();
    if cursor.goto_first_child() {
        loop {
            collect_by_kind(cursor.node(), kind, results);
            if !cursor.goto_next_sibling() {
                break;
            }
        }
    }
}

fn node_text<'a>(node: Node<'_>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or_default()
}

/// Name lookup: the `name` field when present, nested declarators for C-style
/// grammars, then the first identifier-like child.
fn node_name(node: Node<'_>, source: &[u8]) -> Option<String> {
    if let Some(name_node) = node.child_by_field_name("name") {
        return Some(node_text(name_node, source).to_string());
    }

    if let Some(declarator) = node.child_by_field_name("declarator") {
        if declarator.kind().contains("declarator") {
            return node_name(declarator, source);
        }
        return Some(node_text(declarator, source).to_string());
    }

    first_child_of_kinds(node, &["identifier", "field_identifier", "type_identifier"])
        .map(|n| node_text(n, source).to_string())
}

fn first_child_of_kinds<'a>(node: Node<'a>, kinds: &[&str]) -> Option<Node<'a>> {
    if kinds.contains(&node.kind()) {
        return Some(node);
    }

    let mut cursor = node.walk();
    if cursor.goto_first_child() {
        loop {
            if let Some(found) = first_child_of_kinds(cursor.node(), kinds) {
                return Some(found);
            }
            if !cursor.goto_next_sibling() {
                break;
            }
        }
    }

    None
}

fn extract_function(language: Language, node: Node<'_>, source: &[u8]) -> Option<FunctionInfo> {
    let name = node_name(node, source)?;
    let parent_class = enclosing_container_name(language, node, source);
    let is_method = parent_class.is_some();
    let (line_start, line_end) = line_span(node);

    Some(FunctionInfo {
        name,
        parent_class,
        is_method,
        signature: signature_of(node, source),
        line_start,
        line_end,
        parameters: extract_parameters(language, node, source),
    })
}

fn extract_class(language: Language, node: Node<'_>, source: &[u8]) -> Option<ClassInfo> {
    // Go models everything through type_spec; only structs and interfaces
    // count as classes.
    if language == Language::Go {
        let type_kind = node.child_by_field_name("type")?.kind();
        if type_kind != "struct_type" && type_kind != "interface_type" {
            return None;
        }
    }

    let name = node_name(node, source)?;
    let span_node = if language == Language::Go {
        node.parent().unwrap_or(node)
    } else {
        node
    };
    let (line_start, line_end) = line_span(span_node);

    Some(ClassInfo {
        name,
        line_start,
        line_end,
        methods: Vec::new(),
    })
}

fn line_span(node: Node<'_>) -> (u32, u32) {
    (
        node.start_position().row as u32 + 1,
        node.end_position().row as u32 + 1,
    )
}

/// The declaration header: node text up to the body, whitespace-collapsed.
fn signature_of(node: Node<'_>, source: &[u8]) -> String {
    let text = match node.child_by_field_name("body") {
        Some(body) if body.start_byte() > node.start_byte() => {
            let start = node.start_byte();
            let end = body.start_byte();
            std::str::from_utf8(source.get(start..end).unwrap_or_default()).unwrap_or_default()
        }
        _ => node_text(node, source).lines().next().unwrap_or_default(),
    };

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(|c: char| c == '{' || c == ':' || c.is_whitespace())
        .to_string()
}

fn enclosing_container_name(
    language: Language,
    node: Node<'_>,
    source: &[u8],
) -> Option<String> {
    // Go spells methods with an explicit receiver instead of nesting.
    if language == Language::Go && node.kind() == "method_declaration" {
        let receiver = node.child_by_field_name("receiver")?;
        return first_child_of_kinds(receiver, &["type_identifier"])
            .map(|n| node_text(n, source).to_string());
    }

    let container_kinds = language.rules().container_kinds;
    let mut current = node.parent();
    while let Some(ancestor) = current {
        if container_kinds.contains(&ancestor.kind()) {
            if ancestor.kind() == "impl_item" {
                let impl_type = ancestor.child_by_field_name("type")?;
                return first_child_of_kinds(impl_type, &["type_identifier", "identifier"])
                    .map(|n| node_text(n, source).to_string());
            }
            return node_name(ancestor, source);
        }
        current = ancestor.parent();
    }

    None
}

fn extract_parameters(language: Language, node: Node<'_>, source: &[u8]) -> Vec<String> {
    let params_node = node.child_by_field_name("parameters").or_else(|| {
        node.child_by_field_name("declarator")
            .and_then(|d| first_child_of_kinds(d, &["function_declarator"]))
            .and_then(|d| d.child_by_field_name("parameters"))
    });
    let Some(params_node) = params_node else {
        return Vec::new();
    };

    // Java and the C family put the type before the name.
    let type_first = matches!(language, Language::Java | Language::C | Language::Cpp);

    let mut cursor = params_node.walk();
    let mut parameters = Vec::new();
    for child in params_node.named_children(&mut cursor) {
        if matches!(
            child.kind(),
            "comment" | "line_comment" | "block_comment" | "self_parameter" | "receiver"
        ) {
            continue;
        }
        let text = node_text(child, source);
        if let Some(name) = clean_parameter(text, type_first) {
            if name != "self" && name != "cls" {
                parameters.push(name);
            }
        }
    }

    parameters
}

/// Reduce a raw parameter node to the bare parameter name.
fn clean_parameter(text: &str, type_first: bool) -> Option<String> {
    let head = text.split([':', '=']).next()?.trim();
    if head.is_empty() {
        return None;
    }

    let tokens: Vec<String> = head
        .split_whitespace()
        .map(|token| {
            token
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|token| !token.is_empty() && token != "mut")
        .collect();

    let token = if type_first {
        tokens.last()?
    } else {
        tokens.first()?
    };

    Some(token.clone())
}

fn strip_string_delimiters(text: &str) -> String {
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`' || c == '<' || c == '>')
        .to_string()
}

/// Literal import targets, one or more per directive node.
fn extract_import(language: Language, node: Node<'_>, source: &[u8]) -> Vec<String> {
    match language {
        Language::Python => match node.kind() {
            "import_statement" => {
                let mut cursor = node.walk();
                node.named_children(&mut cursor)
                    .filter_map(|child| match child.kind() {
                        "dotted_name" => Some(node_text(child, source).to_string()),
                        "aliased_import" => child
                            .child_by_field_name("name")
                            .map(|n| node_text(n, source).to_string()),
                        _ => None,
                    })
                    .collect()
            }
            "import_from_statement" => node
                .child_by_field_name("module_name")
                .map(|n| vec![node_text(n, source).to_string()])
                .unwrap_or_default(),
            _ => Vec::new(),
        },
        Language::JavaScript | Language::TypeScript => match node.kind() {
            "import_statement" => node
                .child_by_field_name("source")
                .map(|n| vec![strip_string_delimiters(node_text(n, source))])
                .unwrap_or_default(),
            "call_expression" => {
                let callee = node
                    .child_by_field_name("function")
                    .map(|n| node_text(n, source))
                    .unwrap_or_default();
                if callee != "require" {
                    return Vec::new();
                }
                node.child_by_field_name("arguments")
                    .and_then(|args| {
                        first_child_of_kinds(args, &["string"])
                            .map(|n| strip_string_delimiters(node_text(n, source)))
                    })
                    .map(|target| vec![target])
                    .unwrap_or_default()
            }
            _ => Vec::new(),
        },
        Language::Rust => node
            .child_by_field_name("argument")
            .map(|n| vec![node_text(n, source).to_string()])
            .unwrap_or_default(),
        Language::Go => node
            .child_by_field_name("path")
            .or_else(|| first_child_of_kinds(node, &["interpreted_string_literal"]))
            .map(|n| vec![strip_string_delimiters(node_text(n, source))])
            .unwrap_or_default(),
        Language::Java => first_child_of_kinds(node, &["scoped_identifier", "identifier"])
            .map(|n| vec![node_text(n, source).to_string()])
            .unwrap_or_default(),
        Language::C | Language::Cpp => node
            .child_by_field_name("path")
            .map(|n| vec![strip_string_delimiters(node_text(n, source))])
            .unwrap_or_default(),
        Language::Ruby => {
            let callee = node
                .child_by_field_name("method")
                .map(|n| node_text(n, source))
                .unwrap_or_default();
            if callee != "require" && callee != "require_relative" {
                return Vec::new();
            }
            node.child_by_field_name("arguments")
                .and_then(|args| {
                    first_child_of_kinds(args, &["string"])
                        .map(|n| strip_string_delimiters(node_text(n, source)))
                })
                .map(|target| vec![target])
                .unwrap_or_default()
        }
    }
}
