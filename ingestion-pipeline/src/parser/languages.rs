//! Language registry: extension dispatch, grammar bindings and per-language
//! node extraction rules for the generic syntax-tree strategy.

use tree_sitter::Language as TsLanguage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Rust,
    Go,
    Java,
    C,
    Cpp,
    Ruby,
}

/// Node kinds consulted by the extractor. Kinds are grammar-specific strings,
/// so each language carries its own table.
pub struct NodeRules {
    pub function_kinds: &'static [&'static str],
    pub class_kinds: &'static [&'static str],
    /// Ancestor kinds that make a contained function a method.
    pub container_kinds: &'static [&'static str],
    pub import_kinds: &'static [&'static str],
}

impl Language {
    pub fn from_path(path: &str) -> Option<Self> {
        let extension = path.rsplit('.').next()?;
        match extension {
            "py" | "pyi" => Some(Self::Python),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            "ts" | "tsx" | "mts" | "cts" => Some(Self::TypeScript),
            "rs" => Some(Self::Rust),
            "go" => Some(Self::Go),
            "java" => Some(Self::Java),
            "c" | "h" => Some(Self::C),
            "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Some(Self::Cpp),
            "rb" | "rake" => Some(Self::Ruby),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Ruby => "ruby",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "python" => Some(Self::Python),
            "javascript" => Some(Self::JavaScript),
            "typescript" => Some(Self::TypeScript),
            "rust" => Some(Self::Rust),
            "go" => Some(Self::Go),
            "java" => Some(Self::Java),
            "c" => Some(Self::C),
            "cpp" => Some(Self::Cpp),
            "ruby" => Some(Self::Ruby),
            _ => None,
        }
    }

    pub fn grammar(self) -> TsLanguage {
        match self {
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
            Self::Java => tree_sitter_java::LANGUAGE.into(),
            Self::C => tree_sitter_c::LANGUAGE.into(),
            Self::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            Self::Ruby => tree_sitter_ruby::LANGUAGE.into(),
        }
    }

    pub fn rules(self) -> &'static NodeRules {
        static PYTHON: NodeRules = NodeRules {
            function_kinds: &["function_definition"],
            class_kinds: &["class_definition"],
            container_kinds: &["class_definition"],
            import_kinds: &["import_statement", "import_from_statement"],
        };
        static JAVASCRIPT: NodeRules = NodeRules {
            function_kinds: &["function_declaration", "method_definition"],
            class_kinds: &["class_declaration"],
            container_kinds: &["class_declaration", "class"],
            import_kinds: &["import_statement", "call_expression"],
        };
        static TYPESCRIPT: NodeRules = NodeRules {
            function_kinds: &["function_declaration", "method_definition"],
            class_kinds: &["class_declaration", "interface_declaration"],
            container_kinds: &["class_declaration", "class"],
            import_kinds: &["import_statement", "call_expression"],
        };
        static RUST: NodeRules = NodeRules {
            function_kinds: &["function_item"],
            class_kinds: &["struct_item", "enum_item", "trait_item"],
            container_kinds: &["impl_item", "trait_item"],
            import_kinds: &["use_declaration"],
        };
        static GO: NodeRules = NodeRules {
            function_kinds: &["function_declaration", "method_declaration"],
            class_kinds: &["type_spec"],
            container_kinds: &[],
            import_kinds: &["import_spec"],
        };
        static JAVA: NodeRules = NodeRules {
            function_kinds: &["method_declaration", "constructor_declaration"],
            class_kinds: &[
                "class_declaration",
                "interface_declaration",
                "enum_declaration",
            ],
            container_kinds: &[
                "class_declaration",
                "interface_declaration",
                "enum_declaration",
            ],
            import_kinds: &["import_declaration"],
        };
        static C: NodeRules = NodeRules {
            function_kinds: &["function_definition"],
            class_kinds: &["struct_specifier"],
            container_kinds: &[],
            import_kinds: &["preproc_include"],
        };
        static CPP: NodeRules = NodeRules {
            function_kinds: &["function_definition"],
            class_kinds: &["class_specifier", "struct_specifier"],
            container_kinds: &["class_specifier", "struct_specifier"],
            import_kinds: &["preproc_include"],
        };
        static RUBY: NodeRules = NodeRules {
            function_kinds: &["method", "singleton_method"],
            class_kinds: &["class", "module"],
            container_kinds: &["class", "module"],
            import_kinds: &["call"],
        };

        match self {
            Self::Python => &PYTHON,
            Self::JavaScript => &JAVASCRIPT,
            Self::TypeScript => &TYPESCRIPT,
            Self::Rust => &RUST,
            Self::Go => &GO,
            Self::Java => &JAVA,
            Self::C => &C,
            Self::Cpp => &CPP,
            Self::Ruby => &RUBY,
        }
    }

    /// Extensions tried when an import target omits one, most common first.
    pub fn candidate_extensions(self) -> &'static [&'static str] {
        match self {
            Self::Python => &["py", "pyi"],
            Self::JavaScript => &["js", "jsx", "mjs", "cjs", "ts", "tsx"],
            Self::TypeScript => &["ts", "tsx", "js", "jsx"],
            Self::Rust => &["rs"],
            Self::Go => &["go"],
            Self::Java => &["java"],
            Self::C => &["h", "c"],
            Self::Cpp => &["hpp", "hh", "h", "cpp", "cc"],
            Self::Ruby => &["rb"],
        }
    }

    /// Directory convention files tried when an import names a folder.
    pub fn index_filenames(self) -> &'static [&'static str] {
        match self {
            Self::Python => &["__init__.py"],
            Self::JavaScript => &["index.js", "index.jsx", "index.ts"],
            Self::TypeScript => &["index.ts", "index.tsx", "index.js"],
            Self::Rust => &["mod.rs"],
            _ => &[],
        }
    }
}

/// Display name for non-parsed but text-eligible files, used only for the
/// repository language histogram.
pub fn display_language_for_path(path: &str) -> Option<&'static str> {
    if let Some(language) = Language::from_path(path) {
        return Some(language.name());
    }

    let extension = path.rsplit('.').next()?;
    match extension {
        "md" | "markdown" => Some("markdown"),
        "json" => Some("json"),
        "yml" | "yaml" => Some("yaml"),
        "toml" => Some("toml"),
        "txt" | "rst" => Some("text"),
        "html" | "htm" => Some("html"),
        "css" | "scss" => Some("css"),
        "sh" | "bash" => Some("shell"),
        "sql" => Some("sql"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_dispatch_covers_supported_languages() {
        assert_eq!(Language::from_path("src/app.py"), Some(Language::Python));
        assert_eq!(Language::from_path("lib/index.ts"), Some(Language::TypeScript));
        assert_eq!(Language::from_path("main.rs"), Some(Language::Rust));
        assert_eq!(Language::from_path("cmd/root.go"), Some(Language::Go));
        assert_eq!(Language::from_path("a/b/Widget.java"), Some(Language::Java));
        assert_eq!(Language::from_path("kernel.c"), Some(Language::C));
        assert_eq!(Language::from_path("engine.hpp"), Some(Language::Cpp));
        assert_eq!(Language::from_path("worker.rb"), Some(Language::Ruby));
        assert_eq!(Language::from_path("README.md"), None);
        assert_eq!(Language::from_path("Makefile"), None);
    }

    #[test]
    fn language_names_roundtrip() {
        for language in [
            Language::Python,
            Language::JavaScript,
            Language::TypeScript,
            Language::Rust,
            Language::Go,
            Language::Java,
            Language::C,
            Language::Cpp,
            Language::Ruby,
        ] {
            assert_eq!(Language::from_name(language.name()), Some(language));
        }
    }

    #[test]
    fn display_language_covers_text_formats() {
        assert_eq!(display_language_for_path("README.md"), Some("markdown"));
        assert_eq!(display_language_for_path("config.yaml"), Some("yaml"));
        assert_eq!(display_language_for_path("app.py"), Some("python"));
        assert_eq!(display_language_for_path("image.png"), None);
    }
}
