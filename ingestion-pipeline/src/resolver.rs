//! Purely textual import resolution.
//!
//! Maps the literal import strings the parser extracted onto repo-local file
//! paths, in the fixed order: exact path match, path with a
//! language-customary extension appended, directory index convention, and
//! otherwise external. No code is executed and no package metadata is read.

use std::collections::{BTreeMap, BTreeSet};

use common::storage::types::repo_file::Dependencies;

use crate::parser::Language;

/// Per-file parse output consumed by the resolver.
pub struct FileImports {
    pub path: String,
    pub language: Option<Language>,
    pub imports: Vec<String>,
}

/// Resolve every file's imports and invert them into `imported_by`.
pub fn build_dependency_map(files: &[FileImports]) -> BTreeMap<String, Dependencies> {
    let all_paths: BTreeSet<String> = files.iter().map(|f| f.path.clone()).collect();

    let mut map: BTreeMap<String, Dependencies> = files
        .iter()
        .map(|f| (f.path.clone(), Dependencies::default()))
        .collect();

    for file in files {
        let mut imports = Vec::new();
        let mut external = Vec::new();

        for target in &file.imports {
            match resolve_target(target, &file.path, file.language, &all_paths) {
                Some(resolved) if resolved != file.path => {
                    if !imports.contains(&resolved) {
                        imports.push(resolved);
                    }
                }
                Some(_) => {}
                None => {
                    if !external.contains(target) {
                        external.push(target.clone());
                    }
                }
            }
        }

        if let Some(deps) = map.get_mut(&file.path) {
            deps.imports = imports;
            deps.external_imports = external;
        }
    }

    // Invert imports into imported_by across the whole file set.
    let edges: Vec<(String, String)> = map
        .iter()
        .flat_map(|(importer, deps)| {
            deps.imports
                .iter()
                .map(|imported| (imported.clone(), importer.clone()))
        })
        .collect();

    for (imported, importer) in edges {
        if let Some(deps) = map.get_mut(&imported) {
            if !deps.imported_by.contains(&importer) {
                deps.imported_by.push(importer);
            }
        }
    }

    for deps in map.values_mut() {
        deps.imported_by.sort();
    }

    map
}

/// Resolve one literal import target to a repo-local path, if possible.
pub fn resolve_target(
    target: &str,
    importing_path: &str,
    language: Option<Language>,
    all_paths: &BTreeSet<String>,
) -> Option<String> {
    let bases = candidate_bases(target, importing_path, language);

    // (a) exact path match
    for base in &bases {
        if all_paths.contains(base) {
            return Some(base.clone());
        }
    }

    // (b) language-customary extension appended; ties resolve
    //     lexicographically.
    if let Some(language) = language {
        for base in &bases {
            let matched = language
                .candidate_extensions()
                .iter()
                .map(|ext| format!("{base}.{ext}"))
                .filter(|candidate| all_paths.contains(candidate))
                .min();
            if let Some(found) = matched {
                return Some(found);
            }
        }

        // (c) directory index convention
        for base in &bases {
            let matched = language
                .index_filenames()
                .iter()
                .map(|index| format!("{base}/{index}"))
                .filter(|candidate| all_paths.contains(candidate))
                .min();
            if let Some(found) = matched {
                return Some(found);
            }
        }
    }

    // (d) external
    None
}

/// Normalised path forms a target may denote, ordered by precedence:
/// relative to the importing file first, then repo-root, then the
/// language's conventional source root.
fn candidate_bases(
    target: &str,
    importing_path: &str,
    language: Option<Language>,
) -> Vec<String> {
    let dir = parent_dir(importing_path);
    let mut bases = Vec::new();
    let mut push = |base: String| {
        if !base.is_empty() && !bases.contains(&base) {
            bases.push(base);
        }
    };

    match language {
        Some(Language::Python) => {
            let dots = target.chars().take_while(|c| *c == '.').count();
            let rest = target.get(dots..).unwrap_or_default().replace('.', "/");
            if dots > 0 {
                // One leading dot is the current package, each further dot
                // pops one level.
                let mut base_dir = dir.clone();
                for _ in 1..dots {
                    base_dir = parent_of(&base_dir);
                }
                push(join(&base_dir, &rest));
            } else {
                push(join(&dir, &rest));
                push(rest);
            }
        }
        Some(Language::Rust) => {
            let mut segments: Vec<&str> = target.split("::").collect();
            let mut base_dir = None;
            match segments.first().copied() {
                Some("crate") => {
                    segments.remove(0);
                }
                Some("self") => {
                    segments.remove(0);
                    base_dir = Some(dir.clone());
                }
                Some("super") => {
                    let mut current = parent_of(&dir);
                    segments.remove(0);
                    while segments.first() == Some(&"super") {
                        segments.remove(0);
                        current = parent_of(&current);
                    }
                    base_dir = Some(current);
                }
                _ => {}
            }
            let rest = segments.join("/");
            match base_dir {
                Some(base) => push(join(&base, &rest)),
                None => {
                    push(join(&dir, &rest));
                    push(join("src", &rest));
                    push(rest);
                }
            }
        }
        Some(Language::Java) => {
            push(target.replace('.', "/"));
        }
        _ => {
            if target.starts_with("./") || target.starts_with("../") {
                push(normalize(&join(&dir, target)));
            } else {
                push(join(&dir, target));
                push(normalize(target));
            }
        }
    }

    bases
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(index) => path.get(..index).unwrap_or_default().to_string(),
        None => String::new(),
    }
}

fn parent_of(dir: &str) -> String {
    parent_dir(dir)
}

fn join(dir: &str, rest: &str) -> String {
    if dir.is_empty() {
        rest.to_string()
    } else if rest.is_empty() {
        dir.to_string()
    } else {
        format!("{dir}/{rest}")
    }
}

/// Collapse `.` and `..` segments without touching the filesystem.
fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, language: Language, imports: &[&str]) -> FileImports {
        FileImports {
            path: path.to_string(),
            language: Some(language),
            imports: imports.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    fn paths(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn python_module_resolves_with_extension() {
        let set = paths(&["a.py", "b.py"]);
        assert_eq!(
            resolve_target("b", "a.py", Some(Language::Python), &set),
            Some("b.py".to_string())
        );
    }

    #[test]
    fn python_dotted_and_package_init() {
        let set = paths(&["pkg/__init__.py", "pkg/helpers.py", "main.py"]);
        assert_eq!(
            resolve_target("pkg.helpers", "main.py", Some(Language::Python), &set),
            Some("pkg/helpers.py".to_string())
        );
        assert_eq!(
            resolve_target("pkg", "main.py", Some(Language::Python), &set),
            Some("pkg/__init__.py".to_string())
        );
    }

    #[test]
    fn python_relative_imports() {
        let set = paths(&["pkg/a.py", "pkg/b.py", "shared.py"]);
        assert_eq!(
            resolve_target(".b", "pkg/a.py", Some(Language::Python), &set),
            Some("pkg/b.py".to_string())
        );
        assert_eq!(
            resolve_target("..shared", "pkg/a.py", Some(Language::Python), &set),
            Some("shared.py".to_string())
        );
    }

    #[test]
    fn javascript_relative_and_index() {
        let set = paths(&[
            "src/app.js",
            "src/utils.js",
            "src/components/index.js",
            "shared/colors.js",
        ]);
        assert_eq!(
            resolve_target("./utils", "src/app.js", Some(Language::JavaScript), &set),
            Some("src/utils.js".to_string())
        );
        assert_eq!(
            resolve_target(
                "./components",
                "src/app.js",
                Some(Language::JavaScript),
                &set
            ),
            Some("src/components/index.js".to_string())
        );
        assert_eq!(
            resolve_target(
                "../shared/colors",
                "src/app.js",
                Some(Language::JavaScript),
                &set
            ),
            Some("shared/colors.js".to_string())
        );
    }

    #[test]
    fn ambiguous_extension_match_resolves_lexicographically() {
        let set = paths(&["src/app.js", "src/utils.js", "src/utils.ts"]);
        assert_eq!(
            resolve_target("./utils", "src/app.js", Some(Language::JavaScript), &set),
            Some("src/utils.js".to_string())
        );
    }

    #[test]
    fn rust_crate_paths_resolve_under_src() {
        let set = paths(&["src/main.rs", "src/utils/config.rs", "src/utils/mod.rs"]);
        assert_eq!(
            resolve_target(
                "crate::utils::config",
                "src/main.rs",
                Some(Language::Rust),
                &set
            ),
            Some("src/utils/config.rs".to_string())
        );
        assert_eq!(
            resolve_target("crate::utils", "src/main.rs", Some(Language::Rust), &set),
            Some("src/utils/mod.rs".to_string())
        );
    }

    #[test]
    fn unresolved_targets_are_external() {
        let set = paths(&["a.py"]);
        assert_eq!(
            resolve_target("numpy", "a.py", Some(Language::Python), &set),
            None
        );
    }

    #[test]
    fn dependency_map_inverts_imports() {
        let files = vec![
            file("a.py", Language::Python, &["b", "numpy"]),
            file("b.py", Language::Python, &[]),
        ];

        let map = build_dependency_map(&files);

        let a = map.get("a.py").expect("a.py deps");
        assert_eq!(a.imports, vec!["b.py".to_string()]);
        assert_eq!(a.external_imports, vec!["numpy".to_string()]);
        assert!(a.imported_by.is_empty());

        let b = map.get("b.py").expect("b.py deps");
        assert!(b.imports.is_empty());
        assert_eq!(b.imported_by, vec!["a.py".to_string()]);
    }

    #[test]
    fn self_imports_are_dropped() {
        let files = vec![file("pkg/a.py", Language::Python, &[".a"])];
        let map = build_dependency_map(&files);
        assert!(map.get("pkg/a.py").expect("deps").imports.is_empty());
    }

    #[test]
    fn inversion_is_exact_over_the_file_set() {
        let files = vec![
            file("core.py", Language::Python, &[]),
            file("x.py", Language::Python, &["core"]),
            file("y.py", Language::Python, &["core"]),
        ];

        let map = build_dependency_map(&files);

        // forward ⇒ backward
        for (path, deps) in &map {
            for imported in &deps.imports {
                assert!(map
                    .get(imported)
                    .expect("imported file present")
                    .imported_by
                    .contains(path));
            }
        }
        // backward ⇒ forward
        for (path, deps) in &map {
            for importer in &deps.imported_by {
                assert!(map
                    .get(importer)
                    .expect("importer present")
                    .imports
                    .contains(path));
            }
        }

        assert_eq!(
            map.get("core.py").expect("core deps").imported_by,
            vec!["x.py".to_string(), "y.py".to_string()]
        );
    }
}
