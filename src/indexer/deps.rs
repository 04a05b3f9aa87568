// Dependency edge extraction
// Derives import and call edges from chunk content; the dependency
// retriever walks these by symbol name, never by pointer.

use regex::Regex;
use std::sync::LazyLock;

use crate::database::sqlite::{ChunkRecord, DepEdge, DepKind};

/// Upper bound on edges per chunk. Imports are collected before calls, so
/// the cap trims call noise first.
pub const MAX_EDGES_PER_CHUNK: usize = 32;

static RUST_USE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+([^;]+);").expect("pattern is valid")
});
static PY_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*import\s+([\w.]+)").expect("pattern is valid"));
static PY_FROM_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*from\s+[\w.]+\s+import\s+([\w.,\s]+)").expect("pattern is valid")
});
static JS_NAMED_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"import\s+(?:type\s+)?\{([^}]+)\}\s+from"#).expect("pattern is valid")
});
static JS_DEFAULT_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"import\s+([A-Za-z_$][\w$]*)\s+from"#).expect("pattern is valid")
});
static JS_REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"require\(['"]([^'"]+)['"]\)"#).expect("pattern is valid")
});
static GO_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*(?:import\s+)?"([\w./-]+)""#).expect("pattern is valid")
});
static CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("pattern is valid")
});

const CALL_STOPWORDS: &[&str] = &[
    "if", "for", "while", "switch", "match", "return", "fn", "function", "def", "catch", "new",
    "await", "async", "loop", "assert", "typeof", "sizeof", "print", "println", "push", "len",
    "format", "vec", "main", "do", "else", "try", "raise", "yield", "defer", "go", "let",
];

/// Extract import and call edges from one chunk.
pub fn extract_dep_edges(chunk: &ChunkRecord) -> Vec<DepEdge> {
    let mut names: Vec<(String, DepKind)> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    let mut push = |name: &str, kind: DepKind, names: &mut Vec<(String, DepKind)>| {
        let name = name.trim();
        if name.len() < 2 || name == "self" || name == "super" || name == "crate" {
            return;
        }
        if chunk.symbol_name.as_deref() == Some(name) {
            return;
        }
        if seen.insert((name.to_string(), kind)) {
            names.push((name.to_string(), kind));
        }
    };

    for import in extract_imports(&chunk.language, &chunk.content) {
        push(&import, DepKind::Import, &mut names);
    }

    for captures in CALL.captures_iter(&chunk.content) {
        let callee = &captures[1];
        if CALL_STOPWORDS.contains(&callee) {
            continue;
        }
        push(callee, DepKind::Call, &mut names);
        if names.len() >= MAX_EDGES_PER_CHUNK {
            break;
        }
    }

    names.truncate(MAX_EDGES_PER_CHUNK);

    names
        .into_iter()
        .map(|(dst_symbol_name, kind)| DepEdge {
            src_chunk_id: chunk.chunk_id.clone(),
            dst_symbol_name,
            kind,
        })
        .collect()
}

fn extract_imports(language: &str, content: &str) -> Vec<String> {
    let mut imports = Vec::new();

    match language {
        "rust" => {
            for captures in RUST_USE.captures_iter(content) {
                imports.extend(parse_use_tree(&captures[1]));
            }
        }
        "python" => {
            for captures in PY_IMPORT.captures_iter(content) {
                imports.push(last_segment(&captures[1], '.'));
            }
            for captures in PY_FROM_IMPORT.captures_iter(content) {
                for name in captures[1].split(',') {
                    let name = name.split_whitespace().next().unwrap_or("");
                    if !name.is_empty() {
                        imports.push(last_segment(name, '.'));
                    }
                }
            }
        }
        "typescript" | "javascript" => {
            for captures in JS_NAMED_IMPORT.captures_iter(content) {
                for name in captures[1].split(',') {
                    let name = name.split_whitespace().next().unwrap_or("");
                    if !name.is_empty() {
                        imports.push(name.to_string());
                    }
                }
            }
            for captures in JS_DEFAULT_IMPORT.captures_iter(content) {
                imports.push(captures[1].to_string());
            }
            for captures in JS_REQUIRE.captures_iter(content) {
                imports.push(last_segment(&captures[1], '/'));
            }
        }
        "go" => {
            for captures in GO_IMPORT.captures_iter(content) {
                imports.push(last_segment(&captures[1], '/'));
            }
        }
        _ => {}
    }

    imports
}

/// Flatten a Rust use tree (`a::b::{c, d as e}`) into its leaf names.
fn parse_use_tree(tree: &str) -> Vec<String> {
    let mut names = Vec::new();

    for piece in tree.split(['{', '}', ',']) {
        let piece = piece.trim().trim_end_matches("::").trim();
        if piece.is_empty() || piece == "*" {
            continue;
        }
        // `path::name as alias` imports `name`.
        let before_as = piece.split(" as ").next().unwrap_or(piece).trim();
        let leaf = last_segment(before_as, ':');
        if !leaf.is_empty() && leaf != "*" {
            names.push(leaf);
        }
    }

    names
}

fn last_segment(path: &str, separator: char) -> String {
    path.rsplit(separator)
        .next()
        .unwrap_or(path)
        .trim()
        .to_string()
}
