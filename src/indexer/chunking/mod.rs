
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

use crate::database::sqlite::{ChunkRecord, SymbolType};

/// Configuration for symbol-scoped chunking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum span size in lines; oversize spans split at blank lines.
    pub max_span_lines: usize,
    /// Maximum span size in bytes; oversize spans split at blank lines.
    pub max_span_bytes: usize,
    /// Window length for files without a language-aware parse.
    pub fallback_stride_lines: usize,
    /// Overlap between adjacent fallback windows.
    pub fallback_overlap_lines: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_span_lines: 200,
            max_span_bytes: 4096,
            fallback_stride_lines: 40,
            fallback_overlap_lines: 10,
        }
    }
}

/// A detected symbol start: 0-based line, identifier, and kind.
#[derive(Debug, Clone, PartialEq)]
struct SymbolStart {
    line: usize,
    name: String,
    symbol_type: SymbolType,
}

/// Chunk one file into symbol-scoped spans, falling back to fixed-stride
/// line windows when the language has no symbol patterns.
///
/// Spans partition the file in line order: each detected symbol runs until
/// the next detected symbol (or end of file), and any non-blank preamble
/// before the first symbol becomes a `block` chunk. Oversize spans are
/// split at blank-line boundaries.
pub fn chunk_file(
    file_path: &str,
    language: &str,
    content: &str,
    last_modified: i64,
    config: &ChunkingConfig,
) -> Vec<ChunkRecord> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    let lines = line_spans(content);
    let starts = symbol_starts(language, content);

    let chunks = if starts.is_empty() {
        fallback_chunks(file_path, language, content, &lines, last_modified, config)
    } else {
        symbol_chunks(
            file_path,
            language,
            content,
            &lines,
            &starts,
            last_modified,
            config,
        )
    };

    debug!(
        "Chunked {} into {} chunks ({} symbols detected)",
        file_path,
        chunks.len(),
        starts.len()
    );

    chunks
}

fn symbol_chunks(
    file_path: &str,
    language: &str,
    content: &str,
    lines: &[(usize, usize)],
    starts: &[SymbolStart],
    last_modified: i64,
    config: &ChunkingConfig,
) -> Vec<ChunkRecord> {
    let mut chunks = Vec::new();

    // Non-blank preamble (imports, file docs) before the first symbol.
    if starts[0].line > 0 {
        push_span_chunks(
            &mut chunks,
            file_path,
            language,
            content,
            lines,
            0,
            starts[0].line - 1,
            None,
            Some(SymbolType::Block),
            last_modified,
            config,
        );
    }

    for (i, start) in starts.iter().enumerate() {
        let end = match starts.get(i + 1) {
            Some(next) => next.line - 1,
            None => lines.len() - 1,
        };

        push_span_chunks(
            &mut chunks,
            file_path,
            language,
            content,
            lines,
            start.line,
            end,
            Some(start.name.clone()),
            Some(start.symbol_type),
            last_modified,
            config,
        );
    }

    chunks
}

fn fallback_chunks(
    file_path: &str,
    language: &str,
    content: &str,
    lines: &[(usize, usize)],
    last_modified: i64,
    config: &ChunkingConfig,
) -> Vec<ChunkRecord> {
    let stride = config.fallback_stride_lines.max(1);
    let step = stride.saturating_sub(config.fallback_overlap_lines).max(1);

    // Small files index as a single whole-file entry.
    if lines.len() <= stride && content.len() <= config.max_span_bytes {
        return vec![ChunkRecord::new(
            file_path,
            None,
            language,
            None,
            Some(SymbolType::File),
            last_modified,
            content,
        )];
    }

    let mut chunks = Vec::new();
    let mut window_start = 0usize;

    while window_start < lines.len() {
        let window_end = (window_start + stride - 1).min(lines.len() - 1);
        let text = slice_lines(content, lines, window_start, window_end);

        if !text.trim().is_empty() {
            chunks.push(ChunkRecord::new(
                file_path,
                Some((window_start as u32 + 1, window_end as u32 + 1)),
                language,
                None,
                None,
                last_modified,
                text,
            ));
        }

        if window_end + 1 >= lines.len() {
            break;
        }
        window_start += step;
    }

    chunks
}

/// Emit one span as one or more chunks, splitting at blank lines when the
/// span exceeds the configured line or byte limits.
#[allow(clippy::too_many_arguments)]
fn push_span_chunks(
    chunks: &mut Vec<ChunkRecord>,
    file_path: &str,
    language: &str,
    content: &str,
    lines: &[(usize, usize)],
    start: usize,
    end: usize,
    symbol_name: Option<String>,
    symbol_type: Option<SymbolType>,
    last_modified: i64,
    config: &ChunkingConfig,
) {
    let end = trim_trailing_blank(content, lines, start, end);
    let Some(end) = end else {
        return;
    };

    for (piece_start, piece_end) in split_oversize(content, lines, start, end, config) {
        let text = slice_lines(content, lines, piece_start, piece_end);
        if text.trim().is_empty() {
            continue;
        }

        chunks.push(ChunkRecord::new(
            file_path,
            Some((piece_start as u32 + 1, piece_end as u32 + 1)),
            language,
            symbol_name.clone(),
            symbol_type,
            last_modified,
            text,
        ));
    }
}

/// Split `[start, end]` into pieces that respect the line and byte limits,
/// preferring blank-line boundaries and hard-splitting only when a piece
/// has none.
fn split_oversize(
    content: &str,
    lines: &[(usize, usize)],
    start: usize,
    end: usize,
    config: &ChunkingConfig,
) -> Vec<(usize, usize)> {
    let fits = |a: usize, b: usize| {
        (b - a + 1) <= config.max_span_lines
            && (lines[b].1 - lines[a].0) <= config.max_span_bytes
    };

    if fits(start, end) {
        return vec![(start, end)];
    }

    let mut pieces = Vec::new();
    let mut piece_start = start;
    let mut cursor = start;

    while cursor <= end {
        if fits(piece_start, cursor) {
            cursor += 1;
            continue;
        }

        if cursor == piece_start {
            // A single line over the byte limit cannot be split further.
            pieces.push((piece_start, cursor));
            piece_start = cursor + 1;
            cursor = piece_start;
            continue;
        }

        // Prefer the nearest blank line inside the current piece; hard
        // split at the limit when there is none.
        let mut split_at = cursor - 1;
        let mut probe = cursor - 1;
        while probe > piece_start {
            if line_text(content, lines, probe).trim().is_empty() {
                split_at = probe;
                break;
            }
            probe -= 1;
        }

        pieces.push((piece_start, split_at));
        piece_start = split_at + 1;
        cursor = piece_start;
    }

    if piece_start <= end {
        pieces.push((piece_start, end));
    }

    pieces
}

fn trim_trailing_blank(
    content: &str,
    lines: &[(usize, usize)],
    start: usize,
    mut end: usize,
) -> Option<usize> {
    loop {
        if line_text(content, lines, end).trim().is_empty() {
            if end == start {
                return None;
            }
            end -= 1;
        } else {
            return Some(end);
        }
    }
}

/// Byte spans of each line, newline included, so chunk content preserves
/// the original bytes exactly.
fn line_spans(content: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0usize;

    for (i, byte) in content.bytes().enumerate() {
        if byte == b'\n' {
            spans.push((start, i + 1));
            start = i + 1;
        }
    }
    if start < content.len() {
        spans.push((start, content.len()));
    }

    spans
}

fn slice_lines<'a>(content: &'a str, lines: &[(usize, usize)], start: usize, end: usize) -> &'a str {
    &content[lines[start].0..lines[end].1]
}

fn line_text<'a>(content: &'a str, lines: &[(usize, usize)], index: usize) -> &'a str {
    content[lines[index].0..lines[index].1].trim_end_matches('\n')
}

type Patterns = &'static [(&'static LazyLock<Regex>, SymbolType)];

macro_rules! symbol_regex {
    ($name:ident, $pattern:expr) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($pattern).expect("symbol pattern is valid"));
    };
}

symbol_regex!(
    RUST_FN,
    r"^(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:const\s+)?(?:unsafe\s+)?fn\s+([A-Za-z_][A-Za-z0-9_]*)"
);
symbol_regex!(
    RUST_METHOD,
    r"^\s+(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:const\s+)?(?:unsafe\s+)?fn\s+([A-Za-z_][A-Za-z0-9_]*)"
);
symbol_regex!(RUST_STRUCT, r"^(?:pub(?:\([^)]*\))?\s+)?struct\s+([A-Za-z_][A-Za-z0-9_]*)");
symbol_regex!(RUST_ENUM, r"^(?:pub(?:\([^)]*\))?\s+)?enum\s+([A-Za-z_][A-Za-z0-9_]*)");
symbol_regex!(RUST_TRAIT, r"^(?:pub(?:\([^)]*\))?\s+)?trait\s+([A-Za-z_][A-Za-z0-9_]*)");
symbol_regex!(
    RUST_IMPL,
    r"^impl(?:<[^>]*>)?\s+(?:[A-Za-z_][A-Za-z0-9_:]*(?:<[^>]*>)?\s+for\s+)?([A-Za-z_][A-Za-z0-9_]*)"
);
symbol_regex!(RUST_MOD, r"^(?:pub(?:\([^)]*\))?\s+)?mod\s+([A-Za-z_][A-Za-z0-9_]*)");
symbol_regex!(
    RUST_CONST,
    r"^(?:pub(?:\([^)]*\))?\s+)?(?:const|static)\s+([A-Z_][A-Z0-9_]*)"
);
symbol_regex!(RUST_TYPE, r"^(?:pub(?:\([^)]*\))?\s+)?type\s+([A-Za-z_][A-Za-z0-9_]*)");

static RUST_PATTERNS: Patterns = &[
    (&RUST_FN, SymbolType::Function),
    (&RUST_METHOD, SymbolType::Method),
    (&RUST_STRUCT, SymbolType::Class),
    (&RUST_ENUM, SymbolType::Type),
    (&RUST_TRAIT, SymbolType::Interface),
    (&RUST_IMPL, SymbolType::Class),
    (&RUST_MOD, SymbolType::Module),
    (&RUST_CONST, SymbolType::Constant),
    (&RUST_TYPE, SymbolType::Type),
];

symbol_regex!(
    TS_FUNCTION,
    r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][A-Za-z0-9_$]*)"
);
symbol_regex!(
    TS_CLASS,
    r"^(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][A-Za-z0-9_$]*)"
);
symbol_regex!(TS_INTERFACE, r"^(?:export\s+)?interface\s+([A-Za-z_$][A-Za-z0-9_$]*)");
symbol_regex!(TS_TYPE, r"^(?:export\s+)?type\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=");
symbol_regex!(
    TS_ARROW_FN,
    r"^(?:export\s+)?const\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*(?:async\s*)?\("
);
symbol_regex!(TS_CONST, r"^(?:export\s+)?const\s+([A-Z_][A-Z0-9_]*)\s*=");

static TS_PATTERNS: Patterns = &[
    (&TS_FUNCTION, SymbolType::Function),
    (&TS_CLASS, SymbolType::Class),
    (&TS_INTERFACE, SymbolType::Interface),
    (&TS_TYPE, SymbolType::Type),
    (&TS_ARROW_FN, SymbolType::Function),
    (&TS_CONST, SymbolType::Constant),
];

symbol_regex!(PY_FUNCTION, r"^(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)");
symbol_regex!(PY_METHOD, r"^\s+(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)");
symbol_regex!(PY_CLASS, r"^class\s+([A-Za-z_][A-Za-z0-9_]*)");

static PY_PATTERNS: Patterns = &[
    (&PY_FUNCTION, SymbolType::Function),
    (&PY_METHOD, SymbolType::Method),
    (&PY_CLASS, SymbolType::Class),
];

symbol_regex!(
    GO_METHOD,
    r"^func\s+\(\s*[A-Za-z_][A-Za-z0-9_]*\s+\*?[A-Za-z_][A-Za-z0-9_.]*\s*\)\s+([A-Za-z_][A-Za-z0-9_]*)"
);
symbol_regex!(GO_FUNCTION, r"^func\s+([A-Za-z_][A-Za-z0-9_]*)");
symbol_regex!(GO_STRUCT, r"^type\s+([A-Za-z_][A-Za-z0-9_]*)\s+struct");
symbol_regex!(GO_INTERFACE, r"^type\s+([A-Za-z_][A-Za-z0-9_]*)\s+interface");
symbol_regex!(GO_TYPE, r"^type\s+([A-Za-z_][A-Za-z0-9_]*)");
symbol_regex!(GO_CONST, r"^const\s+([A-Za-z_][A-Za-z0-9_]*)");

static GO_PATTERNS: Patterns = &[
    (&GO_METHOD, SymbolType::Method),
    (&GO_FUNCTION, SymbolType::Function),
    (&GO_STRUCT, SymbolType::Class),
    (&GO_INTERFACE, SymbolType::Interface),
    (&GO_TYPE, SymbolType::Type),
    (&GO_CONST, SymbolType::Constant),
];

fn patterns_for(language: &str) -> Option<Patterns> {
    match language {
        "rust" => Some(RUST_PATTERNS),
        "typescript" | "javascript" => Some(TS_PATTERNS),
        "python" => Some(PY_PATTERNS),
        "go" => Some(GO_PATTERNS),
        _ => None,
    }
}

fn symbol_starts(language: &str, content: &str) -> Vec<SymbolStart> {
    let Some(patterns) = patterns_for(language) else {
        return Vec::new();
    };

    let mut starts = Vec::new();

    for (line_index, line) in content.lines().enumerate() {
        for (regex, symbol_type) in patterns {
            if let Some(captures) = regex.captures(line) {
                if let Some(name) = captures.get(1) {
                    starts.push(SymbolStart {
                        line: line_index,
                        name: name.as_str().to_string(),
                        symbol_type: *symbol_type,
                    });
                    break;
                }
            }
        }
    }

    starts
}
