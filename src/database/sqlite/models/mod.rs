
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, Type};

/// Kind of symbol a chunk covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SymbolType {
    File,
    Module,
    Class,
    Function,
    Method,
    Interface,
    Type,
    Constant,
    Block,
}

impl SymbolType {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            SymbolType::File => "file",
            SymbolType::Module => "module",
            SymbolType::Class => "class",
            SymbolType::Function => "function",
            SymbolType::Method => "method",
            SymbolType::Interface => "interface",
            SymbolType::Type => "type",
            SymbolType::Constant => "constant",
            SymbolType::Block => "block",
        }
    }
}

impl std::fmt::Display for SymbolType {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The atomic unit of indexed code: one symbol span (or fallback window)
/// of one workspace file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChunkRecord {
    /// Identity hash over `(file_path, line_range, content_hash)`. Two
    /// chunks with the same id are interchangeable.
    pub chunk_id: String,
    /// Workspace-relative, forward-slash-normalized path.
    pub file_path: String,
    /// 1-based inclusive start line; NULL only for whole-file entries.
    pub line_start: Option<i64>,
    /// 1-based inclusive end line; NULL only for whole-file entries.
    pub line_end: Option<i64>,
    pub language: String,
    pub symbol_name: Option<String>,
    pub symbol_type: Option<SymbolType>,
    /// Milliseconds since the Unix epoch.
    pub last_modified: i64,
    pub content_hash: String,
    pub content: String,
}

impl ChunkRecord {
    /// Build a chunk, deriving `content_hash` and `chunk_id` from the
    /// identity fields.
    #[inline]
    pub fn new(
        file_path: impl Into<String>,
        line_range: Option<(u32, u32)>,
        language: impl Into<String>,
        symbol_name: Option<String>,
        symbol_type: Option<SymbolType>,
        last_modified: i64,
        content: impl Into<String>,
    ) -> Self {
        let file_path = file_path.into();
        let content = content.into();
        let content_hash = content_hash_hex(&content);
        let chunk_id = compute_chunk_id(&file_path, line_range, &content_hash);

        Self {
            chunk_id,
            file_path,
            line_start: line_range.map(|(s, _)| s as i64),
            line_end: line_range.map(|(_, e)| e as i64),
            language: language.into(),
            symbol_name,
            symbol_type,
            last_modified,
            content_hash,
            content,
        }
    }

    #[inline]
    pub fn line_range(&self) -> Option<(u32, u32)> {
        match (self.line_start, self.line_end) {
            (Some(start), Some(end)) => Some((start as u32, end as u32)),
            _ => None,
        }
    }

    /// Start line used for deterministic tie-breaking; whole-file chunks
    /// sort first.
    #[inline]
    pub fn tie_break_line(&self) -> i64 {
        self.line_start.unwrap_or(0)
    }

    /// Whether the containing file is a test file (`.test.`, `.spec.`, or
    /// a `__tests__` path segment).
    #[inline]
    pub fn is_test_file(&self) -> bool {
        self.file_path.contains(".test.")
            || self.file_path.contains(".spec.")
            || self
                .file_path
                .split('/')
                .any(|segment| segment == "__tests__")
    }
}

/// A dependency edge from a source chunk to a symbol name it references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DepEdge {
    pub src_chunk_id: String,
    pub dst_symbol_name: String,
    pub kind: DepKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DepKind {
    Import,
    Call,
}

impl std::fmt::Display for DepKind {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            DepKind::Import => write!(f, "import"),
            DepKind::Call => write!(f, "call"),
        }
    }
}

/// Aggregate counts reported by the `status` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub chunk_count: i64,
    pub file_count: i64,
    pub dep_count: i64,
}

/// Hex SHA-256 digest of chunk content.
#[inline]
pub fn content_hash_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Chunk identity: SHA-256 over `(file_path, line_range, content_hash)`.
#[inline]
pub fn compute_chunk_id(
    file_path: &str,
    line_range: Option<(u32, u32)>,
    content_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(b":");
    match line_range {
        Some((start, end)) => hasher.update(format!("{start}-{end}").as_bytes()),
        None => hasher.update(b"*"),
    }
    hasher.update(b":");
    hasher.update(content_hash.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
