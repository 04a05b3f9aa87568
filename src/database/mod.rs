// Database module
// Dual store: SQLite for chunk metadata, full-text search, and dependency
// edges; LanceDB for embedding vectors.

pub mod lancedb;
pub mod sqlite;
