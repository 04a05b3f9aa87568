
use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::IndexingConfig;

const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// A workspace file that passed the inclusion policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub absolute: PathBuf,
    /// Workspace-relative, forward-slash-normalized path.
    pub relative: String,
    pub language: String,
    pub size: u64,
    /// Filesystem mtime in milliseconds since the epoch.
    pub modified_ms: i64,
}

/// Walks the workspace root and applies the inclusion policy: text-like
/// files only, excluding vendored/build directories, oversized files,
/// binary files, and large files of unknown language.
#[derive(Debug, Clone)]
pub struct WorkspaceScanner {
    root: PathBuf,
    config: IndexingConfig,
    exclude_globs: GlobSet,
}

impl WorkspaceScanner {
    #[inline]
    pub fn new(root: &Path, config: &IndexingConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.exclude_globs {
            let glob = Glob::new(pattern)
                .with_context(|| format!("Invalid exclude glob: {pattern}"))?;
            builder.add(glob);
        }
        let exclude_globs = builder.build().context("Failed to build exclude globs")?;

        Ok(Self {
            root: root.to_path_buf(),
            config: config.clone(),
            exclude_globs,
        })
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan the workspace. Results are sorted by relative path so a full
    /// reindex visits files in a deterministic order.
    #[inline]
    pub fn scan(&self) -> Vec<ScannedFile> {
        let mut files = Vec::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !self.is_excluded_dir(entry.path()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable path during scan: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            if let Some(file) = self.check_file(entry.path()) {
                files.push(file);
            }
        }

        files.sort_by(|a, b| a.relative.cmp(&b.relative));
        debug!("Workspace scan found {} indexable files", files.len());
        files
    }

    /// Apply the inclusion policy to a single file. Returns `None` when
    /// the file is excluded or unreadable.
    #[inline]
    pub fn check_file(&self, absolute: &Path) -> Option<ScannedFile> {
        let relative = self.relative_path(absolute)?;

        if self.exclude_globs.is_match(&relative) {
            return None;
        }

        let metadata = fs::metadata(absolute).ok()?;
        if !metadata.is_file() {
            return None;
        }

        let size = metadata.len();
        if size > self.config.max_file_bytes {
            return None;
        }

        let language = language_for_path(absolute);
        if language.is_none() && size > self.config.max_unknown_language_bytes {
            return None;
        }

        if is_probably_binary(absolute).unwrap_or(true) {
            return None;
        }

        let modified_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        Some(ScannedFile {
            absolute: absolute.to_path_buf(),
            relative,
            language: language.unwrap_or("text").to_string(),
            size,
            modified_ms,
        })
    }

    /// Forward-slash-normalized path relative to the workspace root.
    #[inline]
    pub fn relative_path(&self, absolute: &Path) -> Option<String> {
        let relative = absolute.strip_prefix(&self.root).ok()?;
        let mut parts = Vec::new();
        for component in relative.components() {
            parts.push(component.as_os_str().to_str()?.to_string());
        }
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("/"))
    }

    #[inline]
    pub fn absolute_path(&self, relative: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in relative.split('/') {
            path.push(part);
        }
        path
    }

    fn is_excluded_dir(&self, path: &Path) -> bool {
        if path == self.root {
            return false;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };

        path.is_dir() && self.config.excluded_dirs.iter().any(|d| d == name)
    }
}

/// Null-byte heuristic over the first 8 KiB.
fn is_probably_binary(path: &Path) -> Result<bool> {
    let mut file = fs::File::open(path)?;
    let mut buffer = [0u8; BINARY_SNIFF_BYTES];
    let read = file.read(&mut buffer)?;

    Ok(buffer[..read].contains(&0))
}

/// Map a file extension to its lowercase language identifier. `None`
/// means the language is unknown (the file may still index as plain text
/// if it is small enough).
pub fn language_for_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_lowercase();

    match extension.as_str() {
        "rs" => Some("rust"),
        "ts" | "tsx" | "mts" => Some("typescript"),
        "js" | "jsx" | "mjs" | "cjs" => Some("javascript"),
        "py" | "pyi" => Some("python"),
        "go" => Some("go"),
        "java" => Some("java"),
        "rb" => Some("ruby"),
        "c" | "h" => Some("c"),
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => Some("cpp"),
        "cs" => Some("csharp"),
        "php" => Some("php"),
        "swift" => Some("swift"),
        "kt" | "kts" => Some("kotlin"),
        "md" | "markdown" => Some("markdown"),
        "json" => Some("json"),
        "yaml" | "yml" => Some("yaml"),
        "toml" => Some("toml"),
        "html" | "htm" => Some("html"),
        "css" | "scss" | "less" => Some("css"),
        "sh" | "bash" => Some("shell"),
        "sql" => Some("sql"),
        "txt" => Some("text"),
        _ => None,
    }
}
