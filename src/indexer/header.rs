// Index header
// Records the identities the index was built with; any mismatch at
// startup forces a full rebuild instead of serving stale state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use crate::embeddings::ProviderIdentity;
use crate::tokenizer::ModelFamily;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexHeader {
    pub schema_version: u32,
    pub tokenizer_family: String,
    pub embedding_identity: ProviderIdentity,
    pub workspace_root_hash: String,
}

impl IndexHeader {
    #[inline]
    pub fn current(
        tokenizer_family: ModelFamily,
        embedding_identity: ProviderIdentity,
        workspace_root: &Path,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            tokenizer_family: tokenizer_family.as_str().to_string(),
            embedding_identity,
            workspace_root_hash: workspace_root_hash(workspace_root),
        }
    }

    #[inline]
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read index header: {}", path.display()))?;
        let header = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse index header: {}", path.display()))?;

        Ok(Some(header))
    }

    #[inline]
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create header directory: {}", parent.display())
            })?;
        }

        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize index header")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write index header: {}", path.display()))?;

        Ok(())
    }

    /// Whether an existing index built under `self` can serve a session
    /// running under `current`. Provider versions compare loosely when
    /// either side could not resolve one.
    #[inline]
    pub fn is_compatible_with(&self, current: &Self) -> bool {
        if self.schema_version != current.schema_version
            || self.tokenizer_family != current.tokenizer_family
            || self.workspace_root_hash != current.workspace_root_hash
        {
            return false;
        }

        let a = &self.embedding_identity;
        let b = &current.embedding_identity;
        if a.model != b.model || a.dimension != b.dimension {
            return false;
        }

        a.version == b.version || a.version == "unknown" || b.version == "unknown"
    }
}

/// Stable hash of the workspace root path, so one base directory cannot
/// silently serve a different workspace.
pub fn workspace_root_hash(root: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(root.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
