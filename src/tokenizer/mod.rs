// Token counting module
// Budget math must match what the downstream model will charge, so counts
// come from a real BPE table; the word-based estimator is a degraded
// fallback only.


use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Mutex;
use tiktoken_rs::CoreBPE;
use tracing::warn;

const CACHE_SHARDS: usize = 16;

/// BPE table selector. Maps a model family to its encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// cl100k_base (gpt-3.5 / gpt-4 era models)
    #[default]
    Cl100k,
    /// o200k_base (gpt-4o era models)
    O200k,
}

impl ModelFamily {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            ModelFamily::Cl100k => "cl100k",
            ModelFamily::O200k => "o200k",
        }
    }
}

impl std::fmt::Display for ModelFamily {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Model-faithful token counter with a sharded memoization cache.
///
/// Counting is total: construction failures degrade to a heuristic
/// estimator instead of erroring, and `degraded()` reports that state so
/// callers can surface it.
pub struct TokenCounter {
    family: ModelFamily,
    bpe: Option<CoreBPE>,
    shards: Vec<Mutex<HashMap<u64, u32>>>,
}

impl TokenCounter {
    #[inline]
    pub fn new(family: ModelFamily) -> Self {
        let bpe = match family {
            ModelFamily::Cl100k => tiktoken_rs::cl100k_base(),
            ModelFamily::O200k => tiktoken_rs::o200k_base(),
        };

        let bpe = match bpe {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                warn!(
                    "Failed to load {} BPE table, degrading to estimator: {}",
                    family, e
                );
                None
            }
        };

        let shards = (0..CACHE_SHARDS)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();

        Self {
            family,
            bpe,
            shards,
        }
    }

    #[inline]
    pub fn family(&self) -> ModelFamily {
        self.family
    }

    /// True when the real BPE table could not be loaded and counts come
    /// from the estimator.
    #[inline]
    pub fn degraded(&self) -> bool {
        self.bpe.is_none()
    }

    /// Count tokens for a single string.
    #[inline]
    pub fn count(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }

        let key = text_hash(self.family, text);
        let shard = &self.shards[(key as usize) % CACHE_SHARDS];

        {
            let cache = shard.lock().expect("tokenizer cache lock poisoned");
            if let Some(cached) = cache.get(&key) {
                return *cached;
            }
        }

        let count = self.count_uncached(text);

        shard
            .lock()
            .expect("tokenizer cache lock poisoned")
            .insert(key, count);
        count
    }

    /// Count tokens across a batch of strings.
    #[inline]
    pub fn count_batch<S: AsRef<str>>(&self, texts: &[S]) -> u32 {
        texts.iter().map(|t| self.count(t.as_ref())).sum()
    }

    fn count_uncached(&self, text: &str) -> u32 {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len() as u32,
            None => estimate_token_count(text) as u32,
        }
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("family", &self.family)
            .field("degraded", &self.degraded())
            .finish()
    }
}

fn text_hash(family: ModelFamily, text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    family.as_str().hash(&mut hasher);
    text.hash(&mut hasher);
    hasher.finish()
}

/// Estimate token count using a simple heuristic.
/// This is a rough approximation used only when no BPE table is available.
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words for English-like text, with
    // extra tokens for punctuation density.
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}
