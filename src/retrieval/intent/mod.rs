
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Task category inferred from the user's request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Explain,
    BugFix,
    Refactor,
    Generate,
    Test,
}

impl Intent {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Explain => "explain",
            Intent::BugFix => "bug_fix",
            Intent::Refactor => "refactor",
            Intent::Generate => "generate",
            Intent::Test => "test",
        }
    }
}

impl std::fmt::Display for Intent {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The classifier falls back to `explain` below this confidence.
pub const MIN_CONFIDENCE: f64 = 0.3;

static BUG_FIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(fix|bug|broken|crash|crashes|error|errors|fail|fails|failing|failed|failure|exception|panic|panics|traceback|regression|wrong|incorrect)\b",
    )
    .expect("pattern is valid")
});
static TEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\b(write|add|create|generate|improve|more)\b.*\btests?\b|\bunit tests?\b|\btest coverage\b|\btest cases?\b|\btests? for\b)",
    )
    .expect("pattern is valid")
});
static REFACTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(refactor|rename|restructure|reorganize|extract|simplify|clean\s?up|decouple|split up|deduplicate|inline)\b",
    )
    .expect("pattern is valid")
});
static GENERATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(write|add|create|implement|generate|build|scaffold|new)\b")
        .expect("pattern is valid")
});
static EXPLAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(explain|how|what|why|where|when|who|understand|describe|overview|summarize|walk)\b",
    )
    .expect("pattern is valid")
});

/// Rule-based intent classifier. Patterns are evaluated in a fixed
/// priority order, so classification is deterministic and side-effect
/// free.
pub struct IntentClassifier;

impl IntentClassifier {
    /// Classify a request. Returns the matched intent with its
    /// confidence, or `(Explain, 0.3)` when nothing matches.
    #[inline]
    pub fn classify(text: &str) -> (Intent, f64) {
        // Priority order matters: "why does test_login fail" is a bug
        // fix, not a test request; "write tests for login" is a test
        // request, not generation.
        if BUG_FIX.is_match(text) {
            return (Intent::BugFix, 0.9);
        }
        if TEST.is_match(text) {
            return (Intent::Test, 0.85);
        }
        if REFACTOR.is_match(text) {
            return (Intent::Refactor, 0.85);
        }
        if GENERATE.is_match(text) {
            return (Intent::Generate, 0.8);
        }
        if EXPLAIN.is_match(text) {
            return (Intent::Explain, 0.7);
        }

        (Intent::Explain, MIN_CONFIDENCE)
    }
}
