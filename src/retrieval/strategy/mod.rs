
use super::RetrievalMethod;
use super::intent::Intent;

/// An ordered set of retrieval methods with per-method weights.
///
/// Weights live in a fixed-shape array indexed by
/// [`RetrievalMethod::index`]; methods not in play carry weight zero.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalStrategy {
    pub methods: &'static [RetrievalMethod],
    pub weights: [f64; 4],
}

impl RetrievalStrategy {
    #[inline]
    pub fn weight(&self, method: RetrievalMethod) -> f64 {
        self.weights[method.index()]
    }
}

use RetrievalMethod::{Dependency, Lexical, RecentEdits, Semantic};

/// Map an intent to its retrieval strategy. The table is normative:
/// weights sum to at most 1.0 and the method order is the order methods
/// are reported in `retrieval_methods`.
pub fn strategy_for(intent: Intent) -> RetrievalStrategy {
    match intent {
        Intent::Explain => RetrievalStrategy {
            methods: &[Semantic, Lexical, Dependency],
            weights: weights(0.6, 0.3, 0.1, 0.0),
        },
        Intent::BugFix => RetrievalStrategy {
            methods: &[RecentEdits, Semantic, Dependency, Lexical],
            weights: weights(0.3, 0.1, 0.2, 0.4),
        },
        Intent::Refactor => RetrievalStrategy {
            methods: &[Dependency, Semantic, Lexical],
            weights: weights(0.4, 0.1, 0.5, 0.0),
        },
        Intent::Generate => RetrievalStrategy {
            methods: &[Semantic, Lexical, Dependency],
            weights: weights(0.6, 0.3, 0.1, 0.0),
        },
        Intent::Test => RetrievalStrategy {
            methods: &[Dependency, Semantic, Lexical],
            weights: weights(0.4, 0.2, 0.4, 0.0),
        },
    }
}

/// Build the weight array in `(semantic, lexical, dependency,
/// recent_edits)` order.
const fn weights(semantic: f64, lexical: f64, dependency: f64, recent_edits: f64) -> [f64; 4] {
    [semantic, lexical, dependency, recent_edits]
}
