
use crate::retrieval::intent::Intent;
use crate::{EngineError, Result};

/// Tokens reserved for the system prompt.
pub const SYSTEM_TOKENS: u32 = 50;
/// Safety margin held back from every budget.
pub const RESERVED_TOKENS: u32 = 10;
/// Context section floor.
pub const MIN_CONTEXT_TOKENS: u32 = 20;
/// Context section ceiling.
pub const MAX_CONTEXT_TOKENS: u32 = 8000;

/// Fixed-shape allocation of the total token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetAllocation {
    pub system: u32,
    pub context: u32,
    pub task: u32,
    pub input: u32,
    pub output: u32,
}

/// Partition `total_budget` across prompt sections according to intent.
///
/// Fails with `InvalidBudget` when the fixed costs leave no room for
/// retrieval.
pub fn allocate(total_budget: u32, input_tokens: u32, intent: Intent) -> Result<BudgetAllocation> {
    let fixed = SYSTEM_TOKENS + RESERVED_TOKENS + input_tokens;
    let Some(available) = total_budget.checked_sub(fixed).filter(|a| *a > 0) else {
        return Err(EngineError::InvalidBudget(format!(
            "budget of {total_budget} tokens cannot cover {fixed} fixed tokens \
             ({SYSTEM_TOKENS} system + {RESERVED_TOKENS} reserved + {input_tokens} input)"
        )));
    };

    let (context_pct, task_pct) = section_percentages(intent);

    let context = ((available as f64 * context_pct) as u32)
        .clamp(MIN_CONTEXT_TOKENS, MAX_CONTEXT_TOKENS);
    let task = (available as f64 * task_pct) as u32;

    let spent = SYSTEM_TOKENS + input_tokens + context + task + RESERVED_TOKENS;
    let output = total_budget.saturating_sub(spent);

    Ok(BudgetAllocation {
        system: SYSTEM_TOKENS,
        context,
        task,
        input: input_tokens,
        output,
    })
}

/// `(context %, task %)` by intent.
fn section_percentages(intent: Intent) -> (f64, f64) {
    match intent {
        Intent::Explain => (0.60, 0.05),
        Intent::BugFix => (0.50, 0.10),
        Intent::Refactor => (0.55, 0.10),
        Intent::Generate => (0.40, 0.10),
        Intent::Test => (0.50, 0.10),
    }
}
