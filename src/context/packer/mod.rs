
use tracing::debug;

use crate::retrieval::Candidate;
use crate::tokenizer::TokenCounter;
use crate::{EngineError, Result};

/// Separator emitted between packed items.
pub const ITEM_SEPARATOR: &str = "\n\n---\n\n";

/// Marker appended to a truncated excerpt.
pub const TRUNCATION_MARKER: &str = "\n\n[... truncated ...]";

/// Truncation is only attempted when at least this many tokens remain;
/// below it the candidate is discarded outright.
pub const MIN_REMAINING_FOR_TRUNCATION: u32 = 100;

/// Rough bytes-per-token ratio used for the initial truncation cut.
const CHARS_PER_TOKEN: usize = 4;

/// The packed output unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextItem {
    /// File path of the underlying chunk.
    pub name: String,
    /// Informational score and method annotation.
    pub description: String,
    /// Formatted block: path header, optional line-range header, excerpt.
    pub content: String,
}

/// Packed context plus its tokenizer-measured size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedContext {
    pub items: Vec<ContextItem>,
    pub tokens_used: u32,
}

/// Pack ranked candidates into formatted context items under a hard
/// token bound.
///
/// Candidates are taken in order. One that does not fit whole is
/// truncated (when enough budget remains) and packing stops; otherwise
/// it is discarded and packing stops. The re-measured total never
/// exceeds `context_budget`.
pub fn pack(
    candidates: &[Candidate],
    context_budget: u32,
    tokenizer: &TokenCounter,
) -> Result<PackedContext> {
    let separator_tokens = tokenizer.count(ITEM_SEPARATOR);
    let marker_tokens = tokenizer.count(TRUNCATION_MARKER);

    let mut items: Vec<ContextItem> = Vec::new();
    let mut tokens_used: u32 = 0;

    for candidate in candidates {
        let remaining = context_budget.saturating_sub(tokens_used);
        if remaining == 0 {
            break;
        }

        let name = candidate.chunk.file_path.clone();
        let description = format!(
            "score {:.3} via {}",
            candidate.score, candidate.method
        );
        let header = format_header(candidate);

        let fixed_tokens =
            tokenizer.count(&name) + tokenizer.count(&description) + separator_tokens;

        let full_content = format!("{header}{}", candidate.chunk.content);
        let full_tokens = fixed_tokens + tokenizer.count(&full_content);

        if full_tokens <= remaining {
            items.push(ContextItem {
                name,
                description,
                content: full_content,
            });
            tokens_used += full_tokens;
            continue;
        }

        if remaining > MIN_REMAINING_FOR_TRUNCATION {
            let overhead = fixed_tokens + tokenizer.count(&header) + marker_tokens;
            if let Some(content_budget) = remaining.checked_sub(overhead).filter(|b| *b > 0) {
                let truncated = truncate_to_fit(
                    &candidate.chunk.content,
                    content_budget,
                    remaining.saturating_sub(fixed_tokens),
                    &header,
                    tokenizer,
                );

                if let Some(content) = truncated {
                    let item_tokens = fixed_tokens + tokenizer.count(&content);
                    items.push(ContextItem {
                        name,
                        description,
                        content,
                    });
                    tokens_used += item_tokens;
                }
            }
        }

        // Whether truncated or discarded, nothing further fits.
        break;
    }

    // Re-measure the final artifact against the tokenizer; the hard
    // bound is an invariant, not a best-effort target.
    let measured = measure(&items, separator_tokens, tokenizer);
    if measured > context_budget {
        return Err(EngineError::PackingInvariantViolated(format!(
            "packed {measured} tokens into a {context_budget}-token context section"
        )));
    }

    debug!(
        "Packed {} items into {} of {} context tokens",
        items.len(),
        measured,
        context_budget
    );

    Ok(PackedContext {
        items,
        tokens_used: measured,
    })
}

/// Header block: path line plus the line range when present.
fn format_header(candidate: &Candidate) -> String {
    match candidate.chunk.line_range() {
        Some((start, end)) => format!(
            "File: {}\nLines {}-{}\n",
            candidate.chunk.file_path, start, end
        ),
        None => format!("File: {}\n", candidate.chunk.file_path),
    }
}

/// Truncate an excerpt to roughly `content_budget` tokens and append the
/// truncation marker. The initial cut is `content_budget · 4` characters;
/// the result is shrunk further until the measured block fits
/// `block_budget` tokens. Returns `None` when even a minimal excerpt
/// cannot fit.
fn truncate_to_fit(
    content: &str,
    content_budget: u32,
    block_budget: u32,
    header: &str,
    tokenizer: &TokenCounter,
) -> Option<String> {
    let mut cut = char_floor(content, content_budget as usize * CHARS_PER_TOKEN);

    loop {
        let block = format!("{header}{}{TRUNCATION_MARKER}", &content[..cut]);
        if tokenizer.count(&block) <= block_budget {
            return Some(block);
        }

        if cut < 16 {
            return None;
        }
        cut = char_floor(content, cut * 9 / 10);
    }
}

/// Largest char boundary at or below `max_bytes`.
fn char_floor(content: &str, max_bytes: usize) -> usize {
    if max_bytes >= content.len() {
        return content.len();
    }

    let mut cut = max_bytes;
    while cut > 0 && !content.is_char_boundary(cut) {
        cut -= 1;
    }
    cut
}

fn measure(items: &[ContextItem], separator_tokens: u32, tokenizer: &TokenCounter) -> u32 {
    items
        .iter()
        .map(|item| {
            tokenizer.count(&item.name)
                + tokenizer.count(&item.description)
                + tokenizer.count(&item.content)
                + separator_tokens
        })
        .sum()
}
