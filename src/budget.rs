//! Token Budget Calculator: a deterministic pure function mapping
//! (intent, complexity, agent count, chunk count) to a clamped token
//! allocation (§4.2). Grounded in the same "breakdown fields feed a
//! derived total" shape used by the cost/usage bookkeeping types
//! elsewhere in this codebase's LLM boundary.

use crate::config::ModelConfig;
use crate::hypothesis::Hypothesis;
use crate::intent::Intent;
use crate::query::Query;

/// The minimum allocation the calculator ever returns (§3 invariant).
pub const MIN_BUDGET: u32 = 250;

fn base_for_intent(intent: Intent) -> u32 {
    match intent {
        Intent::QuickAnswer => 250,
        Intent::Explanation => 900,
        Intent::Analysis => 1500,
        Intent::Comparison => 1200,
        Intent::Procedural => 1100,
        Intent::Calculation => 700,
    }
}

/// Per-intent ceiling, independent of the model's context window. Set
/// to four times the intent's base (floor 2000) — the spec names the
/// concept but not the multiplier, so this is a recorded decision
/// (see DESIGN.md) rather than a literal requirement.
fn ceiling_for_intent(intent: Intent) -> u32 {
    (base_for_intent(intent) * 4).max(2000)
}

/// A 0-10 complexity score derived from query length, a rough entity
/// count, clause depth, and the hypothesis's suggested step count.
pub fn complexity_score(query: &Query, hypothesis: &Hypothesis) -> u8 {
    let length_points = match query.text.chars().count() {
        0..=40 => 0,
        41..=100 => 1,
        101..=200 => 2,
        _ => 3,
    };

    let entity_points = (query
        .text
        .split_whitespace()
        .filter(|w| w.chars().next().is_some_and(char::is_uppercase))
        .count()
        / 2)
    .min(3) as u8;

    let clause_depth = query.text.matches([',', ';']).count()
        + query
            .text
            .to_lowercase()
            .matches(" und ")
            .count()
        + query.text.to_lowercase().matches(" oder ").count();
    let clause_points = clause_depth.min(2) as u8;

    let steps_points = (hypothesis.suggested_steps.len() / 2).min(2) as u8;

    (length_points + entity_points + clause_points + steps_points).min(10)
}

/// Budget breakdown; all fields except `allocated` are informational
/// (§3). Re-deriving `allocated` from the other fields is the only
/// supported way to change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub allocated: u32,
    pub base: u32,
    pub intent_boost: u32,
    pub complexity_boost: u32,
    pub agent_boost: u32,
    pub chunk_boost: u32,
    pub domain_boost: u32,
    pub ceiling: u32,
    pub model_context: u32,
    /// Set when the inputs were malformed and a conservative minimum
    /// was substituted (§4.2 failure semantics).
    pub degraded: bool,
}

/// Deterministic, side-effect-free budget computation. Never fails:
/// malformed inputs (e.g. a model context window too small to fit the
/// reserved prompt) collapse to the conservative minimum with
/// `degraded = true` rather than propagating an error.
pub fn compute(
    query: &Query,
    hypothesis: &Hypothesis,
    intent: Intent,
    agent_count: usize,
    chunk_count: usize,
    model: &ModelConfig,
) -> TokenBudget {
    let base = base_for_intent(intent);
    let ceiling = ceiling_for_intent(intent);
    let reserved_prompt = model.reserved_prompt_tokens();

    let usable_context = model.context_window.saturating_sub(reserved_prompt);
    if usable_context < MIN_BUDGET {
        return TokenBudget {
            allocated: MIN_BUDGET,
            base,
            intent_boost: 0,
            complexity_boost: 0,
            agent_boost: 0,
            chunk_boost: 0,
            domain_boost: 0,
            ceiling,
            model_context: model.context_window,
            degraded: true,
        };
    }

    let agent_boost = 150 * (agent_count.min(6) as u32);
    let chunk_boost = 60 * (chunk_count.min(20) as u32);
    let domain_boost = if query.mentions_domain_keywords() {
        400
    } else {
        0
    };
    let complexity = complexity_score(query, hypothesis);
    let complexity_boost = if complexity >= 8 { 300 } else { 0 };

    let unclamped = base + agent_boost + chunk_boost + domain_boost + complexity_boost;
    let upper_bound = ceiling.min(usable_context);
    let allocated = unclamped.clamp(MIN_BUDGET, upper_bound);

    TokenBudget {
        allocated,
        base,
        intent_boost: 0,
        complexity_boost,
        agent_boost,
        chunk_boost,
        domain_boost,
        ceiling,
        model_context: model.context_window,
        degraded: false,
    }
}
