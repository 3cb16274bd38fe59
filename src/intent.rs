//! Intent Classifier: a two-tier hybrid of a fast rule tier and an LLM
//! fallback tier (§4.1), grounded in the same compiled-regex,
//! first-match-wins style used elsewhere in this codebase for
//! query-shape classification.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use crate::llm::{ChatMessage, CompletionRequest, LLMClient};
use crate::query::Query;

/// The closed intent set, matching the Token Budget Calculator's
/// per-intent base table (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    QuickAnswer,
    Explanation,
    Analysis,
    Comparison,
    Procedural,
    Calculation,
}

impl Intent {
    pub fn label(&self) -> &'static str {
        match self {
            Intent::QuickAnswer => "quick_answer",
            Intent::Explanation => "explanation",
            Intent::Analysis => "analysis",
            Intent::Comparison => "comparison",
            Intent::Procedural => "procedural",
            Intent::Calculation => "calculation",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "quick_answer" => Some(Intent::QuickAnswer),
            "explanation" => Some(Intent::Explanation),
            "analysis" => Some(Intent::Analysis),
            "comparison" => Some(Intent::Comparison),
            "procedural" => Some(Intent::Procedural),
            "calculation" => Some(Intent::Calculation),
            _ => None,
        }
    }
}

/// Which tier produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationPath {
    Rule,
    Llm,
}

#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f64,
    pub path: ClassificationPath,
}

/// Minimum rule-tier confidence required to accept a match without
/// falling through to the LLM tier (§4.1).
const RULE_CONFIDENCE_THRESHOLD: f64 = 0.7;

struct RulePatterns {
    calculation: Regex,
    comparison: Regex,
    procedural: Regex,
    analysis: Regex,
    explanation: Regex,
    quick_answer: Regex,
}

static PATTERNS: LazyLock<RulePatterns> = LazyLock::new(|| RulePatterns {
    calculation: Regex::new(r"(?i)wie\s+(viel|hoch)|kosten|gebühr|berechn|preis").unwrap(),
    comparison: Regex::new(r"(?i)unterschied|vergleich|besser|versus|gegenüber|im\s+vergleich")
        .unwrap(),
    procedural: Regex::new(
        r"(?i)wie\s+(beantrage|melde|stelle)|antragsverfahren|schritte|ablauf|vorgehen",
    )
    .unwrap(),
    analysis: Regex::new(r"(?i)warum|analysiere|auswirkung|bewert|einschätz|risiko").unwrap(),
    explanation: Regex::new(r"(?i)was\s+(ist|sind|bedeutet)|erkläre|erklärung|definition").unwrap(),
    quick_answer: Regex::new(r"^.{0,40}$").unwrap(),
});

/// Rule-tier classification. Cannot fail — the last rule (a length
/// predicate) always matches, yielding `quick_answer` at a modest
/// confidence if nothing more specific fired.
fn classify_rule_tier(query: &Query) -> Classification {
    let text = &query.text;
    let candidates: &[(&Regex, Intent, f64)] = &[
        (&PATTERNS.calculation, Intent::Calculation, 0.85),
        (&PATTERNS.comparison, Intent::Comparison, 0.85),
        (&PATTERNS.procedural, Intent::Procedural, 0.8),
        (&PATTERNS.analysis, Intent::Analysis, 0.75),
        (&PATTERNS.explanation, Intent::Explanation, 0.75),
        (&PATTERNS.quick_answer, Intent::QuickAnswer, 0.7),
    ];

    for (pattern, intent, confidence) in candidates {
        if pattern.is_match(text) && *confidence >= RULE_CONFIDENCE_THRESHOLD {
            return Classification {
                intent: *intent,
                confidence: *confidence,
                path: ClassificationPath::Rule,
            };
        }
    }

    Classification {
        intent: Intent::Explanation,
        confidence: 0.5,
        path: ClassificationPath::Rule,
    }
}

const LLM_SYSTEM_PROMPT: &str = "Classify the user's query into exactly one of: quick_answer, \
explanation, analysis, comparison, procedural, calculation. Respond with only the label and a \
confidence between 0 and 1, separated by a space, e.g. `procedural 0.9`.";

fn parse_llm_label(raw: &str) -> Option<(Intent, f64)> {
    let mut parts = raw.trim().split_whitespace();
    let label = parts.next()?;
    let intent = Intent::from_label(label)?;
    let confidence = parts
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);
    Some((intent, confidence))
}

/// Two-tier classifier. Rule tier always succeeds; the LLM tier is
/// invoked only when the rule tier's match falls below the confidence
/// threshold above, and its own failure degrades to a fixed fallback
/// rather than propagating an error (§4.1).
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, query: &Query) -> Classification;
}

pub struct HybridIntentClassifier<C: LLMClient> {
    llm_client: C,
    model: Option<String>,
}

impl<C: LLMClient> HybridIntentClassifier<C> {
    pub fn new(llm_client: C) -> Self {
        Self {
            llm_client,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[async_trait]
impl<C: LLMClient> IntentClassifier for HybridIntentClassifier<C> {
    async fn classify(&self, query: &Query) -> Classification {
        let rule_result = classify_rule_tier(query);
        if rule_result.confidence >= RULE_CONFIDENCE_THRESHOLD {
            return rule_result;
        }

        let mut request = CompletionRequest::new()
            .with_system(LLM_SYSTEM_PROMPT)
            .with_message(ChatMessage::user(query.text.clone()))
            .with_temperature(0.0)
            .with_max_tokens(16);
        if let Some(model) = &self.model {
            request = request.with_model(model);
        }

        match self.llm_client.complete(request).await {
            Ok(response) => match parse_llm_label(&response.content) {
                Some((intent, confidence)) => Classification {
                    intent,
                    confidence,
                    path: ClassificationPath::Llm,
                },
                None => Classification {
                    intent: Intent::QuickAnswer,
                    confidence: 0.0,
                    path: ClassificationPath::Llm,
                },
            },
            Err(_) => Classification {
                intent: Intent::QuickAnswer,
                confidence: 0.0,
                path: ClassificationPath::Llm,
            },
        }
    }
}

/// A classifier that never calls out to an LLM, for tests and for
/// deployments with `hypothesis.enabled = false`-style minimal modes.
pub struct RuleOnlyIntentClassifier;

#[async_trait]
impl IntentClassifier for RuleOnlyIntentClassifier {
    async fn classify(&self, query: &Query) -> Classification {
        classify_rule_tier(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calculation_query_is_classified_by_rule_tier() {
        let q = Query::new("Wie viel kostet ein Bauantrag?");
        let result = classify_rule_tier(&q);
        assert_eq!(result.intent, Intent::Calculation);
        assert_eq!(result.path, ClassificationPath::Rule);
        assert!(result.confidence >= RULE_CONFIDENCE_THRESHOLD);
    }

    #[test]
    fn procedural_query_is_classified_by_rule_tier() {
        let q = Query::new("Wie beantrage ich einen Bauantrag für ein Einfamilienhaus?");
        let result = classify_rule_tier(&q);
        assert_eq!(result.intent, Intent::Procedural);
    }

    #[test]
    fn comparison_query_is_classified_by_rule_tier() {
        let q = Query::new("Was ist der Unterschied zwischen Bauantrag und Bauanzeige?");
        let result = classify_rule_tier(&q);
        assert_eq!(result.intent, Intent::Comparison);
    }

    #[test]
    fn short_query_falls_back_to_quick_answer() {
        let q = Query::new("Hallo");
        let result = classify_rule_tier(&q);
        assert_eq!(result.intent, Intent::QuickAnswer);
    }

    #[test]
    fn rule_tier_never_fails() {
        let q = Query::new("");
        let result = classify_rule_tier(&q);
        assert!(result.confidence > 0.0);
    }

    #[test]
    fn parse_llm_label_handles_well_formed_response() {
        assert_eq!(
            parse_llm_label("procedural 0.9"),
            Some((Intent::Procedural, 0.9))
        );
    }

    #[test]
    fn parse_llm_label_rejects_unknown_label() {
        assert_eq!(parse_llm_label("bogus 0.9"), None);
    }

    #[tokio::test]
    async fn rule_only_classifier_is_deterministic() {
        let classifier = RuleOnlyIntentClassifier;
        let q = Query::new("Wie viel kostet ein Bauantrag?");
        let result = classifier.classify(&q).await;
        assert_eq!(result.intent, Intent::Calculation);
    }
}
