//! Hypothesis Generator: a single LLM call producing a structured
//! pre-execution analysis of the query, with lenient parsing of the
//! model's JSON response and a structurally valid fallback on any
//! failure (§4.4).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

use crate::error::Result;
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};

/// The closed question-type taxonomy. Serialises to the spec's
/// `fact_retrieval` spelling rather than the data model's shorthand
/// `fact`, matching both the §3 entry and the §4.4/§8 usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    FactRetrieval,
    Comparison,
    Procedural,
    Calculation,
    Opinion,
    Timeline,
    Causal,
    Hypothetical,
}

impl QuestionType {
    const ALL: &'static [QuestionType] = &[
        QuestionType::FactRetrieval,
        QuestionType::Comparison,
        QuestionType::Procedural,
        QuestionType::Calculation,
        QuestionType::Opinion,
        QuestionType::Timeline,
        QuestionType::Causal,
        QuestionType::Hypothetical,
    ];

    fn label(&self) -> &'static str {
        match self {
            QuestionType::FactRetrieval => "fact_retrieval",
            QuestionType::Comparison => "comparison",
            QuestionType::Procedural => "procedural",
            QuestionType::Calculation => "calculation",
            QuestionType::Opinion => "opinion",
            QuestionType::Timeline => "timeline",
            QuestionType::Causal => "causal",
            QuestionType::Hypothetical => "hypothetical",
        }
    }

    /// Case-insensitive exact match, then substring match against the
    /// closed set, else the safe default `fact_retrieval` (§4.4).
    fn from_fuzzy(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        for candidate in Self::ALL {
            if candidate.label() == lower {
                return *candidate;
            }
        }
        for candidate in Self::ALL {
            if lower.contains(candidate.label()) || candidate.label().contains(lower.as_str()) {
                return *candidate;
            }
        }
        QuestionType::FactRetrieval
    }
}

/// Self-reported confidence in the hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
    Unknown,
}

impl Confidence {
    fn from_fuzzy(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            s if s.contains("high") => Confidence::High,
            s if s.contains("medium") || s.contains("med") => Confidence::Medium,
            s if s.contains("low") => Confidence::Low,
            _ => Confidence::Unknown,
        }
    }
}

/// Severity of a missing-information gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapSeverity {
    Critical,
    Important,
    Optional,
}

impl GapSeverity {
    fn from_fuzzy(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            s if s.contains("critical") => GapSeverity::Critical,
            s if s.contains("option") => GapSeverity::Optional,
            _ => GapSeverity::Important,
        }
    }
}

/// A single piece of information the query is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InformationGap {
    pub kind: String,
    pub severity: GapSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_query: Option<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

/// Structured pre-execution analysis of a query (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub question_type: QuestionType,
    pub primary_intent: String,
    pub confidence: Confidence,
    #[serde(default)]
    pub required_information: Vec<String>,
    #[serde(default)]
    pub information_gaps: Vec<InformationGap>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub suggested_steps: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Hypothesis {
    /// `requires_clarification ⇔ any gap.severity = critical` (§3).
    pub fn requires_clarification(&self) -> bool {
        self.information_gaps
            .iter()
            .any(|g| g.severity == GapSeverity::Critical)
    }

    /// Enforces `confidence=high ⇒ no critical gaps` by downgrading
    /// confidence rather than discarding gap information.
    fn enforce_invariants(mut self) -> Self {
        if self.confidence == Confidence::High && self.requires_clarification() {
            self.confidence = Confidence::Medium;
        }
        self
    }

    /// The fallback hypothesis returned on any parse or runtime
    /// failure (§4.4): `confidence = unknown`, `question_type =
    /// fact_retrieval`, empty gaps, raw query text as `primary_intent`.
    pub fn fallback(query_text: &str) -> Self {
        Self {
            question_type: QuestionType::FactRetrieval,
            primary_intent: query_text.to_string(),
            confidence: Confidence::Unknown,
            required_information: Vec::new(),
            information_gaps: Vec::new(),
            assumptions: Vec::new(),
            suggested_steps: Vec::new(),
            keywords: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Extracts a JSON payload from a raw LLM response, tolerating fenced
/// code blocks. Grounded in the same three-tier cascade used for
/// REPL-fallback extraction elsewhere in this codebase's LLM-facing
/// helpers: fenced ```json block, then generic fenced block, then a
/// raw `{...}` substring, else the response unchanged.
pub(crate) fn extract_json_block(response: &str) -> &str {
    if let Some(start) = response.find("```json") {
        let after = &response[start + "```json".len()..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = response.find("```") {
        let after = &response[start + "```".len()..];
        let after = match after.find('\n') {
            Some(nl) => &after[nl + 1..],
            None => after,
        };
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
        if end > start {
            return response[start..=end].trim();
        }
    }
    response.trim()
}

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("invalid regex"));

/// Strips trailing commas before a closing brace/bracket — a common
/// LLM JSON mistake that `serde_json` otherwise rejects outright.
fn strip_trailing_commas(input: &str) -> String {
    TRAILING_COMMA.replace_all(input, "$1").into_owned()
}

/// Best-effort single-quote-to-double-quote normalisation, only
/// applied once strict and trailing-comma-tolerant parsing have both
/// failed — most model output uses proper double quotes, so this is a
/// last resort rather than the common path.
fn normalize_single_quotes(input: &str) -> String {
    input.replace('\'', "\"")
}

/// Parses a raw LLM response into a `Value`, escalating through the
/// lenience cascade described in §4.4 before giving up.
fn lenient_parse(raw: &str) -> Option<Value> {
    let candidate = extract_json_block(raw);
    if let Ok(v) = serde_json::from_str(candidate) {
        return Some(v);
    }
    let destuttered = strip_trailing_commas(candidate);
    if let Ok(v) = serde_json::from_str(&destuttered) {
        return Some(v);
    }
    let requoted = normalize_single_quotes(&destuttered);
    serde_json::from_str(&requoted).ok()
}

fn string_array(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_information_gaps(value: &Value) -> Vec<InformationGap> {
    value
        .get("information_gaps")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|g| {
                    let kind = g.get("kind")?.as_str()?.to_string();
                    let severity = g
                        .get("severity")
                        .and_then(Value::as_str)
                        .map(GapSeverity::from_fuzzy)
                        .unwrap_or(GapSeverity::Important);
                    Some(InformationGap {
                        kind,
                        severity,
                        suggested_query: g
                            .get("suggested_query")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        examples: string_array(g, "examples"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parses a raw LLM response into a `Hypothesis`, falling back to
/// [`Hypothesis::fallback`] on any failure. Public so the Process
/// Executor's quality checks and tests can exercise parsing directly
/// without a live LLM call.
pub fn parse_hypothesis_response(query_text: &str, raw: &str) -> Hypothesis {
    let Some(value) = lenient_parse(raw) else {
        return Hypothesis::fallback(query_text);
    };

    let question_type = value
        .get("question_type")
        .and_then(Value::as_str)
        .map(QuestionType::from_fuzzy)
        .unwrap_or(QuestionType::FactRetrieval);

    let primary_intent = value
        .get("primary_intent")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| query_text.to_string());

    let confidence = value
        .get("confidence")
        .and_then(Value::as_str)
        .map(Confidence::from_fuzzy)
        .unwrap_or(Confidence::Unknown);

    Hypothesis {
        question_type,
        primary_intent,
        confidence,
        required_information: string_array(&value, "required_information"),
        information_gaps: parse_information_gaps(&value),
        assumptions: string_array(&value, "assumptions"),
        suggested_steps: string_array(&value, "suggested_steps"),
        keywords: string_array(&value, "keywords"),
        timestamp: Utc::now(),
    }
    .enforce_invariants()
}

const SYSTEM_PROMPT: &str = "You analyse a user query about German administrative law before \
any retrieval happens. Respond with a single JSON object with fields: question_type (one of \
fact_retrieval, comparison, procedural, calculation, opinion, timeline, causal, hypothetical), \
primary_intent (string), confidence (one of high, medium, low), required_information (array of \
strings), information_gaps (array of {kind, severity: critical|important|optional, \
suggested_query, examples}), assumptions (array of strings), suggested_steps (array of \
strings), keywords (array of strings). Emit JSON only.";

/// Generates a [`Hypothesis`] for a query, optionally informed by
/// already-gathered context snippets (used when re-generating after a
/// user clarification, per §3's "fresh instance, never mutated"
/// lifecycle rule).
#[async_trait]
pub trait HypothesisGenerator: Send + Sync {
    async fn generate(&self, query_text: &str, context_snippets: &[String]) -> Result<Hypothesis>;
}

/// The production generator: one low-temperature LLM call through any
/// [`LLMClient`], with lenient parsing and the mandated fallback.
pub struct LlmHypothesisGenerator<C: LLMClient> {
    client: C,
    model: Option<String>,
}

impl<C: LLMClient> LlmHypothesisGenerator<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[async_trait]
impl<C: LLMClient> HypothesisGenerator for LlmHypothesisGenerator<C> {
    async fn generate(&self, query_text: &str, context_snippets: &[String]) -> Result<Hypothesis> {
        let mut user_content = query_text.to_string();
        if !context_snippets.is_empty() {
            user_content.push_str("\n\nContext:\n");
            user_content.push_str(&context_snippets.join("\n---\n"));
        }

        let mut request = CompletionRequest::new()
            .with_system(SYSTEM_PROMPT)
            .with_message(ChatMessage::user(user_content))
            .with_temperature(0.0);
        if let Some(model) = &self.model {
            request = request.with_model(model);
        }

        match self.client.complete(request).await {
            Ok(response) => Ok(parse_hypothesis_response(query_text, &response.content)),
            Err(_) => Ok(Hypothesis::fallback(query_text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json_block() {
        let raw = "Sure, here you go:\n```json\n{\"question_type\": \"procedural\"}\n```\nThanks";
        assert_eq!(extract_json_block(raw), "{\"question_type\": \"procedural\"}");
    }

    #[test]
    fn extracts_brace_substring_without_fences() {
        let raw = "preamble {\"a\": 1} trailing text";
        assert_eq!(extract_json_block(raw), "{\"a\": 1}");
    }

    #[test]
    fn parses_strict_json() {
        let raw = r#"{"question_type": "procedural", "primary_intent": "apply for permit", "confidence": "high"}"#;
        let h = parse_hypothesis_response("q", raw);
        assert_eq!(h.question_type, QuestionType::Procedural);
        assert_eq!(h.confidence, Confidence::High);
    }

    #[test]
    fn tolerates_trailing_commas() {
        let raw = r#"{"question_type": "comparison", "primary_intent": "x", "confidence": "low",}"#;
        let h = parse_hypothesis_response("q", raw);
        assert_eq!(h.question_type, QuestionType::Comparison);
    }

    #[test]
    fn tolerates_single_quotes_as_last_resort() {
        let raw = "{'question_type': 'timeline', 'primary_intent': 'x', 'confidence': 'medium'}";
        let h = parse_hypothesis_response("q", raw);
        assert_eq!(h.question_type, QuestionType::Timeline);
        assert_eq!(h.confidence, Confidence::Medium);
    }

    #[test]
    fn unknown_question_type_falls_back_by_substring() {
        let raw = r#"{"question_type": "FACT_RETRIEVAL_EXTRA", "primary_intent": "x", "confidence": "unknown"}"#;
        let h = parse_hypothesis_response("q", raw);
        assert_eq!(h.question_type, QuestionType::FactRetrieval);
    }

    #[test]
    fn garbage_response_yields_fallback() {
        let h = parse_hypothesis_response("original query", "not json at all {{{");
        assert_eq!(h.confidence, Confidence::Unknown);
        assert_eq!(h.question_type, QuestionType::FactRetrieval);
        assert_eq!(h.primary_intent, "original query");
        assert!(h.information_gaps.is_empty());
    }

    #[test]
    fn requires_clarification_iff_critical_gap() {
        let mut h = Hypothesis::fallback("q");
        assert!(!h.requires_clarification());

        h.information_gaps.push(InformationGap {
            kind: "location".to_string(),
            severity: GapSeverity::Important,
            suggested_query: None,
            examples: vec![],
        });
        assert!(!h.requires_clarification());

        h.information_gaps.push(InformationGap {
            kind: "location".to_string(),
            severity: GapSeverity::Critical,
            suggested_query: None,
            examples: vec![],
        });
        assert!(h.requires_clarification());
    }

    #[test]
    fn high_confidence_is_downgraded_when_critical_gap_present() {
        let raw = r#"{"question_type": "fact_retrieval", "primary_intent": "x", "confidence": "high",
            "information_gaps": [{"kind": "location", "severity": "critical"}]}"#;
        let h = parse_hypothesis_response("q", raw);
        assert_eq!(h.confidence, Confidence::Medium);
    }
}
