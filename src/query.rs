//! The immutable query record ingress hands to the rest of the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Execution mode requested by the caller. Out-of-scope transports map
/// their own enums onto this one; it only affects whether the executor
/// streams progress or returns a single `UnifiedResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    Sync,
    Stream,
}

impl Default for QueryMode {
    fn default() -> Self {
        QueryMode::Sync
    }
}

/// Per-query overrides of the process-wide `Config` defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_rag: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_agents: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_expansion: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_reranking: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// An immutable, single-query record. Created by ingress, destroyed
/// when the final progress event for its tree is emitted (§3
/// lifecycles) — this crate never mutates a `Query` in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub mode: QueryMode,
    #[serde(default)]
    pub options: QueryOptions,
    pub received_at: DateTime<Utc>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_id: None,
            mode: QueryMode::default(),
            options: QueryOptions::default(),
            received_at: Utc::now(),
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_mode(mut self, mode: QueryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// Very small heuristic, used by the Token Budget Calculator and
    /// the rule-tier Intent Classifier: whether the text carries
    /// administrative/legal domain vocabulary.
    pub fn mentions_domain_keywords(&self) -> bool {
        const KEYWORDS: &[&str] = &[
            "antrag", "genehmigung", "behörde", "bescheid", "verwaltung", "gesetz",
            "verordnung", "amt", "bauantrag", "gebühr", "frist", "widerspruch",
        ];
        let lower = self.text.to_lowercase();
        KEYWORDS.iter().any(|kw| lower.contains(kw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_query_defaults_to_sync_mode() {
        let q = Query::new("Was ist der Hauptsitz von BMW?");
        assert_eq!(q.mode, QueryMode::Sync);
        assert!(q.session_id.is_none());
    }

    #[test]
    fn detects_domain_keywords() {
        let q = Query::new("Wie beantrage ich einen Bauantrag in Stuttgart?");
        assert!(q.mentions_domain_keywords());

        let q = Query::new("Was ist der Hauptsitz von BMW?");
        assert!(!q.mentions_domain_keywords());
    }
}
