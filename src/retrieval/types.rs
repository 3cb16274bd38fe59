//! Shared types for the Hybrid Retrieval Engine: search results, fusion
//! strategy selection and the weights that drive it (§4.7).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How per-backend result lists are combined into one ranked list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    ReciprocalRankFusion,
    WeightedSum,
    BordaCount,
}

impl Default for FusionStrategy {
    fn default() -> Self {
        FusionStrategy::ReciprocalRankFusion
    }
}

/// The backend a `SearchResult` originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Vector,
    Graph,
    Keyword,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Vector => write!(f, "vector"),
            BackendKind::Graph => write!(f, "graph"),
            BackendKind::Keyword => write!(f, "keyword"),
        }
    }
}

/// Relative weight given to each backend during fusion. Backends not
/// present default to a weight of 1.0.
#[derive(Debug, Clone, Default)]
pub struct BackendWeights(pub HashMap<BackendKind, f64>);

impl BackendWeights {
    pub fn uniform() -> Self {
        let mut weights = HashMap::new();
        weights.insert(BackendKind::Vector, 1.0);
        weights.insert(BackendKind::Graph, 1.0);
        weights.insert(BackendKind::Keyword, 1.0);
        Self(weights)
    }

    pub fn get(&self, backend: BackendKind) -> f64 {
        self.0.get(&backend).copied().unwrap_or(1.0)
    }
}

/// Diagnostics carried alongside a result's fused score, preserved so
/// callers can audit how a document was ranked (§4.7 score normalisation).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreDiagnostics {
    pub raw_scores: HashMap<String, f64>,
    pub normalized_scores: HashMap<String, f64>,
}

/// A single document as returned by one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub document_id: String,
    pub title: String,
    pub snippet: String,
    pub backend: BackendKind,
    /// Raw, backend-native score (cosine similarity, BM25, graph weight).
    pub raw_score: f64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SearchResult {
    pub fn new(
        document_id: impl Into<String>,
        title: impl Into<String>,
        snippet: impl Into<String>,
        backend: BackendKind,
        raw_score: f64,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            title: title.into(),
            snippet: snippet.into(),
            backend,
            raw_score,
            metadata: HashMap::new(),
        }
    }
}

/// A fused, deduplicated result as returned by `hybrid_search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedResult {
    pub document_id: String,
    pub title: String,
    pub snippet: String,
    pub fused_score: f64,
    pub contributing_backends: Vec<BackendKind>,
    pub diagnostics: ScoreDiagnostics,
}

/// The outcome of one `hybrid_search` call, including which backends
/// degraded so the caller can surface a partial-result warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridResult {
    pub results: Vec<FusedResult>,
    pub strategy: FusionStrategy,
    pub degraded_backends: Vec<BackendKind>,
}
