//! Hybrid Retrieval Engine: multi-backend search, fusion, query
//! expansion and LLM re-ranking (§4.7), plus the narrow backend traits
//! of the Polyglot Data Facade (§4.11).

mod backends;
mod circuit;
mod engine;
mod expansion;
mod fusion;
mod rerank;
mod types;

pub use backends::{
    BackendRegistry, GraphBackend, InMemoryGraphBackend, InMemoryVectorBackend, RelationalBackend,
    SqliteRelationalBackend, StoredDocument, VectorBackend,
};
pub use circuit::CircuitBreaker;
pub use engine::HybridRetrievalEngine;
pub use expansion::expand_query;
pub use fusion::fuse;
pub use rerank::{rerank, LlmReranker, RerankMode, Reranker};
pub use types::{
    BackendKind, BackendWeights, FusedResult, FusionStrategy, HybridResult, ScoreDiagnostics,
    SearchResult,
};
