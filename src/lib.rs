//! # admin-rag-core
//!
//! Retrieval-augmented question answering core for German
//! administrative law: a hybrid retrieval engine, an adaptive
//! response planner, and the process execution machinery that ties
//! them together into one cancellable, progress-streaming plan per
//! query.
//!
//! ## Core components
//!
//! - **Query / Hypothesis / Intent**: ingress types and the
//!   two-tier intent classifier and LLM-backed hypothesis generator
//!   that inform downstream planning.
//! - **Budget / Context Window**: the token budget calculator and the
//!   manager that fits a prompt into a model's context window.
//! - **Dependency / Process / Executor**: the process tree data
//!   model, its dependency resolver, and the executor that runs a
//!   plan wave by wave with bounded concurrency and retries.
//! - **Retrieval**: the hybrid retrieval engine — multi-backend
//!   search, score fusion, query expansion, LLM re-ranking, and the
//!   narrow backend traits of the data facade.
//! - **Registry / Progress**: the agent registry steps dispatch
//!   through, and the ordered, back-pressured progress stream a plan
//!   emits as it runs.
//! - **Planner**: the response planner that turns a hypothesis and
//!   retrieval results into a generated answer.
//!
//! ## Example
//!
//! ```rust,ignore
//! use admin_rag_core::{Config, Query, ProcessExecutor, ProgressSink};
//!
//! let config = Config::from_env();
//! let query = Query::new("Welche Frist gilt für einen Widerspruch?");
//! ```

pub mod budget;
pub mod config;
pub mod context;
pub mod context_window;
pub mod dependency;
pub mod error;
pub mod executor;
pub mod hypothesis;
pub mod intent;
pub mod llm;
pub mod planner;
pub mod process;
pub mod progress;
pub mod query;
pub mod registry;
pub mod retrieval;

// Re-exports for convenience
pub use budget::{compute as compute_budget, complexity_score, TokenBudget, MIN_BUDGET};
pub use config::{
    BackendConfig, BackendsConfig, Config, ExecutionConfig, HypothesisConfig, ModelConfig,
    PlannerConfig, RetrievalConfig, TruncationPolicy,
};
pub use context::{Message, Role};
pub use context_window::{fit, FitResult, OverflowStrategy, TokenEstimator};
pub use dependency::plan as plan_dependencies;
pub use error::{Error, ErrorKind, Result};
pub use executor::{CancellationToken, ExecutionOutcome, ProcessExecutor, StepRunner};
pub use hypothesis::{
    Confidence, GapSeverity, Hypothesis, HypothesisGenerator, InformationGap, LlmHypothesisGenerator,
    QuestionType,
};
pub use intent::{
    Classification, ClassificationPath, HybridIntentClassifier, Intent, IntentClassifier,
    RuleOnlyIntentClassifier,
};
pub use llm::{
    AnthropicClient, BatchConfig, BatchExecutor, BatchQueryResult, BatchedLLMQuery,
    BatchedQueryResults, CacheControl, ChatMessage, ChatRole, ClientConfig, CompletionRequest,
    CompletionResponse, CostTracker, EmbeddingRequest, EmbeddingResponse, LLMClient, ModelCosts,
    ModelSpec, ModelTier, MultiProviderClient, OpenAIClient, Provider, QueryType, RetryConfig,
    RoutingContext, RoutingDecision, SmartRouter, StopReason, TierBreakdown, TierCosts,
    TierDefaults, TokenUsage, TrackedClient,
};
#[cfg(feature = "gemini")]
pub use llm::GoogleClient;
pub use planner::{GeneratedResponse, PlannedPrompt, ResponsePlanner};
pub use process::{
    OnFailure, ProcessStep, ProcessTree, RetrievalOverrides, RetryPolicy, StepStatus, StepType,
};
pub use progress::{ProgressEvent, ProgressEventType, ProgressSink, ProgressStream};
pub use query::{Query, QueryMode, QueryOptions};
pub use registry::{AgentDescriptor, AgentHandler, AgentRegistry};
pub use retrieval::{
    BackendKind, BackendRegistry, BackendWeights, CircuitBreaker, FusedResult, FusionStrategy,
    GraphBackend, HybridResult, HybridRetrievalEngine, InMemoryGraphBackend, InMemoryVectorBackend,
    LlmReranker, RelationalBackend, RerankMode, Reranker, ScoreDiagnostics, SearchResult,
    SqliteRelationalBackend, StoredDocument, VectorBackend,
};
