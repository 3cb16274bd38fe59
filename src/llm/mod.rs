//! LLM client abstraction with smart routing.
//!
//! This module provides a unified interface for working with multiple LLM providers
//! (Anthropic, OpenAI, OpenRouter) with intelligent routing based on query type
//! and recursion depth, plus a batch executor for bounded-concurrency fan-out
//! requests such as re-ranking and hypothesis generation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use admin_rag_core::llm::{
//!     AnthropicClient, ClientConfig, SmartRouter, RoutingContext,
//!     CompletionRequest, ChatMessage,
//! };
//!
//! let client = AnthropicClient::new(
//!     ClientConfig::new("your-api-key")
//!         .with_default_model("claude-3-5-sonnet-20241022")
//! );
//!
//! let router = SmartRouter::new();
//! let context = RoutingContext::new().with_depth(0);
//! let decision = router.route("Analyze the architecture", &context);
//!
//! let request = CompletionRequest::new()
//!     .with_model(&decision.model.id)
//!     .with_message(ChatMessage::user("Hello"));
//!
//! let response = client.complete(request).await?;
//! ```

mod batch;
mod client;
mod router;
mod types;

pub use batch::{
    BatchConfig, BatchExecutor, BatchQueryResult, BatchedLLMQuery, BatchedQueryResults,
    RetryConfig, DEFAULT_MAX_PARALLEL, DEFAULT_RATE_LIMIT_WINDOW_MS,
};
pub use client::{
    AnthropicClient, ClientConfig, LLMClient, MultiProviderClient, OpenAIClient, TrackedClient,
};
#[cfg(feature = "gemini")]
pub use client::GoogleClient;
pub use router::{QueryType, RoutingContext, RoutingDecision, SmartRouter, TierDefaults};
pub use types::{
    CacheControl, ChatMessage, ChatRole, CompletionRequest, CompletionResponse, CostTracker,
    EmbeddingRequest, EmbeddingResponse, ModelCosts, ModelSpec, ModelTier, Provider, StopReason,
    TierBreakdown, TierCosts, TokenUsage,
};
