//! Central configuration object assembled once at startup.
//!
//! Mirrors the source system's "configuration via kwargs + environment
//! variables" by reifying the recognised option set as a plain struct
//! with a `Default` impl and an `from_env` constructor. Credentials are
//! never represented here — backends resolve their own credentials from
//! the environment directly; this crate only ever sees `{enabled: bool}`
//! per backend (see [`BackendConfig`]).

use std::env;

use crate::retrieval::FusionStrategy;

/// Per-backend visibility. The data facade merges this with
/// environment-sourced credentials that never reach application code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendConfig {
    pub enabled: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// All backends known to the Polyglot Data Facade.
#[derive(Debug, Clone, Copy)]
pub struct BackendsConfig {
    pub vector: BackendConfig,
    pub graph: BackendConfig,
    pub relational: BackendConfig,
    pub keyvalue: BackendConfig,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            vector: BackendConfig::default(),
            graph: BackendConfig::default(),
            relational: BackendConfig::default(),
            keyvalue: BackendConfig { enabled: false },
        }
    }
}

/// Model identity and context-window bookkeeping.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub name: String,
    pub context_window: u32,
    /// Fraction of the context window reserved for the prompt, in
    /// `[0.0, 1.0]`. Defaults to 0.25 (§4.2/§4.3).
    pub reserved_prompt_pct: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "claude-3-5-sonnet-20241022".to_string(),
            context_window: 200_000,
            reserved_prompt_pct: 0.25,
        }
    }
}

impl ModelConfig {
    pub fn reserved_prompt_tokens(&self) -> u32 {
        (self.context_window as f64 * self.reserved_prompt_pct).round() as u32
    }
}

/// Process Executor tuning.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionConfig {
    pub max_parallel: usize,
    pub default_step_timeout_ms: u64,
    pub plan_timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_parallel: 5,
            default_step_timeout_ms: 30_000,
            plan_timeout_ms: 120_000,
        }
    }
}

/// Hybrid Retrieval Engine toggles.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalConfig {
    pub expansion_enabled: bool,
    pub reranking_enabled: bool,
    pub fusion_strategy: FusionStrategy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            expansion_enabled: true,
            reranking_enabled: true,
            fusion_strategy: FusionStrategy::ReciprocalRankFusion,
        }
    }
}

/// Hypothesis Generator toggle.
#[derive(Debug, Clone, Copy, Default)]
pub struct HypothesisConfig {
    pub enabled: bool,
}

/// What the Response Planner does on mid-generation overflow (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationPolicy {
    Finalize,
    Continue,
}

impl Default for TruncationPolicy {
    fn default() -> Self {
        TruncationPolicy::Finalize
    }
}

/// Response Planner tuning.
#[derive(Debug, Clone, Copy)]
pub struct PlannerConfig {
    pub on_truncation: TruncationPolicy,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            on_truncation: TruncationPolicy::Finalize,
        }
    }
}

/// The full recognised option set, assembled once and treated as
/// read-only process-wide state thereafter (§5 "shared resources").
#[derive(Debug, Clone)]
pub struct Config {
    pub backends: BackendsConfig,
    pub model: ModelConfig,
    pub execution: ExecutionConfig,
    pub retrieval: RetrievalConfig,
    pub hypothesis: HypothesisConfig,
    pub planner: PlannerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backends: BackendsConfig::default(),
            model: ModelConfig::default(),
            execution: ExecutionConfig::default(),
            retrieval: RetrievalConfig::default(),
            hypothesis: HypothesisConfig { enabled: true },
            planner: PlannerConfig::default(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay environment variables onto the defaults. Unset or
    /// unparseable variables fall back to the existing value rather
    /// than failing — configuration loading is not expected to be a
    /// hard startup dependency for this crate's tests.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = env::var("BACKENDS_VECTOR_ENABLED") {
            config.backends.vector.enabled = parse_bool(&v, config.backends.vector.enabled);
        }
        if let Ok(v) = env::var("BACKENDS_GRAPH_ENABLED") {
            config.backends.graph.enabled = parse_bool(&v, config.backends.graph.enabled);
        }
        if let Ok(v) = env::var("BACKENDS_RELATIONAL_ENABLED") {
            config.backends.relational.enabled =
                parse_bool(&v, config.backends.relational.enabled);
        }
        if let Ok(v) = env::var("BACKENDS_KEYVALUE_ENABLED") {
            config.backends.keyvalue.enabled = parse_bool(&v, config.backends.keyvalue.enabled);
        }
        if let Ok(v) = env::var("MODEL_NAME") {
            config.model.name = v;
        }
        if let Ok(v) = env::var("MODEL_CONTEXT") {
            if let Ok(n) = v.parse() {
                config.model.context_window = n;
            }
        }
        if let Ok(v) = env::var("MODEL_RESERVED_PROMPT_PCT") {
            if let Ok(n) = v.parse() {
                config.model.reserved_prompt_pct = n;
            }
        }
        if let Ok(v) = env::var("EXECUTION_MAX_PARALLEL") {
            if let Ok(n) = v.parse() {
                config.execution.max_parallel = n;
            }
        }
        if let Ok(v) = env::var("EXECUTION_DEFAULT_STEP_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                config.execution.default_step_timeout_ms = n;
            }
        }
        if let Ok(v) = env::var("EXECUTION_PLAN_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                config.execution.plan_timeout_ms = n;
            }
        }
        if let Ok(v) = env::var("RETRIEVAL_EXPANSION_ENABLED") {
            config.retrieval.expansion_enabled =
                parse_bool(&v, config.retrieval.expansion_enabled);
        }
        if let Ok(v) = env::var("RETRIEVAL_RERANKING_ENABLED") {
            config.retrieval.reranking_enabled =
                parse_bool(&v, config.retrieval.reranking_enabled);
        }
        if let Ok(v) = env::var("HYPOTHESIS_ENABLED") {
            config.hypothesis.enabled = parse_bool(&v, config.hypothesis.enabled);
        }
        if let Ok(v) = env::var("PLANNER_ON_TRUNCATION") {
            config.planner.on_truncation = match v.to_ascii_lowercase().as_str() {
                "continue" => TruncationPolicy::Continue,
                "finalize" | "finalise" => TruncationPolicy::Finalize,
                _ => config.planner.on_truncation,
            };
        }

        config
    }
}

fn parse_bool(raw: &str, default: bool) -> bool {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_all_core_backends_enabled() {
        let config = Config::default();
        assert!(config.backends.vector.enabled);
        assert!(config.backends.graph.enabled);
        assert!(config.backends.relational.enabled);
        assert!(!config.backends.keyvalue.enabled);
    }

    #[test]
    fn reserved_prompt_tokens_is_quarter_of_window_by_default() {
        let model = ModelConfig::default();
        assert_eq!(model.reserved_prompt_tokens(), 50_000);
    }

    #[test]
    fn parse_bool_falls_back_to_default_on_garbage() {
        assert!(parse_bool("nonsense", true));
        assert!(!parse_bool("nonsense", false));
        assert!(parse_bool("YES", false));
        assert!(!parse_bool("0", true));
    }
}
