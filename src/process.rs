//! The process tree data model: steps, their dependency edges, and
//! the retry policy attached to each (§3).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;
use crate::retrieval::FusionStrategy;

/// What a step dispatches to when it runs (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    Nlp,
    Search,
    Retrieval,
    Agent,
    Llm,
    Quality,
    Aggregate,
}

/// A step's lifecycle state (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

/// What the executor does when a step exhausts its retries (§4.8 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    AbortPlan,
    ContinueDegraded,
}

/// Retry behaviour for a single step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            backoff_factor: 4.0,
        }
    }
}

impl RetryPolicy {
    /// Matches §4.7's 100ms -> 400ms -> 1600ms backend backoff ladder.
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt as i32);
        let millis = (self.base_delay_ms as f64 * factor).round().max(0.0) as u64;
        std::time::Duration::from_millis(millis)
    }

    /// Whether `error_kind` may be retried at all under this policy,
    /// deferring to the kind's own transience (§7) first. LLM backend
    /// failures are capped at one retry regardless of `max_attempts`
    /// (§7: "transient; one retry"), distinct from the backend-timeout
    /// ladder's full `max_attempts` budget.
    pub fn allows_retry(&self, error_kind: ErrorKind, attempt: u32) -> bool {
        if !error_kind.is_transient() {
            return false;
        }
        let cap = match error_kind {
            ErrorKind::LlmBackendError => 1,
            _ => self.max_attempts,
        };
        attempt < cap
    }
}

/// Weight/strategy overrides a SEARCH/RETRIEVAL step may carry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<FusionStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_weight: Option<f64>,
}

/// A single node in a process tree (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStep {
    pub id: String,
    pub step_type: StepType,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub depends_on: HashSet<String>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default)]
    pub on_failure: Option<OnFailure>,
    #[serde(default)]
    pub retrieval: RetrievalOverrides,
    /// Capability tag required if `step_type == Agent`.
    #[serde(default)]
    pub required_capability: Option<String>,

    pub status: StepStatus,
    #[serde(default)]
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub citations: Vec<String>,
}

impl ProcessStep {
    pub fn new(id: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            step_type,
            inputs: Value::Null,
            depends_on: HashSet::new(),
            timeout_ms: None,
            retry_policy: RetryPolicy::default(),
            on_failure: None,
            retrieval: RetrievalOverrides::default(),
            required_capability: None,
            status: StepStatus::Pending,
            attempt: 0,
            started_at: None,
            ended_at: None,
            result: None,
            error: None,
            citations: Vec::new(),
        }
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.required_capability = Some(capability.into());
        self
    }

    pub fn with_on_failure(mut self, on_failure: OnFailure) -> Self {
        self.on_failure = Some(on_failure);
        self
    }

    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    /// `on_failure = abort_plan` by default on the root step, and
    /// `continue_degraded` on every other step (§7 propagation policy
    /// default), unless overridden explicitly.
    pub fn effective_on_failure(&self, is_root: bool) -> OnFailure {
        self.on_failure.unwrap_or(if is_root {
            OnFailure::AbortPlan
        } else {
            OnFailure::ContinueDegraded
        })
    }
}

/// A rooted DAG of steps (§3). The root step id is tracked separately
/// since children may have multiple parents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessTree {
    pub root_id: String,
    pub steps: HashMap<String, ProcessStep>,
}

impl ProcessTree {
    pub fn new(root: ProcessStep) -> Self {
        let root_id = root.id.clone();
        let mut steps = HashMap::new();
        steps.insert(root_id.clone(), root);
        Self { root_id, steps }
    }

    pub fn add_step(&mut self, step: ProcessStep) {
        self.steps.insert(step.id.clone(), step);
    }

    pub fn get(&self, id: &str) -> Option<&ProcessStep> {
        self.steps.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ProcessStep> {
        self.steps.get_mut(id)
    }

    pub fn root(&self) -> &ProcessStep {
        self.steps
            .get(&self.root_id)
            .expect("root step always present")
    }

    pub fn is_root(&self, id: &str) -> bool {
        id == self.root_id
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &String> {
        self.steps.keys()
    }

    /// All ids referenced by some step's `depends_on` but absent from
    /// `steps` — a plan-level error per §4.5.
    pub fn missing_dependency_ids(&self) -> Vec<String> {
        let mut missing: Vec<String> = self
            .steps
            .values()
            .flat_map(|s| s.depends_on.iter())
            .filter(|dep| !self.steps.contains_key(*dep))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_depends_on() {
        let step = ProcessStep::new("b", StepType::Search).depends_on(["a"]);
        assert!(step.depends_on.contains("a"));
    }

    #[test]
    fn effective_on_failure_defaults_by_root() {
        let root = ProcessStep::new("root", StepType::Llm);
        let child = ProcessStep::new("child", StepType::Search);
        assert_eq!(root.effective_on_failure(true), OnFailure::AbortPlan);
        assert_eq!(child.effective_on_failure(false), OnFailure::ContinueDegraded);
    }

    #[test]
    fn retry_policy_backoff_matches_100_400_1600_ladder() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0).as_millis(), 100);
        assert_eq!(policy.delay_for_attempt(1).as_millis(), 400);
        assert_eq!(policy.delay_for_attempt(2).as_millis(), 1600);
    }

    #[test]
    fn llm_backend_errors_are_capped_at_one_retry() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(ErrorKind::LlmBackendError, 0));
        assert!(!policy.allows_retry(ErrorKind::LlmBackendError, 1));
    }

    #[test]
    fn backend_timeouts_use_the_full_max_attempts_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(ErrorKind::BackendTimeout, 0));
        assert!(policy.allows_retry(ErrorKind::BackendTimeout, 2));
        assert!(!policy.allows_retry(ErrorKind::BackendTimeout, 3));
    }

    #[test]
    fn missing_dependency_ids_detects_dangling_edges() {
        let mut tree = ProcessTree::new(ProcessStep::new("root", StepType::Llm).depends_on(["ghost"]));
        tree.add_step(ProcessStep::new("a", StepType::Search));
        assert_eq!(tree.missing_dependency_ids(), vec!["ghost".to_string()]);
    }
}
