//! Process Executor: walks a process tree wave by wave, dispatching
//! each step by its `step_type`, retrying transient failures, and
//! emitting progress events (§4.8). Grounded on the bounded-semaphore
//! fan-out pattern used by the LLM batch executor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::ExecutionConfig;
use crate::dependency;
use crate::error::{Error, ErrorKind, Result};
use crate::process::{OnFailure, ProcessStep, ProcessTree, StepStatus, StepType};
use crate::progress::ProgressSink;
use crate::registry::AgentRegistry;

/// A single source of truth for cancellation, shared by every step's
/// future. Cancellation is cooperative and idempotent (§4.8).
#[derive(Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (sender, receiver) = watch::channel(false);
        (
            Self {
                sender: Arc::new(sender),
            },
            receiver,
        )
    }

    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }
}

/// What a step's business logic produces, dispatched on `step_type`
/// (§4.8c). Registered per step type; AGENT steps go through the
/// Agent Registry instead and never need a runner.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, step: &ProcessStep, context: &HashMap<String, Value>) -> Result<Value>;
}

/// The outcome of a whole tree's execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub tree: ProcessTree,
    pub final_result: Value,
}

enum StepOutcome {
    Completed,
    DegradedAgent,
    Failed { fatal: bool },
}

pub struct ProcessExecutor {
    runners: HashMap<StepType, Arc<dyn StepRunner>>,
    registry: Arc<AgentRegistry>,
    config: ExecutionConfig,
}

impl ProcessExecutor {
    pub fn new(registry: Arc<AgentRegistry>, config: ExecutionConfig) -> Self {
        Self {
            runners: HashMap::new(),
            registry,
            config,
        }
    }

    pub fn with_runner(mut self, step_type: StepType, runner: Arc<dyn StepRunner>) -> Self {
        self.runners.insert(step_type, runner);
        self
    }

    /// Runs `tree` to completion, emitting progress through
    /// `progress`. This is the core algorithm of §4.8.
    #[instrument(skip(self, progress, cancel), fields(root = %tree.root_id))]
    pub async fn execute(
        &self,
        tree: ProcessTree,
        progress: Arc<ProgressSink>,
        cancel: watch::Receiver<bool>,
    ) -> Result<ExecutionOutcome> {
        progress.plan_started().await;

        if let Some(missing) = self.validate_capabilities(&tree) {
            let message = format!("missing capability: {missing}");
            progress.plan_failed(message.clone()).await;
            return Err(Error::agent_not_found(missing));
        }

        let waves = match dependency::plan(&tree) {
            Ok(waves) => waves,
            Err(err) => {
                progress.plan_failed(err.to_string()).await;
                return Err(err);
            }
        };

        let tree = Arc::new(Mutex::new(tree));
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));

        for wave in &waves {
            if *cancel.borrow() {
                progress.plan_cancelled().await;
                return Err(Error::Cancelled);
            }

            for step_id in wave {
                {
                    let mut guard = tree.lock().await;
                    if let Some(step) = guard.get_mut(step_id) {
                        step.status = StepStatus::Ready;
                    }
                }
                progress.step_ready(step_id.clone()).await;
            }

            let outcomes = self
                .run_wave(wave, &tree, &semaphore, &progress, &cancel)
                .await;

            if *cancel.borrow() {
                progress.plan_cancelled().await;
                return Err(Error::Cancelled);
            }

            if outcomes.iter().any(|o| matches!(o, StepOutcome::Failed { fatal: true })) {
                progress.plan_failed("a step failed with on_failure=abort_plan").await;
                let guard = tree.lock().await;
                return Err(Error::internal(format!(
                    "plan {} aborted after a fatal step failure",
                    guard.root_id
                )));
            }
        }

        let guard = tree.lock().await;
        let root = guard.root();
        let final_result = root.result.clone().unwrap_or(Value::Null);
        progress
            .plan_completed(json!({ "root_id": guard.root_id, "result": final_result }))
            .await;

        Ok(ExecutionOutcome {
            tree: guard.clone(),
            final_result,
        })
    }

    fn validate_capabilities(&self, tree: &ProcessTree) -> Option<String> {
        for step in tree.steps.values() {
            if step.step_type != StepType::Agent {
                continue;
            }
            if let Some(capability) = &step.required_capability {
                let by_capability_empty = self.registry.by_capability(capability).is_empty();
                let not_a_direct_id = self.registry.lookup(capability).is_err();
                if by_capability_empty && not_a_direct_id {
                    return Some(capability.clone());
                }
            }
        }
        None
    }

    async fn run_wave(
        &self,
        wave: &[String],
        tree: &Arc<Mutex<ProcessTree>>,
        semaphore: &Arc<Semaphore>,
        progress: &Arc<ProgressSink>,
        cancel: &watch::Receiver<bool>,
    ) -> Vec<StepOutcome> {
        let tasks = wave.iter().map(|step_id| {
            let step_id = step_id.clone();
            let tree = tree.clone();
            let semaphore = semaphore.clone();
            let progress = progress.clone();
            let cancel = cancel.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed unexpectedly");
                self.run_one_step(&step_id, &tree, &progress, &cancel).await
            }
        });
        futures::future::join_all(tasks).await
    }

    async fn run_one_step(
        &self,
        step_id: &str,
        tree: &Arc<Mutex<ProcessTree>>,
        progress: &Arc<ProgressSink>,
        cancel: &watch::Receiver<bool>,
    ) -> StepOutcome {
        let (step, is_root, context) = {
            let guard = tree.lock().await;
            let step = guard.get(step_id).expect("wave only contains known steps").clone();
            let context = gather_context(&guard, &step);
            (step, guard.is_root(step_id), context)
        };

        progress.step_started(step_id.to_string()).await;

        let timeout_duration = Duration::from_millis(step.timeout_ms.unwrap_or(self.config.default_step_timeout_ms));
        let retry_policy = step.retry_policy;
        let mut attempt = 0;

        loop {
            if *cancel.borrow() {
                return StepOutcome::Failed { fatal: false };
            }

            let dispatch = timeout(timeout_duration, self.dispatch(&step, &context)).await;

            let outcome = match dispatch {
                Ok(Ok(DispatchResult::Success(value))) => {
                    self.finish_step(tree, step_id, StepStatus::Completed, Some(value.clone()), None)
                        .await;
                    progress
                        .step_completed(step_id.to_string(), json!({ "attempt": attempt, "result": value }))
                        .await;
                    return StepOutcome::Completed;
                }
                Ok(Ok(DispatchResult::DegradedAgent(value))) => {
                    self.finish_step(tree, step_id, StepStatus::Completed, Some(value.clone()), None)
                        .await;
                    progress
                        .step_completed(step_id.to_string(), json!({ "attempt": attempt, "degraded": true, "result": value }))
                        .await;
                    return StepOutcome::DegradedAgent;
                }
                Ok(Err(err)) => err,
                Err(_elapsed) => Error::backend_timeout(step_id, timeout_duration.as_millis() as u64),
            };

            if retry_policy.allows_retry(outcome.kind(), attempt) {
                debug!(step_id, attempt, error = %outcome, "retrying step after transient failure");
                progress
                    .step_progress(step_id.to_string(), json!({ "attempt": attempt + 1, "retrying_after": outcome.to_string() }))
                    .await;
                tokio::time::sleep(retry_policy.delay_for_attempt(attempt)).await;
                attempt += 1;
                continue;
            }

            warn!(step_id, error = %outcome, "step failed");
            self.finish_step(tree, step_id, StepStatus::Failed, None, Some(outcome.to_string()))
                .await;
            progress.step_failed(step_id.to_string(), outcome.to_string()).await;

            let fatal = step.effective_on_failure(is_root) == OnFailure::AbortPlan;
            return StepOutcome::Failed { fatal };
        }
    }

    async fn finish_step(
        &self,
        tree: &Arc<Mutex<ProcessTree>>,
        step_id: &str,
        status: StepStatus,
        result: Option<Value>,
        error: Option<String>,
    ) {
        let mut guard = tree.lock().await;
        if let Some(step) = guard.get_mut(step_id) {
            step.status = status;
            step.result = result;
            step.error = error;
            step.ended_at = Some(chrono::Utc::now());
        }
    }

    async fn dispatch(&self, step: &ProcessStep, context: &HashMap<String, Value>) -> Result<DispatchResult> {
        match step.step_type {
            StepType::Agent => self.dispatch_agent(step).await,
            StepType::Aggregate => Ok(DispatchResult::Success(aggregate_default(context))),
            StepType::Quality => Ok(DispatchResult::Success(quality_default(context))),
            other => match self.runners.get(&other) {
                Some(runner) => runner.run(step, context).await.map(DispatchResult::Success),
                None => Err(Error::internal(format!("no runner registered for step type {other:?}"))),
            },
        }
    }

    async fn dispatch_agent(&self, step: &ProcessStep) -> Result<DispatchResult> {
        let capability = step
            .required_capability
            .as_deref()
            .ok_or_else(|| Error::validation(format!("agent step {} has no required_capability", step.id)))?;

        let agent_id = match self.registry.lookup(capability) {
            Ok(descriptor) => descriptor.id.clone(),
            Err(_) => self
                .registry
                .by_capability(capability)
                .into_iter()
                .next()
                .map(|d| d.id.clone())
                .ok_or_else(|| Error::agent_not_found(capability))?,
        };

        let handler = self.registry.handler(&agent_id)?;
        match handler.execute(step.inputs.clone()).await {
            Ok(value) => Ok(DispatchResult::Success(value)),
            Err(err) if err.kind() == ErrorKind::BackendUnavailable => {
                info!(agent = %agent_id, "agent backend unavailable, returning degraded stub");
                Ok(DispatchResult::DegradedAgent(
                    json!({ "is_degraded": true, "citations": Vec::<String>::new() }),
                ))
            }
            Err(err) => Err(err),
        }
    }
}

enum DispatchResult {
    Success(Value),
    DegradedAgent(Value),
}

fn gather_context(tree: &ProcessTree, step: &ProcessStep) -> HashMap<String, Value> {
    step.depends_on
        .iter()
        .filter_map(|dep_id| tree.get(dep_id).map(|dep| (dep_id.clone(), dep.result.clone().unwrap_or(Value::Null))))
        .collect()
}

fn aggregate_default(context: &HashMap<String, Value>) -> Value {
    json!({ "combined": context })
}

fn quality_default(context: &HashMap<String, Value>) -> Value {
    json!({ "checks_passed": !context.is_empty() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AgentDescriptor, AgentHandler, AgentRegistry};

    struct AlwaysOk;

    #[async_trait]
    impl StepRunner for AlwaysOk {
        async fn run(&self, _step: &ProcessStep, _context: &HashMap<String, Value>) -> Result<Value> {
            Ok(json!({ "ok": true }))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl StepRunner for AlwaysFails {
        async fn run(&self, _step: &ProcessStep, _context: &HashMap<String, Value>) -> Result<Value> {
            Err(Error::validation("always fails"))
        }
    }

    struct EchoAgent;

    #[async_trait]
    impl AgentHandler for EchoAgent {
        async fn execute(&self, inputs: Value) -> Result<Value> {
            Ok(inputs)
        }
    }

    fn executor_with(runner: Arc<dyn StepRunner>, step_type: StepType) -> ProcessExecutor {
        ProcessExecutor::new(Arc::new(AgentRegistry::new()), ExecutionConfig::default()).with_runner(step_type, runner)
    }

    #[tokio::test]
    async fn linear_plan_completes_successfully() {
        let executor = executor_with(Arc::new(AlwaysOk), StepType::Search);
        let tree = ProcessTree::new(ProcessStep::new("root", StepType::Search));
        let progress = Arc::new(ProgressSink::new());
        let (_token, cancel) = CancellationToken::new();

        let outcome = executor.execute(tree, progress, cancel).await.unwrap();
        assert_eq!(outcome.final_result, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn fatal_step_failure_aborts_the_plan() {
        let executor = executor_with(Arc::new(AlwaysFails), StepType::Search);
        let tree = ProcessTree::new(ProcessStep::new("root", StepType::Search));
        let progress = Arc::new(ProgressSink::new());
        let (_token, cancel) = CancellationToken::new();

        let result = executor.execute(tree, progress, cancel).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn non_root_failure_with_continue_degraded_does_not_abort() {
        let executor = executor_with(Arc::new(AlwaysOk), StepType::Search)
            .with_runner(StepType::Llm, Arc::new(AlwaysFails));
        let mut tree = ProcessTree::new(ProcessStep::new("root", StepType::Search).depends_on(["child"]));
        tree.add_step(
            ProcessStep::new("child", StepType::Llm).with_on_failure(OnFailure::ContinueDegraded),
        );
        let progress = Arc::new(ProgressSink::new());
        let (_token, cancel) = CancellationToken::new();

        let result = executor.execute(tree, progress, cancel).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn missing_capability_fails_fast_before_any_step_runs() {
        let executor = executor_with(Arc::new(AlwaysOk), StepType::Search);
        let tree = ProcessTree::new(ProcessStep::new("root", StepType::Agent).with_capability("ghost-capability"));
        let progress = Arc::new(ProgressSink::new());
        let (_token, cancel) = CancellationToken::new();

        let result = executor.execute(tree, progress, cancel).await;
        assert!(matches!(result, Err(Error::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn agent_step_dispatches_through_registry() {
        let mut registry = AgentRegistry::new();
        registry.register(
            AgentDescriptor::new("legal-lookup", "Legal Lookup").with_capabilities(["search"]),
            Arc::new(EchoAgent),
        );
        let executor = ProcessExecutor::new(Arc::new(registry), ExecutionConfig::default());
        let tree = ProcessTree::new(
            ProcessStep::new("root", StepType::Agent)
                .with_capability("search")
                .with_inputs(json!({ "q": "Bauantrag" })),
        );
        let progress = Arc::new(ProgressSink::new());
        let (_token, cancel) = CancellationToken::new();

        let outcome = executor.execute(tree, progress, cancel).await.unwrap();
        assert_eq!(outcome.final_result, json!({ "q": "Bauantrag" }));
    }

    #[tokio::test]
    async fn already_cancelled_token_short_circuits() {
        let executor = executor_with(Arc::new(AlwaysOk), StepType::Search);
        let tree = ProcessTree::new(ProcessStep::new("root", StepType::Search));
        let progress = Arc::new(ProgressSink::new());
        let (token, cancel) = CancellationToken::new();
        token.cancel();

        let result = executor.execute(tree, progress, cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
