//! Response Planner: chooses a prompt framework from the hypothesis's
//! question type, fits it into the model's context window, and drives
//! generation against the LLM backend, streaming chunks out as
//! progress events on the root LLM step (§4.9).

use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;

use crate::budget::TokenBudget;
use crate::config::{ModelConfig, TruncationPolicy};
use crate::context::Message;
use crate::context_window::{fit, OverflowStrategy, TokenEstimator};
use crate::error::{Error, Result};
use crate::hypothesis::{Hypothesis, QuestionType};
use crate::llm::{ChatMessage, CompletionRequest, LLMClient, StopReason};
use crate::progress::ProgressSink;
use crate::query::Query;
use crate::retrieval::FusedResult;

/// A continuation call is never attempted more than this many times,
/// so a model that keeps hitting `max_tokens` can't loop forever.
const MAX_CONTINUATIONS: u32 = 3;
const CONTINUES_MARKER: &str = "\n\n[continues]";
/// Simulated streaming granularity: the client boundary here is a
/// single request/response, not a token stream, so a finished
/// completion is re-chunked into `step_progress` events of this size.
const STREAM_CHUNK_CHARS: usize = 400;

/// Which framework fills the prompt, keyed off `hypothesis.question_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Template {
    FactRetrieval,
    Comparison,
    Timeline,
    Calculation,
    General,
}

impl Template {
    fn for_question_type(question_type: QuestionType) -> Self {
        match question_type {
            QuestionType::FactRetrieval => Template::FactRetrieval,
            QuestionType::Comparison => Template::Comparison,
            QuestionType::Timeline => Template::Timeline,
            QuestionType::Calculation => Template::Calculation,
            QuestionType::Procedural
            | QuestionType::Opinion
            | QuestionType::Causal
            | QuestionType::Hypothetical => Template::General,
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            Template::FactRetrieval => {
                "You are a German administrative law assistant. Answer the question \
                 directly and concisely, citing the source document for every factual \
                 claim using [n] markers. If the evidence doesn't cover the question, say so."
            }
            Template::Comparison => {
                "You are a German administrative law assistant. Structure the answer as \
                 a comparison: state what each side of the comparison involves, then the \
                 differences, then (if relevant) which applies in the asked-about case. \
                 Cite the source document for every claim using [n] markers."
            }
            Template::Timeline => {
                "You are a German administrative law assistant. Present the answer as an \
                 ordered sequence of events or deadlines, earliest first, with the \
                 governing Frist or date for each step. Cite sources using [n] markers."
            }
            Template::Calculation => {
                "You are a German administrative law assistant. Show the calculation's \
                 inputs, the applicable rule or fee schedule, and the resulting figure, \
                 in that order. Cite the source for the rule using [n] markers."
            }
            Template::General => {
                "You are a German administrative law assistant. Answer the question \
                 using the evidence provided, citing the source document for every \
                 factual claim using [n] markers. State explicitly any assumption the \
                 evidence required you to make."
            }
        }
    }
}

fn render_evidence(gathered_context: &[FusedResult]) -> String {
    if gathered_context.is_empty() {
        return "(no evidence retrieved)".to_string();
    }
    gathered_context
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[{}] {} — {}\n{}", i + 1, r.document_id, r.title, r.snippet))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The assembled, window-fitted prompt a [`ResponsePlanner`] is ready
/// to generate against, plus the diagnostics the executor surfaces
/// alongside the final answer.
#[derive(Debug, Clone)]
pub struct PlannedPrompt {
    pub messages: Vec<Message>,
    pub effective_budget: u32,
    pub window_strategy: OverflowStrategy,
}

/// The outcome of driving generation for a [`PlannedPrompt`].
#[derive(Debug, Clone)]
pub struct GeneratedResponse {
    pub text: String,
    pub truncated: bool,
    pub continuations: u32,
    pub window_strategy: OverflowStrategy,
}

impl GeneratedResponse {
    pub fn to_result_value(&self) -> serde_json::Value {
        json!({
            "text": self.text,
            "truncated": self.truncated,
            "continuations": self.continuations,
        })
    }
}

fn chunk_text(text: &str, chunk_chars: usize) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut start = 0;
    let char_indices: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let mut count = 0;
    for &idx in &char_indices {
        if count == chunk_chars {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    chunks.push(&text[start..]);
    chunks
}

fn build_request(messages: &[Message], model: &str, max_tokens: u32) -> CompletionRequest {
    let mut request = CompletionRequest::new().with_model(model).with_max_tokens(max_tokens);
    for message in messages {
        match message.role {
            crate::context::Role::System => request = request.with_system(message.content.clone()),
            crate::context::Role::User => request = request.with_message(ChatMessage::user(message.content.clone())),
            crate::context::Role::Assistant => {
                request = request.with_message(ChatMessage::assistant(message.content.clone()))
            }
            crate::context::Role::Tool => request = request.with_message(ChatMessage::user(message.content.clone())),
        }
    }
    request
}

/// Builds prompts and drives generation for the Response Planner
/// (§4.9). `C` is the LLM client used for the final generation call.
pub struct ResponsePlanner<C: LLMClient> {
    llm: Arc<C>,
    estimator: TokenEstimator,
    truncation_policy: TruncationPolicy,
}

impl<C: LLMClient> ResponsePlanner<C> {
    pub fn new(llm: Arc<C>) -> Self {
        Self {
            llm,
            estimator: TokenEstimator::default(),
            truncation_policy: TruncationPolicy::default(),
        }
    }

    pub fn with_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_truncation_policy(mut self, policy: TruncationPolicy) -> Self {
        self.truncation_policy = policy;
        self
    }

    /// Chooses a template, fills it with the retrieval evidence, and
    /// fits the result into `model`'s context window under `budget`
    /// (§4.9 `plan_response`, the non-generating half).
    pub fn build_prompt(
        &self,
        query: &Query,
        hypothesis: &Hypothesis,
        gathered_context: &[FusedResult],
        budget: &TokenBudget,
        model: &ModelConfig,
    ) -> PlannedPrompt {
        let template = Template::for_question_type(hypothesis.question_type);
        let evidence = render_evidence(gathered_context);
        let user_content = format!(
            "## Evidence\n{}\n\n## Question\n{}",
            evidence, query.text
        );
        let messages = vec![Message::system(template.system_prompt()), Message::user(user_content)];

        let fit_result = fit(&messages, budget.allocated, model.context_window, &self.estimator);
        let effective_budget = match &fit_result.strategy {
            OverflowStrategy::DegradeModel { suggested_budget } => *suggested_budget,
            _ => budget.allocated,
        };

        PlannedPrompt {
            messages: fit_result.final_messages,
            effective_budget,
            window_strategy: fit_result.strategy,
        }
    }

    /// Generates against `prompt`, streaming chunks as `step_progress`
    /// events on `step_id`. On `stop_reason = max_tokens`, either
    /// finalises with a trailing marker or issues a continuation call
    /// that reuses the accumulated text, per `self.truncation_policy`
    /// (§4.9 overflow handling). Checks `cancel` at each chunk and
    /// continuation boundary, the "LLM streaming chunk boundary" safe
    /// point the executor's cancellation contract names.
    pub async fn generate(
        &self,
        prompt: PlannedPrompt,
        model: &ModelConfig,
        step_id: &str,
        progress: &ProgressSink,
        cancel: &watch::Receiver<bool>,
    ) -> Result<GeneratedResponse> {
        let mut messages = prompt.messages.clone();
        let mut accumulated = String::new();
        let mut continuations = 0u32;
        let mut truncated = false;

        loop {
            if *cancel.borrow() {
                return Err(Error::Cancelled);
            }

            let request = build_request(&messages, &model.name, prompt.effective_budget);
            let response = self.llm.complete(request).await?;

            for chunk in chunk_text(&response.content, STREAM_CHUNK_CHARS) {
                if *cancel.borrow() {
                    return Err(Error::Cancelled);
                }
                progress
                    .step_progress(step_id, json!({ "chunk": chunk, "attempt": continuations }))
                    .await;
            }
            accumulated.push_str(&response.content);

            let hit_max_tokens = matches!(response.stop_reason, Some(StopReason::MaxTokens));
            if !hit_max_tokens {
                truncated = false;
                break;
            }
            truncated = true;

            if self.truncation_policy == TruncationPolicy::Finalize || continuations >= MAX_CONTINUATIONS {
                accumulated.push_str(CONTINUES_MARKER);
                break;
            }

            continuations += 1;
            messages.push(Message::assistant(accumulated.clone()));
            messages.push(Message::user("Continue exactly where you left off. Do not repeat earlier text."));
            let refit = fit(&messages, prompt.effective_budget, model.context_window, &self.estimator);
            messages = refit.final_messages;
        }

        Ok(GeneratedResponse {
            text: accumulated,
            truncated,
            continuations,
            window_strategy: prompt.window_strategy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::llm::{CompletionResponse, EmbeddingRequest, EmbeddingResponse, ModelSpec, Provider, TokenUsage};
    use crate::retrieval::{BackendKind, ScoreDiagnostics};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn sample_query() -> Query {
        Query::new("Welche Frist gilt für den Widerspruch gegen einen Bauantragsbescheid?")
    }

    fn sample_evidence() -> Vec<FusedResult> {
        vec![FusedResult {
            document_id: "doc-1".to_string(),
            title: "Widerspruchsfristen im Baurecht".to_string(),
            snippet: "Die Widerspruchsfrist beträgt einen Monat ab Zustellung.".to_string(),
            fused_score: 0.9,
            contributing_backends: vec![BackendKind::Vector],
            diagnostics: ScoreDiagnostics::default(),
        }]
    }

    fn sample_budget() -> TokenBudget {
        TokenBudget {
            allocated: 2000,
            base: 1500,
            intent_boost: 0,
            complexity_boost: 0,
            agent_boost: 0,
            chunk_boost: 0,
            domain_boost: 0,
            ceiling: 6000,
            model_context: 200_000,
            degraded: false,
        }
    }

    struct ScriptedClient {
        responses: Mutex<Vec<CompletionResponse>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(responses: Vec<CompletionResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }
    }

    fn canned_response(content: &str, stop_reason: StopReason) -> CompletionResponse {
        CompletionResponse {
            id: "resp-1".to_string(),
            model: "test-model".to_string(),
            content: content.to_string(),
            stop_reason: Some(stop_reason),
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 10,
                cache_read_tokens: None,
                cache_creation_tokens: None,
            },
            timestamp: chrono::Utc::now(),
            cost: None,
        }
    }

    #[async_trait]
    impl LLMClient for ScriptedClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(Error::llm_backend_error("scripted", "exhausted"));
            }
            Ok(responses.remove(0))
        }
        async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            Err(Error::llm_backend_error("scripted", "not configured"))
        }
        fn provider(&self) -> Provider {
            Provider::Anthropic
        }
        fn available_models(&self) -> Vec<ModelSpec> {
            Vec::new()
        }
    }

    #[test]
    fn fact_retrieval_question_picks_fact_retrieval_template() {
        let query = sample_query();
        let hypothesis = Hypothesis::fallback(&query.text);
        let planner = ResponsePlanner::new(Arc::new(ScriptedClient::new(Vec::new())));
        let prompt = planner.build_prompt(&query, &hypothesis, &sample_evidence(), &sample_budget(), &ModelConfig::default());
        assert!(prompt.messages[0].content.contains("Answer the question directly"));
    }

    #[test]
    fn evidence_is_numbered_and_included_in_the_user_message() {
        let query = sample_query();
        let hypothesis = Hypothesis::fallback(&query.text);
        let planner = ResponsePlanner::new(Arc::new(ScriptedClient::new(Vec::new())));
        let prompt = planner.build_prompt(&query, &hypothesis, &sample_evidence(), &sample_budget(), &ModelConfig::default());
        assert!(prompt.messages[1].content.contains("[1] doc-1"));
    }

    #[tokio::test]
    async fn generation_without_truncation_completes_in_one_call() {
        let query = sample_query();
        let hypothesis = Hypothesis::fallback(&query.text);
        let client = Arc::new(ScriptedClient::new(vec![canned_response(
            "Die Frist beträgt einen Monat.",
            StopReason::EndTurn,
        )]));
        let planner = ResponsePlanner::new(client.clone());
        let model = ModelConfig::default();
        let prompt = planner.build_prompt(&query, &hypothesis, &sample_evidence(), &sample_budget(), &model);
        let progress = ProgressSink::new();
        let (_tx, rx) = watch::channel(false);

        let result = planner.generate(prompt, &model, "llm-root", &progress, &rx).await.unwrap();
        assert_eq!(result.text, "Die Frist beträgt einen Monat.");
        assert!(!result.truncated);
        assert_eq!(result.continuations, 0);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn max_tokens_with_finalize_policy_appends_continues_marker() {
        let query = sample_query();
        let hypothesis = Hypothesis::fallback(&query.text);
        let client = Arc::new(ScriptedClient::new(vec![canned_response("Teil eins ", StopReason::MaxTokens)]));
        let planner = ResponsePlanner::new(client.clone()).with_truncation_policy(TruncationPolicy::Finalize);
        let model = ModelConfig::default();
        let prompt = planner.build_prompt(&query, &hypothesis, &sample_evidence(), &sample_budget(), &model);
        let progress = ProgressSink::new();
        let (_tx, rx) = watch::channel(false);

        let result = planner.generate(prompt, &model, "llm-root", &progress, &rx).await.unwrap();
        assert!(result.truncated);
        assert!(result.text.ends_with("[continues]"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn max_tokens_with_continue_policy_issues_a_continuation_call() {
        let query = sample_query();
        let hypothesis = Hypothesis::fallback(&query.text);
        let client = Arc::new(ScriptedClient::new(vec![
            canned_response("Teil eins. ", StopReason::MaxTokens),
            canned_response("Teil zwei.", StopReason::EndTurn),
        ]));
        let planner = ResponsePlanner::new(client.clone()).with_truncation_policy(TruncationPolicy::Continue);
        let model = ModelConfig::default();
        let prompt = planner.build_prompt(&query, &hypothesis, &sample_evidence(), &sample_budget(), &model);
        let progress = ProgressSink::new();
        let (_tx, rx) = watch::channel(false);

        let result = planner.generate(prompt, &model, "llm-root", &progress, &rx).await.unwrap();
        assert_eq!(result.text, "Teil eins. Teil zwei.");
        assert!(result.truncated);
        assert_eq!(result.continuations, 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn already_cancelled_token_stops_before_any_call() {
        let query = sample_query();
        let hypothesis = Hypothesis::fallback(&query.text);
        let client = Arc::new(ScriptedClient::new(vec![canned_response("unused", StopReason::EndTurn)]));
        let planner = ResponsePlanner::new(client.clone());
        let model = ModelConfig::default();
        let prompt = planner.build_prompt(&query, &hypothesis, &sample_evidence(), &sample_budget(), &model);
        let progress = ProgressSink::new();
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let result = planner.generate(prompt, &model, "llm-root", &progress, &rx).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn continuations_are_capped() {
        let query = sample_query();
        let hypothesis = Hypothesis::fallback(&query.text);
        let responses: Vec<CompletionResponse> = (0..(MAX_CONTINUATIONS + 2))
            .map(|_| canned_response("x", StopReason::MaxTokens))
            .collect();
        let client = Arc::new(ScriptedClient::new(responses));
        let planner = ResponsePlanner::new(client.clone()).with_truncation_policy(TruncationPolicy::Continue);
        let model = ModelConfig::default();
        let prompt = planner.build_prompt(&query, &hypothesis, &sample_evidence(), &sample_budget(), &model);
        let progress = ProgressSink::new();
        let (_tx, rx) = watch::channel(false);

        let result = planner.generate(prompt, &model, "llm-root", &progress, &rx).await.unwrap();
        assert_eq!(result.continuations, MAX_CONTINUATIONS);
        assert!(result.text.ends_with("[continues]"));
    }
}
