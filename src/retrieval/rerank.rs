//! LLM-backed re-ranking: batches of at most 5 documents scored by an
//! LLM call, falling back to the original order on any parse failure
//! (§4.7 `rerank`).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::hypothesis::extract_json_block;
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};

use super::types::SearchResult;

const MAX_BATCH_SIZE: usize = 5;

/// The dimension along which documents are scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankMode {
    Relevance,
    Informativeness,
    Combined,
}

impl RerankMode {
    fn prompt_label(&self) -> &'static str {
        match self {
            RerankMode::Relevance => "relevance to the query",
            RerankMode::Informativeness => "how much new information the document adds",
            RerankMode::Combined => "a balance of relevance and informativeness",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScoreEntry {
    document_id: String,
    score: f64,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    scores: Vec<ScoreEntry>,
}

fn build_prompt(query: &str, docs: &[SearchResult], mode: RerankMode) -> String {
    let listing: String = docs
        .iter()
        .map(|d| format!("- id: {}\n  title: {}\n  snippet: {}", d.document_id, d.title, d.snippet))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Score each document below for {} to the query \"{}\" on a 0.0-1.0 scale.\n\
Documents:\n{}\n\n\
Respond with JSON only: {{\"scores\": [{{\"document_id\": \"...\", \"score\": 0.0}}, ...]}}",
        mode.prompt_label(),
        query,
        listing
    )
}

fn parse_scores(raw: &str) -> Option<Vec<ScoreEntry>> {
    let candidate = extract_json_block(raw);
    let value: Value = serde_json::from_str(candidate).ok()?;
    let response: ScoreResponse = serde_json::from_value(value).ok()?;
    Some(response.scores)
}

/// Re-ranks `docs` against `query` using `client`, batching at most
/// `MAX_BATCH_SIZE` documents per call. On any parse failure for a
/// batch, that batch's original relative order is preserved.
pub async fn rerank<C: LLMClient>(client: &C, query: &str, docs: Vec<SearchResult>, mode: RerankMode) -> Vec<SearchResult> {
    let mut reranked = Vec::with_capacity(docs.len());
    for batch in docs.chunks(MAX_BATCH_SIZE) {
        reranked.extend(rerank_batch(client, query, batch, mode).await);
    }
    reranked
}

async fn rerank_batch<C: LLMClient>(client: &C, query: &str, batch: &[SearchResult], mode: RerankMode) -> Vec<SearchResult> {
    let prompt = build_prompt(query, batch, mode);
    let request = CompletionRequest::new()
        .with_message(ChatMessage::user(prompt))
        .with_temperature(0.0);

    let response = match client.complete(request).await {
        Ok(response) => response,
        Err(_) => return batch.to_vec(),
    };

    let scores = match parse_scores(&response.content) {
        Some(scores) => scores,
        None => return batch.to_vec(),
    };

    let score_by_id: std::collections::HashMap<String, f64> =
        scores.into_iter().map(|s| (s.document_id, s.score)).collect();

    if batch.iter().any(|d| !score_by_id.contains_key(&d.document_id)) {
        return batch.to_vec();
    }

    let mut ranked = batch.to_vec();
    ranked.sort_by(|a, b| {
        let score_a = score_by_id.get(&a.document_id).copied().unwrap_or(0.0);
        let score_b = score_by_id.get(&b.document_id).copied().unwrap_or(0.0);
        score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked
}

#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, docs: Vec<SearchResult>, mode: RerankMode) -> Vec<SearchResult>;
}

pub struct LlmReranker<C: LLMClient> {
    client: C,
}

impl<C: LLMClient> LlmReranker<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: LLMClient> Reranker for LlmReranker<C> {
    async fn rerank(&self, query: &str, docs: Vec<SearchResult>, mode: RerankMode) -> Vec<SearchResult> {
        rerank(&self.client, query, docs, mode).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_score_response() {
        let raw = r#"{"scores": [{"document_id": "a", "score": 0.9}, {"document_id": "b", "score": 0.1}]}"#;
        let scores = parse_scores(raw).unwrap();
        assert_eq!(scores.len(), 2);
    }

    #[test]
    fn parses_fenced_score_response() {
        let raw = "```json\n{\"scores\": [{\"document_id\": \"a\", \"score\": 0.5}]}\n```";
        let scores = parse_scores(raw).unwrap();
        assert_eq!(scores[0].document_id, "a");
    }

    #[test]
    fn garbage_response_fails_to_parse() {
        assert!(parse_scores("not json at all").is_none());
    }

    #[test]
    fn prompt_includes_all_document_ids() {
        let docs = vec![SearchResult::new("a", "Title", "Snippet", super::super::types::BackendKind::Vector, 0.5)];
        let prompt = build_prompt("query", &docs, RerankMode::Combined);
        assert!(prompt.contains("id: a"));
    }
}
