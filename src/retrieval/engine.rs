//! `HybridRetrievalEngine`: the public facade over the per-backend
//! searches, fusion, query expansion and re-ranking (§4.7).

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::warn;

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::llm::LLMClient;

use super::backends::BackendRegistry;
use super::circuit::{call_with_breaker, CircuitBreaker};
use super::expansion::expand_query;
use super::fusion::fuse;
use super::rerank::{rerank, RerankMode};
use super::types::{BackendKind, BackendWeights, HybridResult, SearchResult};

const DEFAULT_TOP_K: usize = 10;

/// Ties the reference backends, fusion, query expansion and
/// re-ranking into one facade. `C` is the LLM client used for
/// re-ranking; callers that disable reranking can use any `LLMClient`
/// impl since it is never called in that case.
pub struct HybridRetrievalEngine<C: LLMClient> {
    backends: BackendRegistry,
    llm: Arc<C>,
    breakers: HashMap<BackendKind, CircuitBreaker>,
    config: RetrievalConfig,
}

impl<C: LLMClient> HybridRetrievalEngine<C> {
    pub fn new(backends: BackendRegistry, llm: Arc<C>, config: RetrievalConfig) -> Self {
        let mut breakers = HashMap::new();
        breakers.insert(BackendKind::Vector, CircuitBreaker::new("vector"));
        breakers.insert(BackendKind::Graph, CircuitBreaker::new("graph"));
        breakers.insert(BackendKind::Keyword, CircuitBreaker::new("keyword"));
        Self {
            backends,
            llm,
            breakers,
            config,
        }
    }

    pub async fn vector_search(&self, embedding: &[f32], top_k: usize) -> Vec<SearchResult> {
        let Some(backend) = self.backends.vector.as_ref() else {
            return Vec::new();
        };
        let breaker = &self.breakers[&BackendKind::Vector];
        match call_with_breaker(breaker, "vector", || backend.search(embedding, top_k)).await {
            Ok(results) => results,
            Err(err) => {
                warn!(error = %err, "vector backend degraded");
                Vec::new()
            }
        }
    }

    pub async fn graph_search(&self, query_text: &str, top_k: usize) -> Vec<SearchResult> {
        let Some(backend) = self.backends.graph.as_ref() else {
            return Vec::new();
        };
        let breaker = &self.breakers[&BackendKind::Graph];
        match call_with_breaker(breaker, "graph", || backend.search(query_text, top_k)).await {
            Ok(results) => results,
            Err(err) => {
                warn!(error = %err, "graph backend degraded");
                Vec::new()
            }
        }
    }

    pub async fn keyword_search(&self, query_text: &str, top_k: usize) -> Vec<SearchResult> {
        let Some(backend) = self.backends.relational.as_ref() else {
            return Vec::new();
        };
        let breaker = &self.breakers[&BackendKind::Keyword];
        match call_with_breaker(breaker, "keyword", || backend.search(query_text, top_k)).await {
            Ok(results) => results,
            Err(err) => {
                warn!(error = %err, "keyword backend degraded");
                Vec::new()
            }
        }
    }

    /// Runs whichever backends are present concurrently and fuses the
    /// result. A fully-absent backend set yields an empty result list,
    /// never an error (§4.7).
    pub async fn hybrid_search(&self, query_text: &str, embedding: Option<&[f32]>, weights: &BackendWeights) -> HybridResult {
        let vector_fut = async {
            match embedding {
                Some(emb) => self.vector_search(emb, DEFAULT_TOP_K).await,
                None => Vec::new(),
            }
        };
        let graph_fut = self.graph_search(query_text, DEFAULT_TOP_K);
        let keyword_fut = self.keyword_search(query_text, DEFAULT_TOP_K);

        let (vector_results, graph_results, keyword_results) =
            tokio::join!(vector_fut, graph_fut, keyword_fut);

        let mut all_results = Vec::new();
        all_results.extend(vector_results);
        all_results.extend(graph_results);
        all_results.extend(keyword_results);

        let degraded_backends = self
            .breakers
            .iter()
            .filter(|(_, breaker)| breaker.is_open())
            .map(|(kind, _)| *kind)
            .collect();

        let results = fuse(&all_results, weights, self.config.fusion_strategy);

        HybridResult {
            results,
            strategy: self.config.fusion_strategy,
            degraded_backends,
        }
    }

    /// Executes all `queries` concurrently, stopping early if
    /// `cancel` is closed. `cancel` carries `false` while active and
    /// `true` once cancellation is requested, matching the
    /// cooperative-cancellation idiom used by the Process Executor.
    pub async fn batch_search(
        &self,
        queries: &[String],
        embeddings: &[Option<Vec<f32>>],
        weights: &BackendWeights,
        cancel: &watch::Receiver<bool>,
    ) -> Vec<Option<HybridResult>> {
        let tasks = queries.iter().enumerate().map(|(idx, query)| {
            let embedding = embeddings.get(idx).cloned().flatten();
            let mut cancel = cancel.clone();
            async move {
                if *cancel.borrow() {
                    return None;
                }
                tokio::select! {
                    result = self.hybrid_search(query, embedding.as_deref(), weights) => Some(result),
                    _ = cancel.changed() => None,
                }
            }
        });
        join_all(tasks).await
    }

    pub fn expand_query(&self, query: &str, max: usize) -> Vec<String> {
        if !self.config.expansion_enabled {
            return vec![query.to_string()];
        }
        expand_query(query, max)
    }

    pub async fn rerank(&self, query: &str, docs: Vec<SearchResult>, mode: RerankMode) -> Vec<SearchResult> {
        if !self.config.reranking_enabled {
            return docs;
        }
        rerank(self.llm.as_ref(), query, docs, mode).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::llm::{CompletionRequest, CompletionResponse, EmbeddingRequest, EmbeddingResponse, ModelSpec, Provider};
    use async_trait::async_trait;

    struct NullClient;

    #[async_trait]
    impl LLMClient for NullClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
            Err(crate::error::Error::llm_backend_error("null", "not configured"))
        }
        async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            Err(crate::error::Error::llm_backend_error("null", "not configured"))
        }
        fn provider(&self) -> Provider {
            Provider::Anthropic
        }
        fn available_models(&self) -> Vec<ModelSpec> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn absent_backends_yield_empty_results_not_an_error() {
        let engine = HybridRetrievalEngine::new(BackendRegistry::default(), Arc::new(NullClient), RetrievalConfig::default());
        let result = engine.hybrid_search("Bauantrag", None, &BackendWeights::uniform()).await;
        assert!(result.results.is_empty());
    }

    #[tokio::test]
    async fn expand_query_respects_config_toggle() {
        let mut config = RetrievalConfig::default();
        config.expansion_enabled = false;
        let engine = HybridRetrievalEngine::new(BackendRegistry::default(), Arc::new(NullClient), config);
        let expanded = engine.expand_query("antrag", 10);
        assert_eq!(expanded, vec!["antrag".to_string()]);
    }

    #[tokio::test]
    async fn batch_search_runs_all_queries_when_not_cancelled() {
        let engine = HybridRetrievalEngine::new(BackendRegistry::default(), Arc::new(NullClient), RetrievalConfig::default());
        let (_tx, rx) = watch::channel(false);
        let queries = vec!["a".to_string(), "b".to_string()];
        let embeddings = vec![None, None];
        let results = engine.batch_search(&queries, &embeddings, &BackendWeights::uniform(), &rx).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_some()));
    }

    #[tokio::test]
    async fn batch_search_stops_when_already_cancelled() {
        let engine = HybridRetrievalEngine::new(BackendRegistry::default(), Arc::new(NullClient), RetrievalConfig::default());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let queries = vec!["a".to_string()];
        let embeddings = vec![None];
        let results = engine.batch_search(&queries, &embeddings, &BackendWeights::uniform(), &rx).await;
        assert!(results[0].is_none());
    }
}
