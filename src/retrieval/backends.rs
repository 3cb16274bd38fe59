//! The Polyglot Data Facade (§4.11): narrow per-storage-kind traits,
//! plus in-memory/SQLite reference implementations used for tests and
//! demos (§4.7 "Reference backend implementations").

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::Connection;

use crate::error::{Error, Result};
use super::types::{BackendKind, SearchResult};

/// Vector similarity search over embeddings.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn health(&self) -> Result<()>;
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>>;
}

/// Graph traversal / substring match over a document graph.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    async fn health(&self) -> Result<()>;
    async fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<SearchResult>>;
}

/// SQL-capable keyword/relational search.
#[async_trait]
pub trait RelationalBackend: Send + Sync {
    async fn health(&self) -> Result<()>;
    async fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<SearchResult>>;
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// A document held by the in-memory reference backends.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub related_ids: Vec<String>,
}

/// In-memory cosine-similarity vector backend, for tests and demos.
pub struct InMemoryVectorBackend {
    documents: Vec<StoredDocument>,
}

impl InMemoryVectorBackend {
    pub fn new(documents: Vec<StoredDocument>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl VectorBackend for InMemoryVectorBackend {
    async fn health(&self) -> Result<()> {
        Ok(())
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        let mut scored: Vec<(f32, &StoredDocument)> = self
            .documents
            .iter()
            .map(|doc| (cosine_similarity(embedding, &doc.embedding), doc))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, doc)| {
                SearchResult::new(&doc.id, &doc.title, snippet_of(&doc.content), BackendKind::Vector, score as f64)
            })
            .collect())
    }
}

/// In-memory adjacency-list graph backend: case-insensitive substring
/// match over content and title, plus one hop of related documents
/// (§4.7).
pub struct InMemoryGraphBackend {
    documents: Vec<StoredDocument>,
}

impl InMemoryGraphBackend {
    pub fn new(documents: Vec<StoredDocument>) -> Self {
        Self { documents }
    }

    fn find(&self, id: &str) -> Option<&StoredDocument> {
        self.documents.iter().find(|d| d.id == id)
    }
}

#[async_trait]
impl GraphBackend for InMemoryGraphBackend {
    async fn health(&self) -> Result<()> {
        Ok(())
    }

    async fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let needle = query_text.to_lowercase();
        let mut direct_hits: Vec<&StoredDocument> = self
            .documents
            .iter()
            .filter(|doc| doc.content.to_lowercase().contains(&needle) || doc.title.to_lowercase().contains(&needle))
            .collect();
        direct_hits.truncate(top_k);

        let mut results: Vec<SearchResult> = direct_hits
            .iter()
            .enumerate()
            .map(|(idx, doc)| {
                let score = 1.0 - (idx as f64 * 0.01);
                SearchResult::new(&doc.id, &doc.title, snippet_of(&doc.content), BackendKind::Graph, score)
            })
            .collect();

        let mut seen: std::collections::HashSet<String> = results.iter().map(|r| r.document_id.clone()).collect();
        for doc in &direct_hits {
            for related_id in &doc.related_ids {
                if seen.contains(related_id) || results.len() >= top_k {
                    continue;
                }
                if let Some(related) = self.find(related_id) {
                    results.push(SearchResult::new(
                        &related.id,
                        &related.title,
                        snippet_of(&related.content),
                        BackendKind::Graph,
                        0.5,
                    ));
                    seen.insert(related_id.clone());
                }
            }
        }

        Ok(results)
    }
}

/// SQLite-backed relational backend using `LIKE` matching over an
/// in-memory database (§4.7).
pub struct SqliteRelationalBackend {
    conn: Mutex<Connection>,
}

impl SqliteRelationalBackend {
    pub fn new(documents: &[StoredDocument]) -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(
            "CREATE TABLE documents (id TEXT PRIMARY KEY, title TEXT, content TEXT)",
            [],
        )?;
        for doc in documents {
            conn.execute(
                "INSERT INTO documents (id, title, content) VALUES (?1, ?2, ?3)",
                rusqlite::params![doc.id, doc.title, doc.content],
            )?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl RelationalBackend for SqliteRelationalBackend {
    async fn health(&self) -> Result<()> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("relational backend mutex poisoned"))?;
        Ok(())
    }

    async fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::internal("relational backend mutex poisoned"))?;
        let pattern = format!("%{}%", query_text.replace('%', "").replace('_', ""));
        let mut stmt = conn
            .prepare("SELECT id, title, content FROM documents WHERE content LIKE ?1 OR title LIKE ?1 LIMIT ?2")
            .map_err(sql_error)?;
        let rows = stmt
            .query_map(rusqlite::params![pattern, top_k as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })
            .map_err(sql_error)?;

        let mut results = Vec::new();
        for (idx, row) in rows.enumerate() {
            let (id, title, content) = row.map_err(sql_error)?;
            let score = 1.0 - (idx as f64 * 0.01);
            results.push(SearchResult::new(id, title, snippet_of(&content), BackendKind::Keyword, score));
        }
        Ok(results)
    }
}

fn sql_error(err: rusqlite::Error) -> Error {
    Error::backend_unavailable("relational", err.to_string())
}

fn snippet_of(content: &str) -> String {
    content.chars().take(200).collect()
}

/// Keys a backend registry by kind, letting the engine treat a
/// disabled or absent backend uniformly (§4.11).
#[derive(Default)]
pub struct BackendRegistry {
    pub vector: Option<Box<dyn VectorBackend>>,
    pub graph: Option<Box<dyn GraphBackend>>,
    pub relational: Option<Box<dyn RelationalBackend>>,
}

impl BackendRegistry {
    pub fn enabled_kinds(&self) -> HashMap<BackendKind, bool> {
        let mut kinds = HashMap::new();
        kinds.insert(BackendKind::Vector, self.vector.is_some());
        kinds.insert(BackendKind::Graph, self.graph.is_some());
        kinds.insert(BackendKind::Keyword, self.relational.is_some());
        kinds
    }
}
