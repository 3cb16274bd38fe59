//! Agent Registry: an in-process, immutable-after-startup catalogue of
//! invocable agents, queryable by id or capability tag (§4.6).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};

/// What an agent does when invoked for a step.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn execute(&self, inputs: Value) -> Result<Value>;
}

/// Static metadata about a registered agent.
#[derive(Debug, Clone)]
pub struct AgentDescriptor {
    pub id: String,
    pub name: String,
    pub capabilities: Vec<String>,
    pub needs_database: bool,
    pub needs_external_api: bool,
    pub default_timeout_ms: u64,
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: Vec::new(),
            needs_database: false,
            needs_external_api: false,
            default_timeout_ms: 30_000,
        }
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut caps: Vec<String> = capabilities.into_iter().map(Into::into).collect();
        caps.sort();
        self.capabilities = caps;
        self
    }

    pub fn with_database(mut self, needs_database: bool) -> Self {
        self.needs_database = needs_database;
        self
    }

    pub fn with_external_api(mut self, needs_external_api: bool) -> Self {
        self.needs_external_api = needs_external_api;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }
}

struct RegisteredAgent {
    descriptor: AgentDescriptor,
    handler: Arc<dyn AgentHandler>,
}

/// Populated once at startup via [`AgentRegistry::register`]; every
/// lookup thereafter is read-only (§4.6 "immutable thereafter").
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, RegisteredAgent>,
    by_capability: HashMap<String, HashSet<String>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: AgentDescriptor, handler: Arc<dyn AgentHandler>) {
        for capability in &descriptor.capabilities {
            self.by_capability
                .entry(capability.clone())
                .or_default()
                .insert(descriptor.id.clone());
        }
        self.agents.insert(
            descriptor.id.clone(),
            RegisteredAgent { descriptor, handler },
        );
    }

    /// Returns `agent_not_found` if `id` isn't registered (§4.6).
    pub fn lookup(&self, id: &str) -> Result<&AgentDescriptor> {
        self.agents
            .get(id)
            .map(|a| &a.descriptor)
            .ok_or_else(|| Error::agent_not_found(id))
    }

    pub fn handler(&self, id: &str) -> Result<Arc<dyn AgentHandler>> {
        self.agents
            .get(id)
            .map(|a| a.handler.clone())
            .ok_or_else(|| Error::agent_not_found(id))
    }

    /// Unknown capabilities return the empty set, never an error (§4.6).
    pub fn by_capability(&self, tag: &str) -> Vec<&AgentDescriptor> {
        self.by_capability
            .get(tag)
            .into_iter()
            .flatten()
            .filter_map(|id| self.agents.get(id).map(|a| &a.descriptor))
            .collect()
    }

    /// All registered agent ids, for health reporting (§4.6 `health()`).
    pub fn health(&self) -> Vec<(String, bool)> {
        self.agents.keys().map(|id| (id.clone(), true)).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
