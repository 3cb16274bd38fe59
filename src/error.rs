//! Error types for admin-rag-core.

use thiserror::Error;

/// Result type alias using admin-rag-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of error kinds from the propagation policy. Several
/// `Error` variants map to the same kind; the executor's retry/abort
/// decision switches on the kind, never on the variant itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    CycleDetected,
    AgentNotFound,
    BackendUnavailable,
    BackendTimeout,
    LlmParseError,
    LlmBackendError,
    ContextOverflow,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Transient kinds are retried (subject to the step's retry policy);
    /// everything else is permanent.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::BackendTimeout | ErrorKind::LlmBackendError)
    }
}

/// Errors that can occur during retrieval, planning and execution.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad input; not retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// A process tree's `depends_on` graph contains a cycle.
    #[error("dependency cycle detected involving step {step_id}")]
    CycleDetected { step_id: String },

    /// A step or query referenced an agent id that isn't registered.
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// A backend is disabled, unreachable, or its circuit breaker is open.
    #[error("backend unavailable: {backend} ({reason})")]
    BackendUnavailable { backend: String, reason: String },

    /// A backend call exceeded its timeout. Transient; retried with backoff.
    #[error("backend {backend} timed out after {duration_ms}ms")]
    BackendTimeout { backend: String, duration_ms: u64 },

    /// The LLM's response could not be parsed into the expected shape.
    #[error("failed to parse LLM response: {0}")]
    LlmParseError(String),

    /// The LLM backend itself failed (5xx, connection reset). Transient.
    #[error("LLM backend error ({provider}): {message}")]
    LlmBackendError { provider: String, message: String },

    /// All context window strategies were exhausted.
    #[error("context window overflow: {0}")]
    ContextOverflow(String),

    /// The operation was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Bug or unexpected invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn cycle_detected(step_id: impl Into<String>) -> Self {
        Self::CycleDetected {
            step_id: step_id.into(),
        }
    }

    pub fn agent_not_found(id: impl Into<String>) -> Self {
        Self::AgentNotFound(id.into())
    }

    pub fn backend_unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    pub fn backend_timeout(backend: impl Into<String>, duration_ms: u64) -> Self {
        Self::BackendTimeout {
            backend: backend.into(),
            duration_ms,
        }
    }

    pub fn llm_parse_error(message: impl Into<String>) -> Self {
        Self::LlmParseError(message.into())
    }

    pub fn llm_backend_error(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmBackendError {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn context_overflow(message: impl Into<String>) -> Self {
        Self::ContextOverflow(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Map this error to its closed kind, for retry/abort decisions and
    /// for the user-visible degradation category in `plan_failed`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::CycleDetected { .. } => ErrorKind::CycleDetected,
            Error::AgentNotFound(_) => ErrorKind::AgentNotFound,
            Error::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Error::BackendTimeout { .. } => ErrorKind::BackendTimeout,
            Error::LlmParseError(_) => ErrorKind::LlmParseError,
            Error::LlmBackendError { .. } => ErrorKind::LlmBackendError,
            Error::ContextOverflow(_) => ErrorKind::ContextOverflow,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Serialization(_) => ErrorKind::Internal,
            Error::Config(_) => ErrorKind::Internal,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a step executing this error should be retried, per §7's
    /// propagation policy (transient kinds only, and never `cancelled`).
    pub fn is_retryable(&self) -> bool {
        self.kind().is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_are_retryable() {
        let e = Error::backend_timeout("vector", 1500);
        assert!(e.is_retryable());
        let e = Error::llm_backend_error("anthropic", "connection reset");
        assert!(e.is_retryable());
    }

    #[test]
    fn permanent_kinds_are_not_retryable() {
        assert!(!Error::validation("bad input").is_retryable());
        assert!(!Error::cycle_detected("step-1").is_retryable());
        assert!(!Error::agent_not_found("x").is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn backend_unavailable_is_degradation_not_retry() {
        let e = Error::backend_unavailable("graph", "disabled");
        assert_eq!(e.kind(), ErrorKind::BackendUnavailable);
        assert!(!e.is_retryable());
    }
}
