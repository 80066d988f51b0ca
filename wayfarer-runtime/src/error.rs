//! Error taxonomy for the runtime boundary.

use crate::events::{FailureKind, LimitScope};
use crate::types::ThreadId;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of the agent runtime.
///
/// Provider and tool failures never leak through directly; they are
/// translated into one of these kinds at the runtime boundary.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Tool call budget exceeded: {scope} limit of {limit} reached")]
    ToolBudgetExceeded { scope: LimitScope, limit: usize },

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Conversation busy: a turn is already running on thread {0}")]
    ConcurrentTurn(ThreadId),

    #[error("Step limit of {0} reached without a final answer")]
    StepLimitExceeded(usize),

    #[error("Turn aborted: {0}")]
    TurnAborted(String),
}

impl AgentError {
    /// Kind reported in failure diagnostics.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AgentError::Configuration(_) => FailureKind::Configuration,
            AgentError::ToolBudgetExceeded { .. } => FailureKind::ToolBudgetExceeded,
            AgentError::ModelUnavailable(_) => FailureKind::ModelUnavailable,
            AgentError::ConcurrentTurn(_) => FailureKind::ConcurrentTurn,
            AgentError::StepLimitExceeded(_) => FailureKind::StepLimitExceeded,
            AgentError::TurnAborted(_) => FailureKind::Aborted,
        }
    }

    /// Whether retrying the same request later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::ModelUnavailable(_)
                | AgentError::ConcurrentTurn(_)
                | AgentError::StepLimitExceeded(_)
                | AgentError::TurnAborted(_)
        )
    }
}

impl From<CheckpointError> for AgentError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::Busy(thread_id) => AgentError::ConcurrentTurn(thread_id),
        }
    }
}

/// Bad or missing provider/model selection and invalid settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Unknown model '{model}' for provider '{provider}'")]
    UnknownModel { provider: String, model: String },

    #[error("Invalid model reference '{0}': expected 'provider:model'")]
    InvalidModelRef(String),

    #[error("Missing credentials: environment variable {0} is not set")]
    MissingCredentials(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by a chat model handle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl ModelError {
    /// Terminal errors that a secondary model may not share.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModelError::Timeout(_) | ModelError::Unavailable(_) | ModelError::RateLimited(_)
        )
    }
}

/// Failures reported by tool execution. Fed back to the model as tool output.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Tool timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unknown tool: {0}")]
    NotFound(String),
}

/// Checkpoint store errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckpointError {
    #[error("Turn already in flight for thread {0}")]
    Busy(ThreadId),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_error_display() {
        let err = AgentError::ModelUnavailable("both models down".to_string());
        assert_eq!(err.to_string(), "Model unavailable: both models down");

        let err = AgentError::ToolBudgetExceeded {
            scope: LimitScope::Run,
            limit: 2,
        };
        assert_eq!(
            err.to_string(),
            "Tool call budget exceeded: run limit of 2 reached"
        );
    }

    #[test]
    fn test_config_error_converts() {
        let err: AgentError = ConfigError::UnknownProvider("acme".to_string()).into();
        assert!(matches!(err, AgentError::Configuration(_)));
        assert_eq!(err.failure_kind(), FailureKind::Configuration);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_checkpoint_busy_maps_to_concurrent_turn() {
        let err: AgentError = CheckpointError::Busy(ThreadId::from("t1")).into();
        match err {
            AgentError::ConcurrentTurn(id) => assert_eq!(id.as_str(), "t1"),
            _ => panic!("Expected ConcurrentTurn"),
        }
    }

    #[test]
    fn test_model_error_retryability() {
        assert!(ModelError::Timeout("60s".into()).is_retryable());
        assert!(ModelError::Unavailable("503".into()).is_retryable());
        assert!(ModelError::RateLimited("429".into()).is_retryable());
        assert!(!ModelError::Rejected("400".into()).is_retryable());
        assert!(!ModelError::Malformed("no choices".into()).is_retryable());
    }
}
