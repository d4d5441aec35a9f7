//! Error taxonomy for Agent Forge.
//!
//! Each component keeps its own error enum; `ForgeError` folds them together
//! and `ErrorKind` names the user-visible category.

use forge_state::StorageError;
use serde::{Deserialize, Serialize};

use super::plan::PlanningError;
use super::validation::ValidationReport;
use crate::agents::AgentError;
use crate::backend::BackendError;
use crate::safety::Denial;
use crate::tooling::ToolExecutionError;

/// User-visible error category, stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "PlanningError")]
    Planning,
    #[serde(rename = "NoCapableAgentError")]
    NoCapableAgent,
    #[serde(rename = "ValidationFailure")]
    ValidationFailure,
    #[serde(rename = "RegistryConflict")]
    RegistryConflict,
    #[serde(rename = "RateLimitExceeded")]
    RateLimitExceeded,
    #[serde(rename = "PIIViolation")]
    PiiViolation,
    #[serde(rename = "PermissionDenied")]
    PermissionDenied,
    #[serde(rename = "ToolExecutionError")]
    ToolExecution,
    #[serde(rename = "BackendUnavailable")]
    BackendUnavailable,
    #[serde(rename = "BackendTimeout")]
    BackendTimeout,
    #[serde(rename = "AgentExecutionError")]
    AgentExecution,
    #[serde(rename = "CANCELLED")]
    Cancelled,
    #[serde(rename = "NotFound")]
    NotFound,
    #[serde(rename = "StorageError")]
    Storage,
    #[serde(rename = "InvalidRequest")]
    Invalid,
    #[serde(rename = "Internal")]
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "PlanningError",
            Self::NoCapableAgent => "NoCapableAgentError",
            Self::ValidationFailure => "ValidationFailure",
            Self::RegistryConflict => "RegistryConflict",
            Self::RateLimitExceeded => "RateLimitExceeded",
            Self::PiiViolation => "PIIViolation",
            Self::PermissionDenied => "PermissionDenied",
            Self::ToolExecution => "ToolExecutionError",
            Self::BackendUnavailable => "BackendUnavailable",
            Self::BackendTimeout => "BackendTimeout",
            Self::AgentExecution => "AgentExecutionError",
            Self::Cancelled => "CANCELLED",
            Self::NotFound => "NotFound",
            Self::Storage => "StorageError",
            Self::Invalid => "InvalidRequest",
            Self::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent Forge errors.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error("no capable agent for [{capabilities}]: {reason}")]
    NoCapableAgent {
        capabilities: String,
        reason: String,
        last_report: Option<Box<ValidationReport>>,
    },

    #[error("validation failed for '{agent_name}': {summary}")]
    ValidationFailure { agent_name: String, summary: String },

    #[error("registry conflict publishing '{name}' v{version}")]
    RegistryConflict { name: String, version: u64 },

    #[error("rate limit exceeded for '{subject}' (ceiling {ceiling} per window)")]
    RateLimitExceeded { subject: String, ceiling: u32 },

    #[error("PII detected in payload for '{action}': {}", patterns.join(", "))]
    PiiViolation {
        action: String,
        patterns: Vec<String>,
    },

    #[error("permission denied: '{subject}' may not perform '{action}'")]
    PermissionDenied { subject: String, action: String },

    #[error(transparent)]
    ToolExecution(#[from] ToolExecutionError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("agent '{agent}' failed: {source}")]
    Agent {
        agent: String,
        #[source]
        source: AgentError,
    },

    #[error("task cancelled")]
    Cancelled,

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("invalid agent spec: {0}")]
    InvalidAgentSpec(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Planning(_) => ErrorKind::Planning,
            Self::NoCapableAgent { .. } => ErrorKind::NoCapableAgent,
            Self::ValidationFailure { .. } => ErrorKind::ValidationFailure,
            Self::RegistryConflict { .. } => ErrorKind::RegistryConflict,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Self::PiiViolation { .. } => ErrorKind::PiiViolation,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::ToolExecution(e) => e.kind(),
            Self::Backend(e) => e.kind(),
            Self::Agent { source, .. } => source.kind(),
            Self::Cancelled => ErrorKind::Cancelled,
            Self::TaskNotFound(_) | Self::AgentNotFound(_) => ErrorKind::NotFound,
            Self::InvalidAgentSpec(_) | Self::InvalidRequest(_) | Self::InvalidTransition { .. } => {
                ErrorKind::Invalid
            }
            Self::Storage(_) => ErrorKind::Storage,
            Self::Serialization(_) | Self::Config(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether a failed step may be attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Agent { source, .. } => source.is_retryable(),
            Self::ToolExecution(e) => e.is_retryable(),
            Self::Backend(_) => true,
            _ => false,
        }
    }
}

impl From<Denial> for ForgeError {
    fn from(denial: Denial) -> Self {
        match denial {
            Denial::Permission { subject, action, .. } => {
                Self::PermissionDenied { subject, action }
            }
            Denial::RateLimited { subject, ceiling, .. } => {
                Self::RateLimitExceeded { subject, ceiling }
            }
            Denial::Pii { action, patterns } => Self::PiiViolation { action, patterns },
        }
    }
}

/// Result type for Agent Forge operations.
pub type Result<T> = std::result::Result<T, ForgeError>;
