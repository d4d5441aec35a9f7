//! Reasoning backend seam.
//!
//! The planner and the agent generator both talk to a text-completion
//! service through [`ReasoningBackend`]. Calls go through
//! [`complete_with_retry`], which applies a per-call timeout and retries
//! transient failures with exponential backoff.

mod http;
mod scripted;

pub use http::{HttpBackend, HttpBackendConfig};
pub use scripted::ScriptedBackend;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::ErrorKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("reasoning backend unavailable: {0}")]
    Unavailable(String),

    #[error("reasoning backend timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Non-retryable refusal (bad request, auth failure).
    #[error("reasoning backend rejected the request: {0}")]
    Rejected(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::BackendTimeout,
            Self::Unavailable(_) | Self::Rejected(_) => ErrorKind::BackendUnavailable,
        }
    }
}

/// Text completion with an optional JSON shape hint.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn complete(&self, prompt: &str, schema_hint: Option<&str>)
        -> Result<String, BackendError>;
}

/// Timeout and retry controls for backend calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts (milliseconds).
    pub backoff_base_ms: u64,
    /// Wall-clock limit for one attempt (milliseconds).
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 250,
            timeout_ms: 30_000,
        }
    }
}

/// Call the backend, retrying `Unavailable` and `Timeout` up to
/// `policy.max_attempts` times in total.
pub async fn complete_with_retry(
    backend: &dyn ReasoningBackend,
    prompt: &str,
    schema_hint: Option<&str>,
    policy: &RetryPolicy,
) -> Result<String, BackendError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = BackendError::Unavailable("no attempt made".to_string());

    for attempt in 1..=max_attempts {
        let timeout = Duration::from_millis(policy.timeout_ms);
        let outcome = match tokio::time::timeout(timeout, backend.complete(prompt, schema_hint)).await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(BackendError::Timeout {
                timeout_ms: policy.timeout_ms,
            }),
        };

        match outcome {
            Ok(text) => return Ok(text),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => {
                warn!(attempt, max_attempts, error = %err, "reasoning backend call failed");
                last_error = err;
                if attempt < max_attempts {
                    let delay = policy.backoff_base_ms * 2u64.pow(attempt - 1);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }
    Err(last_error)
}

/// Pull the JSON document out of a completion that may wrap it in a fenced
/// code block or surrounding prose.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}
