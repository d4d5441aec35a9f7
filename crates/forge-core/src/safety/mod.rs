//! Safety gate: permission, rate limit and PII checks in front of every
//! tool and agent invocation.
//!
//! Checks run in a fixed order and the first failure decides:
//! 1. permission rules (first match wins, default deny)
//! 2. rate windows for the subject and any extra keys (all or nothing)
//! 3. PII scan, which denies for strict actions and redacts otherwise

pub mod permission;
pub mod pii;
pub mod rate;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{ErrorKind, ForgeError};
use crate::metrics::METRICS;
use crate::obs;

pub use permission::{glob_match, Effect, PermissionPolicy, PermissionRule};
pub use pii::{PiiFindings, PiiPattern, PiiScanner};
pub use rate::{RateExceeded, RateKey, RateLimiter, RateWindow};

/// Action string for invoking a tool.
pub fn tool_action(tool_name: &str) -> String {
    format!("tool:{tool_name}")
}

/// Action string for executing an agent.
pub fn agent_action(agent_name: &str) -> String {
    format!("agent:{agent_name}")
}

/// Why the gate refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Denial {
    #[error("permission denied for '{subject}' on '{action}': {reason}")]
    Permission {
        subject: String,
        action: String,
        reason: String,
    },

    #[error("rate limit exceeded for '{subject}' (ceiling {ceiling}), retry in {retry_after_secs}s")]
    RateLimited {
        subject: String,
        ceiling: u32,
        retry_after_secs: u64,
    },

    #[error("PII detected for '{action}': {}", patterns.join(", "))]
    Pii {
        action: String,
        patterns: Vec<String>,
    },
}

impl Denial {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Permission { .. } => ErrorKind::PermissionDenied,
            Self::RateLimited { .. } => ErrorKind::RateLimitExceeded,
            Self::Pii { .. } => ErrorKind::PiiViolation,
        }
    }
}

/// Outcome of [`SafetyGate::authorize`].
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow,
    Deny(Denial),
    /// Allowed, but the caller must forward this payload instead.
    AllowRedacted(Value),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Deny(_))
    }

    /// The payload to forward, or the denial.
    pub fn into_payload(self, original: Value) -> Result<Value, Denial> {
        match self {
            Self::Allow => Ok(original),
            Self::AllowRedacted(redacted) => Ok(redacted),
            Self::Deny(denial) => Err(denial),
        }
    }
}

/// Gate configuration, usually the `[safety]` table of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub permissions: Vec<PermissionRule>,
    /// Requests per window for each subject.
    pub subject_rate_limit: u32,
    pub rate_window_secs: u64,
    /// Action patterns where a PII hit denies instead of redacting.
    pub strict_actions: Vec<String>,
    pub pii_patterns: Vec<PiiPattern>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            permissions: PermissionPolicy::default_rules(),
            subject_rate_limit: 60,
            rate_window_secs: 60,
            strict_actions: Vec::new(),
            pii_patterns: PiiPattern::defaults(),
        }
    }
}

#[derive(Debug)]
pub struct SafetyGate {
    permissions: PermissionPolicy,
    limiter: RateLimiter,
    pii: PiiScanner,
    strict_actions: Vec<String>,
    subject_ceiling: u32,
}

impl SafetyGate {
    pub fn new(config: &SafetyConfig) -> Result<Self, ForgeError> {
        Ok(Self {
            permissions: PermissionPolicy::new(config.permissions.clone()),
            limiter: RateLimiter::new(config.rate_window_secs),
            pii: PiiScanner::new(config.pii_patterns.clone())?,
            strict_actions: config.strict_actions.clone(),
            subject_ceiling: config.subject_rate_limit,
        })
    }

    pub fn authorize(&self, subject: &str, action: &str, payload: &Value) -> Decision {
        self.authorize_at(subject, action, payload, &[], Utc::now())
    }

    /// Like [`authorize`](Self::authorize), also counting against `extra`
    /// windows (a tool's own ceiling, for instance).
    pub fn authorize_with_limits(
        &self,
        subject: &str,
        action: &str,
        payload: &Value,
        extra: &[RateKey],
    ) -> Decision {
        self.authorize_at(subject, action, payload, extra, Utc::now())
    }

    pub fn authorize_at(
        &self,
        subject: &str,
        action: &str,
        payload: &Value,
        extra: &[RateKey],
        now: DateTime<Utc>,
    ) -> Decision {
        let decision = self.decide(subject, action, payload, extra, now);
        match &decision {
            Decision::Deny(denial) => {
                METRICS.inc_gate_denials();
                obs::emit_gate_denied(subject, action, denial);
            }
            Decision::AllowRedacted(_) => obs::emit_payload_redacted(subject, action),
            Decision::Allow => {}
        }
        decision
    }

    fn decide(
        &self,
        subject: &str,
        action: &str,
        payload: &Value,
        extra: &[RateKey],
        now: DateTime<Utc>,
    ) -> Decision {
        if let Err(reason) = self.permissions.evaluate(subject, action) {
            return Decision::Deny(Denial::Permission {
                subject: subject.to_string(),
                action: action.to_string(),
                reason,
            });
        }

        let mut keys = Vec::with_capacity(extra.len() + 1);
        keys.push(RateKey::new(format!("user:{subject}"), self.subject_ceiling));
        keys.extend_from_slice(extra);
        if let Err(exceeded) = self.limiter.try_acquire_at(&keys, now) {
            return Decision::Deny(Denial::RateLimited {
                subject: exceeded.subject_key,
                ceiling: exceeded.ceiling,
                retry_after_secs: exceeded.retry_after_secs,
            });
        }

        match self.pii.scan(payload) {
            None => Decision::Allow,
            Some(findings) if self.is_strict(action) => Decision::Deny(Denial::Pii {
                action: action.to_string(),
                patterns: findings.patterns,
            }),
            Some(findings) => Decision::AllowRedacted(findings.redacted),
        }
    }

    fn is_strict(&self, action: &str) -> bool {
        self.strict_actions.iter().any(|p| glob_match(p, action))
    }

    pub fn rate_window(&self, key: &str) -> Option<RateWindow> {
        self.limiter.window(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gate(config: SafetyConfig) -> SafetyGate {
        SafetyGate::new(&config).unwrap()
    }

    #[test]
    fn default_gate_allows_clean_tool_call() {
        let g = gate(SafetyConfig::default());
        let d = g.authorize("alice", &tool_action("calculator"), &json!({"expression": "1+1"}));
        assert_eq!(d, Decision::Allow);
    }

    #[test]
    fn permission_checked_before_rate_limit() {
        let g = gate(SafetyConfig {
            permissions: vec![],
            subject_rate_limit: 1,
            ..SafetyConfig::default()
        });
        for _ in 0..3 {
            let d = g.authorize("alice", "tool:x", &json!({}));
            assert!(matches!(d, Decision::Deny(Denial::Permission { .. })));
        }
        // Denied requests never touched the window.
        assert!(g.rate_window("user:alice").is_none());
    }

    #[test]
    fn rate_limit_applies_per_subject() {
        let g = gate(SafetyConfig {
            subject_rate_limit: 2,
            ..SafetyConfig::default()
        });
        assert!(g.authorize("a", "agent:calc", &json!({})).is_allowed());
        assert!(g.authorize("a", "agent:calc", &json!({})).is_allowed());
        let d = g.authorize("a", "agent:calc", &json!({}));
        match d {
            Decision::Deny(Denial::RateLimited { subject, ceiling, .. }) => {
                assert_eq!(subject, "user:a");
                assert_eq!(ceiling, 2);
            }
            other => panic!("expected rate limit denial, got {other:?}"),
        }
        assert!(g.authorize("b", "agent:calc", &json!({})).is_allowed());
    }

    #[test]
    fn pii_redacts_unless_action_is_strict() {
        let g = gate(SafetyConfig {
            strict_actions: vec!["tool:web_*".into()],
            ..SafetyConfig::default()
        });
        let payload = json!({"text": "reach me at eve@example.com"});

        let d = g.authorize("u", "agent:summarizer", &payload);
        let forwarded = d.into_payload(payload.clone()).unwrap();
        assert_eq!(forwarded["text"], "reach me at [REDACTED:email]");

        let d = g.authorize("u", "tool:web_search", &payload);
        let denial = d.into_payload(payload).unwrap_err();
        assert_eq!(denial.kind(), ErrorKind::PiiViolation);
    }

    #[test]
    fn extra_windows_count_together_with_subject() {
        let g = gate(SafetyConfig::default());
        let tool_key = [RateKey::new("tool:calculator", 1)];
        let now = Utc::now();
        assert!(g
            .authorize_at("a", "tool:calculator", &json!({}), &tool_key, now)
            .is_allowed());
        let d = g.authorize_at("b", "tool:calculator", &json!({}), &tool_key, now);
        assert!(matches!(d, Decision::Deny(Denial::RateLimited { ref subject, .. }) if subject == "tool:calculator"));
        assert_eq!(g.rate_window("user:b").unwrap().count, 0);
    }
}
