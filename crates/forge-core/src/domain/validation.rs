//! Validation report produced by the code validator.

use chrono::{DateTime, Utc};
use forge_state::ContentDigest;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Fail,
}

/// Stable rule identifiers. The static layer emits the first group, the
/// dynamic layer the second, the resolver the last two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationRule {
    ParseError,
    DisallowedFilesystem,
    DisallowedNetwork,
    DisallowedProcess,
    DisallowedReflection,
    Recursion,
    UndeclaredTool,
    DynamicToolName,
    UnknownTool,
    UnknownFunction,
    ArityMismatch,
    DuplicateFunction,
    MissingOperation,
    SignatureMismatch,

    DeclarationMismatch,
    SandboxException,
    SandboxTimeout,
    ResourceLimit,
    OutputSchemaMismatch,

    CapabilityGap,
    MalformedCandidate,
}

impl ValidationRule {
    pub fn id(&self) -> &'static str {
        match self {
            Self::ParseError => "parse-error",
            Self::DisallowedFilesystem => "disallowed-filesystem",
            Self::DisallowedNetwork => "disallowed-network",
            Self::DisallowedProcess => "disallowed-process",
            Self::DisallowedReflection => "disallowed-reflection",
            Self::Recursion => "recursion",
            Self::UndeclaredTool => "undeclared-tool",
            Self::DynamicToolName => "dynamic-tool-name",
            Self::UnknownTool => "unknown-tool",
            Self::UnknownFunction => "unknown-function",
            Self::ArityMismatch => "arity-mismatch",
            Self::DuplicateFunction => "duplicate-function",
            Self::MissingOperation => "missing-operation",
            Self::SignatureMismatch => "signature-mismatch",
            Self::DeclarationMismatch => "declaration-mismatch",
            Self::SandboxException => "sandbox-exception",
            Self::SandboxTimeout => "sandbox-timeout",
            Self::ResourceLimit => "resource-limit",
            Self::OutputSchemaMismatch => "output-schema-mismatch",
            Self::CapabilityGap => "capability-gap",
            Self::MalformedCandidate => "malformed-candidate",
        }
    }
}

impl std::fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: ValidationRule,
    pub detail: String,
}

impl Violation {
    pub fn new(rule: ValidationRule, detail: impl Into<String>) -> Self {
        Self {
            rule,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.rule, self.detail)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub agent_name: String,
    pub verdict: Verdict,
    pub violations: Vec<Violation>,
    pub source_digest: Option<ContentDigest>,
    pub validated_at: DateTime<Utc>,
}

impl ValidationReport {
    /// PASS exactly when `violations` is empty.
    pub fn from_violations(
        agent_name: impl Into<String>,
        source_digest: Option<ContentDigest>,
        violations: Vec<Violation>,
    ) -> Self {
        let verdict = if violations.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Fail
        };
        Self {
            agent_name: agent_name.into(),
            verdict,
            violations,
            source_digest,
            validated_at: Utc::now(),
        }
    }

    /// Admission record for compiled-in agents.
    pub fn builtin(agent_name: impl Into<String>) -> Self {
        Self::from_violations(agent_name, None, Vec::new())
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// One line per violation, joined with `; `.
    pub fn summary(&self) -> String {
        if self.violations.is_empty() {
            return "no violations".to_string();
        }
        self.violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Same verdict and violation list, ignoring timestamps.
    pub fn same_outcome(&self, other: &Self) -> bool {
        self.verdict == other.verdict && self.violations == other.violations
    }
}
