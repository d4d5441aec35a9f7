//! Agent specification and lifecycle status.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use forge_state::ContentDigest;
use serde::{Deserialize, Serialize};

use super::error::{ForgeError, Result};
use super::schema::JsonFieldSchema;

/// Lifecycle of a spec. Moves strictly forward one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Draft,
    Validated,
    Registered,
    Active,
    Deprecated,
}

impl AgentStatus {
    pub fn successor(self) -> Option<Self> {
        match self {
            Self::Draft => Some(Self::Validated),
            Self::Validated => Some(Self::Registered),
            Self::Registered => Some(Self::Active),
            Self::Active => Some(Self::Deprecated),
            Self::Deprecated => None,
        }
    }

    /// Registered or active: the name is claimed.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Registered | Self::Active)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "DRAFT",
            Self::Validated => "VALIDATED",
            Self::Registered => "REGISTERED",
            Self::Active => "ACTIVE",
            Self::Deprecated => "DEPRECATED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentOrigin {
    Builtin,
    Generated,
}

/// Where the executable body of an agent lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CodeReference {
    /// Compiled-in agent looked up by key.
    Builtin { key: String },
    /// Agent script stored in the source CAS.
    Script { digest: ContentDigest },
}

impl std::fmt::Display for CodeReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builtin { key } => write!(f, "builtin:{key}"),
            Self::Script { digest } => write!(f, "script:{}", digest.short()),
        }
    }
}

/// `name@vN` handle recorded against executed steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentRef {
    pub name: String,
    pub version: u64,
}

impl std::fmt::Display for AgentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@v{}", self.name, self.version)
    }
}

/// Versioned description of an executable agent.
///
/// `version`, `status` and `activated_at` are only written by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub capabilities: BTreeSet<String>,
    /// Declared tool-call surface.
    #[serde(default)]
    pub tools: BTreeSet<String>,
    pub input_schema: JsonFieldSchema,
    pub output_schema: JsonFieldSchema,
    pub code_reference: CodeReference,
    pub(crate) version: u64,
    pub(crate) status: AgentStatus,
    pub created_by: AgentOrigin,
    pub created_at: DateTime<Utc>,
    pub(crate) activated_at: Option<DateTime<Utc>>,
}

impl AgentSpec {
    /// New DRAFT spec. Name and capability set must be non-empty.
    pub fn draft<I, S>(
        name: impl Into<String>,
        capabilities: I,
        code_reference: CodeReference,
        created_by: AgentOrigin,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ForgeError::InvalidAgentSpec(
                "name cannot be empty".to_string(),
            ));
        }
        let capabilities: BTreeSet<String> = capabilities
            .into_iter()
            .map(Into::into)
            .map(|c: String| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        if capabilities.is_empty() {
            return Err(ForgeError::InvalidAgentSpec(format!(
                "agent '{name}' declares no capabilities"
            )));
        }
        Ok(Self {
            name,
            description: String::new(),
            capabilities,
            tools: BTreeSet::new(),
            input_schema: JsonFieldSchema::default(),
            output_schema: JsonFieldSchema::default(),
            code_reference,
            version: 0,
            status: AgentStatus::Draft,
            created_by,
            created_at: Utc::now(),
            activated_at: None,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_schemas(mut self, input: JsonFieldSchema, output: JsonFieldSchema) -> Self {
        self.input_schema = input;
        self.output_schema = output;
        self
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn activated_at(&self) -> Option<DateTime<Utc>> {
        self.activated_at
    }

    pub fn agent_ref(&self) -> AgentRef {
        AgentRef {
            name: self.name.clone(),
            version: self.version,
        }
    }

    /// Capability superset test used by lookup.
    pub fn covers(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }

    /// Advance exactly one lifecycle step.
    pub(crate) fn advance(&mut self, next: AgentStatus) -> Result<()> {
        if self.status.successor() != Some(next) {
            return Err(ForgeError::InvalidTransition {
                entity: format!("agent '{}'", self.name),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next == AgentStatus::Active {
            self.activated_at = Some(Utc::now());
        }
        Ok(())
    }
}
