//! Executable agents.
//!
//! An [`Agent`] is built from an [`AgentSpec`]'s code reference: builtin
//! keys map to compiled-in agents, script digests to [`ScriptAgent`]s loaded
//! from the source store. Dispatch is by capability match in the resolver,
//! never by concrete type.

pub mod builtin;
mod script_agent;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use forge_state::{CasStore, ContentDigest};
use serde_json::Value;
use thiserror::Error;

use crate::backend::BackendError;
use crate::domain::{AgentSpec, CodeReference, ErrorKind, ForgeError, TaskId};
use crate::script::{ast::Program, parse_program, Limits, ScriptError};
use crate::tooling::{InvocationContext, ToolExecutionError, ToolGateway};

pub use script_agent::ScriptAgent;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Tool(#[from] ToolExecutionError),

    /// The reasoning backend failed after its own retry policy ran out.
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Failed(String),

    #[error("script error: {0}")]
    Script(ScriptError),

    #[error("agent timed out after {ms}ms")]
    Timeout { ms: u64 },
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Tool(e) => e.kind(),
            Self::Backend(e) => e.kind(),
            _ => ErrorKind::AgentExecution,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Tool(e) => e.is_retryable(),
            Self::Timeout { .. } => true,
            Self::Backend(_) | Self::InvalidInput(_) | Self::Failed(_) | Self::Script(_) => false,
        }
    }
}

/// What an executing agent can reach: its tools, scoped to the caller.
#[derive(Clone)]
pub struct AgentContext {
    pub task_id: TaskId,
    pub user_id: String,
    pub step_id: String,
    tools: Arc<ToolGateway>,
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("task_id", &self.task_id)
            .field("user_id", &self.user_id)
            .field("step_id", &self.step_id)
            .finish()
    }
}

impl AgentContext {
    pub fn new(
        task_id: TaskId,
        user_id: impl Into<String>,
        step_id: impl Into<String>,
        tools: Arc<ToolGateway>,
    ) -> Self {
        Self {
            task_id,
            user_id: user_id.into(),
            step_id: step_id.into(),
            tools,
        }
    }

    pub fn invocation(&self) -> InvocationContext {
        InvocationContext::new(self.user_id.clone()).for_task(self.task_id)
    }

    pub fn gateway(&self) -> &Arc<ToolGateway> {
        &self.tools
    }

    pub async fn call_tool(&self, tool_name: &str, args: Value) -> Result<Value, AgentError> {
        Ok(self.tools.invoke(&self.invocation(), tool_name, args).await?)
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    async fn execute(&self, input: Value, ctx: &AgentContext) -> Result<Value, AgentError>;
}

/// Builds agents from code references. Parsed scripts are cached by digest.
pub struct AgentRuntime {
    builtins: HashMap<String, Arc<dyn Agent>>,
    sources: Arc<dyn CasStore>,
    limits: Limits,
    programs: Mutex<HashMap<ContentDigest, Arc<Program>>>,
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.builtins.keys().collect();
        keys.sort();
        f.debug_struct("AgentRuntime")
            .field("builtins", &keys)
            .field("limits", &self.limits)
            .finish()
    }
}

impl AgentRuntime {
    pub fn new(sources: Arc<dyn CasStore>, limits: Limits) -> Self {
        Self {
            builtins: HashMap::new(),
            sources,
            limits,
            programs: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_builtin(&mut self, key: impl Into<String>, agent: Arc<dyn Agent>) {
        self.builtins.insert(key.into(), agent);
    }

    pub fn has_builtin(&self, key: &str) -> bool {
        self.builtins.contains_key(key)
    }

    pub fn sources(&self) -> &Arc<dyn CasStore> {
        &self.sources
    }

    pub async fn instantiate(&self, spec: &AgentSpec) -> Result<Arc<dyn Agent>, ForgeError> {
        match &spec.code_reference {
            CodeReference::Builtin { key } => self
                .builtins
                .get(key)
                .cloned()
                .ok_or_else(|| ForgeError::InvalidAgentSpec(format!("unknown builtin '{key}'"))),
            CodeReference::Script { digest } => {
                let program = self.program(digest).await?;
                Ok(Arc::new(ScriptAgent::new(spec.name.clone(), program, self.limits)))
            }
        }
    }

    async fn program(&self, digest: &ContentDigest) -> Result<Arc<Program>, ForgeError> {
        if let Some(p) = self.cached(digest) {
            return Ok(p);
        }
        let bytes = self.sources.get(digest).await?;
        let source = String::from_utf8(bytes).map_err(|_| {
            ForgeError::InvalidAgentSpec(format!("source {} is not UTF-8", digest.short()))
        })?;
        let program = Arc::new(parse_program(&source).map_err(|e| {
            ForgeError::InvalidAgentSpec(format!("source {}: {e}", digest.short()))
        })?);
        self.programs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(digest.clone(), program.clone());
        Ok(program)
    }

    fn cached(&self, digest: &ContentDigest) -> Option<Arc<Program>> {
        self.programs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(digest)
            .cloned()
    }
}
