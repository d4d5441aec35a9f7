//! Task: one user request and its progress through the orchestrator.

use std::collections::BTreeMap;
use std::error::Error as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::agent_spec::AgentRef;
use super::error::{ErrorKind, ForgeError, Result};
use super::plan::Plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        TaskId(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(TaskId)
            .map_err(|_| ForgeError::TaskNotFound(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Submitted,
    Planning,
    Resolving,
    Executing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Forward edges of the state machine. FAILED is reachable from every
    /// non-terminal state.
    pub fn can_transition_to(self, next: Self) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Submitted, Planning)
                | (Planning, Resolving)
                | (Resolving, Executing)
                | (Executing, Completed)
                | (Submitted | Planning | Resolving | Executing, Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Submitted => "SUBMITTED",
            Self::Planning => "PLANNING",
            Self::Resolving => "RESOLVING",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// What a caller submits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub raw_input: String,
    pub user_id: String,
    #[serde(default)]
    pub constraints: BTreeMap<String, Value>,
}

impl TaskRequest {
    pub fn new(raw_input: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            raw_input: raw_input.into(),
            user_id: user_id.into(),
            constraints: BTreeMap::new(),
        }
    }

    pub fn with_constraint(mut self, key: impl Into<String>, value: Value) -> Self {
        self.constraints.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub agent: AgentRef,
    pub output: Value,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Structured failure: outer kind and reason plus the inner cause chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: ErrorKind,
    pub reason: String,
    pub step_id: Option<String>,
    #[serde(default)]
    pub causes: Vec<String>,
}

impl TaskFailure {
    pub fn from_error(err: &ForgeError, step_id: Option<&str>) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            kind: err.kind(),
            reason: err.to_string(),
            step_id: step_id.map(str::to_string),
            causes,
        }
    }

    pub fn cancelled(step_id: Option<&str>) -> Self {
        Self::from_error(&ForgeError::Cancelled, step_id)
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.reason)?;
        if let Some(step) = &self.step_id {
            write!(f, " (step {step})")?;
        }
        Ok(())
    }
}

/// A request in flight. Only the orchestrator mutates it, and never after
/// it reaches COMPLETED or FAILED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub raw_input: String,
    pub user_id: String,
    pub constraints: BTreeMap<String, Value>,
    pub plan: Option<Plan>,
    /// Step id to the agent resolved for it.
    pub resolved_agents: BTreeMap<String, AgentRef>,
    pub step_results: Vec<StepResult>,
    pub(crate) status: TaskStatus,
    pub output: Option<Value>,
    pub failure: Option<TaskFailure>,
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: TaskId, request: TaskRequest) -> Self {
        let now = Utc::now();
        Self {
            id,
            raw_input: request.raw_input,
            user_id: request.user_id,
            constraints: request.constraints,
            plan: None,
            resolved_agents: BTreeMap::new(),
            step_results: Vec::new(),
            status: TaskStatus::Submitted,
            output: None,
            failure: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.is_terminal() {
            return Err(ForgeError::InvalidTransition {
                entity: format!("task {}", self.id),
                from: self.status.to_string(),
                to: "mutation".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ForgeError::InvalidTransition {
                entity: format!("task {}", self.id),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    pub(crate) fn set_plan(&mut self, plan: Plan) -> Result<()> {
        self.ensure_mutable()?;
        self.plan = Some(plan);
        Ok(())
    }

    pub(crate) fn resolve_step(&mut self, step_id: &str, agent: AgentRef) -> Result<()> {
        self.ensure_mutable()?;
        self.resolved_agents.insert(step_id.to_string(), agent);
        Ok(())
    }

    pub(crate) fn record_step(&mut self, result: StepResult) -> Result<()> {
        self.ensure_mutable()?;
        self.step_results.push(result);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub(crate) fn complete(&mut self, output: Value) -> Result<()> {
        self.ensure_mutable()?;
        self.output = Some(output);
        self.transition(TaskStatus::Completed)
    }

    pub(crate) fn fail(&mut self, failure: TaskFailure) -> Result<()> {
        self.ensure_mutable()?;
        self.failure = Some(failure);
        self.transition(TaskStatus::Failed)
    }

    pub(crate) fn request_cancel(&mut self) -> Result<()> {
        self.ensure_mutable()?;
        self.cancel_requested = true;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn step_output(&self, step_id: &str) -> Option<&Value> {
        self.step_results
            .iter()
            .find(|r| r.step_id == step_id)
            .map(|r| &r.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut task = Task::new(TaskId::new(), TaskRequest::new("hi", "u1"));
        task.transition(TaskStatus::Planning).unwrap();
        task.transition(TaskStatus::Resolving).unwrap();
        task.transition(TaskStatus::Executing).unwrap();
        task.complete(serde_json::json!({"ok": true})).unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn terminal_task_is_immutable() {
        let mut task = Task::new(TaskId::new(), TaskRequest::new("hi", "u1"));
        task.fail(TaskFailure::cancelled(None)).unwrap();
        assert!(task.transition(TaskStatus::Planning).is_err());
        assert!(task.complete(Value::Null).is_err());
        assert!(task.fail(TaskFailure::cancelled(None)).is_err());
        assert_eq!(task.failure.as_ref().unwrap().kind, ErrorKind::Cancelled);
    }

    #[test]
    fn cannot_skip_planning() {
        let mut task = Task::new(TaskId::new(), TaskRequest::new("hi", "u1"));
        assert!(task.transition(TaskStatus::Executing).is_err());
    }

    #[test]
    fn failure_collects_cause_chain() {
        use crate::agents::AgentError;
        use crate::tooling::ToolExecutionError;
        let err = ForgeError::Agent {
            agent: "calc".into(),
            source: AgentError::Tool(ToolExecutionError::Timeout {
                tool_name: "calculator".into(),
                timeout_ms: 10,
            }),
        };
        let failure = TaskFailure::from_error(&err, Some("s1"));
        assert_eq!(failure.kind, ErrorKind::ToolExecution);
        assert_eq!(failure.step_id.as_deref(), Some("s1"));
        assert!(!failure.causes.is_empty());
        assert!(failure.causes.iter().any(|c| c.contains("timed out")));
    }
}
