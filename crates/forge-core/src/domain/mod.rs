//! Domain models for Agent Forge.
//!
//! Canonical definitions for the core entities:
//! - `AgentSpec`: versioned description of an executable agent
//! - `Plan` / `Step`: capability-tagged DAG produced by the planner
//! - `Task`: one user request moving through the orchestrator state machine
//! - `ValidationReport`: verdict of the code validator on a generated agent

pub mod agent_spec;
pub mod error;
pub mod plan;
pub mod schema;
pub mod task;
pub mod validation;

pub use agent_spec::{AgentOrigin, AgentRef, AgentSpec, AgentStatus, CodeReference};
pub use error::{ErrorKind, ForgeError, Result};
pub use plan::{Plan, PlanningError, Step};
pub use schema::{FieldType, JsonFieldSchema, SchemaViolation};
pub use task::{StepResult, Task, TaskFailure, TaskId, TaskRequest, TaskStatus};
pub use validation::{ValidationReport, ValidationRule, Verdict, Violation};
