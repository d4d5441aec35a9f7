//! Agent Forge core engine.
//!
//! A request is planned into capability-tagged steps, each step is routed to
//! a registered agent (or a freshly generated and validated one), and the
//! agents run behind the safety gate. Front ends talk to [`ForgeService`].
//!
//! ## Layers
//!
//! - `domain`: specs, plans, tasks, validation reports, errors
//! - `script`: the sandboxed language generated agents are written in
//! - `safety`, `tooling`: permission/rate/PII gate and the tool gateway
//! - `validator`, `registry`, `resolver`: candidate checks, versioned
//!   publication, capability lookup with single-flight generation
//! - `planner`, `orchestrator`, `service`: the task lifecycle

pub mod agents;
pub mod backend;
pub mod config;
pub mod domain;
pub mod memory;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod planner;
pub mod registry;
pub mod resolver;
pub mod safety;
pub mod script;
pub mod service;
mod sync;
pub mod task_store;
pub mod telemetry;
pub mod tooling;
pub mod validator;

pub use agents::{Agent, AgentContext, AgentError, AgentRuntime};
pub use backend::{
    BackendError, HttpBackend, HttpBackendConfig, ReasoningBackend, RetryPolicy, ScriptedBackend,
};
pub use config::ForgeConfig;
pub use domain::{
    AgentOrigin, AgentRef, AgentSpec, AgentStatus, CodeReference, ErrorKind, FieldType,
    ForgeError, JsonFieldSchema, Plan, PlanningError, Result, Step, StepResult, Task, TaskFailure,
    TaskId, TaskRequest, TaskStatus, ValidationReport, ValidationRule, Verdict, Violation,
};
pub use metrics::{MetricsSnapshot, METRICS};
pub use orchestrator::{CancelToken, OrchestratorConfig};
pub use registry::{AgentRecord, AgentRegistry};
pub use resolver::{AgentResolver, ResolverConfig};
pub use safety::{SafetyConfig, SafetyGate};
pub use service::{ForgeService, ForgeServiceBuilder, ForgeStats};
pub use telemetry::init_tracing;
pub use tooling::{ToolExecutionError, ToolGateway, ToolManifest, ToolManifestEntry};
pub use validator::{AgentCandidate, CodeValidator, ValidatorConfig};
