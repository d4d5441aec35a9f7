//! Task state machine.
//!
//! SUBMITTED → PLANNING → RESOLVING → EXECUTING → COMPLETED, with FAILED
//! reachable from every non-terminal state. Every step is resolved before
//! any step executes. Steps run one at a time in topological order; each
//! receives the outputs of the steps it depends on. The task document is
//! persisted after every transition and every finished step.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{instrument, Instrument};

use crate::agents::{Agent, AgentContext, AgentError, AgentRuntime};
use crate::domain::{
    AgentSpec, ForgeError, Result, Step, StepResult, Task, TaskFailure, TaskStatus,
};
use crate::memory::ContextEnricher;
use crate::metrics::METRICS;
use crate::obs;
use crate::planner::{Planner, PlanningHints};
use crate::registry::AgentRegistry;
use crate::resolver::{AgentResolver, GenerationBrief};
use crate::safety::{agent_action, SafetyGate};
use crate::task_store::TaskStore;
use crate::tooling::ToolGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Wall-clock limit for one agent execution.
    pub step_timeout_ms: u64,
    /// Extra attempts for a step whose failure is retryable.
    pub step_retry_budget: u32,
    pub retry_backoff_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: 30_000,
            step_retry_budget: 1,
            retry_backoff_ms: 100,
        }
    }
}

/// Cooperative cancellation, checked between resolutions and between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything the orchestrator drives.
pub struct Orchestrator {
    planner: Planner,
    resolver: Arc<AgentResolver>,
    registry: Arc<AgentRegistry>,
    runtime: Arc<AgentRuntime>,
    gateway: Arc<ToolGateway>,
    gate: Arc<SafetyGate>,
    tasks: TaskStore,
    enricher: Arc<ContextEnricher>,
    config: OrchestratorConfig,
}

/// Where a run stopped and why.
struct Halt {
    error: ForgeError,
    step_id: Option<String>,
}

impl Halt {
    fn at(step_id: &str) -> impl FnOnce(ForgeError) -> Halt + '_ {
        move |error| Halt {
            error,
            step_id: Some(step_id.to_string()),
        }
    }
}

impl From<ForgeError> for Halt {
    fn from(error: ForgeError) -> Self {
        Halt {
            error,
            step_id: None,
        }
    }
}

/// Agent input: the step params hoisted to the top level, then the reserved
/// `task`, `instruction`, `params` and `dependencies` keys.
pub fn step_input(task: &Task, step: &Step) -> Value {
    let mut input = Map::new();
    if let Value::Object(params) = &step.params {
        for (k, v) in params {
            input.insert(k.clone(), v.clone());
        }
    }
    let dependencies: Map<String, Value> = step
        .depends_on
        .iter()
        .filter_map(|dep| task.step_output(dep).map(|out| (dep.clone(), out.clone())))
        .collect();
    input.insert("task".into(), Value::String(task.raw_input.clone()));
    input.insert("instruction".into(), Value::String(step.description.clone()));
    input.insert("params".into(), step.params.clone());
    input.insert("dependencies".into(), Value::Object(dependencies));
    Value::Object(input)
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        planner: Planner,
        resolver: Arc<AgentResolver>,
        registry: Arc<AgentRegistry>,
        runtime: Arc<AgentRuntime>,
        gateway: Arc<ToolGateway>,
        gate: Arc<SafetyGate>,
        tasks: TaskStore,
        enricher: Arc<ContextEnricher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            planner,
            resolver,
            registry,
            runtime,
            gateway,
            gate,
            tasks,
            enricher,
            config,
        }
    }

    /// Drive `task` to a terminal state and return it. Errors are recorded
    /// on the task, never returned; only persistence failures of the final
    /// document are logged and swallowed.
    pub async fn run(&self, task: Task, cancel: CancelToken) -> Task {
        let span = obs::task_span(&task.id);
        self.run_inner(task, cancel).instrument(span).await
    }

    async fn run_inner(&self, mut task: Task, cancel: CancelToken) -> Task {
        let started = Instant::now();
        let outcome = self.drive(&mut task, &cancel).await;

        if let Err(halt) = outcome {
            let failure = if matches!(halt.error, ForgeError::Cancelled) {
                let _ = task.request_cancel();
                TaskFailure::cancelled(halt.step_id.as_deref())
            } else {
                TaskFailure::from_error(&halt.error, halt.step_id.as_deref())
            };
            let from = task.status();
            if task.fail(failure).is_ok() {
                obs::emit_task_transition(&task.id, from, TaskStatus::Failed);
            }
        }

        if let Err(e) = self.tasks.save(&task).await {
            obs::emit_degraded("task_store", &e);
        }
        match task.status() {
            TaskStatus::Completed => {
                METRICS.inc_tasks_completed();
                self.enricher.remember_task(&task).await;
            }
            _ => METRICS.inc_tasks_failed(),
        }
        let elapsed_ms = started.elapsed().as_millis() as u64;
        obs::emit_task_finished(&task.id, elapsed_ms, task.failure.as_ref());
        task
    }

    async fn transition(
        &self,
        task: &mut Task,
        next: TaskStatus,
    ) -> std::result::Result<(), Halt> {
        let from = task.status();
        task.transition(next)?;
        obs::emit_task_transition(&task.id, from, next);
        self.tasks.save(task).await?;
        Ok(())
    }

    fn check_cancel(cancel: &CancelToken, step_id: Option<&str>) -> std::result::Result<(), Halt> {
        if cancel.is_cancelled() {
            return Err(Halt {
                error: ForgeError::Cancelled,
                step_id: step_id.map(str::to_string),
            });
        }
        Ok(())
    }

    async fn drive(
        &self,
        task: &mut Task,
        cancel: &CancelToken,
    ) -> std::result::Result<(), Halt> {
        self.tasks.save(task).await?;
        Self::check_cancel(cancel, None)?;

        self.transition(task, TaskStatus::Planning).await?;
        let hints = PlanningHints {
            vocabulary: self.registry.capability_vocabulary().await?,
            context: self.enricher.context_for(&task.raw_input).await,
        };
        let plan = self
            .planner
            .plan(&task.raw_input, &task.constraints, &hints)
            .await
            .map_err(ForgeError::from)?;
        task.set_plan(plan.clone())?;

        self.transition(task, TaskStatus::Resolving).await?;
        let order: Vec<Step> = plan.execution_order().into_iter().cloned().collect();
        let mut resolved: BTreeMap<String, AgentSpec> = BTreeMap::new();
        for step in &order {
            Self::check_cancel(cancel, Some(&step.id))?;
            let brief = GenerationBrief {
                instruction: step.description.clone(),
                input_schema: step.input_schema.clone(),
            };
            let resolution = self
                .resolver
                .resolve(&step.required_capabilities, &brief)
                .await
                .map_err(Halt::at(&step.id))?;
            task.resolve_step(&step.id, resolution.spec.agent_ref())?;
            resolved.insert(step.id.clone(), resolution.spec);
        }

        self.transition(task, TaskStatus::Executing).await?;
        let mut last_output = Value::Null;
        for step in &order {
            Self::check_cancel(cancel, Some(&step.id))?;
            let spec = resolved.get(&step.id).ok_or_else(|| Halt {
                error: ForgeError::InvalidAgentSpec(format!("step '{}' has no agent", step.id)),
                step_id: Some(step.id.clone()),
            })?;
            let result = self
                .execute_step(task, step, spec)
                .await
                .map_err(Halt::at(&step.id))?;
            obs::emit_step_finished(&task.id, &step.id, &result.agent, result.attempts);
            last_output = result.output.clone();
            task.record_step(result)?;
            self.tasks.save(task).await?;
        }

        let from = task.status();
        task.complete(last_output)?;
        obs::emit_task_transition(&task.id, from, TaskStatus::Completed);
        Ok(())
    }

    #[instrument(skip_all, fields(step = %step.id, agent = %spec.name))]
    async fn execute_step(
        &self,
        task: &Task,
        step: &Step,
        spec: &AgentSpec,
    ) -> Result<StepResult> {
        let agent = self.runtime.instantiate(spec).await?;
        let ctx = AgentContext::new(
            task.id,
            task.user_id.clone(),
            step.id.clone(),
            self.gateway.clone(),
        );
        let base_input = step_input(task, step);
        let action = agent_action(&spec.name);
        let max_attempts = self.config.step_retry_budget + 1;
        let timeout_ms = self.config.step_timeout_ms;
        let started_at = Utc::now();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let input = self
                .gate
                .authorize(&task.user_id, &action, &base_input)
                .into_payload(base_input.clone())?;

            let outcome = match tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                self.run_agent(agent.as_ref(), spec, input, &ctx),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(AgentError::Timeout { ms: timeout_ms }),
            };

            match outcome {
                Ok(output) => {
                    return Ok(StepResult {
                        step_id: step.id.clone(),
                        agent: spec.agent_ref(),
                        output,
                        attempts: attempt,
                        started_at,
                        completed_at: Utc::now(),
                    })
                }
                Err(source) => {
                    let err = ForgeError::Agent {
                        agent: spec.name.clone(),
                        source,
                    };
                    if !err.is_retryable() || attempt >= max_attempts {
                        return Err(err);
                    }
                    obs::emit_step_retry(&task.id, &step.id, attempt, &err);
                    let backoff = self.config.retry_backoff_ms * u64::from(attempt);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
    }

    /// Execute with the agent's declared input and output contracts enforced.
    async fn run_agent(
        &self,
        agent: &dyn Agent,
        spec: &AgentSpec,
        input: Value,
        ctx: &AgentContext,
    ) -> std::result::Result<Value, AgentError> {
        spec.input_schema
            .validate(&input)
            .map_err(|v| AgentError::InvalidInput(v.to_string()))?;
        let output = agent.execute(input, ctx).await?;
        spec.output_schema.validate(&output).map_err(|v| {
            AgentError::Failed(format!("output does not match declared schema: {v}"))
        })?;
        Ok(output)
    }
}
