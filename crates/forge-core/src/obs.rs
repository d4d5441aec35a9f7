//! Structured lifecycle events.
//!
//! Every event carries an `event` field (`task.submitted`, `gate.denied`,
//! ...) so log pipelines can filter on it. [`TaskSpan`] tags everything
//! logged while a task runs with its id.

use tracing::{info, warn};

use crate::domain::{AgentRef, TaskFailure, TaskId, TaskStatus, ValidationReport};
use crate::safety::Denial;
use crate::tooling::ToolExecutionError;

/// RAII guard entering a task-scoped span.
pub struct TaskSpan {
    _span: tracing::span::EnteredSpan,
}

impl TaskSpan {
    pub fn enter(task_id: &TaskId) -> Self {
        let span = tracing::info_span!("forge.task", task_id = %task_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// The span itself, for attaching to futures with `Instrument`.
pub fn task_span(task_id: &TaskId) -> tracing::Span {
    tracing::info_span!("forge.task", task_id = %task_id)
}

pub fn emit_task_submitted(task_id: &TaskId, user_id: &str) {
    info!(event = "task.submitted", task_id = %task_id, user_id = %user_id);
}

pub fn emit_task_transition(task_id: &TaskId, from: TaskStatus, to: TaskStatus) {
    info!(event = "task.transition", task_id = %task_id, from = %from, to = %to);
}

pub fn emit_step_finished(task_id: &TaskId, step_id: &str, agent: &AgentRef, attempts: u32) {
    info!(
        event = "step.finished",
        task_id = %task_id,
        step_id = %step_id,
        agent = %agent,
        attempts = attempts,
    );
}

pub fn emit_step_retry(task_id: &TaskId, step_id: &str, attempt: u32, error: &dyn std::fmt::Display) {
    warn!(
        event = "step.retry",
        task_id = %task_id,
        step_id = %step_id,
        attempt = attempt,
        error = %error,
    );
}

pub fn emit_task_finished(task_id: &TaskId, duration_ms: u64, failure: Option<&TaskFailure>) {
    match failure {
        None => info!(
            event = "task.finished",
            task_id = %task_id,
            duration_ms = duration_ms,
            success = true,
        ),
        Some(f) => warn!(
            event = "task.finished",
            task_id = %task_id,
            duration_ms = duration_ms,
            success = false,
            kind = %f.kind,
            reason = %f.reason,
        ),
    }
}

pub fn emit_agent_resolved(capabilities: &str, agent: &AgentRef, generated: bool) {
    info!(
        event = "agent.resolved",
        capabilities = %capabilities,
        agent = %agent,
        generated = generated,
    );
}

pub fn emit_agent_published(agent: &AgentRef, superseded: Option<u64>) {
    info!(event = "agent.published", agent = %agent, superseded = ?superseded);
}

pub fn emit_agent_deprecated(agent: &AgentRef) {
    info!(event = "agent.deprecated", agent = %agent);
}

pub fn emit_generation_attempt(capabilities: &str, attempt: u32, max_attempts: u32) {
    info!(
        event = "generation.attempt",
        capabilities = %capabilities,
        attempt = attempt,
        max_attempts = max_attempts,
    );
}

pub fn emit_validation_finished(report: &ValidationReport) {
    if report.passed() {
        info!(event = "validation.finished", agent = %report.agent_name, passed = true);
    } else {
        warn!(
            event = "validation.finished",
            agent = %report.agent_name,
            passed = false,
            violations = report.violations.len(),
            summary = %report.summary(),
        );
    }
}

pub fn emit_gate_denied(subject: &str, action: &str, denial: &Denial) {
    warn!(
        event = "gate.denied",
        subject = %subject,
        action = %action,
        kind = %denial.kind(),
        reason = %denial,
    );
}

pub fn emit_payload_redacted(subject: &str, action: &str) {
    info!(event = "gate.redacted", subject = %subject, action = %action);
}

pub fn emit_tool_invoked(
    task_id: Option<&TaskId>,
    tool_name: &str,
    elapsed_ms: u64,
    error: Option<&ToolExecutionError>,
) {
    let task = task_id.map(ToString::to_string).unwrap_or_default();
    match error {
        None => info!(
            event = "tool.invoked",
            task_id = %task,
            tool = %tool_name,
            elapsed_ms = elapsed_ms,
            success = true,
        ),
        Some(e) => warn!(
            event = "tool.invoked",
            task_id = %task,
            tool = %tool_name,
            elapsed_ms = elapsed_ms,
            success = false,
            error = %e,
        ),
    }
}

/// Non-fatal degradation (memory store unavailable and similar).
pub fn emit_degraded(component: &str, error: &dyn std::fmt::Display) {
    warn!(event = "component.degraded", component = %component, error = %error);
}
