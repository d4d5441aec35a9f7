//! Process-wide atomic counters.
//!
//! Counters are bumped silently at the call site. [`Metrics::flush`] emits
//! the current values as one `tracing::info!` event; [`Metrics::snapshot`]
//! backs the stats endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

pub static METRICS: Metrics = Metrics::new();

/// Lock-free counters.
pub struct Metrics {
    tasks_submitted: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    agents_generated: AtomicU64,
    validations_failed: AtomicU64,
    gate_denials: AtomicU64,
    tool_invocations: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub agents_generated: u64,
    pub validations_failed: u64,
    pub gate_denials: u64,
    pub tool_invocations: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(metric = stringify!($field), "counter incremented");
        }

        pub fn $field(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            tasks_submitted: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            agents_generated: AtomicU64::new(0),
            validations_failed: AtomicU64::new(0),
            gate_denials: AtomicU64::new(0),
            tool_invocations: AtomicU64::new(0),
        }
    }

    counter!(inc_tasks_submitted, tasks_submitted);
    counter!(inc_tasks_completed, tasks_completed);
    counter!(inc_tasks_failed, tasks_failed);
    counter!(inc_agents_generated, agents_generated);
    counter!(inc_validations_failed, validations_failed);
    counter!(inc_gate_denials, gate_denials);
    counter!(inc_tool_invocations, tool_invocations);

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_submitted: self.tasks_submitted(),
            tasks_completed: self.tasks_completed(),
            tasks_failed: self.tasks_failed(),
            agents_generated: self.agents_generated(),
            validations_failed: self.validations_failed(),
            gate_denials: self.gate_denials(),
            tool_invocations: self.tool_invocations(),
        }
    }

    /// Emit all counters as a single `info!` event. Call at natural
    /// boundaries (task end, shutdown), not on every increment.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            tasks_submitted = s.tasks_submitted,
            tasks_completed = s.tasks_completed,
            tasks_failed = s.tasks_failed,
            agents_generated = s.agents_generated,
            validations_failed = s.validations_failed,
            gate_denials = s.gate_denials,
            tool_invocations = s.tool_invocations,
        );
    }

    /// Zero every counter (tests).
    pub fn reset(&self) {
        for counter in [
            &self.tasks_submitted,
            &self.tasks_completed,
            &self.tasks_failed,
            &self.agents_generated,
            &self.validations_failed,
            &self.gate_denials,
            &self.tool_invocations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
