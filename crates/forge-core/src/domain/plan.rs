//! Plan DAG: capability-tagged steps with dependencies.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::schema::JsonFieldSchema;
use crate::backend::BackendError;

/// One unit of work in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "capabilities")]
    pub required_capabilities: BTreeSet<String>,
    #[serde(default)]
    pub input_schema: JsonFieldSchema,
    /// Planner-supplied arguments handed to the agent as `params`.
    #[serde(default = "empty_object")]
    pub params: Value,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl Step {
    pub fn new<I, S>(id: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            description: String::new(),
            required_capabilities: capabilities.into_iter().map(Into::into).collect(),
            input_schema: JsonFieldSchema::default(),
            params: empty_object(),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }
}

/// Errors raised while producing or checking a plan.
#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    #[error("reasoning backend failed while planning: {0}")]
    Backend(#[from] BackendError),

    #[error("planner output is malformed: {0}")]
    Malformed(String),

    #[error("plan contains no steps")]
    Empty,

    #[error("duplicate step id '{step_id}'")]
    DuplicateStep { step_id: String },

    #[error("step '{step_id}' declares no capabilities")]
    EmptyCapabilities { step_id: String },

    #[error("step '{step_id}' depends on itself")]
    SelfDependency { step_id: String },

    #[error("step '{step_id}' has missing dependency '{missing_dependency}'")]
    MissingDependency {
        step_id: String,
        missing_dependency: String,
    },

    #[error("dependency cycle detected in plan")]
    CycleDetected,
}

/// Ordered steps forming a DAG over `depends_on`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    /// Build and validate.
    pub fn new(steps: Vec<Step>) -> Result<Self, PlanningError> {
        let plan = Self { steps };
        plan.validate()?;
        Ok(plan)
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn validate(&self) -> Result<(), PlanningError> {
        if self.steps.is_empty() {
            return Err(PlanningError::Empty);
        }
        let mut ids = BTreeSet::new();
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(PlanningError::DuplicateStep {
                    step_id: step.id.clone(),
                });
            }
            if step.required_capabilities.is_empty() {
                return Err(PlanningError::EmptyCapabilities {
                    step_id: step.id.clone(),
                });
            }
        }
        for step in &self.steps {
            for dep in &step.depends_on {
                if dep == &step.id {
                    return Err(PlanningError::SelfDependency {
                        step_id: step.id.clone(),
                    });
                }
                if !ids.contains(dep.as_str()) {
                    return Err(PlanningError::MissingDependency {
                        step_id: step.id.clone(),
                        missing_dependency: dep.clone(),
                    });
                }
            }
        }
        if self.topological_indices().len() != self.steps.len() {
            return Err(PlanningError::CycleDetected);
        }
        Ok(())
    }

    /// Topological order; among ready steps the earliest in plan order runs first.
    pub fn execution_order(&self) -> Vec<&Step> {
        self.topological_indices()
            .into_iter()
            .map(|i| &self.steps[i])
            .collect()
    }

    /// Kahn's algorithm over step indices. Shorter than `steps` iff there is
    /// a cycle. Unknown dependencies are ignored here.
    fn topological_indices(&self) -> Vec<usize> {
        let index: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        let mut indegree = vec![0usize; self.steps.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];
        for (i, step) in self.steps.iter().enumerate() {
            for dep in &step.depends_on {
                if let Some(&d) = index.get(dep.as_str()) {
                    dependents[d].push(i);
                    indegree[i] += 1;
                }
            }
        }

        let mut ready: BTreeSet<usize> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &n in &dependents[next] {
                indegree[n] -= 1;
                if indegree[n] == 0 {
                    ready.insert(n);
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_order_prefers_plan_position() {
        let plan = Plan::new(vec![
            Step::new("c", ["x"]).depends_on(["a"]),
            Step::new("a", ["x"]),
            Step::new("b", ["x"]),
        ])
        .unwrap();
        let ids: Vec<&str> = plan.execution_order().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn duplicate_and_self_dependency_rejected() {
        let err = Plan::new(vec![Step::new("a", ["x"]), Step::new("a", ["y"])]).unwrap_err();
        assert!(matches!(err, PlanningError::DuplicateStep { .. }));

        let err = Plan::new(vec![Step::new("a", ["x"]).depends_on(["a"])]).unwrap_err();
        assert!(matches!(err, PlanningError::SelfDependency { .. }));
    }

    #[test]
    fn step_params_default_to_empty_object() {
        let step: Step =
            serde_json::from_str(r#"{"id":"s1","capabilities":["calculation"]}"#).unwrap();
        assert!(step.params.is_object());
        assert!(step.required_capabilities.contains("calculation"));
    }
}
