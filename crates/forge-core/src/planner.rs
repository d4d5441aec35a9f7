//! Request decomposition into a capability-tagged plan.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::backend::{complete_with_retry, extract_json, ReasoningBackend, RetryPolicy};
use crate::domain::{Plan, PlanningError, Step};

/// First line of every planning prompt.
pub const PLAN_TAG: &str = "[forge:plan]";

const PLAN_SCHEMA_HINT: &str = r#"{"steps":[{"id":"s1","description":"string","capabilities":["string"],"input_schema":{"required_fields":[],"field_types":{}},"params":{},"depends_on":[]}]}"#;

/// Extra context for a planning prompt.
#[derive(Debug, Clone, Default)]
pub struct PlanningHints {
    /// Capabilities of the currently active agents.
    pub vocabulary: BTreeSet<String>,
    /// Summaries of related past tasks.
    pub context: Vec<String>,
}

#[derive(Deserialize)]
struct PlanDocument {
    #[serde(default)]
    steps: Vec<Step>,
}

pub struct Planner {
    backend: Arc<dyn ReasoningBackend>,
    retry: RetryPolicy,
}

impl Planner {
    pub fn new(backend: Arc<dyn ReasoningBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    #[instrument(skip_all, fields(input_len = task_input.len()))]
    pub async fn plan(
        &self,
        task_input: &str,
        constraints: &BTreeMap<String, Value>,
        hints: &PlanningHints,
    ) -> Result<Plan, PlanningError> {
        let prompt = build_prompt(task_input, constraints, hints);
        let text =
            complete_with_retry(self.backend.as_ref(), &prompt, Some(PLAN_SCHEMA_HINT), &self.retry)
                .await?;
        let plan = parse_plan(&text)?;
        debug!(steps = plan.len(), "plan accepted");
        Ok(plan)
    }
}

pub fn build_prompt(
    task_input: &str,
    constraints: &BTreeMap<String, Value>,
    hints: &PlanningHints,
) -> String {
    let mut prompt = format!(
        "{PLAN_TAG}\nDecompose the request into an ordered list of steps. Each step names \
         the capabilities it needs, never an agent. Reply with JSON only, shaped like:\n\
         {PLAN_SCHEMA_HINT}\n\nRequest: {task_input}\n"
    );
    if !constraints.is_empty() {
        let rendered = serde_json::to_string(constraints).unwrap_or_default();
        prompt.push_str(&format!("Constraints: {rendered}\n"));
    }
    if !hints.vocabulary.is_empty() {
        let vocab: Vec<&str> = hints.vocabulary.iter().map(String::as_str).collect();
        prompt.push_str(&format!(
            "Prefer these known capabilities: {}\n",
            vocab.join(", ")
        ));
    }
    if !hints.context.is_empty() {
        prompt.push_str("Related past requests:\n");
        for line in &hints.context {
            prompt.push_str(&format!("- {line}\n"));
        }
    }
    prompt
}

/// Parse and validate a planner completion. Capability names are trimmed
/// and lowercased.
pub fn parse_plan(text: &str) -> Result<Plan, PlanningError> {
    if text.trim().is_empty() {
        return Err(PlanningError::Malformed("empty response".to_string()));
    }
    let doc: PlanDocument = serde_json::from_str(extract_json(text))
        .map_err(|e| PlanningError::Malformed(e.to_string()))?;
    let steps = doc
        .steps
        .into_iter()
        .map(|mut step| {
            step.id = step.id.trim().to_string();
            step.required_capabilities = step
                .required_capabilities
                .iter()
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect();
            if !step.params.is_object() {
                step.params = Value::Object(Default::default());
            }
            step
        })
        .collect();
    Plan::new(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, ScriptedBackend};

    fn retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            backoff_base_ms: 1,
            timeout_ms: 1_000,
        }
    }

    #[test]
    fn fenced_plan_is_parsed_and_normalized() {
        let text = "Here you go:\n```json\n{\"steps\":[{\"id\":\"s1\",\"capabilities\":[\" Percentage \"],\"params\":{\"amount\":42}}]}\n```";
        let plan = parse_plan(text).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(plan.steps[0].required_capabilities.contains("percentage"));
        assert_eq!(plan.steps[0].params["amount"], 42);
    }

    #[test]
    fn malformed_outputs_are_planning_errors() {
        assert!(matches!(parse_plan("   "), Err(PlanningError::Malformed(_))));
        assert!(matches!(parse_plan("no json here"), Err(PlanningError::Malformed(_))));
        assert!(matches!(parse_plan(r#"{"steps":[]}"#), Err(PlanningError::Empty)));
        assert!(matches!(
            parse_plan(r#"{"steps":[{"id":"a","capabilities":["  "]}]}"#),
            Err(PlanningError::EmptyCapabilities { .. })
        ));
        assert!(matches!(
            parse_plan(r#"{"steps":[{"id":"a","capabilities":["x"],"depends_on":["zz"]}]}"#),
            Err(PlanningError::MissingDependency { .. })
        ));
    }

    #[test]
    fn cycles_are_rejected() {
        let text = r#"{"steps":[
            {"id":"a","capabilities":["x"],"depends_on":["c"]},
            {"id":"b","capabilities":["x"],"depends_on":["a"]},
            {"id":"c","capabilities":["x"],"depends_on":["b"]}
        ]}"#;
        assert!(matches!(parse_plan(text), Err(PlanningError::CycleDetected)));
    }

    #[test]
    fn prompt_carries_tag_vocabulary_and_context() {
        let hints = PlanningHints {
            vocabulary: ["math".to_string()].into(),
            context: vec!["earlier tip question".into()],
        };
        let constraints = BTreeMap::from([("budget".to_string(), serde_json::json!(5))]);
        let prompt = build_prompt("tip on $42", &constraints, &hints);
        assert!(prompt.starts_with(PLAN_TAG));
        assert!(prompt.contains("math"));
        assert!(prompt.contains("earlier tip question"));
        assert!(prompt.contains("\"budget\":5"));
    }

    #[tokio::test]
    async fn backend_outage_surfaces_as_planning_error() {
        let backend = Arc::new(ScriptedBackend::new(|_| {
            Err(BackendError::Unavailable("down".into()))
        }));
        let planner = Planner::new(backend.clone(), retry());
        let err = planner
            .plan("anything", &BTreeMap::new(), &PlanningHints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PlanningError::Backend(BackendError::Unavailable(_))));
        assert_eq!(backend.calls(), 2);
    }
}
