//! End-to-end task runs through `ForgeService` with a scripted backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use forge_core::backend::ScriptedBackend;
use forge_core::domain::AgentOrigin;
use forge_core::planner::PLAN_TAG;
use forge_core::resolver::GENERATE_TAG;
use forge_core::safety::PermissionRule;
use forge_core::{
    Agent, AgentContext, AgentError, AgentSpec, CodeReference, ErrorKind, ForgeConfig,
    ForgeService, OrchestratorConfig, TaskRequest, TaskStatus, ToolExecutionError,
};
use forge_state::fakes::MemorySemanticMemory;
use serde_json::{json, Value};
use tokio::sync::Notify;

const WAIT: Duration = Duration::from_secs(20);

fn plan(steps: Value) -> String {
    json!({ "steps": steps }).to_string()
}

fn tip_plan() -> String {
    plan(json!([{
        "id": "s1",
        "description": "Calculate 15% tip on a $42 bill",
        "capabilities": ["percentage"],
    }]))
}

/// Plans with `plan_text`; answers generation prompts with `candidate`.
fn backend(plan_text: String, candidate: Option<String>) -> Arc<ScriptedBackend> {
    Arc::new(ScriptedBackend::new(move |prompt| {
        if prompt.starts_with(PLAN_TAG) {
            Ok(plan_text.clone())
        } else if prompt.starts_with(GENERATE_TAG) {
            Ok(candidate.clone().unwrap_or_else(|| "{}".to_string()))
        } else {
            Ok(String::new())
        }
    }))
}

fn generation_prompts(backend: &ScriptedBackend) -> usize {
    backend
        .prompts()
        .iter()
        .filter(|p| p.starts_with(GENERATE_TAG))
        .count()
}

fn tip_candidate(name: &str, capability: &str, call: &str) -> String {
    let source = format!(
        r#"
fn name() {{ return "{name}"; }}
fn capabilities() {{ return ["{capability}"]; }}
fn input_schema() {{ return {{required_fields: [], field_types: {{}}}}; }}
fn output_schema() {{ return {{required_fields: ["result"], field_types: {{result: "number"}}}}; }}
fn execute(input) {{
    let out = {call}("calculator", {{expression: "42 * 15 / 100"}});
    return {{result: out.result}};
}}
"#
    );
    json!({
        "name": name,
        "capabilities": [capability],
        "tools": ["calculator"],
        "input_schema": {"required_fields": [], "field_types": {}},
        "output_schema": {"required_fields": ["result"], "field_types": {"result": "number"}},
        "source": source,
    })
    .to_string()
}

fn result_number(output: &Option<Value>) -> f64 {
    output
        .as_ref()
        .and_then(|o| o["result"].as_f64())
        .expect("numeric result")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tip_request_runs_on_builtin_calculator() {
    let backend = backend(tip_plan(), None);
    let service = ForgeService::builder(ForgeConfig::default())
        .backend(backend.clone())
        .build()
        .await
        .unwrap();

    let id = service
        .submit(TaskRequest::new("Calculate 15% tip on a $42 bill", "alice"))
        .await
        .unwrap();
    let task = service.wait(&id, WAIT).await.unwrap();

    assert_eq!(task.status(), TaskStatus::Completed, "{:?}", task.failure);
    assert!((result_number(&task.output) - 6.30).abs() < 0.01);
    assert_eq!(task.step_results.len(), 1);
    assert_eq!(task.step_results[0].agent.name, "calculator");
    assert_eq!(task.resolved_agents["s1"].name, "calculator");
    assert_eq!(generation_prompts(&backend), 0, "no generation for a covered capability");
    assert!(task.completed_at.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_network_candidate_fails_task_with_no_capable_agent() {
    let backend = backend(
        plan(json!([{
            "id": "s1",
            "description": "Look up today's weather",
            "capabilities": ["weather"],
        }])),
        Some(tip_candidate("gen-weather", "weather", "http_get")),
    );
    let service = ForgeService::builder(ForgeConfig::default())
        .backend(backend.clone())
        .build()
        .await
        .unwrap();

    let id = service
        .submit(TaskRequest::new("What is the weather today?", "bob"))
        .await
        .unwrap();
    let task = service.wait(&id, WAIT).await.unwrap();

    assert_eq!(task.status(), TaskStatus::Failed);
    let failure = task.failure.expect("failure recorded");
    assert_eq!(failure.kind, ErrorKind::NoCapableAgent);
    assert_eq!(failure.step_id.as_deref(), Some("s1"));
    assert!(failure.reason.contains("disallowed-network"), "{}", failure.reason);
    assert_eq!(generation_prompts(&backend), 3, "initial attempt plus two retries");
    assert!(task.step_results.is_empty());
    assert!(service.agent("gen-weather").await.is_err(), "nothing was published");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_generated_agent_runs_and_is_reused() {
    let backend = backend(
        plan(json!([{"id": "s1", "description": "tip", "capabilities": ["tip"]}])),
        Some(tip_candidate("gen-tip", "tip", "tool")),
    );
    let service = ForgeService::builder(ForgeConfig::default())
        .backend(backend.clone())
        .build()
        .await
        .unwrap();

    for round in 0..2 {
        let id = service
            .submit(TaskRequest::new("Work out the tip", "carol"))
            .await
            .unwrap();
        let task = service.wait(&id, WAIT).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Completed, "round {round}: {:?}", task.failure);
        assert!((result_number(&task.output) - 6.3).abs() < 0.01);
        assert_eq!(task.step_results[0].agent.name, "gen-tip");
    }
    assert_eq!(generation_prompts(&backend), 1);

    let history = service.agent("gen-tip").await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(matches!(history[0].spec.code_reference, CodeReference::Script { .. }));
    assert!(history[0].report.passed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cyclic_plan_fails_in_planning() {
    let backend = backend(
        plan(json!([
            {"id": "a", "capabilities": ["math"], "depends_on": ["b"]},
            {"id": "b", "capabilities": ["math"], "depends_on": ["a"]},
        ])),
        None,
    );
    let service = ForgeService::builder(ForgeConfig::default())
        .backend(backend)
        .build()
        .await
        .unwrap();

    let id = service
        .submit(TaskRequest::new("loop forever", "dave"))
        .await
        .unwrap();
    let task = service.wait(&id, WAIT).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Failed);
    assert_eq!(task.failure.unwrap().kind, ErrorKind::Planning);
    assert!(task.plan.is_none());
}

/// Signals when it starts, then blocks until released.
struct HoldingAgent {
    started: Arc<Notify>,
    release: Arc<Notify>,
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Agent for HoldingAgent {
    async fn execute(&self, input: Value, _ctx: &AgentContext) -> Result<Value, AgentError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        Ok(json!({ "echo": input["instruction"] }))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_after_first_step_stops_the_plan() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let holder = HoldingAgent {
        started: started.clone(),
        release: release.clone(),
        runs: runs.clone(),
    };
    let spec = AgentSpec::draft(
        "holder",
        ["hold"],
        CodeReference::Builtin {
            key: "holder".to_string(),
        },
        AgentOrigin::Builtin,
    )
    .unwrap();

    let backend = backend(
        plan(json!([
            {"id": "s1", "description": "first", "capabilities": ["hold"]},
            {"id": "s2", "description": "second", "capabilities": ["hold"], "depends_on": ["s1"]},
            {"id": "s3", "description": "third", "capabilities": ["hold"], "depends_on": ["s2"]},
        ])),
        None,
    );
    let service = ForgeService::builder(ForgeConfig::default())
        .backend(backend)
        .builtin_agent(spec, Arc::new(holder))
        .build()
        .await
        .unwrap();

    let id = service
        .submit(TaskRequest::new("three slow steps", "erin"))
        .await
        .unwrap();
    tokio::time::timeout(WAIT, started.notified())
        .await
        .expect("first step started");
    assert!(service.cancel(&id));
    release.notify_one();

    let task = service.wait(&id, WAIT).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Failed);
    let failure = task.failure.clone().unwrap();
    assert_eq!(failure.kind, ErrorKind::Cancelled);
    assert_eq!(failure.step_id.as_deref(), Some("s2"));
    assert_eq!(task.step_results.len(), 1);
    assert_eq!(task.step_results[0].step_id, "s1");
    assert_eq!(task.step_results[0].output["echo"], "first");
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(task.cancel_requested);
    assert!(!service.cancel(&id), "terminal tasks cannot be cancelled");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_completed_tasks_enrich_later_planning() {
    let backend = backend(tip_plan(), None);
    let service = ForgeService::builder(ForgeConfig::default())
        .backend(backend.clone())
        .memory(Arc::new(MemorySemanticMemory::new()))
        .build()
        .await
        .unwrap();

    let first = service
        .submit(TaskRequest::new("Calculate 15% tip on a $42 bill", "frank"))
        .await
        .unwrap();
    service.wait(&first, WAIT).await.unwrap();

    let hits = service.search_memory("tip on a $42 bill", 3).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, first.to_string());

    let second = service
        .submit(TaskRequest::new("Calculate 15% tip on a $42 bill please", "frank"))
        .await
        .unwrap();
    service.wait(&second, WAIT).await.unwrap();
    let last_plan_prompt = backend
        .prompts()
        .into_iter()
        .filter(|p| p.starts_with(PLAN_TAG))
        .last()
        .unwrap();
    assert!(last_plan_prompt.contains("Related past requests"));

    let recent = service.list_tasks(10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].id, second);

    let stats = service.stats().await.unwrap();
    assert_eq!(stats.memory_entries, 2);
    assert!(stats.metrics.tasks_completed >= 2);

    service.clear_context().await.unwrap();
    assert!(service.search_memory("tip", 3).await.unwrap().is_empty());
}

fn builtin_spec(name: &str, capability: &str) -> AgentSpec {
    AgentSpec::draft(
        name,
        [capability],
        CodeReference::Builtin {
            key: name.to_string(),
        },
        AgentOrigin::Builtin,
    )
    .unwrap()
}

fn single_step(capability: &str) -> String {
    plan(json!([{"id": "s1", "description": "do it", "capabilities": [capability]}]))
}

/// Fails its first `failures` runs with a retryable tool error.
struct FlakyAgent {
    runs: Arc<AtomicUsize>,
    failures: usize,
}

#[async_trait]
impl Agent for FlakyAgent {
    async fn execute(&self, _input: Value, _ctx: &AgentContext) -> Result<Value, AgentError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        if run <= self.failures {
            return Err(AgentError::Tool(ToolExecutionError::Failed {
                tool_name: "upstream".to_string(),
                message: format!("run {run} failed"),
            }));
        }
        Ok(json!({ "run": run }))
    }
}

async fn run_flaky(failures: usize) -> (forge_core::Task, usize) {
    let runs = Arc::new(AtomicUsize::new(0));
    let agent = FlakyAgent {
        runs: runs.clone(),
        failures,
    };
    let service = ForgeService::builder(ForgeConfig::default())
        .backend(backend(single_step("flaky"), None))
        .builtin_agent(builtin_spec("flaky", "flaky"), Arc::new(agent))
        .build()
        .await
        .unwrap();
    let id = service
        .submit(TaskRequest::new("try twice", "grace"))
        .await
        .unwrap();
    let task = service.wait(&id, WAIT).await.unwrap();
    (task, runs.load(Ordering::SeqCst))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retryable_failure_uses_the_single_retry_then_fails() {
    let (task, runs) = run_flaky(usize::MAX).await;
    assert_eq!(runs, 2, "first attempt plus the default budget of one retry");
    assert_eq!(task.status(), TaskStatus::Failed);
    let failure = task.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::ToolExecution);
    assert_eq!(failure.step_id.as_deref(), Some("s1"));
    assert!(failure.reason.contains("run 2 failed"), "{}", failure.reason);
    assert!(task.step_results.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retry_that_succeeds_records_attempts() {
    let (task, runs) = run_flaky(1).await;
    assert_eq!(runs, 2);
    assert_eq!(task.status(), TaskStatus::Completed, "{:?}", task.failure);
    assert_eq!(task.step_results[0].attempts, 2);
    assert_eq!(task.output.as_ref().unwrap()["run"], 2);
}

/// Reads the clock through the gateway.
struct ClockAgent {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Agent for ClockAgent {
    async fn execute(&self, _input: Value, ctx: &AgentContext) -> Result<Value, AgentError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        ctx.call_tool("datetime", json!({ "operation": "now" })).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_denials_are_never_retried() {
    let mut config = ForgeConfig::default();
    config.safety.permissions = vec![
        PermissionRule::deny("heidi", "tool:datetime", "no clocks for heidi"),
        PermissionRule::deny("ivan", "agent:clock", "clock agent is off limits"),
        PermissionRule::allow("*", "*"),
    ];
    let runs = Arc::new(AtomicUsize::new(0));
    let service = ForgeService::builder(config)
        .backend(backend(single_step("clock"), None))
        .builtin_agent(
            builtin_spec("clock", "clock"),
            Arc::new(ClockAgent { runs: runs.clone() }),
        )
        .build()
        .await
        .unwrap();

    let id = service
        .submit(TaskRequest::new("what time is it", "heidi"))
        .await
        .unwrap();
    let task = service.wait(&id, WAIT).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Failed);
    assert_eq!(task.failure.unwrap().kind, ErrorKind::PermissionDenied);
    assert_eq!(runs.load(Ordering::SeqCst), 1, "tool denial ends the step at once");

    let id = service
        .submit(TaskRequest::new("what time is it", "ivan"))
        .await
        .unwrap();
    let task = service.wait(&id, WAIT).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Failed);
    let failure = task.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::PermissionDenied);
    assert_eq!(failure.step_id.as_deref(), Some("s1"));
    assert_eq!(runs.load(Ordering::SeqCst), 1, "agent denial happens before dispatch");
}

/// Never answers within any sensible step timeout.
struct SleepingAgent {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Agent for SleepingAgent {
    async fn execute(&self, _input: Value, _ctx: &AgentContext) -> Result<Value, AgentError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(json!({}))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_agent_hits_the_step_timeout() {
    let config = ForgeConfig {
        orchestrator: OrchestratorConfig {
            step_timeout_ms: 200,
            step_retry_budget: 1,
            retry_backoff_ms: 10,
        },
        ..ForgeConfig::default()
    };
    let runs = Arc::new(AtomicUsize::new(0));
    let service = ForgeService::builder(config)
        .backend(backend(single_step("slow"), None))
        .builtin_agent(
            builtin_spec("sleeper", "slow"),
            Arc::new(SleepingAgent { runs: runs.clone() }),
        )
        .build()
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let id = service
        .submit(TaskRequest::new("take forever", "judy"))
        .await
        .unwrap();
    let task = service.wait(&id, WAIT).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(task.status(), TaskStatus::Failed);
    let failure = task.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::AgentExecution);
    assert!(failure.reason.contains("timed out after 200ms"), "{}", failure.reason);
    assert_eq!(runs.load(Ordering::SeqCst), 2, "a timeout counts as retryable");
}
