//! Compiled-in agents registered at startup.
//!
//! Every builtin reads the step input assembled by the orchestrator:
//! `{task, instruction, params, dependencies}` plus the step params copied to
//! the top level. Most delegate the real work to one tool; the coding agent
//! asks the reasoning backend instead.

use std::collections::BTreeMap;
use std::result::Result as StdResult;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{Agent, AgentContext, AgentError};
use crate::backend::{complete_with_retry, extract_json, ReasoningBackend, RetryPolicy};
use crate::domain::{
    AgentOrigin, AgentSpec, CodeReference, FieldType, ForgeError, JsonFieldSchema, Result,
};

/// A builtin agent together with the draft spec it is published under.
pub struct BuiltinAgent {
    pub spec: AgentSpec,
    pub agent: Arc<dyn Agent>,
}

/// What the default catalog needs from the running engine.
#[derive(Clone)]
pub struct CatalogDeps {
    pub backend: Arc<dyn ReasoningBackend>,
    pub retry: RetryPolicy,
    /// Include agents that depend on the network tools.
    pub network_tools: bool,
}

fn task_input_schema() -> JsonFieldSchema {
    JsonFieldSchema::required(["task"])
        .with_type("task", FieldType::String)
        .with_type("params", FieldType::Object)
        .with_type("dependencies", FieldType::Object)
}

fn draft(
    name: &str,
    description: &str,
    capabilities: &[&str],
    tools: &[&str],
    output: JsonFieldSchema,
) -> Result<AgentSpec> {
    Ok(AgentSpec::draft(
        name,
        capabilities.iter().copied(),
        CodeReference::Builtin {
            key: name.to_string(),
        },
        AgentOrigin::Builtin,
    )?
    .with_description(description)
    .with_tools(tools.iter().copied())
    .with_schemas(task_input_schema(), output))
}

fn pattern(name: &str, re: &str) -> Result<Regex> {
    Regex::new(re).map_err(|e| ForgeError::Config(format!("builtin pattern '{name}': {e}")))
}

/// The default agent catalog.
pub fn catalog(deps: CatalogDeps) -> Result<Vec<BuiltinAgent>> {
    let mut agents = vec![
        BuiltinAgent {
            spec: draft(
                "calculator",
                "Arithmetic, percentages and tips",
                &["arithmetic", "calculation", "math", "percentage"],
                &["calculator"],
                JsonFieldSchema::required(["result"]).with_type("result", FieldType::Number),
            )?,
            agent: Arc::new(CalculatorAgent::new()?),
        },
        BuiltinAgent {
            spec: draft(
                "summarizer",
                "Extractive text summaries",
                &["summarization", "text"],
                &["text_summarizer"],
                JsonFieldSchema::required(["summary"]).with_type("summary", FieldType::String),
            )?,
            agent: Arc::new(SummarizerAgent),
        },
        BuiltinAgent {
            spec: draft(
                "scheduler",
                "Dates, weekdays and day offsets",
                &["datetime", "scheduling"],
                &["datetime"],
                JsonFieldSchema::required(["result"]).with_type("result", FieldType::String),
            )?,
            agent: Arc::new(SchedulerAgent::new()?),
        },
        BuiltinAgent {
            spec: draft(
                "data_processor",
                "Parse JSON documents and extract fields",
                &["data_processing", "json"],
                &["json_parser"],
                JsonFieldSchema::required(["value"]),
            )?,
            agent: Arc::new(DataAgent),
        },
        BuiltinAgent {
            spec: draft(
                "coder",
                "Code generation, review, debugging and documentation",
                &["code_generation", "code_review", "debugging", "documentation"],
                &[],
                JsonFieldSchema::required(["mode", "explanation"])
                    .with_type("mode", FieldType::String)
                    .with_type("explanation", FieldType::String)
                    .with_type("issues", FieldType::Array),
            )?,
            agent: Arc::new(CodingAgent::new(deps.backend, deps.retry)),
        },
    ];
    if deps.network_tools {
        agents.push(BuiltinAgent {
            spec: draft(
                "researcher",
                "Web search and information gathering",
                &["web_search", "information_gathering", "fact_checking", "research"],
                &["web_search"],
                JsonFieldSchema::required(["query", "results", "summary"])
                    .with_type("results", FieldType::Array)
                    .with_type("summary", FieldType::String),
            )?,
            agent: Arc::new(SearchAgent),
        });
    }
    Ok(agents)
}

/// `field` from the top-level input, then from `params`.
fn param<'a>(input: &'a Value, field: &str) -> Option<&'a Value> {
    input
        .get(field)
        .or_else(|| input.get("params").and_then(|p| p.get(field)))
}

/// Instruction text, falling back to the raw task.
fn request_text(input: &Value) -> StdResult<String, AgentError> {
    ["instruction", "task"]
        .iter()
        .filter_map(|f| input.get(*f).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| AgentError::InvalidInput("no instruction or task text".to_string()))
}

/// Outputs of upstream steps, in step-id order.
fn dependency_outputs(input: &Value) -> Vec<&Value> {
    input
        .get("dependencies")
        .and_then(Value::as_object)
        .map(|deps| deps.values().collect())
        .unwrap_or_default()
}

pub struct CalculatorAgent {
    percent: Regex,
    arithmetic: Regex,
}

impl CalculatorAgent {
    pub fn new() -> Result<Self> {
        Ok(Self {
            percent: pattern("percent", r"(\d+(?:\.\d+)?)\s*%[^\d$]*\$?\s*(\d+(?:\.\d+)?)")?,
            arithmetic: pattern("arithmetic", r"[\d.]+(?:\s*[-+*/%^]\s*\(?\s*[\d.]+\s*\)?)+")?,
        })
    }

    /// Pull a calculator expression out of free text. `15% tip on $42`
    /// becomes `42 * 15 / 100`.
    pub fn derive_expression(&self, text: &str) -> Option<String> {
        if let Some(caps) = self.percent.captures(text) {
            return Some(format!("{} * {} / 100", &caps[2], &caps[1]));
        }
        self.arithmetic
            .find(text)
            .map(|m| m.as_str().replace('^', " ** ").trim().to_string())
            .filter(|e| !e.contains("**"))
    }
}

#[async_trait]
impl Agent for CalculatorAgent {
    async fn execute(&self, input: Value, ctx: &AgentContext) -> StdResult<Value, AgentError> {
        let expression = match param(&input, "expression").and_then(Value::as_str) {
            Some(e) => e.to_string(),
            None => {
                let text = request_text(&input)?;
                self.derive_expression(&text).ok_or_else(|| {
                    AgentError::InvalidInput(format!("no arithmetic found in '{text}'"))
                })?
            }
        };
        let out = ctx
            .call_tool("calculator", json!({ "expression": expression }))
            .await?;
        let result = out
            .get("result")
            .cloned()
            .ok_or_else(|| AgentError::Failed("calculator returned no result".to_string()))?;
        let rounded = result.as_f64().map(|x| (x * 100.0).round() / 100.0);
        Ok(json!({
            "result": result,
            "expression": expression,
            "formatted": rounded.map(|x| format!("{x:.2}")),
        }))
    }
}

pub struct SummarizerAgent;

#[async_trait]
impl Agent for SummarizerAgent {
    async fn execute(&self, input: Value, ctx: &AgentContext) -> StdResult<Value, AgentError> {
        let text = match param(&input, "text").and_then(Value::as_str) {
            Some(t) => t.to_string(),
            None => {
                let upstream: Vec<String> = dependency_outputs(&input)
                    .into_iter()
                    .filter_map(|out| {
                        ["text", "summary", "value"]
                            .iter()
                            .find_map(|f| out.get(*f).and_then(Value::as_str))
                            .map(str::to_string)
                    })
                    .collect();
                if upstream.is_empty() {
                    request_text(&input)?
                } else {
                    upstream.join(" ")
                }
            }
        };
        let mut args = json!({ "text": text });
        if let Some(n) = param(&input, "max_sentences").filter(|v| v.is_number()) {
            args["max_sentences"] = n.clone();
        }
        let out = ctx.call_tool("text_summarizer", args).await?;
        Ok(json!({
            "summary": out.get("summary").cloned().unwrap_or_else(|| json!("")),
            "keywords": out.get("keywords").cloned().unwrap_or_else(|| json!([])),
        }))
    }
}

pub struct SchedulerAgent {
    days: Regex,
    date: Regex,
}

impl SchedulerAgent {
    pub fn new() -> Result<Self> {
        Ok(Self {
            days: pattern("days", r"(?i)\bin\s+(\d+)\s+days?\b")?,
            date: pattern("date", r"\b\d{4}-\d{2}-\d{2}\b")?,
        })
    }

    /// Map a request onto a `datetime` tool call.
    pub fn schedule_args(&self, text: &str) -> Value {
        let mut args = BTreeMap::new();
        if let Some(date) = self.date.find(text) {
            args.insert("date", json!(date.as_str()));
        }
        let lower = text.to_lowercase();
        if let Some(caps) = self.days.captures(text) {
            let days: i64 = caps[1].parse().unwrap_or(0);
            args.insert("operation", json!("add_days"));
            args.insert("days", json!(days));
        } else if lower.contains("what day") || lower.contains("weekday") {
            args.insert("operation", json!("weekday"));
        } else {
            args.insert("operation", json!("now"));
        }
        json!(args)
    }
}

#[async_trait]
impl Agent for SchedulerAgent {
    async fn execute(&self, input: Value, ctx: &AgentContext) -> StdResult<Value, AgentError> {
        let args = match param(&input, "operation").and_then(Value::as_str) {
            Some(op) => {
                let mut args = json!({ "operation": op });
                for field in ["date", "days"] {
                    if let Some(v) = param(&input, field) {
                        args[field] = v.clone();
                    }
                }
                args
            }
            None => self.schedule_args(&request_text(&input)?),
        };
        ctx.call_tool("datetime", args).await
    }
}

pub struct DataAgent;

/// First balanced-looking JSON document embedded in `text`.
fn embedded_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let end = text.rfind(['}', ']'])?;
    (end > start).then(|| &text[start..=end])
}

#[async_trait]
impl Agent for DataAgent {
    async fn execute(&self, input: Value, ctx: &AgentContext) -> StdResult<Value, AgentError> {
        let text = match param(&input, "text").and_then(Value::as_str) {
            Some(t) => t.to_string(),
            None => {
                let raw = request_text(&input)?;
                embedded_json(&raw)
                    .map(str::to_string)
                    .ok_or_else(|| AgentError::InvalidInput("no JSON document in request".into()))?
            }
        };
        let mut args = json!({ "text": text });
        if let Some(path) = param(&input, "path").and_then(Value::as_str) {
            args["path"] = json!(path);
        }
        ctx.call_tool("json_parser", args).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingMode {
    Generation,
    Review,
    Debugging,
    Documentation,
}

impl CodingMode {
    /// Keyword match over the request; generation when nothing matches.
    pub fn detect(text: &str) -> Self {
        fn any(text: &str, words: &[&str]) -> bool {
            words.iter().any(|w| text.contains(w))
        }
        let lower = text.to_lowercase();
        if any(&lower, &["generate", "create", "write", "build", "implement"]) {
            Self::Generation
        } else if any(&lower, &["review", "check", "analyze", "audit"]) {
            Self::Review
        } else if any(&lower, &["debug", "fix", "error", "bug", "issue"]) {
            Self::Debugging
        } else if any(&lower, &["document", "docstring", "comment"]) {
            Self::Documentation
        } else {
            Self::Generation
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "generation" => Some(Self::Generation),
            "review" => Some(Self::Review),
            "debugging" => Some(Self::Debugging),
            "documentation" => Some(Self::Documentation),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Review => "review",
            Self::Debugging => "debugging",
            Self::Documentation => "documentation",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            Self::Generation => "Write code that satisfies the request.",
            Self::Review => "Review the code. List concrete problems in `issues`.",
            Self::Debugging => "Find the cause of the failure and return corrected code.",
            Self::Documentation => "Document the code. Return it with doc comments added.",
        }
    }
}

const LANGUAGES: &[&str] = &[
    "rust", "python", "javascript", "typescript", "golang", "java", "c++", "c#", "ruby", "sql",
    "bash", "kotlin", "swift",
];

fn detect_language(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    lower
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !(c.is_alphanumeric() || c == '+' || c == '#')))
        .find_map(|w| LANGUAGES.iter().copied().find(|lang| *lang == w))
}

/// Body of the first fenced code block.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim_end())
}

const CODING_SCHEMA_HINT: &str =
    r#"{"code": "string or null", "explanation": "string", "issues": ["string"]}"#;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CodingReply {
    code: Option<String>,
    explanation: String,
    issues: Vec<String>,
}

/// Answers coding requests with the reasoning backend.
pub struct CodingAgent {
    backend: Arc<dyn ReasoningBackend>,
    retry: RetryPolicy,
}

impl CodingAgent {
    pub fn new(backend: Arc<dyn ReasoningBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    fn prompt(mode: CodingMode, language: Option<&str>, request: &str, code: Option<&str>) -> String {
        let mut prompt = format!(
            "You are the coding agent of an agent orchestration system.\n\
             Mode: {}\n{}\nLanguage: {}\nRequest: {request}\n",
            mode.as_str(),
            mode.instruction(),
            language.unwrap_or("unspecified"),
        );
        if let Some(code) = code {
            prompt.push_str("Code:\n```\n");
            prompt.push_str(code);
            prompt.push_str("\n```\n");
        }
        prompt.push_str("Answer with JSON: ");
        prompt.push_str(CODING_SCHEMA_HINT);
        prompt
    }

    /// Structured reply when the backend followed the shape, otherwise the
    /// raw text as the explanation.
    fn read_reply(text: &str) -> CodingReply {
        match serde_json::from_str::<CodingReply>(extract_json(text)) {
            Ok(reply) if !reply.explanation.is_empty() || reply.code.is_some() => reply,
            _ => CodingReply {
                code: fenced_block(text).map(str::to_string),
                explanation: text.trim().to_string(),
                issues: Vec::new(),
            },
        }
    }
}

#[async_trait]
impl Agent for CodingAgent {
    async fn execute(&self, input: Value, _ctx: &AgentContext) -> StdResult<Value, AgentError> {
        let request = request_text(&input)?;
        let mode = param(&input, "mode")
            .and_then(Value::as_str)
            .and_then(CodingMode::parse)
            .unwrap_or_else(|| CodingMode::detect(&request));
        let language = param(&input, "language")
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .or_else(|| detect_language(&request).map(str::to_string));
        let code = param(&input, "code")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| fenced_block(&request).map(str::to_string))
            .or_else(|| {
                dependency_outputs(&input)
                    .into_iter()
                    .find_map(|out| out.get("code").and_then(Value::as_str))
                    .map(str::to_string)
            });

        let prompt = Self::prompt(mode, language.as_deref(), &request, code.as_deref());
        let text = complete_with_retry(
            self.backend.as_ref(),
            &prompt,
            Some(CODING_SCHEMA_HINT),
            &self.retry,
        )
        .await?;
        let reply = Self::read_reply(&text);
        debug!(mode = mode.as_str(), has_code = reply.code.is_some(), "coding reply parsed");
        Ok(json!({
            "mode": mode.as_str(),
            "language": language,
            "code": reply.code,
            "explanation": reply.explanation,
            "issues": reply.issues,
        }))
    }
}

/// Looks things up with the `web_search` tool.
pub struct SearchAgent;

const QUERY_PREFIXES: &[&str] = &[
    "search for", "find", "look up", "research", "tell me about", "what is", "who is",
    "where is", "when is", "how to",
];

/// Strip a leading request phrase and punctuation from `text`.
pub fn search_query(text: &str) -> String {
    let lower = text.trim().to_lowercase();
    let stripped = QUERY_PREFIXES
        .iter()
        .find_map(|p| lower.strip_prefix(p))
        .unwrap_or(&lower);
    let query: String = stripped.chars().filter(|c| !matches!(c, '?' | '!')).collect();
    let query = query.trim();
    if query.is_empty() {
        text.trim().to_string()
    } else {
        query.to_string()
    }
}

fn search_summary(results: &[Value]) -> String {
    if results.is_empty() {
        return "No relevant information found.".to_string();
    }
    let mut lines = vec![format!("Found {} relevant sources:", results.len())];
    for (i, result) in results.iter().take(3).enumerate() {
        let title = result.get("title").and_then(Value::as_str).unwrap_or("untitled");
        lines.push(format!("{}. {title}", i + 1));
    }
    lines.join("\n")
}

#[async_trait]
impl Agent for SearchAgent {
    async fn execute(&self, input: Value, ctx: &AgentContext) -> StdResult<Value, AgentError> {
        let query = match param(&input, "query").and_then(Value::as_str) {
            Some(q) => q.to_string(),
            None => search_query(&request_text(&input)?),
        };
        let out = ctx
            .call_tool("web_search", json!({ "query": query, "max_results": 5 }))
            .await?;
        let results = out
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let sources: Vec<Value> = results
            .iter()
            .filter_map(|r| r.get("url").cloned())
            .collect();
        Ok(json!({
            "query": query,
            "summary": search_summary(&results),
            "sources": sources,
            "results": results,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, ScriptedBackend};
    use crate::domain::{ErrorKind, TaskId};
    use crate::safety::{SafetyConfig, SafetyGate};
    use crate::tooling::{ToolFunctions, ToolGateway, ToolManifest};

    fn ctx() -> AgentContext {
        let gate = Arc::new(SafetyGate::new(&SafetyConfig::default()).unwrap());
        let gateway = ToolGateway::new(
            Arc::new(ToolManifest::builtin()),
            ToolFunctions::builtin(),
            gate,
            1_000,
        )
        .unwrap();
        AgentContext::new(TaskId::new(), "tester", "s1", Arc::new(gateway))
    }

    fn deps(backend: Arc<ScriptedBackend>, network_tools: bool) -> CatalogDeps {
        CatalogDeps {
            backend,
            retry: RetryPolicy {
                max_attempts: 1,
                backoff_base_ms: 1,
                timeout_ms: 1_000,
            },
            network_tools,
        }
    }

    #[test]
    fn tip_question_becomes_percent_expression() {
        let calc = CalculatorAgent::new().unwrap();
        assert_eq!(
            calc.derive_expression("What's a 15% tip on $42?").as_deref(),
            Some("42 * 15 / 100")
        );
        assert_eq!(calc.derive_expression("compute 3 + 4 * 2").as_deref(), Some("3 + 4 * 2"));
        assert_eq!(calc.derive_expression("hello there"), None);
    }

    #[test]
    fn schedule_requests_map_to_operations() {
        let scheduler = SchedulerAgent::new().unwrap();
        assert_eq!(
            scheduler.schedule_args("remind me in 3 days from 2026-01-30"),
            json!({"operation": "add_days", "days": 3, "date": "2026-01-30"})
        );
        assert_eq!(scheduler.schedule_args("what day is 2026-01-01")["operation"], "weekday");
        assert_eq!(scheduler.schedule_args("time please")["operation"], "now");
    }

    #[test]
    fn embedded_json_is_found() {
        assert_eq!(embedded_json("parse {\"a\": 1} now"), Some("{\"a\": 1}"));
        assert_eq!(embedded_json("nothing here"), None);
    }

    #[test]
    fn catalog_specs_are_builtin_drafts() {
        let backend = Arc::new(ScriptedBackend::new(|_| Ok("{}".into())));
        let catalog = catalog(deps(backend.clone(), false)).unwrap();
        let names: Vec<&str> = catalog.iter().map(|e| e.spec.name.as_str()).collect();
        assert_eq!(names, ["calculator", "summarizer", "scheduler", "data_processor", "coder"]);
        for entry in &catalog {
            assert!(matches!(entry.spec.code_reference, CodeReference::Builtin { .. }));
            let tools = if entry.spec.name == "coder" { 0 } else { 1 };
            assert_eq!(entry.spec.tools.len(), tools, "{}", entry.spec.name);
        }

        let with_network = super::catalog(deps(backend, true)).unwrap();
        let researcher = with_network
            .iter()
            .find(|e| e.spec.name == "researcher")
            .unwrap();
        assert!(researcher.spec.tools.contains("web_search"));
    }

    #[test]
    fn params_fall_back_to_nested_object() {
        let input = json!({"params": {"expression": "1+1"}});
        assert_eq!(param(&input, "expression"), Some(&json!("1+1")));
        assert!(request_text(&input).is_err());
    }

    #[test]
    fn coding_mode_and_language_detection() {
        assert_eq!(CodingMode::detect("Write a Rust function"), CodingMode::Generation);
        assert_eq!(CodingMode::detect("please audit this"), CodingMode::Review);
        assert_eq!(CodingMode::detect("fix the bug here"), CodingMode::Debugging);
        assert_eq!(CodingMode::detect("add docstrings"), CodingMode::Documentation);
        assert_eq!(detect_language("Write a Rust function"), Some("rust"));
        assert_eq!(detect_language("port this to C++, please"), Some("c++"));
        assert_eq!(detect_language("something vague"), None);
    }

    #[tokio::test]
    async fn coding_agent_returns_structured_reply() {
        let backend = Arc::new(ScriptedBackend::new(|_| {
            Ok(r#"```json
{"code": "fn add(a: i32, b: i32) -> i32 { a + b }", "explanation": "adds", "issues": []}
```"#
                .to_string())
        }));
        let agent = CodingAgent::new(backend.clone(), deps(backend.clone(), false).retry);
        let out = agent
            .execute(json!({"task": "Write a Rust function that adds two numbers"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out["mode"], "generation");
        assert_eq!(out["language"], "rust");
        assert_eq!(out["explanation"], "adds");
        assert!(out["code"].as_str().unwrap().starts_with("fn add"));

        let prompts = backend.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Mode: generation"));
        assert!(prompts[0].contains("Language: rust"));
    }

    #[tokio::test]
    async fn coding_agent_passes_code_and_accepts_prose() {
        let backend = Arc::new(ScriptedBackend::new(|_| {
            Ok("The loop never ends.\n```\nfor i in 0..n {}\n```".to_string())
        }));
        let agent = CodingAgent::new(backend.clone(), deps(backend.clone(), false).retry);
        let out = agent
            .execute(
                json!({"task": "debug this", "params": {"code": "loop {}", "language": "Rust"}}),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(out["mode"], "debugging");
        assert_eq!(out["language"], "rust");
        assert_eq!(out["code"], "for i in 0..n {}");
        assert!(out["explanation"].as_str().unwrap().starts_with("The loop never ends."));
        assert!(backend.prompts()[0].contains("loop {}"));
    }

    #[tokio::test]
    async fn coding_agent_surfaces_backend_failure() {
        let backend = Arc::new(ScriptedBackend::sequence(vec![Err(BackendError::Rejected(
            "401".into(),
        ))]));
        let agent = CodingAgent::new(backend.clone(), deps(backend, false).retry);
        let err = agent
            .execute(json!({"task": "write a parser"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Backend(BackendError::Rejected(_))));
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    }

    #[test]
    fn search_query_strips_request_phrasing() {
        assert_eq!(search_query("Search for Rust async runtimes?"), "rust async runtimes");
        assert_eq!(search_query("What is SurrealDB!"), "surrealdb");
        assert_eq!(search_query("?"), "?");
        assert_eq!(search_summary(&[]), "No relevant information found.");
        assert_eq!(
            search_summary(&[json!({"title": "Tokio"})]),
            "Found 1 relevant sources:\n1. Tokio"
        );
    }
}
