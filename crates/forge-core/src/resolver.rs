//! Capability resolution: registry lookup, else generate-validate-publish.
//!
//! At most one generation runs per capability set. The first caller claims
//! the set in the in-flight map; later callers subscribe to its completion
//! signal, wait (bounded), then look the registry up again. They never start
//! a generation of their own.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use forge_state::CasStore;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::backend::{complete_with_retry, extract_json, ReasoningBackend, RetryPolicy};
use crate::domain::{
    AgentOrigin, AgentSpec, CodeReference, ForgeError, JsonFieldSchema, Result, ValidationReport,
    ValidationRule, Violation,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::registry::AgentRegistry;
use crate::tooling::ToolManifest;
use crate::validator::{AgentCandidate, CodeValidator};

/// First line of every generation prompt.
pub const GENERATE_TAG: &str = "[forge:generate]";

const CANDIDATE_SCHEMA_HINT: &str = r#"{"name":"string","description":"string","capabilities":["string"],"tools":["string"],"input_schema":{"required_fields":[],"field_types":{}},"output_schema":{"required_fields":[],"field_types":{}},"source":"agent script"}"#;

const LANGUAGE_GUIDE: &str = "\
Agent script: items are `fn name(params) { ... }`; statements are let, assignment, \
if/else, while, for x in expr, return. Values are JSON. Builtins: tool(name, args), \
len, str, num, round, floor, ceil, abs, min, max, sqrt, pow, keys, contains, lower, \
upper, trim, split, join, push, type_of. No recursion, no I/O outside tool(). \
Define exactly: name(), capabilities(), input_schema(), output_schema(), execute(input). \
The schema functions return {required_fields: [...], field_types: {...}} and must \
equal the declared schemas.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Generation attempts after the first.
    pub max_generation_retries: u32,
    /// How long a caller waits on someone else's generation.
    pub generation_wait_ms: u64,
    pub allow_generation: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_generation_retries: 2,
            generation_wait_ms: 120_000,
            allow_generation: true,
        }
    }
}

/// What the generator is told about the step that needs the agent.
#[derive(Debug, Clone, Default)]
pub struct GenerationBrief {
    pub instruction: String,
    pub input_schema: JsonFieldSchema,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub spec: AgentSpec,
    pub generated: bool,
}

fn set_key(capabilities: &BTreeSet<String>) -> String {
    capabilities.iter().cloned().collect::<Vec<_>>().join(",")
}

/// `gen-<slug>` for a capability set: lowercase alphanumerics joined by '-'.
pub fn generated_name(capabilities: &BTreeSet<String>) -> String {
    let mut slug = String::new();
    for c in set_key(capabilities).chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    let slug: String = slug.chars().take(48).collect();
    format!("gen-{}", if slug.is_empty() { "agent" } else { slug.trim_end_matches('-') })
}

/// Removes the in-flight entry and wakes waiters however the winner exits.
struct InFlight<'a> {
    map: &'a Mutex<HashMap<String, watch::Receiver<bool>>>,
    key: String,
    done: watch::Sender<bool>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.key);
        self.done.send_replace(true);
    }
}

enum Claim<'a> {
    Winner(InFlight<'a>),
    Waiter(watch::Receiver<bool>),
}

pub struct AgentResolver {
    registry: Arc<AgentRegistry>,
    validator: Arc<CodeValidator>,
    backend: Arc<dyn ReasoningBackend>,
    sources: Arc<dyn CasStore>,
    manifest: Arc<ToolManifest>,
    retry: RetryPolicy,
    config: ResolverConfig,
    in_flight: Mutex<HashMap<String, watch::Receiver<bool>>>,
}

impl AgentResolver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<AgentRegistry>,
        validator: Arc<CodeValidator>,
        backend: Arc<dyn ReasoningBackend>,
        sources: Arc<dyn CasStore>,
        manifest: Arc<ToolManifest>,
        retry: RetryPolicy,
        config: ResolverConfig,
    ) -> Self {
        Self {
            registry,
            validator,
            backend,
            sources,
            manifest,
            retry,
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    #[instrument(skip_all, fields(caps = %set_key(capabilities)))]
    pub async fn resolve(
        &self,
        capabilities: &BTreeSet<String>,
        brief: &GenerationBrief,
    ) -> Result<Resolution> {
        let capabilities: BTreeSet<String> = capabilities
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        let key = set_key(&capabilities);

        if let Some(spec) = self.registry.lookup(&capabilities).await? {
            return Ok(found(&key, spec, false));
        }
        if !self.config.allow_generation {
            return Err(no_agent(&key, "no registered agent and generation is disabled", None));
        }

        match self.claim(&key) {
            Claim::Waiter(mut done) => {
                debug!("generation already in flight, waiting");
                let wait = Duration::from_millis(self.config.generation_wait_ms);
                if tokio::time::timeout(wait, done.wait_for(|finished| *finished))
                    .await
                    .is_err()
                {
                    warn!("gave up waiting for concurrent generation");
                }
                match self.registry.lookup(&capabilities).await? {
                    Some(spec) => Ok(found(&key, spec, false)),
                    None => Err(no_agent(
                        &key,
                        "concurrent generation did not produce an agent",
                        None,
                    )),
                }
            }
            Claim::Winner(_guard) => {
                // Someone may have finished between the first lookup and the claim.
                if let Some(spec) = self.registry.lookup(&capabilities).await? {
                    return Ok(found(&key, spec, false));
                }
                let spec = self.generate(&capabilities, brief).await?;
                Ok(found(&key, spec, true))
            }
        }
    }

    fn claim(&self, key: &str) -> Claim<'_> {
        let mut map = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(rx) = map.get(key) {
            return Claim::Waiter(rx.clone());
        }
        let (tx, rx) = watch::channel(false);
        map.insert(key.to_string(), rx);
        Claim::Winner(InFlight {
            map: &self.in_flight,
            key: key.to_string(),
            done: tx,
        })
    }

    async fn generate(
        &self,
        capabilities: &BTreeSet<String>,
        brief: &GenerationBrief,
    ) -> Result<AgentSpec> {
        let key = set_key(capabilities);
        let name = generated_name(capabilities);
        let max_attempts = self.config.max_generation_retries + 1;
        let mut last_report: Option<ValidationReport> = None;

        for attempt in 1..=max_attempts {
            obs::emit_generation_attempt(&key, attempt, max_attempts);
            let prompt = self.build_prompt(&name, capabilities, brief, last_report.as_ref());
            let text = complete_with_retry(
                self.backend.as_ref(),
                &prompt,
                Some(CANDIDATE_SCHEMA_HINT),
                &self.retry,
            )
            .await
            .map_err(|e| {
                no_agent(&key, &format!("reasoning backend: {e}"), last_report.clone())
            })?;

            let candidate = match parse_candidate(&text, &name) {
                Ok(c) => c,
                Err(report) => {
                    last_report = Some(report);
                    continue;
                }
            };

            if !capabilities.is_subset(&candidate.declaration.capabilities) {
                let missing: Vec<&str> = capabilities
                    .difference(&candidate.declaration.capabilities)
                    .map(String::as_str)
                    .collect();
                last_report = Some(ValidationReport::from_violations(
                    name.clone(),
                    Some(candidate.digest()),
                    vec![Violation::new(
                        ValidationRule::CapabilityGap,
                        format!("candidate does not declare: {}", missing.join(", ")),
                    )],
                ));
                continue;
            }

            let report = self.validator.validate(&candidate).await;
            if !report.passed() {
                last_report = Some(report);
                continue;
            }

            let digest = self.sources.put(candidate.source.as_bytes()).await?;
            let decl = candidate.declaration;
            let spec = AgentSpec::draft(
                decl.name,
                decl.capabilities,
                CodeReference::Script { digest },
                AgentOrigin::Generated,
            )?
            .with_description(decl.description)
            .with_tools(decl.tools)
            .with_schemas(decl.input_schema, decl.output_schema);
            let published = self.registry.publish(spec, report).await?;
            METRICS.inc_agents_generated();
            return Ok(published);
        }

        let summary = last_report
            .as_ref()
            .map(ValidationReport::summary)
            .unwrap_or_else(|| "no candidate produced".to_string());
        Err(no_agent(
            &key,
            &format!("generation failed after {max_attempts} attempts: {summary}"),
            last_report,
        ))
    }

    fn build_prompt(
        &self,
        name: &str,
        capabilities: &BTreeSet<String>,
        brief: &GenerationBrief,
        previous: Option<&ValidationReport>,
    ) -> String {
        let mut prompt = format!(
            "{GENERATE_TAG}\nWrite a new agent named \"{name}\" providing capabilities: {}.\n",
            set_key(capabilities)
        );
        if !brief.instruction.is_empty() {
            prompt.push_str(&format!("It must handle: {}\n", brief.instruction));
        }
        let schema = serde_json::to_string(&brief.input_schema).unwrap_or_default();
        prompt.push_str(&format!("Input schema: {schema}\n"));
        prompt.push_str("Available tools (declare every tool you call):\n");
        for entry in self.manifest.entries() {
            let args = serde_json::to_string(&entry.args_schema).unwrap_or_default();
            prompt.push_str(&format!(
                "- {} [{}]: {} args={args}\n",
                entry.tool_name, entry.category, entry.description
            ));
        }
        prompt.push_str(LANGUAGE_GUIDE);
        prompt.push('\n');
        if let Some(report) = previous {
            prompt.push_str("The previous candidate was rejected:\n");
            for v in &report.violations {
                prompt.push_str(&format!("- {v}\n"));
            }
        }
        prompt.push_str("Reply with JSON only, shaped like:\n");
        prompt.push_str(CANDIDATE_SCHEMA_HINT);
        prompt
    }
}

/// Decode a completion into a candidate carrying the required name.
fn parse_candidate(text: &str, name: &str) -> std::result::Result<AgentCandidate, ValidationReport> {
    match serde_json::from_str::<AgentCandidate>(extract_json(text)) {
        Ok(c) => {
            let mut c = c.normalized();
            c.declaration.name = name.to_string();
            Ok(c)
        }
        Err(e) => Err(ValidationReport::from_violations(
            name,
            None,
            vec![Violation::new(
                ValidationRule::MalformedCandidate,
                format!("candidate is not valid JSON: {e}"),
            )],
        )),
    }
}

fn found(key: &str, spec: AgentSpec, generated: bool) -> Resolution {
    obs::emit_agent_resolved(key, &spec.agent_ref(), generated);
    Resolution { spec, generated }
}

fn no_agent(key: &str, reason: &str, last_report: Option<ValidationReport>) -> ForgeError {
    ForgeError::NoCapableAgent {
        capabilities: key.to_string(),
        reason: reason.to_string(),
        last_report: last_report.map(Box::new),
    }
}
