//! Agent Forge CLI
//!
//! The `forge` command submits requests to the engine and inspects what it
//! has built so far.
//!
//! ## Commands
//!
//! - `run`: Plan and execute a natural-language request
//! - `status` / `tasks`: Inspect submitted tasks
//! - `agents` / `agent` / `deprecate`: Browse and retire registry entries
//! - `tools` / `check-manifest`: Inspect the tool catalog
//! - `validate`: Run the code validator over a candidate file

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use forge_core::telemetry::level_for_verbosity;
use forge_core::tooling::{network, ToolFunctions};
use forge_core::{
    init_tracing, AgentCandidate, BackendError, CodeValidator, ForgeConfig, ForgeService,
    HttpBackend, ReasoningBackend, ScriptedBackend, TaskId, TaskRequest, ToolManifest,
};
use forge_state::fakes::MemorySemanticMemory;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "forge")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Agent Forge: capability-routed agent orchestration", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "FORGE_CONFIG", default_value = "forge.toml")]
    config: PathBuf,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Output format for command results
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a request and wait for it to finish
    Run {
        /// The request, in plain language
        text: String,

        /// User the request is attributed to (rate limits are per user)
        #[arg(short, long, default_value = "cli")]
        user: String,

        /// Seconds to wait for a terminal state
        #[arg(long, default_value_t = 120)]
        wait: u64,
    },

    /// Show one task
    Status {
        /// Task ID
        id: String,
    },

    /// List recent tasks, newest first
    Tasks {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// List active agents
    Agents,

    /// Show every stored version of an agent
    Agent {
        /// Agent name
        name: String,
    },

    /// Deprecate the live versions of an agent
    Deprecate {
        /// Agent name
        name: String,
    },

    /// List the tool catalog
    Tools,

    /// Validate an agent candidate (JSON) without publishing it
    Validate {
        /// Path to the candidate file
        candidate: PathBuf,
    },

    /// Check a tool manifest file and report rejected entries
    CheckManifest {
        /// Path to the manifest (TOML)
        path: PathBuf,
    },

    /// Forget everything stored in semantic memory
    ClearContext,

    /// Show engine counters
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    let level = if cli.verbose > 0 {
        level_for_verbosity(cli.verbose)
    } else {
        config.logging.tracing_level()?
    };
    init_tracing(cli.json || config.logging.json, level);

    let format = cli.format;
    match cli.command {
        Commands::Run { text, user, wait } => cmd_run(config, format, text, user, wait).await,
        Commands::Status { id } => cmd_status(config, format, &id).await,
        Commands::Tasks { limit } => cmd_tasks(config, format, limit).await,
        Commands::Agents => cmd_agents(config, format).await,
        Commands::Agent { name } => cmd_agent(config, format, &name).await,
        Commands::Deprecate { name } => cmd_deprecate(config, &name).await,
        Commands::Tools => cmd_tools(config, format).await,
        Commands::Validate { candidate } => cmd_validate(config, format, &candidate).await,
        Commands::CheckManifest { path } => cmd_check_manifest(format, &path),
        Commands::ClearContext => cmd_clear_context(config).await,
        Commands::Stats => cmd_stats(config, format).await,
    }
}

fn load_config(path: &Path) -> Result<ForgeConfig> {
    let mut config = ForgeConfig::load(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config
        .apply_env_overrides()
        .context("Invalid FORGE_* environment override")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Build the engine. Commands that only read state get a backend that
/// refuses every call when no API key is configured.
async fn open_service(config: ForgeConfig, needs_backend: bool) -> Result<ForgeService> {
    let backend: Arc<dyn ReasoningBackend> = match HttpBackend::from_env(config.backend.http.clone())
    {
        Ok(http) => Arc::new(http),
        Err(e) if !needs_backend => {
            info!(reason = %e, "reasoning backend not configured; read-only mode");
            Arc::new(unavailable_backend(e.to_string()))
        }
        Err(e) => return Err(e).context("Reasoning backend is not configured"),
    };

    let mut builder = ForgeService::builder(config.clone()).backend(backend);
    if config.memory.enabled {
        builder = builder.memory(Arc::new(MemorySemanticMemory::new()));
    }
    if config.storage.is_in_process() {
        warn!("storage.url is 'memory'; tasks and agents are lost when this command exits");
    }
    builder.build().await.context("Failed to start the engine")
}

/// Stand-in backend for commands that never plan or generate.
fn unavailable_backend(reason: String) -> ScriptedBackend {
    ScriptedBackend::new(move |_| Err(BackendError::Unavailable(reason.clone())))
}

fn emit<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce()) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(),
    }
    Ok(())
}

fn parse_task_id(id: &str) -> Result<TaskId> {
    id.parse::<TaskId>()
        .with_context(|| format!("'{id}' is not a task ID"))
}

async fn cmd_run(
    config: ForgeConfig,
    format: OutputFormat,
    text: String,
    user: String,
    wait: u64,
) -> Result<()> {
    let service = open_service(config, true).await?;
    let id = service
        .submit(TaskRequest::new(text, user))
        .await
        .context("Failed to submit request")?;
    info!(task_id = %id, "submitted");

    let task = service
        .wait(&id, Duration::from_secs(wait))
        .await
        .with_context(|| format!("Task {id} did not finish within {wait}s"))?;

    emit(format, &task, || {
        println!("Task:   {}", task.id);
        println!("Status: {}", task.status());
        for result in &task.step_results {
            println!("  step {} via {}", result.step_id, result.agent);
        }
        if let Some(output) = &task.output {
            println!("Output:");
            println!(
                "{}",
                serde_json::to_string_pretty(output).unwrap_or_else(|_| output.to_string())
            );
        }
        if let Some(failure) = &task.failure {
            println!("Failure: {failure}");
            for cause in &failure.causes {
                println!("  caused by: {cause}");
            }
        }
    })?;

    if task.failure.is_some() {
        bail!("task {id} failed");
    }
    Ok(())
}

async fn cmd_status(config: ForgeConfig, format: OutputFormat, id: &str) -> Result<()> {
    let id = parse_task_id(id)?;
    let service = open_service(config, false).await?;
    let task = service
        .status(&id)
        .await
        .with_context(|| format!("Failed to load task {id}"))?;

    emit(format, &task, || {
        println!("Task:    {}", task.id);
        println!("User:    {}", task.user_id);
        println!("Status:  {}", task.status());
        println!("Request: {}", task.raw_input);
        if let Some(plan) = &task.plan {
            println!("Plan:    {} step(s)", plan.steps.len());
        }
        for (step_id, agent) in &task.resolved_agents {
            println!("  {step_id} -> {agent}");
        }
        if let Some(failure) = &task.failure {
            println!("Failure: {failure}");
        }
    })
}

async fn cmd_tasks(config: ForgeConfig, format: OutputFormat, limit: usize) -> Result<()> {
    let service = open_service(config, false).await?;
    let tasks = service.list_tasks(limit).await.context("Failed to list tasks")?;

    emit(format, &tasks, || {
        if tasks.is_empty() {
            println!("No tasks found.");
            return;
        }
        for task in &tasks {
            println!(
                "{}  {:<10}  {}  {}",
                task.id,
                task.status().to_string(),
                task.created_at.format("%Y-%m-%d %H:%M:%S"),
                task.raw_input
            );
        }
    })
}

async fn cmd_agents(config: ForgeConfig, format: OutputFormat) -> Result<()> {
    let service = open_service(config, false).await?;
    let agents = service.list_agents().await.context("Failed to list agents")?;

    emit(format, &agents, || {
        if agents.is_empty() {
            println!("No active agents.");
            return;
        }
        for spec in &agents {
            let caps: Vec<&str> = spec.capabilities.iter().map(String::as_str).collect();
            println!("{}  [{}]", spec.agent_ref(), caps.join(", "));
        }
    })
}

async fn cmd_agent(config: ForgeConfig, format: OutputFormat, name: &str) -> Result<()> {
    let service = open_service(config, false).await?;
    let history = service
        .agent(name)
        .await
        .with_context(|| format!("Failed to load agent '{name}'"))?;

    emit(format, &history, || {
        for record in &history {
            println!(
                "{}  {:<10}  {}  {}",
                record.spec.agent_ref(),
                record.spec.status().to_string(),
                record.spec.code_reference,
                record.report.summary()
            );
        }
    })
}

async fn cmd_deprecate(config: ForgeConfig, name: &str) -> Result<()> {
    let service = open_service(config, false).await?;
    service
        .deprecate_agent(name)
        .await
        .with_context(|| format!("Failed to deprecate '{name}'"))?;
    println!("Deprecated {name}");
    Ok(())
}

async fn cmd_tools(config: ForgeConfig, format: OutputFormat) -> Result<()> {
    let service = open_service(config, false).await?;
    let tools = service.list_tools();

    emit(format, &tools, || {
        for tool in &tools {
            println!(
                "{:<18} {:>4}/min  {}",
                tool.tool_name, tool.rate_limit_per_min, tool.description
            );
        }
    })
}

/// Builtin manifest plus the configured one, the same view the engine
/// validates generated code against.
fn manifest_for(config: &ForgeConfig) -> Result<ToolManifest> {
    let mut functions = ToolFunctions::builtin();
    let mut manifest = ToolManifest::builtin();
    network::register(&config.tools.network, &mut functions, &mut manifest)
        .context("Failed to set up network tools")?;
    if let Some(path) = &config.tools.manifest_path {
        let known = |fn_ref: &str| functions.contains(fn_ref);
        let (extra, _) = ToolManifest::load(path, &known)
            .with_context(|| format!("Failed to load tool manifest {}", path.display()))?;
        for entry in extra.entries().cloned() {
            let name = entry.tool_name.clone();
            if let Err(reason) = manifest.insert(entry) {
                warn!(tool_name = %name, reason = %reason, "manifest entry skipped");
            }
        }
    }
    Ok(manifest)
}

async fn cmd_validate(config: ForgeConfig, format: OutputFormat, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let candidate: AgentCandidate = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not an agent candidate", path.display()))?;

    let manifest = Arc::new(manifest_for(&config)?);
    let validator = CodeValidator::new(config.validator, manifest);
    let report = validator.validate(&candidate).await;

    emit(format, &report, || {
        let verdict = if report.passed() { "PASS" } else { "FAIL" };
        println!("{}: {verdict}", report.agent_name);
        for violation in &report.violations {
            println!("  {violation}");
        }
    })?;

    if !report.passed() {
        bail!("candidate '{}' failed validation", report.agent_name);
    }
    Ok(())
}

#[derive(Serialize)]
struct ManifestCheck {
    accepted: Vec<String>,
    rejected: Vec<RejectedEntry>,
}

#[derive(Serialize)]
struct RejectedEntry {
    index: usize,
    tool_name: Option<String>,
    reason: String,
}

fn cmd_check_manifest(format: OutputFormat, path: &Path) -> Result<()> {
    let functions = ToolFunctions::builtin();
    let known = |fn_ref: &str| functions.contains(fn_ref);
    let (manifest, rejected) = ToolManifest::load(path, &known)
        .with_context(|| format!("Failed to load tool manifest {}", path.display()))?;

    let check = ManifestCheck {
        accepted: manifest.names().into_iter().collect(),
        rejected: rejected
            .into_iter()
            .map(|r| RejectedEntry {
                index: r.index,
                tool_name: r.tool_name,
                reason: r.reason,
            })
            .collect(),
    };

    emit(format, &check, || {
        for name in &check.accepted {
            println!("ok       {name}");
        }
        for entry in &check.rejected {
            println!(
                "rejected #{} {}: {}",
                entry.index,
                entry.tool_name.as_deref().unwrap_or("<unnamed>"),
                entry.reason
            );
        }
    })?;

    if !check.rejected.is_empty() {
        bail!("manifest has {} rejected entries", check.rejected.len());
    }
    Ok(())
}

async fn cmd_clear_context(config: ForgeConfig) -> Result<()> {
    let service = open_service(config, false).await?;
    service
        .clear_context()
        .await
        .context("Failed to clear semantic memory")?;
    println!("Context cleared");
    Ok(())
}

async fn cmd_stats(config: ForgeConfig, format: OutputFormat) -> Result<()> {
    let service = open_service(config, false).await?;
    let stats = service.stats().await.context("Failed to collect stats")?;

    emit(format, &stats, || {
        println!("Active agents:    {}", stats.active_agents);
        println!("Tools:            {}", stats.tools);
        println!("Running tasks:    {}", stats.running_tasks);
        println!("Memory entries:   {}", stats.memory_entries);
        println!("Tasks submitted:  {}", stats.metrics.tasks_submitted);
        println!("Tasks completed:  {}", stats.metrics.tasks_completed);
        println!("Tasks failed:     {}", stats.metrics.tasks_failed);
        println!("Agents generated: {}", stats.metrics.agents_generated);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_with_defaults() {
        let cli = Cli::try_parse_from(["forge", "run", "Calculate 15% tip on $42"]).unwrap();
        assert_eq!(cli.verbose, 0);
        assert_eq!(cli.format, OutputFormat::Text);
        match cli.command {
            Commands::Run { text, user, wait } => {
                assert_eq!(text, "Calculate 15% tip on $42");
                assert_eq!(user, "cli");
                assert_eq!(wait, 120);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["forge", "tasks", "--limit", "5", "-vv", "--format", "json"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Tasks { limit: 5 }));
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert!(config.storage.is_in_process());
    }

    #[test]
    fn test_check_manifest_flags_unknown_function() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools.toml");
        std::fs::write(
            &path,
            r#"
[[tools]]
tool_name = "calc2"
fn_ref = "builtin::calculator"
rate_limit_per_min = 10

[[tools]]
tool_name = "mystery"
fn_ref = "builtin::nope"
rate_limit_per_min = 10
"#,
        )
        .unwrap();
        let err = cmd_check_manifest(OutputFormat::Json, &path).unwrap_err();
        assert!(err.to_string().contains("1 rejected"));
    }

    #[tokio::test]
    async fn test_validate_rejects_network_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("candidate.json");
        let candidate = serde_json::json!({
            "name": "gen-fetch",
            "capabilities": ["fetch"],
            "tools": [],
            "input_schema": {"required_fields": [], "field_types": {}},
            "output_schema": {"required_fields": [], "field_types": {}},
            "source": "fn name() { return \"gen-fetch\"; }\nfn capabilities() { return [\"fetch\"]; }\nfn input_schema() { return {required_fields: [], field_types: {}}; }\nfn output_schema() { return {required_fields: [], field_types: {}}; }\nfn execute(input) { return http_get(\"https://example.com\"); }\n",
        });
        std::fs::write(&path, candidate.to_string()).unwrap();

        let err = cmd_validate(ForgeConfig::default(), OutputFormat::Json, &path)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed validation"));
    }
}
