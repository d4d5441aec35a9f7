//! The engine facade handed to front ends.
//!
//! [`ForgeServiceBuilder`] wires the safety gate, tool gateway, validator,
//! registry, runtime, resolver, planner and orchestrator together and
//! publishes the builtin agents. [`ForgeService::submit`] returns as soon as
//! the task document exists; the run continues on a tokio task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use forge_state::fakes::{MemoryCasStore, MemoryDocumentStore};
use forge_state::{
    CasStore, DocumentCasStore, DocumentStore, MemoryMatch, SemanticMemory, SurrealDocumentStore,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, instrument, warn, Instrument};

use crate::agents::builtin::{catalog, BuiltinAgent, CatalogDeps};
use crate::agents::{Agent, AgentRuntime};
use crate::backend::ReasoningBackend;
use crate::config::ForgeConfig;
use crate::domain::{
    AgentSpec, CodeReference, ForgeError, Result, Task, TaskId, TaskRequest, ValidationReport,
};
use crate::memory::ContextEnricher;
use crate::metrics::{MetricsSnapshot, METRICS};
use crate::obs;
use crate::orchestrator::{CancelToken, Orchestrator};
use crate::planner::Planner;
use crate::registry::{AgentRecord, AgentRegistry};
use crate::resolver::AgentResolver;
use crate::safety::SafetyGate;
use crate::task_store::TaskStore;
use crate::tooling::{
    network, ToolFunction, ToolFunctions, ToolGateway, ToolManifest, ToolManifestEntry,
};
use crate::validator::CodeValidator;

/// Counters plus a few live totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgeStats {
    pub metrics: MetricsSnapshot,
    pub active_agents: usize,
    pub tools: usize,
    pub running_tasks: usize,
    pub memory_entries: usize,
}

struct RunningTask {
    cancel: CancelToken,
    done: watch::Receiver<bool>,
}

#[derive(Default)]
pub struct ForgeServiceBuilder {
    config: ForgeConfig,
    backend: Option<Arc<dyn ReasoningBackend>>,
    documents: Option<Arc<dyn DocumentStore>>,
    sources: Option<Arc<dyn CasStore>>,
    memory: Option<Arc<dyn SemanticMemory>>,
    agents: Vec<BuiltinAgent>,
    tools: Vec<(ToolManifestEntry, Arc<dyn ToolFunction>)>,
}

impl ForgeServiceBuilder {
    pub fn new(config: ForgeConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn backend(mut self, backend: Arc<dyn ReasoningBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Document store; defaults to whatever `storage.url` names.
    pub fn documents(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Agent source store; defaults to blobs inside the document store.
    pub fn sources(mut self, sources: Arc<dyn CasStore>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn SemanticMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Publish an extra builtin agent. `spec` must be a draft whose code
    /// reference is `Builtin { key }`.
    pub fn builtin_agent(mut self, spec: AgentSpec, agent: Arc<dyn Agent>) -> Self {
        self.agents.push(BuiltinAgent { spec, agent });
        self
    }

    pub fn tool(mut self, entry: ToolManifestEntry, function: Arc<dyn ToolFunction>) -> Self {
        self.tools.push((entry, function));
        self
    }

    #[instrument(skip_all)]
    pub async fn build(self) -> Result<ForgeService> {
        let config = self.config;
        config.validate()?;
        let backend = self
            .backend
            .ok_or_else(|| ForgeError::Config("no reasoning backend configured".into()))?;

        let documents: Arc<dyn DocumentStore> = match self.documents {
            Some(documents) => documents,
            None if config.storage.is_in_process() => Arc::new(MemoryDocumentStore::new()),
            None => Arc::new(SurrealDocumentStore::connect(&config.storage.url).await?),
        };
        let sources: Arc<dyn CasStore> = match self.sources {
            Some(sources) => sources,
            None if config.storage.is_in_process() => Arc::new(MemoryCasStore::new()),
            None => Arc::new(DocumentCasStore::new(documents.clone())),
        };

        let gate = Arc::new(SafetyGate::new(&config.safety)?);

        let mut functions = ToolFunctions::builtin();
        let mut manifest = ToolManifest::builtin();
        network::register(&config.tools.network, &mut functions, &mut manifest)?;
        for (entry, function) in self.tools {
            functions.register(entry.fn_ref.clone(), function);
            manifest.insert(entry).map_err(ForgeError::Config)?;
        }
        if let Some(path) = &config.tools.manifest_path {
            let known = |fn_ref: &str| functions.contains(fn_ref);
            let (extra, rejected) = ToolManifest::load(path, &known)?;
            for entry in extra.entries().cloned() {
                let name = entry.tool_name.clone();
                if let Err(reason) = manifest.insert(entry) {
                    warn!(event = "manifest.entry_rejected", tool_name = %name, reason = %reason);
                }
            }
            info!(
                path = %path.display(),
                loaded = extra.names().len(),
                rejected = rejected.len(),
                "tool manifest merged"
            );
        }
        let manifest = Arc::new(manifest);
        let gateway = Arc::new(ToolGateway::new(
            manifest.clone(),
            functions,
            gate.clone(),
            config.tools.default_timeout_ms,
        )?);

        let validator = Arc::new(CodeValidator::new(config.validator.clone(), manifest.clone()));
        let registry = Arc::new(AgentRegistry::new(
            documents.clone(),
            config.registry.retained_deprecated_versions,
        ));

        let mut runtime = AgentRuntime::new(sources.clone(), config.validator.limits);
        let mut builtins = catalog(CatalogDeps {
            backend: backend.clone(),
            retry: config.backend.retry.clone(),
            network_tools: config.tools.network.enabled,
        })?;
        builtins.extend(self.agents);
        let mut specs = Vec::with_capacity(builtins.len());
        for BuiltinAgent { spec, agent } in builtins {
            let key = match &spec.code_reference {
                CodeReference::Builtin { key } => key.clone(),
                other => {
                    return Err(ForgeError::InvalidAgentSpec(format!(
                        "builtin agent '{}' has code reference {other:?}",
                        spec.name
                    )))
                }
            };
            runtime.register_builtin(key, agent);
            specs.push(spec);
        }
        for spec in specs {
            let report = ValidationReport::builtin(spec.name.clone());
            registry.ensure_published(spec, report).await?;
        }
        let runtime = Arc::new(runtime);

        let resolver = Arc::new(AgentResolver::new(
            registry.clone(),
            validator,
            backend.clone(),
            sources,
            manifest,
            config.backend.retry.clone(),
            config.resolver,
        ));
        let planner = Planner::new(backend, config.backend.retry.clone());
        let enricher = Arc::new(ContextEnricher::new(self.memory, config.memory));
        let tasks = TaskStore::new(documents);
        let orchestrator = Arc::new(Orchestrator::new(
            planner,
            resolver,
            registry.clone(),
            runtime,
            gateway.clone(),
            gate,
            tasks.clone(),
            enricher.clone(),
            config.orchestrator,
        ));

        info!(
            agents = registry.list_active().await?.len(),
            tools = gateway.list_tools().len(),
            memory = enricher.is_enabled(),
            "forge service ready"
        );
        Ok(ForgeService {
            orchestrator,
            registry,
            gateway,
            tasks,
            enricher,
            running: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

pub struct ForgeService {
    orchestrator: Arc<Orchestrator>,
    registry: Arc<AgentRegistry>,
    gateway: Arc<ToolGateway>,
    tasks: TaskStore,
    enricher: Arc<ContextEnricher>,
    running: Arc<Mutex<HashMap<TaskId, RunningTask>>>,
}

impl std::fmt::Debug for ForgeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForgeService")
            .field("registry", &self.registry)
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}

fn lock_running(
    running: &Mutex<HashMap<TaskId, RunningTask>>,
) -> MutexGuard<'_, HashMap<TaskId, RunningTask>> {
    running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ForgeService {
    pub fn builder(config: ForgeConfig) -> ForgeServiceBuilder {
        ForgeServiceBuilder::new(config)
    }

    /// Persist a SUBMITTED task and start running it in the background.
    pub async fn submit(&self, request: TaskRequest) -> Result<TaskId> {
        if request.raw_input.trim().is_empty() {
            return Err(ForgeError::InvalidRequest("task input must not be empty".into()));
        }
        let task = Task::new(TaskId::new(), request);
        let id = task.id;
        self.tasks.save(&task).await?;
        METRICS.inc_tasks_submitted();
        obs::emit_task_submitted(&id, &task.user_id);

        let cancel = CancelToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        lock_running(&self.running).insert(
            id,
            RunningTask {
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        let orchestrator = self.orchestrator.clone();
        let running = self.running.clone();
        tokio::spawn(
            async move {
                orchestrator.run(task, cancel).await;
                lock_running(&running).remove(&id);
                let _ = done_tx.send(true);
            }
            .in_current_span(),
        );
        Ok(id)
    }

    pub async fn status(&self, id: &TaskId) -> Result<Task> {
        self.tasks.load(id).await
    }

    /// Block until the task is terminal or `timeout` passes, then return
    /// its latest persisted state.
    pub async fn wait(&self, id: &TaskId, timeout: Duration) -> Result<Task> {
        let done = lock_running(&self.running).get(id).map(|r| r.done.clone());
        if let Some(mut done) = done {
            let _ = tokio::time::timeout(timeout, done.wait_for(|finished| *finished)).await;
        }
        self.tasks.load(id).await
    }

    /// Request cooperative cancellation. `false` when the task is not
    /// running (unknown or already terminal).
    pub fn cancel(&self, id: &TaskId) -> bool {
        match lock_running(&self.running).get(id) {
            Some(running) => {
                running.cancel.cancel();
                info!(event = "task.cancel_requested", task_id = %id);
                true
            }
            None => false,
        }
    }

    pub async fn list_tasks(&self, limit: usize) -> Result<Vec<Task>> {
        self.tasks.recent(limit).await
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentSpec>> {
        self.registry.list_active().await
    }

    /// Every retained version of `name`, oldest first.
    pub async fn agent(&self, name: &str) -> Result<Vec<AgentRecord>> {
        let history = self.registry.history(name).await?;
        if history.is_empty() {
            return Err(ForgeError::AgentNotFound(name.to_string()));
        }
        Ok(history)
    }

    pub async fn deprecate_agent(&self, name: &str) -> Result<()> {
        self.registry.deprecate(name).await
    }

    pub fn list_tools(&self) -> Vec<ToolManifestEntry> {
        self.gateway.list_tools()
    }

    pub async fn search_memory(&self, text: &str, k: usize) -> Result<Vec<MemoryMatch>> {
        self.enricher.search(text, k).await
    }

    pub async fn clear_context(&self) -> Result<()> {
        self.enricher.clear().await?;
        info!(event = "memory.cleared");
        Ok(())
    }

    pub async fn stats(&self) -> Result<ForgeStats> {
        Ok(ForgeStats {
            metrics: METRICS.snapshot(),
            active_agents: self.registry.list_active().await?.len(),
            tools: self.gateway.list_tools().len(),
            running_tasks: lock_running(&self.running).len(),
            memory_entries: self.enricher.len().await?,
        })
    }
}
