//! Durable agent catalog.
//!
//! Layout in the document store:
//!
//! - `agents/{name}/head`: `{latest_version}`, the version counter. Bumped
//!   by compare-and-swap, so two publishers can never reserve the same number.
//! - `agents/{name}/v{version:010}`: `{spec, report}`, written create-only.
//!
//! Mutations (publish, deprecate) hold a per-name lock. Lookups read the
//! current documents without locking. A name has at most one ACTIVE version
//! once a publish returns; readers that race the short window between
//! writing the new version and deprecating the old one still see only the
//! highest live version per name.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use forge_state::{Document, DocumentStore, StorageError};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::domain::{AgentStatus, AgentSpec, ForgeError, Result, ValidationReport};
use crate::obs;
use crate::sync::KeyedLocks;

const MAX_PUBLISH_ATTEMPTS: u32 = 5;

/// A published version with the report that admitted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub spec: AgentSpec,
    pub report: ValidationReport,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Head {
    latest_version: u64,
}

fn head_key(name: &str) -> String {
    format!("agents/{name}/head")
}

fn versions_prefix(name: &str) -> String {
    format!("agents/{name}/v")
}

fn version_key(name: &str, version: u64) -> String {
    format!("agents/{name}/v{version:010}")
}

fn is_version_key(key: &str) -> bool {
    key.rsplit('/')
        .next()
        .is_some_and(|leaf| leaf.starts_with('v') && leaf[1..].bytes().all(|b| b.is_ascii_digit()))
}

fn check_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(ForgeError::InvalidAgentSpec(format!(
            "agent name '{name}' must be non-empty ASCII letters, digits, '-', '_' or '.'"
        )))
    }
}

/// Lookup preference: highest version, then latest activation, then the
/// lexically smallest name.
fn preference(a: &AgentSpec, b: &AgentSpec) -> Ordering {
    a.version()
        .cmp(&b.version())
        .then_with(|| a.activated_at().cmp(&b.activated_at()))
        .then_with(|| b.name.cmp(&a.name))
}

pub struct AgentRegistry {
    store: Arc<dyn DocumentStore>,
    locks: KeyedLocks,
    retained_deprecated: usize,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("retained_deprecated", &self.retained_deprecated)
            .finish_non_exhaustive()
    }
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn DocumentStore>, retained_deprecated: usize) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            retained_deprecated,
        }
    }

    /// Admit a DRAFT spec backed by a passing report. Assigns the next
    /// version and makes it the single ACTIVE version of its name.
    #[instrument(skip_all, fields(agent = %spec.name))]
    pub async fn publish(&self, spec: AgentSpec, report: ValidationReport) -> Result<AgentSpec> {
        check_name(&spec.name)?;
        if !report.passed() {
            return Err(ForgeError::ValidationFailure {
                agent_name: report.agent_name.clone(),
                summary: report.summary(),
            });
        }
        if report.agent_name != spec.name {
            return Err(ForgeError::InvalidAgentSpec(format!(
                "report is for '{}', spec is '{}'",
                report.agent_name, spec.name
            )));
        }
        if spec.status() != AgentStatus::Draft {
            return Err(ForgeError::InvalidTransition {
                entity: format!("agent '{}'", spec.name),
                from: spec.status().to_string(),
                to: AgentStatus::Validated.to_string(),
            });
        }

        let _guard = self.locks.lock(&spec.name).await;
        let mut last_version = 0;
        for attempt in 1..=MAX_PUBLISH_ATTEMPTS {
            let version = self.reserve_version(&spec.name).await?;
            last_version = version;

            let mut candidate = spec.clone();
            candidate.version = version;
            candidate.advance(AgentStatus::Validated)?;
            candidate.advance(AgentStatus::Registered)?;
            candidate.advance(AgentStatus::Active)?;

            let record = AgentRecord {
                spec: candidate,
                report: report.clone(),
            };
            let key = version_key(&spec.name, version);
            match self
                .store
                .compare_and_swap(&key, None, serde_json::to_value(&record)?)
                .await
            {
                Ok(_) => {
                    let superseded = self.deprecate_superseded(&spec.name).await?;
                    self.prune(&spec.name).await?;
                    obs::emit_agent_published(&record.spec.agent_ref(), superseded);
                    return Ok(record.spec);
                }
                Err(StorageError::CasConflict { .. }) => {
                    warn!(agent = %spec.name, version, attempt, "version already taken, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ForgeError::RegistryConflict {
            name: spec.name,
            version: last_version,
        })
    }

    /// Publish unless an equivalent spec is already active. Used for
    /// builtins on every start.
    pub async fn ensure_published(
        &self,
        spec: AgentSpec,
        report: ValidationReport,
    ) -> Result<AgentSpec> {
        if let Some(current) = self.get(&spec.name).await? {
            let live = &current.spec;
            if live.status() == AgentStatus::Active
                && live.code_reference == spec.code_reference
                && live.capabilities == spec.capabilities
                && live.tools == spec.tools
                && live.input_schema == spec.input_schema
                && live.output_schema == spec.output_schema
            {
                return Ok(current.spec);
            }
        }
        self.publish(spec, report).await
    }

    /// Bump the head counter by compare-and-swap.
    async fn reserve_version(&self, name: &str) -> Result<u64> {
        let key = head_key(name);
        for _ in 0..MAX_PUBLISH_ATTEMPTS {
            let current = self.store.get(&key).await?;
            let (revision, latest) = match &current {
                Some(doc) => (Some(doc.revision), doc.decode::<Head>()?.latest_version),
                None => (None, 0),
            };
            let next = latest + 1;
            let head = serde_json::to_value(Head {
                latest_version: next,
            })?;
            match self.store.compare_and_swap(&key, revision, head).await {
                Ok(_) => return Ok(next),
                Err(StorageError::CasConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(ForgeError::RegistryConflict {
            name: name.to_string(),
            version: 0,
        })
    }

    async fn version_docs(&self, name: &str) -> Result<Vec<(Document, AgentRecord)>> {
        let docs = self.store.list_prefix(&versions_prefix(name)).await?;
        docs.into_iter()
            .filter(|d| is_version_key(&d.key))
            .map(|d| {
                let record = d.decode::<AgentRecord>()?;
                Ok((d, record))
            })
            .collect()
    }

    /// Move `record` one lifecycle step forward and write it back at the
    /// revision it was read at.
    async fn write_status(
        &self,
        doc: &Document,
        mut record: AgentRecord,
        next: AgentStatus,
    ) -> Result<AgentRecord> {
        record.spec.advance(next)?;
        self.store
            .compare_and_swap(&doc.key, Some(doc.revision), serde_json::to_value(&record)?)
            .await?;
        Ok(record)
    }

    /// Deprecate every ACTIVE version of `name` but the highest. Writers in
    /// other processes run the same rule, so interleaved publishes converge;
    /// a lost compare-and-swap means another writer already moved that
    /// document. Returns the highest version superseded.
    async fn deprecate_superseded(&self, name: &str) -> Result<Option<u64>> {
        let docs = self.version_docs(name).await?;
        let newest = docs
            .iter()
            .filter(|(_, r)| r.spec.status() == AgentStatus::Active)
            .map(|(_, r)| r.spec.version())
            .max();
        let mut superseded = None;
        for (doc, record) in docs {
            let version = record.spec.version();
            if record.spec.status() != AgentStatus::Active || Some(version) == newest {
                continue;
            }
            match self.write_status(&doc, record, AgentStatus::Deprecated).await {
                Ok(record) => {
                    obs::emit_agent_deprecated(&record.spec.agent_ref());
                    superseded = superseded.max(Some(version));
                }
                Err(ForgeError::Storage(StorageError::CasConflict { .. })) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(superseded)
    }

    /// Keep the newest `retained_deprecated` DEPRECATED versions of `name`.
    async fn prune(&self, name: &str) -> Result<()> {
        let mut deprecated: Vec<String> = self
            .version_docs(name)
            .await?
            .into_iter()
            .filter(|(_, r)| r.spec.status() == AgentStatus::Deprecated)
            .map(|(d, _)| d.key)
            .collect();
        // Zero-padded keys sort by version.
        deprecated.sort();
        let excess = deprecated.len().saturating_sub(self.retained_deprecated);
        for key in deprecated.into_iter().take(excess) {
            self.store.delete(&key).await?;
        }
        Ok(())
    }

    /// Deprecate the active version of `name`. Repeating it is a no-op.
    #[instrument(skip(self))]
    pub async fn deprecate(&self, name: &str) -> Result<()> {
        let _guard = self.locks.lock(name).await;
        let docs = self.version_docs(name).await?;
        if docs.is_empty() {
            return Err(ForgeError::AgentNotFound(name.to_string()));
        }
        for (doc, record) in docs {
            if record.spec.status() == AgentStatus::Active {
                let record = self.write_status(&doc, record, AgentStatus::Deprecated).await?;
                obs::emit_agent_deprecated(&record.spec.agent_ref());
            }
        }
        self.prune(name).await
    }

    /// Best ACTIVE spec whose capabilities cover `required`.
    pub async fn lookup(&self, required: &BTreeSet<String>) -> Result<Option<AgentSpec>> {
        Ok(self
            .list_active()
            .await?
            .into_iter()
            .filter(|spec| spec.covers(required))
            .max_by(preference))
    }

    /// The highest live version of every name, ordered by name.
    pub async fn list_active(&self) -> Result<Vec<AgentSpec>> {
        let mut best: BTreeMap<String, AgentSpec> = BTreeMap::new();
        for doc in self.store.list_prefix("agents/").await? {
            if !is_version_key(&doc.key) {
                continue;
            }
            let spec = doc.decode::<AgentRecord>()?.spec;
            if spec.status() != AgentStatus::Active {
                continue;
            }
            match best.get(&spec.name) {
                Some(current) if current.version() >= spec.version() => {}
                _ => {
                    best.insert(spec.name.clone(), spec);
                }
            }
        }
        Ok(best.into_values().collect())
    }

    /// Latest retained version of `name`, whatever its status.
    pub async fn get(&self, name: &str) -> Result<Option<AgentRecord>> {
        Ok(self.version_docs(name).await?.pop().map(|(_, r)| r))
    }

    pub async fn get_version(&self, name: &str, version: u64) -> Result<Option<AgentRecord>> {
        match self.store.get(&version_key(name, version)).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Every retained version of `name`, oldest first.
    pub async fn history(&self, name: &str) -> Result<Vec<AgentRecord>> {
        Ok(self
            .version_docs(name)
            .await?
            .into_iter()
            .map(|(_, r)| r)
            .collect())
    }

    /// Union of the capabilities of every ACTIVE agent.
    pub async fn capability_vocabulary(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .list_active()
            .await?
            .into_iter()
            .flat_map(|spec| spec.capabilities)
            .collect())
    }
}
