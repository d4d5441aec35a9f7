//! Engine configuration.
//!
//! Loaded from TOML; every section and field has a default, so an empty
//! file (or no file) is a valid configuration. `FORGE_*` environment
//! variables are applied on top of the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::{HttpBackendConfig, RetryPolicy};
use crate::domain::{ForgeError, Result};
use crate::memory::MemoryConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::resolver::ResolverConfig;
use crate::safety::SafetyConfig;
use crate::tooling::NetworkToolsConfig;
use crate::validator::ValidatorConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `memory` for the in-process fakes, otherwise a SurrealDB endpoint
    /// (`mem://`, `surrealkv://path`, `ws://host:port`).
    pub url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: "memory".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn is_in_process(&self) -> bool {
        self.url == "memory"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    pub http: HttpBackendConfig,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Extra `[[tools]]` manifest merged over the builtin tools.
    pub manifest_path: Option<PathBuf>,
    pub default_timeout_ms: u64,
    /// `http_request` and `web_search`; off unless enabled.
    pub network: NetworkToolsConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            manifest_path: None,
            default_timeout_ms: 10_000,
            network: NetworkToolsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Deprecated versions kept per agent name; older ones are pruned.
    pub retained_deprecated_versions: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            retained_deprecated_versions: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn tracing_level(&self) -> Result<tracing::Level> {
        self.level
            .parse()
            .map_err(|_| ForgeError::Config(format!("unknown log level '{}'", self.level)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub storage: StorageConfig,
    pub backend: BackendSection,
    pub safety: SafetyConfig,
    pub tools: ToolsConfig,
    pub validator: ValidatorConfig,
    pub resolver: ResolverConfig,
    pub orchestrator: OrchestratorConfig,
    pub registry: RegistryConfig,
    pub memory: MemoryConfig,
    pub logging: LoggingConfig,
}

impl ForgeConfig {
    pub fn from_toml_str(src: &str) -> Result<Self> {
        toml::from_str(src).map_err(|e| ForgeError::Config(format!("invalid configuration: {e}")))
    }

    /// Read `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let src = std::fs::read_to_string(path)?;
        Self::from_toml_str(&src).map_err(|e| match e {
            ForgeError::Config(msg) => ForgeError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Apply `FORGE_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any `key -> value` source.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("FORGE_STORAGE_URL") {
            self.storage.url = v;
        }
        if let Some(v) = lookup("FORGE_BACKEND_URL") {
            self.backend.http.base_url = v;
        }
        if let Some(v) = lookup("FORGE_MODEL") {
            self.backend.http.model = v;
        }
        if let Some(v) = lookup("FORGE_TOOL_MANIFEST") {
            self.tools.manifest_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FORGE_NETWORK_TOOLS") {
            self.tools.network.enabled = parse_var("FORGE_NETWORK_TOOLS", &v)?;
        }
        if let Some(v) = lookup("FORGE_RATE_LIMIT") {
            self.safety.subject_rate_limit = parse_var("FORGE_RATE_LIMIT", &v)?;
        }
        if let Some(v) = lookup("FORGE_STEP_TIMEOUT_MS") {
            self.orchestrator.step_timeout_ms = parse_var("FORGE_STEP_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("FORGE_ALLOW_GENERATION") {
            self.resolver.allow_generation = parse_var("FORGE_ALLOW_GENERATION", &v)?;
        }
        if let Some(v) = lookup("FORGE_MEMORY_ENABLED") {
            self.memory.enabled = parse_var("FORGE_MEMORY_ENABLED", &v)?;
        }
        if let Some(v) = lookup("FORGE_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("FORGE_LOG_JSON") {
            self.logging.json = parse_var("FORGE_LOG_JSON", &v)?;
        }
        Ok(())
    }

    /// Reject settings that would make the engine unable to do anything.
    pub fn validate(&self) -> Result<()> {
        let zero = |name: &str| Err(ForgeError::Config(format!("{name} must be greater than zero")));
        if self.storage.url.trim().is_empty() {
            return Err(ForgeError::Config("storage.url must not be empty".into()));
        }
        if self.backend.retry.max_attempts == 0 {
            return zero("backend.retry.max_attempts");
        }
        if self.backend.retry.timeout_ms == 0 {
            return zero("backend.retry.timeout_ms");
        }
        if self.safety.subject_rate_limit == 0 {
            return zero("safety.subject_rate_limit");
        }
        if self.safety.rate_window_secs == 0 {
            return zero("safety.rate_window_secs");
        }
        if self.tools.default_timeout_ms == 0 {
            return zero("tools.default_timeout_ms");
        }
        if self.tools.network.enabled && self.tools.network.request_timeout_ms == 0 {
            return zero("tools.network.request_timeout_ms");
        }
        if self.validator.timeout_ms == 0 {
            return zero("validator.timeout_ms");
        }
        if self.validator.limits.fuel == 0 {
            return zero("validator.limits.fuel");
        }
        if self.validator.limits.max_call_depth == 0 {
            return zero("validator.limits.max_call_depth");
        }
        if self.orchestrator.step_timeout_ms == 0 {
            return zero("orchestrator.step_timeout_ms");
        }
        if self.memory.enabled && (self.memory.top_k == 0 || self.memory.dimensions == 0) {
            return zero("memory.top_k and memory.dimensions");
        }
        self.logging.tracing_level()?;
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| ForgeError::Config(format!("{name} has an invalid value '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn empty_document_is_all_defaults() {
        let config = ForgeConfig::from_toml_str("").unwrap();
        assert_eq!(config, ForgeConfig::default());
        assert!(config.storage.is_in_process());
        assert_eq!(config.registry.retained_deprecated_versions, 3);
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = ForgeConfig::from_toml_str(
            r#"
            [storage]
            url = "surrealkv://forge.db"

            [safety]
            subject_rate_limit = 5

            [resolver]
            max_generation_retries = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.url, "surrealkv://forge.db");
        assert_eq!(config.safety.subject_rate_limit, 5);
        assert_eq!(config.safety.rate_window_secs, 60);
        assert_eq!(config.resolver.max_generation_retries, 4);
        assert!(config.resolver.allow_generation);
    }

    #[test]
    fn load_reads_file_and_tolerates_absence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\njson = true\nlevel = \"debug\"").unwrap();
        let config = ForgeConfig::load(file.path()).unwrap();
        assert!(config.logging.json);
        assert_eq!(config.logging.tracing_level().unwrap(), tracing::Level::DEBUG);

        let dir = tempfile::tempdir().unwrap();
        let missing = ForgeConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(missing, ForgeConfig::default());
    }

    #[test]
    fn bad_toml_names_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[storage\nurl = 1").unwrap();
        let err = ForgeConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ForgeError::Config(msg) if msg.contains(&file.path().display().to_string())));
    }

    #[test]
    fn overrides_apply_and_reject_garbage() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("FORGE_STORAGE_URL", "mem://"),
            ("FORGE_RATE_LIMIT", "7"),
            ("FORGE_ALLOW_GENERATION", "false"),
            ("FORGE_NETWORK_TOOLS", "true"),
        ]);
        let mut config = ForgeConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.storage.url, "mem://");
        assert_eq!(config.safety.subject_rate_limit, 7);
        assert!(!config.resolver.allow_generation);
        assert!(config.tools.network.enabled);

        let err = config
            .apply_overrides(|k| (k == "FORGE_STEP_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ForgeError::Config(msg) if msg.contains("FORGE_STEP_TIMEOUT_MS")));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut config = ForgeConfig::default();
        config.safety.subject_rate_limit = 0;
        assert!(config.validate().is_err());

        let mut config = ForgeConfig::default();
        config.validator.limits.fuel = 0;
        assert!(config.validate().is_err());

        let mut config = ForgeConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn shipped_examples_parse() {
        let config =
            ForgeConfig::from_toml_str(include_str!("../../../config/forge.example.toml")).unwrap();
        config.validate().unwrap();
        assert!(!config.storage.is_in_process());
        assert_eq!(config.safety.permissions.len(), 2);

        let functions = crate::tooling::ToolFunctions::builtin();
        let known = |fn_ref: &str| functions.contains(fn_ref);
        let (tools, rejected) = crate::tooling::ToolManifest::from_toml_str(
            include_str!("../../../config/tools.example.toml"),
            &known,
        )
        .unwrap();
        assert!(rejected.is_empty(), "{rejected:?}");
        assert!(tools.contains("arithmetic"));
    }
}
