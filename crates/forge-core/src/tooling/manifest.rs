//! Tool manifest: the whitelist of callable tools.
//!
//! Loaded from TOML `[[tools]]` tables. Each entry is checked on its own; a
//! bad entry is logged and skipped while the rest still load.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{FieldType, ForgeError, JsonFieldSchema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolManifestEntry {
    pub tool_name: String,
    /// Key of the function that implements the tool, e.g. `builtin::calculator`.
    pub fn_ref: String,
    #[serde(default)]
    pub args_schema: JsonFieldSchema,
    #[serde(default)]
    pub returns_schema: JsonFieldSchema,
    pub rate_limit_per_min: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ToolManifestEntry {
    fn check(&self, fn_known: &dyn Fn(&str) -> bool) -> Result<(), String> {
        let name_ok = !self.tool_name.is_empty()
            && self
                .tool_name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !name_ok {
            return Err(format!(
                "tool_name '{}' must be non-empty lowercase [a-z0-9_]",
                self.tool_name
            ));
        }
        if !fn_known(&self.fn_ref) {
            return Err(format!("fn_ref '{}' does not resolve", self.fn_ref));
        }
        if self.rate_limit_per_min == 0 {
            return Err("rate_limit_per_min must be positive".to_string());
        }
        if self.timeout_ms == Some(0) {
            return Err("timeout_ms must be positive".to_string());
        }
        self.args_schema
            .check_well_formed()
            .map_err(|e| format!("args_schema: {e}"))?;
        self.returns_schema
            .check_well_formed()
            .map_err(|e| format!("returns_schema: {e}"))?;
        Ok(())
    }
}

/// An entry that did not make it into the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRejection {
    pub index: usize,
    pub tool_name: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolManifest {
    entries: BTreeMap<String, ToolManifestEntry>,
}

impl ToolManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML text. Only an unreadable document is an error; bad
    /// entries come back as rejections.
    pub fn from_toml_str(
        src: &str,
        fn_known: &dyn Fn(&str) -> bool,
    ) -> Result<(Self, Vec<ManifestRejection>), ForgeError> {
        let doc: toml::Table = toml::from_str(src)
            .map_err(|e| ForgeError::Config(format!("tool manifest is not valid TOML: {e}")))?;

        let raw_entries = match doc.get("tools") {
            None => Vec::new(),
            Some(toml::Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(ForgeError::Config(
                    "tool manifest 'tools' must be an array of tables".to_string(),
                ))
            }
        };

        let mut manifest = Self::new();
        let mut rejected = Vec::new();
        for (index, raw) in raw_entries.into_iter().enumerate() {
            let tool_name = raw
                .get("tool_name")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let outcome = raw
                .try_into::<ToolManifestEntry>()
                .map_err(|e| e.to_string())
                .and_then(|entry| {
                    entry.check(fn_known)?;
                    manifest.insert(entry)
                });
            if let Err(reason) = outcome {
                warn!(
                    event = "manifest.entry_rejected",
                    index,
                    tool_name = tool_name.as_deref().unwrap_or("<unnamed>"),
                    reason = %reason,
                    "skipping malformed tool manifest entry"
                );
                rejected.push(ManifestRejection {
                    index,
                    tool_name,
                    reason,
                });
            }
        }
        Ok((manifest, rejected))
    }

    pub fn load(
        path: &Path,
        fn_known: &dyn Fn(&str) -> bool,
    ) -> Result<(Self, Vec<ManifestRejection>), ForgeError> {
        let src = std::fs::read_to_string(path)?;
        Self::from_toml_str(&src, fn_known)
    }

    /// Default tools backed by the builtin functions.
    pub fn builtin() -> Self {
        let entries = [
            ToolManifestEntry {
                tool_name: "calculator".into(),
                fn_ref: "builtin::calculator".into(),
                args_schema: JsonFieldSchema::required(["expression"])
                    .with_type("expression", FieldType::String),
                returns_schema: JsonFieldSchema::required(["result"])
                    .with_type("result", FieldType::Number),
                rate_limit_per_min: 120,
                description: "Evaluate an arithmetic expression".into(),
                category: "math".into(),
                timeout_ms: Some(1_000),
            },
            ToolManifestEntry {
                tool_name: "text_summarizer".into(),
                fn_ref: "builtin::text_summarizer".into(),
                args_schema: JsonFieldSchema::required(["text"])
                    .with_type("text", FieldType::String)
                    .with_type("max_sentences", FieldType::Number),
                returns_schema: JsonFieldSchema::required(["summary", "keywords"])
                    .with_type("summary", FieldType::String)
                    .with_type("keywords", FieldType::Array),
                rate_limit_per_min: 60,
                description: "Extract the most representative sentences of a text".into(),
                category: "text".into(),
                timeout_ms: Some(2_000),
            },
            ToolManifestEntry {
                tool_name: "datetime".into(),
                fn_ref: "builtin::datetime".into(),
                args_schema: JsonFieldSchema::required(["operation"])
                    .with_type("operation", FieldType::String)
                    .with_type("date", FieldType::String)
                    .with_type("days", FieldType::Number),
                returns_schema: JsonFieldSchema::required(["result"])
                    .with_type("result", FieldType::String),
                rate_limit_per_min: 120,
                description: "Current time, day arithmetic and weekday lookup".into(),
                category: "time".into(),
                timeout_ms: Some(1_000),
            },
            ToolManifestEntry {
                tool_name: "json_parser".into(),
                fn_ref: "builtin::json_parser".into(),
                args_schema: JsonFieldSchema::required(["text"])
                    .with_type("text", FieldType::String)
                    .with_type("path", FieldType::String),
                returns_schema: JsonFieldSchema::required(["value"]),
                rate_limit_per_min: 120,
                description: "Parse JSON text and optionally select a dotted path".into(),
                category: "data".into(),
                timeout_ms: Some(1_000),
            },
        ];
        let mut manifest = Self::new();
        for entry in entries {
            manifest.entries.insert(entry.tool_name.clone(), entry);
        }
        manifest
    }

    /// Add an entry; a name can only be taken once.
    pub fn insert(&mut self, entry: ToolManifestEntry) -> Result<(), String> {
        if self.entries.contains_key(&entry.tool_name) {
            return Err(format!("duplicate tool_name '{}'", entry.tool_name));
        }
        self.entries.insert(entry.tool_name.clone(), entry);
        Ok(())
    }

    pub fn get(&self, tool_name: &str) -> Option<&ToolManifestEntry> {
        self.entries.get(tool_name)
    }

    pub fn contains(&self, tool_name: &str) -> bool {
        self.entries.contains_key(tool_name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ToolManifestEntry> {
        self.entries.values()
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(fn_ref: &str) -> bool {
        fn_ref.starts_with("builtin::")
    }

    #[test]
    fn malformed_entries_are_skipped_individually() {
        let src = r#"
[[tools]]
tool_name = "calculator"
fn_ref = "builtin::calculator"
rate_limit_per_min = 10
args_schema = { required_fields = ["expression"] }

[[tools]]
tool_name = "broken"
fn_ref = "builtin::calculator"

[[tools]]
tool_name = "ghost"
fn_ref = "plugin::ghost"
rate_limit_per_min = 5

[[tools]]
tool_name = "calculator"
fn_ref = "builtin::calculator"
rate_limit_per_min = 10

[[tools]]
tool_name = "dates"
fn_ref = "builtin::datetime"
rate_limit_per_min = 30
timeout_ms = 250
"#;
        let (manifest, rejected) = ToolManifest::from_toml_str(src, &known).unwrap();
        assert_eq!(
            manifest.names().into_iter().collect::<Vec<_>>(),
            vec!["calculator", "dates"]
        );
        assert_eq!(manifest.get("dates").unwrap().timeout_ms, Some(250));

        let indexes: Vec<usize> = rejected.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
        assert!(rejected[1].reason.contains("does not resolve"));
        assert!(rejected[2].reason.contains("duplicate"));
    }

    #[test]
    fn unreadable_document_is_an_error() {
        assert!(ToolManifest::from_toml_str("[[tools]\n", &known).is_err());
        assert!(ToolManifest::from_toml_str("tools = 3", &known).is_err());
    }

    #[test]
    fn empty_document_is_an_empty_manifest() {
        let (manifest, rejected) = ToolManifest::from_toml_str("", &known).unwrap();
        assert!(manifest.is_empty());
        assert!(rejected.is_empty());
    }

    #[test]
    fn builtin_manifest_entries_are_well_formed() {
        let manifest = ToolManifest::builtin();
        assert_eq!(manifest.len(), 4);
        for entry in manifest.entries() {
            entry.check(&known).unwrap();
        }
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools.toml");
        std::fs::write(
            &path,
            "[[tools]]\ntool_name = \"json_parser\"\nfn_ref = \"builtin::json_parser\"\nrate_limit_per_min = 3\n",
        )
        .unwrap();
        let (manifest, rejected) = ToolManifest::load(&path, &known).unwrap();
        assert!(rejected.is_empty());
        assert_eq!(manifest.get("json_parser").unwrap().rate_limit_per_min, 3);
    }
}
