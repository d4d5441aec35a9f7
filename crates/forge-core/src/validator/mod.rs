//! Code validator for generated agents.
//!
//! Two layers. The static layer parses the script and checks it without
//! running anything. Only if it is clean does the dynamic layer execute the
//! script inside the interpreter sandbox, with tool calls answered by
//! synthetic outputs. Both layers are deterministic for a given source and
//! declaration, so the same candidate always gets the same report.

mod sandbox;
pub mod static_rules;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use forge_state::ContentDigest;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::domain::{JsonFieldSchema, ValidationReport, ValidationRule, Violation};
use crate::metrics::METRICS;
use crate::obs;
use crate::script::{parse_program, Limits};
use crate::tooling::ToolManifest;

use sandbox::StubTools;

/// What a candidate claims about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub tools: BTreeSet<String>,
    #[serde(default)]
    pub input_schema: JsonFieldSchema,
    #[serde(default)]
    pub output_schema: JsonFieldSchema,
}

/// Generated agent: declaration plus agent script source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCandidate {
    #[serde(flatten)]
    pub declaration: CandidateDeclaration,
    pub source: String,
}

impl AgentCandidate {
    /// Lowercase and trim capabilities; drop empty ones.
    pub fn normalized(mut self) -> Self {
        self.declaration.capabilities = self
            .declaration
            .capabilities
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        self
    }

    pub fn digest(&self) -> ContentDigest {
        ContentDigest::from_bytes(self.source.as_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub limits: Limits,
    /// Wall-clock budget for the dynamic layer.
    pub timeout_ms: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodeValidator {
    config: ValidatorConfig,
    manifest: Arc<ToolManifest>,
}

impl CodeValidator {
    pub fn new(config: ValidatorConfig, manifest: Arc<ToolManifest>) -> Self {
        Self { config, manifest }
    }

    #[instrument(skip_all, fields(agent = %candidate.declaration.name))]
    pub async fn validate(&self, candidate: &AgentCandidate) -> ValidationReport {
        let violations = self.check(candidate).await;
        let report = ValidationReport::from_violations(
            candidate.declaration.name.clone(),
            Some(candidate.digest()),
            violations,
        );
        if !report.passed() {
            METRICS.inc_validations_failed();
        }
        obs::emit_validation_finished(&report);
        report
    }

    /// Parse and static rules only.
    pub fn validate_static(&self, candidate: &AgentCandidate) -> ValidationReport {
        let violations = match self.static_layer(candidate) {
            Ok(violations) => violations,
            Err(parse_failure) => vec![parse_failure],
        };
        ValidationReport::from_violations(
            candidate.declaration.name.clone(),
            Some(candidate.digest()),
            violations,
        )
    }

    fn static_layer(
        &self,
        candidate: &AgentCandidate,
    ) -> Result<Vec<Violation>, Violation> {
        let decl = &candidate.declaration;
        let program = parse_program(&candidate.source)
            .map_err(|e| Violation::new(ValidationRule::ParseError, e.to_string()))?;

        let mut violations = Vec::new();
        for (label, schema) in [
            ("input_schema", &decl.input_schema),
            ("output_schema", &decl.output_schema),
        ] {
            if let Err(e) = schema.check_well_formed() {
                violations.push(Violation::new(
                    ValidationRule::MalformedCandidate,
                    format!("declared {label}: {e}"),
                ));
            }
        }
        violations.extend(static_rules::check(
            &program,
            &decl.tools,
            &self.manifest.names(),
        ));
        Ok(violations)
    }

    async fn check(&self, candidate: &AgentCandidate) -> Vec<Violation> {
        match self.static_layer(candidate) {
            Err(parse_failure) => return vec![parse_failure],
            Ok(violations) if !violations.is_empty() => return violations,
            Ok(_) => {}
        }
        let Ok(program) = parse_program(&candidate.source) else {
            return vec![Violation::new(ValidationRule::ParseError, "unparseable")];
        };

        let stubs: BTreeMap<_, _> = candidate
            .declaration
            .tools
            .iter()
            .filter_map(|name| {
                self.manifest.get(name).map(|entry| {
                    (
                        name.clone(),
                        (entry.args_schema.clone(), entry.returns_schema.synthesize()),
                    )
                })
            })
            .collect();

        sandbox::run(
            Arc::new(program),
            Arc::new(candidate.declaration.clone()),
            self.config.limits,
            StubTools::new(stubs),
            Duration::from_millis(self.config.timeout_ms),
        )
        .await
    }
}
