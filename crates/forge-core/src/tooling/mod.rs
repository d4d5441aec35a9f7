//! Tool gateway.
//!
//! Every tool call goes through [`ToolGateway::invoke`], which checks in a
//! fixed order:
//! - the tool is in the manifest
//! - arguments satisfy `args_schema`
//! - the safety gate allows `tool:<name>` for the caller
//! - the function answers within the tool's timeout
//! - the result satisfies `returns_schema`
//!
//! The gateway never retries; that is the caller's decision.

pub mod builtin;
pub mod manifest;
pub mod network;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::domain::{ErrorKind, ForgeError, JsonFieldSchema, SchemaViolation, TaskId};
use crate::metrics::METRICS;
use crate::obs;
use crate::safety::{tool_action, Denial, RateKey, SafetyGate};

pub use builtin::{FnTool, ToolFunction, ToolFunctions};
pub use manifest::{ManifestRejection, ToolManifest, ToolManifestEntry};
pub use network::NetworkToolsConfig;

/// Input or output validation stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchemaStage {
    Input,
    Output,
}

/// Execution failure taxonomy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolExecutionError {
    #[error("unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("schema violation for tool '{tool_name}' ({stage:?}): {violation}")]
    SchemaViolation {
        tool_name: String,
        stage: SchemaStage,
        violation: SchemaViolation,
    },

    #[error("tool '{tool_name}' denied: {denial}")]
    Denied { tool_name: String, denial: Denial },

    #[error("tool '{tool_name}' timed out after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },

    #[error("tool '{tool_name}' failed: {message}")]
    Failed { tool_name: String, message: String },
}

impl ToolExecutionError {
    /// Gate denials keep their own category; everything else is a tool error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Denied { denial, .. } => denial.kind(),
            _ => ErrorKind::ToolExecution,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Failed { .. })
    }

    pub fn tool_name(&self) -> &str {
        match self {
            Self::UnknownTool { tool_name }
            | Self::SchemaViolation { tool_name, .. }
            | Self::Denied { tool_name, .. }
            | Self::Timeout { tool_name, .. }
            | Self::Failed { tool_name, .. } => tool_name,
        }
    }
}

/// Who is calling, for the gate and for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    pub user_id: String,
    pub task_id: Option<TaskId>,
}

impl InvocationContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            task_id: None,
        }
    }

    pub fn for_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }
}

pub struct ToolGateway {
    manifest: Arc<ToolManifest>,
    functions: ToolFunctions,
    gate: Arc<SafetyGate>,
    default_timeout_ms: u64,
}

impl std::fmt::Debug for ToolGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolGateway")
            .field("tools", &self.manifest.names())
            .field("default_timeout_ms", &self.default_timeout_ms)
            .finish()
    }
}

impl ToolGateway {
    /// Every manifest entry must resolve to a registered function.
    pub fn new(
        manifest: Arc<ToolManifest>,
        functions: ToolFunctions,
        gate: Arc<SafetyGate>,
        default_timeout_ms: u64,
    ) -> Result<Self, ForgeError> {
        if let Some(entry) = manifest.entries().find(|e| !functions.contains(&e.fn_ref)) {
            return Err(ForgeError::Config(format!(
                "tool '{}' references unknown fn_ref '{}'",
                entry.tool_name, entry.fn_ref
            )));
        }
        Ok(Self {
            manifest,
            functions,
            gate,
            default_timeout_ms,
        })
    }

    pub fn manifest(&self) -> &Arc<ToolManifest> {
        &self.manifest
    }

    pub fn list_tools(&self) -> Vec<ToolManifestEntry> {
        self.manifest.entries().cloned().collect()
    }

    #[instrument(skip(self, args), fields(user = %ctx.user_id))]
    pub async fn invoke(
        &self,
        ctx: &InvocationContext,
        tool_name: &str,
        args: Value,
    ) -> Result<Value, ToolExecutionError> {
        let started = Instant::now();
        let result = self.invoke_inner(ctx, tool_name, args).await;
        METRICS.inc_tool_invocations();
        obs::emit_tool_invoked(
            ctx.task_id.as_ref(),
            tool_name,
            started.elapsed().as_millis() as u64,
            result.as_ref().err(),
        );
        result
    }

    async fn invoke_inner(
        &self,
        ctx: &InvocationContext,
        tool_name: &str,
        args: Value,
    ) -> Result<Value, ToolExecutionError> {
        let entry = self
            .manifest
            .get(tool_name)
            .ok_or_else(|| ToolExecutionError::UnknownTool {
                tool_name: tool_name.to_string(),
            })?;

        validate_schema(tool_name, SchemaStage::Input, &entry.args_schema, &args)?;

        let action = tool_action(tool_name);
        let ceiling = [RateKey::new(action.clone(), entry.rate_limit_per_min)];
        let args = self
            .gate
            .authorize_with_limits(&ctx.user_id, &action, &args, &ceiling)
            .into_payload(args)
            .map_err(|denial| ToolExecutionError::Denied {
                tool_name: tool_name.to_string(),
                denial,
            })?;

        let function = self
            .functions
            .get(&entry.fn_ref)
            .ok_or_else(|| ToolExecutionError::Failed {
                tool_name: tool_name.to_string(),
                message: format!("fn_ref '{}' is not registered", entry.fn_ref),
            })?;

        let timeout_ms = entry.timeout_ms.unwrap_or(self.default_timeout_ms);
        let output = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            function.call(args),
        )
        .await
        {
            Err(_) => {
                return Err(ToolExecutionError::Timeout {
                    tool_name: tool_name.to_string(),
                    timeout_ms,
                })
            }
            Ok(Err(message)) => {
                return Err(ToolExecutionError::Failed {
                    tool_name: tool_name.to_string(),
                    message,
                })
            }
            Ok(Ok(output)) => output,
        };

        validate_schema(tool_name, SchemaStage::Output, &entry.returns_schema, &output)?;
        Ok(output)
    }
}

fn validate_schema(
    tool_name: &str,
    stage: SchemaStage,
    schema: &JsonFieldSchema,
    payload: &Value,
) -> Result<(), ToolExecutionError> {
    schema
        .validate(payload)
        .map_err(|violation| ToolExecutionError::SchemaViolation {
            tool_name: tool_name.to_string(),
            stage,
            violation,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FieldType;
    use crate::safety::SafetyConfig;
    use async_trait::async_trait;
    use serde_json::json;

    struct SlowTool;

    #[async_trait]
    impl ToolFunction for SlowTool {
        async fn call(&self, _args: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!({}))
        }
    }

    fn entry(name: &str, fn_ref: &str) -> ToolManifestEntry {
        ToolManifestEntry {
            tool_name: name.into(),
            fn_ref: fn_ref.into(),
            args_schema: JsonFieldSchema::default(),
            returns_schema: JsonFieldSchema::default(),
            rate_limit_per_min: 100,
            description: String::new(),
            category: String::new(),
            timeout_ms: None,
        }
    }

    fn gateway_with(extra: Vec<ToolManifestEntry>, config: SafetyConfig) -> ToolGateway {
        let mut manifest = ToolManifest::builtin();
        for e in extra {
            manifest.insert(e).unwrap();
        }
        let mut fns = ToolFunctions::builtin();
        fns.register("test::slow", Arc::new(SlowTool));
        fns.register(
            "test::liar",
            Arc::new(FnTool(|_args: Value| -> Result<Value, String> {
                Ok(json!({"nothing": true}))
            })),
        );
        fns.register(
            "test::echo",
            Arc::new(FnTool(|args: Value| -> Result<Value, String> { Ok(args) })),
        );
        let gate = Arc::new(SafetyGate::new(&config).unwrap());
        ToolGateway::new(Arc::new(manifest), fns, gate, 50).unwrap()
    }

    fn gateway() -> ToolGateway {
        gateway_with(vec![], SafetyConfig::default())
    }

    fn ctx() -> InvocationContext {
        InvocationContext::new("tester")
    }

    #[tokio::test]
    async fn happy_path_returns_output() {
        let out = gateway()
            .invoke(&ctx(), "calculator", json!({"expression": "1 + 2 * 3"}))
            .await
            .unwrap();
        assert_eq!(out["result"], 7);
    }

    #[tokio::test]
    async fn unknown_tool_rejected_first() {
        let err = gateway()
            .invoke(&ctx(), "shell", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolExecutionError::UnknownTool { .. }));
        assert_eq!(err.kind(), ErrorKind::ToolExecution);
    }

    #[tokio::test]
    async fn args_schema_checked_before_gate() {
        let gw = gateway_with(
            vec![],
            SafetyConfig {
                permissions: vec![],
                ..SafetyConfig::default()
            },
        );
        let err = gw.invoke(&ctx(), "calculator", json!({})).await.unwrap_err();
        match err {
            ToolExecutionError::SchemaViolation { stage, violation, .. } => {
                assert_eq!(stage, SchemaStage::Input);
                assert_eq!(violation.field(), "expression");
            }
            other => panic!("expected input schema violation, got {other:?}"),
        }

        let err = gw
            .invoke(&ctx(), "calculator", json!({"expression": "1"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn tool_ceiling_enforced() {
        let mut limited = entry("echo", "test::echo");
        limited.rate_limit_per_min = 2;
        let gw = gateway_with(vec![limited], SafetyConfig::default());
        gw.invoke(&ctx(), "echo", json!({"a": 1})).await.unwrap();
        gw.invoke(&ctx(), "echo", json!({"a": 2})).await.unwrap();
        let err = gw.invoke(&ctx(), "echo", json!({"a": 3})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
    }

    #[tokio::test]
    async fn redacted_args_are_forwarded() {
        let gw = gateway_with(vec![entry("echo", "test::echo")], SafetyConfig::default());
        let out = gw
            .invoke(&ctx(), "echo", json!({"text": "mail ann@example.org"}))
            .await
            .unwrap();
        assert_eq!(out["text"], "mail [REDACTED:email]");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let gw = gateway_with(vec![entry("slow", "test::slow")], SafetyConfig::default());
        let err = gw.invoke(&ctx(), "slow", json!({})).await.unwrap_err();
        assert_eq!(
            err,
            ToolExecutionError::Timeout {
                tool_name: "slow".into(),
                timeout_ms: 50
            }
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn returns_schema_checked_last() {
        let mut liar = entry("liar", "test::liar");
        liar.returns_schema = JsonFieldSchema::required(["answer"]).with_type("answer", FieldType::Number);
        let gw = gateway_with(vec![liar], SafetyConfig::default());
        let err = gw.invoke(&ctx(), "liar", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            ToolExecutionError::SchemaViolation { stage: SchemaStage::Output, .. }
        ));
    }

    #[test]
    fn unresolved_fn_ref_is_config_error() {
        let mut manifest = ToolManifest::new();
        manifest.insert(entry("ghost", "nowhere::ghost")).unwrap();
        let gate = Arc::new(SafetyGate::new(&SafetyConfig::default()).unwrap());
        let err = ToolGateway::new(Arc::new(manifest), ToolFunctions::builtin(), gate, 10).unwrap_err();
        assert!(matches!(err, ForgeError::Config(_)));
    }
}
