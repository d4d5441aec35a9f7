//! Agents written in agent script.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::runtime::Handle;

use super::{Agent, AgentContext, AgentError};
use crate::script::{ast::Program, Interpreter, Limits, ScriptError, ToolHost};
use crate::tooling::{InvocationContext, ToolExecutionError, ToolGateway};

/// Runs `execute(input)` on a blocking thread. Tool calls block that thread
/// on the async gateway.
pub struct ScriptAgent {
    name: String,
    program: Arc<Program>,
    limits: Limits,
}

impl ScriptAgent {
    pub fn new(name: impl Into<String>, program: Arc<Program>, limits: Limits) -> Self {
        Self {
            name: name.into(),
            program,
            limits,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

struct GatewayHost {
    handle: Handle,
    gateway: Arc<ToolGateway>,
    ctx: InvocationContext,
    last_error: Option<ToolExecutionError>,
}

impl ToolHost for GatewayHost {
    fn call_tool(&mut self, name: &str, args: Value) -> Result<Value, String> {
        let result = self
            .handle
            .block_on(self.gateway.invoke(&self.ctx, name, args));
        result.map_err(|e| {
            let message = e.to_string();
            self.last_error = Some(e);
            message
        })
    }
}

/// Stops the interpreter at its next poll if the caller goes away.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl Agent for ScriptAgent {
    async fn execute(&self, input: Value, ctx: &AgentContext) -> Result<Value, AgentError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(cancel.clone());

        let program = self.program.clone();
        let limits = self.limits;
        let mut host = GatewayHost {
            handle: Handle::current(),
            gateway: ctx.gateway().clone(),
            ctx: ctx.invocation(),
            last_error: None,
        };

        let joined = tokio::task::spawn_blocking(move || {
            let result = Interpreter::new(&program, limits, &mut host)
                .with_cancel(cancel)
                .call("execute", vec![input]);
            (result, host.last_error)
        })
        .await
        .map_err(|e| AgentError::Failed(format!("script worker aborted: {e}")))?;

        match joined {
            (Ok(output), _) => Ok(output),
            (Err(ScriptError::Tool { .. }), Some(tool_error)) => Err(AgentError::Tool(tool_error)),
            (Err(e), _) => Err(AgentError::Script(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;
    use crate::safety::{SafetyConfig, SafetyGate};
    use crate::script::parse_program;
    use crate::tooling::{ToolFunctions, ToolManifest};
    use serde_json::json;

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

    fn agent(src: &str) -> ScriptAgent {
        ScriptAgent::new("gen-test", Arc::new(parse_program(src).unwrap()), Limits::default())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tool_calls_reach_the_gateway() {
        let a = agent(
            r#"fn execute(input) {
                let out = tool("calculator", {expression: input.expr});
                return {result: out.result};
            }"#,
        );
        let out = a.execute(json!({"expr": "42 * 15 / 100"}), &ctx()).await.unwrap();
        assert_eq!(out["result"], json!(6.3));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn gateway_errors_surface_as_tool_errors() {
        let a = agent(r#"fn execute(input) { return tool("calculator", {}); }"#);
        let err = a.execute(json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Tool(ToolExecutionError::SchemaViolation { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn script_faults_are_agent_errors() {
        let a = agent("fn execute(input) { return input.x / 0; }");
        let err = a.execute(json!({"x": 1}), &ctx()).await.unwrap_err();
        assert!(matches!(err, AgentError::Script(ScriptError::Runtime(_))));
        assert!(!err.is_retryable());
    }
}
