//! Dynamic layer: run the candidate inside the interpreter sandbox.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::CandidateDeclaration;
use crate::domain::{JsonFieldSchema, ValidationRule, Violation};
use crate::script::ast::Program;
use crate::script::{builtins, Interpreter, Limits, ScriptError, ToolHost};

/// Synthetic tool answers, shaped by each tool's manifest schemas.
#[derive(Debug, Clone, Default)]
pub(crate) struct StubTools {
    tools: BTreeMap<String, (JsonFieldSchema, Value)>,
}

impl StubTools {
    pub(crate) fn new(tools: BTreeMap<String, (JsonFieldSchema, Value)>) -> Self {
        Self { tools }
    }
}

impl ToolHost for StubTools {
    fn call_tool(&mut self, name: &str, args: Value) -> Result<Value, String> {
        let (args_schema, output) = self
            .tools
            .get(name)
            .ok_or_else(|| format!("tool '{name}' is not available"))?;
        args_schema
            .validate(&args)
            .map_err(|v| format!("arguments rejected: {v}"))?;
        Ok(output.clone())
    }
}

/// One-line description of a script failure, never a trace.
fn failure_violation(err: &ScriptError, during: &str) -> Violation {
    match err {
        ScriptError::Cancelled => Violation::new(
            ValidationRule::SandboxTimeout,
            format!("{during}: wall-clock limit reached"),
        ),
        e if e.is_resource_limit() => {
            Violation::new(ValidationRule::ResourceLimit, format!("{during}: {e}"))
        }
        e => Violation::new(ValidationRule::SandboxException, format!("{during}: {e}")),
    }
}

fn schema_shape(schema: &JsonFieldSchema) -> (BTreeSet<&str>, Vec<(&str, String)>) {
    (
        schema.required_fields.iter().map(String::as_str).collect(),
        schema
            .field_types
            .iter()
            .map(|(k, v)| (k.as_str(), v.to_string()))
            .collect(),
    )
}

fn compare_schema(
    op: &str,
    reported: Value,
    declared: &JsonFieldSchema,
    out: &mut Vec<Violation>,
) {
    match serde_json::from_value::<JsonFieldSchema>(reported) {
        Err(e) => out.push(Violation::new(
            ValidationRule::DeclarationMismatch,
            format!("{op}() did not return a schema: {e}"),
        )),
        Ok(actual) if schema_shape(&actual) != schema_shape(declared) => out.push(Violation::new(
            ValidationRule::DeclarationMismatch,
            format!("{op}() differs from the declared {op}"),
        )),
        Ok(_) => {}
    }
}

/// Calls the identity operations, then `execute` on synthetic input.
fn exercise(
    program: &Program,
    declaration: &CandidateDeclaration,
    limits: Limits,
    mut host: StubTools,
    cancel: Arc<AtomicBool>,
) -> Vec<Violation> {
    let mut out = Vec::new();
    let mut interp = Interpreter::new(program, limits, &mut host).with_cancel(cancel);

    match interp.call("name", vec![]) {
        Ok(Value::String(name)) if name == declaration.name => {}
        Ok(other) => out.push(Violation::new(
            ValidationRule::DeclarationMismatch,
            format!("name() returned {other}, declared \"{}\"", declaration.name),
        )),
        Err(e) => return vec![failure_violation(&e, "name()")],
    }

    match interp.call("capabilities", vec![]) {
        Ok(Value::Array(items)) => {
            let reported: BTreeSet<String> = items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_lowercase())
                .collect();
            if reported != declaration.capabilities || reported.len() != items.len() {
                out.push(Violation::new(
                    ValidationRule::DeclarationMismatch,
                    "capabilities() differs from the declared capabilities",
                ));
            }
        }
        Ok(other) => out.push(Violation::new(
            ValidationRule::DeclarationMismatch,
            format!(
                "capabilities() returned {}, expected an array",
                builtins::type_name(&other)
            ),
        )),
        Err(e) => return vec![failure_violation(&e, "capabilities()")],
    }

    for (op, declared) in [
        ("input_schema", &declaration.input_schema),
        ("output_schema", &declaration.output_schema),
    ] {
        match interp.call(op, vec![]) {
            Ok(reported) => compare_schema(op, reported, declared, &mut out),
            Err(e) => return vec![failure_violation(&e, &format!("{op}()"))],
        }
    }

    let input = declaration.input_schema.synthesize();
    match interp.call("execute", vec![input]) {
        Ok(output) => {
            if let Err(v) = declaration.output_schema.validate(&output) {
                out.push(Violation::new(
                    ValidationRule::OutputSchemaMismatch,
                    format!("execute() output: {v}"),
                ));
            }
        }
        Err(e) => out.push(failure_violation(&e, "execute()")),
    }
    out
}

/// Run the dynamic checks on a blocking thread under a wall-clock timeout.
/// On timeout the interpreter is told to stop at its next poll.
pub(crate) async fn run(
    program: Arc<Program>,
    declaration: Arc<CandidateDeclaration>,
    limits: Limits,
    host: StubTools,
    timeout: Duration,
) -> Vec<Violation> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    let handle = tokio::task::spawn_blocking(move || {
        exercise(&program, &declaration, limits, host, flag)
    });

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(violations)) => violations,
        Ok(Err(join)) => {
            let cause = if join.is_panic() { "panic" } else { "cancelled" };
            vec![Violation::new(
                ValidationRule::SandboxException,
                format!("sandbox worker aborted: {cause}"),
            )]
        }
        Err(_) => {
            cancel.store(true, Ordering::Relaxed);
            vec![Violation::new(
                ValidationRule::SandboxTimeout,
                format!("execution exceeded {}ms", timeout.as_millis()),
            )]
        }
    }
}
