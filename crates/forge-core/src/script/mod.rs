//! Agent script: the small language generated agents are written in.
//!
//! The language has values (JSON), functions, `let`, `if`/`else`, `while`,
//! `for .. in`, and a fixed builtin library. It has no filesystem, network,
//! process or reflection primitives; the only way out is `tool(name, args)`,
//! which the host mediates. Every execution is bounded by fuel, a memory
//! budget, and a call-depth limit.

pub mod ast;
pub mod builtins;
mod interp;
mod lexer;
mod parser;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use interp::{truthy, Interpreter, NoTools, ToolHost};
pub use parser::{parse_expression, parse_program};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("fuel exhausted ({0} steps)")]
    FuelExhausted(u64),

    #[error("memory budget of {0} bytes exceeded")]
    MemoryExceeded(usize),

    #[error("call depth limit {0} exceeded")]
    DepthExceeded(usize),

    #[error("execution cancelled")]
    Cancelled,

    #[error("tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },
}

impl ScriptError {
    pub fn is_resource_limit(&self) -> bool {
        matches!(
            self,
            Self::FuelExhausted(_) | Self::MemoryExceeded(_) | Self::DepthExceeded(_)
        )
    }
}

/// Execution bounds for one script run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Statement and expression evaluations allowed.
    pub fuel: u64,
    pub max_memory_bytes: usize,
    pub max_call_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            fuel: 200_000,
            max_memory_bytes: 16 * 1024 * 1024,
            max_call_depth: 32,
        }
    }
}

/// Evaluate an arithmetic expression such as `42 * 15 / 100`, with `pi` and
/// `e` bound. Tool calls are unavailable.
pub fn evaluate_expression(src: &str, limits: Limits) -> Result<Value, ScriptError> {
    let expr = parse_expression(src)?;
    let program = ast::Program {
        functions: Vec::new(),
    };
    let mut host = NoTools;
    let mut interp = Interpreter::new(&program, limits, &mut host);
    let bindings = HashMap::from([
        ("pi".to_string(), Value::from(std::f64::consts::PI)),
        ("e".to_string(), Value::from(std::f64::consts::E)),
    ]);
    interp.eval_with(&expr, bindings)
}
