//! Tree-walking interpreter with fuel, memory and call-depth limits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Number, Value};

use super::ast::{BinaryOp, Expr, Program, Stmt, UnaryOp};
use super::builtins::{self, as_number, display, type_name};
use super::{Limits, ScriptError};

/// Cancellation is polled every this many fuel units.
const CANCEL_POLL_INTERVAL: u64 = 256;

/// Bridge from `tool(name, args)` to whatever executes tools.
pub trait ToolHost {
    fn call_tool(&mut self, name: &str, args: Value) -> Result<Value, String>;
}

/// Host for contexts where tools are unavailable.
pub struct NoTools;

impl ToolHost for NoTools {
    fn call_tool(&mut self, name: &str, _args: Value) -> Result<Value, String> {
        Err(format!("tool '{name}' is not available here"))
    }
}

enum Flow {
    Normal,
    Return(Value),
}

type Scopes = Vec<HashMap<String, Value>>;

pub fn make_number(x: f64) -> Result<Value, ScriptError> {
    if !x.is_finite() {
        return Err(ScriptError::Runtime(
            "arithmetic produced a non-finite number".to_string(),
        ));
    }
    if x.fract() == 0.0 && x.abs() < 9.0e15 {
        return Ok(Value::from(x as i64));
    }
    Number::from_f64(x)
        .map(Value::Number)
        .ok_or_else(|| ScriptError::Runtime("invalid number".to_string()))
}

pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Rough heap footprint of a value, used for the memory budget.
fn approx_size(v: &Value) -> usize {
    match v {
        Value::Null | Value::Bool(_) | Value::Number(_) => 8,
        Value::String(s) => 24 + s.len(),
        Value::Array(items) => 24 + items.iter().map(approx_size).sum::<usize>(),
        Value::Object(map) => {
            48 + map
                .iter()
                .map(|(k, v)| 24 + k.len() + approx_size(v))
                .sum::<usize>()
        }
    }
}

pub struct Interpreter<'p, 'h> {
    program: &'p Program,
    host: &'h mut dyn ToolHost,
    limits: Limits,
    fuel_used: u64,
    memory_used: usize,
    depth: usize,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'p, 'h> Interpreter<'p, 'h> {
    pub fn new(program: &'p Program, limits: Limits, host: &'h mut dyn ToolHost) -> Self {
        Self {
            program,
            host,
            limits,
            fuel_used: 0,
            memory_used: 0,
            depth: 0,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn fuel_used(&self) -> u64 {
        self.fuel_used
    }

    pub fn memory_used(&self) -> usize {
        self.memory_used
    }

    /// Call a top-level function by name.
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
        let program = self.program;
        let f = program
            .function(name)
            .ok_or_else(|| ScriptError::Runtime(format!("unknown function '{name}'")))?;
        if f.params.len() != args.len() {
            return Err(ScriptError::Runtime(format!(
                "{name}() takes {} argument(s), got {}",
                f.params.len(),
                args.len()
            )));
        }
        if self.depth >= self.limits.max_call_depth {
            return Err(ScriptError::DepthExceeded(self.limits.max_call_depth));
        }
        self.depth += 1;
        let frame: HashMap<String, Value> = f.params.iter().cloned().zip(args).collect();
        let mut scopes = vec![frame];
        let flow = self.exec_block(&f.body, &mut scopes);
        self.depth -= 1;
        match flow? {
            Flow::Return(v) => Ok(v),
            Flow::Normal => Ok(Value::Null),
        }
    }

    /// Evaluate a free expression against the given bindings.
    pub fn eval_with(
        &mut self,
        expr: &Expr,
        bindings: HashMap<String, Value>,
    ) -> Result<Value, ScriptError> {
        let mut scopes = vec![bindings];
        self.eval(expr, &mut scopes)
    }

    fn tick(&mut self) -> Result<(), ScriptError> {
        self.fuel_used += 1;
        if self.fuel_used > self.limits.fuel {
            return Err(ScriptError::FuelExhausted(self.limits.fuel));
        }
        if self.fuel_used % CANCEL_POLL_INTERVAL == 0 {
            if let Some(flag) = &self.cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(ScriptError::Cancelled);
                }
            }
        }
        Ok(())
    }

    fn charge(&mut self, bytes: usize) -> Result<(), ScriptError> {
        self.memory_used = self.memory_used.saturating_add(bytes);
        if self.memory_used > self.limits.max_memory_bytes {
            return Err(ScriptError::MemoryExceeded(self.limits.max_memory_bytes));
        }
        Ok(())
    }

    fn exec_block(&mut self, stmts: &[Stmt], scopes: &mut Scopes) -> Result<Flow, ScriptError> {
        scopes.push(HashMap::new());
        let mut flow = Ok(Flow::Normal);
        for stmt in stmts {
            match self.exec(stmt, scopes) {
                Ok(Flow::Normal) => {}
                other => {
                    flow = other;
                    break;
                }
            }
        }
        scopes.pop();
        flow
    }

    fn exec(&mut self, stmt: &Stmt, scopes: &mut Scopes) -> Result<Flow, ScriptError> {
        self.tick()?;
        match stmt {
            Stmt::Let { name, value, .. } => {
                let v = self.eval(value, scopes)?;
                if let Some(scope) = scopes.last_mut() {
                    scope.insert(name.clone(), v);
                }
                Ok(Flow::Normal)
            }
            Stmt::Assign { name, value, line } => {
                let v = self.eval(value, scopes)?;
                match scopes.iter_mut().rev().find(|s| s.contains_key(name)) {
                    Some(scope) => {
                        scope.insert(name.clone(), v);
                        Ok(Flow::Normal)
                    }
                    None => Err(ScriptError::Runtime(format!(
                        "line {line}: assignment to undeclared variable '{name}'"
                    ))),
                }
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if truthy(&self.eval(cond, scopes)?) {
                    self.exec_block(then_branch, scopes)
                } else if let Some(other) = else_branch {
                    self.exec_block(other, scopes)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { cond, body } => {
                while truthy(&self.eval(cond, scopes)?) {
                    self.tick()?;
                    if let Flow::Return(v) = self.exec_block(body, scopes)? {
                        return Ok(Flow::Return(v));
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For { var, iter, body } => {
                let items: Vec<Value> = match self.eval(iter, scopes)? {
                    Value::Array(items) => items,
                    Value::Object(map) => map.keys().map(|k| Value::String(k.clone())).collect(),
                    Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                    other => {
                        return Err(ScriptError::Runtime(format!(
                            "cannot iterate over {}",
                            type_name(&other)
                        )))
                    }
                };
                for item in items {
                    self.tick()?;
                    scopes.push(HashMap::from([(var.clone(), item)]));
                    let flow = self.exec_block(body, scopes);
                    scopes.pop();
                    if let Flow::Return(v) = flow? {
                        return Ok(Flow::Return(v));
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(e, scopes)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(v))
            }
            Stmt::Expr(e) => {
                self.eval(e, scopes)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn eval(&mut self, expr: &Expr, scopes: &mut Scopes) -> Result<Value, ScriptError> {
        self.tick()?;
        match expr {
            Expr::Number(n) => make_number(*n),
            Expr::Str(s) => {
                self.charge(24 + s.len())?;
                Ok(Value::String(s.clone()))
            }
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Ident { name, line } => scopes
                .iter()
                .rev()
                .find_map(|s| s.get(name))
                .cloned()
                .ok_or_else(|| {
                    ScriptError::Runtime(format!("line {line}: undefined variable '{name}'"))
                }),
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item, scopes)?);
                }
                self.charge(24 + 16 * out.len())?;
                Ok(Value::Array(out))
            }
            Expr::Object(fields) => {
                let mut map = serde_json::Map::new();
                for (key, value) in fields {
                    let v = self.eval(value, scopes)?;
                    self.charge(24 + key.len())?;
                    map.insert(key.clone(), v);
                }
                Ok(Value::Object(map))
            }
            Expr::Unary { op, expr } => {
                let v = self.eval(expr, scopes)?;
                match op {
                    UnaryOp::Neg => make_number(-as_number(&v, "unary '-'")?),
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&v))),
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.eval(lhs, scopes)?;
                let r = self.eval(rhs, scopes)?;
                self.binary(*op, l, r)
            }
            Expr::And(lhs, rhs) => {
                if !truthy(&self.eval(lhs, scopes)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(truthy(&self.eval(rhs, scopes)?)))
            }
            Expr::Or(lhs, rhs) => {
                if truthy(&self.eval(lhs, scopes)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(truthy(&self.eval(rhs, scopes)?)))
            }
            Expr::Field { target, name } => match self.eval(target, scopes)? {
                Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
                Value::Null => Ok(Value::Null),
                other => Err(ScriptError::Runtime(format!(
                    "cannot read field '{name}' of {}",
                    type_name(&other)
                ))),
            },
            Expr::Index { target, index } => {
                let t = self.eval(target, scopes)?;
                let i = self.eval(index, scopes)?;
                index_value(&t, &i)
            }
            Expr::Call { name, args, line } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, scopes)?);
                }
                self.call_named(name, values, *line)
            }
        }
    }

    fn call_named(
        &mut self,
        name: &str,
        args: Vec<Value>,
        line: usize,
    ) -> Result<Value, ScriptError> {
        if self.program.function(name).is_some() {
            return self.call(name, args);
        }
        let (lo, hi) = builtins::arity(name).ok_or_else(|| {
            ScriptError::Runtime(format!("line {line}: unknown function '{name}'"))
        })?;
        if args.len() < lo || args.len() > hi {
            return Err(ScriptError::Runtime(format!(
                "line {line}: {name}() got {} argument(s)",
                args.len()
            )));
        }
        let result = if name == "tool" {
            let mut args = args.into_iter();
            let tool_name = match args.next() {
                Some(Value::String(s)) => s,
                _ => {
                    return Err(ScriptError::Runtime(format!(
                        "line {line}: tool() name must be a string"
                    )))
                }
            };
            let payload = args.next().unwrap_or(Value::Null);
            self.host
                .call_tool(&tool_name, payload)
                .map_err(|message| ScriptError::Tool {
                    tool: tool_name,
                    message,
                })?
        } else {
            builtins::call(name, &args)?
        };
        if matches!(
            result,
            Value::String(_) | Value::Array(_) | Value::Object(_)
        ) {
            self.charge(approx_size(&result))?;
        }
        Ok(result)
    }

    fn binary(&mut self, op: BinaryOp, l: Value, r: Value) -> Result<Value, ScriptError> {
        use BinaryOp::*;
        match op {
            Add => match (&l, &r) {
                (Value::Number(_), Value::Number(_)) => {
                    make_number(as_number(&l, "+")? + as_number(&r, "+")?)
                }
                (Value::String(_), _) | (_, Value::String(_)) => {
                    let s = format!("{}{}", display(&l), display(&r));
                    self.charge(24 + s.len())?;
                    Ok(Value::String(s))
                }
                (Value::Array(a), Value::Array(b)) => {
                    let mut out = a.clone();
                    out.extend(b.iter().cloned());
                    self.charge(24 + 16 * out.len())?;
                    Ok(Value::Array(out))
                }
                _ => Err(ScriptError::Runtime(format!(
                    "cannot add {} and {}",
                    type_name(&l),
                    type_name(&r)
                ))),
            },
            Sub => make_number(as_number(&l, "-")? - as_number(&r, "-")?),
            Mul => make_number(as_number(&l, "*")? * as_number(&r, "*")?),
            Div => {
                let d = as_number(&r, "/")?;
                if d == 0.0 {
                    return Err(ScriptError::Runtime("division by zero".to_string()));
                }
                make_number(as_number(&l, "/")? / d)
            }
            Rem => {
                let d = as_number(&r, "%")?;
                if d == 0.0 {
                    return Err(ScriptError::Runtime("modulo by zero".to_string()));
                }
                make_number(as_number(&l, "%")? % d)
            }
            Eq => Ok(Value::Bool(values_equal(&l, &r))),
            NotEq => Ok(Value::Bool(!values_equal(&l, &r))),
            Lt | Le | Gt | Ge => {
                let ord = match (&l, &r) {
                    (Value::Number(_), Value::Number(_)) => as_number(&l, "compare")?
                        .partial_cmp(&as_number(&r, "compare")?),
                    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                    _ => None,
                }
                .ok_or_else(|| {
                    ScriptError::Runtime(format!(
                        "cannot compare {} with {}",
                        type_name(&l),
                        type_name(&r)
                    ))
                })?;
                let result = match op {
                    Lt => ord.is_lt(),
                    Le => ord.is_le(),
                    Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                };
                Ok(Value::Bool(result))
            }
        }
    }
}

fn index_value(target: &Value, index: &Value) -> Result<Value, ScriptError> {
    match (target, index) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n.as_f64().unwrap_or(-1.0);
            if i < 0.0 || i.fract() != 0.0 {
                return Ok(Value::Null);
            }
            Ok(items.get(i as usize).cloned().unwrap_or(Value::Null))
        }
        (Value::String(s), Value::Number(n)) => {
            let i = n.as_f64().unwrap_or(-1.0);
            if i < 0.0 || i.fract() != 0.0 {
                return Ok(Value::Null);
            }
            Ok(s.chars()
                .nth(i as usize)
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null))
        }
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (Value::Null, _) => Ok(Value::Null),
        _ => Err(ScriptError::Runtime(format!(
            "cannot index {} with {}",
            type_name(target),
            type_name(index)
        ))),
    }
}
