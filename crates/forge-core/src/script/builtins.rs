//! Builtin functions available to agent scripts.
//!
//! `tool(name, args)` is dispatched by the interpreter itself; everything
//! here is pure.

use serde_json::{Map, Value};

use super::interp::{make_number, truthy};
use super::ScriptError;

/// Name and accepted arity range of every builtin, `tool` included.
pub const BUILTINS: &[(&str, usize, usize)] = &[
    ("tool", 2, 2),
    ("len", 1, 1),
    ("str", 1, 1),
    ("num", 1, 1),
    ("round", 1, 2),
    ("floor", 1, 1),
    ("ceil", 1, 1),
    ("abs", 1, 1),
    ("min", 2, 2),
    ("max", 2, 2),
    ("sqrt", 1, 1),
    ("pow", 2, 2),
    ("keys", 1, 1),
    ("contains", 2, 2),
    ("lower", 1, 1),
    ("upper", 1, 1),
    ("trim", 1, 1),
    ("split", 2, 2),
    ("join", 2, 2),
    ("push", 2, 2),
    ("set", 3, 3),
    ("range", 1, 2),
    ("type_of", 1, 1),
    ("bool", 1, 1),
];

const MAX_RANGE: f64 = 10_000.0;

pub fn arity(name: &str) -> Option<(usize, usize)> {
    BUILTINS
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(_, lo, hi)| (*lo, *hi))
}

fn rt(message: impl Into<String>) -> ScriptError {
    ScriptError::Runtime(message.into())
}

pub fn as_number(v: &Value, what: &str) -> Result<f64, ScriptError> {
    v.as_f64()
        .ok_or_else(|| rt(format!("{what} expects a number, got {}", type_name(v))))
}

fn as_str<'a>(v: &'a Value, what: &str) -> Result<&'a str, ScriptError> {
    v.as_str()
        .ok_or_else(|| rt(format!("{what} expects a string, got {}", type_name(v))))
}

pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Render a value the way string concatenation and `str()` do.
pub fn display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Evaluate a pure builtin. Arity has already been checked by the caller.
pub fn call(name: &str, args: &[Value]) -> Result<Value, ScriptError> {
    let a = |i: usize| &args[i];
    match name {
        "len" => match a(0) {
            Value::String(s) => make_number(s.chars().count() as f64),
            Value::Array(items) => make_number(items.len() as f64),
            Value::Object(map) => make_number(map.len() as f64),
            other => Err(rt(format!("len() not defined for {}", type_name(other)))),
        },
        "str" => Ok(Value::String(display(a(0)))),
        "num" => match a(0) {
            Value::Number(_) => Ok(a(0).clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| rt(format!("num() cannot parse '{s}'")))
                .and_then(make_number),
            Value::Bool(b) => make_number(if *b { 1.0 } else { 0.0 }),
            other => Err(rt(format!("num() not defined for {}", type_name(other)))),
        },
        "bool" => Ok(Value::Bool(truthy(a(0)))),
        "round" => {
            let x = as_number(a(0), "round()")?;
            let digits = match args.get(1) {
                Some(d) => as_number(d, "round()")?.clamp(0.0, 12.0) as i32,
                None => 0,
            };
            let factor = 10f64.powi(digits);
            make_number((x * factor).round() / factor)
        }
        "floor" => make_number(as_number(a(0), "floor()")?.floor()),
        "ceil" => make_number(as_number(a(0), "ceil()")?.ceil()),
        "abs" => make_number(as_number(a(0), "abs()")?.abs()),
        "sqrt" => {
            let x = as_number(a(0), "sqrt()")?;
            if x < 0.0 {
                return Err(rt("sqrt() of a negative number"));
            }
            make_number(x.sqrt())
        }
        "pow" => make_number(as_number(a(0), "pow()")?.powf(as_number(a(1), "pow()")?)),
        "min" => make_number(as_number(a(0), "min()")?.min(as_number(a(1), "min()")?)),
        "max" => make_number(as_number(a(0), "max()")?.max(as_number(a(1), "max()")?)),
        "keys" => match a(0) {
            Value::Object(map) => Ok(Value::Array(
                map.keys().map(|k| Value::String(k.clone())).collect(),
            )),
            other => Err(rt(format!("keys() not defined for {}", type_name(other)))),
        },
        "contains" => match a(0) {
            Value::String(s) => Ok(Value::Bool(s.contains(as_str(a(1), "contains()")?))),
            Value::Array(items) => Ok(Value::Bool(items.contains(a(1)))),
            Value::Object(map) => Ok(Value::Bool(map.contains_key(as_str(a(1), "contains()")?))),
            other => Err(rt(format!("contains() not defined for {}", type_name(other)))),
        },
        "lower" => Ok(Value::String(as_str(a(0), "lower()")?.to_lowercase())),
        "upper" => Ok(Value::String(as_str(a(0), "upper()")?.to_uppercase())),
        "trim" => Ok(Value::String(as_str(a(0), "trim()")?.trim().to_string())),
        "split" => {
            let s = as_str(a(0), "split()")?;
            let sep = as_str(a(1), "split()")?;
            let parts: Vec<Value> = if sep.is_empty() {
                s.split_whitespace().map(|p| Value::String(p.to_string())).collect()
            } else {
                s.split(sep).map(|p| Value::String(p.to_string())).collect()
            };
            Ok(Value::Array(parts))
        }
        "join" => match a(0) {
            Value::Array(items) => {
                let sep = as_str(a(1), "join()")?;
                Ok(Value::String(
                    items.iter().map(display).collect::<Vec<_>>().join(sep),
                ))
            }
            other => Err(rt(format!("join() not defined for {}", type_name(other)))),
        },
        "push" => match a(0) {
            Value::Array(items) => {
                let mut items = items.clone();
                items.push(a(1).clone());
                Ok(Value::Array(items))
            }
            other => Err(rt(format!("push() not defined for {}", type_name(other)))),
        },
        "set" => match a(0) {
            Value::Object(map) => {
                let mut map: Map<String, Value> = map.clone();
                map.insert(as_str(a(1), "set()")?.to_string(), a(2).clone());
                Ok(Value::Object(map))
            }
            other => Err(rt(format!("set() not defined for {}", type_name(other)))),
        },
        "range" => {
            let (start, end) = match args.get(1) {
                Some(e) => (as_number(a(0), "range()")?, as_number(e, "range()")?),
                None => (0.0, as_number(a(0), "range()")?),
            };
            if end - start > MAX_RANGE {
                return Err(rt(format!("range() larger than {MAX_RANGE}")));
            }
            let mut out = Vec::new();
            let mut x = start.floor();
            while x < end {
                out.push(make_number(x)?);
                x += 1.0;
            }
            Ok(Value::Array(out))
        }
        "type_of" => Ok(Value::String(type_name(a(0)).to_string())),
        other => Err(rt(format!("unknown function '{other}'"))),
    }
}
