//! Builtin tool functions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, Utc};
use serde_json::{json, Value};

use crate::script::{evaluate_expression, Limits};

/// Implementation behind a manifest `fn_ref`.
#[async_trait]
pub trait ToolFunction: Send + Sync {
    async fn call(&self, args: Value) -> Result<Value, String>;
}

/// Adapts a plain synchronous function.
pub struct FnTool<F>(pub F);

#[async_trait]
impl<F> ToolFunction for FnTool<F>
where
    F: Fn(Value) -> Result<Value, String> + Send + Sync,
{
    async fn call(&self, args: Value) -> Result<Value, String> {
        (self.0)(args)
    }
}

/// `fn_ref` to implementation.
#[derive(Clone, Default)]
pub struct ToolFunctions {
    fns: HashMap<String, Arc<dyn ToolFunction>>,
}

impl std::fmt::Debug for ToolFunctions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.fns.keys().collect();
        keys.sort();
        f.debug_struct("ToolFunctions").field("fns", &keys).finish()
    }
}

impl ToolFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut fns = Self::new();
        fns.register("builtin::calculator", Arc::new(FnTool(calculator)));
        fns.register("builtin::text_summarizer", Arc::new(FnTool(text_summarizer)));
        fns.register("builtin::datetime", Arc::new(FnTool(datetime)));
        fns.register("builtin::json_parser", Arc::new(FnTool(json_parser)));
        fns
    }

    pub fn register(&mut self, fn_ref: impl Into<String>, f: Arc<dyn ToolFunction>) {
        self.fns.insert(fn_ref.into(), f);
    }

    pub fn get(&self, fn_ref: &str) -> Option<Arc<dyn ToolFunction>> {
        self.fns.get(fn_ref).cloned()
    }

    pub fn contains(&self, fn_ref: &str) -> bool {
        self.fns.contains_key(fn_ref)
    }
}

fn str_arg<'a>(args: &'a Value, field: &str) -> Result<&'a str, String> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("'{field}' must be a string"))
}

pub fn calculator(args: Value) -> Result<Value, String> {
    let expression = str_arg(&args, "expression")?;
    let limits = Limits {
        fuel: 10_000,
        ..Limits::default()
    };
    let result = evaluate_expression(expression, limits).map_err(|e| e.to_string())?;
    if !result.is_number() {
        return Err(format!("expression did not produce a number: {result}"));
    }
    Ok(json!({ "expression": expression, "result": result }))
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "in",
    "is", "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "will",
    "with",
];

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
}

/// Extractive summary: sentences scored by average word frequency, the top
/// ones kept in their original order.
pub fn text_summarizer(args: Value) -> Result<Value, String> {
    let text = str_arg(&args, "text")?;
    let max_sentences = args
        .get("max_sentences")
        .and_then(Value::as_f64)
        .map(|n| n.max(1.0) as usize)
        .unwrap_or(3);

    let sentences: Vec<&str> = text
        .split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let mut freq: BTreeMap<String, usize> = BTreeMap::new();
    for w in words(text) {
        *freq.entry(w).or_default() += 1;
    }

    let mut scored: Vec<(usize, f64)> = sentences
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let ws: Vec<String> = words(s).collect();
            let total: usize = ws.iter().map(|w| freq.get(w).copied().unwrap_or(0)).sum();
            (i, total as f64 / ws.len().max(1) as f64)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    let mut keep: Vec<usize> = scored.iter().take(max_sentences).map(|(i, _)| *i).collect();
    keep.sort_unstable();

    let summary = keep
        .iter()
        .map(|i| sentences[*i])
        .collect::<Vec<_>>()
        .join(" ");

    let mut ranked: Vec<(&String, &usize)> = freq.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    let keywords: Vec<&String> = ranked.iter().take(5).map(|(w, _)| *w).collect();

    Ok(json!({
        "summary": summary,
        "sentence_count": sentences.len(),
        "keywords": keywords,
    }))
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(d);
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.date_naive())
        .map_err(|_| format!("unrecognised date '{raw}' (expected YYYY-MM-DD)"))
}

pub fn datetime(args: Value) -> Result<Value, String> {
    let operation = str_arg(&args, "operation")?;
    let base = match args.get("date").and_then(Value::as_str) {
        Some(raw) => parse_date(raw)?,
        None => Utc::now().date_naive(),
    };
    match operation {
        "now" => Ok(json!({ "result": Utc::now().to_rfc3339() })),
        "add_days" => {
            let days = args
                .get("days")
                .and_then(Value::as_i64)
                .ok_or("'days' must be an integer")?;
            let shifted = base
                .checked_add_signed(Duration::days(days))
                .ok_or("date out of range")?;
            Ok(json!({
                "result": shifted.format("%Y-%m-%d").to_string(),
                "weekday": shifted.weekday().to_string(),
            }))
        }
        "weekday" => Ok(json!({
            "result": base.weekday().to_string(),
            "date": base.format("%Y-%m-%d").to_string(),
        })),
        other => Err(format!(
            "unknown operation '{other}' (expected now, add_days or weekday)"
        )),
    }
}

/// Parse JSON text and optionally walk a dotted path (`a.b.0.c`).
pub fn json_parser(args: Value) -> Result<Value, String> {
    let text = str_arg(&args, "text")?;
    let parsed: Value = serde_json::from_str(text).map_err(|e| format!("invalid JSON: {e}"))?;
    let Some(path) = args.get("path").and_then(Value::as_str) else {
        return Ok(json!({ "value": parsed }));
    };
    let mut cursor = &parsed;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        cursor = match cursor {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(|| format!("path '{path}' not found at '{segment}'"))?;
    }
    Ok(json!({ "value": cursor, "path": path }))
}
