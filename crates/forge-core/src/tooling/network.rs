//! Outbound network tools: `http_request` and `web_search`.
//!
//! Both share one reqwest client and are only registered when
//! `tools.network.enabled` is set. Every call still passes through the
//! gateway, so `tool:http_request` and `tool:web_search` can be denied per
//! user like any other tool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::builtin::{ToolFunction, ToolFunctions};
use super::manifest::{ToolManifest, ToolManifestEntry};
use crate::domain::{FieldType, ForgeError, JsonFieldSchema};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkToolsConfig {
    pub enabled: bool,
    /// Instant-answer endpoint queried by `web_search`.
    pub search_url: String,
    pub request_timeout_ms: u64,
    /// Response bodies are cut to this many bytes.
    pub max_body_bytes: usize,
    pub max_results: usize,
}

impl Default for NetworkToolsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            search_url: "https://api.duckduckgo.com/".to_string(),
            request_timeout_ms: 10_000,
            max_body_bytes: 64 * 1024,
            max_results: 5,
        }
    }
}

fn client(config: &NetworkToolsConfig) -> Result<reqwest::Client, ForgeError> {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .user_agent(concat!("agent-forge/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ForgeError::Config(format!("network tool client setup failed: {e}")))
}

/// Add the network tools to a function table and manifest. A no-op unless
/// enabled.
pub fn register(
    config: &NetworkToolsConfig,
    functions: &mut ToolFunctions,
    manifest: &mut ToolManifest,
) -> Result<(), ForgeError> {
    if !config.enabled {
        return Ok(());
    }
    let client = client(config)?;
    functions.register(
        "network::http_request",
        Arc::new(HttpRequestTool {
            client: client.clone(),
            max_body_bytes: config.max_body_bytes,
        }),
    );
    functions.register(
        "network::web_search",
        Arc::new(WebSearchTool {
            client,
            search_url: config.search_url.clone(),
            max_results: config.max_results,
        }),
    );
    for entry in manifest_entries(config) {
        manifest.insert(entry).map_err(ForgeError::Config)?;
    }
    Ok(())
}

fn manifest_entries(config: &NetworkToolsConfig) -> [ToolManifestEntry; 2] {
    // Leave headroom over the client timeout so the client reports it first.
    let timeout_ms = Some(config.request_timeout_ms + 1_000);
    [
        ToolManifestEntry {
            tool_name: "http_request".into(),
            fn_ref: "network::http_request".into(),
            args_schema: JsonFieldSchema::required(["url"])
                .with_type("url", FieldType::String)
                .with_type("method", FieldType::String)
                .with_type("body", FieldType::Any),
            returns_schema: JsonFieldSchema::required(["status", "body"])
                .with_type("status", FieldType::Number)
                .with_type("body", FieldType::String),
            rate_limit_per_min: 30,
            description: "Fetch a URL over http or https".into(),
            category: "network".into(),
            timeout_ms,
        },
        ToolManifestEntry {
            tool_name: "web_search".into(),
            fn_ref: "network::web_search".into(),
            args_schema: JsonFieldSchema::required(["query"])
                .with_type("query", FieldType::String)
                .with_type("max_results", FieldType::Number),
            returns_schema: JsonFieldSchema::required(["query", "results"])
                .with_type("query", FieldType::String)
                .with_type("results", FieldType::Array),
            rate_limit_per_min: 30,
            description: "Instant-answer web search".into(),
            category: "network".into(),
            timeout_ms,
        },
    ]
}

fn truncate(mut body: String, max_bytes: usize) -> (String, bool) {
    if body.len() <= max_bytes {
        return (body, false);
    }
    let mut cut = max_bytes;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    body.truncate(cut);
    (body, true)
}

pub struct HttpRequestTool {
    client: reqwest::Client,
    max_body_bytes: usize,
}

#[async_trait]
impl ToolFunction for HttpRequestTool {
    async fn call(&self, args: Value) -> Result<Value, String> {
        let raw = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or("'url' must be a string")?;
        let url = Url::parse(raw).map_err(|e| format!("invalid url '{raw}': {e}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("scheme '{}' is not allowed", url.scheme()));
        }
        let method = match args
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_ascii_uppercase()
            .as_str()
        {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "HEAD" => Method::HEAD,
            other => return Err(format!("method '{other}' is not allowed")),
        };

        let mut request = self.client.request(method, url);
        match args.get("body") {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(other) => request = request.json(other),
        }
        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.map_err(|e| e.to_string())?;
        let (body, truncated) = truncate(text, self.max_body_bytes);
        debug!(status, bytes = body.len(), truncated, "http_request completed");
        Ok(json!({
            "status": status,
            "content_type": content_type,
            "body": body,
            "truncated": truncated,
        }))
    }
}

pub struct WebSearchTool {
    client: reqwest::Client,
    search_url: String,
    max_results: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InstantAnswer {
    #[serde(rename = "Heading")]
    heading: String,
    #[serde(rename = "AbstractText")]
    abstract_text: String,
    #[serde(rename = "AbstractURL")]
    abstract_url: String,
    #[serde(rename = "RelatedTopics")]
    related_topics: Vec<Topic>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Topic {
    #[serde(rename = "Text")]
    text: String,
    #[serde(rename = "FirstURL")]
    first_url: String,
    /// Present on category groups instead of `Text`.
    #[serde(rename = "Topics")]
    topics: Vec<Topic>,
}

fn flatten_topics(topics: Vec<Topic>, out: &mut Vec<Value>) {
    for topic in topics {
        if !topic.text.is_empty() {
            let title = topic.text.split(" - ").next().unwrap_or(&topic.text).to_string();
            out.push(json!({
                "title": title,
                "url": topic.first_url,
                "snippet": topic.text,
            }));
        }
        flatten_topics(topic.topics, out);
    }
}

fn search_results(answer: InstantAnswer, limit: usize) -> Vec<Value> {
    let mut results = Vec::new();
    if !answer.abstract_text.is_empty() {
        results.push(json!({
            "title": answer.heading,
            "url": answer.abstract_url,
            "snippet": answer.abstract_text,
        }));
    }
    flatten_topics(answer.related_topics, &mut results);
    results.truncate(limit);
    results
}

#[async_trait]
impl ToolFunction for WebSearchTool {
    async fn call(&self, args: Value) -> Result<Value, String> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or("'query' must be a non-empty string")?;
        let limit = args
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(self.max_results)
            .min(self.max_results);
        let url = Url::parse_with_params(
            &self.search_url,
            &[("q", query), ("format", "json"), ("no_html", "1")],
        )
        .map_err(|e| format!("invalid search_url: {e}"))?;

        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("search endpoint returned {status}"));
        }
        let answer: InstantAnswer = response.json().await.map_err(|e| e.to_string())?;
        let results = search_results(answer, limit);
        debug!(query, results = results.len(), "web_search completed");
        Ok(json!({ "query": query, "results": results }))
    }
}
