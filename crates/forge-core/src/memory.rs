//! Semantic memory enrichment.
//!
//! Finished tasks are embedded and stored; planning asks for the closest
//! past requests. The store is optional and every failure here degrades to
//! "no context" instead of failing the task.

use std::sync::Arc;

use forge_state::{MemoryMatch, SemanticMemory};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::domain::{Result, Task, TaskStatus};
use crate::obs;

/// Text to vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Feature hashing over lowercase word tokens, L2-normalised. Deterministic
/// and dependency-free, good enough for near-duplicate recall.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % self.dimensions;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub enabled: bool,
    pub top_k: usize,
    pub min_score: f32,
    pub dimensions: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: 3,
            min_score: 0.3,
            dimensions: 64,
        }
    }
}

pub struct ContextEnricher {
    memory: Option<Arc<dyn SemanticMemory>>,
    embedder: Arc<dyn Embedder>,
    config: MemoryConfig,
}

impl ContextEnricher {
    pub fn new(memory: Option<Arc<dyn SemanticMemory>>, config: MemoryConfig) -> Self {
        let memory = memory.filter(|_| config.enabled);
        Self {
            memory,
            embedder: Arc::new(HashingEmbedder::new(config.dimensions)),
            config,
        }
    }

    pub fn disabled() -> Self {
        Self::new(
            None,
            MemoryConfig {
                enabled: false,
                ..MemoryConfig::default()
            },
        )
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.memory.is_some()
    }

    /// Summaries of the closest past tasks. Empty on any failure.
    pub async fn context_for(&self, text: &str) -> Vec<String> {
        let Some(memory) = &self.memory else {
            return Vec::new();
        };
        match memory.query(&self.embedder.embed(text), self.config.top_k).await {
            Ok(matches) => matches
                .into_iter()
                .filter(|m| m.score >= self.config.min_score)
                .filter_map(|m| m.metadata.get("summary").and_then(|s| s.as_str()).map(str::to_string))
                .collect(),
            Err(e) => {
                obs::emit_degraded("semantic_memory", &e);
                Vec::new()
            }
        }
    }

    /// Store a completed task. Anything else is ignored.
    pub async fn remember_task(&self, task: &Task) {
        let Some(memory) = &self.memory else {
            return;
        };
        if task.status() != TaskStatus::Completed {
            return;
        }
        let output = task
            .output
            .as_ref()
            .map(|o| truncate(&o.to_string(), 200))
            .unwrap_or_default();
        let metadata = json!({
            "task_id": task.id.to_string(),
            "user_id": task.user_id,
            "input": task.raw_input,
            "summary": format!("{} => {}", truncate(&task.raw_input, 200), output),
        });
        if let Err(e) = memory
            .upsert(&task.id.to_string(), self.embedder.embed(&task.raw_input), metadata)
            .await
        {
            obs::emit_degraded("semantic_memory", &e);
        }
    }

    pub async fn search(&self, text: &str, k: usize) -> Result<Vec<MemoryMatch>> {
        match &self.memory {
            Some(memory) => Ok(memory.query(&self.embedder.embed(text), k).await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn clear(&self) -> Result<()> {
        if let Some(memory) = &self.memory {
            memory.clear().await?;
        }
        Ok(())
    }

    pub async fn len(&self) -> Result<usize> {
        match &self.memory {
            Some(memory) => Ok(memory.len().await?),
            None => Ok(0),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}
