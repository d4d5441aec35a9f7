//! Deterministic backend driven by a closure or a fixed response queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{BackendError, ReasoningBackend};

type Responder = Box<dyn Fn(&str) -> Result<String, BackendError> + Send + Sync>;

/// Backend for tests and offline runs. Records every prompt it receives.
pub struct ScriptedBackend {
    responder: Responder,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    /// Answer every prompt with `responder(prompt)`.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Result<String, BackendError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Replay `responses` in order, then report `Unavailable`.
    pub fn sequence(responses: Vec<Result<String, BackendError>>) -> Self {
        let queue = Mutex::new(VecDeque::from(responses));
        Self::new(move |_| {
            queue
                .lock()
                .ok()
                .and_then(|mut q| q.pop_front())
                .unwrap_or_else(|| Err(BackendError::Unavailable("script exhausted".to_string())))
        })
    }

    /// Sleep before answering (tokio time, so paused clocks apply).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    async fn complete(
        &self,
        prompt: &str,
        _schema_hint: Option<&str>,
    ) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(prompt)
    }
}
