//! In-process doubles for the embedding and generation backends.

use crate::embedding::{Embedder, HashingEmbedder};
use crate::error::{DocentError, Result};
use crate::generation::{GenerationBackend, GenerationRequest, TokenStream};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Three short passages on loops, conditionals and functions, in that order.
pub fn programming_guide() -> Vec<&'static str> {
    vec![
        "Loops repeat a block of code. A for loop walks over each item in a sequence, \
         and a while loop keeps going until its condition turns false. Loops are how \
         programs work through lists.",
        "Conditionals choose between branches. An if statement runs its body only when \
         the test is true; elif and else cover the remaining cases.",
        "Functions package reusable behaviour. A function takes parameters, runs its \
         body and returns a value to the caller.",
    ]
}

/// Hashing embedder that fails on demand.
pub struct FlakyEmbedder {
    inner: HashingEmbedder,
    fail_first: usize,
    reject_containing: Option<String>,
    pub calls: AtomicUsize,
}

impl FlakyEmbedder {
    /// Fail the first `failures` batch calls, then behave normally.
    pub fn failing_first(dimensions: usize, failures: usize) -> Self {
        Self {
            inner: HashingEmbedder::new(dimensions),
            fail_first: failures,
            reject_containing: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fail batches that contain a text with `needle`.
    pub fn rejecting(needle: &str, dimensions: usize) -> Self {
        Self {
            inner: HashingEmbedder::new(dimensions),
            fail_first: 0,
            reject_containing: Some(needle.to_lowercase()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| DocentError::Embedding("empty batch".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(DocentError::EmbeddingBackendUnavailable(format!(
                "connection refused (call {})",
                call
            )));
        }
        if let Some(needle) = &self.reject_containing {
            if texts.iter().any(|t| t.to_lowercase().contains(needle)) {
                return Err(DocentError::EmbeddingBackendUnavailable(
                    "model crashed on input".to_string(),
                ));
            }
        }
        self.inner.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model(&self) -> &str {
        "flaky"
    }
}

/// Decrements the open-stream counter when the scripted connection goes away.
struct Connection(Arc<AtomicUsize>);

impl Drop for Connection {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Generation backend that plays back fixed tokens with optional delays and failures.
pub struct ScriptedBackend {
    tokens: Vec<String>,
    first_token_delay: Duration,
    token_delay: Duration,
    fail_after: Option<usize>,
    refuse: Option<String>,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
    open: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            first_token_delay: Duration::ZERO,
            token_delay: Duration::ZERO,
            fail_after: None,
            refuse: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_first_token_delay(mut self, delay: Duration) -> Self {
        self.first_token_delay = delay;
        self
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    /// Emit `count` tokens, then a backend error.
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Reject the request before streaming.
    pub fn refusing(mut self, message: &str) -> Self {
        self.refuse = Some(message.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Streams handed out and not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn stream(&self, request: &GenerationRequest) -> Result<TokenStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        if let Some(message) = &self.refuse {
            return Err(DocentError::GenerationBackend(message.clone()));
        }

        self.open.fetch_add(1, Ordering::SeqCst);
        let connection = Connection(self.open.clone());
        let tokens = self.tokens.clone();
        let (first_delay, delay, fail_after) = (self.first_token_delay, self.token_delay, self.fail_after);

        let stream = stream::unfold(Some((0usize, connection)), move |state| {
            let tokens = tokens.clone();
            async move {
                let (i, connection) = state?;
                let wait = if i == 0 { first_delay } else { delay };
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }

                if fail_after == Some(i) {
                    drop(connection);
                    return Some((
                        Err(DocentError::GenerationBackend("connection reset by peer".to_string())),
                        None,
                    ));
                }
                let token = tokens.get(i)?.clone();
                Some((Ok(token), Some((i + 1, connection))))
            }
        });

        Ok(stream.boxed())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
