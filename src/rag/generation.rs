//! Generation coordinator: prompt formatting and the cancellable answer stream.

use super::context::AssembledContext;
use crate::config::{EmptyContextPolicy, Prompts};
use crate::error::{DocentError, Result};
use crate::generation::{GenerationBackend, GenerationRequest, TokenStream};
use futures::future::BoxFuture;
use futures::stream::FusedStream;
use futures::task::AtomicWaker;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Sleep;
use tracing::{debug, info, instrument, warn};

/// Lifecycle of one answer.
///
/// `Idle -> PromptFormatted -> Requesting -> Streaming`, ending in one of the
/// terminal states. `Cancelled` is reachable from every non-terminal state,
/// not only `Streaming`: a cancel before the first poll never contacts the
/// backend, and a cancel while `Requesting` drops the pending request and
/// its first-token deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Idle,
    PromptFormatted,
    /// Request sent, waiting for the first token.
    Requesting,
    Streaming,
    Completed,
    TimedOut,
    BackendError,
    /// Stopped through a `CancelHandle`, from any earlier state.
    Cancelled,
}

impl GenerationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationState::Completed
                | GenerationState::TimedOut
                | GenerationState::BackendError
                | GenerationState::Cancelled
        )
    }
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GenerationState::Idle => "idle",
            GenerationState::PromptFormatted => "prompt-formatted",
            GenerationState::Requesting => "requesting",
            GenerationState::Streaming => "streaming",
            GenerationState::Completed => "completed",
            GenerationState::TimedOut => "timed-out",
            GenerationState::BackendError => "backend-error",
            GenerationState::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

#[derive(Default)]
struct CancelSignal {
    cancelled: AtomicBool,
    waker: AtomicWaker,
}

/// Cloneable handle that stops an answer stream at its next yield point.
#[derive(Clone, Default)]
pub struct CancelHandle {
    signal: Arc<CancelSignal>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake the stream if it is waiting.
    pub fn cancel(&self) {
        self.signal.cancelled.store(true, Ordering::SeqCst);
        self.signal.waker.wake();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.cancelled.load(Ordering::SeqCst)
    }

    fn register(&self, cx: &Context<'_>) {
        self.signal.waker.register(cx.waker());
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

enum Phase {
    /// Fixed reply that needs no backend.
    Notice(String),
    Pending(GenerationRequest),
    Requesting(BoxFuture<'static, Result<TokenStream>>),
    Streaming(TokenStream),
    Done,
}

/// Lazy, finite token stream for one answer.
///
/// Nothing is sent to the backend until the first poll. The stream ends after a
/// terminal state; a timeout or backend failure is reported as one `Err` item first.
/// Dropping the stream, or cancelling it, releases the backend connection and the
/// query permit it carries.
pub struct AnswerStream {
    phase: Phase,
    state: GenerationState,
    backend: Arc<dyn GenerationBackend>,
    first_token_timeout: Duration,
    deadline: Option<Pin<Box<Sleep>>>,
    cancel: CancelHandle,
    permit: Option<OwnedSemaphorePermit>,
    grounded: bool,
    tokens: usize,
}

impl AnswerStream {
    fn new(
        phase: Phase,
        backend: Arc<dyn GenerationBackend>,
        first_token_timeout: Duration,
        grounded: bool,
    ) -> Self {
        Self {
            phase,
            state: GenerationState::PromptFormatted,
            backend,
            first_token_timeout,
            deadline: None,
            cancel: CancelHandle::new(),
            permit: None,
            grounded,
            tokens: 0,
        }
    }

    /// Hold `permit` until the stream reaches a terminal state or is dropped.
    pub(crate) fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self.permit = Some(permit);
        self
    }

    pub fn state(&self) -> GenerationState {
        self.state
    }

    /// Whether the answer is backed by retrieved context.
    pub fn is_grounded(&self) -> bool {
        self.grounded
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Drain the stream into one string; any error item fails the whole answer.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(token) = self.next().await {
            text.push_str(&token?);
        }
        Ok(text)
    }

    fn finish(&mut self, state: GenerationState) {
        self.phase = Phase::Done;
        self.deadline = None;
        self.permit = None;
        self.state = state;
        debug!("Generation finished: {} after {} tokens", state, self.tokens);
    }

    /// Whether the first-token deadline has passed; registers for wake-up otherwise.
    fn deadline_elapsed(&mut self, cx: &mut Context<'_>) -> bool {
        match self.deadline.as_mut() {
            Some(deadline) => deadline.as_mut().poll(cx).is_ready(),
            None => false,
        }
    }

    fn timed_out(&mut self) -> Poll<Option<Result<String>>> {
        warn!(
            "No token from {} within {:?}",
            self.backend.name(),
            self.first_token_timeout
        );
        self.finish(GenerationState::TimedOut);
        Poll::Ready(Some(Err(DocentError::GenerationTimeout(self.first_token_timeout))))
    }

    fn failed(&mut self, error: DocentError) -> Poll<Option<Result<String>>> {
        let error = match error {
            DocentError::GenerationBackend(_) => error,
            other => DocentError::GenerationBackend(other.to_string()),
        };
        warn!("Generation failed after {} tokens: {}", self.tokens, error);
        self.finish(GenerationState::BackendError);
        Poll::Ready(Some(Err(error)))
    }
}

impl Stream for AnswerStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if matches!(this.phase, Phase::Done) {
                return Poll::Ready(None);
            }

            this.cancel.register(cx);
            if this.cancel.is_cancelled() {
                this.finish(GenerationState::Cancelled);
                return Poll::Ready(None);
            }

            match &mut this.phase {
                Phase::Notice(text) => {
                    let text = std::mem::take(text);
                    this.finish(GenerationState::Completed);
                    return Poll::Ready(Some(Ok(text)));
                }
                Phase::Pending(request) => {
                    let request = std::mem::replace(
                        request,
                        GenerationRequest {
                            system: String::new(),
                            prompt: String::new(),
                        },
                    );
                    let backend = this.backend.clone();
                    this.phase = Phase::Requesting(Box::pin(async move { backend.stream(&request).await }));
                    this.deadline = Some(Box::pin(tokio::time::sleep(this.first_token_timeout)));
                    this.state = GenerationState::Requesting;
                }
                Phase::Requesting(request) => match request.as_mut().poll(cx) {
                    Poll::Ready(Ok(tokens)) => this.phase = Phase::Streaming(tokens),
                    Poll::Ready(Err(e)) => return this.failed(e),
                    Poll::Pending => {
                        if this.deadline_elapsed(cx) {
                            return this.timed_out();
                        }
                        return Poll::Pending;
                    }
                },
                Phase::Streaming(tokens) => match tokens.as_mut().poll_next(cx) {
                    Poll::Ready(Some(Ok(token))) => {
                        if this.state != GenerationState::Streaming {
                            this.state = GenerationState::Streaming;
                            this.deadline = None;
                        }
                        this.tokens += 1;
                        return Poll::Ready(Some(Ok(token)));
                    }
                    Poll::Ready(Some(Err(e))) => return this.failed(e),
                    Poll::Ready(None) => {
                        this.finish(GenerationState::Completed);
                        return Poll::Ready(None);
                    }
                    Poll::Pending => {
                        if this.deadline_elapsed(cx) {
                            return this.timed_out();
                        }
                        return Poll::Pending;
                    }
                },
                Phase::Done => return Poll::Ready(None),
            }
        }
    }
}

impl FusedStream for AnswerStream {
    fn is_terminated(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }
}

impl Drop for AnswerStream {
    fn drop(&mut self) {
        if matches!(
            self.state,
            GenerationState::Requesting | GenerationState::Streaming
        ) {
            debug!(
                "Answer stream dropped while {} after {} tokens; releasing backend",
                self.state, self.tokens
            );
        }
    }
}

/// Formats prompts and drives the generation backend.
pub struct GenerationCoordinator {
    backend: Arc<dyn GenerationBackend>,
    prompts: Prompts,
    first_token_timeout: Duration,
    empty_context: EmptyContextPolicy,
}

impl GenerationCoordinator {
    pub fn new(backend: Arc<dyn GenerationBackend>, prompts: Prompts, first_token_timeout: Duration) -> Self {
        Self {
            backend,
            prompts,
            first_token_timeout,
            empty_context: EmptyContextPolicy::default(),
        }
    }

    pub fn with_empty_context_policy(mut self, policy: EmptyContextPolicy) -> Self {
        self.empty_context = policy;
        self
    }

    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }

    /// Render the system and user prompts for a question.
    pub fn format_request(&self, question: &str, context: &AssembledContext) -> GenerationRequest {
        let mut vars = HashMap::new();
        vars.insert("question".to_string(), question.to_string());
        vars.insert("context".to_string(), context.text.clone());

        let template = if context.is_empty() {
            &self.prompts.rag.no_context
        } else {
            &self.prompts.rag.user
        };

        GenerationRequest {
            system: self.prompts.render_with_custom(&self.prompts.rag.system, &vars),
            prompt: self.prompts.render_with_custom(template, &vars),
        }
    }

    /// Start an answer. The backend is contacted on the first poll.
    #[instrument(skip_all, fields(backend = self.backend.name(), context_chars = context.char_len()))]
    pub fn answer(&self, question: &str, context: &AssembledContext) -> AnswerStream {
        if context.is_empty() && self.empty_context == EmptyContextPolicy::Decline {
            info!("No context retrieved; declining to answer");
            return AnswerStream::new(
                Phase::Notice(self.prompts.rag.insufficient_information.clone()),
                self.backend.clone(),
                self.first_token_timeout,
                false,
            );
        }

        let request = self.format_request(question, context);
        debug!("Formatted prompt of {} chars", request.prompt.chars().count());

        AnswerStream::new(
            Phase::Pending(request),
            self.backend.clone(),
            self.first_token_timeout,
            !context.is_empty(),
        )
    }

    /// Answer and wait for the complete text.
    pub async fn answer_sync(&self, question: &str, context: &AssembledContext) -> Result<String> {
        self.answer(question, context).collect_text().await
    }
}
