// ABOUTME: FIFO single-flight dispatch queue around one backend.
// ABOUTME: Serializes prompt execution and notifies a completion handler per message.

use crate::message::Message;
use crate::traits::{AgentBackend, PromptContext};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::PromptError;

/// Invoked exactly once per enqueued message with
/// `(conversation_key, response_text, error, elapsed)`. On failure the text is
/// whatever partial output the backend produced.
pub type CompletionHandler = Arc<dyn Fn(i64, String, Option<PromptError>, Duration) + Send + Sync>;

/// Invoked once per prompt whose execution exceeds the configured threshold,
/// with the elapsed time and the latest progress preview text.
pub type LongRunningHandler = Arc<dyn Fn(Duration, String) + Send + Sync>;

struct PendingEntry {
    ctx: PromptContext,
    message: Message,
}

struct QueueState {
    busy: bool,
    pending: VecDeque<PendingEntry>,
}

#[derive(Clone, Default)]
struct LongRunning {
    threshold: Option<Duration>,
    handler: Option<LongRunningHandler>,
}

/// Wraps any backend with strict FIFO, at-most-one-in-flight execution.
///
/// `enqueue` never blocks: when idle it starts a background processing task,
/// otherwise it appends to the pending queue. The processing task drains the
/// queue in arrival order and clears the busy flag only when empty.
pub struct DispatchQueue {
    backend: Arc<dyn AgentBackend>,
    on_complete: CompletionHandler,
    state: Mutex<QueueState>,
    long_running: Mutex<LongRunning>,
}

impl DispatchQueue {
    pub fn new(backend: Arc<dyn AgentBackend>, on_complete: CompletionHandler) -> Arc<Self> {
        Arc::new(Self {
            backend,
            on_complete,
            state: Mutex::new(QueueState {
                busy: false,
                pending: VecDeque::new(),
            }),
            long_running: Mutex::new(LongRunning::default()),
        })
    }

    pub fn set_long_running_threshold(&self, threshold: Duration) {
        self.long_running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .threshold = Some(threshold);
    }

    pub fn set_long_running_handler(&self, handler: LongRunningHandler) {
        self.long_running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .handler = Some(handler);
    }

    /// Number of messages waiting to start (excludes the one in flight)
    pub fn queue_length(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .len()
    }

    /// Accept a message; processes immediately when idle, queues otherwise.
    pub fn enqueue(self: &Arc<Self>, ctx: PromptContext, message: Message) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.busy {
            let conversation = message.conversation_key;
            state.pending.push_back(PendingEntry { ctx, message });
            tracing::debug!(
                conversation,
                queued = state.pending.len(),
                "Backend busy; message queued"
            );
            return;
        }
        state.busy = true;
        drop(state);

        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.process(ctx, message).await });
    }

    /// Drain loop for one busy period; strict arrival order, one in flight.
    async fn process(self: Arc<Self>, mut ctx: PromptContext, mut message: Message) {
        loop {
            self.execute(ctx, message).await;

            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match state.pending.pop_front() {
                Some(entry) => {
                    ctx = entry.ctx;
                    message = entry.message;
                }
                None => {
                    state.busy = false;
                    return;
                }
            }
        }
    }

    async fn execute(&self, ctx: PromptContext, message: Message) {
        let started = Instant::now();

        // Record the latest delta so a long-running notice can show a preview.
        let preview = Arc::new(Mutex::new(String::new()));
        let ctx = {
            let preview = Arc::clone(&preview);
            let inner = ctx.progress_fn();
            ctx.with_progress(Arc::new(move |delta: &str| {
                *preview.lock().unwrap_or_else(|e| e.into_inner()) = delta.to_string();
                if let Some(inner) = &inner {
                    inner(delta);
                }
            }))
        };

        let long_running = self
            .long_running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let prompt = self.backend.send_prompt(&ctx, &message.content);
        tokio::pin!(prompt);

        let result = match (long_running.threshold, long_running.handler) {
            (Some(threshold), Some(handler)) => {
                tokio::select! {
                    result = &mut prompt => result,
                    _ = tokio::time::sleep(threshold) => {
                        let preview_text = preview
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .clone();
                        handler(started.elapsed(), preview_text);
                        prompt.await
                    }
                }
            }
            _ => prompt.await,
        };

        let elapsed = started.elapsed();
        match result {
            Ok(text) => {
                tracing::info!(
                    conversation = message.conversation_key,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Prompt completed"
                );
                (self.on_complete)(message.conversation_key, text, None, elapsed);
            }
            Err(error) => {
                tracing::warn!(
                    conversation = message.conversation_key,
                    error = %error,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Prompt failed"
                );
                let partial = error.partial.clone();
                (self.on_complete)(message.conversation_key, partial, Some(error), elapsed);
            }
        }
    }
}
