//! The generation loop: stream one assistant turn, run any tools it asked
//! for, feed the results back, repeat until the model stops or the step
//! budget runs out.
//!
//! The loop never returns an error. Provider failures are surfaced as
//! assistant text so the conversation stays usable, tool failures become
//! `is_error` results the model can read, and cancellation finalizes
//! whatever was streamed so far. Every exit path ends with
//! `loading_changed(false)` as the session's last event.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::{FutureExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use conductor_core::{
    AssistantMessage, ChatProvider, ChatRequest, EventBus, Message, ProviderError, SessionEvent,
    StopReason, StreamChunk, StreamOptions, ToolCallPart, ToolContext, ToolResultPart,
};

use crate::registry::ToolRegistry;
use crate::sessions::SessionHandle;
use crate::truncate;

/// Default wall-clock limit for a single tool execution.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Knobs shared by every generation the engine runs.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub stream_options: StreamOptions,
    pub tool_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            stream_options: StreamOptions::default(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

/// One generation for one session. Built by the session registry after it
/// has flipped `is_loading` on; the spawned task owns the loop from there.
pub(crate) struct GenerationRun {
    pub(crate) provider: Arc<dyn ChatProvider>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) handle: Arc<SessionHandle>,
    pub(crate) epoch: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) options: StreamOptions,
    pub(crate) tool_timeout: Duration,
}

impl GenerationRun {
    #[instrument(skip(self), fields(session_id = %self.handle.id()))]
    pub(crate) async fn run(self) {
        let writer = SessionWriter {
            handle: Arc::clone(&self.handle),
            epoch: self.epoch,
            bus: Arc::clone(&self.bus),
        };

        // Working copy of the conversation sent to the provider. Grows with
        // each finalized turn so later steps see earlier tool results.
        let mut transcript = self.handle.messages();

        let max_steps = self.handle.config().max_steps;
        let mut steps_used = 0;

        while steps_used < max_steps {
            if self.cancel.is_cancelled() {
                break;
            }
            steps_used += 1;

            let request = ChatRequest {
                messages: transcript.clone(),
                system_prompt: self.handle.config().system_prompt.clone(),
                tools: self.handle.tools().definitions(),
            };

            let mut stream = match self.provider.stream(&request, &self.options).await {
                Ok(stream) => stream,
                Err(error) => {
                    self.surface_error(&writer, &error);
                    break;
                }
            };

            let mut opened = false;
            let mut stop_reason = None;
            let mut failed = false;
            let mut cancelled = false;

            loop {
                let item = tokio::select! {
                    _ = self.cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    item = stream.next() => item,
                };

                let Some(item) = item else {
                    // Provider closed without a finish chunk. Keep what we
                    // have and treat the turn as complete.
                    break;
                };

                match item {
                    Ok(StreamChunk::TextDelta { delta }) => {
                        if !opened {
                            writer.open_streaming();
                            opened = true;
                        }
                        writer.push_delta(&delta);
                    }
                    Ok(StreamChunk::ToolCall(call)) => {
                        if !opened {
                            writer.open_streaming();
                            opened = true;
                        }
                        debug!(tool = %call.name, id = %call.id, "model requested tool");
                        writer.push_tool_call(call);
                    }
                    Ok(StreamChunk::ToolResult(result)) => {
                        // Providers running tools server-side report the
                        // result on the wire. Appending it resolves the call
                        // so the local executor skips it.
                        writer.push_tool_result(result);
                    }
                    Ok(StreamChunk::Finish { stop_reason: reason }) => {
                        stop_reason = Some(reason);
                        break;
                    }
                    Err(error) => {
                        self.surface_error(&writer, &error);
                        failed = true;
                        break;
                    }
                }
            }

            if failed {
                break;
            }
            if cancelled {
                if opened {
                    writer.finalize_streaming(stop_reason);
                }
                break;
            }

            let pending = writer.pending_tool_calls();
            if pending.is_empty() {
                if opened {
                    writer.finalize_streaming(stop_reason);
                }
                break;
            }

            // Tool results land in the still-open assistant message so
            // subscribers watch them arrive, then the whole turn is
            // finalized at once.
            let ctx = self.tool_context();
            for call in &pending {
                if self.cancel.is_cancelled() {
                    break;
                }
                let result = execute_tool_call(
                    self.handle.tools(),
                    call,
                    &ctx,
                    self.tool_timeout,
                )
                .await;
                writer.push_tool_result(result);
            }

            match writer.finalize_streaming(stop_reason.or(Some(StopReason::ToolUse))) {
                Some(message) => transcript.push(message),
                None => break,
            }

            if steps_used >= max_steps {
                debug!(steps_used, "step budget exhausted");
            }
        }

        writer.finish();
    }

    /// A provider failure becomes assistant text instead of an error: the
    /// partial turn (if any) absorbs it, otherwise a standalone message
    /// carries it. Either way the session stays usable.
    fn surface_error(&self, writer: &SessionWriter, error: &ProviderError) {
        warn!(%error, "provider error surfaced to conversation");
        writer.surface_error_text(&format!("Error: {error}"));
    }

    fn tool_context(&self) -> ToolContext {
        let config = self.handle.config();
        ToolContext {
            session_id: self.handle.id().clone(),
            project_id: config.project_id.clone(),
            working_directory: config.working_directory.clone(),
            abort_signal: self.cancel.clone(),
            events: Arc::clone(&self.bus),
        }
    }
}

/// Runs one tool call to completion. Infallible by construction: lookup
/// misses, tool errors, panics, and timeouts all come back as `is_error`
/// results with the failure text as output.
pub(crate) async fn execute_tool_call(
    registry: &ToolRegistry,
    call: &ToolCallPart,
    ctx: &ToolContext,
    timeout: Duration,
) -> ToolResultPart {
    let Some(tool) = registry.get(&call.name) else {
        return ToolResultPart {
            tool_call_id: call.id.clone(),
            output: format!("Unknown tool: {}", call.name),
            is_error: true,
        };
    };

    let start = Instant::now();
    let outcome = tokio::time::timeout(
        timeout,
        AssertUnwindSafe(tool.execute(call.arguments.clone(), ctx)).catch_unwind(),
    )
    .await;

    let (output, is_error) = match outcome {
        Ok(Ok(Ok(result))) => (result.content, result.is_error),
        Ok(Ok(Err(error))) => (error.to_string(), true),
        Ok(Err(panic)) => {
            error!(tool = %call.name, panic = %panic_message(&panic), "tool panicked");
            ("Internal error: tool crashed".to_string(), true)
        }
        Err(_) => {
            warn!(tool = %call.name, timeout_secs = timeout.as_secs(), "tool timed out");
            (format!("Tool timed out after {}s", timeout.as_secs()), true)
        }
    };

    debug!(
        tool = %call.name,
        duration_ms = start.elapsed().as_millis() as u64,
        is_error,
        "tool finished"
    );

    let max = truncate::max_output_for_tool(&call.name);
    ToolResultPart {
        tool_call_id: call.id.clone(),
        output: truncate::truncate_output(&output, max).into_owned(),
        is_error,
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Epoch-guarded writes into the session, each paired with its event.
///
/// `start_new_session` and deletion bump the session epoch while holding
/// the state lock; every method here checks the epoch under that same
/// lock, so a stale runner turns into a silent no-op instead of writing
/// over a reset session. The cancellation token is what actually makes
/// the stale runner stop.
struct SessionWriter {
    handle: Arc<SessionHandle>,
    epoch: u64,
    bus: Arc<EventBus>,
}

impl SessionWriter {
    fn current(&self) -> bool {
        self.handle.epoch() == self.epoch
    }

    /// Opens the streaming assistant message and announces it. Content
    /// arrives through `streaming_update` events after this.
    fn open_streaming(&self) {
        let message = {
            let mut state = self.handle.state_mut();
            if !self.current() {
                return;
            }
            let open = AssistantMessage::new();
            state.streaming = Some(open.clone());
            state.last_activity = Utc::now();
            Message::Assistant(open)
        };
        self.bus.emit(SessionEvent::MessageAdded {
            session_id: self.handle.id().clone(),
            message,
        });
    }

    fn push_delta(&self, delta: &str) {
        let snapshot = {
            let mut state = self.handle.state_mut();
            if !self.current() {
                return;
            }
            let Some(streaming) = state.streaming.as_mut() else {
                return;
            };
            streaming.push_text_delta(delta);
            streaming.clone()
        };
        self.bus.emit(SessionEvent::StreamingUpdate {
            session_id: self.handle.id().clone(),
            message: snapshot,
        });
    }

    fn push_tool_call(&self, call: ToolCallPart) {
        let snapshot = {
            let mut state = self.handle.state_mut();
            if !self.current() {
                return;
            }
            let Some(streaming) = state.streaming.as_mut() else {
                return;
            };
            streaming.push_tool_call(call);
            streaming.clone()
        };
        self.bus.emit(SessionEvent::StreamingUpdate {
            session_id: self.handle.id().clone(),
            message: snapshot,
        });
    }

    fn push_tool_result(&self, result: ToolResultPart) {
        let snapshot = {
            let mut state = self.handle.state_mut();
            if !self.current() {
                return;
            }
            let Some(streaming) = state.streaming.as_mut() else {
                return;
            };
            streaming.push_tool_result(result);
            streaming.clone()
        };
        self.bus.emit(SessionEvent::StreamingUpdate {
            session_id: self.handle.id().clone(),
            message: snapshot,
        });
    }

    /// Calls the model asked for that have no result yet, cloned out so
    /// the executor can run without holding the state lock.
    fn pending_tool_calls(&self) -> Vec<ToolCallPart> {
        let state = self.handle.state();
        if !self.current() {
            return Vec::new();
        }
        match state.streaming.as_ref() {
            Some(streaming) => streaming
                .unresolved_tool_calls()
                .into_iter()
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Moves the streaming message into the conversation and announces the
    /// finished turn. Returns the finalized message for the transcript.
    fn finalize_streaming(&self, stop_reason: Option<StopReason>) -> Option<Message> {
        let message = {
            let mut state = self.handle.state_mut();
            if !self.current() {
                return None;
            }
            let mut assistant = state.streaming.take()?;
            if assistant.stop_reason.is_none() {
                assistant.stop_reason = stop_reason;
            }
            let message = Message::Assistant(assistant);
            state.messages.push(message.clone());
            state.last_activity = Utc::now();
            message
        };
        self.bus.emit(SessionEvent::MessageAdded {
            session_id: self.handle.id().clone(),
            message: message.clone(),
        });
        Some(message)
    }

    /// Lands provider-error text in the conversation: appended to the open
    /// turn when one exists (then finalized), otherwise as its own message.
    fn surface_error_text(&self, text: &str) {
        let padded = {
            let state = self.handle.state();
            if !self.current() {
                return;
            }
            state.streaming.as_ref().map(|streaming| {
                if streaming.is_empty() {
                    text.to_string()
                } else {
                    format!("\n\n{text}")
                }
            })
        };
        match padded {
            Some(padded) => {
                self.push_delta(&padded);
                self.finalize_streaming(None);
            }
            None => {
                let message = Message::assistant_text(text);
                {
                    let mut state = self.handle.state_mut();
                    if !self.current() {
                        return;
                    }
                    state.messages.push(message.clone());
                    state.last_activity = Utc::now();
                }
                self.bus.emit(SessionEvent::MessageAdded {
                    session_id: self.handle.id().clone(),
                    message,
                });
            }
        }
    }

    /// Ends the generation. Always the last event a generation emits.
    fn finish(&self) {
        {
            let mut state = self.handle.state_mut();
            if !self.current() {
                return;
            }
            state.is_loading = false;
            state.last_activity = Utc::now();
        }
        self.bus.emit(SessionEvent::LoadingChanged {
            session_id: self.handle.id().clone(),
            is_loading: false,
        });
    }
}
