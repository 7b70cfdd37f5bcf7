use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chatline_storage::{
    MessageId, MessagePatch, MessageStatus, Role, SendMessageParams, SessionStore, SharedStore,
};
use chatline_stream::{
    ChatRequest, EventDecoder, FinishReason, StreamChunk, Transport, TransportResponse,
};
use futures::StreamExt;
use parking_lot::Mutex;
use snafu::{ResultExt, ensure};
use tokio::sync::oneshot;

use super::error::{ChatError, ChatResult, EmptyMessageSnafu, TransportSnafu};
use super::exchange::{
    ExchangeId, ExchangeOutcome, ExchangeState, ExchangeTransition, RejectReason,
};

pub const STREAM_ENDED_EARLY: &str = "stream ended before a terminal event";

/// What an accepted intent asks the transport for.
struct ExchangePlan {
    assistant_message_id: Option<MessageId>,
    request: ChatRequest,
}

/// Slot entry for the one exchange allowed to write to the store.
struct ActiveExchange {
    assistant_message_id: Option<MessageId>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct ExchangeSlot {
    state: ExchangeState,
    active: Option<ActiveExchange>,
}

impl ExchangeSlot {
    fn holds(&self, exchange_id: ExchangeId) -> bool {
        self.state.is_active(exchange_id)
    }

    fn transition(&mut self, transition: ExchangeTransition) -> bool {
        match self.state.apply(transition) {
            Ok(next) => {
                self.state = next;
                if !self.state.is_in_flight() {
                    self.active = None;
                }
                true
            }
            Err(rejection) => {
                tracing::debug!(?rejection, "ignored exchange transition");
                false
            }
        }
    }

    fn take_cancel(&mut self) -> Option<oneshot::Sender<()>> {
        self.active
            .as_mut()
            .and_then(|active| active.cancel_tx.take())
    }
}

/// Per-exchange state owned by the task driving it.
struct ExchangeContext {
    exchange_id: ExchangeId,
    assistant_message_id: Option<MessageId>,
    buffer: String,
}

struct ExchangeStart {
    context: ExchangeContext,
    request: ChatRequest,
    cancel_rx: oneshot::Receiver<()>,
}

enum ChunkApplied {
    Continue,
    Finished,
    Stale,
}

/// Settles the exchange as aborted if its future is dropped mid-flight.
struct ExchangeGuard<'a> {
    controller: &'a ChatController,
    exchange_id: ExchangeId,
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        if self.controller.cancel_exchange(Some(self.exchange_id)) {
            tracing::debug!(exchange = %self.exchange_id, "exchange dropped before finishing");
        }
    }
}

/// Turns user intents into exchanges against a [`Transport`] and folds the
/// streamed reply into the shared store.
///
/// At most one exchange is in flight. Intents arriving meanwhile resolve to
/// [`ExchangeOutcome::Rejected`] without touching the store.
pub struct ChatController {
    store: SharedStore,
    transport: Arc<dyn Transport>,
    slot: Mutex<ExchangeSlot>,
    next_exchange_id: AtomicU64,
}

impl ChatController {
    pub fn new(store: SharedStore, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            slot: Mutex::new(ExchangeSlot::default()),
            next_exchange_id: AtomicU64::new(1),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn exchange_state(&self) -> ExchangeState {
        self.slot.lock().state.clone()
    }

    pub fn is_in_flight(&self) -> bool {
        self.slot.lock().state.is_in_flight()
    }

    pub async fn send_message(&self, params: SendMessageParams) -> ChatResult<ExchangeOutcome> {
        ensure!(
            !params.is_blank(),
            EmptyMessageSnafu {
                stage: "validate-send-message",
            }
        );

        let start = self.begin_exchange("send", |store| {
            let request = ChatRequest::new(params.content.clone(), params.images.clone());
            let assistant_message_id = store.send_message(params);
            Ok(ExchangePlan {
                assistant_message_id,
                request,
            })
        });
        Ok(self.drive(start).await)
    }

    /// Rewrites a user message in the current session, then asks again with the
    /// new text and the message's original images.
    pub async fn edit_message(
        &self,
        message_id: MessageId,
        new_content: impl Into<String>,
    ) -> ChatResult<ExchangeOutcome> {
        let new_content = new_content.into();
        let original_images = {
            let store = self.store.lock();
            store
                .current_session()
                .and_then(|session| session.message(message_id))
                .map(|message| message.images.clone())
        };
        if let Some(images) = original_images {
            let params = SendMessageParams::new(new_content.as_str()).with_images(images);
            ensure!(
                !params.is_blank(),
                EmptyMessageSnafu {
                    stage: "validate-edit-message",
                }
            );
        }

        let start = self.begin_exchange("edit", |store| {
            let message = store
                .current_session()
                .and_then(|session| session.message(message_id))
                .ok_or(RejectReason::MessageNotFound(message_id))?;
            if message.role != Role::User {
                return Err(RejectReason::NotUserMessage(message_id));
            }

            let params = SendMessageParams::new(new_content.as_str())
                .with_images(message.images.clone());
            store.edit_message(message_id, new_content);

            let request = ChatRequest::new(params.content.clone(), params.images.clone());
            let assistant_message_id = store.send_message(params);
            Ok(ExchangePlan {
                assistant_message_id,
                request,
            })
        });
        Ok(self.drive(start).await)
    }

    /// Sends `content` again as a fresh user turn.
    ///
    /// The store does not hand back the new placeholder here, so the exchange
    /// binds to the session's last message when that one is an assistant reply.
    pub async fn resend_message(&self, content: impl Into<String>) -> ChatResult<ExchangeOutcome> {
        let content = content.into();
        ensure!(
            !content.trim().is_empty(),
            EmptyMessageSnafu {
                stage: "validate-resend-message",
            }
        );

        let start = self.begin_exchange("resend", |store| {
            store.resend_message(content.as_str());
            let assistant_message_id = store
                .current_session()
                .and_then(|session| session.last_message())
                .filter(|message| message.role == Role::Assistant)
                .map(|message| message.id);

            Ok(ExchangePlan {
                assistant_message_id,
                request: ChatRequest::new(content, Vec::new()),
            })
        });
        Ok(self.drive(start).await)
    }

    /// Asks again with the user turn directly before assistant message `message_id`.
    pub async fn regenerate_message(&self, message_id: MessageId) -> ExchangeOutcome {
        let start = self.begin_exchange("regenerate", |store| {
            let session = store
                .current_session()
                .ok_or(RejectReason::NoCurrentSession)?;
            let index = session
                .messages
                .iter()
                .position(|message| message.id == message_id)
                .ok_or(RejectReason::MessageNotFound(message_id))?;
            if session.messages[index].role != Role::Assistant {
                return Err(RejectReason::NotAssistantMessage(message_id));
            }

            let previous = index
                .checked_sub(1)
                .map(|previous_index| &session.messages[previous_index])
                .filter(|message| message.role == Role::User)
                .ok_or(RejectReason::NoPrecedingUserMessage(message_id))?;
            let params = SendMessageParams::new(previous.content.as_str())
                .with_images(previous.images.clone());

            let request = ChatRequest::new(params.content.clone(), params.images.clone());
            let assistant_message_id = store.send_message(params);
            Ok(ExchangePlan {
                assistant_message_id,
                request,
            })
        });
        self.drive(start).await
    }

    /// Stops the in-flight exchange, keeping whatever content already arrived.
    ///
    /// Returns whether an exchange was actually cancelled. Flags are cleared either way.
    pub fn abort_streaming(&self) -> bool {
        let cancelled = self.cancel_exchange(None);
        tracing::debug!(cancelled, "abort requested");
        cancelled
    }

    /// Cancels the in-flight exchange without touching the store again.
    pub fn shutdown(&self) {
        let mut slot = self.slot.lock();
        let Some(exchange_id) = slot.state.active_exchange() else {
            return;
        };

        let cancel_tx = slot.take_cancel();
        slot.transition(ExchangeTransition::Abort(exchange_id));
        drop(slot);

        if let Some(cancel_tx) = cancel_tx {
            let _ = cancel_tx.send(());
        }
        tracing::debug!(exchange = %exchange_id, "cancelled exchange on shutdown");
    }

    fn begin_exchange<F>(
        &self,
        intent: &'static str,
        build_plan: F,
    ) -> Result<ExchangeStart, RejectReason>
    where
        F: FnOnce(&mut SessionStore) -> Result<ExchangePlan, RejectReason>,
    {
        let mut slot = self.slot.lock();
        let exchange_id = ExchangeId::new(self.next_exchange_id.fetch_add(1, Ordering::Relaxed));
        let sending = match slot.state.apply(ExchangeTransition::Start(exchange_id)) {
            Ok(sending) => sending,
            Err(rejection) => {
                tracing::debug!(intent, ?rejection, "exchange already in flight; intent ignored");
                return Err(RejectReason::ExchangeInFlight);
            }
        };

        let plan = {
            let mut store = self.store.lock();
            build_plan(&mut *store)
        }
        .inspect_err(|reason| tracing::debug!(intent, ?reason, "intent rejected"))?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        slot.state = sending;
        slot.active = Some(ActiveExchange {
            assistant_message_id: plan.assistant_message_id,
            cancel_tx: Some(cancel_tx),
        });

        tracing::debug!(
            exchange = %exchange_id,
            intent,
            assistant_message_id = ?plan.assistant_message_id,
            "exchange started"
        );

        Ok(ExchangeStart {
            context: ExchangeContext {
                exchange_id,
                assistant_message_id: plan.assistant_message_id,
                buffer: String::new(),
            },
            request: plan.request,
            cancel_rx,
        })
    }

    async fn drive(&self, start: Result<ExchangeStart, RejectReason>) -> ExchangeOutcome {
        match start {
            Ok(start) => self.run_exchange(start).await,
            Err(reason) => ExchangeOutcome::Rejected(reason),
        }
    }

    async fn run_exchange(&self, start: ExchangeStart) -> ExchangeOutcome {
        let ExchangeStart {
            mut context,
            request,
            mut cancel_rx,
        } = start;
        let _guard = ExchangeGuard {
            controller: self,
            exchange_id: context.exchange_id,
        };

        let opened = tokio::select! {
            biased;
            _ = &mut cancel_rx => return ExchangeOutcome::Aborted,
            opened = self.transport.open(request) => opened,
        };
        let body = match opened
            .and_then(TransportResponse::into_body)
            .context(TransportSnafu {
                stage: "open-chat-stream",
            }) {
            Ok(body) => body,
            Err(error) => return self.fail_exchange(&context, error),
        };

        if !self
            .slot
            .lock()
            .transition(ExchangeTransition::BeginStreaming(context.exchange_id))
        {
            return ExchangeOutcome::Aborted;
        }

        let mut decoder = EventDecoder::new(body);
        loop {
            let next = tokio::select! {
                biased;
                _ = &mut cancel_rx => return ExchangeOutcome::Aborted,
                next = decoder.next() => next,
            };

            match next {
                Some(Ok(chunk)) => match self.apply_chunk(&mut context, chunk) {
                    ChunkApplied::Continue => {}
                    ChunkApplied::Finished => return ExchangeOutcome::Completed,
                    ChunkApplied::Stale => return ExchangeOutcome::Aborted,
                },
                Some(Err(source)) => {
                    let error = ChatError::Transport {
                        stage: "read-chat-stream",
                        source,
                    };
                    return self.fail_exchange(&context, error);
                }
                None if decoder.finish_reason() == Some(FinishReason::Sentinel) => {
                    return self.complete_exchange(&context);
                }
                None => {
                    let error = ChatError::UnknownStream {
                        stage: "read-chat-stream",
                        message: STREAM_ENDED_EARLY.to_string(),
                    };
                    return self.fail_exchange(&context, error);
                }
            }
        }
    }

    fn apply_chunk(&self, context: &mut ExchangeContext, chunk: StreamChunk) -> ChunkApplied {
        let mut slot = self.slot.lock();
        if !slot.holds(context.exchange_id) {
            tracing::debug!(exchange = %context.exchange_id, "dropping chunk for a settled exchange");
            return ChunkApplied::Stale;
        }

        let mut store = self.store.lock();
        let done = chunk.done;
        if chunk.is_image() {
            if let Some(message_id) = context.assistant_message_id {
                let mut images = store
                    .message(message_id)
                    .map(|message| message.images.clone())
                    .unwrap_or_default();
                images.extend(chunk.images.unwrap_or_default());

                let mut patch = MessagePatch::default().with_images(images);
                if done {
                    patch = patch.with_status(MessageStatus::Completed);
                }
                store.update_message(message_id, patch);
            }
        } else {
            context.buffer.push_str(&chunk.content);
            if let Some(message_id) = context.assistant_message_id {
                let status = if done {
                    MessageStatus::Completed
                } else {
                    MessageStatus::Streaming
                };
                store.update_message(
                    message_id,
                    MessagePatch::content(context.buffer.as_str()).with_status(status),
                );
            }
        }

        if !done {
            return ChunkApplied::Continue;
        }

        store.set_loading(false);
        store.set_streaming(false);
        slot.transition(ExchangeTransition::Complete(context.exchange_id));
        tracing::debug!(
            exchange = %context.exchange_id,
            content_len = context.buffer.len(),
            "exchange completed"
        );
        ChunkApplied::Finished
    }

    fn complete_exchange(&self, context: &ExchangeContext) -> ExchangeOutcome {
        let mut slot = self.slot.lock();
        if !slot.holds(context.exchange_id) {
            return ExchangeOutcome::Aborted;
        }

        let mut store = self.store.lock();
        if let Some(message_id) = context.assistant_message_id.filter(|message_id| {
            store
                .message(*message_id)
                .is_some_and(|message| message.status.is_streaming())
        }) {
            store.update_message(message_id, MessagePatch::status(MessageStatus::Completed));
        }
        store.set_loading(false);
        store.set_streaming(false);

        slot.transition(ExchangeTransition::Complete(context.exchange_id));
        tracing::debug!(
            exchange = %context.exchange_id,
            content_len = context.buffer.len(),
            "exchange completed at sentinel"
        );
        ExchangeOutcome::Completed
    }

    fn fail_exchange(&self, context: &ExchangeContext, error: ChatError) -> ExchangeOutcome {
        if error.is_cancellation() {
            self.cancel_exchange(Some(context.exchange_id));
            return ExchangeOutcome::Aborted;
        }

        let mut slot = self.slot.lock();
        if !slot.holds(context.exchange_id) {
            return ExchangeOutcome::Aborted;
        }

        let message = error.to_string();
        tracing::error!(exchange = %context.exchange_id, error = %error, "chat exchange failed");

        let mut store = self.store.lock();
        let target = context.assistant_message_id.or_else(|| {
            store
                .last_assistant_message()
                .map(|assistant_message| assistant_message.id)
        });
        if let Some(message_id) = target {
            store.update_message(
                message_id,
                MessagePatch::status(MessageStatus::Error(message.clone())),
            );
        }
        store.set_loading(false);
        store.set_streaming(false);

        slot.transition(ExchangeTransition::Fail {
            exchange_id: context.exchange_id,
            message: message.clone(),
        });
        ExchangeOutcome::Errored(message)
    }

    /// Aborts the active exchange, or only `expected` when given.
    fn cancel_exchange(&self, expected: Option<ExchangeId>) -> bool {
        let mut slot = self.slot.lock();
        let active_id = slot.state.active_exchange();
        if expected.is_some() && expected != active_id {
            return false;
        }

        let assistant_message_id = slot
            .active
            .as_ref()
            .and_then(|active| active.assistant_message_id);
        let cancel_tx = slot.take_cancel();
        if let Some(exchange_id) = active_id {
            slot.transition(ExchangeTransition::Abort(exchange_id));
        }

        let mut store = self.store.lock();
        let target = assistant_message_id
            .or_else(|| {
                store
                    .last_assistant_message()
                    .map(|assistant_message| assistant_message.id)
            })
            .filter(|message_id| {
                store
                    .message(*message_id)
                    .is_some_and(|message| message.status.is_streaming())
            });
        if let Some(message_id) = target {
            store.update_message(message_id, MessagePatch::status(MessageStatus::Completed));
        }
        store.set_loading(false);
        store.set_streaming(false);
        drop(store);
        drop(slot);

        if let Some(cancel_tx) = cancel_tx {
            let _ = cancel_tx.send(());
        }
        active_id.is_some()
    }
}

impl Drop for ChatController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
