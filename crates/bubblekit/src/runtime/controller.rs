//! Drives one streaming request end to end.
//!
//! The controller owns the request's state machine: it stamps the `started`
//! frame, runs the registered handlers under the ambient context, keeps the
//! stream alive with heartbeats, enforces the first-event and idle windows,
//! honors out-of-band cancellation, and guarantees exactly one terminal
//! frame after all per-bubble `done` frames.
//!
//! Two invariants carry the terminal ordering guarantee. First, every
//! handler frame is emitted under the session lock, and the finalize block
//! takes that lock across finalize-pending, terminal emission, and detach,
//! so no handler frame can land between the auto-finalize `done` frames and
//! the terminal. Second, the sink refuses writes once closed, so an
//! abandoned handler that keeps computing after an interrupt can no longer
//! reach the wire.

use std::sync::Arc;

use tokio::{
    sync::mpsc,
    time::{Instant, interval_at, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    error::{Error, HandlerError},
    model::{FrameBody, InterruptReason, bubble::BubbleRecord},
    runtime::{
        OpenedStream, Runtime, StreamRequest,
        context::ActiveContext,
        registry::{HistoryContext, MessageContext, NewChatContext},
        sink::EventSink,
    },
    session::SessionHandle,
    util,
};

enum Outcome {
    Completed,
    Interrupted(InterruptReason),
    Failed(String),
}

impl Runtime {
    /// Open a stream for one request: attach a fresh sink to the
    /// conversation, register the cancel handle, and spawn the drive task.
    ///
    /// Fails with [`Error::StreamAlreadyAttached`] before any frame is
    /// produced when the conversation already has an open stream.
    pub async fn open_stream(
        self: &Arc<Self>,
        request: StreamRequest,
    ) -> Result<OpenedStream, Error> {
        let StreamRequest {
            conversation_id,
            message,
            user_id,
        } = request;
        let minted = conversation_id.is_none();
        let conversation_id: Arc<str> = conversation_id
            .unwrap_or_else(util::conversation_id)
            .into();

        let session = self.store.get_or_create(&conversation_id).await;
        let stream_id: Arc<str> = util::stream_id().into();
        let (tx, frames) = mpsc::channel(self.config.sink_buffer);
        let sink = EventSink::new(stream_id.clone(), tx);
        session.lock().await.attach_stream(sink.clone())?;

        // Child of the runtime's shutdown token, so server shutdown
        // interrupts this stream along with every other one.
        let cancel = self.ct.child_token();
        self.cancels
            .write()
            .await
            .insert(stream_id.clone(), cancel.clone());
        tracing::info!(
            stream_id = %stream_id,
            conversation_id = %conversation_id,
            minted,
            "stream opened"
        );

        let span = tracing::info_span!("stream", stream_id = %stream_id);
        tokio::spawn(
            drive(
                self.clone(),
                session,
                sink,
                cancel,
                conversation_id.clone(),
                user_id,
                message,
                minted,
            )
            .instrument(span),
        );

        Ok(OpenedStream {
            stream_id,
            conversation_id,
            frames,
        })
    }

    /// Signal a live stream to stop. Returns `false` for unknown (or
    /// already finished) stream ids; cancelling twice is harmless.
    pub async fn cancel_stream(&self, stream_id: &str) -> bool {
        match self.cancels.read().await.get(stream_id) {
            Some(token) => {
                tracing::debug!(stream_id, "cancel requested");
                token.cancel();
                true
            }
            None => {
                tracing::debug!(stream_id, "cancel for unknown stream");
                false
            }
        }
    }

    /// Resolve the message history of a conversation.
    ///
    /// Runs the history handler (if any) inside an active context with no
    /// sink, so bubbles it sends are recorded without emitting. A handler
    /// returning nothing falls back to exporting the session as-is,
    /// including bubbles that were never finalized.
    pub async fn conversation_history(
        self: &Arc<Self>,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Vec<BubbleRecord>, Error> {
        let session = self.store.get_or_create(conversation_id).await;
        if let Some(handler) = self.registry.on_history.clone() {
            let ctx = Arc::new(ActiveContext {
                conversation_id: conversation_id.into(),
                user_id: user_id.to_string(),
                session: session.clone(),
                sink: None,
                store: self.store.clone(),
                index: self.index.clone(),
                cancel: CancellationToken::new(),
            });
            let invocation = handler(HistoryContext {
                conversation_id: conversation_id.to_string(),
                user_id: user_id.to_string(),
            });
            match ctx.scope(invocation).await {
                Ok(Some(messages)) => return Ok(messages),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(conversation_id, %error, "history handler failed");
                    return Err(Error::Handler(error.to_string()));
                }
            }
        }
        Ok(session.lock().await.export_messages())
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive(
    runtime: Arc<Runtime>,
    session: SessionHandle,
    sink: EventSink,
    cancel: CancellationToken,
    conversation_id: Arc<str>,
    user_id: String,
    message: Option<String>,
    minted: bool,
) {
    let config = runtime.config.clone();
    sink.emit(FrameBody::started(conversation_id.to_string())).await;

    let ctx = Arc::new(ActiveContext {
        conversation_id: conversation_id.clone(),
        user_id: user_id.clone(),
        session: session.clone(),
        sink: Some(sink.clone()),
        store: runtime.store.clone(),
        index: runtime.index.clone(),
        cancel: cancel.clone(),
    });

    let handler_fut = {
        let registry = runtime.registry.clone();
        let sink = sink.clone();
        let conversation_id = conversation_id.clone();
        async move {
            if minted {
                sink.emit(FrameBody::meta(conversation_id.to_string())).await;
                if let Some(handler) = &registry.on_new_chat {
                    handler(NewChatContext {
                        conversation_id: conversation_id.to_string(),
                        user_id: user_id.clone(),
                    })
                    .await?;
                }
            }
            if let Some(message) = message.filter(|m| !m.is_empty()) {
                sink.emit(FrameBody::progress("processing")).await;
                if let Some(handler) = &registry.on_message {
                    handler(MessageContext {
                        conversation_id: conversation_id.to_string(),
                        user_id,
                        message,
                    })
                    .await?;
                }
            }
            Ok::<(), HandlerError>(())
        }
    };
    let mut handler = tokio::spawn(ctx.scope(handler_fut));

    let started_at = Instant::now();
    let first_event_deadline = started_at + config.first_event_timeout;
    let mut heartbeat = interval_at(
        started_at + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    let activity = sink.activity();
    let sink_closed = sink.closed_token();

    let outcome = loop {
        let idle_deadline = *activity.borrow() + config.idle_timeout;
        tokio::select! {
            result = &mut handler => {
                break match result {
                    Ok(Ok(())) => Outcome::Completed,
                    Ok(Err(error)) => Outcome::Failed(error.to_string()),
                    Err(join_error) => Outcome::Failed(join_error.to_string()),
                };
            }
            _ = cancel.cancelled() => {
                break Outcome::Interrupted(InterruptReason::ClientCancel);
            }
            _ = sink_closed.cancelled() => {
                break Outcome::Interrupted(InterruptReason::Disconnect);
            }
            _ = sleep_until(first_event_deadline), if !sink.first_event_seen() => {
                // Re-check: the first frame may have raced the deadline.
                if !sink.first_event_seen() {
                    break Outcome::Interrupted(InterruptReason::FirstEventTimeout);
                }
            }
            _ = sleep_until(idle_deadline) => {
                if *activity.borrow() + config.idle_timeout <= Instant::now() {
                    break Outcome::Interrupted(InterruptReason::IdleTimeout);
                }
                // Activity arrived while we slept; rearm from the new instant.
            }
            _ = heartbeat.tick() => {
                sink.emit(FrameBody::Heartbeat).await;
            }
        }
    };

    // Stop cooperative handlers; an ignoring handler keeps computing but
    // can no longer reach a closed sink.
    cancel.cancel();

    let (terminal, reason) = match &outcome {
        Outcome::Completed => (FrameBody::stream_done(), "normal".to_string()),
        Outcome::Interrupted(reason) => (FrameBody::interrupted(*reason), reason.to_string()),
        Outcome::Failed(message) => {
            tracing::warn!(%conversation_id, %message, "handler failed");
            (FrameBody::handler_error(message.clone()), "handler_error".to_string())
        }
    };

    {
        let mut session = session.lock().await;
        session.finalize_pending().await;
        sink.emit(terminal).await;
        session.detach_stream();
        sink.close().await;
    }

    runtime
        .cancels
        .write()
        .await
        .remove(sink.stream_id().as_ref());
    tracing::info!(%conversation_id, %reason, "stream closed");
}
