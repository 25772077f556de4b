//! The per-request NDJSON emitter.
//!
//! An [`EventSink`] is bound to one HTTP response body for the lifetime of
//! one streaming request. Every emitted frame is stamped with the stream id
//! and a gap-free `seq` under one lock, serialized to a single JSON line,
//! and pushed onto a bounded channel whose receiver is the response body.
//!
//! A full channel blocks the emitting task, which transparently throttles
//! the handler against a slow client. A failed send means the client went
//! away: the sink closes itself, signals its closed token, and every later
//! emit becomes a silent no-op so finalize paths never error on a dead
//! stream.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::model::{Frame, FrameBody};

#[derive(Clone)]
pub struct EventSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    stream_id: Arc<str>,
    state: Mutex<SinkState>,
    closed: CancellationToken,
    activity: watch::Sender<Instant>,
    first_event: AtomicBool,
}

struct SinkState {
    seq: u64,
    tx: Option<mpsc::Sender<Bytes>>,
}

impl EventSink {
    pub fn new(stream_id: Arc<str>, tx: mpsc::Sender<Bytes>) -> Self {
        let (activity, _) = watch::channel(Instant::now());
        EventSink {
            inner: Arc::new(SinkInner {
                stream_id,
                state: Mutex::new(SinkState { seq: 0, tx: Some(tx) }),
                closed: CancellationToken::new(),
                activity,
                first_event: AtomicBool::new(false),
            }),
        }
    }

    pub fn stream_id(&self) -> &Arc<str> {
        &self.inner.stream_id
    }

    /// Write one frame. No-op once the sink is closed; late writes from
    /// finalize paths must be tolerated, not reported.
    pub async fn emit(&self, body: FrameBody) {
        let is_activity = body.is_handler_activity();
        let mut state = self.inner.state.lock().await;
        let Some(tx) = state.tx.clone() else {
            return;
        };
        let frame = Frame {
            stream_id: self.inner.stream_id.clone(),
            seq: state.seq,
            body,
        };
        let mut line = match serde_json::to_vec(&frame) {
            Ok(line) => line,
            Err(error) => {
                tracing::error!(stream_id = %self.inner.stream_id, %error, "frame serialization failed");
                return;
            }
        };
        line.push(b'\n');
        state.seq += 1;
        if tx.send(Bytes::from(line)).await.is_err() {
            // The response body was dropped; treat as a disconnect.
            state.tx = None;
            drop(state);
            tracing::debug!(stream_id = %self.inner.stream_id, "frame writer gone, closing sink");
            self.inner.closed.cancel();
            return;
        }
        drop(state);
        if is_activity {
            self.inner.first_event.store(true, Ordering::Release);
            let _ = self.inner.activity.send(Instant::now());
        }
    }

    /// Mark the sink closed and release the writer. Emits nothing itself;
    /// idempotent.
    pub async fn close(&self) {
        let mut state = self.inner.state.lock().await;
        state.tx = None;
        drop(state);
        self.inner.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Cancelled when the sink closes, including on writer failure.
    pub fn closed_token(&self) -> CancellationToken {
        self.inner.closed.clone()
    }

    /// True once any handler-produced frame went out.
    pub fn first_event_seen(&self) -> bool {
        self.inner.first_event.load(Ordering::Acquire)
    }

    /// Watch the instant of the last handler-produced frame. Heartbeats and
    /// lifecycle frames never tick this.
    pub fn activity(&self) -> watch::Receiver<Instant> {
        self.inner.activity.subscribe()
    }
}
