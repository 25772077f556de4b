//! The in-process streaming runtime.
//!
//! A [`Runtime`] owns the session store, the conversation index, the handler
//! registry, and the live-stream cancel map. The HTTP adapter is a thin
//! layer over [`Runtime::open_stream`], [`Runtime::cancel_stream`], and
//! [`Runtime::conversation_history`]; everything stateful happens here.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

pub mod context;
pub mod controller;
pub mod registry;
pub mod sink;

use crate::session::{ConversationIndex, SessionStore};
use self::registry::{HandlerRegistry, IntoHistoryHandler, IntoMessageHandler, IntoNewChatHandler};

/// Tunables for one runtime. Production defaults match the wire contract;
/// tests shrink the windows.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Keep-alive cadence while a stream is running.
    pub heartbeat_interval: Duration,
    /// How long a stream may run before the first handler-produced frame.
    pub first_event_timeout: Duration,
    /// How long a stream may sit without handler activity.
    pub idle_timeout: Duration,
    /// Bounded frame buffer per stream; a full buffer blocks the handler.
    pub sink_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            heartbeat_interval: Duration::from_secs(15),
            first_event_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            sink_buffer: 256,
        }
    }
}

/// Inbound description of one streaming request, already normalized by the
/// adapter.
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    pub conversation_id: Option<String>,
    pub message: Option<String>,
    pub user_id: String,
}

/// A successfully opened stream: the frame receiver becomes the response
/// body; ids are exposed for logging and tests.
pub struct OpenedStream {
    pub stream_id: Arc<str>,
    pub conversation_id: Arc<str>,
    pub frames: mpsc::Receiver<Bytes>,
}

pub struct Runtime {
    pub(crate) config: RuntimeConfig,
    pub(crate) store: SessionStore,
    pub(crate) index: ConversationIndex,
    pub(crate) registry: HandlerRegistry,
    pub(crate) cancels: Arc<RwLock<HashMap<Arc<str>, CancellationToken>>>,
    /// Parent of every per-stream cancel handle; cancelling it interrupts
    /// all in-flight streams.
    pub(crate) ct: CancellationToken,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Runtime {
            config,
            store: SessionStore::new(),
            index: ConversationIndex::new(),
            registry: HandlerRegistry::default(),
            cancels: Arc::new(RwLock::new(HashMap::new())),
            ct: CancellationToken::new(),
        }
    }

    /// The runtime's shutdown token. Every stream's cancel handle is a
    /// child of it, so cancelling it tears all of them down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.ct.clone()
    }

    /// Interrupt every in-flight stream. Streams opened afterwards are
    /// born cancelled.
    pub fn shutdown(&self) {
        self.ct.cancel();
    }

    /// Register the new-chat callback. Last registration wins.
    pub fn on_new_chat<H, M>(mut self, handler: H) -> Self
    where
        H: IntoNewChatHandler<M>,
    {
        self.registry.set_new_chat(handler);
        self
    }

    /// Register the message callback. Last registration wins.
    pub fn on_message<H, M>(mut self, handler: H) -> Self
    where
        H: IntoMessageHandler<M>,
    {
        self.registry.set_message(handler);
        self
    }

    /// Register the history callback. Last registration wins.
    pub fn on_history<H, M>(mut self, handler: H) -> Self
    where
        H: IntoHistoryHandler<M>,
    {
        self.registry.set_history(handler);
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn index(&self) -> &ConversationIndex {
        &self.index
    }
}
