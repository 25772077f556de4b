//! Server-side streaming runtime for incrementally built chat bubbles.
//!
//! Handlers construct and mutate *bubbles* — structured message fragments —
//! while the runtime streams every mutation to the connected client as
//! newline-delimited JSON. The runtime guarantees per-stream frame ordering
//! with gap-free sequence numbers, at most one open stream per conversation,
//! heartbeats, first-event and idle timeouts, out-of-band cancellation, and
//! exactly one terminal frame per stream.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bubblekit::{BubbleServer, MessageContext, Runtime, bubble};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let runtime = Arc::new(Runtime::new().on_message(|cx: MessageContext| async move {
//!     let reply = bubble().send().await?;
//!     reply.stream("Echo: ").await?;
//!     reply.stream(cx.message).await?;
//!     reply.done().await?;
//!     Ok(())
//! }));
//! let server = BubbleServer::serve(runtime, "127.0.0.1:3000".parse()?).await?;
//! # drop(server);
//! # Ok(())
//! # }
//! ```

mod error;
pub use error::{Error, HandlerError};

pub mod model;
pub mod runtime;
pub mod serve;
pub mod session;
mod util;

pub use model::{
    Bubble, BubbleRecord, BubbleTemplate, ConfigPatch, Frame, FrameBody, InterruptReason, bubble,
};
pub use runtime::{
    OpenedStream, Runtime, RuntimeConfig, StreamRequest,
    context::{
        active_conversation_id, access_bubble, cancellation_token, clear_conversation,
        get_conversation_list, set_conversation_list,
    },
    registry::{HistoryContext, MessageContext, NewChatContext},
};
pub use serve::{BubbleServer, ServerConfig, router};
pub use session::{ConversationIndex, ConversationSummary, SessionStore};
pub use util::now_millis;
