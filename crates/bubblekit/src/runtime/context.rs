//! The ambient per-request binding.
//!
//! Handler code calls [`bubble`](crate::model::bubble), [`access_bubble`],
//! [`clear_conversation`] and friends without threading a session parameter
//! around. The binding is a task-local established for the dynamic extent of
//! one handler invocation: it covers everything the handler awaits on the
//! same task, is invisible to concurrent requests, and is dropped on every
//! exit path including panics. Nothing here is process-global, so tests can
//! run many streams concurrently in one process.

use std::sync::Arc;

use tokio::task_local;
use tokio_util::sync::CancellationToken;

use crate::{
    error::Error,
    model::bubble::Bubble,
    runtime::sink::EventSink,
    session::{ConversationIndex, ConversationSummary, SessionHandle, SessionStore},
};

task_local! {
    static ACTIVE_CONTEXT: Arc<ActiveContext>;
}

/// Everything one handler invocation can reach: its session, the sink (when
/// streaming), the shared stores, and the stream's cancellation token.
pub struct ActiveContext {
    pub(crate) conversation_id: Arc<str>,
    pub(crate) user_id: String,
    pub(crate) session: SessionHandle,
    pub(crate) sink: Option<EventSink>,
    pub(crate) store: SessionStore,
    pub(crate) index: ConversationIndex,
    pub(crate) cancel: CancellationToken,
}

impl ActiveContext {
    /// Run `fut` with this context bound for its dynamic extent.
    pub(crate) async fn scope<F>(self: Arc<Self>, fut: F) -> F::Output
    where
        F: Future,
    {
        ACTIVE_CONTEXT.scope(self, fut).await
    }
}

pub(crate) fn try_current() -> Option<Arc<ActiveContext>> {
    ACTIVE_CONTEXT.try_with(Arc::clone).ok()
}

pub(crate) fn current() -> Result<Arc<ActiveContext>, Error> {
    try_current().ok_or(Error::NoActiveContext)
}

/// The conversation id of the active request.
pub fn active_conversation_id() -> Result<String, Error> {
    Ok(current()?.conversation_id.to_string())
}

/// The cancellation token of the active stream. Long-running handlers are
/// expected to observe it; ignoring it only means later emissions get
/// dropped once the stream is gone.
pub fn cancellation_token() -> Result<CancellationToken, Error> {
    Ok(current()?.cancel.clone())
}

/// Look up a bubble bound earlier in this conversation.
///
/// Requires a streaming context (an attached sink); unknown ids fail with
/// [`Error::BubbleNotFound`].
pub async fn access_bubble(id: &str) -> Result<Bubble, Error> {
    let ctx = current()?;
    if ctx.sink.is_none() {
        return Err(Error::NoActiveContext);
    }
    let session = ctx.session.lock().await;
    if !session.contains(id) {
        return Err(Error::BubbleNotFound(id.to_string()));
    }
    Ok(Bubble { id: id.into() })
}

/// Drop all bubbles of a conversation.
///
/// Without an id this clears the active session; with one it clears the
/// named conversation. An attached stream stays attached either way, and
/// bubble handles created before the clear become stale no-ops.
pub async fn clear_conversation(conversation_id: Option<&str>) -> Result<(), Error> {
    let ctx = current()?;
    match conversation_id {
        None => ctx.session.lock().await.clear(),
        Some(id) => ctx.store.clear_conversation(id).await,
    }
    Ok(())
}

/// Replace the caller-visible conversation list for a user.
pub async fn set_conversation_list(
    user_id: &str,
    entries: Vec<ConversationSummary>,
) -> Result<(), Error> {
    current()?.index.set(user_id, entries).await
}

/// Snapshot the conversation list for a user.
pub async fn get_conversation_list(user_id: &str) -> Result<Vec<ConversationSummary>, Error> {
    Ok(current()?.index.get(user_id).await)
}

#[cfg(test)]
mod tests {
    use tokio::sync::{Mutex, mpsc};

    use super::*;
    use crate::{model::bubble::bubble, session::Session};

    fn test_context(with_sink: bool) -> (Arc<ActiveContext>, Option<mpsc::Receiver<bytes::Bytes>>) {
        let session = Arc::new(Mutex::new(Session::new("c-ctx".into())));
        let (sink, rx) = if with_sink {
            let (tx, rx) = mpsc::channel(64);
            (Some(EventSink::new("s-ctx".into(), tx)), Some(rx))
        } else {
            (None, None)
        };
        if let Some(sink) = &sink {
            session
                .try_lock()
                .map(|mut s| s.attach_stream(sink.clone()))
                .unwrap()
                .unwrap();
        }
        let ctx = Arc::new(ActiveContext {
            conversation_id: "c-ctx".into(),
            user_id: "u-ctx".into(),
            session,
            sink,
            store: SessionStore::new(),
            index: ConversationIndex::new(),
            cancel: CancellationToken::new(),
        });
        (ctx, rx)
    }

    #[tokio::test]
    async fn api_outside_a_scope_fails() {
        assert!(matches!(
            bubble().send().await.unwrap_err(),
            Error::NoActiveContext
        ));
        assert!(matches!(
            access_bubble("b-1").await.unwrap_err(),
            Error::NoActiveContext
        ));
        assert!(matches!(
            clear_conversation(None).await.unwrap_err(),
            Error::NoActiveContext
        ));
        assert!(cancellation_token().is_err());
    }

    #[tokio::test]
    async fn scope_binds_and_unbinds() {
        let (ctx, _rx) = test_context(true);
        ctx.scope(async {
            assert_eq!(active_conversation_id().unwrap(), "c-ctx");
            let handle = bubble().send().await.unwrap();
            assert!(access_bubble(handle.id()).await.is_ok());
            assert!(matches!(
                access_bubble("missing").await.unwrap_err(),
                Error::BubbleNotFound(_)
            ));
        })
        .await;
        assert!(try_current().is_none());
    }

    #[tokio::test]
    async fn access_bubble_requires_a_sink() {
        let (ctx, _) = test_context(false);
        ctx.scope(async {
            // Bind without a sink; history path still records the bubble.
            let handle = bubble().id("b-h").send().await.unwrap();
            assert_eq!(handle.id(), "b-h");
            assert!(matches!(
                access_bubble("b-h").await.unwrap_err(),
                Error::NoActiveContext
            ));
        })
        .await;
    }

    #[tokio::test]
    async fn concurrent_scopes_are_isolated() {
        let (ctx_a, _rx_a) = test_context(true);
        let (ctx_b, _rx_b) = test_context(true);

        let a = tokio::spawn(ctx_a.scope(async {
            bubble().id("b-a").send().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            access_bubble("b-b").await.is_err()
        }));
        let b = tokio::spawn(ctx_b.scope(async {
            bubble().id("b-b").send().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            access_bubble("b-a").await.is_err()
        }));

        assert!(a.await.unwrap());
        assert!(b.await.unwrap());
    }

    #[tokio::test]
    async fn clear_conversation_targets_active_or_named() {
        let (ctx, _rx) = test_context(true);
        let store = ctx.store.clone();
        let other = store.get_or_create("c-other").await;
        other
            .lock()
            .await
            .bind_bubble(
                "b-o".into(),
                "user".into(),
                "text".into(),
                "hi".into(),
                serde_json::Map::new(),
            )
            .await;

        ctx.clone()
            .scope(async {
                bubble().send().await.unwrap();
                clear_conversation(None).await.unwrap();
                clear_conversation(Some("c-other")).await.unwrap();
            })
            .await;

        assert!(ctx.session.lock().await.export_messages().is_empty());
        assert!(other.lock().await.export_messages().is_empty());
    }

    #[tokio::test]
    async fn conversation_list_round_trips_through_the_context() {
        let (ctx, _rx) = test_context(true);
        ctx.scope(async {
            let entries = vec![ConversationSummary::new("c-1", "First", 1).unwrap()];
            set_conversation_list("u1", entries.clone()).await.unwrap();
            assert_eq!(get_conversation_list("u1").await.unwrap(), entries);
        })
        .await;
    }
}
