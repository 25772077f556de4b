//! In-memory session store.
//!
//! `conversationId → Session`, created lazily on first reference. No
//! eviction; a persistent store would sit behind the same surface.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, RwLock};

use super::Session;

pub type SessionHandle = Arc<Mutex<Session>>;

#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Arc<str>, SessionHandle>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The only entry point: look the session up, creating it on first
    /// reference.
    pub async fn get_or_create(&self, conversation_id: &str) -> SessionHandle {
        {
            let sessions = self.inner.read().await;
            if let Some(session) = sessions.get(conversation_id) {
                return session.clone();
            }
        }
        let mut sessions = self.inner.write().await;
        // Racing creators settle on whoever inserted first.
        if let Some(session) = sessions.get(conversation_id) {
            return session.clone();
        }
        let id: Arc<str> = conversation_id.into();
        let session = Arc::new(Mutex::new(Session::new(id.clone())));
        sessions.insert(id, session.clone());
        session
    }

    /// Look up an existing session without creating one.
    pub async fn get(&self, conversation_id: &str) -> Option<SessionHandle> {
        self.inner.read().await.get(conversation_id).cloned()
    }

    /// Drop the named conversation's bubbles. The session entry itself (and
    /// any attached stream) survives.
    pub async fn clear_conversation(&self, conversation_id: &str) {
        if let Some(session) = self.get(conversation_id).await {
            session.lock().await.clear();
        }
    }
}
