//! Per-conversation state.
//!
//! A *session* holds the ordered bubble history for one conversation plus at
//! most one attached stream sink. Sessions are created lazily by the
//! [`store::SessionStore`] and live for the process lifetime unless cleared.
//!
//! All bubble mutation funnels through the owning session under its lock, so
//! frame emission for one conversation is serialized by construction: once
//! the controller takes the lock to finalize, no handler frame can slip in
//! between the per-bubble `done` frames and the terminal frame.

use std::{collections::HashMap, sync::Arc};

use serde_json::{Map, Value};

use crate::{
    model::{BubbleRecord, FrameBody, config},
    runtime::sink::EventSink,
    util,
};

pub mod index;
pub mod store;

pub use self::index::{ConversationIndex, ConversationSummary, normalize_user_id};
pub use self::store::{SessionHandle, SessionStore};

pub(crate) struct BubbleState {
    pub id: Arc<str>,
    pub role: String,
    pub kind: String,
    pub content: String,
    pub config: Map<String, Value>,
    pub created_at: String,
    pub done: bool,
}

impl BubbleState {
    fn to_record(&self) -> BubbleRecord {
        BubbleRecord {
            id: self.id.to_string(),
            role: self.role.clone(),
            kind: self.kind.clone(),
            content: self.content.clone(),
            config: self.config.clone(),
            created_at: self.created_at.clone(),
            done: self.done,
        }
    }
}

/// Ordered bubble collection for one conversation.
pub struct Session {
    conversation_id: Arc<str>,
    order: Vec<Arc<str>>,
    bubbles: HashMap<Arc<str>, BubbleState>,
    stream: Option<EventSink>,
    stream_epoch: u64,
}

impl Session {
    pub(crate) fn new(conversation_id: Arc<str>) -> Self {
        Session {
            conversation_id,
            order: Vec::new(),
            bubbles: HashMap::new(),
            stream: None,
            stream_epoch: 0,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.bubbles.contains_key(id)
    }

    /// Attach the sink for a new stream. At most one stream may be open per
    /// conversation; a second attach fails and the caller reports 409.
    pub(crate) fn attach_stream(&mut self, sink: EventSink) -> Result<(), crate::Error> {
        if self.stream.is_some() {
            return Err(crate::Error::StreamAlreadyAttached(
                self.conversation_id.to_string(),
            ));
        }
        self.stream_epoch += 1;
        tracing::debug!(
            conversation_id = %self.conversation_id,
            stream_id = %sink.stream_id(),
            epoch = self.stream_epoch,
            "stream attached"
        );
        self.stream = Some(sink);
        Ok(())
    }

    /// Drop the sink reference. Idempotent.
    pub(crate) fn detach_stream(&mut self) {
        self.stream = None;
    }

    pub(crate) fn attached_stream(&self) -> Option<&EventSink> {
        self.stream.as_ref()
    }

    /// Bind a template into this session.
    ///
    /// With a sink attached this emits the initial `config` frame (and a
    /// `set` frame for non-empty content); without one the bubble is
    /// recorded and immediately done. Re-sending an already-bound id updates
    /// the existing bubble in place instead of duplicating it.
    pub(crate) async fn bind_bubble(
        &mut self,
        id: Arc<str>,
        role: String,
        kind: String,
        content: String,
        patch: Map<String, Value>,
    ) {
        if self.bubbles.contains_key(&id) {
            let mut patch = patch;
            patch.insert("role".to_string(), role.into());
            patch.insert("type".to_string(), kind.into());
            self.update_config(&id, patch).await;
            if !content.is_empty() {
                self.set_content(&id, content).await;
            }
            return;
        }

        let mut bubble = BubbleState {
            id: id.clone(),
            role,
            kind,
            content,
            config: Map::new(),
            created_at: util::iso_now(),
            done: false,
        };
        let effective = config::apply_patch(&mut bubble.config, &patch);
        let mut frame_patch = Map::new();
        frame_patch.insert("role".to_string(), bubble.role.clone().into());
        frame_patch.insert("type".to_string(), bubble.kind.clone().into());
        frame_patch.extend(effective);

        match &self.stream {
            Some(sink) => {
                sink.emit(FrameBody::config(id.to_string(), frame_patch)).await;
                if !bubble.content.is_empty() {
                    sink.emit(FrameBody::set(id.to_string(), bubble.content.clone()))
                        .await;
                }
            }
            // History path: no stream to keep the bubble open for.
            None => bubble.done = true,
        }

        self.order.push(id.clone());
        self.bubbles.insert(id, bubble);
    }

    /// Replace content; silent no-op for missing (stale handle) or done
    /// bubbles.
    pub(crate) async fn set_content(&mut self, id: &str, text: String) {
        let Some(bubble) = self.bubbles.get_mut(id) else {
            return;
        };
        if bubble.done {
            return;
        }
        bubble.content = text;
        if let Some(sink) = &self.stream {
            sink.emit(FrameBody::set(id.to_string(), bubble.content.clone()))
                .await;
        }
    }

    /// Append a chunk; the emitted `delta` frame carries only the chunk.
    pub(crate) async fn append_content(&mut self, id: &str, chunk: String) {
        let Some(bubble) = self.bubbles.get_mut(id) else {
            return;
        };
        if bubble.done {
            return;
        }
        bubble.content.push_str(&chunk);
        if let Some(sink) = &self.stream {
            sink.emit(FrameBody::delta(id.to_string(), chunk)).await;
        }
    }

    /// Merge a validated patch into the bubble config. `role`/`type` keys
    /// update the bubble fields and travel in the emitted patch when they
    /// change; everything else follows the config merge rules. No frame is
    /// emitted when nothing effectively changed.
    pub(crate) async fn update_config(&mut self, id: &str, mut patch: Map<String, Value>) {
        let Some(bubble) = self.bubbles.get_mut(id) else {
            return;
        };
        if bubble.done {
            return;
        }

        let mut frame_patch = Map::new();
        if let Some(role) = patch.remove("role").as_ref().and_then(Value::as_str) {
            if role != bubble.role {
                bubble.role = role.to_string();
                frame_patch.insert("role".to_string(), role.into());
            }
        }
        if let Some(kind) = patch.remove("type").as_ref().and_then(Value::as_str) {
            if kind != bubble.kind {
                bubble.kind = kind.to_string();
                frame_patch.insert("type".to_string(), kind.into());
            }
        }
        let effective = config::apply_patch(&mut bubble.config, &patch);
        frame_patch.extend(effective);

        if frame_patch.is_empty() {
            return;
        }
        if let Some(sink) = &self.stream {
            sink.emit(FrameBody::config(id.to_string(), frame_patch)).await;
        }
    }

    /// Mark a bubble done and emit its `done` frame exactly once.
    pub(crate) async fn finish_bubble(&mut self, id: &str) {
        let Some(bubble) = self.bubbles.get_mut(id) else {
            return;
        };
        if bubble.done {
            return;
        }
        bubble.done = true;
        if let Some(sink) = &self.stream {
            sink.emit(FrameBody::bubble_done(id.to_string())).await;
        }
    }

    /// Finalize every bubble the handler left open, emitting per-bubble
    /// `done` frames in history order on the attached sink.
    pub(crate) async fn finalize_pending(&mut self) {
        let pending: Vec<Arc<str>> = self
            .order
            .iter()
            .filter(|id| self.bubbles.get(*id).is_some_and(|b| !b.done))
            .cloned()
            .collect();
        for id in pending {
            if let Some(bubble) = self.bubbles.get_mut(&id) {
                bubble.done = true;
            }
            tracing::debug!(
                conversation_id = %self.conversation_id,
                bubble_id = %id,
                "auto-finalizing bubble left open at stream end"
            );
            if let Some(sink) = &self.stream {
                sink.emit(FrameBody::bubble_done(id.to_string())).await;
            }
        }
    }

    /// The ordered bubble history as plain records.
    pub fn export_messages(&self) -> Vec<BubbleRecord> {
        self.order
            .iter()
            .filter_map(|id| self.bubbles.get(id))
            .map(BubbleState::to_record)
            .collect()
    }

    /// Drop all bubbles. An attached stream stays attached and keeps
    /// emitting; bubble handles created before the clear go stale.
    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.bubbles.clear();
    }
}
