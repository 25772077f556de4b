//! Per-user conversation index.
//!
//! An ordered list of conversation summaries per normalized user id,
//! maintained by handlers (typically from the new-chat callback), never by
//! the streaming runtime itself. Titling a conversation is a handler
//! concern.

use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Error;

/// One entry in a user's conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    /// Milliseconds since the Unix epoch.
    pub updated_at: i64,
}

impl ConversationSummary {
    /// Validated constructor for index entries.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        updated_at: i64,
    ) -> Result<Self, Error> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::invalid_config(
                "conversation entry requires a non-empty id",
            ));
        }
        if updated_at < 0 {
            return Err(Error::invalid_config(
                "conversation entry updatedAt must be a non-negative millisecond timestamp",
            ));
        }
        Ok(ConversationSummary {
            id,
            title: title.into(),
            updated_at,
        })
    }
}

/// Trim the raw header value; empty or missing means `anonymous`.
pub fn normalize_user_id(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(trimmed) if !trimmed.is_empty() => trimmed.to_string(),
        _ => "anonymous".to_string(),
    }
}

#[derive(Clone, Default)]
pub struct ConversationIndex {
    inner: Arc<RwLock<HashMap<String, Vec<ConversationSummary>>>>,
}

impl ConversationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the user's list with a defensive copy, preserving entry
    /// order. Entries are re-validated so deserialized input cannot smuggle
    /// in empty ids.
    pub async fn set(
        &self,
        user_id: &str,
        entries: Vec<ConversationSummary>,
    ) -> Result<(), Error> {
        for entry in &entries {
            if entry.id.trim().is_empty() {
                return Err(Error::invalid_config(
                    "conversation entry requires a non-empty id",
                ));
            }
        }
        let key = normalize_user_id(Some(user_id));
        self.inner.write().await.insert(key, entries);
        Ok(())
    }

    /// Snapshot of the user's list; empty when the user is unknown.
    pub async fn get(&self, user_id: &str) -> Vec<ConversationSummary> {
        let key = normalize_user_id(Some(user_id));
        self.inner.read().await.get(&key).cloned().unwrap_or_default()
    }
}
