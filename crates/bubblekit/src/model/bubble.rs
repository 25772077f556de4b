//! Bubble templates, bound bubble handles, and exported records.
//!
//! A [`BubbleTemplate`] is a plain reusable value with no session
//! affiliation. [`BubbleTemplate::send`] binds it into the active request's
//! session and returns a [`Bubble`] handle; the template itself is untouched
//! and may be sent again. All handle methods resolve the session and sink
//! through the ambient request context, so handler code never threads a
//! session parameter around.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::Error,
    model::config::ConfigPatch,
    runtime::context,
    util,
};

/// A bubble exported as a plain record, the shape the history endpoint
/// returns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BubbleRecord {
    pub id: String,
    pub role: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub config: Map<String, Value>,
    pub created_at: String,
    pub done: bool,
}

/// Start a bubble template. Defaults: role `assistant`, type `text`.
///
/// Pure value construction; no request context is required until
/// [`BubbleTemplate::send`].
pub fn bubble() -> BubbleTemplate {
    BubbleTemplate::new()
}

/// An unbound bubble description: desired role, type, pending content, and a
/// pending config patch.
#[derive(Debug, Clone)]
pub struct BubbleTemplate {
    pub(crate) role: String,
    pub(crate) kind: String,
    pub(crate) id: Option<String>,
    pub(crate) content: String,
    pub(crate) patch: ConfigPatch,
}

impl Default for BubbleTemplate {
    fn default() -> Self {
        Self::new()
    }
}

impl BubbleTemplate {
    pub fn new() -> Self {
        BubbleTemplate {
            role: "assistant".to_string(),
            kind: "text".to_string(),
            id: None,
            content: String::new(),
            patch: ConfigPatch::new(),
        }
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// The bubble type (`text` unless overridden); free-form.
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Pin the bubble id instead of minting one at send time.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.patch = self.patch.name(name);
        self
    }

    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.patch = self.patch.icon(icon);
        self
    }

    pub fn collapsible(mut self, collapsible: bool) -> Self {
        self.patch = self.patch.collapsible(collapsible);
        self
    }

    pub fn collapsible_by_default(mut self, collapsed: bool) -> Self {
        self.patch = self.patch.collapsible_by_default(collapsed);
        self
    }

    pub fn collapsible_title(mut self, title: impl Into<String>) -> Self {
        self.patch = self.patch.collapsible_title(title);
        self
    }

    pub fn collapsible_max_height(mut self, max_height: impl Into<Value>) -> Self {
        self.patch = self.patch.collapsible_max_height(max_height);
        self
    }

    /// Bubble body palette; `"auto"` leaves the color unset.
    pub fn bubble_bg(mut self, color: impl Into<String>) -> Self {
        self.patch = self.patch.bubble_bg(color);
        self
    }

    pub fn bubble_text(mut self, color: impl Into<String>) -> Self {
        self.patch = self.patch.bubble_text(color);
        self
    }

    pub fn bubble_border(mut self, color: impl Into<String>) -> Self {
        self.patch = self.patch.bubble_border(color);
        self
    }

    /// Header palette; `"auto"` leaves the color unset.
    pub fn header_bg(mut self, color: impl Into<String>) -> Self {
        self.patch = self.patch.header_bg(color);
        self
    }

    pub fn header_text(mut self, color: impl Into<String>) -> Self {
        self.patch = self.patch.header_text(color);
        self
    }

    pub fn header_border(mut self, color: impl Into<String>) -> Self {
        self.patch = self.patch.header_border(color);
        self
    }

    pub fn header_icon_bg(mut self, color: impl Into<String>) -> Self {
        self.patch = self.patch.header_icon_bg(color);
        self
    }

    pub fn header_icon_text(mut self, color: impl Into<String>) -> Self {
        self.patch = self.patch.header_icon_text(color);
        self
    }

    /// Arbitrary forwarded config fields; reserved keys are rejected at
    /// send time.
    pub fn extra(mut self, extra: Map<String, Value>) -> Self {
        self.patch = self.patch.extra(extra);
        self
    }

    /// Bind this template into the active request's session.
    ///
    /// Emits the initial `config` frame (and a `set` frame when the template
    /// carries content) on the attached sink. Without a sink the bubble is
    /// still recorded but marked done immediately, which is what the history
    /// path relies on.
    pub async fn send(&self) -> Result<Bubble, Error> {
        let ctx = context::current()?;
        let patch = self.patch.clone().into_patch()?;
        let id: Arc<str> = match &self.id {
            Some(id) => id.as_str().into(),
            None => util::bubble_id().into(),
        };
        let mut session = ctx.session.lock().await;
        session
            .bind_bubble(
                id.clone(),
                self.role.clone(),
                self.kind.clone(),
                self.content.clone(),
                patch,
            )
            .await;
        Ok(Bubble { id })
    }

    /// Normalize the template to a plain record, as the history endpoint
    /// does for handler-returned templates.
    pub fn try_into_record(&self) -> Result<BubbleRecord, Error> {
        let mut config = Map::new();
        let patch = self.patch.clone().into_patch()?;
        crate::model::config::apply_patch(&mut config, &patch);
        Ok(BubbleRecord {
            id: self.id.clone().unwrap_or_else(util::bubble_id),
            role: self.role.clone(),
            kind: self.kind.clone(),
            content: self.content.clone(),
            config,
            created_at: util::iso_now(),
            done: true,
        })
    }
}

/// Handle to a bubble bound in the active request's session.
///
/// Mutations are silent no-ops once the bubble is done or after the session
/// was cleared underneath the handle; only [`access_bubble`] lookups report
/// missing bubbles.
///
/// [`access_bubble`]: crate::runtime::context::access_bubble
#[derive(Debug, Clone)]
pub struct Bubble {
    pub(crate) id: Arc<str>,
}

impl Bubble {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Replace the bubble content; emits a `set` frame.
    pub async fn set(&self, text: impl Into<String>) -> Result<(), Error> {
        let ctx = context::current()?;
        let mut session = ctx.session.lock().await;
        session.set_content(&self.id, text.into()).await;
        Ok(())
    }

    /// Append to the bubble content; emits a `delta` frame with the chunk.
    pub async fn stream(&self, chunk: impl Into<String>) -> Result<(), Error> {
        let ctx = context::current()?;
        let mut session = ctx.session.lock().await;
        session.append_content(&self.id, chunk.into()).await;
        Ok(())
    }

    /// Merge a config patch; emits a `config` frame carrying only the keys
    /// whose effective value changed. `role`/`type` updates travel in the
    /// same patch.
    pub async fn config(&self, patch: ConfigPatch) -> Result<(), Error> {
        let ctx = context::current()?;
        let patch = patch.into_patch()?;
        let mut session = ctx.session.lock().await;
        session.update_config(&self.id, patch).await;
        Ok(())
    }

    /// Finalize the bubble; emits the per-bubble `done` frame once.
    /// Repeat calls are no-ops.
    pub async fn done(&self) -> Result<(), Error> {
        let ctx = context::current()?;
        let mut session = ctx.session.lock().await;
        session.finish_bubble(&self.id).await;
        Ok(())
    }
}
