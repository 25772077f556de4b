//! The NDJSON frame schema.
//!
//! Every line a stream writes is one [`Frame`]: a `streamId` + `seq` stamp
//! around a typed [`FrameBody`]. Frames fall in three groups:
//!
//! * lifecycle frames the controller emits (`started`, `meta`, `progress`,
//!   `heartbeat`),
//! * bubble frames produced by handler activity (`config`, `set`, `delta`,
//!   per-bubble `done`),
//! * exactly one terminal frame per stream (`done` with a reason,
//!   `interrupted`, or `error`).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One NDJSON line: the body plus the per-stream stamp.
///
/// `seq` is strictly increasing and gap-free within one stream; ordering
/// across streams is undefined.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub stream_id: Arc<str>,
    pub seq: u64,
    #[serde(flatten)]
    pub body: FrameBody,
}

/// The typed payload of a frame, tagged on the wire as `type`.
///
/// The `done` tag is shared by two shapes: with `bubbleId` it finalizes one
/// bubble, with `reason` it is the stream terminal. The two are never
/// combined.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum FrameBody {
    /// First frame of every stream.
    Started {
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
    },
    /// Emitted only when the server minted a new conversation id.
    Meta { conversation_id: String },
    /// Coarse progress marker around handler invocation.
    Progress { stage: String },
    /// Keep-alive while the stream is running; carries no handler activity.
    Heartbeat,
    /// Bubble config update. `patch` holds only the keys whose effective
    /// value changed, plus `role`/`type` when those change.
    Config {
        bubble_id: String,
        patch: Map<String, Value>,
    },
    /// Replaces the bubble content.
    Set { bubble_id: String, content: String },
    /// Appends to the bubble content.
    Delta { bubble_id: String, content: String },
    /// Per-bubble finalization (`bubbleId`) or stream terminal (`reason`).
    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        bubble_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Stream terminal: the stream was cancelled or timed out.
    Interrupted { reason: InterruptReason },
    /// Stream terminal: a handler failed.
    Error { reason: String, message: String },
}

impl FrameBody {
    pub fn started(conversation_id: impl Into<String>) -> Self {
        FrameBody::Started {
            conversation_id: Some(conversation_id.into()),
        }
    }

    pub fn meta(conversation_id: impl Into<String>) -> Self {
        FrameBody::Meta {
            conversation_id: conversation_id.into(),
        }
    }

    pub fn progress(stage: impl Into<String>) -> Self {
        FrameBody::Progress {
            stage: stage.into(),
        }
    }

    pub fn config(bubble_id: impl Into<String>, patch: Map<String, Value>) -> Self {
        FrameBody::Config {
            bubble_id: bubble_id.into(),
            patch,
        }
    }

    pub fn set(bubble_id: impl Into<String>, content: impl Into<String>) -> Self {
        FrameBody::Set {
            bubble_id: bubble_id.into(),
            content: content.into(),
        }
    }

    pub fn delta(bubble_id: impl Into<String>, content: impl Into<String>) -> Self {
        FrameBody::Delta {
            bubble_id: bubble_id.into(),
            content: content.into(),
        }
    }

    pub fn bubble_done(bubble_id: impl Into<String>) -> Self {
        FrameBody::Done {
            bubble_id: Some(bubble_id.into()),
            reason: None,
        }
    }

    pub fn stream_done() -> Self {
        FrameBody::Done {
            bubble_id: None,
            reason: Some("normal".to_string()),
        }
    }

    pub fn interrupted(reason: InterruptReason) -> Self {
        FrameBody::Interrupted { reason }
    }

    pub fn handler_error(message: impl Into<String>) -> Self {
        FrameBody::Error {
            reason: "handler_error".to_string(),
            message: message.into(),
        }
    }

    /// Whether this frame reflects handler activity for timeout accounting.
    ///
    /// Only bubble frames count: the controller emits `meta` and `progress`
    /// on its own before a handler ever runs, so they cannot witness handler
    /// liveness, and `heartbeat` never resets anything by contract.
    pub(crate) fn is_handler_activity(&self) -> bool {
        match self {
            FrameBody::Config { .. } | FrameBody::Set { .. } | FrameBody::Delta { .. } => true,
            FrameBody::Done { bubble_id, .. } => bubble_id.is_some(),
            FrameBody::Started { .. }
            | FrameBody::Meta { .. }
            | FrameBody::Progress { .. }
            | FrameBody::Heartbeat
            | FrameBody::Interrupted { .. }
            | FrameBody::Error { .. } => false,
        }
    }

    /// Whether this is one of the three terminal shapes.
    pub fn is_terminal(&self) -> bool {
        match self {
            FrameBody::Done { reason, .. } => reason.is_some(),
            FrameBody::Interrupted { .. } | FrameBody::Error { .. } => true,
            _ => false,
        }
    }
}

/// Why a stream ended without the handler returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptReason {
    /// `POST /api/streams/{id}/cancel` hit a live stream.
    ClientCancel,
    /// The response body writer failed; the client went away.
    Disconnect,
    /// No handler activity for the idle window.
    IdleTimeout,
    /// No handler frame at all within the first-event window.
    FirstEventTimeout,
}

impl std::fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InterruptReason::ClientCancel => "client_cancel",
            InterruptReason::Disconnect => "disconnect",
            InterruptReason::IdleTimeout => "idle_timeout",
            InterruptReason::FirstEventTimeout => "first_event_timeout",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn frame(seq: u64, body: FrameBody) -> Frame {
        Frame {
            stream_id: "s-1".into(),
            seq,
            body,
        }
    }

    #[test]
    fn started_frame_wire_shape() {
        let value = serde_json::to_value(frame(0, FrameBody::started("c-9"))).unwrap();
        assert_eq!(
            value,
            json!({"type": "started", "streamId": "s-1", "seq": 0, "conversationId": "c-9"})
        );
    }

    #[test]
    fn heartbeat_frame_has_no_extra_fields() {
        let value = serde_json::to_value(frame(3, FrameBody::Heartbeat)).unwrap();
        assert_eq!(value, json!({"type": "heartbeat", "streamId": "s-1", "seq": 3}));
    }

    #[test]
    fn done_tag_is_shared_between_bubble_and_terminal() {
        let bubble = serde_json::to_value(frame(1, FrameBody::bubble_done("b-1"))).unwrap();
        assert_eq!(
            bubble,
            json!({"type": "done", "streamId": "s-1", "seq": 1, "bubbleId": "b-1"})
        );

        let terminal = serde_json::to_value(frame(2, FrameBody::stream_done())).unwrap();
        assert_eq!(
            terminal,
            json!({"type": "done", "streamId": "s-1", "seq": 2, "reason": "normal"})
        );
    }

    #[test]
    fn interrupt_reasons_serialize_snake_case() {
        let value =
            serde_json::to_value(frame(5, FrameBody::interrupted(InterruptReason::IdleTimeout)))
                .unwrap();
        assert_eq!(value["reason"], json!("idle_timeout"));
        assert_eq!(
            InterruptReason::FirstEventTimeout.to_string(),
            "first_event_timeout"
        );
    }

    #[test]
    fn frames_round_trip() {
        let original = frame(
            7,
            FrameBody::config("b-2", {
                let mut patch = Map::new();
                patch.insert("role".into(), json!("assistant"));
                patch
            }),
        );
        let line = serde_json::to_string(&original).unwrap();
        let parsed: Frame = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn activity_classification() {
        assert!(FrameBody::set("b", "hi").is_handler_activity());
        assert!(FrameBody::delta("b", "h").is_handler_activity());
        assert!(FrameBody::bubble_done("b").is_handler_activity());
        assert!(!FrameBody::progress("processing").is_handler_activity());
        assert!(!FrameBody::meta("c").is_handler_activity());
        assert!(!FrameBody::Heartbeat.is_handler_activity());
        assert!(!FrameBody::started("c").is_handler_activity());
        assert!(!FrameBody::stream_done().is_handler_activity());
    }

    #[test]
    fn terminal_classification() {
        assert!(FrameBody::stream_done().is_terminal());
        assert!(FrameBody::interrupted(InterruptReason::ClientCancel).is_terminal());
        assert!(FrameBody::handler_error("boom").is_terminal());
        assert!(!FrameBody::bubble_done("b").is_terminal());
    }
}
