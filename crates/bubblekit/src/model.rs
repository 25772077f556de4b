//! Data types shared between the runtime and the wire: NDJSON frames,
//! bubble records, and the config merge rules.

pub mod bubble;
pub mod config;
pub mod frame;

pub use self::bubble::{Bubble, BubbleRecord, BubbleTemplate, bubble};
pub use self::config::ConfigPatch;
pub use self::frame::{Frame, FrameBody, InterruptReason};
