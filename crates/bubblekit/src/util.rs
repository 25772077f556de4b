//! Identifier minting and clock helpers shared across the runtime.

use chrono::{SecondsFormat, Utc};

pub(crate) fn conversation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn stream_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn bubble_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// This is the unit conversation summaries carry in `updatedAt`.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current wall-clock time as an ISO-8601 string with millisecond precision.
pub(crate) fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(conversation_id(), conversation_id());
        assert_ne!(stream_id(), bubble_id());
    }

    #[test]
    fn iso_now_is_rfc3339() {
        let stamp = iso_now();
        assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok());
        assert!(stamp.ends_with('Z'));
    }
}
