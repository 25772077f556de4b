use std::borrow::Cow;

/// Errors a handler can get back from the runtime API, plus the conditions
/// the HTTP adapter reports before a stream starts.
///
/// Everything a handler leaves unhandled is converted by the stream
/// controller into a single terminal `error` frame; raw errors never reach
/// the wire.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A config patch or conversation entry failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// A runtime API call was made outside the dynamic extent of a request.
    #[error("no active streaming context")]
    NoActiveContext,

    /// `access_bubble` was called with an id the session does not hold.
    #[error("bubble not found: {0}")]
    BubbleNotFound(String),

    /// A second stream tried to attach to a conversation that already has
    /// one open. Reported as HTTP 409 before any frame is written.
    #[error("a stream is already attached to conversation {0}")]
    StreamAlreadyAttached(String),

    /// A user-supplied handler returned an error on a non-streaming path
    /// (the history endpoint).
    #[error("handler failed: {0}")]
    Handler(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_config(message: impl Into<Cow<'static, str>>) -> Self {
        Error::InvalidConfig(message.into())
    }
}

/// The error type user handlers return; anything `std::error::Error` boxes
/// into it, including [`Error`] itself.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = Error::invalid_config("forbidden key: id");
        assert_eq!(format!("{err}"), "invalid config: forbidden key: id");

        let err = Error::StreamAlreadyAttached("c-1".into());
        assert!(format!("{err}").contains("c-1"));
    }

    #[test]
    fn boxes_into_handler_error() {
        fn fallible() -> Result<(), HandlerError> {
            Err(Error::NoActiveContext)?
        }
        let err = fallible().unwrap_err();
        assert!(err.to_string().contains("no active streaming context"));
    }
}
