use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// A line of the event stream is not valid UTF-8.
    #[error("invalid UTF-8 in event stream line {line}")]
    InvalidUtf8 { line: u64 },

    /// An event's `data` is not a recognized stream message.
    #[error("invalid stream message: {0}")]
    InvalidMessage(String),

    /// The underlying byte stream failed.
    #[error("stream transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type StreamResult<T> = Result<T, StreamError>;
