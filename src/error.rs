//! Error types for the ESL engine
//!
//! Transport, framing and lifecycle failures are errors. A server answering
//! `-ERR` inside a well-formed reply is not: that reply is returned as data and
//! only becomes an error if the caller opts in with
//! [`EslMessage::into_result`](crate::EslMessage::into_result).

use thiserror::Error;

use crate::connection::DisconnectReason;

/// All errors surfaced by the ESL engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EslError {
    /// Transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The byte stream could not be framed. Fatal to the connection.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// The peer broke the protocol contract (unexpected handshake message,
    /// job id mismatch, ...).
    #[error("protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// The server rejected the credential during the inbound handshake.
    #[error("authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// The connection closed while the operation was outstanding.
    #[error("connection lost: {reason}")]
    ConnectionLost { reason: DisconnectReason },

    /// The connection is not in the `Ready` state.
    #[error("not connected")]
    NotConnected,

    /// A caller-supplied or handshake timeout elapsed.
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// A command argument was rejected before serialization.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A background job id is already awaiting completion on this connection.
    #[error("job id already pending: {job_uuid}")]
    DuplicateJobId { job_uuid: String },

    /// The server did not accept a background command, so no completion
    /// event will ever arrive for it.
    #[error("background job not accepted: {reply_text}")]
    JobRejected { reply_text: String },

    /// Reply-Text started with `-ERR` (only from `EslMessage::into_result`).
    #[error("command failed: {reply_text}")]
    CommandFailed { reply_text: String },

    /// Reply-Text matched neither `+OK` nor `-ERR` (only from `EslMessage::into_result`).
    #[error("unexpected reply: {reply_text}")]
    UnexpectedReply { reply_text: String },

    /// Event stream consumer fell behind and events were dropped.
    #[error("event queue full, events were dropped")]
    QueueFull,

    /// XML event body could not be parsed.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// JSON event body could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EslError {
    pub(crate) fn decode(message: impl Into<String>) -> Self {
        EslError::Decode {
            message: message.into(),
        }
    }

    pub(crate) fn protocol_violation(message: impl Into<String>) -> Self {
        EslError::ProtocolViolation {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        EslError::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn auth_failed(reason: impl Into<String>) -> Self {
        EslError::AuthenticationFailed {
            reason: reason.into(),
        }
    }

    /// `true` for errors that mean the connection is gone.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            EslError::Io(_)
                | EslError::Decode { .. }
                | EslError::ConnectionLost { .. }
                | EslError::NotConnected
        )
    }
}

/// Result alias used throughout the crate.
pub type EslResult<T> = Result<T, EslError>;
