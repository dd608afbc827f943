//! # Real-Time Errors
//!
//! Error types for the real-time subscription manager.
//!
//! Only synchronous open failures ever reach a caller. Everything else
//! (handler failures, stray teardowns, malformed payloads) is logged and
//! swallowed so that a broken channel degrades liveness, never the host.

use std::fmt;

use thiserror::Error;

/// Result type for real-time operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Broad error category, carried on every failure log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Channel failed to open
    Connection,
    /// A handler failed during delivery
    Dispatch,
    /// Closing an unknown or already-closed channel
    Teardown,
    /// Payload or filter did not match the wire contract
    Protocol,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Connection => "connection",
            ErrorCategory::Dispatch => "dispatch",
            ErrorCategory::Teardown => "teardown",
            ErrorCategory::Protocol => "protocol",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Real-time errors
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    // ==================
    // Connection Errors
    // ==================
    /// Transport refused or failed to open a channel
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Transport is shut down
    #[error("Connection closed")]
    ConnectionClosed,

    /// Handshake did not complete in time
    #[error("Connection timeout")]
    ConnectionTimeout,

    // ==================
    // Protocol Errors
    // ==================
    /// Inbound payload does not match the wire contract
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Wire filter could not be parsed
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Channel key component is empty or contains a separator
    #[error("Invalid channel key: {0}")]
    InvalidChannelKey(String),

    // ==================
    // Dispatch Errors
    // ==================
    /// A handler returned an error or panicked
    #[error("Handler failed on {channel}: {message}")]
    HandlerFailed { channel: String, message: String },

    // ==================
    // Teardown Errors
    // ==================
    /// Release or close of a channel that is not open
    #[error("Teardown of unknown channel: {0}")]
    TeardownError(String),
}

impl RealtimeError {
    /// Returns the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            RealtimeError::ConnectionError(_)
            | RealtimeError::ConnectionClosed
            | RealtimeError::ConnectionTimeout => ErrorCategory::Connection,
            RealtimeError::InvalidMessage(_)
            | RealtimeError::InvalidFilter(_)
            | RealtimeError::InvalidChannelKey(_) => ErrorCategory::Protocol,
            RealtimeError::HandlerFailed { .. } => ErrorCategory::Dispatch,
            RealtimeError::TeardownError(_) => ErrorCategory::Teardown,
        }
    }

    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            RealtimeError::ConnectionError(_) => "COACH_RT_CONNECTION_FAILED",
            RealtimeError::ConnectionClosed => "COACH_RT_CONNECTION_CLOSED",
            RealtimeError::ConnectionTimeout => "COACH_RT_CONNECTION_TIMEOUT",
            RealtimeError::InvalidMessage(_) => "COACH_RT_INVALID_MESSAGE",
            RealtimeError::InvalidFilter(_) => "COACH_RT_INVALID_FILTER",
            RealtimeError::InvalidChannelKey(_) => "COACH_RT_INVALID_CHANNEL_KEY",
            RealtimeError::HandlerFailed { .. } => "COACH_RT_HANDLER_FAILED",
            RealtimeError::TeardownError(_) => "COACH_RT_TEARDOWN_IGNORED",
        }
    }
}
