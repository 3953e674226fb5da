//! Error types for the palava client
//!
//! Connection establishment failures are collected per candidate as
//! [`ConnectError`] and only surfaced as [`Error::Configuration`] once every
//! backend has been tried. Protocol and I/O failures after establishment are
//! fatal to the connection; application failures reported by the backend are
//! ordinary payloads (see [`crate::Payload::Error`]).
//!
//! # Example
//!
//! ```
//! use palava_client::{BackendAddress, Error};
//!
//! let err = "missing-port".parse::<BackendAddress>().unwrap_err();
//! assert!(matches!(err, Error::InvalidAddress { .. }));
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Error types that can occur when using the palava client
#[derive(Debug, Error)]
pub enum Error {
    /// No configured backend could be connected
    #[error("No backend available: {}", .errors.join("; "))]
    Configuration {
        /// One entry per failed connection attempt, in attempt order
        errors: Vec<String>,
    },

    /// A backend address could not be parsed
    #[error("Invalid backend address '{address}': {reason}")]
    InvalidAddress {
        /// The offending address string
        address: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Unknown connect strategy name
    #[error("Invalid connect strategy: {0}")]
    InvalidStrategy(String),

    /// The response header did not follow the wire grammar
    #[error("Protocol error: expected {expected}, got {found:?}")]
    Protocol {
        /// What the header state machine expected
        expected: &'static str,
        /// The byte actually received, as a char
        found: char,
    },

    /// The socket failed, timed out or reached end-of-stream mid-exchange
    #[error("Connection to backend lost ({context}): {source}")]
    ConnectionLost {
        /// Which phase of the exchange failed
        context: &'static str,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Writing a passthrough response to the downstream sink failed
    #[error("Downstream sink failed: {0}")]
    Sink(#[source] std::io::Error),

    /// The client has no live connection
    #[error("No connection established")]
    NotEstablished,

    /// A file passed for upload cannot be used
    #[error("Cannot read upload file {path}: {source}")]
    FileUnreadable {
        /// Path of the file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A buffered body is not valid for its mimetype
    #[error("Invalid {mimetype} payload: {reason}")]
    Decode {
        /// The response mimetype
        mimetype: &'static str,
        /// Reason the body was rejected
        reason: String,
    },

    /// The backend job failed and reported it with the error mimetype
    #[error("Backend job failed: {0}")]
    Application(String),

    /// JSON serialization error while encoding a request
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error leaves the connection unusable
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. }
                | Self::ConnectionLost { .. }
                | Self::Sink(_)
                | Self::NotEstablished
        )
    }

    pub(crate) fn lost(context: &'static str, source: std::io::Error) -> Self {
        Self::ConnectionLost { context, source }
    }
}

/// Failure of a single connection attempt during backend selection
///
/// These never abort selection; their `Display` text is appended to the
/// connection's error log.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The connect call failed
    #[error("{address}: {source}")]
    Io {
        /// `host:port` of the candidate
        address: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The connect call did not finish in time
    #[error("{address}: timed out after {}ms", .timeout.as_millis())]
    Timeout {
        /// `host:port` of the candidate
        address: String,
        /// The enforced connect timeout
        timeout: Duration,
    },
}

/// Result type alias using the palava Error type
pub type Result<T> = std::result::Result<T, Error>;
