//! Error types for the bridge core
//!
//! Transport and callback failures surface as error returns, never panics.
//! Callback errors raised during one dispatch event are aggregated into a
//! single combined error so one failing handler cannot suppress the others.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Bridge core errors
#[derive(Debug, Error)]
pub enum Error {
    /// A protocol read or write failed (port closed, socket error)
    #[error("transport: {0}")]
    Transport(String),

    /// No MIDI port matched the requested name pattern
    #[error("port not found: '{0}'")]
    PortNotFound(String),

    /// The operation requires a connection that is not established
    #[error("not connected")]
    NotConnected,

    /// The connection is in the wrong state for the requested operation
    #[error("invalid connection state: {0}")]
    InvalidState(&'static str),

    /// Incoming wire bytes could not be decoded
    #[error("malformed message: {0}")]
    Malformed(String),

    /// An OSC argument has no defined conversion to the bound kind
    #[error("unsupported message type: {0}")]
    UnsupportedMessage(String),

    /// An OSC address pattern was rejected at registration
    #[error("invalid address pattern: '{0}'")]
    InvalidPattern(String),

    /// A cached value could not be recovered as the bound kind
    #[error("value kind mismatch: expected {expected}, got {actual}")]
    ValueKind {
        expected: &'static str,
        actual: &'static str,
    },

    /// Several callbacks failed during one dispatch event or mode transition
    #[error("{} callback errors: [{}]", .0.len(), join_errors(.0))]
    Multiple(Vec<Error>),
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Collapse the errors collected over one dispatch event into a single
    /// result: `Ok` when empty, the error itself when there is exactly one,
    /// [`Error::Multiple`] otherwise.
    pub fn aggregate(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }
}
