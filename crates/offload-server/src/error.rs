//! Typed failures for the deck client and the offload pipeline.
//!
//! Parse anomalies are deliberately absent: an unexpected protocol line is
//! logged and skipped, never surfaced as an error value.

use std::fmt;
use std::path::PathBuf;

/// Failures on the control connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeckError {
    /// The device is unreachable or the socket went away.
    Connection(String),
    /// A framed block did not complete within its deadline.
    ProtocolTimeout,
    /// A command was issued while another one is outstanding.
    CommandInProgress,
    /// The deck answered with a failure-class status.
    Device { code: u16, text: String },
    /// The client is not connected.
    Disconnected,
}

impl fmt::Display for DeckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeckError::Connection(msg) => write!(f, "deck connection failed: {msg}"),
            DeckError::ProtocolTimeout => write!(f, "timed out waiting for the deck's clip listing"),
            DeckError::CommandInProgress => write!(f, "a deck command is already outstanding"),
            DeckError::Device { code, text } => write!(f, "deck refused command: {code} {text}"),
            DeckError::Disconnected => write!(f, "not connected to the deck"),
        }
    }
}

impl std::error::Error for DeckError {}

/// Failures in the monitoring and transfer pipeline.
#[derive(Debug)]
pub enum OffloadError {
    /// A start precondition does not hold.
    Precondition(String),
    /// One clip's listing, retrieval, or copy failed.
    Transfer(String),
    /// Rename source no longer exists.
    NotFound(PathBuf),
}

impl fmt::Display for OffloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffloadError::Precondition(msg) => write!(f, "{msg}"),
            OffloadError::Transfer(msg) => write!(f, "transfer failed: {msg}"),
            OffloadError::NotFound(path) => write!(f, "no such file: {}", path.display()),
        }
    }
}

impl std::error::Error for OffloadError {}
