//! Error types for the logging pipeline

use std::io;
use thiserror::Error;

/// Errors raised while setting up or draining the shared segment
#[derive(Error, Debug)]
pub enum LogError {
    /// IO error while creating or mapping the segment
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: io::Error,
    },

    /// System call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },

    /// Configuration could not be parsed
    #[error("Invalid configuration: {source}")]
    Config {
        /// Source TOML error
        #[from]
        source: toml::de::Error,
    },

    /// A segment to attach to does not exist
    #[error("Segment not found: {name}")]
    SegmentMissing {
        /// Segment name
        name: String,
    },

    /// A configuration value is out of range
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Which value was rejected
        reason: &'static str,
    },

    /// Another consumer already drains this ring
    #[error("Ring buffer already has a consumer")]
    ConsumerBusy,

    /// The lifecycle has no active ring buffer
    #[error("Ring buffer is not initialized")]
    NotActive,

    /// A slot payload could not be decoded
    #[error("Malformed record: {reason}")]
    Decode {
        /// What was wrong with the payload
        reason: &'static str,
    },
}

/// Result type for setup and consumer operations
pub type LogResult<T> = Result<T, LogError>;

/// Reasons a shared segment could not be mapped as a ring buffer
#[derive(Error, Debug)]
pub enum SegmentError {
    /// The requested layout does not fit the memory available for it
    #[error("segment needs {required} bytes but only {available} are available")]
    TooSmall {
        /// Bytes the layout needs
        required: u64,
        /// Bytes that could be provided
        available: u64,
    },

    /// The region does not carry a recognizable ring header
    #[error("segment is not formatted as a ring buffer")]
    Unformatted,

    /// Any other setup failure
    #[error(transparent)]
    Log(#[from] LogError),
}

impl From<std::io::Error> for SegmentError {
    fn from(source: std::io::Error) -> Self {
        SegmentError::Log(LogError::from(source))
    }
}

impl From<nix::Error> for SegmentError {
    fn from(source: nix::Error) -> Self {
        SegmentError::Log(LogError::from(source))
    }
}

/// Reasons a producer-side push was rejected
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// Every slot is claimed; the record was dropped
    #[error("ring buffer full")]
    Full,
    /// The ring buffer has been shut down
    #[error("ring buffer closed")]
    Closed,
    /// No ring buffer is attached to this logger
    #[error("ring buffer unavailable")]
    Unavailable,
}

/// Failure reported by a sink for a single record
#[derive(Error, Debug)]
pub enum SinkError {
    /// IO error inside the sink
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: io::Error,
    },
    /// The sink refused the record
    #[error("record rejected: {0}")]
    Rejected(String),
}
