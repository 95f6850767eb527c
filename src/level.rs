//! Severity levels

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity of a record, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Level {
    /// Fine-grained tracing
    Trace = 0,
    /// Debugging output
    Debug = 1,
    /// Detailed operational information
    Detail = 2,
    /// Normal operational information
    Info = 3,
    /// Significant but expected events
    Notice = 4,
    /// Something unexpected that was recovered from
    Warning = 5,
    /// An operation failed
    Error = 6,
    /// The process can no longer function correctly
    Critical = 7,
}

impl Level {
    /// All levels in ascending order
    pub const ALL: [Level; 8] = [
        Level::Trace,
        Level::Debug,
        Level::Detail,
        Level::Info,
        Level::Notice,
        Level::Warning,
        Level::Error,
        Level::Critical,
    ];

    /// Convert from the numeric representation stored in shared memory
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Numeric representation
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Upper-case label
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Detail => "DETAIL",
            Level::Info => "INFO",
            Level::Notice => "NOTICE",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Error returned when parsing an unknown level name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .iter()
            .copied()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .or_else(|| match s.to_ascii_lowercase().as_str() {
                "warn" => Some(Level::Warning),
                "crit" => Some(Level::Critical),
                _ => None,
            })
            .ok_or_else(|| ParseLevelError(s.to_string()))
    }
}
