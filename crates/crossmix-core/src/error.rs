use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleKind {
    Tempo,
    Downbeat,
    Stretch,
}

impl fmt::Display for OracleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tempo => "tempo",
            Self::Downbeat => "downbeat",
            Self::Stretch => "stretch",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Oracle,
    Precondition,
    Cancelled,
    Io,
}

#[derive(Debug, Error)]
pub enum MixError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("beat index {requested} out of range for {available} downbeats")]
    BeatOutOfRange { requested: usize, available: usize },
    /// Crop end past the computed timeline, e.g. downbeats taken from a shorter buffer.
    #[error("crop needs downbeat {requested} but the timeline has {available}")]
    CropOutOfRange { requested: usize, available: usize },
    #[error("{oracle} oracle failed: {reason}")]
    Oracle { oracle: OracleKind, reason: String },
    #[error("{oracle} oracle timed out after {timeout_ms}ms")]
    OracleTimeout { oracle: OracleKind, timeout_ms: u64 },
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("cancelled after {completed} tracks")]
    Cancelled { completed: usize },
    #[error("io error: {0}")]
    Io(String),
}

impl MixError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::BeatOutOfRange { .. } => ErrorKind::Validation,
            Self::Oracle { .. } | Self::OracleTimeout { .. } => ErrorKind::Oracle,
            Self::Precondition(_) | Self::CropOutOfRange { .. } => ErrorKind::Precondition,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

impl From<anyhow::Error> for MixError {
    fn from(value: anyhow::Error) -> Self {
        Self::Io(format!("{value:#}"))
    }
}
