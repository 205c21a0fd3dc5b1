use std::path::PathBuf;

use thiserror::Error;

use crate::state::RunStatus;

pub const EXIT_OK: u8 = 0;
pub const EXIT_CONFIG_ERROR: u8 = 10;
pub const EXIT_TARGET_NOT_FOUND: u8 = 20;
pub const EXIT_INTERRUPTED: u8 = 30;
pub const EXIT_WRITE_ERROR: u8 = 40;
pub const EXIT_UNEXPECTED: u8 = 50;

/// Why a checkpoint file could not be turned back into a `CollectionState`.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint not found: {}", path.display())]
    Missing { path: PathBuf },
    #[error("failed to read checkpoint {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint {} is not valid JSON: {source}", path.display())]
    Unparsable {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("checkpoint {} is invalid: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },
    #[error(
        "checkpoint {} has unsupported version {found} (expected {expected})",
        path.display()
    )]
    UnsupportedVersion {
        path: PathBuf,
        found: u64,
        expected: u32,
    },
}

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("target not found: {0}")]
    TargetNotFound(String),
    #[error("{operation} failed after {attempts} attempts: {message}")]
    RetryExhausted {
        operation: &'static str,
        attempts: u32,
        message: String,
    },
    #[error("collection cancelled before completion")]
    Cancelled,
    #[error("failed to write {}: {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    CheckpointLoad(#[from] CheckpointError),
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl HarvestError {
    pub fn write_failure(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteFailure {
            path: path.into(),
            source,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Configuration(_) | Self::CheckpointLoad(_) => EXIT_CONFIG_ERROR,
            Self::TargetNotFound(_) => EXIT_TARGET_NOT_FOUND,
            Self::RetryExhausted { .. } | Self::Cancelled => EXIT_INTERRUPTED,
            Self::WriteFailure { .. } => EXIT_WRITE_ERROR,
            Self::Unexpected(_) => EXIT_UNEXPECTED,
        }
    }

    /// Stable identifier stored in `last_error.code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "E_CONFIG",
            Self::TargetNotFound(_) => "E_CONTAINER_NOT_FOUND",
            Self::RetryExhausted { .. } => "E_RETRY_EXCEEDED",
            Self::Cancelled => "E_CANCELLED",
            Self::WriteFailure { .. } => "E_WRITE_FAILED",
            Self::CheckpointLoad(_) => "E_CHECKPOINT_LOAD",
            Self::Unexpected(_) => "E_UNEXPECTED",
        }
    }

    /// Status a run must end in when it stops because of this error.
    /// Interrupted runs are resumable; failed runs are not.
    pub fn terminal_status(&self) -> RunStatus {
        match self {
            Self::RetryExhausted { .. } | Self::Cancelled => RunStatus::Interrupted,
            _ => RunStatus::Failed,
        }
    }

    pub fn retry_count(&self) -> u32 {
        match self {
            Self::RetryExhausted { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}
