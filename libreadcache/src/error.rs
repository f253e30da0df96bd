use std::fmt;

use thiserror::Error;

/// Status reported by the chunk layer together with an unrecoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    /// The chunk (or the file owning it) no longer exists.
    NoSuchObject,
    PermissionDenied,
    Io,
    Other(u8),
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkStatus::NoSuchObject => write!(f, "no such file or directory"),
            ChunkStatus::PermissionDenied => write!(f, "operation not permitted"),
            ChunkStatus::Io => write!(f, "input/output error"),
            ChunkStatus::Other(code) => write!(f, "status {code}"),
        }
    }
}

/// Failure categories produced by a [`ChunkReader`](crate::chunk::ChunkReader).
///
/// Each variant selects a different retry policy in the read loop.
#[derive(Debug, Clone, Error)]
pub enum ChunkReadError {
    /// None of the known copies (or parts) of the chunk is readable right now.
    #[error("no valid copies: {0}")]
    NoValidCopies(String),
    /// A single attempt failed; the situation is expected to heal by itself.
    #[error("{0}")]
    Recoverable(String),
    /// The chunk is gone or inaccessible for good.
    #[error("{reason} ({status})")]
    Unrecoverable { status: ChunkStatus, reason: String },
}

impl ChunkReadError {
    pub fn no_valid_copies(reason: impl Into<String>) -> Self {
        ChunkReadError::NoValidCopies(reason.into())
    }

    pub fn recoverable(reason: impl Into<String>) -> Self {
        ChunkReadError::Recoverable(reason.into())
    }

    pub fn unrecoverable(status: ChunkStatus, reason: impl Into<String>) -> Self {
        ChunkReadError::Unrecoverable {
            status,
            reason: reason.into(),
        }
    }
}

/// Error surfaced to the filesystem request layer by a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("input/output error")]
    Io,
    #[error("stale file handle")]
    StaleHandle,
}

impl ReadError {
    /// errno value handed back to the kernel.
    pub fn errno(&self) -> i32 {
        match self {
            ReadError::Io => libc::EIO,
            ReadError::StaleHandle => libc::EBADF,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
