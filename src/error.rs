//! Session error kinds and their process exit codes.
//!
//! Transport and timeout failures abort the whole session; per-file apply
//! failures are logged where they happen and never reach this type.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("usage: {0}")]
    Usage(String),

    #[error("option conflict: {0}")]
    OptionConflict(String),

    #[error("{0}")]
    Path(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("short read could not be recovered ({got} of {want} bytes)")]
    ShortRead { got: usize, want: usize },

    #[error("I/O timeout after {0} seconds")]
    Timeout(u64),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("codec: {0}")]
    Codec(String),
}

impl SyncError {
    /// Exit code for the error class.
    ///
    /// 0 success, 1 usage, 2 option conflict, 3 bad paths,
    /// 23 unrecovered short read, 30 I/O timeout.
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::Usage(_) => 1,
            SyncError::OptionConflict(_) => 2,
            SyncError::Path(_) => 3,
            SyncError::ShortRead { .. } => 23,
            SyncError::Timeout(_) => 30,
            SyncError::Transport(_) | SyncError::Io(_) | SyncError::Codec(_) => 23,
        }
    }
}
