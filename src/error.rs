//! Error taxonomy for registry lookup, scanning, and execution.
//!
//! Failure modes are explicit values, never caught exceptions: callers match
//! on the variant they can handle. A non-zero exit status from an executed
//! function is *not* an error; it is returned as the result.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Registry lookup miss: no such script in the merged scopes.
    #[error("script '{script}' not found in namespace '{namespace}'")]
    ScriptNotFound { namespace: String, script: String },

    /// A registered path no longer exists on disk.
    #[error("{} doesn't exist. Please run `bcli purge`", path.display())]
    MissingFile { path: PathBuf },

    /// The SSH control channel could not be established. No staging was
    /// attempted.
    #[error("failed to open control channel to {remote}")]
    ConnectionFailure { remote: String },

    /// A file copy or remote directory creation failed mid-staging.
    /// Already-staged files are left in place.
    #[error("failed to transfer {} to {remote}: {detail}", path.display())]
    TransferFailure {
        path: PathBuf,
        remote: String,
        detail: String,
    },

    #[error("metadata error: {0}")]
    Metadata(#[from] serde_yaml::Error),

    #[error("invalid import pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
