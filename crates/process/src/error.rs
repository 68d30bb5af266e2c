//! Error types for command line process operations.

use std::io;

use thiserror::Error;

/// Result type for command line process operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a command line process.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("io error: {0} - {1}")]
    Io(&'static str, #[source] io::Error),

    /// No tokio runtime was available when the process was created.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// Failed to send a signal to the process.
    #[error("failed to signal process {0}: {1}")]
    Signal(u32, #[source] nix::Error),

    /// Failed to spawn a process
    #[error("Failed to spawn process: {0}")]
    SpawnProcess(String),
}
