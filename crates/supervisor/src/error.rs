use thiserror::Error;

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The cluster administrative API failed.
    #[error("cluster error: {0}")]
    Cluster(#[from] datanode_cluster::Error),

    /// The cluster did not acknowledge a settings update.
    #[error("cluster did not acknowledge update of {0}")]
    NotAcknowledged(&'static str),

    /// No tokio runtime was available.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// The process was started before being configured.
    #[error("process not configured")]
    NotConfigured,

    /// The underlying command line process failed.
    #[error(transparent)]
    Process(#[from] datanode_process::Error),
}
