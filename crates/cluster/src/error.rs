use thiserror::Error;

/// Result type for cluster administrative API calls.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by a [`ClusterClient`](crate::ClusterClient).
#[derive(Debug, Error)]
pub enum Error {
    /// The HTTP request failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The cluster answered with a non-success status.
    #[error("{path} returned {status}: {body}")]
    Status {
        /// The requested path.
        path: String,

        /// The response status code.
        status: u16,

        /// The response body.
        body: String,
    },

    /// The response body could not be parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The base URL cannot be used to build endpoint URLs.
    #[error("invalid cluster url: {0}")]
    InvalidUrl(String),

    /// The cluster could not be reached.
    #[error("cluster unavailable: {0}")]
    Unavailable(String),
}
