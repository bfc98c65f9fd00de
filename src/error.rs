use thiserror::Error;

/// Errors raised while talking to a Spark REST API (History Server or a
/// live application UI).
#[derive(Debug, Error)]
pub enum RestError {
    /// The upstream answered with a non-JSON content type. Spark UIs serve
    /// an HTML splash page while initializing, so this is the signal that
    /// the application is not ready to be queried yet.
    #[error("spark UI is initializing")]
    UpstreamNotReady,

    #[error("invalid upstream URL: {0}")]
    InvalidUpstream(#[from] url::ParseError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("failed to decode JSON response: {0}")]
    Decode(#[from] serde_json::Error),
}
