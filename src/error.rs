use thiserror::Error;

/// Shared result type for every fallible call in the crate.
pub type Result<T> = std::result::Result<T, DexError>;

/// Everything that can go wrong between this process and the DEX servers.
///
/// None of these ever reach the wrapped handler's response: the poller and
/// the dispatcher log them and carry on.
#[derive(Debug, Error)]
pub enum DexError {
    /// Transport-level failure (connect, TLS, timeout, body read).
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote authority answered, but not with the status we expect.
    #[error("{endpoint}: expected {expected}, got {actual}: {body}")]
    UnexpectedStatus {
        endpoint: &'static str,
        expected: u16,
        actual: u16,
        body: String,
    },

    /// The key-detail document could not be parsed.
    #[error("malformed key detail: {0}")]
    Decode(#[source] serde_json::Error),

    /// A batch could not be turned into JSON.
    #[error("encode batch: {0}")]
    Encode(#[source] serde_json::Error),

    /// Bad or missing configuration value.
    #[error("config: {0}")]
    Config(String),
}
