use thiserror::Error;

/// Errors raised by the claims-source client.
///
/// `Transport`, `Status` and `Parse` are transient: the retry loop absorbs
/// them until the attempt budget runs out, then wraps the last one in
/// `Exhausted`.
#[derive(Debug, Error)]
pub enum BfdError {
    #[error("client configuration error: {0}")]
    Config(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("claims source returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response body: {0}")]
    Parse(String),

    #[error("identifier hashing failed: {0}")]
    Hash(String),

    #[error("request failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<BfdError>,
    },
}

impl BfdError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BfdError::Transport(_) | BfdError::Status { .. } | BfdError::Parse(_)
        )
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self, BfdError::Status { status, .. } if *status >= 500)
    }
}

impl From<serde_json::Error> for BfdError {
    fn from(err: serde_json::Error) -> Self {
        BfdError::Parse(err.to_string())
    }
}
