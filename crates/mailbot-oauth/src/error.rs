//! Error types for credential resolution and token exchange.

/// Result type alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Credential and `OAuth2` error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The auth descriptor does not describe a usable credential.
    #[error("Invalid auth configuration: {0}")]
    InvalidConfig(String),

    /// The token endpoint rejected the exchange.
    #[error("Token exchange failed ({status}): {error} - {description}")]
    Exchange {
        /// HTTP status returned by the token endpoint.
        status: u16,
        /// Error code (e.g., `invalid_client`).
        error: String,
        /// Human-readable description.
        description: String,
    },

    /// HTTP request error (network failure, TLS, proxy).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Token is not a decodable JWT or lacks an `exp` claim.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// URL parsing error.
    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),
}

impl Error {
    /// Creates an exchange error from a status and the provider's error body.
    #[must_use]
    pub fn exchange(status: u16, error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Exchange {
            status,
            error: error.into(),
            description: description.into(),
        }
    }

    /// Returns true for failures caused by configuration rather than the remote side.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::UrlError(_))
    }
}
