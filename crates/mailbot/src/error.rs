//! Error types for mailbox operations.

use thiserror::Error;

/// Errors that can occur in mailbox operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Credentials are missing or malformed.
    #[error("Auth configuration error: {0}")]
    AuthConfig(String),

    /// Credentials were rejected or a token exchange failed.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Operation requires `connect` first.
    #[error("Must connect first")]
    NotConnected,

    /// Search requires a selected folder.
    #[error("No folder selected. Use select_folder() or connect() with a folder first")]
    NoFolderSelected,

    /// The native query was rejected by the server.
    #[error("Search failed: {0}")]
    Search(String),

    /// Fetching a message returned no payload.
    #[error("Cannot get mail content for message {0}")]
    EmptyContent(String),

    /// A TNEF envelope carries more than one file.
    #[error("Unhandled multiple TNEF attachments in {filename} ({count} files)")]
    UnsupportedMultiAttachment {
        /// Envelope file name.
        filename: String,
        /// Number of files in the envelope.
        count: usize,
    },

    /// Move target does not exist.
    #[error("Folder with name \"{0}\" not found")]
    FolderNotFound(String),

    /// Move called without a target and no processed folder is configured.
    #[error("Target folder to move messages needed")]
    MissingTargetFolder,

    /// Proxy enabled without host or port.
    #[error("Proxy configuration error: {0}")]
    ProxyConfig(String),

    /// Invalid configuration or criteria.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The message carries no usable timestamp for the requested source.
    #[error("Message has no {0} date")]
    MissingDate(&'static str),

    /// IMAP protocol failure.
    #[error("IMAP error: {0}")]
    Imap(#[from] async_imap::error::Error),

    /// HTTP failure talking to Graph.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote call failed outside the named cases.
    #[error("Transport error: {0}")]
    Transport(String),

    /// MIME parsing failed.
    #[error("MIME error: {0}")]
    Mime(#[from] mailbot_mime::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<mailbot_oauth::Error> for Error {
    fn from(err: mailbot_oauth::Error) -> Self {
        if err.is_config() {
            Self::AuthConfig(err.to_string())
        } else {
            Self::Authentication(err.to_string())
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_config_error_maps_to_auth_config() {
        let err: Error = mailbot_oauth::Error::InvalidConfig("auth.user".into()).into();
        assert!(matches!(err, Error::AuthConfig(_)));
    }

    #[test]
    fn test_oauth_exchange_error_maps_to_authentication() {
        let err: Error = mailbot_oauth::Error::exchange(401, "invalid_client", "bad").into();
        assert!(matches!(err, Error::Authentication(msg) if msg.contains("invalid_client")));
    }
}
