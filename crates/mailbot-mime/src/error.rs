//! Error types for MIME operations.

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid MIME header.
    #[error("Invalid MIME header: {0}")]
    InvalidHeader(String),

    /// Raw bytes are not a parseable message.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Malformed TNEF stream.
    #[error("Invalid TNEF envelope: {0}")]
    InvalidEnvelope(String),

    /// The envelope carries more than one file.
    #[error("Unhandled multiple TNEF attachments ({0} files)")]
    MultipleEnvelopeFiles(usize),

    /// The envelope carries no file at all.
    #[error("TNEF envelope contains no attachment")]
    EmptyEnvelope,
}
