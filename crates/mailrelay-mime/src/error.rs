//! Error types for MIME operations.
//!
//! Extraction itself never fails; these errors come from the lower-level
//! parsers and decoders and are turned into degraded results by the
//! extractor.

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid content type.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// Invalid transfer encoding payload.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Bytes are not valid in the declared charset.
    #[error("Cannot decode text as {0}")]
    Charset(String),

    /// Charset label not supported.
    #[error("Unsupported charset: {0}")]
    UnsupportedCharset(String),

    /// Invalid multipart structure.
    #[error("Invalid multipart structure: {0}")]
    InvalidMultipart(String),
}
