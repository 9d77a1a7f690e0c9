//! Error taxonomy for the metadata pipeline.
//!
//! Per-item errors ([`Error::Encoding`], [`Error::ModelRequest`],
//! [`Error::QuotaExceeded`]) are converted into failure outcomes by the batch
//! coordinator and never abort a batch. [`Error::Validation`] and
//! [`Error::FatalBatch`] surface before any item is processed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// An image could not be read or encoded for transmission. Local, per item.
    #[error("failed to encode {filename}: {reason}")]
    Encoding { filename: String, reason: String },

    /// The external model call failed (network, malformed response, timeout).
    #[error("{0}")]
    ModelRequest(String),

    /// Rate-limit subtype of a model request failure. The display text is the
    /// user-facing rewrite of the raw 429/quota error.
    #[error("Quota exceeded (429). Please wait a moment or check your API plan.")]
    QuotaExceeded,

    /// Bad input caught before processing (missing credential, unsupported format).
    #[error("{0}")]
    Validation(String),

    /// The batch could not start at all. The display text goes on the wire
    /// as the `fatal-error` event message, unprefixed.
    #[error("{0}")]
    FatalBatch(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Classify a raw model-call failure message, rewriting rate-limit errors
/// into [`Error::QuotaExceeded`] so users see the friendly explanation.
pub fn classify_model_error(message: impl Into<String>) -> Error {
    let message = message.into();
    if message.contains("429")
        || message.contains("Quota exceeded")
        || message.contains("RESOURCE_EXHAUSTED")
    {
        Error::QuotaExceeded
    } else {
        Error::ModelRequest(message)
    }
}
