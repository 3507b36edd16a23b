//! Error taxonomy shared by every reader, writer and codec in this crate.
//!
//! Every variant is terminal for the session that produced it.  None of them
//! describe a transient condition: they mean either corrupt or foreign input,
//! or a caller that drove a reader/writer out of order.  After an error the
//! output written so far must be discarded, and the input position of a reader
//! can no longer be trusted.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = YardlError> = std::result::Result<T, E>;

/// Errors raised by the binary protocol runtime.
#[derive(Debug, Error)]
pub enum YardlError {
    /// The magic marker is wrong or the header/body cannot be parsed.
    #[error("data is not in the expected yardl format: {0}")]
    Format(String),

    /// The header carries a format version this runtime does not implement.
    #[error("unsupported yardl format version: {0}")]
    UnsupportedVersion(u32),

    /// The schema in the data matches neither the current schema nor any
    /// previous schema known to the reader.
    #[error("the schema of the data is not compatible with protocol '{protocol}'")]
    SchemaMismatch { protocol: String },

    /// A step was invoked out of its declared order, after the protocol
    /// completed, or after the session was closed.
    #[error("protocol state error: {0}")]
    ProtocolState(String),

    /// A strict-mode reader or writer was closed before every step was
    /// consumed (or before the input was exhausted).
    #[error("protocol closed before completion: {0}")]
    UnfinishedStream(String),

    /// No adapter exists to turn a previous schema's representation into the
    /// current one.
    #[error("unsupported coercion: {0}")]
    UnsupportedCoercion(String),

    /// The input ended in the middle of a value.
    #[error("unexpected end of data at byte {position}")]
    TruncatedData { position: u64 },

    /// The schema text is not valid JSON or does not describe a protocol.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// A value handed to a writer does not conform to the step's type.
    #[error("value does not match type {expected}: got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// The underlying transport failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl YardlError {
    pub(crate) fn type_mismatch(expected: impl ToString, actual: impl ToString) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}
