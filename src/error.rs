//! Error types for bamforge

use crate::io::bam::error::{BamDecodeError, BamEncodeError};
use thiserror::Error;

/// Result type alias for bamforge operations
pub type Result<T> = std::result::Result<T, BamforgeError>;

/// Error types that can occur in bamforge
#[derive(Debug, Error)]
pub enum BamforgeError {
    /// I/O error from the underlying stream, passed through untouched
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid call argument (nothing was written)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Record content could not be encoded
    #[error("Invalid record: {0}")]
    Encode(#[from] BamEncodeError),

    /// Record or header bytes could not be decoded
    #[error("Invalid BAM data: {0}")]
    Decode(#[from] BamDecodeError),

    /// BAI index stream is malformed
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    /// Compression/decompression error
    #[error("Compression error: {0}")]
    Compression(String),
}

impl BamforgeError {
    /// Whether this error came from the underlying stream rather than from content.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
