//! BAM codec error types.
//!
//! Decoding and encoding failures are kept apart so callers can tell a
//! corrupt input file from a record they built incorrectly:
//! - [`BamDecodeError`]: bytes read from a stream do not form a valid header or record
//! - [`BamEncodeError`]: an [`AlignmentRecord`](super::AlignmentRecord) cannot be represented
//!
//! Both convert into [`BamforgeError`](crate::BamforgeError) with `?`.

use std::{error, fmt, io};

/// Errors that can occur during BAM decoding.
///
/// # Example
///
/// ```
/// use bamforge::io::bam::error::BamDecodeError;
///
/// fn describe(err: &BamDecodeError) -> String {
///     match err {
///         BamDecodeError::InvalidReferenceId { value, field } => {
///             format!("bad {} reference {}", field, value)
///         }
///         other => other.to_string(),
///     }
/// }
/// ```
#[derive(Debug)]
pub enum BamDecodeError {
    /// I/O error occurred during reading
    Io(io::Error),

    /// Reference ID is neither -1 nor a valid dictionary index
    InvalidReferenceId {
        /// The invalid reference ID value
        value: i32,
        /// Which field had the invalid ID ("read" or "mate")
        field: &'static str,
    },

    /// Invalid read name length (must be >= 1)
    InvalidReadNameLength {
        /// The invalid length value
        length: u8,
        /// Offset in the data where error occurred
        offset: usize,
    },

    /// Missing NUL terminator in string field
    MissingNulTerminator {
        /// Which field was missing the terminator
        field: &'static str,
        /// Offset in the data where error occurred
        offset: usize,
    },

    /// Invalid UTF-8 in string field
    InvalidUtf8 {
        /// Which field had invalid UTF-8
        field: &'static str,
        /// The underlying UTF-8 error
        source: std::string::FromUtf8Error,
    },

    /// Invalid tag type code
    InvalidTagType {
        /// The tag name
        tag: [u8; 2],
        /// The invalid type code
        type_code: u8,
    },

    /// Invalid array subtype
    InvalidArraySubtype {
        /// The invalid subtype code
        subtype: u8,
    },

    /// Invalid CIGAR operation code
    InvalidCigarOp {
        /// The invalid operation value
        value: u32,
    },

    /// Negative length in a length-prefixed field
    NegativeLength {
        /// Which field carried the length
        field: &'static str,
        /// The negative length value
        length: i32,
    },

    /// Insufficient data for parsing
    UnexpectedEof {
        /// What was being parsed
        context: &'static str,
        /// Expected number of bytes
        expected: usize,
        /// Actual number of bytes available
        actual: usize,
    },

    /// Invalid BAM magic bytes
    InvalidMagic {
        /// The actual bytes found
        actual: [u8; 4],
    },

    /// Generic invalid data error with context
    InvalidData {
        /// Description of what was invalid
        message: String,
    },
}

impl error::Error for BamDecodeError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::InvalidUtf8 { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for BamDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),

            Self::InvalidReferenceId { value, field } => {
                write!(
                    f,
                    "Invalid {} reference ID: {} (must be -1 or a dictionary index)",
                    field, value
                )
            }

            Self::InvalidReadNameLength { length, offset } => {
                write!(
                    f,
                    "Invalid read name length at offset {}: {} (must be >= 1)",
                    offset, length
                )
            }

            Self::MissingNulTerminator { field, offset } => {
                write!(f, "Missing NUL terminator in {} at offset {}", field, offset)
            }

            Self::InvalidUtf8 { field, source } => {
                write!(f, "Invalid UTF-8 in {}: {}", field, source)
            }

            Self::InvalidTagType { tag, type_code } => {
                write!(
                    f,
                    "Invalid tag type for {}{}: {}",
                    tag[0] as char, tag[1] as char, *type_code as char
                )
            }

            Self::InvalidArraySubtype { subtype } => {
                write!(f, "Invalid array subtype: {}", *subtype as char)
            }

            Self::InvalidCigarOp { value } => {
                write!(f, "Invalid CIGAR operation: {}", value)
            }

            Self::NegativeLength { field, length } => {
                write!(f, "Invalid negative {} length: {}", field, length)
            }

            Self::UnexpectedEof {
                context,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Unexpected end of data while parsing {}: expected {} bytes, got {}",
                    context, expected, actual
                )
            }

            Self::InvalidMagic { actual } => {
                write!(
                    f,
                    "Invalid BAM magic bytes: expected [BAM\\x01], got {:?}",
                    actual
                )
            }

            Self::InvalidData { message } => {
                write!(f, "Invalid data: {}", message)
            }
        }
    }
}

impl From<io::Error> for BamDecodeError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Errors raised while turning an [`AlignmentRecord`](super::AlignmentRecord) into bytes.
///
/// Encoding validates the whole record before any byte is emitted, so
/// one of these means nothing was written for that record.
#[derive(Debug, Clone, PartialEq)]
pub enum BamEncodeError {
    /// Reference name is not in the header's dictionary
    UnknownReference {
        /// The name that failed to resolve
        name: String,
    },

    /// Sequence alphabet is not the 16-symbol DNA set
    UnsupportedAlphabet {
        /// Name of the alphabet that was supplied
        alphabet: &'static str,
    },

    /// CIGAR text could not be parsed
    InvalidCigar {
        /// The offending token or string
        token: String,
    },

    /// Integer optional field does not fit any BAM integer width
    IntegerOutOfRange {
        /// The tag name
        tag: [u8; 2],
        /// Textual form of the value
        value: String,
    },

    /// Optional field type code is not one of A, c, C, s, S, i, I, f, Z, H, B
    UnsupportedTagType {
        /// The tag name
        tag: [u8; 2],
        /// The unsupported type code
        type_code: char,
    },

    /// Optional field value does not parse for its declared type
    InvalidTagValue {
        /// The tag name
        tag: [u8; 2],
        /// Description of the problem
        message: String,
    },

    /// Quality scores present but their count differs from the sequence length
    QualityLengthMismatch {
        /// Number of bases
        sequence: usize,
        /// Number of quality scores
        quality: usize,
    },

    /// Every quality score is 0xFF, the byte that marks absent qualities
    ///
    /// Such a record would decode with `quality: None`.
    ReservedQuality {
        /// Number of quality scores
        length: usize,
    },

    /// A field exceeds the width the binary layout gives it
    FieldTooLarge {
        /// Which field overflowed
        field: &'static str,
        /// Actual size
        size: usize,
        /// Largest size the layout supports
        max: usize,
    },
}

impl error::Error for BamEncodeError {}

impl fmt::Display for BamEncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownReference { name } => {
                write!(f, "Reference sequence '{}' is not in the header", name)
            }
            Self::UnsupportedAlphabet { alphabet } => {
                write!(f, "Only the DNA alphabet can be encoded, got {}", alphabet)
            }
            Self::InvalidCigar { token } => write!(f, "Invalid CIGAR: '{}'", token),
            Self::IntegerOutOfRange { tag, value } => write!(
                f,
                "Integer value '{}' of {}{} does not fit a BAM integer type",
                value, tag[0] as char, tag[1] as char
            ),
            Self::UnsupportedTagType { tag, type_code } => write!(
                f,
                "Unsupported type code '{}' for tag {}{}",
                type_code, tag[0] as char, tag[1] as char
            ),
            Self::InvalidTagValue { tag, message } => write!(
                f,
                "Invalid value for tag {}{}: {}",
                tag[0] as char, tag[1] as char, message
            ),
            Self::QualityLengthMismatch { sequence, quality } => write!(
                f,
                "Quality length {} does not match sequence length {}",
                quality, sequence
            ),
            Self::ReservedQuality { length } => write!(
                f,
                "All {} quality scores are 0xFF, which is reserved for missing qualities",
                length
            ),
            Self::FieldTooLarge { field, size, max } => {
                write!(f, "{} too large: {} (max {})", field, size, max)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_decode_error_display() {
        let err = BamDecodeError::InvalidTagType {
            tag: *b"NM",
            type_code: b'Q',
        };
        assert_eq!(err.to_string(), "Invalid tag type for NM: Q");

        let err = BamDecodeError::UnexpectedEof {
            context: "record",
            expected: 32,
            actual: 4,
        };
        assert!(err.to_string().contains("expected 32 bytes, got 4"));
    }

    #[test]
    fn test_decode_error_source() {
        let err = BamDecodeError::from(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(err.source().is_some());

        let err = BamDecodeError::InvalidCigarOp { value: 9 };
        assert!(err.source().is_none());
    }

    #[test]
    fn test_encode_error_display() {
        let err = BamEncodeError::UnknownReference {
            name: "chrZ".to_string(),
        };
        assert_eq!(err.to_string(), "Reference sequence 'chrZ' is not in the header");

        let err = BamEncodeError::IntegerOutOfRange {
            tag: *b"XS",
            value: "4294967296".to_string(),
        };
        assert!(err.to_string().contains("XS"));
    }
}
