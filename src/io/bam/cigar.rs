//! CIGAR (Compact Idiosyncratic Gapped Alignment Report) operations.
//!
//! CIGAR strings describe how a read aligns to the reference, including
//! matches, insertions, deletions, and other operations.
//!
//! # BAM Format
//!
//! In BAM, CIGAR is stored as 32-bit integers:
//! - Low 4 bits: operation type (0-8)
//! - High 28 bits: operation length (0 to 268,435,455)
//!
//! # Operations
//!
//! - M: Match/mismatch (alignment match, can include mismatches)
//! - I: Insertion to reference
//! - D: Deletion from reference
//! - N: Skipped region from reference (intron for RNA-seq)
//! - S: Soft clipping (bases present in read, not in alignment)
//! - H: Hard clipping (bases not present in read)
//! - P: Padding (silent deletion from padded reference)
//! - =: Sequence match (bases match reference)
//! - X: Sequence mismatch (bases don't match reference)

use super::error::{BamDecodeError, BamEncodeError};
use std::fmt;

/// Largest length a packed CIGAR operation can carry (28 bits).
pub const MAX_OP_LENGTH: u32 = (1 << 28) - 1;

/// CIGAR operation types.
///
/// Each operation describes a type of alignment event and its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarOp {
    /// Match or mismatch (M)
    Match(u32),
    /// Insertion to reference (I)
    Insertion(u32),
    /// Deletion from reference (D)
    Deletion(u32),
    /// Skipped region from reference (N)
    RefSkip(u32),
    /// Soft clipping (S)
    SoftClip(u32),
    /// Hard clipping (H)
    HardClip(u32),
    /// Padding (P)
    Padding(u32),
    /// Sequence match (=)
    SeqMatch(u32),
    /// Sequence mismatch (X)
    SeqMismatch(u32),
}

impl CigarOp {
    /// Build an operation from its SAM character and length.
    pub fn from_char(op: char, length: u32) -> Option<Self> {
        match op {
            'M' => Some(CigarOp::Match(length)),
            'I' => Some(CigarOp::Insertion(length)),
            'D' => Some(CigarOp::Deletion(length)),
            'N' => Some(CigarOp::RefSkip(length)),
            'S' => Some(CigarOp::SoftClip(length)),
            'H' => Some(CigarOp::HardClip(length)),
            'P' => Some(CigarOp::Padding(length)),
            '=' => Some(CigarOp::SeqMatch(length)),
            'X' => Some(CigarOp::SeqMismatch(length)),
            _ => None,
        }
    }

    /// Get the operation count/length.
    pub fn length(&self) -> u32 {
        match self {
            CigarOp::Match(len)
            | CigarOp::Insertion(len)
            | CigarOp::Deletion(len)
            | CigarOp::RefSkip(len)
            | CigarOp::SoftClip(len)
            | CigarOp::HardClip(len)
            | CigarOp::Padding(len)
            | CigarOp::SeqMatch(len)
            | CigarOp::SeqMismatch(len) => *len,
        }
    }

    /// BAM operation code (`MIDNSHP=X` → 0..8).
    pub fn code(&self) -> u32 {
        match self {
            CigarOp::Match(_) => 0,
            CigarOp::Insertion(_) => 1,
            CigarOp::Deletion(_) => 2,
            CigarOp::RefSkip(_) => 3,
            CigarOp::SoftClip(_) => 4,
            CigarOp::HardClip(_) => 5,
            CigarOp::Padding(_) => 6,
            CigarOp::SeqMatch(_) => 7,
            CigarOp::SeqMismatch(_) => 8,
        }
    }

    /// Get the operation type as a character (for SAM format).
    pub fn as_char(&self) -> char {
        match self {
            CigarOp::Match(_) => 'M',
            CigarOp::Insertion(_) => 'I',
            CigarOp::Deletion(_) => 'D',
            CigarOp::RefSkip(_) => 'N',
            CigarOp::SoftClip(_) => 'S',
            CigarOp::HardClip(_) => 'H',
            CigarOp::Padding(_) => 'P',
            CigarOp::SeqMatch(_) => '=',
            CigarOp::SeqMismatch(_) => 'X',
        }
    }

    /// Whether the operation advances along the reference.
    pub fn consumes_reference(&self) -> bool {
        matches!(
            self,
            CigarOp::Match(_)
                | CigarOp::Deletion(_)
                | CigarOp::RefSkip(_)
                | CigarOp::SeqMatch(_)
                | CigarOp::SeqMismatch(_)
        )
    }

    /// Parse a textual CIGAR such as `"10M2I5D"`.
    ///
    /// `"*"` and the empty string mean "no CIGAR". Operation letters are
    /// case-insensitive.
    ///
    /// # Example
    ///
    /// ```
    /// use bamforge::io::bam::CigarOp;
    ///
    /// let ops = CigarOp::parse_str("3S10M1d").unwrap();
    /// assert_eq!(ops, vec![CigarOp::SoftClip(3), CigarOp::Match(10), CigarOp::Deletion(1)]);
    /// assert!(CigarOp::parse_str("*").unwrap().is_empty());
    /// assert!(CigarOp::parse_str("10Q").is_err());
    /// ```
    pub fn parse_str(text: &str) -> Result<Vec<CigarOp>, BamEncodeError> {
        if text.is_empty() || text == "*" {
            return Ok(Vec::new());
        }

        let invalid = |token: &str| BamEncodeError::InvalidCigar {
            token: token.to_string(),
        };

        let mut ops = Vec::new();
        let mut digits_start = 0;
        for (i, ch) in text.char_indices() {
            if ch.is_ascii_digit() {
                continue;
            }
            let digits = &text[digits_start..i];
            let token = &text[digits_start..i + ch.len_utf8()];
            if digits.is_empty() {
                return Err(invalid(token));
            }
            let length: u32 = digits.parse().map_err(|_| invalid(token))?;
            if length > MAX_OP_LENGTH {
                return Err(invalid(token));
            }
            let op = CigarOp::from_char(ch.to_ascii_uppercase(), length).ok_or_else(|| invalid(token))?;
            ops.push(op);
            digits_start = i + ch.len_utf8();
        }

        if digits_start != text.len() {
            return Err(invalid(&text[digits_start..]));
        }

        Ok(ops)
    }
}

impl fmt::Display for CigarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.length(), self.as_char())
    }
}

/// Render a list of operations as SAM text (`"*"` when empty).
pub fn cigar_to_string(ops: &[CigarOp]) -> String {
    if ops.is_empty() {
        return "*".to_string();
    }
    ops.iter().map(|op| op.to_string()).collect()
}

/// Number of reference bases covered by the operations.
pub fn reference_span(ops: &[CigarOp]) -> u32 {
    ops.iter()
        .filter(|op| op.consumes_reference())
        .map(|op| op.length())
        .sum()
}

/// Pack one operation as `length << 4 | code`.
///
/// The caller guarantees `length <= MAX_OP_LENGTH`; record encoding checks
/// this before any byte is written.
pub fn encode_cigar_op(op: &CigarOp) -> [u8; 4] {
    ((op.length() << 4) | op.code()).to_le_bytes()
}

/// Parse BAM CIGAR operations from binary format.
///
/// Each CIGAR operation is encoded as a 32-bit little-endian integer:
/// - Bits 0-3: operation type (0-8)
/// - Bits 4-31: operation length
///
/// # Errors
///
/// Returns error if:
/// - Data is too short for specified number of operations
/// - Invalid operation code encountered (not 0-8)
///
/// # Example
///
/// ```
/// use bamforge::io::bam::{parse_cigar, CigarOp};
///
/// // 100M = 100 << 4 | 0 = 1600 = 0x00000640 (little-endian)
/// let data = vec![0x40, 0x06, 0x00, 0x00];
/// let cigar = parse_cigar(&data, 1).unwrap();
/// assert_eq!(cigar, vec![CigarOp::Match(100)]);
/// ```
pub fn parse_cigar(data: &[u8], n_ops: usize) -> Result<Vec<CigarOp>, BamDecodeError> {
    let required_bytes = n_ops * 4;
    if data.len() < required_bytes {
        return Err(BamDecodeError::UnexpectedEof {
            context: "CIGAR",
            expected: required_bytes,
            actual: data.len(),
        });
    }

    data[..required_bytes]
        .chunks_exact(4)
        .map(|bytes| {
            let packed = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            let length = packed >> 4;
            match packed & 0x0F {
                0 => Ok(CigarOp::Match(length)),
                1 => Ok(CigarOp::Insertion(length)),
                2 => Ok(CigarOp::Deletion(length)),
                3 => Ok(CigarOp::RefSkip(length)),
                4 => Ok(CigarOp::SoftClip(length)),
                5 => Ok(CigarOp::HardClip(length)),
                6 => Ok(CigarOp::Padding(length)),
                7 => Ok(CigarOp::SeqMatch(length)),
                8 => Ok(CigarOp::SeqMismatch(length)),
                value => Err(BamDecodeError::InvalidCigarOp { value }),
            }
        })
        .collect()
}
