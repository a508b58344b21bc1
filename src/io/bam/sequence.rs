//! 4-bit BAM sequence packing.
//!
//! BAM stores bases two per byte, high nibble first, using the 16-symbol
//! alphabet `=ACMGRSVTWYHKDBN`. Any symbol outside that set packs as 15 (`N`).
//! Lower-case input is folded to upper case before lookup.
//!
//! # Format
//!
//! - Byte 0x12 holds code 1 (`A`) in the high nibble and code 2 (`C`) in the low nibble
//! - Odd-length sequences pad the final low nibble with 0

use super::error::{BamDecodeError, BamEncodeError};

/// BAM 4-bit to ASCII base lookup table.
///
/// - 0 = '=' (match to reference)
/// - 1, 2, 4, 8 = A, C, G, T
/// - the rest are IUPAC ambiguity codes, ending with 15 = N
pub const SEQ_LOOKUP: [u8; 16] = [
    b'=', b'A', b'C', b'M', // 0-3
    b'G', b'R', b'S', b'V', // 4-7
    b'T', b'W', b'Y', b'H', // 8-11
    b'K', b'D', b'B', b'N', // 12-15
];

/// Alphabet attached to an alignment record's bases.
///
/// Only [`Alphabet::Dna`] can be written to BAM; the others exist so a
/// record built for a protein or RNA alignment is rejected instead of being
/// silently packed as `N`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Alphabet {
    /// The 16-symbol DNA set (IUPAC codes plus `=`)
    #[default]
    Dna,
    /// RNA nucleotides
    Rna,
    /// Amino acids
    Protein,
}

impl Alphabet {
    /// Human-readable alphabet name.
    pub fn name(&self) -> &'static str {
        match self {
            Alphabet::Dna => "DNA",
            Alphabet::Rna => "RNA",
            Alphabet::Protein => "protein",
        }
    }

    /// Fail unless this is the DNA alphabet.
    pub fn ensure_dna(&self) -> Result<(), BamEncodeError> {
        match self {
            Alphabet::Dna => Ok(()),
            other => Err(BamEncodeError::UnsupportedAlphabet {
                alphabet: other.name(),
            }),
        }
    }
}

/// 4-bit code for one base symbol.
pub fn encode_base(base: u8) -> u8 {
    match base.to_ascii_uppercase() {
        b'=' => 0,
        b'A' => 1,
        b'C' => 2,
        b'M' => 3,
        b'G' => 4,
        b'R' => 5,
        b'S' => 6,
        b'V' => 7,
        b'T' => 8,
        b'W' => 9,
        b'Y' => 10,
        b'H' => 11,
        b'K' => 12,
        b'D' => 13,
        b'B' => 14,
        _ => 15,
    }
}

/// Pack bases two per byte, appending `ceil(len / 2)` bytes to `out`.
///
/// # Example
///
/// ```
/// use bamforge::io::bam::sequence::encode_sequence;
///
/// let mut packed = Vec::new();
/// encode_sequence(b"ACG", &mut packed);
/// assert_eq!(packed, vec![0x12, 0x40]);
/// ```
pub fn encode_sequence(bases: &[u8], out: &mut Vec<u8>) {
    out.reserve(bases.len().div_ceil(2));
    for pair in bases.chunks(2) {
        let high = encode_base(pair[0]);
        let low = pair.get(1).map_or(0, |&b| encode_base(b));
        out.push((high << 4) | low);
    }
}

/// Decode a 4-bit encoded BAM sequence to ASCII.
///
/// # Errors
///
/// Returns error if `data` is too short for the specified `length`.
///
/// # Example
///
/// ```
/// use bamforge::io::bam::decode_sequence;
///
/// let data = vec![0x12];
/// let sequence = decode_sequence(&data, 2).unwrap();
/// assert_eq!(sequence, b"AC");
/// ```
pub fn decode_sequence(data: &[u8], length: usize) -> Result<Vec<u8>, BamDecodeError> {
    let required_bytes = length.div_ceil(2);
    if data.len() < required_bytes {
        return Err(BamDecodeError::UnexpectedEof {
            context: "sequence",
            expected: required_bytes,
            actual: data.len(),
        });
    }

    let mut sequence = Vec::with_capacity(length);
    for i in 0..length {
        let byte = data[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0F };
        sequence.push(SEQ_LOOKUP[nibble as usize]);
    }

    Ok(sequence)
}
