//! BAM header encoding and decoding.
//!
//! The BAM header consists of:
//! 1. Magic bytes ("BAM\1")
//! 2. SAM header text (length-prefixed, not NUL-terminated)
//! 3. Reference sequence dictionary
//!
//! # Format
//!
//! ```text
//! BAM Header:
//! - 4 bytes: Magic ("BAM\1")
//! - 4 bytes: SAM header text length (l_text, int32)
//! - l_text bytes: SAM header text
//! - 4 bytes: Number of reference sequences (n_ref, int32)
//! - For each reference:
//!   - 4 bytes: Reference name length (l_name, int32, includes null terminator)
//!   - l_name bytes: Reference name (null-terminated)
//!   - 4 bytes: Reference length (int32)
//! ```
//!
//! The dictionary order fixes every `refID` written into records and every
//! per-reference slot of the index. Reordering it means building a new
//! [`Session`](super::Session) from the reordered header.

use super::error::{BamDecodeError, BamEncodeError};
use crate::error::{BamforgeError, Result};
use std::io::{Read, Write};

/// BAM magic bytes.
pub const BAM_MAGIC: &[u8; 4] = b"BAM\x01";

/// `VN` written when an `@HD` line has to be created.
const SAM_VERSION: &str = "1.6";

/// Reference sequence information.
///
/// Each reference sequence (chromosome/contig) has a name and length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Reference sequence name (e.g., "chr1", "chrM")
    pub name: String,
    /// Reference sequence length in bases
    pub length: u32,
}

impl Reference {
    /// Create a new reference.
    pub fn new(name: impl Into<String>, length: u32) -> Self {
        Self {
            name: name.into(),
            length,
        }
    }
}

/// BAM file header: free text plus the reference dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header {
    /// SAM header text (includes @HD, @SQ, @RG, @PG lines)
    pub text: String,
    /// Reference sequences (chromosomes/contigs)
    pub references: Vec<Reference>,
}

impl Header {
    /// Create a new header.
    pub fn new(text: impl Into<String>, references: Vec<Reference>) -> Self {
        Self {
            text: text.into(),
            references,
        }
    }

    /// Get reference by ID.
    pub fn reference(&self, id: usize) -> Option<&Reference> {
        self.references.get(id)
    }

    /// Get reference name by ID.
    pub fn reference_name(&self, id: usize) -> Option<&str> {
        self.reference(id).map(|r| r.name.as_str())
    }

    /// Get number of reference sequences.
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    /// Copy of this header with the dictionary ordered by reference name.
    ///
    /// Records written against the returned header must be encoded with a
    /// session built from it, since every `refID` changes.
    pub fn sorted_by_reference_name(&self) -> Header {
        let mut references = self.references.clone();
        references.sort_by(|a, b| a.name.cmp(&b.name));
        Header {
            text: self.text.clone(),
            references,
        }
    }

    /// Copy of this header whose `@HD` line carries `SO:<order>`.
    ///
    /// An existing `SO` field is replaced. Text without an `@HD` line gets
    /// one prepended.
    pub fn with_sort_order(&self, order: &str) -> Header {
        let (first, rest) = match self.text.find('\n') {
            Some(end) => self.text.split_at(end),
            None => (self.text.as_str(), ""),
        };

        let text = if first == "@HD" || first.starts_with("@HD\t") {
            let mut fields: Vec<String> = first
                .split('\t')
                .filter(|field| !field.starts_with("SO:"))
                .map(str::to_string)
                .collect();
            fields.push(format!("SO:{}", order));
            format!("{}{}", fields.join("\t"), rest)
        } else {
            format!("@HD\tVN:{}\tSO:{}\n{}", SAM_VERSION, order, self.text)
        };

        Header {
            text,
            references: self.references.clone(),
        }
    }
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_length<R: Read>(reader: &mut R, field: &'static str) -> Result<usize> {
    let length = read_i32(reader)?;
    if length < 0 {
        return Err(BamDecodeError::NegativeLength { field, length }.into());
    }
    Ok(length as usize)
}

fn checked_i32(value: usize, field: &'static str) -> Result<i32> {
    i32::try_from(value).map_err(|_| {
        BamEncodeError::FieldTooLarge {
            field,
            size: value,
            max: i32::MAX as usize,
        }
        .into()
    })
}

/// Read and validate BAM magic bytes.
pub fn read_magic<R: Read>(reader: &mut R) -> Result<()> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;

    if &magic != BAM_MAGIC {
        return Err(BamDecodeError::InvalidMagic { actual: magic }.into());
    }

    Ok(())
}

/// Read SAM header text.
pub fn read_header_text<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_length(reader, "header text")?;

    let mut text_bytes = vec![0u8; len];
    reader.read_exact(&mut text_bytes)?;

    String::from_utf8(text_bytes).map_err(|source| {
        BamDecodeError::InvalidUtf8 {
            field: "header text",
            source,
        }
        .into()
    })
}

/// Read a single reference sequence.
pub fn read_reference<R: Read>(reader: &mut R) -> Result<Reference> {
    let name_len = read_length(reader, "reference name")?;
    if name_len == 0 {
        return Err(BamDecodeError::MissingNulTerminator {
            field: "reference name",
            offset: 0,
        }
        .into());
    }

    let mut name_bytes = vec![0u8; name_len];
    reader.read_exact(&mut name_bytes)?;

    if name_bytes.pop() != Some(0) {
        return Err(BamDecodeError::MissingNulTerminator {
            field: "reference name",
            offset: name_len - 1,
        }
        .into());
    }

    let name = String::from_utf8(name_bytes).map_err(|source| BamDecodeError::InvalidUtf8 {
        field: "reference name",
        source,
    })?;

    let length = read_length(reader, "reference sequence")?;

    Ok(Reference::new(name, length as u32))
}

/// Read the reference dictionary (count followed by each entry).
pub fn read_references<R: Read>(reader: &mut R) -> Result<Vec<Reference>> {
    let count = read_length(reader, "reference dictionary")?;
    // Cap the pre-allocation; a corrupt count should fail on read, not on alloc.
    let mut references = Vec::with_capacity(count.min(1 << 16));

    for _ in 0..count {
        references.push(read_reference(reader)?);
    }

    Ok(references)
}

/// Read complete BAM header.
///
/// # Example
///
/// ```
/// use bamforge::io::bam::header::{read_header, write_header, Header, Reference};
/// use std::io::Cursor;
///
/// # fn main() -> bamforge::Result<()> {
/// let header = Header::new("@HD\tVN:1.6\n", vec![Reference::new("chr1", 1000)]);
/// let mut bytes = Vec::new();
/// write_header(&mut bytes, &header)?;
///
/// let decoded = read_header(&mut Cursor::new(bytes))?;
/// assert_eq!(decoded, header);
/// # Ok(())
/// # }
/// ```
pub fn read_header<R: Read>(reader: &mut R) -> Result<Header> {
    read_magic(reader)?;
    let text = read_header_text(reader)?;
    let references = read_references(reader)?;
    Ok(Header::new(text, references))
}

/// Write the BAM preamble: magic, header text and reference dictionary.
///
/// # Errors
///
/// Names containing NUL are rejected before anything is written.
pub fn write_header<W: Write>(writer: &mut W, header: &Header) -> Result<()> {
    let text_len = checked_i32(header.text.len(), "header text")?;
    let ref_count = checked_i32(header.references.len(), "reference dictionary")?;
    for reference in &header.references {
        if reference.name.as_bytes().contains(&0) {
            return Err(BamforgeError::InvalidArgument(format!(
                "reference name {:?} contains a NUL byte",
                reference.name
            )));
        }
        checked_i32(reference.name.len() + 1, "reference name")?;
        checked_i32(reference.length as usize, "reference sequence")?;
    }

    let mut buf = Vec::with_capacity(12 + header.text.len() + header.references.len() * 16);
    buf.extend_from_slice(BAM_MAGIC);
    buf.extend_from_slice(&text_len.to_le_bytes());
    buf.extend_from_slice(header.text.as_bytes());
    buf.extend_from_slice(&ref_count.to_le_bytes());

    for reference in &header.references {
        buf.extend_from_slice(&((reference.name.len() + 1) as i32).to_le_bytes());
        buf.extend_from_slice(reference.name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&(reference.length as i32).to_le_bytes());
    }

    writer.write_all(&buf)?;
    Ok(())
}
