//! BAM alignment records and their binary codec.
//!
//! # Binary Format
//!
//! ```text
//! BAM Record (binary, little-endian):
//! - block_size (int32): Total record size in bytes (excluding this field)
//! - refID (int32): Reference sequence ID (-1 for unmapped)
//! - pos (int32): 0-based leftmost position (-1 for unmapped)
//! - l_read_name (uint8): Length of read name (includes null terminator)
//! - mapq (uint8): Mapping quality (255 = unavailable)
//! - bin (uint16): BAI index bin
//! - n_cigar_op (uint16): Number of CIGAR operations
//! - flag (uint16): Bitwise FLAGS
//! - l_seq (int32): Sequence length
//! - next_refID (int32): Reference ID of mate/next read
//! - next_pos (int32): Position of mate/next read
//! - tlen (int32): Template length
//! - read_name (char[l_read_name]): Null-terminated read name
//! - cigar (uint32[n_cigar_op]): CIGAR operations
//! - seq (uint8[(l_seq+1)/2]): 4-bit encoded sequence
//! - qual (char[l_seq]): Phred quality scores, all 0xFF when absent
//! - tags: Optional fields (variable length)
//! ```
//!
//! Records carry reference *names*; a [`Session`] built from the header
//! turns them into `refID`s on encode and back on decode.

use super::cigar::{encode_cigar_op, parse_cigar, CigarOp, MAX_OP_LENGTH};
use super::error::{BamDecodeError, BamEncodeError};
use super::index::{reg2bin, MAX_INDEXED_POSITION, UNPLACED_BIN};
use super::sequence::{decode_sequence, encode_sequence, Alphabet};
use super::session::Session;
use super::tags::{encode_tag, parse_tags, Tag};
use crate::error::Result;
use std::io::{self, Read};

/// Size of the fixed-width fields following `block_size`.
const FIXED_FIELDS_SIZE: usize = 32;

/// Longest query name the one-byte `l_read_name` can hold (plus its NUL).
pub const MAX_QUERY_NAME_LENGTH: usize = 254;

/// Most CIGAR operations the two-byte `n_cigar_op` can hold.
pub const MAX_CIGAR_OPS: usize = u16::MAX as usize;

/// Quality byte written for every base when no qualities are attached.
pub const MISSING_QUALITY: u8 = 0xFF;

/// Template having multiple segments.
pub const FLAG_PAIRED: u16 = 0x1;
/// Each segment properly aligned.
pub const FLAG_PROPER_PAIR: u16 = 0x2;
/// Segment unmapped.
pub const FLAG_UNMAPPED: u16 = 0x4;
/// Next segment unmapped.
pub const FLAG_MATE_UNMAPPED: u16 = 0x8;
/// Sequence is reverse complemented.
pub const FLAG_REVERSE: u16 = 0x10;
/// Secondary alignment.
pub const FLAG_SECONDARY: u16 = 0x100;
/// Supplementary alignment.
pub const FLAG_SUPPLEMENTARY: u16 = 0x800;

/// One alignment as supplied by the caller.
///
/// Positions are 1-based; `0` means "no position". The sequence holds ASCII
/// base symbols and the quality holds raw Phred values (not Phred+33).
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentRecord {
    /// Read name/query name
    pub query_name: String,

    /// Bitwise FLAGS (see SAM spec for flag meanings)
    pub flags: u16,

    /// Reference sequence name; `None` when unplaced
    pub reference_name: Option<String>,

    /// 1-based leftmost mapping position (0 = none)
    pub position: u32,

    /// Mapping quality (255 = unavailable)
    pub mapq: u8,

    /// CIGAR operations
    pub cigar: Vec<CigarOp>,

    /// Mate reference name; `"="` means the record's own reference
    pub mate_reference_name: Option<String>,

    /// 1-based mate position (0 = none)
    pub mate_position: u32,

    /// Template length (TLEN)
    pub template_length: i32,

    /// Sequence bases (ASCII)
    pub sequence: Vec<u8>,

    /// Alphabet of `sequence`; only DNA can be encoded
    pub alphabet: Alphabet,

    /// Phred quality scores, one per base
    ///
    /// `None` and an empty vector both mean absent. A vector of nothing but
    /// 0xFF is rejected on encode, since that is how absence is stored.
    pub quality: Option<Vec<u8>>,

    /// Optional fields
    pub tags: Vec<Tag>,
}

impl AlignmentRecord {
    /// Create an unplaced, unmapped record with the given name.
    pub fn new(query_name: impl Into<String>) -> Self {
        Self {
            query_name: query_name.into(),
            flags: FLAG_UNMAPPED,
            reference_name: None,
            position: 0,
            mapq: 255,
            cigar: Vec::new(),
            mate_reference_name: None,
            mate_position: 0,
            template_length: 0,
            sequence: Vec::new(),
            alphabet: Alphabet::Dna,
            quality: None,
            tags: Vec::new(),
        }
    }

    /// Check if the unmapped flag is set.
    pub fn is_unmapped(&self) -> bool {
        self.flags & FLAG_UNMAPPED != 0
    }

    /// Check if the read is paired.
    pub fn is_paired(&self) -> bool {
        self.flags & FLAG_PAIRED != 0
    }

    /// Check if the read is a reverse complement.
    pub fn is_reverse_complement(&self) -> bool {
        self.flags & FLAG_REVERSE != 0
    }

    /// Whether the record has a reference and a position (regardless of flags).
    pub fn is_placed(&self) -> bool {
        self.position >= 1 && self.reference_name.as_deref().map_or(false, |n| n != "*")
    }

    /// Whether the record counts as mapped for indexing: placed and not
    /// flagged unmapped.
    pub fn is_mapped(&self) -> bool {
        self.is_placed() && !self.is_unmapped()
    }

    /// 0-based start of the alignment.
    pub fn alignment_start(&self) -> Option<u64> {
        self.position.checked_sub(1).map(u64::from)
    }

    /// 0-based exclusive end of the alignment.
    ///
    /// The span is the CIGAR's reference length, or 1 when the CIGAR
    /// consumes no reference bases.
    pub fn alignment_end(&self) -> Option<u64> {
        let span: u64 = self
            .cigar
            .iter()
            .filter(|op| op.consumes_reference())
            .map(|op| u64::from(op.length()))
            .sum();
        self.alignment_start().map(|start| start + span.max(1))
    }

    /// BAI bin stored in the record.
    pub fn bin(&self) -> u16 {
        match (self.alignment_start(), self.alignment_end()) {
            (Some(start), Some(end)) if end <= MAX_INDEXED_POSITION => reg2bin(start, end),
            _ => UNPLACED_BIN,
        }
    }

    /// Get sequence length.
    pub fn sequence_length(&self) -> usize {
        self.sequence.len()
    }
}

impl Default for AlignmentRecord {
    fn default() -> Self {
        Self::new("*")
    }
}

fn too_large(field: &'static str, size: usize, max: usize) -> BamEncodeError {
    BamEncodeError::FieldTooLarge { field, size, max }
}

fn checked_position(position: u32, field: &'static str) -> std::result::Result<i32, BamEncodeError> {
    if position as u64 > i32::MAX as u64 {
        return Err(too_large(field, position as usize, i32::MAX as usize));
    }
    Ok(position as i32 - 1)
}

/// Fields resolved during validation and reused while writing.
struct Prepared<'a> {
    record: &'a AlignmentRecord,
    block_size: usize,
    reference_id: i32,
    mate_reference_id: i32,
    pos: i32,
    mate_pos: i32,
    quality: Option<&'a [u8]>,
}

fn prepare<'a>(record: &'a AlignmentRecord, session: &Session) -> std::result::Result<Prepared<'a>, BamEncodeError> {
    record.alphabet.ensure_dna()?;

    let name_len = record.query_name.len();
    if name_len > MAX_QUERY_NAME_LENGTH {
        return Err(too_large("query name", name_len, MAX_QUERY_NAME_LENGTH));
    }

    if record.cigar.len() > MAX_CIGAR_OPS {
        return Err(too_large("CIGAR operations", record.cigar.len(), MAX_CIGAR_OPS));
    }
    if let Some(op) = record.cigar.iter().find(|op| op.length() > MAX_OP_LENGTH) {
        return Err(too_large(
            "CIGAR operation length",
            op.length() as usize,
            MAX_OP_LENGTH as usize,
        ));
    }

    let l_seq = record.sequence.len();
    if l_seq > i32::MAX as usize {
        return Err(too_large("sequence", l_seq, i32::MAX as usize));
    }

    let quality = match record.quality.as_deref() {
        None | Some([]) => None,
        Some(q) if q.len() != l_seq => {
            return Err(BamEncodeError::QualityLengthMismatch {
                sequence: l_seq,
                quality: q.len(),
            })
        }
        Some(q) if q.iter().all(|&b| b == MISSING_QUALITY) => {
            return Err(BamEncodeError::ReservedQuality { length: q.len() })
        }
        Some(q) => Some(q),
    };

    if let Some(end) = record.alignment_end() {
        if end > MAX_INDEXED_POSITION {
            return Err(too_large(
                "alignment end",
                end as usize,
                MAX_INDEXED_POSITION as usize,
            ));
        }
    }

    let reference_id = session.reference_id(record.reference_name.as_deref())?;
    let mate_reference_id =
        session.mate_reference_id(record.mate_reference_name.as_deref(), reference_id)?;
    let pos = checked_position(record.position, "position")?;
    let mate_pos = checked_position(record.mate_position, "mate position")?;

    let mut tags_size = 0usize;
    for tag in &record.tags {
        tags_size += tag.encoded_size()?;
    }

    let block_size = FIXED_FIELDS_SIZE
        + name_len
        + 1
        + 4 * record.cigar.len()
        + l_seq.div_ceil(2)
        + l_seq
        + tags_size;
    if block_size > i32::MAX as usize {
        return Err(too_large("record", block_size, i32::MAX as usize));
    }

    Ok(Prepared {
        record,
        block_size,
        reference_id,
        mate_reference_id,
        pos,
        mate_pos,
        quality,
    })
}

/// Total encoded size of `record`, including the 4-byte `block_size` field.
///
/// Runs the same validation as [`encode_record`].
pub fn encoded_size(record: &AlignmentRecord, session: &Session) -> Result<usize> {
    Ok(prepare(record, session)?.block_size + 4)
}

/// Append the binary form of `record` to `buf`.
///
/// The record is validated completely before the first byte is appended;
/// on error `buf` is left as it was.
///
/// # Example
///
/// ```
/// use bamforge::io::bam::{decode_record, encode_record, AlignmentRecord, CigarOp};
/// use bamforge::io::bam::{Header, Reference, Session};
///
/// # fn main() -> bamforge::Result<()> {
/// let header = Header::new("", vec![Reference::new("chr1", 10_000)]);
/// let session = Session::new(&header);
///
/// let mut record = AlignmentRecord::new("read1");
/// record.flags = 0;
/// record.reference_name = Some("chr1".to_string());
/// record.position = 100;
/// record.mapq = 60;
/// record.cigar = vec![CigarOp::Match(4)];
/// record.sequence = b"ACGT".to_vec();
/// record.quality = Some(vec![30, 31, 32, 33]);
///
/// let mut buf = Vec::new();
/// encode_record(&record, &session, &mut buf)?;
/// assert_eq!(decode_record(&buf, &session)?, record);
/// # Ok(())
/// # }
/// ```
pub fn encode_record(record: &AlignmentRecord, session: &Session, buf: &mut Vec<u8>) -> Result<()> {
    let prepared = prepare(record, session)?;
    let start = buf.len();
    buf.reserve(prepared.block_size + 4);

    if let Err(e) = write_prepared(&prepared, buf) {
        buf.truncate(start);
        return Err(e.into());
    }
    debug_assert_eq!(buf.len() - start, prepared.block_size + 4);
    Ok(())
}

fn write_prepared(p: &Prepared<'_>, buf: &mut Vec<u8>) -> std::result::Result<(), BamEncodeError> {
    let record = p.record;
    let l_read_name = record.query_name.len() + 1;
    let bin_mq_nl = (u32::from(record.bin()) << 16) | (u32::from(record.mapq) << 8) | l_read_name as u32;
    let flag_nc = (u32::from(record.flags) << 16) | record.cigar.len() as u32;

    buf.extend_from_slice(&(p.block_size as i32).to_le_bytes());
    buf.extend_from_slice(&p.reference_id.to_le_bytes());
    buf.extend_from_slice(&p.pos.to_le_bytes());
    buf.extend_from_slice(&bin_mq_nl.to_le_bytes());
    buf.extend_from_slice(&flag_nc.to_le_bytes());
    buf.extend_from_slice(&(record.sequence.len() as i32).to_le_bytes());
    buf.extend_from_slice(&p.mate_reference_id.to_le_bytes());
    buf.extend_from_slice(&p.mate_pos.to_le_bytes());
    buf.extend_from_slice(&record.template_length.to_le_bytes());

    buf.extend_from_slice(record.query_name.as_bytes());
    buf.push(0);

    for op in &record.cigar {
        buf.extend_from_slice(&encode_cigar_op(op));
    }

    encode_sequence(&record.sequence, buf);

    match p.quality {
        Some(q) => buf.extend_from_slice(q),
        None => buf.resize(buf.len() + record.sequence.len(), MISSING_QUALITY),
    }

    for tag in &record.tags {
        encode_tag(tag, buf)?;
    }

    Ok(())
}

fn insufficient(context: &'static str, expected: usize, data: &[u8], cursor: usize) -> BamDecodeError {
    BamDecodeError::UnexpectedEof {
        context,
        expected,
        actual: data.len().saturating_sub(cursor),
    }
}

fn read_i32_le(data: &[u8], cursor: &mut usize) -> std::result::Result<i32, BamDecodeError> {
    let bytes = data
        .get(*cursor..*cursor + 4)
        .ok_or_else(|| insufficient("record field", 4, data, *cursor))?;
    *cursor += 4;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u16_le(data: &[u8], cursor: &mut usize) -> std::result::Result<u16, BamDecodeError> {
    let bytes = data
        .get(*cursor..*cursor + 2)
        .ok_or_else(|| insufficient("record field", 2, data, *cursor))?;
    *cursor += 2;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u8(data: &[u8], cursor: &mut usize) -> std::result::Result<u8, BamDecodeError> {
    let value = *data
        .get(*cursor)
        .ok_or_else(|| insufficient("record field", 1, data, *cursor))?;
    *cursor += 1;
    Ok(value)
}

fn take<'a>(
    data: &'a [u8],
    cursor: &mut usize,
    len: usize,
    context: &'static str,
) -> std::result::Result<&'a [u8], BamDecodeError> {
    let end = cursor
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| insufficient(context, len, data, *cursor))?;
    let slice = &data[*cursor..end];
    *cursor = end;
    Ok(slice)
}

fn decode_position(pos: i32) -> u32 {
    if pos < 0 {
        0
    } else {
        pos as u32 + 1
    }
}

/// Decode one record from `data`, which starts at its `block_size` field.
///
/// Bytes past `block_size` are ignored. The stored bin is not checked.
pub fn decode_record(data: &[u8], session: &Session) -> Result<AlignmentRecord> {
    let mut cursor = 0;

    let block_size = read_i32_le(data, &mut cursor)?;
    if block_size < 0 {
        return Err(BamDecodeError::NegativeLength {
            field: "block",
            length: block_size,
        }
        .into());
    }
    let data = take(data, &mut cursor, block_size as usize, "record")?;
    if data.len() < FIXED_FIELDS_SIZE {
        return Err(insufficient("record", FIXED_FIELDS_SIZE, data, 0).into());
    }

    let mut cursor = 0;
    let ref_id = read_i32_le(data, &mut cursor)?;
    let pos = read_i32_le(data, &mut cursor)?;

    let l_read_name = read_u8(data, &mut cursor)?;
    if l_read_name == 0 {
        return Err(BamDecodeError::InvalidReadNameLength {
            length: l_read_name,
            offset: cursor - 1,
        }
        .into());
    }

    let mapq = read_u8(data, &mut cursor)?;
    let _bin = read_u16_le(data, &mut cursor)?;
    let n_cigar_op = read_u16_le(data, &mut cursor)? as usize;
    let flags = read_u16_le(data, &mut cursor)?;

    let l_seq = read_i32_le(data, &mut cursor)?;
    if l_seq < 0 {
        return Err(BamDecodeError::NegativeLength {
            field: "sequence",
            length: l_seq,
        }
        .into());
    }
    let l_seq = l_seq as usize;

    let next_ref_id = read_i32_le(data, &mut cursor)?;
    let next_pos = read_i32_le(data, &mut cursor)?;
    let template_length = read_i32_le(data, &mut cursor)?;

    let name_offset = cursor;
    let name_bytes = take(data, &mut cursor, l_read_name as usize, "read name")?;
    let query_name = match name_bytes.split_last() {
        Some((&0, name)) => String::from_utf8(name.to_vec()).map_err(|source| BamDecodeError::InvalidUtf8 {
            field: "read name",
            source,
        })?,
        _ => {
            return Err(BamDecodeError::MissingNulTerminator {
                field: "read name",
                offset: name_offset,
            }
            .into())
        }
    };

    let cigar_bytes = take(data, &mut cursor, n_cigar_op * 4, "CIGAR")?;
    let cigar = parse_cigar(cigar_bytes, n_cigar_op)?;

    let seq_bytes = take(data, &mut cursor, l_seq.div_ceil(2), "sequence")?;
    let sequence = decode_sequence(seq_bytes, l_seq)?;

    let quality_bytes = take(data, &mut cursor, l_seq, "quality scores")?;
    let quality = if quality_bytes.is_empty() || quality_bytes.iter().all(|&b| b == MISSING_QUALITY) {
        None
    } else {
        Some(quality_bytes.to_vec())
    };

    let tags = parse_tags(&data[cursor..])?;

    Ok(AlignmentRecord {
        query_name,
        flags,
        reference_name: session.reference_name(ref_id, "read")?.map(str::to_string),
        position: decode_position(pos),
        mapq,
        cigar,
        mate_reference_name: session.reference_name(next_ref_id, "mate")?.map(str::to_string),
        mate_position: decode_position(next_pos),
        template_length,
        sequence,
        alphabet: Alphabet::Dna,
        quality,
        tags,
    })
}

/// Read a record's `block_size` field.
///
/// Returns `Ok(None)` when the stream ends before the first byte.
pub(crate) fn read_block_size<R: Read>(reader: &mut R) -> Result<Option<usize>> {
    let mut block_size_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        match reader.read(&mut block_size_bytes[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a record's block_size field",
                )
                .into())
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    let block_size = i32::from_le_bytes(block_size_bytes);
    if block_size < 0 {
        return Err(BamDecodeError::NegativeLength {
            field: "block",
            length: block_size,
        }
        .into());
    }
    Ok(Some(block_size as usize))
}

/// Read the rest of a record whose `block_size` was just read, into `buf`.
pub(crate) fn read_record_body<R: Read>(reader: &mut R, block_size: usize, buf: &mut Vec<u8>) -> Result<()> {
    buf.clear();
    buf.extend_from_slice(&(block_size as i32).to_le_bytes());
    buf.resize(block_size + 4, 0);
    reader.read_exact(&mut buf[4..])?;
    Ok(())
}

/// Read a single BAM record from a reader.
///
/// Returns `Ok(None)` on a clean end of stream (no bytes of a new record).
pub fn read_record<R: Read>(reader: &mut R, session: &Session) -> Result<Option<AlignmentRecord>> {
    let Some(block_size) = read_block_size(reader)? else {
        return Ok(None);
    };
    let mut record_data = Vec::new();
    read_record_body(reader, block_size, &mut record_data)?;
    decode_record(&record_data, session).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BamforgeError;
    use crate::io::bam::header::{Header, Reference};
    use crate::io::bam::tags::{ArrayValue, TagValue};
    use std::io::Cursor;

    fn session() -> Session {
        Session::new(&Header::new(
            "",
            vec![Reference::new("chr1", 1_000_000), Reference::new("chr2", 500_000)],
        ))
    }

    fn mapped(name: &str, reference: &str, position: u32) -> AlignmentRecord {
        let mut record = AlignmentRecord::new(name);
        record.flags = 0;
        record.reference_name = Some(reference.to_string());
        record.position = position;
        record.mapq = 60;
        record.cigar = vec![CigarOp::Match(4)];
        record.sequence = b"ACGT".to_vec();
        record.quality = Some(vec![10, 20, 30, 40]);
        record
    }

    fn encode(record: &AlignmentRecord) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_record(record, &session(), &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_record_flags() {
        let mut record = AlignmentRecord::new("r");
        assert!(record.is_unmapped());
        assert!(!record.is_mapped());

        record.flags = FLAG_PAIRED;
        assert!(record.is_paired());
        assert!(!record.is_unmapped());

        record.flags = FLAG_REVERSE;
        assert!(record.is_reverse_complement());
    }

    #[test]
    fn test_fixed_field_layout() {
        let record = mapped("test", "chr2", 101);
        let buf = encode(&record);

        assert_eq!(i32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize, buf.len() - 4);
        assert_eq!(i32::from_le_bytes(buf[4..8].try_into().unwrap()), 1);
        assert_eq!(i32::from_le_bytes(buf[8..12].try_into().unwrap()), 100);
        assert_eq!(buf[12], 5); // l_read_name
        assert_eq!(buf[13], 60); // mapq
        assert_eq!(u16::from_le_bytes([buf[14], buf[15]]), reg2bin(100, 104));
        assert_eq!(u16::from_le_bytes([buf[16], buf[17]]), 1); // n_cigar_op
        assert_eq!(i32::from_le_bytes(buf[20..24].try_into().unwrap()), 4); // l_seq
        assert_eq!(i32::from_le_bytes(buf[24..28].try_into().unwrap()), -1);
        assert_eq!(i32::from_le_bytes(buf[28..32].try_into().unwrap()), -1);
        assert_eq!(&buf[36..41], b"test\0");
        assert_eq!(&buf[41..45], &64u32.to_le_bytes());
        assert_eq!(&buf[45..47], &[0x12, 0x48]);
        assert_eq!(&buf[47..51], &[10, 20, 30, 40]);
        assert_eq!(buf.len(), 51);
        assert_eq!(encoded_size(&record, &session()).unwrap(), 51);
    }

    #[test]
    fn test_round_trip_full_record() {
        let mut record = mapped("pair/1", "chr1", 1000);
        record.flags = FLAG_PAIRED | FLAG_PROPER_PAIR | FLAG_REVERSE;
        record.cigar = vec![
            CigarOp::SoftClip(2),
            CigarOp::Match(10),
            CigarOp::Insertion(1),
            CigarOp::Deletion(3),
            CigarOp::RefSkip(100),
            CigarOp::SeqMatch(2),
            CigarOp::SeqMismatch(1),
            CigarOp::Padding(1),
            CigarOp::HardClip(5),
        ];
        record.sequence = b"=ACMGRSVTWYHKDBN".to_vec();
        record.quality = Some((0..16).collect());
        record.mate_reference_name = Some("chr2".to_string());
        record.mate_position = 5000;
        record.template_length = -250;
        record.tags = vec![
            Tag::new(*b"NM", TagValue::Int(3)),
            Tag::new(*b"RG", TagValue::String("grp".to_string())),
            Tag::new(*b"XB", TagValue::Array(ArrayValue::Float(vec![1.0, 2.5]))),
        ];

        let buf = encode(&record);
        assert_eq!(decode_record(&buf, &session()).unwrap(), record);
    }

    #[test]
    fn test_unmapped_record() {
        let mut record = AlignmentRecord::new("lonely");
        record.sequence = b"ACGTN".to_vec();

        let buf = encode(&record);
        assert_eq!(i32::from_le_bytes(buf[4..8].try_into().unwrap()), -1);
        assert_eq!(i32::from_le_bytes(buf[8..12].try_into().unwrap()), -1);
        assert_eq!(u16::from_le_bytes([buf[14], buf[15]]), UNPLACED_BIN);
        assert!(buf[buf.len() - 5..].iter().all(|&b| b == MISSING_QUALITY));

        let decoded = decode_record(&buf, &session()).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.quality, None);
    }

    #[test]
    fn test_mate_same_reference() {
        let mut record = mapped("r", "chr2", 10);
        record.mate_reference_name = Some("=".to_string());
        record.mate_position = 50;

        let decoded = decode_record(&encode(&record), &session()).unwrap();
        assert_eq!(decoded.mate_reference_name.as_deref(), Some("chr2"));
        assert_eq!(decoded.mate_position, 50);
    }

    #[test]
    fn test_case_insensitive_reference() {
        let record = mapped("r", "CHR1", 10);
        let decoded = decode_record(&encode(&record), &session()).unwrap();
        assert_eq!(decoded.reference_name.as_deref(), Some("chr1"));
    }

    #[test]
    fn test_errors_leave_buffer_untouched() {
        let session = session();
        let mut buf = vec![1, 2, 3];

        let mut record = mapped("r", "chr9", 10);
        assert!(matches!(
            encode_record(&record, &session, &mut buf),
            Err(BamforgeError::Encode(BamEncodeError::UnknownReference { .. }))
        ));

        record.reference_name = Some("chr1".to_string());
        record.alphabet = Alphabet::Protein;
        assert!(matches!(
            encode_record(&record, &session, &mut buf),
            Err(BamforgeError::Encode(BamEncodeError::UnsupportedAlphabet { .. }))
        ));

        record.alphabet = Alphabet::Dna;
        record.tags = vec![Tag::new(*b"XI", TagValue::Int(1 << 40))];
        assert!(matches!(
            encode_record(&record, &session, &mut buf),
            Err(BamforgeError::Encode(BamEncodeError::IntegerOutOfRange { .. }))
        ));

        record.tags.clear();
        record.quality = Some(vec![1, 2]);
        assert!(matches!(
            encode_record(&record, &session, &mut buf),
            Err(BamforgeError::Encode(BamEncodeError::QualityLengthMismatch { sequence: 4, quality: 2 }))
        ));

        record.quality = None;
        record.query_name = "n".repeat(255);
        assert!(matches!(
            encode_record(&record, &session, &mut buf),
            Err(BamforgeError::Encode(BamEncodeError::FieldTooLarge { field: "query name", .. }))
        ));

        record.query_name = "r".to_string();
        record.cigar = vec![CigarOp::Match(1); MAX_CIGAR_OPS + 1];
        assert!(encode_record(&record, &session, &mut buf).is_err());

        assert_eq!(buf, vec![1, 2, 3]);
    }

    #[test]
    fn test_empty_quality_is_absent() {
        let mut record = mapped("r", "chr1", 1);
        record.quality = Some(Vec::new());
        let decoded = decode_record(&encode(&record), &session()).unwrap();
        assert_eq!(decoded.quality, None);
    }

    #[test]
    fn test_all_reserved_quality_is_rejected() {
        let mut record = mapped("r", "chr1", 1);
        record.quality = Some(vec![0xFF; 4]);
        let mut buf = Vec::new();
        assert!(matches!(
            encode_record(&record, &session(), &mut buf),
            Err(BamforgeError::Encode(BamEncodeError::ReservedQuality { length: 4 }))
        ));
        assert!(buf.is_empty());

        // A single 0xFF among real scores is kept
        record.quality = Some(vec![0xFF, 0xFF, 0xFF, 30]);
        let decoded = decode_record(&encode(&record), &session()).unwrap();
        assert_eq!(decoded.quality, record.quality);
    }

    #[test]
    fn test_alignment_end() {
        let mut record = mapped("r", "chr1", 101);
        record.cigar = vec![CigarOp::SoftClip(5), CigarOp::Match(10), CigarOp::Deletion(2)];
        assert_eq!(record.alignment_start(), Some(100));
        assert_eq!(record.alignment_end(), Some(112));

        record.cigar = vec![CigarOp::Insertion(4)];
        assert_eq!(record.alignment_end(), Some(101));

        record.position = 0;
        assert_eq!(record.alignment_end(), None);
        assert_eq!(record.bin(), UNPLACED_BIN);
    }

    #[test]
    fn test_read_record_stream() {
        let session = session();
        let mut buf = Vec::new();
        encode_record(&mapped("a", "chr1", 1), &session, &mut buf).unwrap();
        encode_record(&mapped("b", "chr2", 2), &session, &mut buf).unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_record(&mut cursor, &session).unwrap().unwrap().query_name, "a");
        assert_eq!(read_record(&mut cursor, &session).unwrap().unwrap().query_name, "b");
        assert!(read_record(&mut cursor, &session).unwrap().is_none());
    }

    #[test]
    fn test_read_record_truncated() {
        let session = session();
        let buf = encode(&mapped("a", "chr1", 1));

        let mut cursor = Cursor::new(buf[..buf.len() - 3].to_vec());
        assert!(read_record(&mut cursor, &session).unwrap_err().is_io());

        let mut cursor = Cursor::new(buf[..2].to_vec());
        assert!(read_record(&mut cursor, &session).unwrap_err().is_io());
    }

    #[test]
    fn test_decode_invalid_reference_id() {
        let mut buf = encode(&mapped("a", "chr1", 1));
        buf[4..8].copy_from_slice(&7i32.to_le_bytes());
        assert!(matches!(
            decode_record(&buf, &session()),
            Err(BamforgeError::Decode(BamDecodeError::InvalidReferenceId { value: 7, .. }))
        ));
    }

    #[test]
    fn test_decode_zero_name_length() {
        let mut buf = encode(&mapped("a", "chr1", 1));
        buf[12] = 0;
        assert!(matches!(
            decode_record(&buf, &session()),
            Err(BamforgeError::Decode(BamDecodeError::InvalidReadNameLength { .. }))
        ));
    }

    #[test]
    fn test_decode_missing_name_terminator() {
        let mut buf = encode(&mapped("abc", "chr1", 1));
        buf[36 + 3] = b'x';
        assert!(matches!(
            decode_record(&buf, &session()),
            Err(BamforgeError::Decode(BamDecodeError::MissingNulTerminator { .. }))
        ));
    }

    #[test]
    fn test_decode_short_block() {
        let mut buf = encode(&mapped("a", "chr1", 1));
        buf.truncate(20);
        assert!(matches!(
            decode_record(&buf, &session()),
            Err(BamforgeError::Decode(BamDecodeError::UnexpectedEof { .. }))
        ));
    }
}
