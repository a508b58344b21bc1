//! BAI serialization.
//!
//! # Format
//!
//! ```text
//! - Magic: "BAI\1" (4 bytes)
//! - n_ref (int32)
//! - For each reference:
//!   - n_bin (int32), counting the metadata pseudo-bin when present
//!   - For each bin:
//!     - bin (uint32)
//!     - n_chunk (int32)
//!     - chunks: (chunk_beg uint64, chunk_end uint64) * n_chunk
//!   - Metadata pseudo-bin (bin 37450, n_chunk 2):
//!     - first offset, last offset (uint64 each)
//!     - mapped count, unmapped count (uint64 each)
//!   - n_intv (int32)
//!   - ioffset (uint64) * n_intv
//! - n_no_coor (uint64, optional)
//! ```

use super::index::{Bin, Chunk, FileIndex, ReferenceIndex, ReferenceMetadata, MAX_BIN, METADATA_BIN};
use crate::error::{BamforgeError, Result};
use crate::io::compression::VirtualOffset;
use log::debug;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// BAI file format magic string
pub const BAI_MAGIC: &[u8; 4] = b"BAI\x01";

/// Chunk count the metadata pseudo-bin always declares.
const METADATA_CHUNK_COUNT: i32 = 2;

fn corrupt(message: impl Into<String>) -> BamforgeError {
    BamforgeError::CorruptIndex(message.into())
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            corrupt(format!("stream ended while reading {}", what))
        } else {
            BamforgeError::Io(e)
        }
    })
}

fn read_i32<R: Read>(reader: &mut R, what: &str) -> Result<i32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf, what)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R, what: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf, what)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R, what: &str) -> Result<u64> {
    let mut buf = [0u8; 8];
    read_exact(reader, &mut buf, what)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_count<R: Read>(reader: &mut R, what: &str) -> Result<usize> {
    let count = read_i32(reader, what)?;
    usize::try_from(count).map_err(|_| corrupt(format!("negative {}: {}", what, count)))
}

fn read_offset<R: Read>(reader: &mut R, what: &str) -> Result<VirtualOffset> {
    read_u64(reader, what).map(VirtualOffset::from_raw)
}

fn write_count<W: Write>(writer: &mut W, count: usize, what: &str) -> Result<()> {
    let count = i32::try_from(count)
        .map_err(|_| BamforgeError::InvalidArgument(format!("too many {}: {}", what, count)))?;
    writer.write_all(&count.to_le_bytes())?;
    Ok(())
}

fn write_offset<W: Write>(writer: &mut W, offset: VirtualOffset) -> Result<()> {
    writer.write_all(&offset.to_le_bytes())?;
    Ok(())
}

/// Serialize `index` in BAI layout.
pub fn write_index<W: Write>(writer: &mut W, index: &FileIndex) -> Result<()> {
    writer.write_all(BAI_MAGIC)?;
    write_count(writer, index.references.len(), "references")?;

    for reference in &index.references {
        let n_bin = reference.bins.len() + usize::from(reference.metadata.is_some());
        write_count(writer, n_bin, "bins")?;

        for bin in &reference.bins {
            if bin.bin > MAX_BIN {
                return Err(BamforgeError::InvalidArgument(format!(
                    "bin {} is outside the regular bin range",
                    bin.bin
                )));
            }
            writer.write_all(&bin.bin.to_le_bytes())?;
            write_count(writer, bin.chunks.len(), "chunks")?;
            for chunk in &bin.chunks {
                write_offset(writer, chunk.start)?;
                write_offset(writer, chunk.end)?;
            }
        }

        if let Some(metadata) = &reference.metadata {
            writer.write_all(&METADATA_BIN.to_le_bytes())?;
            writer.write_all(&METADATA_CHUNK_COUNT.to_le_bytes())?;
            write_offset(writer, metadata.first_offset)?;
            write_offset(writer, metadata.last_offset)?;
            writer.write_all(&metadata.mapped.to_le_bytes())?;
            writer.write_all(&metadata.unmapped.to_le_bytes())?;
        }

        write_count(writer, reference.intervals.len(), "intervals")?;
        for &offset in &reference.intervals {
            write_offset(writer, offset)?;
        }
    }

    if let Some(count) = index.unplaced_unmapped {
        writer.write_all(&count.to_le_bytes())?;
    }

    Ok(())
}

fn read_reference<R: Read>(reader: &mut R) -> Result<ReferenceIndex> {
    let mut reference = ReferenceIndex::default();

    let n_bin = read_count(reader, "bin count")?;
    for _ in 0..n_bin {
        let bin_number = read_u32(reader, "bin number")?;
        let n_chunk = read_count(reader, "chunk count")?;

        if bin_number == METADATA_BIN {
            if n_chunk != METADATA_CHUNK_COUNT as usize {
                return Err(corrupt(format!(
                    "metadata bin declares {} chunks instead of {}",
                    n_chunk, METADATA_CHUNK_COUNT
                )));
            }
            reference.metadata = Some(ReferenceMetadata {
                first_offset: read_offset(reader, "metadata offset")?,
                last_offset: read_offset(reader, "metadata offset")?,
                mapped: read_u64(reader, "mapped count")?,
                unmapped: read_u64(reader, "unmapped count")?,
            });
            continue;
        }

        if bin_number > METADATA_BIN {
            return Err(corrupt(format!("bin number {} exceeds {}", bin_number, METADATA_BIN)));
        }

        let mut bin = Bin::new(bin_number);
        for _ in 0..n_chunk {
            let start = read_offset(reader, "chunk start")?;
            let end = read_offset(reader, "chunk end")?;
            bin.chunks.push(Chunk::new(start, end));
        }
        reference.bins.push(bin);
    }

    let n_intv = read_count(reader, "interval count")?;
    for _ in 0..n_intv {
        reference.intervals.push(read_offset(reader, "linear index")?);
    }

    Ok(reference)
}

/// Read the optional trailing `n_no_coor` field.
fn read_unplaced_count<R: Read>(reader: &mut R) -> Result<Option<u64>> {
    let mut buf = [0u8; 8];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    match filled {
        0 => Ok(None),
        8 => Ok(Some(u64::from_le_bytes(buf))),
        n => Err(corrupt(format!("{} trailing bytes after the last reference", n))),
    }
}

/// Deserialize a BAI stream.
///
/// # Errors
///
/// [`BamforgeError::CorruptIndex`] for a bad magic, a bin number above
/// 37450, a metadata bin without exactly two chunks, negative counts, or a
/// stream ending early. Other I/O failures pass through as
/// [`BamforgeError::Io`].
pub fn read_index<R: Read>(reader: &mut R) -> Result<FileIndex> {
    let mut magic = [0u8; 4];
    read_exact(reader, &mut magic, "magic")?;
    if &magic != BAI_MAGIC {
        return Err(corrupt(format!(
            "invalid BAI magic: expected {:?}, got {:?}",
            BAI_MAGIC, magic
        )));
    }

    let n_ref = read_count(reader, "reference count")?;
    // Cap the pre-allocation; a corrupt count should fail on read, not on alloc.
    let mut references = Vec::with_capacity(n_ref.min(1 << 16));
    for _ in 0..n_ref {
        references.push(read_reference(reader)?);
    }

    let unplaced_unmapped = read_unplaced_count(reader)?;
    debug!("Read BAI index with {} references", references.len());

    Ok(FileIndex {
        references,
        unplaced_unmapped,
    })
}

impl FileIndex {
    /// Load a BAI index from a file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        read_index(&mut reader)
    }

    /// Write this index to a file in BAI layout
    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        write_index(&mut writer, self)?;
        writer.flush()?;
        debug!("Wrote BAI index to {}", path.as_ref().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::bam::index::IndexBuilder;
    use std::io::Cursor;

    fn vo(raw: u64) -> VirtualOffset {
        VirtualOffset::from_raw(raw)
    }

    fn encode(index: &FileIndex) -> Vec<u8> {
        let mut out = Vec::new();
        write_index(&mut out, index).unwrap();
        out
    }

    fn sample_index() -> FileIndex {
        let mut builder = IndexBuilder::new(2);
        builder.add_record(Some(0), 0, 100, true, vo(0), vo(70)).unwrap();
        builder.add_record(Some(0), 20_000, 20_100, true, vo(70), vo(140)).unwrap();
        builder.add_record(Some(1), 0, 0, false, vo(140), vo(200)).unwrap();
        builder.freeze()
    }

    #[test]
    fn test_round_trip() {
        let index = sample_index();
        assert_eq!(read_index(&mut Cursor::new(encode(&index))).unwrap(), index);
    }

    #[test]
    fn test_layout_of_empty_reference() {
        let index = FileIndex {
            references: vec![ReferenceIndex::default()],
            unplaced_unmapped: None,
        };
        let mut expected = b"BAI\x01".to_vec();
        expected.extend_from_slice(&1i32.to_le_bytes());
        expected.extend_from_slice(&0i32.to_le_bytes());
        expected.extend_from_slice(&0i32.to_le_bytes());
        assert_eq!(encode(&index), expected);
    }

    #[test]
    fn test_metadata_bin_layout() {
        let index = FileIndex {
            references: vec![ReferenceIndex {
                bins: Vec::new(),
                intervals: Vec::new(),
                metadata: Some(ReferenceMetadata {
                    first_offset: vo(1),
                    last_offset: vo(2),
                    mapped: 5,
                    unmapped: 3,
                }),
            }],
            unplaced_unmapped: Some(0),
        };
        let bytes = encode(&index);
        assert_eq!(&bytes[8..12], &1i32.to_le_bytes());
        assert_eq!(&bytes[12..16], &37450u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &2i32.to_le_bytes());
        assert_eq!(&bytes[36..44], &5u64.to_le_bytes());
        assert_eq!(&bytes[44..52], &3u64.to_le_bytes());

        let decoded = read_index(&mut Cursor::new(bytes)).unwrap();
        assert!(decoded.references[0].bins.is_empty());
        assert_eq!(decoded, index);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = encode(&sample_index());
        bytes[3] = 2;
        assert!(matches!(
            read_index(&mut Cursor::new(bytes)),
            Err(BamforgeError::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_bin_beyond_metadata() {
        let mut bytes = b"BAI\x01".to_vec();
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&37451u32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        assert!(matches!(
            read_index(&mut Cursor::new(bytes)),
            Err(BamforgeError::CorruptIndex(msg)) if msg.contains("37451")
        ));
    }

    #[test]
    fn test_metadata_with_wrong_chunk_count() {
        let mut bytes = b"BAI\x01".to_vec();
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&37450u32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        bytes.extend_from_slice(&0i32.to_le_bytes());
        assert!(matches!(
            read_index(&mut Cursor::new(bytes)),
            Err(BamforgeError::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_truncation_is_corrupt() {
        let bytes = encode(&sample_index());
        // Drop the n_no_coor field plus part of the last interval count
        let truncated = bytes[..bytes.len() - 10].to_vec();
        assert!(matches!(
            read_index(&mut Cursor::new(truncated)),
            Err(BamforgeError::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_partial_trailing_count_is_corrupt() {
        let mut bytes = encode(&FileIndex::default());
        bytes.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(
            read_index(&mut Cursor::new(bytes)),
            Err(BamforgeError::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_optional_unplaced_count() {
        let mut index = sample_index();
        index.unplaced_unmapped = None;
        let decoded = read_index(&mut Cursor::new(encode(&index))).unwrap();
        assert_eq!(decoded.unplaced_unmapped, None);
    }

    #[test]
    fn test_path_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.bam.bai");
        let index = sample_index();
        index.write_to_path(&path).unwrap();
        assert_eq!(FileIndex::from_path(&path).unwrap(), index);
    }
}
