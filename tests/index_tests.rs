//! Integration tests for BAI index building and storage
//!
//! These tests validate that the index implementation:
//! - Computes bins the way samtools does
//! - Round-trips through the `.bai` layout, including the metadata pseudo-bin
//! - Keeps unmapped records out of bins and the linear index

use bamforge::io::bam::index::{METADATA_BIN, UNPLACED_BIN};
use bamforge::io::bam::{
    read_index, reg2bin, write_index, AlignmentRecord, FileIndex, IndexBuilder, Reference, Session,
};
use bamforge::io::bam::Header;
use bamforge::{BamforgeError, Result, VirtualOffset};
use proptest::prelude::*;
use std::io::Cursor;

fn offset(compressed: u64, within: u16) -> VirtualOffset {
    VirtualOffset::new(compressed, within)
}

fn round_trip(index: &FileIndex) -> Result<FileIndex> {
    let mut bytes = Vec::new();
    write_index(&mut bytes, index)?;
    read_index(&mut Cursor::new(bytes))
}

#[test]
fn test_whole_genome_is_bin_zero() {
    assert_eq!(reg2bin(0, 1 << 29), 0);
    assert_eq!(reg2bin(0, 248_956_422), 0);
}

#[test]
fn test_empty_index_round_trip() -> Result<()> {
    let index = IndexBuilder::new(3).freeze();
    for reference in &index.references {
        assert!(reference.bins.is_empty());
        assert!(reference.intervals.is_empty());
        assert!(reference.metadata.is_none());
    }

    let read_back = round_trip(&index)?;
    assert_eq!(read_back, index);
    assert_eq!(read_back.unplaced_unmapped, Some(0));
    Ok(())
}

#[test]
fn test_metadata_round_trip() -> Result<()> {
    let mut builder = IndexBuilder::new(1);
    let mut position = 0u64;
    let mut step = |len: u16| {
        let start = offset(0, (position * 100) as u16);
        position += 1;
        (start, offset(0, start.uncompressed_offset() + len))
    };

    for i in 0..5u64 {
        let (start, end) = step(100);
        builder.add_record(Some(0), i * 20_000, i * 20_000 + 100, true, start, end)?;
    }
    for _ in 0..3 {
        let (start, end) = step(100);
        builder.add_record(Some(0), 0, 0, false, start, end)?;
    }

    let index = builder.freeze();
    let metadata = index.references[0].metadata.unwrap();
    assert_eq!((metadata.mapped, metadata.unmapped), (5, 3));
    assert_eq!(metadata.first_offset, offset(0, 0));
    assert_eq!(metadata.last_offset, offset(0, 500));

    let read_back = round_trip(&index)?;
    assert_eq!(read_back, index);
    let reference = &read_back.references[0];
    assert!(reference.bins.iter().all(|bin| bin.bin != METADATA_BIN));
    assert_eq!(reference.bins.len(), 5);
    assert_eq!(reference.metadata, Some(metadata));
    Ok(())
}

#[test]
fn test_unmapped_record_excluded_from_bins() -> Result<()> {
    let header = Header::new("", vec![Reference::new("chr1", 100_000)]);
    let session = Session::new(&header);

    // Flagged unmapped, position 0, but carrying a reference name
    let mut record = AlignmentRecord::new("u1");
    record.reference_name = Some("chr1".to_string());
    assert!(record.is_unmapped());
    assert_eq!(record.bin(), UNPLACED_BIN);

    let mut builder = IndexBuilder::new(1);
    builder.add_alignment(&record, &session, offset(0, 0), offset(0, 60))?;
    let index = builder.freeze();

    let reference = &index.references[0];
    assert!(reference.bins.is_empty());
    assert!(reference.intervals.is_empty());
    let metadata = reference.metadata.unwrap();
    assert_eq!((metadata.mapped, metadata.unmapped), (0, 1));
    assert_eq!(index.unplaced_unmapped, Some(0));
    Ok(())
}

#[test]
fn test_index_file_round_trip() -> Result<()> {
    let mut builder = IndexBuilder::new(2);
    builder.add_record(Some(1), 10, 60, true, offset(0, 0), offset(0, 90))?;
    builder.add_record(Some(1), 40_000, 40_050, true, offset(0, 90), offset(500, 10))?;
    builder.add_record(None, 0, 0, false, offset(500, 10), offset(500, 70))?;
    let index = builder.freeze();

    let file = tempfile::NamedTempFile::new()?;
    index.write_to_path(file.path())?;
    assert_eq!(FileIndex::from_path(file.path())?, index);

    // Window 1 back-fills from window 0
    let intervals = &index.references[1].intervals;
    assert_eq!(intervals, &vec![offset(0, 0), offset(0, 0), offset(0, 90)]);
    Ok(())
}

#[test]
fn test_truncated_index_is_corrupt() -> Result<()> {
    let mut builder = IndexBuilder::new(1);
    builder.add_record(Some(0), 0, 10, true, offset(0, 0), offset(0, 40))?;
    let mut bytes = Vec::new();
    write_index(&mut bytes, &builder.freeze())?;
    bytes.truncate(bytes.len() - 12);

    assert!(matches!(
        read_index(&mut Cursor::new(bytes)),
        Err(BamforgeError::CorruptIndex(_))
    ));
    Ok(())
}

proptest! {
    #[test]
    fn test_reg2bin_genome_length_is_zero(length in ((1u64 << 26) + 1)..=(1 << 29)) {
        prop_assert_eq!(reg2bin(0, length), 0);
    }

    #[test]
    fn test_reg2bin_single_window_is_leaf(window in 0u64..(1 << 15), a in 0u64..(1 << 14), b in 0u64..(1 << 14)) {
        let (lo, hi) = (a.min(b), a.max(b));
        let start = (window << 14) + lo;
        let end = (window << 14) + hi + 1;
        prop_assert!(reg2bin(start, end) >= 4681);
    }
}
