//! BAI index structures and the single-pass index builder.
//!
//! # Binning Scheme
//!
//! 37,450 bins cover 512 Mbp in six levels:
//! - Level 0: 1 bin (512 Mbp)
//! - Level 1: 8 bins (64 Mbp each)
//! - Level 2: 64 bins (8 Mbp each)
//! - Level 3: 512 bins (1 Mbp each)
//! - Level 4: 4096 bins (128 Kbp each)
//! - Level 5: 32768 bins (16 Kbp each)
//!
//! Alongside the bins, each reference keeps a linear index: for every 16 Kbp
//! window, the smallest virtual offset of a record overlapping it.
//!
//! [`IndexBuilder`] sees records in write order together with the virtual
//! offsets before and after each one, and [`IndexBuilder::freeze`] turns the
//! accumulated state into an immutable [`FileIndex`].

use super::record::AlignmentRecord;
use super::session::Session;
use crate::error::{BamforgeError, Result};
use crate::io::compression::VirtualOffset;
use log::{debug, info};
use std::collections::HashMap;

/// Width of one linear-index window, as a shift (16 Kbp).
pub const LINEAR_WINDOW_SHIFT: u32 = 14;

/// Largest regular bin number.
pub const MAX_BIN: u32 = 37449;

/// Pseudo-bin holding per-reference metadata in the serialized index.
pub const METADATA_BIN: u32 = 37450;

/// Bin stored in records that have no position.
pub const UNPLACED_BIN: u16 = 4680;

/// Exclusive upper bound on indexable coordinates (2^29).
pub const MAX_INDEXED_POSITION: u64 = 1 << 29;

/// (shift, first bin of level) from the finest level to the coarsest.
const LEVELS: [(u32, u16); 5] = [(14, 4681), (17, 585), (20, 73), (23, 9), (26, 1)];

/// Smallest bin fully containing the 0-based half-open interval `[start, end)`.
///
/// Intervals reaching past 2^29 fall in bin 0.
///
/// # Example
///
/// ```
/// use bamforge::io::bam::index::reg2bin;
///
/// assert_eq!(reg2bin(0, 1 << 29), 0);
/// assert_eq!(reg2bin(0, 100), 4681);
/// assert_eq!(reg2bin(16_000, 17_000), 585);
/// ```
pub fn reg2bin(start: u64, end: u64) -> u16 {
    if end > MAX_INDEXED_POSITION {
        return 0;
    }
    let last = end.saturating_sub(1);
    for (shift, base) in LEVELS {
        if start >> shift == last >> shift {
            return base + (start >> shift) as u16;
        }
    }
    0
}

/// Contiguous range of the compressed file holding records of one bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Virtual offset of the first record
    pub start: VirtualOffset,
    /// Virtual offset just past the last record
    pub end: VirtualOffset,
}

impl Chunk {
    /// Create a new chunk
    pub fn new(start: VirtualOffset, end: VirtualOffset) -> Self {
        Self { start, end }
    }
}

/// A bin in the hierarchical binning index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bin {
    /// Bin number (0-37449)
    pub bin: u32,
    /// Chunks of data in this bin
    pub chunks: Vec<Chunk>,
}

impl Bin {
    /// Create an empty bin
    pub fn new(bin: u32) -> Self {
        Self {
            bin,
            chunks: Vec::new(),
        }
    }
}

/// Per-reference summary carried in the metadata pseudo-bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReferenceMetadata {
    /// Offset of the first mapped record
    pub first_offset: VirtualOffset,
    /// Offset just past the last mapped record
    pub last_offset: VirtualOffset,
    /// Number of mapped records
    pub mapped: u64,
    /// Number of unmapped records on this reference
    pub unmapped: u64,
}

/// Index data for one reference sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReferenceIndex {
    /// Bins in ascending bin order; never contains [`METADATA_BIN`]
    pub bins: Vec<Bin>,
    /// Linear index: one virtual offset per 16 Kbp window
    pub intervals: Vec<VirtualOffset>,
    /// Summary counts, present when any record touched this reference
    pub metadata: Option<ReferenceMetadata>,
}

impl ReferenceIndex {
    /// Look up a bin by number.
    pub fn bin(&self, bin: u32) -> Option<&Bin> {
        self.bins.iter().find(|b| b.bin == bin)
    }
}

/// Index for a whole file, one entry per dictionary reference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileIndex {
    /// Reference indices in header dictionary order
    pub references: Vec<ReferenceIndex>,
    /// Records with no reference (`n_no_coor`), when recorded
    pub unplaced_unmapped: Option<u64>,
}

impl FileIndex {
    /// Number of references.
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }
}

#[derive(Debug, Default)]
struct ReferenceBuilder {
    bins: Vec<Bin>,
    slots: HashMap<u32, usize>,
    intervals: Vec<Option<VirtualOffset>>,
    first_offset: Option<VirtualOffset>,
    last_offset: Option<VirtualOffset>,
    mapped: u64,
    unmapped: u64,
}

impl ReferenceBuilder {
    fn add_chunk(&mut self, bin: u32, chunk: Chunk) {
        let slot = *self.slots.entry(bin).or_insert_with(|| {
            self.bins.push(Bin::new(bin));
            self.bins.len() - 1
        });
        let chunks = &mut self.bins[slot].chunks;
        match chunks.last_mut() {
            Some(last) if last.end == chunk.start => last.end = chunk.end,
            _ => chunks.push(chunk),
        }
    }

    fn update_intervals(&mut self, start: u64, end: u64, offset: VirtualOffset) {
        let first = (start >> LINEAR_WINDOW_SHIFT) as usize;
        let last = (end.saturating_sub(1).max(start) >> LINEAR_WINDOW_SHIFT) as usize;
        if self.intervals.len() <= last {
            self.intervals.resize(last + 1, None);
        }
        for slot in &mut self.intervals[first..=last] {
            *slot = Some(match *slot {
                Some(existing) => existing.min(offset),
                None => offset,
            });
        }
    }

    fn freeze(mut self) -> ReferenceIndex {
        self.bins.sort_by_key(|bin| bin.bin);

        // Leading windows with no record get offset 0; interior gaps take the
        // nearest preceding offset.
        let mut previous = VirtualOffset::default();
        let intervals = self
            .intervals
            .into_iter()
            .map(|slot| {
                if let Some(offset) = slot {
                    previous = offset;
                }
                previous
            })
            .collect();

        let metadata = (self.mapped > 0 || self.unmapped > 0).then(|| ReferenceMetadata {
            first_offset: self.first_offset.unwrap_or_default(),
            last_offset: self.last_offset.unwrap_or_default(),
            mapped: self.mapped,
            unmapped: self.unmapped,
        });

        ReferenceIndex {
            bins: self.bins,
            intervals,
            metadata,
        }
    }
}

/// Accumulates bins, chunks, linear index and counts during one write pass.
///
/// # Example
///
/// ```
/// use bamforge::io::bam::IndexBuilder;
/// use bamforge::io::compression::VirtualOffset;
///
/// # fn main() -> bamforge::Result<()> {
/// let mut builder = IndexBuilder::new(1);
/// builder.add_record(Some(0), 100, 150, true, VirtualOffset::new(0, 0), VirtualOffset::new(0, 80))?;
/// builder.add_record(Some(0), 0, 0, false, VirtualOffset::new(0, 80), VirtualOffset::new(0, 150))?;
///
/// let index = builder.freeze();
/// let metadata = index.references[0].metadata.unwrap();
/// assert_eq!((metadata.mapped, metadata.unmapped), (1, 1));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct IndexBuilder {
    references: Vec<ReferenceBuilder>,
    unplaced_unmapped: u64,
    last_end: VirtualOffset,
}

impl IndexBuilder {
    /// Builder for a dictionary of `reference_count` references.
    pub fn new(reference_count: usize) -> Self {
        Self {
            references: (0..reference_count).map(|_| ReferenceBuilder::default()).collect(),
            unplaced_unmapped: 0,
            last_end: VirtualOffset::default(),
        }
    }

    /// Record one alignment occupying `[chunk_start, chunk_end)` in the file.
    ///
    /// `start`/`end` are the 0-based half-open reference interval and are
    /// ignored unless `is_mapped`. Unmapped records only bump counters:
    /// the reference's unmapped count, or the unplaced count when
    /// `reference_id` is `None`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an unknown reference, offsets going backwards,
    /// or an empty or out-of-range interval on a mapped record.
    pub fn add_record(
        &mut self,
        reference_id: Option<usize>,
        start: u64,
        end: u64,
        is_mapped: bool,
        chunk_start: VirtualOffset,
        chunk_end: VirtualOffset,
    ) -> Result<()> {
        if chunk_end < chunk_start || chunk_start < self.last_end {
            return Err(BamforgeError::InvalidArgument(format!(
                "record offsets {}..{} go backwards (previous end {})",
                chunk_start, chunk_end, self.last_end
            )));
        }

        let Some(reference_id) = reference_id else {
            self.unplaced_unmapped += 1;
            self.last_end = chunk_end;
            return Ok(());
        };

        let reference_count = self.references.len();
        let reference = self.references.get_mut(reference_id).ok_or_else(|| {
            BamforgeError::InvalidArgument(format!(
                "reference id {} out of range for {} references",
                reference_id, reference_count
            ))
        })?;

        if !is_mapped {
            reference.unmapped += 1;
            self.last_end = chunk_end;
            return Ok(());
        }

        if end <= start || end > MAX_INDEXED_POSITION {
            return Err(BamforgeError::InvalidArgument(format!(
                "cannot index interval [{}, {})",
                start, end
            )));
        }

        let bin = u32::from(reg2bin(start, end));
        reference.add_chunk(bin, Chunk::new(chunk_start, chunk_end));
        reference.update_intervals(start, end, chunk_start);
        reference.mapped += 1;
        reference.first_offset.get_or_insert(chunk_start);
        reference.last_offset = Some(chunk_end);
        self.last_end = chunk_end;
        Ok(())
    }

    /// Record an [`AlignmentRecord`], resolving its reference through `session`.
    pub fn add_alignment(
        &mut self,
        record: &AlignmentRecord,
        session: &Session,
        chunk_start: VirtualOffset,
        chunk_end: VirtualOffset,
    ) -> Result<()> {
        let reference_id = usize::try_from(session.reference_id(record.reference_name.as_deref())?).ok();
        match (record.is_mapped(), record.alignment_start(), record.alignment_end()) {
            (true, Some(start), Some(end)) => {
                self.add_record(reference_id, start, end, true, chunk_start, chunk_end)
            }
            _ => self.add_record(reference_id, 0, 0, false, chunk_start, chunk_end),
        }
    }

    /// Trim, back-fill and seal the accumulated state.
    pub fn freeze(self) -> FileIndex {
        let references: Vec<ReferenceIndex> = self
            .references
            .into_iter()
            .map(ReferenceBuilder::freeze)
            .collect();

        let mapped: u64 = references.iter().filter_map(|r| r.metadata).map(|m| m.mapped).sum();
        info!(
            "Built index for {} references ({} mapped, {} unplaced records)",
            references.len(),
            mapped,
            self.unplaced_unmapped
        );
        debug!(
            "Index bins: {}",
            references.iter().map(|r| r.bins.len()).sum::<usize>()
        );

        FileIndex {
            references,
            unplaced_unmapped: Some(self.unplaced_unmapped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::bam::cigar::CigarOp;
    use crate::io::bam::header::{Header, Reference};
    use proptest::prelude::*;

    fn vo(raw: u64) -> VirtualOffset {
        VirtualOffset::from_raw(raw)
    }

    #[test]
    fn test_reg2bin_levels() {
        assert_eq!(reg2bin(0, 1), 4681);
        assert_eq!(reg2bin(16383, 16384), 4681);
        assert_eq!(reg2bin(16384, 16385), 4682);
        assert_eq!(reg2bin(16383, 16385), 585);
        assert_eq!(reg2bin(0, 1 << 17), 585);
        assert_eq!(reg2bin(0, (1 << 17) + 1), 73);
        assert_eq!(reg2bin(0, 1 << 26), 1);
        assert_eq!(reg2bin(0, (1 << 26) + 1), 0);
        assert_eq!(reg2bin((1 << 29) - 1, 1 << 29), 37448);
    }

    #[test]
    fn test_chunk_extension() {
        let mut builder = IndexBuilder::new(1);
        builder.add_record(Some(0), 10, 20, true, vo(0), vo(100)).unwrap();
        builder.add_record(Some(0), 15, 25, true, vo(100), vo(200)).unwrap();
        // A gap starts a new chunk
        builder.add_record(Some(0), 30, 40, true, vo(300), vo(400)).unwrap();

        let index = builder.freeze();
        let bin = index.references[0].bin(4681).unwrap();
        assert_eq!(
            bin.chunks,
            vec![Chunk::new(vo(0), vo(200)), Chunk::new(vo(300), vo(400))]
        );
    }

    #[test]
    fn test_linear_index_backfill() {
        let mut builder = IndexBuilder::new(1);
        // Spans windows 1 and 2
        builder.add_record(Some(0), 20_000, 40_000, true, vo(10), vo(20)).unwrap();
        builder.add_record(Some(0), 5 * 16384, 5 * 16384 + 10, true, vo(20), vo(30)).unwrap();

        let index = builder.freeze();
        assert_eq!(
            index.references[0].intervals,
            vec![vo(0), vo(10), vo(10), vo(10), vo(10), vo(20)]
        );
    }

    #[test]
    fn test_linear_index_keeps_minimum() {
        let mut builder = IndexBuilder::new(1);
        builder.add_record(Some(0), 100, 200, true, vo(10), vo(20)).unwrap();
        builder.add_record(Some(0), 50, 60, true, vo(20), vo(30)).unwrap();
        assert_eq!(builder.freeze().references[0].intervals, vec![vo(10)]);
    }

    #[test]
    fn test_metadata_counts() {
        let mut builder = IndexBuilder::new(2);
        builder.add_record(Some(0), 0, 10, true, vo(5), vo(10)).unwrap();
        builder.add_record(Some(0), 0, 0, false, vo(10), vo(15)).unwrap();
        builder.add_record(Some(0), 20, 30, true, vo(15), vo(20)).unwrap();
        builder.add_record(None, 0, 0, false, vo(20), vo(25)).unwrap();

        let index = builder.freeze();
        assert_eq!(
            index.references[0].metadata,
            Some(ReferenceMetadata {
                first_offset: vo(5),
                last_offset: vo(20),
                mapped: 2,
                unmapped: 1,
            })
        );
        assert_eq!(index.references[1], ReferenceIndex::default());
        assert_eq!(index.unplaced_unmapped, Some(1));
    }

    #[test]
    fn test_empty_builder() {
        let index = IndexBuilder::new(3).freeze();
        assert_eq!(index.references.len(), 3);
        assert!(index.references.iter().all(|r| r.bins.is_empty() && r.intervals.is_empty()));
        assert!(index.references.iter().all(|r| r.metadata.is_none()));
    }

    #[test]
    fn test_invalid_arguments() {
        let mut builder = IndexBuilder::new(1);
        assert!(builder.add_record(Some(1), 0, 10, true, vo(0), vo(1)).is_err());
        assert!(builder.add_record(Some(0), 10, 10, true, vo(0), vo(1)).is_err());
        assert!(builder.add_record(Some(0), 0, 10, true, vo(5), vo(1)).is_err());

        builder.add_record(Some(0), 0, 10, true, vo(10), vo(20)).unwrap();
        assert!(builder.add_record(Some(0), 0, 10, true, vo(15), vo(30)).is_err());
    }

    #[test]
    fn test_add_alignment() {
        let session = Session::new(&Header::new("", vec![Reference::new("chr1", 100_000)]));
        let mut builder = IndexBuilder::new(1);

        let mut record = AlignmentRecord::new("r1");
        record.flags = 0;
        record.reference_name = Some("chr1".to_string());
        record.position = 16385;
        record.cigar = vec![CigarOp::Match(50)];
        builder.add_alignment(&record, &session, vo(0), vo(60)).unwrap();

        let unplaced = AlignmentRecord::new("r2");
        builder.add_alignment(&unplaced, &session, vo(60), vo(90)).unwrap();

        let index = builder.freeze();
        assert!(index.references[0].bin(4682).is_some());
        assert_eq!(index.references[0].metadata.unwrap().mapped, 1);
        assert_eq!(index.unplaced_unmapped, Some(1));
    }

    proptest! {
        #[test]
        fn prop_whole_genome_is_bin_zero(length in (1u64 << 26) + 1..=(1u64 << 29)) {
            prop_assert_eq!(reg2bin(0, length), 0);
        }

        #[test]
        fn prop_single_window_is_leaf(window in 0u64..32768, offset in 0u64..16384, len in 1u64..16384) {
            let start = (window << 14) + offset;
            let end = (start + len).min((window + 1) << 14);
            prop_assume!(end > start);
            let bin = reg2bin(start, end);
            prop_assert!(bin >= 4681);
            prop_assert!(u32::from(bin) <= MAX_BIN);
        }
    }
}
