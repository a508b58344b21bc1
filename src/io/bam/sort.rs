//! External sort of record indices via temporary partitions and a k-way merge.
//!
//! Sort keys are extracted from the records, buffered, and spilled to
//! temporary files as sorted runs ([`Partition`]). [`SortedMerge`] then
//! streams the runs back in global order, yielding the original record
//! indices. Ties on the key are broken by the original index, so the sort is
//! stable.
//!
//! Every partition owns its temporary file; the file is deleted when the
//! partition (or the merge holding it) is dropped, including after an error
//! or an early stop.
//!
//! # Example
//!
//! ```
//! use bamforge::io::bam::sort::{PartitionBuilder, SortOptions};
//!
//! # fn main() -> bamforge::Result<()> {
//! let options = SortOptions::default().with_spill_threshold(2);
//! let mut builder = PartitionBuilder::new(&options);
//! for (index, name) in ["r3", "r1", "r2", "r0"].iter().enumerate() {
//!     builder.push(name.to_string(), index as u64)?;
//! }
//!
//! let order = builder.finish()?.collect::<bamforge::Result<Vec<u64>>>()?;
//! assert_eq!(order, vec![3, 1, 2, 0]);
//! # Ok(())
//! # }
//! ```

use super::header::Header;
use super::record::AlignmentRecord;
use super::session::Session;
use crate::error::{BamforgeError, Result};
use log::debug;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Rows buffered in memory before a partition is spilled to disk.
pub const DEFAULT_SPILL_THRESHOLD: usize = 100_000;

/// Order in which records are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortMode {
    /// Lexical order of query names
    ReadName,
    /// Header dictionary order, then position; unplaced records last
    Coordinate,
    /// Reference name order, then position; the dictionary is reordered
    ReferenceNameAndCoordinate,
}

impl SortMode {
    /// Header the sorted output is written with.
    ///
    /// Every mode records its order in `@HD SO:`. Only
    /// [`SortMode::ReferenceNameAndCoordinate`] changes the dictionary.
    pub fn output_header(&self, header: &Header) -> Header {
        let header = header.with_sort_order(self.sam_sort_order());
        match self {
            SortMode::ReferenceNameAndCoordinate => header.sorted_by_reference_name(),
            _ => header,
        }
    }

    /// Value for the `SO` field of an `@HD` line.
    pub fn sam_sort_order(&self) -> &'static str {
        match self {
            SortMode::ReadName => "queryname",
            SortMode::Coordinate | SortMode::ReferenceNameAndCoordinate => "coordinate",
        }
    }
}

/// Sort configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOptions {
    /// Rows per spilled partition
    pub spill_threshold: usize,
    /// Directory for partition files; the system temp dir when `None`
    pub temp_dir: Option<PathBuf>,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self {
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            temp_dir: None,
        }
    }
}

impl SortOptions {
    /// Set the spill threshold (values below 1 are treated as 1).
    pub fn with_spill_threshold(mut self, rows: usize) -> Self {
        self.spill_threshold = rows.max(1);
        self
    }

    /// Put partition files in `dir`.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }
}

/// A key that can be ordered and stored in a partition file.
pub trait SortKey: Ord + Sized {
    /// Append the binary form of the key.
    fn write_key<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    /// Read a key written by [`SortKey::write_key`].
    fn read_key<R: Read>(reader: &mut R) -> io::Result<Self>;
}

impl SortKey for u32 {
    fn write_key<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_le_bytes())
    }

    fn read_key<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
}

impl SortKey for u64 {
    fn write_key<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_le_bytes())
    }

    fn read_key<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

impl SortKey for String {
    fn write_key<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let len = u32::try_from(self.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "sort key too long"))?;
        len.write_key(writer)?;
        writer.write_all(self.as_bytes())
    }

    fn read_key<R: Read>(reader: &mut R) -> io::Result<Self> {
        let len = u32::read_key(reader)? as usize;
        let mut bytes = vec![0u8; len];
        reader.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Coordinate sort key: dictionary index, then 1-based position.
///
/// Records without a reference use `u32::MAX` and sort after all others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoordinateKey {
    /// Reference index, `u32::MAX` when unplaced
    pub reference: u32,
    /// 1-based position (0 = none)
    pub position: u32,
}

impl CoordinateKey {
    /// Key for `record` under the dictionary of `session`.
    pub fn for_record(record: &AlignmentRecord, session: &Session) -> Result<Self> {
        let reference_id = session.reference_id(record.reference_name.as_deref())?;
        Ok(Self {
            reference: u32::try_from(reference_id).unwrap_or(u32::MAX),
            position: record.position,
        })
    }
}

impl SortKey for CoordinateKey {
    fn write_key<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.reference.write_key(writer)?;
        self.position.write_key(writer)
    }

    fn read_key<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            reference: u32::read_key(reader)?,
            position: u32::read_key(reader)?,
        })
    }
}

/// A sorted run of `(key, original index)` rows in a temporary file.
#[derive(Debug)]
pub struct Partition<K> {
    file: NamedTempFile,
    rows: u64,
    _key: PhantomData<K>,
}

impl<K: SortKey> Partition<K> {
    /// Write already-sorted rows to a new temporary file.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the rows are not in `(key, index)` order.
    pub fn from_sorted_rows(rows: &[(K, u64)], temp_dir: Option<&Path>) -> Result<Self> {
        if rows.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(BamforgeError::InvalidArgument(
                "partition rows are not sorted".to_string(),
            ));
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix("bamforge-sort-").suffix(".part");
        let file = match temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        let mut writer = BufWriter::new(file.as_file());
        for (key, index) in rows {
            key.write_key(&mut writer)?;
            index.write_key(&mut writer)?;
        }
        writer.flush()?;
        drop(writer);

        debug!("Spilled partition {} with {} rows", file.path().display(), rows.len());
        Ok(Self {
            file,
            rows: rows.len() as u64,
            _key: PhantomData,
        })
    }

    /// Number of rows.
    pub fn len(&self) -> u64 {
        self.rows
    }

    /// Whether the partition holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    fn open(&self) -> Result<PartitionReader<K>> {
        Ok(PartitionReader {
            reader: BufReader::new(self.file.reopen()?),
            remaining: self.rows,
            _key: PhantomData,
        })
    }
}

struct PartitionReader<K> {
    reader: BufReader<File>,
    remaining: u64,
    _key: PhantomData<K>,
}

impl<K: SortKey> PartitionReader<K> {
    fn next_row(&mut self) -> Result<Option<(K, u64)>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let key = K::read_key(&mut self.reader)?;
        let index = u64::read_key(&mut self.reader)?;
        self.remaining -= 1;
        Ok(Some((key, index)))
    }
}

/// Heap entry; ordered by key, then original index.
struct HeadRow<K> {
    key: K,
    index: u64,
    source: usize,
}

impl<K: Ord> PartialEq for HeadRow<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: Ord> Eq for HeadRow<K> {}

impl<K: Ord> PartialOrd for HeadRow<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> Ord for HeadRow<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then(self.index.cmp(&other.index))
            .then(self.source.cmp(&other.source))
    }
}

/// Streaming k-way merge of partitions, yielding original record indices.
///
/// Holds one buffered row per partition that still has rows. Dropping the
/// merge closes every reader and deletes every partition file.
pub struct SortedMerge<K: SortKey> {
    // Readers are declared before partitions so handles close before deletion.
    readers: Vec<PartitionReader<K>>,
    heap: BinaryHeap<Reverse<HeadRow<K>>>,
    partitions: Vec<Partition<K>>,
    failed: bool,
}

impl<K: SortKey> SortedMerge<K> {
    /// Open every partition and buffer its first row.
    pub fn new(partitions: Vec<Partition<K>>) -> Result<Self> {
        let mut readers = Vec::with_capacity(partitions.len());
        let mut heap = BinaryHeap::with_capacity(partitions.len());

        for (source, partition) in partitions.iter().enumerate() {
            let mut reader = partition.open()?;
            if let Some((key, index)) = reader.next_row()? {
                heap.push(Reverse(HeadRow { key, index, source }));
            }
            readers.push(reader);
        }

        debug!(
            "Merging {} partitions ({} rows)",
            partitions.len(),
            partitions.iter().map(Partition::len).sum::<u64>()
        );

        Ok(Self {
            readers,
            heap,
            partitions,
            failed: false,
        })
    }

    /// Number of partitions being merged.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Paths of the partition files (deleted when the merge is dropped).
    pub fn partition_paths(&self) -> Vec<PathBuf> {
        self.partitions.iter().map(|p| p.path().to_path_buf()).collect()
    }

    /// Delete the partition files now, reporting any failure.
    pub fn close(mut self) -> Result<()> {
        self.readers.clear();
        self.heap.clear();
        for partition in std::mem::take(&mut self.partitions) {
            partition.file.close()?;
        }
        Ok(())
    }
}

impl<K: SortKey> Iterator for SortedMerge<K> {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let Reverse(head) = self.heap.pop()?;
        match self.readers[head.source].next_row() {
            Ok(Some((key, index))) => self.heap.push(Reverse(HeadRow {
                key,
                index,
                source: head.source,
            })),
            Ok(None) => {}
            Err(e) => {
                self.failed = true;
                self.heap.clear();
                return Some(Err(e));
            }
        }
        Some(Ok(head.index))
    }
}

impl<K: SortKey> Drop for SortedMerge<K> {
    fn drop(&mut self) {
        if !self.partitions.is_empty() {
            debug!("Removing {} sort partitions", self.partitions.len());
        }
    }
}

/// Buffers rows and spills them as sorted partitions.
pub struct PartitionBuilder<K> {
    buffer: Vec<(K, u64)>,
    partitions: Vec<Partition<K>>,
    spill_threshold: usize,
    temp_dir: Option<PathBuf>,
}

impl<K: SortKey> PartitionBuilder<K> {
    /// Create a builder with the given options.
    pub fn new(options: &SortOptions) -> Self {
        let spill_threshold = options.spill_threshold.max(1);
        Self {
            buffer: Vec::with_capacity(spill_threshold.min(DEFAULT_SPILL_THRESHOLD)),
            partitions: Vec::new(),
            spill_threshold,
            temp_dir: options.temp_dir.clone(),
        }
    }

    /// Add one row, spilling when the buffer reaches the threshold.
    pub fn push(&mut self, key: K, index: u64) -> Result<()> {
        self.buffer.push((key, index));
        if self.buffer.len() >= self.spill_threshold {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.buffer.sort_unstable();
        let partition = Partition::from_sorted_rows(&self.buffer, self.temp_dir.as_deref())?;
        self.partitions.push(partition);
        self.buffer.clear();
        Ok(())
    }

    /// Spill the remainder and start the merge.
    pub fn finish(mut self) -> Result<SortedMerge<K>> {
        self.spill()?;
        SortedMerge::new(std::mem::take(&mut self.partitions))
    }
}

fn sorted_indices<K, I>(keys: I, options: &SortOptions) -> Result<Vec<u64>>
where
    K: SortKey,
    I: IntoIterator<Item = Result<K>>,
{
    let mut builder = PartitionBuilder::new(options);
    for (index, key) in keys.into_iter().enumerate() {
        builder.push(key?, index as u64)?;
    }
    builder.finish()?.collect()
}

/// Original indices of `records` in the order `mode` writes them.
///
/// For [`SortMode::ReferenceNameAndCoordinate`], `session` must be built
/// from [`SortMode::output_header`] so positions order by reference name.
pub fn sort_record_indices(
    records: &[AlignmentRecord],
    session: &Session,
    mode: SortMode,
    options: &SortOptions,
) -> Result<Vec<u64>> {
    match mode {
        SortMode::ReadName => sorted_indices(records.iter().map(|r| Ok(r.query_name.clone())), options),
        SortMode::Coordinate | SortMode::ReferenceNameAndCoordinate => sorted_indices(
            records.iter().map(|r| CoordinateKey::for_record(r, session)),
            options,
        ),
    }
}
