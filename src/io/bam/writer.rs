//! BAM file writer with BGZF compression and single-pass indexing.
//!
//! The writer streams the header and every record through a
//! [`BgzfWriter`], reading the virtual offset before and after each record
//! so the [`IndexBuilder`] sees exact chunk boundaries. Sorted output runs
//! the records through the external sort first.
//!
//! # Example
//!
//! ```no_run
//! use bamforge::io::bam::{AlignmentRecord, BamWriter, Header, Reference, WriterOptions};
//!
//! # fn main() -> bamforge::Result<()> {
//! let header = Header::new(
//!     "@HD\tVN:1.6\tSO:coordinate\n",
//!     vec![Reference::new("chr1", 248_956_422)],
//! );
//!
//! let mut writer = BamWriter::create("output.bam", header, WriterOptions::default())?;
//!
//! let mut record = AlignmentRecord::new("read1");
//! record.flags = 0;
//! record.reference_name = Some("chr1".to_string());
//! record.position = 1000;
//! record.sequence = b"ACGT".to_vec();
//! writer.write_record(&record)?;
//!
//! // Flushes buffers, writes the EOF marker and output.bam.bai
//! writer.finish_file()?;
//! # Ok(())
//! # }
//! ```

use super::header::{write_header, Header};
use super::index::{FileIndex, IndexBuilder};
use super::index_storage::write_index;
use super::record::{encode_record, AlignmentRecord};
use super::session::Session;
use super::sort::{sort_record_indices, SortMode, SortOptions};
use crate::error::{BamforgeError, Result};
use crate::io::compression::{BgzfWriter, VirtualOffset};
use crate::io::sink::{persist, staging_file, DataSink, SinkWriter};
use flate2::Compression;
use log::{debug, info};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterOptions {
    /// Deflate level, 0 (store) to 9 (best)
    pub compression_level: u32,
    /// Build a BAI index while writing
    pub build_index: bool,
    /// Order applied by [`BamWriter::write_sorted`]; `None` keeps input order
    pub sort_mode: Option<SortMode>,
    /// Spill threshold and temp directory for sorting
    pub sort: SortOptions,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression_level: Compression::default().level(),
            build_index: true,
            sort_mode: None,
            sort: SortOptions::default(),
        }
    }
}

impl WriterOptions {
    /// Set the deflate level (clamped to 9).
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    /// Enable or disable index building.
    pub fn with_index(mut self, build_index: bool) -> Self {
        self.build_index = build_index;
        self
    }

    /// Sort records passed to [`BamWriter::write_sorted`].
    pub fn with_sort_mode(mut self, mode: SortMode) -> Self {
        self.sort_mode = Some(mode);
        self
    }

    /// Rows buffered per sort partition.
    pub fn with_spill_threshold(mut self, rows: usize) -> Self {
        self.sort = self.sort.with_spill_threshold(rows);
        self
    }

    /// Directory for sort partition files.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sort = self.sort.with_temp_dir(dir);
        self
    }
}

/// BAM writer over any byte sink.
pub struct BamWriter<W: Write> {
    writer: BgzfWriter<W>,
    header: Header,
    session: Session,
    index: Option<IndexBuilder>,
    options: WriterOptions,
    /// Scratch buffer reused for every record
    buffer: Vec<u8>,
    records_written: u64,
    /// Destination of the index for file-backed writers
    index_path: Option<PathBuf>,
}

impl<W: Write> BamWriter<W> {
    /// Write the header and return a writer ready for records.
    ///
    /// With [`SortMode::ReferenceNameAndCoordinate`] the dictionary is
    /// reordered by name before it is written; [`BamWriter::header`] returns
    /// the header actually written.
    pub fn new(inner: W, header: Header, options: WriterOptions) -> Result<Self> {
        let header = match options.sort_mode {
            Some(mode) => mode.output_header(&header),
            None => header,
        };
        let session = Session::new(&header);

        let mut writer = BgzfWriter::with_level(inner, Compression::new(options.compression_level));
        write_header(&mut writer, &header)?;
        // Records start on a fresh block
        writer.flush()?;

        let index = options
            .build_index
            .then(|| IndexBuilder::new(header.reference_count()));

        debug!(
            "BAM header written: {} references, first record at {}",
            header.reference_count(),
            writer.virtual_offset()
        );

        Ok(Self {
            writer,
            header,
            session,
            index,
            options,
            buffer: Vec::new(),
            records_written: 0,
            index_path: None,
        })
    }

    /// Header as written to the stream.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Reference lookup used for encoding.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Get number of records written.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Virtual offset the next record will start at.
    pub fn virtual_offset(&self) -> VirtualOffset {
        self.writer.virtual_offset()
    }

    /// Encode and write one record, updating the index.
    ///
    /// A record that fails to encode writes nothing.
    pub fn write_record(&mut self, record: &AlignmentRecord) -> Result<()> {
        self.buffer.clear();
        encode_record(record, &self.session, &mut self.buffer)?;

        let start = self.writer.virtual_offset();
        self.writer.write_all(&self.buffer)?;
        let end = self.writer.virtual_offset();

        if let Some(index) = self.index.as_mut() {
            index.add_alignment(record, &self.session, start, end)?;
        }
        self.records_written += 1;
        Ok(())
    }

    /// Write records in the given order.
    pub fn write_records<'a, I>(&mut self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a AlignmentRecord>,
    {
        for record in records {
            self.write_record(record)?;
        }
        Ok(())
    }

    /// Write records in the configured sort order (input order without one).
    pub fn write_sorted(&mut self, records: &[AlignmentRecord]) -> Result<()> {
        let Some(mode) = self.options.sort_mode else {
            return self.write_records(records);
        };

        let order = sort_record_indices(records, &self.session, mode, &self.options.sort)?;
        debug!("Sorted {} records by {:?}", order.len(), mode);
        for index in order {
            let record = records.get(index as usize).ok_or_else(|| {
                BamforgeError::InvalidArgument(format!("sort produced out-of-range index {}", index))
            })?;
            self.write_record(record)?;
        }
        Ok(())
    }

    /// Flush, append the EOF marker and return the inner writer and the index.
    pub fn finish(self) -> Result<(W, Option<FileIndex>)> {
        let records = self.records_written;
        let inner = self.writer.finish()?;
        let index = self.index.map(IndexBuilder::freeze);
        info!("BAM writer finished: {} records", records);
        Ok((inner, index))
    }
}

impl BamWriter<SinkWriter> {
    /// Create a writer for a sink; file sinks get `<path>.bai` on
    /// [`BamWriter::finish_file`].
    ///
    /// Nothing appears at the file path until `finish_file` succeeds. A
    /// writer dropped before that, including after an error, leaves no output.
    pub fn to_sink(sink: &DataSink, header: Header, options: WriterOptions) -> Result<Self> {
        let mut writer = Self::new(sink.open()?, header, options)?;
        writer.index_path = sink.index_path();
        Ok(writer)
    }

    /// Create a writer for a file path.
    pub fn create<P: AsRef<Path>>(path: P, header: Header, options: WriterOptions) -> Result<Self> {
        Self::to_sink(&DataSink::from_path(path), header, options)
    }

    /// Finish, then move the BAM and its index into place.
    ///
    /// The index is staged before the BAM is committed, so a failure while
    /// writing it leaves neither file behind.
    pub fn finish_file(self) -> Result<Option<FileIndex>> {
        let index_path = self.index_path.clone();
        let (inner, index) = self.finish()?;

        let staged_index = match (&index, &index_path) {
            (Some(index), Some(path)) => {
                let file = staging_file(path)?;
                let mut writer = BufWriter::new(file.as_file());
                write_index(&mut writer, index)?;
                writer.flush()?;
                drop(writer);
                Some(file)
            }
            _ => None,
        };

        inner.commit()?;
        if let (Some(file), Some(path)) = (staged_index, index_path) {
            persist(file, &path)?;
            info!("Wrote index {}", path.display());
        }
        Ok(index)
    }
}

/// Write `records` to `sink` in the configured order and finish.
///
/// Returns the built index (also written to `<path>.bai` for file sinks).
pub fn write_bam(
    sink: &DataSink,
    header: Header,
    records: &[AlignmentRecord],
    options: WriterOptions,
) -> Result<Option<FileIndex>> {
    let mut writer = BamWriter::to_sink(sink, header, options)?;
    writer.write_sorted(records)?;
    writer.finish_file()
}
