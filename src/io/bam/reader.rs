//! BAM streaming reader.
//!
//! Inflates the BGZF stream, reads the header once, then decodes records one
//! at a time against a [`Session`] built from that header.
//!
//! # Usage
//!
//! ```no_run
//! use bamforge::io::bam::BamReader;
//!
//! # fn main() -> bamforge::Result<()> {
//! let mut bam = BamReader::from_path("alignments.bam")?;
//!
//! println!("Header: {} references", bam.header().reference_count());
//!
//! for result in bam.records() {
//!     let record = result?;
//!     println!("{} at {}", record.query_name, record.position);
//! }
//! # Ok(())
//! # }
//! ```

use super::header::{read_header, Header};
use super::record::{decode_record, read_block_size, read_record_body, AlignmentRecord};
use super::session::Session;
use crate::error::Result;
use crate::io::compression::{BgzfReader, VirtualOffset};
use log::debug;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

/// BAM file reader with streaming interface.
///
/// # Buffer Reuse
///
/// Record bytes are read into an internal buffer that grows to the largest
/// record seen and is then reused.
pub struct BamReader<R> {
    reader: BgzfReader<R>,
    header: Header,
    session: Session,
    buffer: Vec<u8>,
}

impl<R: Read> BamReader<R> {
    /// Create a new BAM reader over a BGZF-compressed stream.
    ///
    /// Reads and validates the BAM header immediately.
    pub fn new(inner: R) -> Result<Self> {
        let mut reader = BgzfReader::new(inner);
        let header = read_header(&mut reader)?;
        let session = Session::new(&header);
        debug!(
            "Opened BAM stream with {} references, records start at {}",
            header.reference_count(),
            reader.virtual_offset()
        );
        Ok(Self {
            reader,
            header,
            session,
            buffer: Vec::with_capacity(512),
        })
    }

    /// Get a reference to the BAM header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Reference-name lookups for this file's dictionary.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Virtual offset of the next record.
    pub fn virtual_offset(&self) -> VirtualOffset {
        self.reader.virtual_offset()
    }

    /// Create an iterator over BAM records.
    pub fn records(&mut self) -> Records<'_, R> {
        Records { reader: self }
    }

    /// Read a single record.
    ///
    /// Returns `Ok(None)` at the end of the stream. A stream that ends in the
    /// middle of a record is an I/O error.
    pub fn read_record(&mut self) -> Result<Option<AlignmentRecord>> {
        let Some(block_size) = read_block_size(&mut self.reader)? else {
            return Ok(None);
        };
        read_record_body(&mut self.reader, block_size, &mut self.buffer)?;
        decode_record(&self.buffer, &self.session).map(Some)
    }
}

impl<R: Read + Seek> BamReader<R> {
    /// Jump to a virtual offset, typically a chunk start from a BAI index.
    pub fn seek(&mut self, offset: VirtualOffset) -> Result<()> {
        self.reader.seek(offset)
    }
}

impl BamReader<BufReader<File>> {
    /// Open a BAM file from a path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

/// Iterator over BAM records.
///
/// Created by [`BamReader::records()`].
pub struct Records<'a, R> {
    reader: &'a mut BamReader<R>,
}

impl<'a, R: Read> Iterator for Records<'a, R> {
    type Item = Result<AlignmentRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_record().transpose()
    }
}
