//! Native BAM (Binary Alignment Map) writing, reading and indexing.
//!
//! # Architecture
//!
//! - [`header`]: magic, SAM text and the reference dictionary
//! - [`session`]: reference name to id resolution for one header
//! - [`record`]: the alignment record codec, built from [`cigar`],
//!   [`sequence`] and [`tags`]
//! - [`index`]: BAI bins, chunks and the linear index, accumulated by
//!   [`IndexBuilder`] while records are written
//! - [`index_storage`]: the `.bai` byte layout
//! - [`sort`]: external sort with spill partitions and a k-way
//!   [`SortedMerge`]
//! - [`writer`] / [`reader`]: BGZF-backed streams tying it all together
//!
//! # Example
//!
//! ```no_run
//! use bamforge::io::bam::{AlignmentRecord, BamWriter, CigarOp, Header, Reference, SortMode, WriterOptions};
//!
//! # fn main() -> bamforge::Result<()> {
//! let header = Header::new("@HD\tVN:1.6\n", vec![Reference::new("chr1", 248_956_422)]);
//! let options = WriterOptions::default().with_sort_mode(SortMode::Coordinate);
//! let mut writer = BamWriter::create("out.bam", header, options)?;
//!
//! let mut record = AlignmentRecord::new("read1");
//! record.flags = 0;
//! record.reference_name = Some("chr1".to_string());
//! record.position = 1_000;
//! record.cigar = vec![CigarOp::Match(4)];
//! record.sequence = b"ACGT".to_vec();
//!
//! writer.write_sorted(&[record])?;
//! // Writes out.bam.bai as well
//! let index = writer.finish_file()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Opening Files
//!
//! ```no_run
//! use bamforge::io::bam::BamReader;
//!
//! # fn main() -> bamforge::Result<()> {
//! let mut bam = BamReader::from_path("alignments.bam")?;
//! for record in bam.records() {
//!     let record = record?;
//!     println!("{}", record.query_name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cigar;
pub mod error;
pub mod header;
pub mod index;
pub mod index_storage;
pub mod reader;
pub mod record;
pub mod sequence;
pub mod session;
pub mod sort;
pub mod tags;
pub mod writer;

// Re-export main types for convenience
pub use cigar::{cigar_to_string, parse_cigar, CigarOp};
pub use error::{BamDecodeError, BamEncodeError};
pub use header::{read_header, write_header, Header, Reference};
pub use index::{reg2bin, Bin, Chunk, FileIndex, IndexBuilder, ReferenceIndex, ReferenceMetadata};
pub use index_storage::{read_index, write_index};
pub use reader::{BamReader, Records};
pub use record::{decode_record, encode_record, encoded_size, read_record, AlignmentRecord};
pub use sequence::{decode_sequence, encode_sequence, Alphabet};
pub use session::Session;
pub use sort::{
    sort_record_indices, CoordinateKey, Partition, PartitionBuilder, SortKey, SortMode, SortOptions,
    SortedMerge,
};
pub use tags::{parse_tags, ArrayValue, Tag, TagValue};
pub use writer::{write_bam, BamWriter, WriterOptions};
