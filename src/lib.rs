//! bamforge: BAM container codec with BAI indexing and external sorting
//!
//! # Overview
//!
//! bamforge writes and reads BAM alignment files: BGZF block compression,
//! the binary alignment record codec, a BAI index built while records are
//! written, and a coordinate/name sort that spills to temporary partitions
//! and merges them back.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bamforge::io::bam::{AlignmentRecord, Header, Reference, WriterOptions};
//! use bamforge::io::{bam::write_bam, DataSink};
//!
//! # fn main() -> bamforge::Result<()> {
//! let header = Header::new("", vec![Reference::new("chr1", 1_000_000)]);
//! let records = vec![AlignmentRecord::new("unmapped_read")];
//! write_bam(&DataSink::from_path("out.bam"), header, &records, WriterOptions::default())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`io::compression`]: BGZF blocks and virtual offsets
//! - [`io::bam`]: headers, records, index, sort, reader and writer
//! - [`io::sink`]: output destinations
//! - [`error`]: the crate error type

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod io;

// Re-export commonly used types
pub use error::{BamforgeError, Result};
pub use io::bam::{AlignmentRecord, BamReader, BamWriter, FileIndex, Header, IndexBuilder, Reference, WriterOptions};
pub use io::{DataSink, VirtualOffset};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
