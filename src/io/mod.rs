//! I/O module: BGZF compression, BAM streams and output sinks

pub mod bam;
pub mod compression;
pub mod sink;

pub use bam::{BamReader, BamWriter};
pub use compression::{BgzfReader, BgzfWriter, VirtualOffset};
pub use sink::DataSink;
