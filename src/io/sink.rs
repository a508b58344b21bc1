//! Output destinations for BAM writes
//!
//! `DataSink` names where a BAM stream goes and, for files, where its BAI
//! index goes. File output is staged in a temporary file next to the target
//! and only renamed into place by [`SinkWriter::commit`]; a write that is
//! abandoned or fails leaves nothing at the target path.
//!
//! # Example
//!
//! ```no_run
//! use bamforge::io::DataSink;
//!
//! // Write to local file; the index lands next to it
//! let sink = DataSink::from_path("output.bam");
//! assert_eq!(sink.index_path().unwrap().to_str(), Some("output.bam.bai"));
//!
//! // Write to stdout (no index file)
//! let sink = DataSink::stdout();
//! assert!(sink.index_path().is_none());
//! ```

use crate::error::Result;
use log::debug;
use std::ffi::OsString;
use std::io::{self, BufWriter, Stdout, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Extension appended to a BAM path to name its index.
pub const INDEX_EXTENSION: &str = "bai";

/// Output destination for streaming writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSink {
    /// Write to a local file path
    Local(PathBuf),

    /// Write to standard output
    ///
    /// Useful for streaming pipelines; no index file is produced.
    Stdout,
}

impl DataSink {
    /// Create a sink from a file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        Self::Local(path.as_ref().to_path_buf())
    }

    /// Create a sink for standard output
    pub fn stdout() -> Self {
        Self::Stdout
    }

    /// `<path>.bai` for file sinks.
    pub fn index_path(&self) -> Option<PathBuf> {
        match self {
            Self::Local(path) => {
                let mut name = OsString::from(path.as_os_str());
                name.push(".");
                name.push(INDEX_EXTENSION);
                Some(PathBuf::from(name))
            }
            Self::Stdout => None,
        }
    }

    /// Open the destination for buffered writing.
    ///
    /// For files, the bytes go to a staging file in the target directory
    /// until [`SinkWriter::commit`] is called.
    pub fn open(&self) -> Result<SinkWriter> {
        Ok(match self {
            Self::Local(path) => SinkWriter::File {
                writer: BufWriter::new(staging_file(path)?),
                path: path.clone(),
            },
            Self::Stdout => SinkWriter::Stdout(BufWriter::new(io::stdout())),
        })
    }
}

/// Create an empty temporary file in the directory that will hold `target`.
pub(crate) fn staging_file(target: &Path) -> Result<NamedTempFile> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file = tempfile::Builder::new()
        .prefix(".bamforge-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    Ok(file)
}

/// Move a finished staging file to `target`, replacing any existing file.
pub(crate) fn persist(file: NamedTempFile, target: &Path) -> Result<()> {
    file.persist(target).map_err(io::Error::from)?;
    debug!("Persisted {}", target.display());
    Ok(())
}

/// Writer returned by [`DataSink::open`].
///
/// Dropping a file writer without committing deletes the staging file.
#[derive(Debug)]
pub enum SinkWriter {
    /// Staged file output
    File {
        /// Buffered staging file
        writer: BufWriter<NamedTempFile>,
        /// Final destination
        path: PathBuf,
    },
    /// Standard output
    Stdout(BufWriter<Stdout>),
}

impl SinkWriter {
    /// Flush everything and, for files, move the staging file into place.
    pub fn commit(self) -> Result<()> {
        match self {
            Self::File { writer, path } => {
                let file = writer.into_inner().map_err(|e| e.into_error())?;
                persist(file, &path)
            }
            Self::Stdout(mut writer) => {
                writer.flush()?;
                Ok(())
            }
        }
    }
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::File { writer, .. } => writer.write(buf),
            Self::Stdout(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::File { writer, .. } => writer.flush(),
            Self::Stdout(writer) => writer.flush(),
        }
    }
}
