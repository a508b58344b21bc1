//! BGZF block compression with virtual-offset bookkeeping.
//!
//! BGZF is a series of independent gzip members, each holding at most 64 KB of
//! input and declaring its own compressed size in a gzip extra subfield, so a
//! reader can hop from block to block without inflating anything. A file ends
//! with a fixed 28-byte empty block ([`EOF_MARKER`]).
//!
//! # Block Structure
//!
//! ```text
//! offset  size  field
//! 0       4     ID1=31 ID2=139 CM=8 FLG=4 (FEXTRA)
//! 4       4     MTIME = 0
//! 8       1     XFL = 0
//! 9       1     OS = 255
//! 10      2     XLEN = 6
//! 12      2     SI1='B' SI2='C'
//! 14      2     SLEN = 2
//! 16      2     BSIZE = total block size - 1
//! 18      ..    raw deflate payload
//! -8      4     CRC32 of the uncompressed data
//! -4      4     ISIZE (uncompressed length)
//! ```
//!
//! # Virtual offsets
//!
//! A [`VirtualOffset`] addresses a byte in the uncompressed stream as
//! `compressed_block_start << 16 | offset_within_block`. [`BgzfWriter`]
//! reports the offset of the next byte it will write, and [`BgzfReader`]
//! can seek to any offset it is given.

use crate::error::{BamforgeError, Result};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::debug;
use std::fmt;
use std::io::{self, BufRead, Read, Seek, SeekFrom, Write};

/// Size of the fixed BGZF header, including the `BC` extra subfield.
pub const BGZF_HEADER_SIZE: usize = 18;

/// Size of the gzip trailer (CRC32 + ISIZE).
pub const BGZF_FOOTER_SIZE: usize = 8;

/// Largest total size of one compressed block (BSIZE is a u16 holding size - 1).
pub const MAX_BLOCK_SIZE: usize = 64 * 1024;

/// Uncompressed bytes per block.
///
/// Kept below 64 KB so that a stored (incompressible) block plus framing
/// still fits in [`MAX_BLOCK_SIZE`], and so every in-block offset fits in a u16.
pub const MAX_BLOCK_DATA_SIZE: usize = 0xff00;

/// The BGZF end-of-file marker: an empty block with BSIZE = 27.
pub const EOF_MARKER: [u8; 28] = [
    31, 139, 8, 4, 0, 0, 0, 0, 0, 255, // gzip header
    6, 0, 66, 67, 2, 0, 27, 0, // XLEN=6, 'B' 'C', SLEN=2, BSIZE=27
    3, 0, // empty deflate block
    0, 0, 0, 0, // CRC32
    0, 0, 0, 0, // ISIZE
];

const GZIP_ID1: u8 = 31;
const GZIP_ID2: u8 = 139;
const GZIP_CM_DEFLATE: u8 = 8;
const GZIP_FLG_FEXTRA: u8 = 4;
const GZIP_OS_UNKNOWN: u8 = 255;
const BGZF_XLEN: u16 = 6;
const BGZF_SI1: u8 = b'B';
const BGZF_SI2: u8 = b'C';
const BGZF_SLEN: u16 = 2;

/// Virtual file offset into a BGZF stream.
///
/// Upper 48 bits: byte offset of a block start in the compressed file.
/// Lower 16 bits: byte offset inside that block's uncompressed data.
///
/// The derived ordering on the packed value is the lexicographic ordering
/// on (compressed, uncompressed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtualOffset(u64);

impl VirtualOffset {
    /// Create a virtual offset from its two components.
    pub const fn new(compressed_offset: u64, uncompressed_offset: u16) -> Self {
        Self((compressed_offset << 16) | uncompressed_offset as u64)
    }

    /// Create from the packed 64-bit value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The packed 64-bit value.
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// Start of the containing block in the compressed stream.
    pub const fn compressed_offset(self) -> u64 {
        self.0 >> 16
    }

    /// Offset inside the block's uncompressed data.
    pub const fn uncompressed_offset(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// On-disk form: 2 bytes in-block offset then 6 bytes block offset, little-endian.
    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Inverse of [`VirtualOffset::to_le_bytes`].
    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }
}

impl fmt::Display for VirtualOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.compressed_offset(),
            self.uncompressed_offset()
        )
    }
}

impl From<u64> for VirtualOffset {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<VirtualOffset> for u64 {
    fn from(offset: VirtualOffset) -> Self {
        offset.0
    }
}

/// Compress one run of at most [`MAX_BLOCK_DATA_SIZE`] bytes into a BGZF block.
///
/// If the deflated block would not fit the 16-bit BSIZE field (incompressible
/// input), the data is stored uncompressed inside the deflate stream instead.
pub fn compress_block(data: &[u8], level: Compression) -> Result<Vec<u8>> {
    if data.len() > MAX_BLOCK_DATA_SIZE {
        return Err(BamforgeError::InvalidArgument(format!(
            "BGZF block data is {} bytes (max {})",
            data.len(),
            MAX_BLOCK_DATA_SIZE
        )));
    }

    let mut payload = deflate(data, level)?;
    if BGZF_HEADER_SIZE + payload.len() + BGZF_FOOTER_SIZE > MAX_BLOCK_SIZE {
        payload = deflate(data, Compression::none())?;
    }

    let total_size = BGZF_HEADER_SIZE + payload.len() + BGZF_FOOTER_SIZE;
    if total_size > MAX_BLOCK_SIZE {
        return Err(BamforgeError::Compression(format!(
            "BGZF block of {} bytes exceeds {}",
            total_size, MAX_BLOCK_SIZE
        )));
    }

    let mut block = Vec::with_capacity(total_size);
    block.extend_from_slice(&[
        GZIP_ID1,
        GZIP_ID2,
        GZIP_CM_DEFLATE,
        GZIP_FLG_FEXTRA,
        0,
        0,
        0,
        0, // MTIME
        0, // XFL
        GZIP_OS_UNKNOWN,
    ]);
    block.extend_from_slice(&BGZF_XLEN.to_le_bytes());
    block.push(BGZF_SI1);
    block.push(BGZF_SI2);
    block.extend_from_slice(&BGZF_SLEN.to_le_bytes());
    block.extend_from_slice(&((total_size - 1) as u16).to_le_bytes());
    block.extend_from_slice(&payload);
    block.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    block.extend_from_slice(&(data.len() as u32).to_le_bytes());

    Ok(block)
}

fn deflate(data: &[u8], level: Compression) -> io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2 + 64), level);
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompress one complete BGZF block, verifying its size field, CRC32 and ISIZE.
pub fn decompress_block(block: &[u8]) -> Result<Vec<u8>> {
    let extra_end = parse_header(block)?;
    let block_size = block_size_from_header(block, extra_end)?;
    if block.len() != block_size {
        return Err(BamforgeError::Compression(format!(
            "BGZF block declares {} bytes but {} were supplied",
            block_size,
            block.len()
        )));
    }
    inflate_block(block, extra_end)
}

/// Validate the fixed gzip header; returns the end of the extra field.
fn parse_header(block: &[u8]) -> Result<usize> {
    if block.len() < 12 {
        return Err(BamforgeError::Compression(format!(
            "Incomplete BGZF header: {} bytes",
            block.len()
        )));
    }
    if block[0] != GZIP_ID1 || block[1] != GZIP_ID2 {
        return Err(BamforgeError::Compression(format!(
            "Invalid gzip magic bytes: expected [31, 139], got [{}, {}]",
            block[0], block[1]
        )));
    }
    if block[2] != GZIP_CM_DEFLATE || block[3] & GZIP_FLG_FEXTRA == 0 {
        return Err(BamforgeError::Compression(
            "gzip member is not a BGZF block (missing FEXTRA)".to_string(),
        ));
    }
    let xlen = u16::from_le_bytes([block[10], block[11]]) as usize;
    Ok(12 + xlen)
}

/// Find the BC subfield in the extra field and return the total block size.
fn block_size_from_header(block: &[u8], extra_end: usize) -> Result<usize> {
    if block.len() < extra_end {
        return Err(BamforgeError::Compression(
            "BGZF extra field extends beyond block".to_string(),
        ));
    }

    let mut pos = 12;
    while pos + 4 <= extra_end {
        let slen = u16::from_le_bytes([block[pos + 2], block[pos + 3]]) as usize;
        if block[pos] == BGZF_SI1 && block[pos + 1] == BGZF_SI2 && slen == 2 {
            if pos + 6 > extra_end {
                return Err(BamforgeError::Compression("BSIZE field incomplete".to_string()));
            }
            let bsize = u16::from_le_bytes([block[pos + 4], block[pos + 5]]) as usize;
            return Ok(bsize + 1);
        }
        pos += 4 + slen;
    }

    Err(BamforgeError::Compression(
        "BGZF block has no BC subfield".to_string(),
    ))
}

fn inflate_block(block: &[u8], extra_end: usize) -> Result<Vec<u8>> {
    if block.len() < extra_end + BGZF_FOOTER_SIZE {
        return Err(BamforgeError::Compression("BGZF block too short".to_string()));
    }

    let footer = &block[block.len() - BGZF_FOOTER_SIZE..];
    let expected_crc = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
    let expected_len = u32::from_le_bytes([footer[4], footer[5], footer[6], footer[7]]) as usize;

    let payload = &block[extra_end..block.len() - BGZF_FOOTER_SIZE];
    let mut data = Vec::with_capacity(expected_len);
    DeflateDecoder::new(payload)
        .read_to_end(&mut data)
        .map_err(|e| BamforgeError::Compression(format!("Corrupt deflate payload: {}", e)))?;

    if data.len() != expected_len {
        return Err(BamforgeError::Compression(format!(
            "ISIZE mismatch: header says {}, inflated {}",
            expected_len,
            data.len()
        )));
    }
    if crc32fast::hash(&data) != expected_crc {
        return Err(BamforgeError::Compression("CRC32 mismatch".to_string()));
    }

    Ok(data)
}

/// Read until `buf` is full or the reader is exhausted.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read one raw BGZF block into `buf`. Returns `Ok(false)` at a clean end of stream.
fn read_raw_block<R: Read>(reader: &mut R, buf: &mut Vec<u8>) -> Result<bool> {
    buf.clear();
    buf.resize(12, 0);
    let n = read_up_to(reader, &mut buf[..12])?;
    if n == 0 {
        return Ok(false);
    }
    if n < 12 {
        return Err(BamforgeError::Compression(format!(
            "Truncated BGZF header: {} of 12 bytes",
            n
        )));
    }

    let extra_end = parse_header(buf)?;
    buf.resize(extra_end, 0);
    reader.read_exact(&mut buf[12..])?;

    let block_size = block_size_from_header(buf, extra_end)?;
    if block_size < extra_end + BGZF_FOOTER_SIZE {
        return Err(BamforgeError::Compression(format!(
            "BSIZE {} smaller than header and footer",
            block_size
        )));
    }
    buf.resize(block_size, 0);
    reader.read_exact(&mut buf[extra_end..])?;
    Ok(true)
}

/// Compress everything from `reader` into BGZF blocks on `writer`, followed by the EOF marker.
///
/// Returns the number of compressed bytes written.
///
/// # Example
///
/// ```
/// use bamforge::io::compression::{compress, EOF_MARKER};
///
/// # fn main() -> bamforge::Result<()> {
/// let mut out = Vec::new();
/// compress(&b"ACGTACGT"[..], &mut out)?;
/// assert!(out.ends_with(&EOF_MARKER));
/// # Ok(())
/// # }
/// ```
pub fn compress<R: Read, W: Write>(reader: R, writer: W) -> Result<u64> {
    compress_with_level(reader, writer, Compression::default())
}

/// [`compress`] with an explicit deflate level.
pub fn compress_with_level<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    level: Compression,
) -> Result<u64> {
    let mut buf = vec![0u8; MAX_BLOCK_DATA_SIZE];
    let mut written = 0u64;
    let mut blocks = 0usize;

    loop {
        let n = read_up_to(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        let block = compress_block(&buf[..n], level)?;
        writer.write_all(&block)?;
        written += block.len() as u64;
        blocks += 1;
    }

    writer.write_all(&EOF_MARKER)?;
    writer.flush()?;
    written += EOF_MARKER.len() as u64;

    debug!("compressed {} BGZF blocks ({} bytes)", blocks, written);
    Ok(written)
}

/// Decompress a BGZF stream (possibly several concatenated ones) into `writer`.
///
/// Returns the number of uncompressed bytes written.
pub fn decompress<R: Read, W: Write>(reader: R, mut writer: W) -> Result<u64> {
    let mut bgzf = BgzfReader::new(reader);
    let copied = io::copy(&mut bgzf, &mut writer)?;
    writer.flush()?;
    Ok(copied)
}

/// Streaming BGZF writer that tracks the virtual offset of the next byte.
///
/// Data is buffered until a block fills up ([`MAX_BLOCK_DATA_SIZE`]), then
/// compressed and written. Only [`BgzfWriter::finish`] flushes the last
/// partial block and appends [`EOF_MARKER`]. A writer dropped without it
/// leaves a stream with no terminator, which readers report as truncated.
///
/// # Example
///
/// ```
/// use bamforge::io::compression::BgzfWriter;
/// use std::io::Write;
///
/// # fn main() -> bamforge::Result<()> {
/// let mut writer = BgzfWriter::new(Vec::new());
/// let before = writer.virtual_offset();
/// writer.write_all(b"record bytes")?;
/// assert_eq!(writer.virtual_offset().uncompressed_offset(), before.uncompressed_offset() + 12);
/// let compressed = writer.finish()?;
/// assert!(!compressed.is_empty());
/// # Ok(())
/// # }
/// ```
pub struct BgzfWriter<W: Write> {
    inner: Option<W>,
    buffer: Vec<u8>,
    /// Compressed bytes emitted so far (start of the block being filled)
    compressed_offset: u64,
    level: Compression,
    blocks_written: usize,
}

impl<W: Write> BgzfWriter<W> {
    /// Create a writer with the default compression level.
    pub fn new(inner: W) -> Self {
        Self::with_level(inner, Compression::default())
    }

    /// Create a writer with an explicit compression level.
    pub fn with_level(inner: W, level: Compression) -> Self {
        Self {
            inner: Some(inner),
            buffer: Vec::with_capacity(MAX_BLOCK_DATA_SIZE),
            compressed_offset: 0,
            level,
            blocks_written: 0,
        }
    }

    /// Virtual offset at which the next written byte will land.
    pub fn virtual_offset(&self) -> VirtualOffset {
        VirtualOffset::new(self.compressed_offset, self.buffer.len() as u16)
    }

    /// Number of data blocks written so far (not counting the EOF marker).
    pub fn blocks_written(&self) -> usize {
        self.blocks_written
    }

    /// Borrow the underlying writer.
    pub fn get_ref(&self) -> Option<&W> {
        self.inner.as_ref()
    }

    fn flush_block(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let block = compress_block(&self.buffer, self.level).map_err(into_io_error)?;
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "BGZF writer already finished"))?;
        inner.write_all(&block)?;
        self.compressed_offset += block.len() as u64;
        self.blocks_written += 1;
        self.buffer.clear();
        Ok(())
    }

    fn finish_inner(&mut self) -> io::Result<()> {
        self.flush_block()?;
        if let Some(inner) = self.inner.as_mut() {
            inner.write_all(&EOF_MARKER)?;
            inner.flush()?;
        }
        Ok(())
    }

    /// Flush the final block, append the EOF marker and return the inner writer.
    pub fn finish(mut self) -> Result<W> {
        self.finish_inner()?;
        debug!(
            "BGZF writer finished: {} blocks, {} compressed bytes",
            self.blocks_written,
            self.compressed_offset + EOF_MARKER.len() as u64
        );
        self.inner
            .take()
            .ok_or_else(|| BamforgeError::InvalidArgument("BGZF writer already finished".to_string()))
    }
}

impl<W: Write> Write for BgzfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut remaining = buf;
        while !remaining.is_empty() {
            let space = MAX_BLOCK_DATA_SIZE - self.buffer.len();
            let n = remaining.len().min(space);
            self.buffer.extend_from_slice(&remaining[..n]);
            remaining = &remaining[n..];
            if self.buffer.len() >= MAX_BLOCK_DATA_SIZE {
                self.flush_block()?;
            }
        }
        Ok(buf.len())
    }

    /// Ends the current block early so everything written so far is on the inner writer.
    fn flush(&mut self) -> io::Result<()> {
        self.flush_block()?;
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

fn into_io_error(err: BamforgeError) -> io::Error {
    match err {
        BamforgeError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

/// Streaming BGZF reader.
///
/// Inflates one block at a time and exposes the uncompressed stream through
/// [`Read`] and [`BufRead`]. Empty blocks, including EOF markers in the
/// middle of concatenated files, are skipped.
pub struct BgzfReader<R> {
    inner: R,
    /// Uncompressed data of the current block
    block: Vec<u8>,
    /// Read position inside `block`
    position: usize,
    /// Compressed offset where the current block starts
    block_offset: u64,
    /// Compressed offset of the block after the current one
    next_block_offset: u64,
    /// Scratch space for compressed bytes
    raw: Vec<u8>,
}

impl<R: Read> BgzfReader<R> {
    /// Wrap a reader positioned at the start of a BGZF block.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            block: Vec::with_capacity(MAX_BLOCK_SIZE),
            position: 0,
            block_offset: 0,
            next_block_offset: 0,
            raw: Vec::with_capacity(MAX_BLOCK_SIZE),
        }
    }

    /// Virtual offset of the next byte that [`Read::read`] will return.
    pub fn virtual_offset(&self) -> VirtualOffset {
        if self.position < self.block.len() {
            VirtualOffset::new(self.block_offset, self.position as u16)
        } else {
            VirtualOffset::new(self.next_block_offset, 0)
        }
    }

    /// Borrow the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Load the next block. Returns `Ok(false)` at end of stream.
    fn read_block(&mut self) -> Result<bool> {
        if !read_raw_block(&mut self.inner, &mut self.raw)? {
            return Ok(false);
        }
        let extra_end = parse_header(&self.raw)?;
        self.block = inflate_block(&self.raw, extra_end)?;
        self.position = 0;
        self.block_offset = self.next_block_offset;
        self.next_block_offset += self.raw.len() as u64;
        Ok(true)
    }

    /// Advance past exhausted or empty blocks. Returns `Ok(false)` at end of stream.
    fn ensure_data(&mut self) -> Result<bool> {
        while self.position >= self.block.len() {
            if !self.read_block()? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl<R: Read + Seek> BgzfReader<R> {
    /// Seek to a virtual offset.
    ///
    /// Jumps to the block start in the compressed stream, inflates exactly that
    /// block, then skips `uncompressed_offset` bytes into it.
    pub fn seek(&mut self, offset: VirtualOffset) -> Result<()> {
        let block_start = offset.compressed_offset();
        self.inner.seek(SeekFrom::Start(block_start))?;
        self.next_block_offset = block_start;
        self.block.clear();
        self.position = 0;

        let within = offset.uncompressed_offset() as usize;
        if !self.read_block()? {
            if within == 0 {
                self.block_offset = block_start;
                return Ok(());
            }
            return Err(BamforgeError::InvalidArgument(format!(
                "Virtual offset {} is past the end of the stream",
                offset
            )));
        }
        if within > self.block.len() {
            return Err(BamforgeError::InvalidArgument(format!(
                "Virtual offset {} points past the end of a {}-byte block",
                offset,
                self.block.len()
            )));
        }
        self.position = within;
        Ok(())
    }
}

impl<R: Read> Read for BgzfReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: Read> BufRead for BgzfReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if !self.ensure_data().map_err(into_io_error)? {
            return Ok(&[]);
        }
        Ok(&self.block[self.position..])
    }

    fn consume(&mut self, amt: usize) {
        self.position = (self.position + amt).min(self.block.len());
    }
}
