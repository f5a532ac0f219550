//! Range sources and stream primitives
//!
//! A [`RangeSource`] is an immutable byte source of known size that can open
//! a fresh forward stream over any `[offset, offset + length)` window. Every
//! pipeline stage in this crate consumes and produces range sources, so
//! random access survives arbitrarily deep stacking and a range server can
//! answer any sub-range while touching only the bytes it needs.
//!
//! This module holds the leaf sources and the structural adapters:
//! [`BytesSource`], [`ReadAtSource`], [`FatalStream`], [`LazyStream`],
//! [`concat`], and [`subrange`].

use std::io::{self, Cursor, Read};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{replay, Result, ShardStreamError};

/// A one-shot forward byte stream.
///
/// End of stream is normal completion; any other failure is terminal and a
/// failed stream keeps reporting its error. Streams are not restartable.
pub type ByteStream = Box<dyn Read + Send>;

/// A range source shared across pipeline stages.
pub type SharedSource = Arc<dyn RangeSource>;

/// An immutable byte source of known size supporting repeated random-access
/// windowed reads.
///
/// Implementations must tolerate concurrent `range` calls from multiple
/// threads, each returning an independent stream; a single returned stream
/// does not need to be thread-safe. A source holds no cursor of its own.
pub trait RangeSource: Send + Sync {
    /// Total size of the source in bytes.
    fn size(&self) -> u64;

    /// Open a fresh stream over `[offset, offset + length)`.
    ///
    /// The stream yields exactly `length` bytes and then ends. Windows that
    /// fall outside `[0, size)` produce a stream that fails on first read,
    /// so validation errors surface through the read path like any other
    /// stream failure.
    fn range(&self, offset: u64, length: u64) -> ByteStream;
}

/// Validate that `[offset, offset + length)` lies within `[0, size)`.
pub(crate) fn check_window(offset: u64, length: u64, size: u64) -> Result<()> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(ShardStreamError::OutOfRange {
            offset,
            length,
            size,
        }),
    }
}

/// Read until `buf` is full or the stream ends, returning the bytes read.
///
/// Unlike [`Read::read_exact`] a clean EOF at a block boundary is not an
/// error here; callers distinguish "no block" (0) from "torn block"
/// (0 < n < len) themselves.
pub(crate) fn read_full(stream: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match stream.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(total)
}

// =============================================================================
// LEAF SOURCES
// =============================================================================

/// Range source over an owned byte buffer.
#[derive(Debug, Clone)]
pub struct BytesSource(Bytes);

impl BytesSource {
    /// Create a source over the given bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// An empty source.
    pub fn empty() -> Self {
        Self(Bytes::new())
    }
}

impl RangeSource for BytesSource {
    fn size(&self) -> u64 {
        self.0.len() as u64
    }

    fn range(&self, offset: u64, length: u64) -> ByteStream {
        match check_window(offset, length, self.size()) {
            Ok(()) => Box::new(Cursor::new(
                self.0.slice(offset as usize..(offset + length) as usize),
            )),
            Err(err) => fatal(err),
        }
    }
}

/// A positioned random-access reader.
///
/// The file-backed case: an OS handle supporting positioned reads. Reads do
/// not move any shared cursor, so one handle serves many streams at once.
pub trait ReadAt: Send + Sync {
    /// Read into `buf` starting at `offset`, returning the bytes read.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

#[cfg(unix)]
impl ReadAt for std::fs::File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
}

#[cfg(windows)]
impl ReadAt for std::fs::File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

/// Range source over a positioned reader and an advertised size.
pub struct ReadAtSource {
    reader: Arc<dyn ReadAt>,
    size: u64,
}

impl ReadAtSource {
    /// Wrap a positioned reader. `size` is the advertised total size; reads
    /// past it are rejected up front rather than passed to the reader.
    pub fn new(reader: Arc<dyn ReadAt>, size: u64) -> Self {
        Self { reader, size }
    }
}

impl RangeSource for ReadAtSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn range(&self, offset: u64, length: u64) -> ByteStream {
        match check_window(offset, length, self.size) {
            Ok(()) => Box::new(ReadAtStream {
                reader: Arc::clone(&self.reader),
                offset,
                remaining: length,
            }),
            Err(err) => fatal(err),
        }
    }
}

struct ReadAtStream {
    reader: Arc<dyn ReadAt>,
    offset: u64,
    remaining: u64,
}

impl Read for ReadAtStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let want = self.remaining.min(buf.len() as u64) as usize;
        let n = self.reader.read_at(&mut buf[..want], self.offset)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "positioned reader ended before the requested window",
            ));
        }
        self.offset += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}

// =============================================================================
// STREAM ADAPTERS
// =============================================================================

/// A stream that yields no bytes and fails with the same error on every
/// read. Used to defer window-validation failures into the read path.
pub struct FatalStream {
    err: Arc<io::Error>,
}

impl FatalStream {
    /// Create a stream that always fails with `err`.
    pub fn new(err: io::Error) -> Self {
        Self {
            err: Arc::new(err),
        }
    }
}

impl Read for FatalStream {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(replay(&self.err))
    }
}

/// Boxed [`FatalStream`] carrying a library error.
pub fn fatal(err: ShardStreamError) -> ByteStream {
    Box::new(FatalStream::new(err.into_io()))
}

/// A stream that opens its inner stream on first read.
///
/// The thunk runs at most once. Downstream stages that may never be reached
/// (the right half of a concatenation, the padding tail) hide behind this so
/// they are opened only when bytes are actually pulled from them.
pub struct LazyStream {
    thunk: Option<Box<dyn FnOnce() -> ByteStream + Send>>,
    inner: Option<ByteStream>,
}

impl LazyStream {
    /// Defer opening to the first read.
    pub fn new(thunk: impl FnOnce() -> ByteStream + Send + 'static) -> Self {
        Self {
            thunk: Some(Box::new(thunk)),
            inner: None,
        }
    }
}

impl Read for LazyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(thunk) = self.thunk.take() {
            self.inner = Some(thunk());
        }
        match self.inner.as_mut() {
            Some(stream) => stream.read(buf),
            None => Ok(0),
        }
    }
}

// =============================================================================
// STRUCTURAL SOURCES
// =============================================================================

struct ConcatSource {
    left: SharedSource,
    right: SharedSource,
    size: u64,
}

impl RangeSource for ConcatSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn range(&self, offset: u64, length: u64) -> ByteStream {
        let left_size = self.left.size();
        if offset.saturating_add(length) <= left_size {
            return self.left.range(offset, length);
        }
        if offset >= left_size {
            return self.right.range(offset - left_size, length);
        }
        // The window spans the seam. The right child is opened lazily so a
        // caller that stops early never touches it.
        let left_len = left_size - offset;
        let right_len = length - left_len;
        let right = Arc::clone(&self.right);
        Box::new(
            self.left
                .range(offset, left_len)
                .chain(LazyStream::new(move || right.range(0, right_len))),
        )
    }
}

/// Concatenate sources into one whose size is the sum of the children.
///
/// Built as a balanced binary tree of two-way concatenations, so locating
/// the children intersecting a window costs O(log n) and children outside
/// the window are never opened.
pub fn concat(sources: &[SharedSource]) -> SharedSource {
    match sources {
        [] => Arc::new(BytesSource::empty()),
        [only] => Arc::clone(only),
        [left, right] => concat2(Arc::clone(left), Arc::clone(right)),
        _ => {
            let mid = sources.len() / 2;
            concat2(concat(&sources[..mid]), concat(&sources[mid..]))
        }
    }
}

fn concat2(left: SharedSource, right: SharedSource) -> SharedSource {
    let size = left.size() + right.size();
    Arc::new(ConcatSource { left, right, size })
}

struct SubrangeSource {
    source: SharedSource,
    offset: u64,
    length: u64,
}

impl RangeSource for SubrangeSource {
    fn size(&self) -> u64 {
        self.length
    }

    fn range(&self, offset: u64, length: u64) -> ByteStream {
        match check_window(offset, length, self.length) {
            Ok(()) => self.source.range(self.offset + offset, length),
            Err(err) => fatal(err),
        }
    }
}

/// Restrict a source to the window `[offset, offset + length)`.
///
/// Fails at construction with `OutOfRange` if the window does not fit the
/// source. `subrange(s, o, l).range(o', l')` reads `s.range(o + o', l')`.
pub fn subrange(source: SharedSource, offset: u64, length: u64) -> Result<SharedSource> {
    check_window(offset, length, source.size())?;
    Ok(Arc::new(SubrangeSource {
        source,
        offset,
        length,
    }))
}
