//! Block transform framework
//!
//! A [`BlockTransform`] is a pure, deterministic function over fixed-size
//! blocks, indexed by a 64-bit block number. [`transform`] lifts it over a
//! [`RangeSource`] while preserving random access: a window on the output is
//! served by mapping it to the smallest enclosing run of whole output
//! blocks, streaming the aligned input window through the transform, and
//! discarding the leading bytes.
//!
//! Block numbers passed to the transform are monotonic and start at the
//! first aligned block of the current window, not at zero, which gives
//! stateless transforms a reliable positional parameter (nonces, block
//! tags).

use std::io::{self, Read};
use std::sync::Arc;

use crate::error::{replay, Result, ShardStreamError};
use crate::source::{read_full, ByteStream, RangeSource, SharedSource};

/// A deterministic fixed-size block function.
///
/// Given exactly `in_block_size` input bytes and a block number, appends
/// exactly `out_block_size` bytes to `out` or fails. Implementations are
/// stateless and may be shared freely across threads and pipelines.
/// Inversibility is not required by the framework, only of matched pairs
/// (encrypt/decrypt, add/check).
pub trait BlockTransform: Send + Sync {
    /// Block size consumed per call. Strictly positive.
    fn in_block_size(&self) -> usize;

    /// Block size produced per call. Strictly positive.
    fn out_block_size(&self) -> usize;

    /// Transform one block, appending the output to `out`.
    fn transform(&self, out: &mut Vec<u8>, input: &[u8], block_num: u64) -> Result<()>;
}

/// Map a byte window to the smallest run of whole blocks enclosing it.
///
/// Returns `(first_block, block_count)` over the grid of `block_size`.
pub(crate) fn enclosing_blocks(offset: u64, length: u64, block_size: u64) -> (u64, u64) {
    let first_block = offset / block_size;
    if length == 0 {
        return (first_block, 0);
    }
    let end = offset + length;
    let last_block = end / block_size;
    if end % block_size == 0 {
        (first_block, last_block - first_block)
    } else {
        (first_block, 1 + last_block - first_block)
    }
}

/// A forward stream applying a transform block-by-block.
///
/// Reads whole input blocks from `input`, numbers them starting at
/// `first_block`, and serves the transformed output. A torn trailing block
/// surfaces as `UnexpectedEof`; any failure latches and repeats.
pub struct BlockStream {
    input: ByteStream,
    transform: Arc<dyn BlockTransform>,
    block_num: u64,
    inbuf: Vec<u8>,
    outbuf: Vec<u8>,
    outpos: usize,
    failed: Option<Arc<io::Error>>,
}

impl BlockStream {
    /// Apply `transform` to `input`, numbering blocks from `first_block`.
    pub fn new(input: ByteStream, transform: Arc<dyn BlockTransform>, first_block: u64) -> Self {
        let in_block_size = transform.in_block_size();
        let out_block_size = transform.out_block_size();
        Self {
            input,
            transform,
            block_num: first_block,
            inbuf: vec![0u8; in_block_size],
            outbuf: Vec::with_capacity(out_block_size),
            outpos: 0,
            failed: None,
        }
    }

    fn fail(&mut self, err: io::Error) -> io::Error {
        let shared = Arc::new(err);
        self.failed = Some(Arc::clone(&shared));
        replay(&shared)
    }

    /// Pull and transform the next input block. Returns false on clean EOF.
    fn refill(&mut self) -> io::Result<bool> {
        let n = match read_full(&mut self.input, &mut self.inbuf) {
            Ok(n) => n,
            Err(err) => return Err(self.fail(err)),
        };
        if n == 0 {
            return Ok(false);
        }
        if n < self.inbuf.len() {
            return Err(self.fail(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended mid-block",
            )));
        }
        self.outbuf.clear();
        self.outpos = 0;
        if let Err(err) = self
            .transform
            .transform(&mut self.outbuf, &self.inbuf, self.block_num)
        {
            return Err(self.fail(err.into_io()));
        }
        self.block_num += 1;
        Ok(true)
    }
}

impl Read for BlockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(err) = &self.failed {
            return Err(replay(err));
        }
        if self.outpos >= self.outbuf.len() && !self.refill()? {
            return Ok(0);
        }
        let n = buf.len().min(self.outbuf.len() - self.outpos);
        buf[..n].copy_from_slice(&self.outbuf[self.outpos..self.outpos + n]);
        self.outpos += n;
        Ok(n)
    }
}

struct TransformedSource {
    source: SharedSource,
    transform: Arc<dyn BlockTransform>,
}

impl RangeSource for TransformedSource {
    fn size(&self) -> u64 {
        let blocks = self.source.size() / self.transform.in_block_size() as u64;
        blocks * self.transform.out_block_size() as u64
    }

    fn range(&self, offset: u64, length: u64) -> ByteStream {
        let in_block = self.transform.in_block_size() as u64;
        let out_block = self.transform.out_block_size() as u64;
        let (first_block, block_count) = enclosing_blocks(offset, length, out_block);

        let input = self
            .source
            .range(first_block * in_block, block_count * in_block);
        let mut stream = BlockStream::new(input, Arc::clone(&self.transform), first_block);

        // Skip up to the window start. EOF here means the window is empty,
        // not an error.
        let discard = offset - first_block * out_block;
        match io::copy(&mut (&mut stream).take(discard), &mut io::sink()) {
            Ok(copied) if copied < discard => Box::new(io::empty()),
            Ok(_) => Box::new(stream.take(length)),
            Err(err) => Box::new(crate::source::FatalStream::new(err)),
        }
    }
}

/// Apply a block transform to a range source.
///
/// Requires `source.size()` to be a multiple of the transform's input block
/// size; the result has size `(size / in_block_size) * out_block_size` and
/// remains randomly accessible.
pub fn transform(
    source: SharedSource,
    transform: Arc<dyn BlockTransform>,
) -> Result<SharedSource> {
    let in_block_size = transform.in_block_size() as u64;
    if source.size() % in_block_size != 0 {
        return Err(ShardStreamError::InvalidAlignment {
            size: source.size(),
            block_size: in_block_size,
        });
    }
    Ok(Arc::new(TransformedSource { source, transform }))
}
