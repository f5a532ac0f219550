//! Erasure decoder streamer
//!
//! [`decode`] turns a mapping of surviving piece sources back into one
//! randomly accessible reconstructed source. Each window opens the aligned
//! encoded window on every available piece and feeds a combining reader
//! that pulls one encoded block from all pieces in parallel, reconstructs
//! the decoded block, and serves it.

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{replay, Result, ShardStreamError};
use crate::source::{fatal, read_full, ByteStream, BytesSource, FatalStream, RangeSource, SharedSource};
use crate::transform::enclosing_blocks;
use crate::ErasureScheme;

/// Reconstruct a range source from at least `required_count` piece sources.
///
/// All pieces must share one size, which must be a multiple of the
/// scheme's encoded block size; the reconstructed source has size
/// `(piece_size / encoded_block_size) * decoded_block_size`. An empty map
/// yields an empty source.
pub fn decode(
    pieces: HashMap<usize, SharedSource>,
    scheme: Arc<dyn ErasureScheme>,
) -> Result<SharedSource> {
    let mut piece_size = None;
    for piece in pieces.values() {
        match piece_size {
            None => piece_size = Some(piece.size()),
            Some(expected) if expected != piece.size() => {
                return Err(ShardStreamError::PieceSizeMismatch {
                    expected,
                    actual: piece.size(),
                });
            }
            Some(_) => {}
        }
    }
    let piece_size = match piece_size {
        Some(size) => size,
        None => return Ok(Arc::new(BytesSource::empty())),
    };
    let encoded_block_size = scheme.encoded_block_size() as u64;
    if piece_size % encoded_block_size != 0 {
        return Err(ShardStreamError::InvalidAlignment {
            size: piece_size,
            block_size: encoded_block_size,
        });
    }
    if pieces.len() < scheme.required_count() {
        return Err(ShardStreamError::InsufficientPieces {
            available: pieces.len(),
            required: scheme.required_count(),
        });
    }
    Ok(Arc::new(DecodedSource {
        pieces,
        scheme,
        piece_size,
    }))
}

struct DecodedSource {
    pieces: HashMap<usize, SharedSource>,
    scheme: Arc<dyn ErasureScheme>,
    piece_size: u64,
}

impl RangeSource for DecodedSource {
    fn size(&self) -> u64 {
        let blocks = self.piece_size / self.scheme.encoded_block_size() as u64;
        blocks * self.scheme.decoded_block_size() as u64
    }

    fn range(&self, offset: u64, length: u64) -> ByteStream {
        if let Err(err) = crate::source::check_window(offset, length, self.size()) {
            return fatal(err);
        }
        let encoded_block_size = self.scheme.encoded_block_size() as u64;
        let decoded_block_size = self.scheme.decoded_block_size() as u64;
        let (first_block, block_count) = enclosing_blocks(offset, length, decoded_block_size);

        let readers = self
            .pieces
            .iter()
            .map(|(&num, piece)| PieceReader {
                num,
                stream: piece.range(
                    first_block * encoded_block_size,
                    block_count * encoded_block_size,
                ),
                inbuf: vec![0u8; encoded_block_size as usize],
            })
            .collect();
        let mut combined = CombinedStream {
            readers,
            scheme: Arc::clone(&self.scheme),
            outbuf: Vec::with_capacity(decoded_block_size as usize),
            outpos: 0,
            failed: None,
        };

        let discard = offset - first_block * decoded_block_size;
        match io::copy(&mut (&mut combined).take(discard), &mut io::sink()) {
            Ok(copied) if copied < discard => Box::new(FatalStream::new(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "pieces ended before the requested window",
            ))),
            Ok(_) => Box::new(combined.take(length)),
            Err(err) => Box::new(FatalStream::new(err)),
        }
    }
}

struct PieceReader {
    num: usize,
    stream: ByteStream,
    inbuf: Vec<u8>,
}

/// Combines per-piece encoded streams into a decoded stream.
struct CombinedStream {
    readers: Vec<PieceReader>,
    scheme: Arc<dyn ErasureScheme>,
    outbuf: Vec<u8>,
    outpos: usize,
    failed: Option<Arc<io::Error>>,
}

impl CombinedStream {
    fn fail(&mut self, err: io::Error) -> io::Error {
        let shared = Arc::new(err);
        self.failed = Some(Arc::clone(&shared));
        replay(&shared)
    }

    /// Read one encoded block from every piece in parallel and decode it.
    /// Returns false on clean EOF across all pieces.
    fn refill(&mut self) -> io::Result<bool> {
        let results: Vec<io::Result<usize>> = self
            .readers
            .par_iter_mut()
            .map(|reader| read_full(&mut reader.stream, &mut reader.inbuf))
            .collect();

        let mut saw_block = false;
        let mut saw_eof = false;
        for result in results {
            match result {
                Ok(0) => saw_eof = true,
                Ok(n) if n < self.scheme.encoded_block_size() => {
                    return Err(self.fail(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "piece stream ended mid encoded block",
                    )));
                }
                Ok(_) => saw_block = true,
                Err(err) => return Err(self.fail(err)),
            }
        }
        if saw_eof {
            if saw_block {
                // Some pieces ended while others still had data.
                return Err(self.fail(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "piece streams ended at different offsets",
                )));
            }
            return Ok(false);
        }

        let shares: HashMap<usize, &[u8]> = self
            .readers
            .iter()
            .map(|reader| (reader.num, reader.inbuf.as_slice()))
            .collect();
        self.outbuf.clear();
        self.outpos = 0;
        if let Err(err) = self.scheme.decode(&mut self.outbuf, &shares) {
            let io_err = err.into_io();
            return Err(self.fail(io_err));
        }
        Ok(true)
    }
}

impl Read for CombinedStream {
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
