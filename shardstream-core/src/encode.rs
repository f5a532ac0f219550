//! Erasure encoder streamer
//!
//! [`EncodedSource`] takes one block-aligned source and, per window, hands
//! out `total_count` piece streams that share a single encode state. The
//! input is read once per decoded block no matter how many pieces are being
//! consumed concurrently: whichever piece stream drains the current block
//! last pulls and encodes the next one, and everyone else waits on a
//! condition variable. No piece can run a block ahead of its slowest live
//! sibling, so buffering stays bounded at one encoded block per piece.
//!
//! Dropping a piece stream marks that piece abandoned: its undrained bytes
//! count as drained immediately and later blocks skip its queue, so
//! surviving pieces advance without it.

use std::io::{self, Read};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{replay, Result, ShardStreamError};
use crate::source::{read_full, ByteStream, SharedSource};
use crate::transform::enclosing_blocks;
use crate::ErasureScheme;

/// Erasure-encodes a source into `total_count` randomly accessible piece
/// streams.
///
/// Unlike the other stages this is not itself a [`RangeSource`]: a window
/// maps to one stream per piece, all fed from the same pass over the input.
///
/// [`RangeSource`]: crate::RangeSource
pub struct EncodedSource {
    source: SharedSource,
    scheme: Arc<dyn ErasureScheme>,
}

impl EncodedSource {
    /// Wrap `source` for encoding under `scheme`.
    ///
    /// The source size must be a multiple of the scheme's decoded block
    /// size.
    pub fn new(source: SharedSource, scheme: Arc<dyn ErasureScheme>) -> Result<Self> {
        let decoded_block_size = scheme.decoded_block_size() as u64;
        if source.size() % decoded_block_size != 0 {
            return Err(ShardStreamError::InvalidAlignment {
                size: source.size(),
                block_size: decoded_block_size,
            });
        }
        Ok(Self { source, scheme })
    }

    /// Size of each encoded piece produced by [`range`](Self::range) over
    /// the full source.
    pub fn output_size(&self) -> u64 {
        let blocks = self.source.size() / self.scheme.decoded_block_size() as u64;
        blocks * self.scheme.encoded_block_size() as u64
    }

    /// Open one stream per piece over the window `[offset, offset+length)`
    /// of the encoded output, in piece order.
    ///
    /// Offsets address a single piece's stream; all pieces are advanced to
    /// the same window. The streams may be consumed from different threads
    /// at different rates, but no piece can run more than one block ahead
    /// of its slowest live sibling: a reader that drains one piece to the
    /// end while holding the others idle will block. Consume the pieces
    /// concurrently, or drop the ones you do not want.
    pub fn range(&self, offset: u64, length: u64) -> Result<Vec<ByteStream>> {
        let encoded_block_size = self.scheme.encoded_block_size() as u64;
        let decoded_block_size = self.scheme.decoded_block_size() as u64;
        let (first_block, block_count) = enclosing_blocks(offset, length, encoded_block_size);

        let input = self.source.range(
            first_block * decoded_block_size,
            block_count * decoded_block_size,
        );
        let mut streams = encode_streams(input, Arc::clone(&self.scheme));

        // Every piece skips the same lead-in to the window start. One block
        // refill covers all pieces, so draining them in order cannot block.
        let discard = offset - first_block * encoded_block_size;
        let mut out = Vec::with_capacity(streams.len());
        for mut stream in streams.drain(..) {
            io::copy(&mut (&mut stream).take(discard), &mut io::sink())?;
            out.push(Box::new(stream.take(length)) as ByteStream);
        }
        Ok(out)
    }
}

/// Fan a forward stream out into per-piece encoded streams sharing one
/// encode state.
///
/// The input must consist of whole decoded blocks; a torn trailing block
/// surfaces as `UnexpectedEof` on every piece.
pub fn encode_streams(
    input: ByteStream,
    scheme: Arc<dyn ErasureScheme>,
) -> Vec<EncodedPieceStream> {
    let total = scheme.total_count();
    let state = Arc::new(EncodeState {
        shared: Mutex::new(EncodeShared {
            input,
            inbuf: vec![0u8; scheme.decoded_block_size()],
            queues: (0..total).map(|_| PieceQueue::default()).collect(),
            abandoned: vec![false; total],
            pieces_remaining: 0,
            eof: false,
            err: None,
        }),
        available: Condvar::new(),
        scheme,
    });
    (0..total)
        .map(|num| EncodedPieceStream {
            state: Arc::clone(&state),
            num,
        })
        .collect()
}

struct EncodeState {
    shared: Mutex<EncodeShared>,
    available: Condvar,
    scheme: Arc<dyn ErasureScheme>,
}

struct EncodeShared {
    input: ByteStream,
    inbuf: Vec<u8>,
    queues: Vec<PieceQueue>,
    abandoned: Vec<bool>,
    // Pieces still holding bytes of the current encoded block.
    pieces_remaining: usize,
    eof: bool,
    err: Option<Arc<io::Error>>,
}

#[derive(Default)]
struct PieceQueue {
    buf: Vec<u8>,
    pos: usize,
}

impl PieceQueue {
    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }
}

/// One piece's view of a shared encode state.
pub struct EncodedPieceStream {
    state: Arc<EncodeState>,
    num: usize,
}

impl Read for EncodedPieceStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let state = &*self.state;
        let mut guard = state
            .shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            let shared = &mut *guard;
            if !shared.queues[self.num].is_empty() {
                let queue = &mut shared.queues[self.num];
                let n = buf.len().min(queue.buf.len() - queue.pos);
                buf[..n].copy_from_slice(&queue.buf[queue.pos..queue.pos + n]);
                queue.pos += n;
                if queue.is_empty() {
                    shared.pieces_remaining -= 1;
                }
                return Ok(n);
            }
            if let Some(err) = &shared.err {
                return Err(replay(err));
            }
            if shared.eof {
                return Ok(0);
            }
            if shared.pieces_remaining > 0 {
                // Another piece still holds part of the current block.
                guard = state
                    .available
                    .wait(guard)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                continue;
            }
            shared.next_block(state);
        }
    }
}

impl EncodeShared {
    /// Pull and encode the next decoded block, filling the live piece
    /// queues. Caller holds the lock; waiters are woken on every outcome.
    fn next_block(&mut self, state: &EncodeState) {
        match read_full(&mut self.input, &mut self.inbuf) {
            Ok(0) => self.eof = true,
            Ok(n) if n < self.inbuf.len() => {
                self.err = Some(Arc::new(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "input ended mid decoded block",
                )));
            }
            Ok(_) => {
                let EncodeShared {
                    inbuf,
                    queues,
                    abandoned,
                    ..
                } = self;
                let result = state.scheme.encode(inbuf, &mut |num, data| {
                    if !abandoned[num] {
                        let queue = &mut queues[num];
                        queue.buf.clear();
                        queue.pos = 0;
                        queue.buf.extend_from_slice(data);
                    }
                });
                match result {
                    Ok(()) => {
                        self.pieces_remaining =
                            self.abandoned.iter().filter(|dropped| !**dropped).count();
                    }
                    Err(err) => self.err = Some(Arc::new(err.into_io())),
                }
            }
            Err(err) => self.err = Some(Arc::new(err)),
        }
        state.available.notify_all();
    }
}

impl Drop for EncodedPieceStream {
    fn drop(&mut self) {
        let mut guard = match self.state.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let shared = &mut *guard;
        shared.abandoned[self.num] = true;
        if !shared.queues[self.num].is_empty() {
            let queue = &mut shared.queues[self.num];
            queue.pos = queue.buf.len();
            shared.pieces_remaining -= 1;
        }
        // Siblings may be waiting for this piece to drain.
        self.state.available.notify_all();
    }
}
