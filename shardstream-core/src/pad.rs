//! Block-size padding
//!
//! The primary scheme is size-describing: the plaintext is followed by a
//! zero suffix whose final four bytes record the suffix's own length as a
//! big-endian u32. A reader can discover and strip the padding from a
//! four-byte tail read with no prior knowledge of the plaintext size or the
//! block size.
//!
//! A simpler byte-pad variant ([`byte_pad`] / [`byte_unpad`]) is kept as a
//! separate utility: every pad byte equals the pad length, which caps the
//! block size below 256. The two schemes are not wire-compatible; pick one
//! per data set.

use std::io::{Cursor, Read};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use bytes::Bytes;

use crate::error::{Result, ShardStreamError};
use crate::source::{subrange, ByteStream, BytesSource, LazyStream, SharedSource};

/// Length of the big-endian pad-length trailer.
const TRAILER_SIZE: usize = 4;

/// Compute the suffix that pads `data_len` up to a multiple of
/// `block_size`.
///
/// The suffix is the smallest `P >= 4` with `data_len + P` a multiple of
/// `block_size`: zeros followed by `u32be(P)`. `block_size` must be
/// positive.
pub fn padding_for(data_len: u64, block_size: u64) -> Vec<u8> {
    let r = (data_len + TRAILER_SIZE as u64) % block_size;
    let mut padding = TRAILER_SIZE;
    if r > 0 {
        padding += (block_size - r) as usize;
    }
    let mut bytes = vec![0u8; padding];
    bytes[padding - TRAILER_SIZE..].copy_from_slice(&(padding as u32).to_be_bytes());
    bytes
}

/// Append a size-describing suffix so the result is block-aligned.
///
/// Returns the padded source and the suffix length.
pub fn pad(source: SharedSource, block_size: u64) -> (SharedSource, usize) {
    let padding = padding_for(source.size(), block_size);
    let padding_len = padding.len();
    let tail: SharedSource = Arc::new(BytesSource::new(padding));
    (crate::source::concat(&[source, tail]), padding_len)
}

/// Strip a known amount of padding from the end of a source.
pub fn unpad(source: SharedSource, padding: usize) -> Result<SharedSource> {
    let data_len = source.size().checked_sub(padding as u64).ok_or(
        ShardStreamError::OutOfRange {
            offset: 0,
            length: padding as u64,
            size: source.size(),
        },
    )?;
    subrange(source, 0, data_len)
}

/// Strip padding discovered from the source's four-byte tail.
pub fn unpad_autodetect(source: SharedSource) -> Result<SharedSource> {
    let size = source.size();
    if size < TRAILER_SIZE as u64 {
        return Err(ShardStreamError::OutOfRange {
            offset: 0,
            length: TRAILER_SIZE as u64,
            size,
        });
    }
    let mut trailer = [0u8; TRAILER_SIZE];
    source
        .range(size - TRAILER_SIZE as u64, TRAILER_SIZE as u64)
        .read_exact(&mut trailer)?;
    unpad(source, u32::from_be_bytes(trailer) as usize)
}

/// Forward-counting reader for plaintexts of unknown size.
///
/// Counts bytes as they flow and, once the inner reader ends, emits the
/// computed padding as a trailing segment. Not random-access; use [`pad`]
/// when the size is known up front.
pub fn pad_stream(reader: impl Read + Send + 'static, block_size: u64) -> impl Read + Send {
    let count = Arc::new(AtomicU64::new(0));
    let counted = CountingReader {
        inner: reader,
        count: Arc::clone(&count),
    };
    counted.chain(LazyStream::new(move || {
        let padding = padding_for(count.load(Ordering::Acquire), block_size);
        Box::new(Cursor::new(padding)) as ByteStream
    }))
}

struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::AcqRel);
        Ok(n)
    }
}

// =============================================================================
// BYTE-PAD VARIANT
// =============================================================================

/// Pad with bytes whose value equals the pad length.
///
/// The pad length `p` is the unique value in `1..=block_size` making
/// `data_len + p` a multiple of `block_size`, so a reader recovers it from
/// the final byte. Requires `block_size < 256`.
pub fn byte_pad(source: SharedSource, block_size: u64) -> Result<(SharedSource, usize)> {
    if block_size == 0 || block_size >= 256 {
        return Err(ShardStreamError::BlockTooLarge {
            block_size: block_size as usize,
            max: 255,
        });
    }
    let r = source.size() % block_size;
    let padding = (block_size - r) as usize;
    let tail: SharedSource = Arc::new(BytesSource::new(Bytes::from(vec![
        padding as u8;
        padding
    ])));
    Ok((crate::source::concat(&[source, tail]), padding))
}

/// Strip byte-padding discovered from the source's final byte.
pub fn byte_unpad(source: SharedSource) -> Result<SharedSource> {
    let size = source.size();
    if size == 0 {
        return Err(ShardStreamError::OutOfRange {
            offset: 0,
            length: 1,
            size,
        });
    }
    let mut last = [0u8; 1];
    source.range(size - 1, 1).read_exact(&mut last)?;
    unpad(source, last[0] as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_source(data: &[u8]) -> SharedSource {
        Arc::new(BytesSource::new(data.to_vec()))
    }

    fn read_all_of(source: &SharedSource) -> Vec<u8> {
        let mut buf = Vec::new();
        source
            .range(0, source.size())
            .read_to_end(&mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn test_trailer_pad_small() {
        // "abcdef" at block size 6: (6 + 4) % 6 = 4, so P = 4 + 2 = 6 and
        // the padded size is 12.
        let (padded, padding) = pad(bytes_source(b"abcdef"), 6);
        assert_eq!(padding, 6);
        assert_eq!(padded.size(), 12);

        let unpadded = unpad(Arc::clone(&padded), padding).unwrap();
        assert_eq!(read_all_of(&unpadded), b"abcdef");

        let detected = unpad_autodetect(padded).unwrap();
        assert_eq!(read_all_of(&detected), b"abcdef");
    }

    #[test]
    fn test_trailer_pad_table() {
        for &(data, block_size) in &[
            (&b"abcdef"[..], 24u64),
            (b"abcdef", 6),
            (b"abcdef", 7),
            (b"abcde", 7),
            (b"abcdefg", 7),
            (b"", 16),
            (b"x", 1),
        ] {
            let (padded, padding) = pad(bytes_source(data), block_size);
            assert!(padding >= TRAILER_SIZE);
            assert_eq!(
                padded.size() % block_size,
                0,
                "data {:?} block {}",
                data,
                block_size
            );
            assert_eq!(padded.size(), data.len() as u64 + padding as u64);

            let detected = unpad_autodetect(padded).unwrap();
            assert_eq!(read_all_of(&detected), data);
        }
    }

    #[test]
    fn test_byte_pad_table() {
        for &(data, block_size, expected) in &[
            (&b"abcdef"[..], 24u64, 18usize),
            (b"abcdef", 6, 6),
            (b"abcdef", 7, 1),
            (b"abcde", 7, 2),
            (b"abcdefg", 7, 7),
        ] {
            let (padded, padding) = byte_pad(bytes_source(data), block_size).unwrap();
            assert_eq!(padding, expected, "data {:?} block {}", data, block_size);
            assert_eq!(padded.size() % block_size, 0);

            let unpadded = byte_unpad(padded).unwrap();
            assert_eq!(read_all_of(&unpadded), data);
        }
    }

    #[test]
    fn test_byte_pad_block_size_limit() {
        assert!(matches!(
            byte_pad(bytes_source(b"abc"), 256),
            Err(ShardStreamError::BlockTooLarge { .. })
        ));
        assert!(byte_pad(bytes_source(b"abc"), 255).is_ok());
    }

    #[test]
    fn test_pad_stream_matches_pad() {
        for len in [0usize, 1, 5, 64, 100] {
            let data: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
            let block_size = 24;

            let (padded, _) = pad(bytes_source(&data), block_size);
            let expected = read_all_of(&padded);

            let mut streamed = Vec::new();
            pad_stream(Cursor::new(data), block_size)
                .read_to_end(&mut streamed)
                .unwrap();
            assert_eq!(streamed, expected, "len {len}");
        }
    }

    #[test]
    fn test_unpad_beyond_size() {
        let (padded, _) = pad(bytes_source(b"abc"), 8);
        assert!(matches!(
            unpad(padded, 100),
            Err(ShardStreamError::OutOfRange { .. })
        ));
    }
}
