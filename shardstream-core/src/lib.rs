//! shardstream core library
//!
//! Composable, random-access byte-stream pipelines for data at rest. This
//! crate provides:
//! - Range sources: immutable byte sources of known size that open a fresh
//!   stream over any window (buffers, positioned readers, concatenation,
//!   subranges, lazy opening)
//! - A block transform framework preserving random access across
//!   fixed-size block functions
//! - Size-describing padding so plaintexts align to a block grid
//! - Reed-Solomon erasure encode/decode streamers over GF(2^8)
//! - Concrete transforms: per-block CRC-32 integrity and XSalsa20-Poly1305
//!   authenticated encryption
//!
//! The write path composes as plaintext → pad → encrypt → erasure-encode →
//! N piece streams; the read path as piece sources → erasure-decode →
//! decrypt → unpad. Every stage is again a range source, so any sub-range
//! of the final stream is served by reading only the necessary bytes from
//! the underlying pieces.

pub mod crc;
pub mod decode;
pub mod encode;
pub mod error;
pub mod pad;
pub mod scheme;
pub mod secretbox;
pub mod source;
pub mod transform;

pub use decode::decode;
pub use encode::EncodedSource;
pub use error::{stream_error, Result, ShardStreamError};
pub use pad::{pad, unpad, unpad_autodetect};
pub use scheme::{ErasureScheme, RsScheme};
pub use source::{
    concat, subrange, ByteStream, BytesSource, RangeSource, ReadAt, ReadAtSource, SharedSource,
};
pub use transform::{transform, BlockTransform};
