//! Error types for shardstream
//!
//! Provides a unified error type for all shardstream operations.
//!
//! Construction-time validation failures are returned as plain
//! [`ShardStreamError`] values. Failures that happen while a stream is being
//! read travel through [`std::io::Error`] with the library error as their
//! source, so pipeline edges can recover them with [`stream_error`].

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias for shardstream operations
pub type Result<T> = std::result::Result<T, ShardStreamError>;

/// Unified error type for shardstream
#[derive(Error, Debug)]
pub enum ShardStreamError {
    // ===== Alignment and Range Errors =====
    #[error("source size {size} is not a multiple of block size {block_size}")]
    InvalidAlignment { size: u64, block_size: u64 },

    #[error("range [{offset}, +{length}) out of bounds for size {size}")]
    OutOfRange { offset: u64, length: u64, size: u64 },

    // ===== Erasure Coding Errors =====
    #[error("insufficient pieces: have {available}, need {required}")]
    InsufficientPieces { available: usize, required: usize },

    #[error("piece size mismatch: expected {expected}, got {actual}")]
    PieceSizeMismatch { expected: u64, actual: u64 },

    #[error("invalid piece index: {index} (max: {max})")]
    InvalidPieceIndex { index: usize, max: usize },

    #[error("erasure coding error: {0}")]
    Erasure(String),

    // ===== Integrity Errors =====
    #[error("crc mismatch in block {block}")]
    IntegrityFailure { block: u64 },

    #[error("block number tag {found} does not match expected block {expected}")]
    BlockMisorder { expected: u64, found: u64 },

    // ===== Encryption Errors =====
    #[error("block size {block_size} must exceed the {overhead}-byte authentication overhead")]
    BlockTooSmall { block_size: usize, overhead: usize },

    #[error("block size {block_size} exceeds the maximum {max} for this padding scheme")]
    BlockTooLarge { block_size: usize, max: usize },

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("failed encrypting block {block}")]
    EncryptionFailure { block: u64 },

    #[error("failed decrypting block {block}")]
    DecryptionFailure { block: u64 },

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<reed_solomon_erasure::Error> for ShardStreamError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        ShardStreamError::Erasure(err.to_string())
    }
}

impl ShardStreamError {
    /// Wrap this error for delivery through a stream's read path.
    pub fn into_io(self) -> io::Error {
        match self {
            ShardStreamError::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Recover the library error carried inside a stream-time [`io::Error`],
/// if there is one.
///
/// Walks through latched and re-wrapped layers (a terminal error re-emitted
/// by a failed stream arrives as an `io::Error` wrapping an
/// `Arc<io::Error>` wrapping the original).
pub fn stream_error(err: &io::Error) -> Option<&ShardStreamError> {
    let mut inner: &(dyn std::error::Error + 'static) = err.get_ref()?;
    loop {
        if let Some(found) = inner.downcast_ref::<ShardStreamError>() {
            return Some(found);
        }
        if let Some(io_err) = inner.downcast_ref::<io::Error>() {
            inner = io_err.get_ref()?;
            continue;
        }
        if let Some(shared) = inner.downcast_ref::<Arc<io::Error>>() {
            inner = shared.get_ref()?;
            continue;
        }
        inner = inner.source()?;
    }
}

/// Re-emit a latched terminal error.
///
/// Streams that fail stay failed: the first error is stored behind an `Arc`
/// and every later read reports it again.
pub(crate) fn replay(err: &Arc<io::Error>) -> io::Error {
    io::Error::new(err.kind(), Arc::clone(err))
}
