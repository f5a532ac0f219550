//! CRC-32 integrity transform
//!
//! A matched [`BlockTransform`] pair. [`CrcAdder`] extends each 64-byte
//! block with its block number and a CRC-32 over block and number;
//! [`CrcChecker`] strips them again, failing on checksum mismatch or on a
//! block delivered out of position. The CRC algorithm is a construction
//! parameter; [`CRC_32_ISO_HDLC`](crc::CRC_32_ISO_HDLC) is the usual
//! (IEEE) choice.

use std::sync::Arc;

use crc::{Algorithm, Crc};

use crate::error::{Result, ShardStreamError};
use crate::source::SharedSource;
use crate::transform::BlockTransform;

/// Payload bytes per protected block.
pub const CRC_BLOCK_SIZE: usize = 64;

/// Big-endian block-number tag appended to each block.
const TAG_SIZE: usize = 8;

/// Big-endian CRC-32 appended after the tag.
const CHECKSUM_SIZE: usize = 4;

/// Adds a block-number tag and CRC-32 to each block.
pub struct CrcAdder {
    crc: Crc<u32>,
}

impl CrcAdder {
    /// Create an adder using the given CRC-32 algorithm.
    pub fn new(algorithm: &'static Algorithm<u32>) -> Self {
        Self {
            crc: Crc::<u32>::new(algorithm),
        }
    }
}

impl BlockTransform for CrcAdder {
    fn in_block_size(&self) -> usize {
        CRC_BLOCK_SIZE
    }

    fn out_block_size(&self) -> usize {
        CRC_BLOCK_SIZE + TAG_SIZE + CHECKSUM_SIZE
    }

    fn transform(&self, out: &mut Vec<u8>, input: &[u8], block_num: u64) -> Result<()> {
        let start = out.len();
        out.extend_from_slice(input);
        out.extend_from_slice(&block_num.to_be_bytes());
        let checksum = self.crc.checksum(&out[start..]);
        out.extend_from_slice(&checksum.to_be_bytes());
        Ok(())
    }
}

/// Verifies and strips the tag and CRC-32 added by [`CrcAdder`].
pub struct CrcChecker {
    crc: Crc<u32>,
}

impl CrcChecker {
    /// Create a checker using the given CRC-32 algorithm.
    pub fn new(algorithm: &'static Algorithm<u32>) -> Self {
        Self {
            crc: Crc::<u32>::new(algorithm),
        }
    }
}

impl BlockTransform for CrcChecker {
    fn in_block_size(&self) -> usize {
        CRC_BLOCK_SIZE + TAG_SIZE + CHECKSUM_SIZE
    }

    fn out_block_size(&self) -> usize {
        CRC_BLOCK_SIZE
    }

    fn transform(&self, out: &mut Vec<u8>, input: &[u8], block_num: u64) -> Result<()> {
        let tag_end = CRC_BLOCK_SIZE + TAG_SIZE;
        let mut checksum = [0u8; CHECKSUM_SIZE];
        checksum.copy_from_slice(&input[tag_end..tag_end + CHECKSUM_SIZE]);
        if u32::from_be_bytes(checksum) != self.crc.checksum(&input[..tag_end]) {
            return Err(ShardStreamError::IntegrityFailure { block: block_num });
        }
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&input[CRC_BLOCK_SIZE..tag_end]);
        let found = u64::from_be_bytes(tag);
        if found != block_num {
            return Err(ShardStreamError::BlockMisorder {
                expected: block_num,
                found,
            });
        }
        out.extend_from_slice(&input[..CRC_BLOCK_SIZE]);
        Ok(())
    }
}

/// Protect a source with per-block CRCs.
pub fn add_crc(source: SharedSource, algorithm: &'static Algorithm<u32>) -> Result<SharedSource> {
    crate::transform::transform(source, Arc::new(CrcAdder::new(algorithm)))
}

/// Verify and strip per-block CRCs from a source.
pub fn check_crc(source: SharedSource, algorithm: &'static Algorithm<u32>) -> Result<SharedSource> {
    crate::transform::transform(source, Arc::new(CrcChecker::new(algorithm)))
}
