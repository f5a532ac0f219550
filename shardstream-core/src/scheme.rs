//! Erasure scheme abstraction and Reed-Solomon implementation
//!
//! An [`ErasureScheme`] turns one decoded block into `total_count` encoded
//! piece blocks and back. The streamers in [`crate::encode`] and
//! [`crate::decode`] work against this trait; [`RsScheme`] supplies the
//! Reed-Solomon GF(2^8) arithmetic via `reed_solomon_erasure`.

use std::collections::HashMap;

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::error::{Result, ShardStreamError};

/// The general contract of an erasure coding algorithm.
///
/// Implementations are immutable configuration: `encode` and `decode` must
/// be pure and reentrant so one scheme value can serve many concurrent
/// pipelines.
pub trait ErasureScheme: Send + Sync {
    /// Split one decoded block into pieces.
    ///
    /// `input` is exactly [`decoded_block_size`](Self::decoded_block_size)
    /// bytes; `out` is invoked exactly [`total_count`](Self::total_count)
    /// times with the piece index `0..total_count` and that piece's
    /// [`encoded_block_size`](Self::encoded_block_size) bytes.
    fn encode(&self, input: &[u8], out: &mut dyn FnMut(usize, &[u8])) -> Result<()>;

    /// Reconstruct one decoded block from at least
    /// [`required_count`](Self::required_count) piece blocks, appending
    /// exactly [`decoded_block_size`](Self::decoded_block_size) bytes to
    /// `out`.
    fn decode(&self, out: &mut Vec<u8>, shares: &HashMap<usize, &[u8]>) -> Result<()>;

    /// Size of each piece block produced by `encode` and consumed by
    /// `decode`.
    fn encoded_block_size(&self) -> usize;

    /// Size of the combined block passed to `encode` and produced by
    /// `decode`.
    fn decoded_block_size(&self) -> usize;

    /// Number of pieces `encode` produces (N).
    fn total_count(&self) -> usize;

    /// Minimum pieces `decode` needs (k).
    fn required_count(&self) -> usize;
}

/// Reed-Solomon erasure scheme over GF(2^8).
///
/// `required` of `total` pieces reconstruct the data; each piece block is
/// `piece_block_size` bytes, so the decoded block is
/// `required * piece_block_size` bytes. With `required == total` there is
/// no parity and the scheme degenerates to plain striping, which still
/// round-trips but tolerates no loss.
pub struct RsScheme {
    // None when required == total (no parity shards to compute).
    rs: Option<ReedSolomon>,
    required: usize,
    total: usize,
    piece_block_size: usize,
}

impl RsScheme {
    /// Create a scheme producing `total` pieces of which any `required`
    /// reconstruct the data, with `piece_block_size` bytes per piece block.
    pub fn new(required: usize, total: usize, piece_block_size: usize) -> Result<Self> {
        if required == 0 || total < required {
            return Err(ShardStreamError::Erasure(format!(
                "invalid piece counts: required {required}, total {total}"
            )));
        }
        if piece_block_size == 0 {
            return Err(ShardStreamError::Erasure(
                "piece block size must be positive".to_string(),
            ));
        }
        let rs = if total > required {
            Some(ReedSolomon::new(required, total - required)?)
        } else {
            None
        };
        Ok(Self {
            rs,
            required,
            total,
            piece_block_size,
        })
    }
}

impl ErasureScheme for RsScheme {
    fn encode(&self, input: &[u8], out: &mut dyn FnMut(usize, &[u8])) -> Result<()> {
        if input.len() != self.decoded_block_size() {
            return Err(ShardStreamError::InvalidAlignment {
                size: input.len() as u64,
                block_size: self.decoded_block_size() as u64,
            });
        }
        let mut shards: Vec<Vec<u8>> = input
            .chunks(self.piece_block_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        for _ in self.required..self.total {
            shards.push(vec![0u8; self.piece_block_size]);
        }
        if let Some(rs) = &self.rs {
            rs.encode(&mut shards)?;
        }
        for (num, shard) in shards.iter().enumerate() {
            out(num, shard);
        }
        Ok(())
    }

    fn decode(&self, out: &mut Vec<u8>, shares: &HashMap<usize, &[u8]>) -> Result<()> {
        if shares.len() < self.required {
            return Err(ShardStreamError::InsufficientPieces {
                available: shares.len(),
                required: self.required,
            });
        }
        let mut shards: Vec<Option<Vec<u8>>> = vec![None; self.total];
        for (&num, &share) in shares {
            if num >= self.total {
                return Err(ShardStreamError::InvalidPieceIndex {
                    index: num,
                    max: self.total - 1,
                });
            }
            if share.len() != self.piece_block_size {
                return Err(ShardStreamError::PieceSizeMismatch {
                    expected: self.piece_block_size as u64,
                    actual: share.len() as u64,
                });
            }
            shards[num] = Some(share.to_vec());
        }
        match &self.rs {
            Some(rs) => rs.reconstruct_data(&mut shards)?,
            // Striping: every data shard must be present.
            None => {
                if shards.iter().any(|shard| shard.is_none()) {
                    return Err(ShardStreamError::InsufficientPieces {
                        available: shares.len(),
                        required: self.required,
                    });
                }
            }
        }
        for shard in shards.into_iter().take(self.required) {
            match shard {
                Some(data) => out.extend_from_slice(&data),
                None => {
                    return Err(ShardStreamError::Erasure(
                        "reconstruction left a data shard empty".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    fn encoded_block_size(&self) -> usize {
        self.piece_block_size
    }

    fn decoded_block_size(&self) -> usize {
        self.piece_block_size * self.required
    }

    fn total_count(&self) -> usize {
        self.total
    }

    fn required_count(&self) -> usize {
        self.required
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_pieces(scheme: &RsScheme, input: &[u8]) -> Vec<Vec<u8>> {
        let mut pieces = vec![Vec::new(); scheme.total_count()];
        scheme
            .encode(input, &mut |num, data| pieces[num].extend_from_slice(data))
            .unwrap();
        pieces
    }

    #[test]
    fn test_encode_piece_shape() {
        let scheme = RsScheme::new(2, 4, 8).unwrap();
        assert_eq!(scheme.decoded_block_size(), 16);
        assert_eq!(scheme.encoded_block_size(), 8);

        let input: Vec<u8> = (0u8..16).collect();
        let pieces = collect_pieces(&scheme, &input);
        assert_eq!(pieces.len(), 4);
        assert!(pieces.iter().all(|piece| piece.len() == 8));
        // Systematic code: data shards carry the input verbatim.
        assert_eq!(pieces[0], &input[..8]);
        assert_eq!(pieces[1], &input[8..]);
    }

    #[test]
    fn test_decode_from_any_required_subset() {
        let scheme = RsScheme::new(2, 4, 8).unwrap();
        let input: Vec<u8> = (100u8..116).collect();
        let pieces = collect_pieces(&scheme, &input);

        for a in 0..4 {
            for b in (a + 1)..4 {
                let mut shares: HashMap<usize, &[u8]> = HashMap::new();
                shares.insert(a, &pieces[a]);
                shares.insert(b, &pieces[b]);
                let mut out = Vec::new();
                scheme.decode(&mut out, &shares).unwrap();
                assert_eq!(out, input, "subset {{{a}, {b}}}");
            }
        }
    }

    #[test]
    fn test_decode_insufficient_pieces() {
        let scheme = RsScheme::new(2, 4, 8).unwrap();
        let input: Vec<u8> = (0u8..16).collect();
        let pieces = collect_pieces(&scheme, &input);

        let mut shares: HashMap<usize, &[u8]> = HashMap::new();
        shares.insert(3, &pieces[3]);
        let mut out = Vec::new();
        assert!(matches!(
            scheme.decode(&mut out, &shares),
            Err(ShardStreamError::InsufficientPieces {
                available: 1,
                required: 2
            })
        ));
    }

    #[test]
    fn test_decode_rejects_bad_share() {
        let scheme = RsScheme::new(2, 4, 8).unwrap();
        let input: Vec<u8> = (0u8..16).collect();
        let pieces = collect_pieces(&scheme, &input);

        let short = &pieces[0][..4];
        let mut shares: HashMap<usize, &[u8]> = HashMap::new();
        shares.insert(0, short);
        shares.insert(1, &pieces[1]);
        let mut out = Vec::new();
        assert!(matches!(
            scheme.decode(&mut out, &shares),
            Err(ShardStreamError::PieceSizeMismatch { .. })
        ));

        let mut shares: HashMap<usize, &[u8]> = HashMap::new();
        shares.insert(7, &pieces[0]);
        shares.insert(1, &pieces[1]);
        assert!(matches!(
            scheme.decode(&mut Vec::new(), &shares),
            Err(ShardStreamError::InvalidPieceIndex { index: 7, max: 3 })
        ));
    }

    #[test]
    fn test_striping_when_required_equals_total() {
        let scheme = RsScheme::new(3, 3, 4).unwrap();
        let input: Vec<u8> = (0u8..12).collect();
        let pieces = collect_pieces(&scheme, &input);
        assert_eq!(pieces.len(), 3);

        let mut shares: HashMap<usize, &[u8]> = HashMap::new();
        for (num, piece) in pieces.iter().enumerate() {
            shares.insert(num, piece);
        }
        let mut out = Vec::new();
        scheme.decode(&mut out, &shares).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(RsScheme::new(0, 4, 8).is_err());
        assert!(RsScheme::new(5, 4, 8).is_err());
        assert!(RsScheme::new(2, 4, 0).is_err());
    }
}
