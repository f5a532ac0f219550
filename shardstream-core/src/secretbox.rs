//! Secretbox authenticated-encryption transform
//!
//! A matched [`BlockTransform`] pair over XSalsa20-Poly1305 (NaCl
//! "secretbox"): each plaintext block seals to a ciphertext block 16 bytes
//! larger, keyed once and nonced by block number. Because the nonce is the
//! block's position, a key must not be reused across independent streams of
//! different content; derive one key per stored object.

use std::sync::Arc;

use crypto_secretbox::{
    aead::{Aead, KeyInit},
    Key, Nonce, XSalsa20Poly1305,
};

use crate::error::{Result, ShardStreamError};
use crate::source::SharedSource;
use crate::transform::BlockTransform;

/// Secretbox key size (32 bytes)
pub const KEY_SIZE: usize = 32;

/// Secretbox nonce size (24 bytes / 192 bits)
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

fn key_from_slice(key: &[u8]) -> Result<[u8; KEY_SIZE]> {
    if key.len() != KEY_SIZE {
        return Err(ShardStreamError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        });
    }
    let mut out = [0u8; KEY_SIZE];
    out.copy_from_slice(key);
    Ok(out)
}

fn check_block_size(encrypted_block_size: usize) -> Result<()> {
    if encrypted_block_size <= TAG_SIZE {
        return Err(ShardStreamError::BlockTooSmall {
            block_size: encrypted_block_size,
            overhead: TAG_SIZE,
        });
    }
    Ok(())
}

/// Nonce for block `n`: the low three bytes of `u32be(n)` left-justified
/// into 24 zero bytes.
fn block_nonce(block_num: u64) -> Nonce {
    let mut nonce = [0u8; NONCE_SIZE];
    let num = (block_num as u32).to_be_bytes();
    nonce[..3].copy_from_slice(&num[1..]);
    *Nonce::from_slice(&nonce)
}

/// Seals each plaintext block under a per-block nonce.
pub struct SecretboxEncrypter {
    key: [u8; KEY_SIZE],
    plain_block_size: usize,
}

impl SecretboxEncrypter {
    /// Create an encrypter producing `encrypted_block_size`-byte blocks.
    ///
    /// `key` must be exactly 32 bytes and `encrypted_block_size` must
    /// exceed the 16-byte authentication overhead.
    pub fn new(key: &[u8], encrypted_block_size: usize) -> Result<Self> {
        check_block_size(encrypted_block_size)?;
        Ok(Self {
            key: key_from_slice(key)?,
            plain_block_size: encrypted_block_size - TAG_SIZE,
        })
    }
}

impl BlockTransform for SecretboxEncrypter {
    fn in_block_size(&self) -> usize {
        self.plain_block_size
    }

    fn out_block_size(&self) -> usize {
        self.plain_block_size + TAG_SIZE
    }

    fn transform(&self, out: &mut Vec<u8>, input: &[u8], block_num: u64) -> Result<()> {
        let cipher = XSalsa20Poly1305::new(Key::from_slice(&self.key));
        let sealed = cipher
            .encrypt(&block_nonce(block_num), input)
            .map_err(|_| ShardStreamError::EncryptionFailure { block: block_num })?;
        out.extend_from_slice(&sealed);
        Ok(())
    }
}

/// Opens blocks sealed by [`SecretboxEncrypter`].
pub struct SecretboxDecrypter {
    key: [u8; KEY_SIZE],
    plain_block_size: usize,
}

impl SecretboxDecrypter {
    /// Create a decrypter consuming `encrypted_block_size`-byte blocks.
    pub fn new(key: &[u8], encrypted_block_size: usize) -> Result<Self> {
        check_block_size(encrypted_block_size)?;
        Ok(Self {
            key: key_from_slice(key)?,
            plain_block_size: encrypted_block_size - TAG_SIZE,
        })
    }
}

impl BlockTransform for SecretboxDecrypter {
    fn in_block_size(&self) -> usize {
        self.plain_block_size + TAG_SIZE
    }

    fn out_block_size(&self) -> usize {
        self.plain_block_size
    }

    fn transform(&self, out: &mut Vec<u8>, input: &[u8], block_num: u64) -> Result<()> {
        let cipher = XSalsa20Poly1305::new(Key::from_slice(&self.key));
        let opened = cipher
            .decrypt(&block_nonce(block_num), input)
            .map_err(|_| ShardStreamError::DecryptionFailure { block: block_num })?;
        out.extend_from_slice(&opened);
        Ok(())
    }
}

/// Encrypt a source block-by-block.
pub fn encrypt(
    source: SharedSource,
    key: &[u8],
    encrypted_block_size: usize,
) -> Result<SharedSource> {
    crate::transform::transform(
        source,
        Arc::new(SecretboxEncrypter::new(key, encrypted_block_size)?),
    )
}

/// Decrypt a source encrypted with the same key and block size.
pub fn decrypt(
    source: SharedSource,
    key: &[u8],
    encrypted_block_size: usize,
) -> Result<SharedSource> {
    crate::transform::transform(
        source,
        Arc::new(SecretboxDecrypter::new(key, encrypted_block_size)?),
    )
}
