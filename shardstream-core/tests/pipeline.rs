//! End-to-end pipeline tests for shardstream
//!
//! Tests the complete path: plaintext → pad → encrypt → erasure encode →
//! piece files → erasure decode → decrypt → unpad → plaintext window.
//!
//! Run with: cargo test --test pipeline

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use shardstream_core::crc::{add_crc, check_crc};
use shardstream_core::secretbox::{self, TAG_SIZE};
use shardstream_core::source::ReadAtSource;
use shardstream_core::{
    decode, pad, subrange, unpad_autodetect, BytesSource, EncodedSource, ErasureScheme,
    RangeSource, RsScheme, SharedSource,
};

/// Generate test data of specified size
fn generate_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

fn read_all_of(source: &SharedSource) -> Vec<u8> {
    let mut buf = Vec::new();
    source
        .range(0, source.size())
        .read_to_end(&mut buf)
        .unwrap();
    buf
}

/// Drain all piece streams of an encoder window concurrently.
fn drain_pieces(encoder: &EncodedSource) -> Vec<Vec<u8>> {
    let streams = encoder.range(0, encoder.output_size()).unwrap();
    let handles: Vec<_> = streams
        .into_iter()
        .map(|mut stream| {
            std::thread::spawn(move || {
                let mut piece = Vec::new();
                stream.read_to_end(&mut piece).map(|_| piece)
            })
        })
        .collect();
    handles
        .into_iter()
        .map(|handle| handle.join().unwrap().unwrap())
        .collect()
}

/// The full write-read cycle over piece files on disk, surviving the loss
/// of half the pieces: k=20, N=40, 4 KiB piece blocks.
#[test]
fn test_full_pipeline_with_lost_pieces() {
    let required = 20;
    let total = 40;
    let piece_block_size = 4096;

    let mut data = vec![0u8; 256 * 1024];
    rand::thread_rng().fill_bytes(&mut data);

    let key = Sha256::digest(b"a key").to_vec();
    let scheme: Arc<dyn ErasureScheme> = Arc::new(RsScheme::new(required, total, piece_block_size).unwrap());
    let encrypted_block_size = scheme.decoded_block_size();

    // Write path: pad → encrypt → encode.
    let source: SharedSource = Arc::new(BytesSource::new(data.clone()));
    let (padded, _) = pad(source, (encrypted_block_size - TAG_SIZE) as u64);
    let encrypted = secretbox::encrypt(padded, &key, encrypted_block_size).unwrap();
    let encoder = EncodedSource::new(encrypted, Arc::clone(&scheme)).unwrap();
    let pieces = drain_pieces(&encoder);
    assert_eq!(pieces.len(), total);

    // Store the pieces as <n>.piece files.
    let dir = TempDir::new().unwrap();
    for (num, piece) in pieces.iter().enumerate() {
        assert_eq!(piece.len() as u64, encoder.output_size());
        fs::write(dir.path().join(format!("{num}.piece")), piece).unwrap();
    }

    // Lose half of them.
    let mut doomed: Vec<usize> = (0..total).collect();
    doomed.shuffle(&mut rand::thread_rng());
    for num in &doomed[..total - required] {
        fs::remove_file(dir.path().join(format!("{num}.piece"))).unwrap();
    }

    // Read path: piece files → decode → decrypt → unpad.
    let mut sources: HashMap<usize, SharedSource> = HashMap::new();
    for num in 0..total {
        let path = dir.path().join(format!("{num}.piece"));
        let Ok(file) = fs::File::open(&path) else {
            continue;
        };
        let size = file.metadata().unwrap().len();
        sources.insert(num, Arc::new(ReadAtSource::new(Arc::new(file), size)));
    }
    assert_eq!(sources.len(), required);

    let decoded = decode(sources, scheme).unwrap();
    let decrypted = secretbox::decrypt(decoded, &key, encrypted_block_size).unwrap();
    let recovered = unpad_autodetect(decrypted).unwrap();
    assert_eq!(recovered.size(), data.len() as u64);

    // A mid-stream window, read without touching the rest.
    let (offset, length) = (12345u64, 67890u64);
    let mut window = Vec::new();
    recovered
        .range(offset, length)
        .read_to_end(&mut window)
        .unwrap();
    assert_eq!(window, &data[offset as usize..(offset + length) as usize]);

    // And the whole thing.
    assert_eq!(read_all_of(&recovered), data);
}

/// Every k-subset of a small scheme reconstructs the original bytes.
#[test]
fn test_round_trip_every_piece_subset() {
    let required = 2;
    let total = 4;
    let piece_block_size = 1024;

    let data = generate_data(100_000);
    let key = Sha256::digest(b"subset test key").to_vec();
    let scheme: Arc<dyn ErasureScheme> = Arc::new(RsScheme::new(required, total, piece_block_size).unwrap());
    let encrypted_block_size = scheme.decoded_block_size();

    let source: SharedSource = Arc::new(BytesSource::new(data.clone()));
    let (padded, _) = pad(source, (encrypted_block_size - TAG_SIZE) as u64);
    let encrypted = secretbox::encrypt(padded, &key, encrypted_block_size).unwrap();
    let encoder = EncodedSource::new(encrypted, Arc::clone(&scheme)).unwrap();
    let pieces = drain_pieces(&encoder);

    for a in 0..total {
        for b in (a + 1)..total {
            let mut sources: HashMap<usize, SharedSource> = HashMap::new();
            for num in [a, b] {
                sources.insert(num, Arc::new(BytesSource::new(pieces[num].clone())));
            }
            let decoded = decode(sources, Arc::clone(&scheme)).unwrap();
            let decrypted = secretbox::decrypt(decoded, &key, encrypted_block_size).unwrap();
            let recovered = unpad_autodetect(decrypted).unwrap();
            assert_eq!(read_all_of(&recovered), data, "subset {{{a}, {b}}}");
        }
    }
}

/// CRC protection composes with erasure coding: flipping a bit in a stored
/// piece surfaces as an integrity failure after decode.
#[test]
fn test_crc_through_erasure_coding() {
    // 76-byte CRC blocks stripe evenly over 2 pieces of 38 bytes per block.
    let piece_block_size = 38;
    let scheme: Arc<dyn ErasureScheme> = Arc::new(RsScheme::new(2, 4, piece_block_size).unwrap());

    let data = generate_data(64 * 100);
    let source: SharedSource = Arc::new(BytesSource::new(data.clone()));
    let protected = add_crc(source, &crc::CRC_32_ISO_HDLC).unwrap();
    let encoder = EncodedSource::new(protected, Arc::clone(&scheme)).unwrap();
    let pieces = drain_pieces(&encoder);

    // Clean path round-trips.
    let mut sources: HashMap<usize, SharedSource> = HashMap::new();
    for num in [1, 2] {
        sources.insert(num, Arc::new(BytesSource::new(pieces[num].clone())));
    }
    let decoded = decode(sources, Arc::clone(&scheme)).unwrap();
    let checked = check_crc(decoded, &crc::CRC_32_ISO_HDLC).unwrap();
    assert_eq!(read_all_of(&checked), data);

    // A corrupted surviving piece fails the CRC layer.
    let mut tampered = pieces[1].clone();
    tampered[100] ^= 0x10;
    let mut sources: HashMap<usize, SharedSource> = HashMap::new();
    sources.insert(1, Arc::new(BytesSource::new(tampered)));
    sources.insert(2, Arc::new(BytesSource::new(pieces[2].clone())));
    let decoded = decode(sources, Arc::clone(&scheme)).unwrap();
    let checked = check_crc(decoded, &crc::CRC_32_ISO_HDLC).unwrap();

    let err = checked
        .range(0, checked.size())
        .read_to_end(&mut Vec::new())
        .unwrap_err();
    assert!(matches!(
        shardstream_core::stream_error(&err),
        Some(shardstream_core::ShardStreamError::IntegrityFailure { .. })
    ));
}

/// Nested subranges and windows keep addressing the same bytes all the way
/// down the pipeline.
#[test]
fn test_subrange_through_pipeline() {
    let required = 2;
    let total = 3;
    let piece_block_size = 512;

    let data = generate_data(50_000);
    let key = Sha256::digest(b"window key").to_vec();
    let scheme: Arc<dyn ErasureScheme> = Arc::new(RsScheme::new(required, total, piece_block_size).unwrap());
    let encrypted_block_size = scheme.decoded_block_size();

    let source: SharedSource = Arc::new(BytesSource::new(data.clone()));
    let (padded, _) = pad(source, (encrypted_block_size - TAG_SIZE) as u64);
    let encrypted = secretbox::encrypt(padded, &key, encrypted_block_size).unwrap();
    let encoder = EncodedSource::new(encrypted, Arc::clone(&scheme)).unwrap();
    let pieces = drain_pieces(&encoder);

    let mut sources: HashMap<usize, SharedSource> = HashMap::new();
    for num in [0, 2] {
        sources.insert(num, Arc::new(BytesSource::new(pieces[num].clone())));
    }
    let decoded = decode(sources, Arc::clone(&scheme)).unwrap();
    let decrypted = secretbox::decrypt(decoded, &key, encrypted_block_size).unwrap();
    let recovered = unpad_autodetect(decrypted).unwrap();

    let sub = subrange(recovered, 10_000, 30_000).unwrap();
    assert_eq!(sub.size(), 30_000);
    for &(offset, length) in &[(0u64, 30_000u64), (5, 17), (29_000, 1000)] {
        let mut window = Vec::new();
        sub.range(offset, length).read_to_end(&mut window).unwrap();
        let start = 10_000 + offset as usize;
        assert_eq!(window, &data[start..start + length as usize]);
    }
}
