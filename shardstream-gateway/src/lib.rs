//! shardstream HTTP gateway
//!
//! Provides:
//! - An axum router honoring RFC 7233 `Range` requests over any
//!   [`RangeSource`](shardstream_core::RangeSource)
//! - Piece-directory loading for the on-disk `<n>.piece` layout
//!
//! The binary in this crate assembles the read pipeline (erasure decode →
//! decrypt → unpad) over a directory of piece files and serves it.

pub mod http;
pub mod pieces;

pub use http::{routes, ServeState};
pub use pieces::load_piece_dir;
