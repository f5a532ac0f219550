//! shardstream range server
//!
//! Assembles the read pipeline (erasure decode → decrypt → unpad) over a
//! directory of piece files and serves the reconstructed content over HTTP
//! with full Range support.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sha2::{Digest, Sha256};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use shardstream_core::secretbox;
use shardstream_core::{decode, unpad_autodetect, ErasureScheme, RangeSource, RsScheme};
use shardstream_gateway::{load_piece_dir, routes, ServeState};

#[derive(Parser)]
#[command(name = "shardstream-gateway")]
#[command(about = "Serve HTTP range requests over erasure-coded, encrypted pieces")]
struct Cli {
    /// HTTP listen address
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Block size of stored pieces in bytes
    #[arg(long, default_value_t = 4096)]
    piece_block_size: usize,

    /// Secret key (SHA-256 hashed into the 32-byte decryption key)
    #[arg(long, default_value = "a key")]
    key: String,

    /// Pieces required to reconstruct the content
    #[arg(long, default_value_t = 20)]
    required: usize,

    /// Total pieces produced at encode time
    #[arg(long, default_value_t = 40)]
    total: usize,

    /// Directory holding the <n>.piece files
    pieces_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let key = Sha256::digest(cli.key.as_bytes()).to_vec();
    let scheme = Arc::new(RsScheme::new(
        cli.required,
        cli.total,
        cli.piece_block_size,
    )?);
    let encrypted_block_size = scheme.decoded_block_size();

    let pieces = load_piece_dir(&cli.pieces_dir)?;
    info!(
        pieces = pieces.len(),
        required = cli.required,
        total = cli.total,
        "loaded piece directory"
    );

    let decoded = decode(pieces, scheme)?;
    let decrypted = secretbox::decrypt(decoded, &key, encrypted_block_size)?;
    let content = unpad_autodetect(decrypted)?;
    info!(size = content.size(), "content pipeline assembled");

    let state = Arc::new(ServeState::new(content));
    let app = routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&cli.addr).await?;
    info!("HTTP server listening on {}", cli.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
