//! Piece-directory loading
//!
//! Pieces live in a flat directory of files named `<n>.piece`, where `<n>`
//! is the decimal piece index assigned at encode time. Missing pieces
//! shrink the available set; as long as `required_count` files remain the
//! decode pipeline reconstructs the content.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use shardstream_core::{ReadAtSource, SharedSource};

/// Load every `<n>.piece` file in `dir` as a piece source.
///
/// Files that do not match the naming scheme are skipped with a warning.
/// Sizes are taken from file metadata; the decoder validates that they
/// agree.
pub fn load_piece_dir(dir: &Path) -> Result<HashMap<usize, SharedSource>> {
    let mut pieces: HashMap<usize, SharedSource> = HashMap::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("reading piece directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let num = name
            .to_str()
            .and_then(|n| n.strip_suffix(".piece"))
            .and_then(|stem| stem.parse::<usize>().ok());
        let Some(num) = num else {
            warn!(file = ?name, "skipping non-piece file");
            continue;
        };
        let path = entry.path();
        let file = fs::File::open(&path)
            .with_context(|| format!("opening piece file {}", path.display()))?;
        let size = file
            .metadata()
            .with_context(|| format!("reading metadata of {}", path.display()))?
            .len();
        pieces.insert(num, Arc::new(ReadAtSource::new(Arc::new(file), size)));
    }
    Ok(pieces)
}
