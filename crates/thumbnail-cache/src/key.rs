//! Cache identity: target boxes and path/mtime/size fingerprints.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Bounding box a thumbnail must fit inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThumbnailSize {
    pub width: u32,
    pub height: u32,
}

impl ThumbnailSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for ThumbnailSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Named target boxes used by the browser views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizePreset {
    /// Album/collection cards in the library grid
    Cover,
    /// Page strip inside an album
    Grid,
    /// Large preview before the full-screen viewer takes over
    Preview,
}

impl SizePreset {
    pub fn size(&self) -> ThumbnailSize {
        match self {
            SizePreset::Cover => ThumbnailSize::new(200, 280),
            SizePreset::Grid => ThumbnailSize::new(160, 160),
            SizePreset::Preview => ThumbnailSize::new(1200, 1200),
        }
    }
}

impl fmt::Display for SizePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizePreset::Cover => write!(f, "cover"),
            SizePreset::Grid => write!(f, "grid"),
            SizePreset::Preview => write!(f, "preview"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid size preset: {0}. Valid options: cover, grid, preview")]
pub struct ParsePresetError(String);

impl std::str::FromStr for SizePreset {
    type Err = ParsePresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cover" => Ok(SizePreset::Cover),
            "grid" => Ok(SizePreset::Grid),
            "preview" => Ok(SizePreset::Preview),
            _ => Err(ParsePresetError(s.to_string())),
        }
    }
}

/// Fixed-length fingerprint of (source path, mtime, target box).
///
/// Freshness is best-effort: an edit that keeps the same mtime, or a copy
/// that preserves it, maps to the old key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn fingerprint(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the cache key for `source_path` rendered into `size`.
///
/// If the file cannot be stat'd the mtime is left out of the fingerprint
/// rather than failing.
pub fn make_key(source_path: &Path, size: ThumbnailSize) -> CacheKey {
    let path = source_path.to_string_lossy();
    let composite = match modified_millis(source_path) {
        Some(mtime) => format!("{}|{}|{}", path, mtime, size),
        None => format!("{}|{}", path, size),
    };

    let digest = Sha256::digest(composite.as_bytes());
    // First 16 bytes (32 hex chars) are plenty for a per-user cache
    CacheKey(hex::encode(&digest[..16]))
}

fn modified_millis(path: &Path) -> Option<u128> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(modified.duration_since(UNIX_EPOCH).ok()?.as_millis())
}
