//! Asynchronous thumbnail loading and caching for ComicShelf
//!
//! A UI thread asks a [`LoadCoordinator`] for a thumbnail of `(path, size)`.
//! Hits in the in-memory LRU are delivered immediately; misses are handed to
//! a small worker pool that consults the content-addressed disk store and
//! falls back to decoding the source. Concurrent requests for the same key
//! share one job, and results are delivered back on the thread that owns
//! the coordinator.
//!
//! # Features
//!
//! - **Request deduplication**: N waiters on one key cost one decode
//! - **Dual caching**: item-bounded LRU in memory + one JPEG per key on disk
//! - **Self-healing disk cache**: corrupt entries are dropped on read
//! - **Two-tier queue**: priority preloads jump ahead of background work
//! - **Bounded decoding**: oversized sources are rejected by pixel count

pub mod coordinator;
pub mod disk;
pub mod error;
pub mod generate;
pub mod key;
pub mod lru;
mod queue;

pub use coordinator::{CacheStats, Decoder, LoadCoordinator, RequestOutcome};
pub use disk::{DiskStats, DiskStore};
pub use error::{DecodeError, LoadError, StartError, StorageError};
pub use generate::{decode_and_fit, fit_dimensions};
pub use key::{make_key, CacheKey, SizePreset, ThumbnailSize};
pub use lru::MemoryLru;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Tuning knobs for the thumbnail pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
    pub max_memory_items: usize,
    pub worker_count: usize,
    pub jpeg_quality: u8,
    /// Sources with more pixels than this are refused before decoding
    pub max_source_pixels: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_memory_items: 256,
            worker_count: 2,
            jpeg_quality: 85,
            max_source_pixels: 100_000_000, // 100 MP
        }
    }
}

impl CacheConfig {
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }
}

/// `<user cache dir>/comicshelf/thumbnails`, or the temp dir if the
/// platform has no cache dir.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("comicshelf")
        .join("thumbnails")
}

/// A decoded, display-ready thumbnail. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    image: Arc<RgbImage>,
}

impl Thumbnail {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Size of the pixel buffer in bytes.
    pub fn byte_size(&self) -> usize {
        self.image.as_raw().len()
    }

    /// True if both handles share the same pixel buffer.
    pub fn ptr_eq(&self, other: &Thumbnail) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.max_memory_items, 256);
        assert_eq!(config.worker_count, 2);
        assert!(config.cache_dir.ends_with("comicshelf/thumbnails"));
    }

    #[test]
    fn test_config_partial_json() {
        let config: CacheConfig =
            serde_json::from_str(r#"{ "max_memory_items": 12, "cache_dir": "/tmp/x" }"#).unwrap();
        assert_eq!(config.max_memory_items, 12);
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/x"));
        assert_eq!(config.jpeg_quality, 85);
    }

    #[test]
    fn test_thumbnail_handles_share_pixels() {
        let thumb = Thumbnail::new(RgbImage::new(4, 2));
        let copy = thumb.clone();
        assert!(thumb.ptr_eq(&copy));
        assert_eq!(thumb.byte_size(), 24);
        assert!(!thumb.ptr_eq(&Thumbnail::new(RgbImage::new(4, 2))));
    }
}
