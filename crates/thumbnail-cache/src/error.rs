//! Error taxonomy for the thumbnail pipeline.
//!
//! Decode and storage failures never escape the coordinator as anything
//! other than a per-request [`LoadError`] handed to that request's error
//! callback.

use std::path::PathBuf;
use thiserror::Error;

/// The source image could not be turned into a thumbnail.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{path} is {width}x{height}, above the {limit} pixel ceiling")]
    TooLarge {
        path: PathBuf,
        width: u32,
        height: u32,
        limit: u64,
    },
}

impl DecodeError {
    /// Path of the source image that failed.
    pub fn path(&self) -> &PathBuf {
        match self {
            DecodeError::Io { path, .. }
            | DecodeError::Image { path, .. }
            | DecodeError::TooLarge { path, .. } => path,
        }
    }
}

/// A disk cache read or write failed. Always recoverable: the entry is
/// simply treated as not cached.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("disk cache I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot encode thumbnail for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Outcome delivered to a consumer whose request failed.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("worker panicked while loading {path}")]
    WorkerPanicked { path: PathBuf },

    #[error("thumbnail loader has been shut down")]
    ShutDown,
}

/// The coordinator could not be brought up.
#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("cannot spawn thumbnail worker: {0}")]
    Spawn(#[source] std::io::Error),
}
