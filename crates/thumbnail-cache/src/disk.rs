//! Content-addressed on-disk thumbnail store
//!
//! One flat directory, one `<fingerprint>.jpg` per cache key. The presence
//! of a decodable file is the index; there is no manifest. A file's mtime
//! doubles as its "last used" stamp for retention. Only disk reads and
//! [`DiskStore::touch`] refresh it, so an entry served from memory for a
//! long session looks idle here; the coordinator touches its in-memory keys
//! before evicting.

use crate::error::StorageError;
use crate::key::CacheKey;
use filetime::FileTime;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;

const EXTENSION: &str = "jpg";

/// File count and byte total of the disk cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskStats {
    pub files: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
    jpeg_quality: u8,
}

impl DiskStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>, jpeg_quality: u8) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the entry for `key`. Depends on the fingerprint only.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key.fingerprint(), EXTENSION))
    }

    /// Load a cached thumbnail.
    ///
    /// A file that exists but does not decode is deleted and reported as a
    /// miss.
    pub fn get(&self, key: &CacheKey) -> Option<RgbImage> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("disk MISS {}", key);
                return None;
            }
            Err(e) => {
                log::warn!("{}", StorageError::Io { path, source: e });
                return None;
            }
        };

        match image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg) {
            Ok(img) => {
                log::debug!("disk HIT {}", key);
                if let Err(e) = filetime::set_file_mtime(&path, FileTime::now()) {
                    log::debug!("could not refresh mtime of {}: {}", path.display(), e);
                }
                Some(img.to_rgb8())
            }
            Err(e) => {
                log::warn!("corrupt disk cache entry {} ({}), removing", path.display(), e);
                if let Err(e) = fs::remove_file(&path) {
                    log::warn!("could not remove {}: {}", path.display(), e);
                }
                None
            }
        }
    }

    /// Mark an entry as just used. Returns false if it is not on disk.
    pub fn touch(&self, key: &CacheKey) -> bool {
        let path = self.path_for(key);
        match filetime::set_file_mtime(&path, FileTime::now()) {
            Ok(()) => true,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    log::debug!("could not refresh mtime of {}: {}", path.display(), e);
                }
                false
            }
        }
    }

    /// Best-effort store. Failures are logged and reported as `false`.
    pub fn put(&self, key: &CacheKey, image: &RgbImage) -> bool {
        match self.try_put(key, image) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("{}", e);
                false
            }
        }
    }

    /// Encode and atomically write the entry for `key`, replacing any
    /// existing file.
    pub fn try_put(&self, key: &CacheKey, image: &RgbImage) -> Result<(), StorageError> {
        let path = self.path_for(key);

        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, self.jpeg_quality)
            .encode_image(image)
            .map_err(|source| StorageError::Encode {
                path: path.clone(),
                source,
            })?;

        let io_error = |source: io::Error| StorageError::Io {
            path: path.clone(),
            source,
        };

        // Write next to the target then rename, so readers never see a torn file
        let mut temp = NamedTempFile::new_in(&self.dir).map_err(io_error)?;
        temp.write_all(&buffer).map_err(io_error)?;
        temp.persist(&path).map_err(|e| io_error(e.error))?;
        Ok(())
    }

    /// Remove every file in the store directory.
    pub fn clear(&self) -> Result<usize, StorageError> {
        let mut removed = 0;
        for path in self.files()? {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("could not remove {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }

    /// Remove entries not used within `max_age`. Returns how many went.
    pub fn evict_older_than(&self, max_age: Duration) -> Result<usize, StorageError> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut removed = 0;
        for path in self.entries()? {
            let last_used = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(time) => time,
                Err(e) => {
                    log::debug!("skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            if last_used < cutoff {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => log::warn!("could not remove {}: {}", path.display(), e),
                }
            }
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<DiskStats, StorageError> {
        let mut stats = DiskStats::default();
        for path in self.entries()? {
            if let Ok(metadata) = fs::metadata(&path) {
                stats.files += 1;
                stats.bytes += metadata.len();
            }
        }
        Ok(stats)
    }

    /// Cache entries (`*.jpg`), excluding stray temp files.
    fn entries(&self) -> Result<Vec<PathBuf>, StorageError> {
        Ok(self
            .files()?
            .into_iter()
            .filter(|path| path.extension().is_some_and(|ext| ext == EXTENSION))
            .collect())
    }

    fn files(&self) -> Result<Vec<PathBuf>, StorageError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        Ok(read_dir
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.path())
            .collect())
    }
}
