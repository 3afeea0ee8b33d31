//! Library data model: albums, collections and scan summaries
//!
//! Everything here is an immutable snapshot of the filesystem at scan time.
//! A rescan builds new values rather than mutating old ones.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A folder that directly contains at least one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub path: PathBuf,
    pub name: String,
    /// Image files in natural order
    pub images: Vec<PathBuf>,
    /// First image, shown on the album card
    pub cover: PathBuf,
    pub image_count: usize,
    /// Sum of the image file sizes in bytes
    pub total_bytes: u64,
}

impl Album {
    /// Build an album from its folder and `(image path, byte size)` pairs,
    /// already sorted. Returns `None` when there are no images.
    pub fn from_images(path: PathBuf, images: Vec<(PathBuf, u64)>) -> Option<Self> {
        let cover = images.first()?.0.clone();
        let total_bytes = images.iter().map(|(_, size)| size).sum();
        let images: Vec<PathBuf> = images.into_iter().map(|(image, _)| image).collect();

        Some(Self {
            name: folder_name(&path),
            path,
            cover,
            image_count: images.len(),
            images,
            total_bytes,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    /// A real folder whose descendants are albums
    Explicit,
    /// Sibling albums grouped by name similarity; the path is virtual
    Smart,
}

/// A set of albums shown as one card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub path: PathBuf,
    pub name: String,
    pub kind: CollectionKind,
    pub albums: Vec<Album>,
    pub cover: Option<PathBuf>,
    pub album_count: usize,
    pub image_count: usize,
    pub total_bytes: u64,
}

impl Collection {
    pub fn new(path: PathBuf, name: String, kind: CollectionKind, albums: Vec<Album>) -> Self {
        Self {
            cover: albums.first().map(|album| album.cover.clone()),
            album_count: albums.len(),
            image_count: albums.iter().map(|album| album.image_count).sum(),
            total_bytes: albums.iter().map(|album| album.total_bytes).sum(),
            path,
            name,
            kind,
            albums,
        }
    }

    /// Collection backed by a real folder.
    pub fn explicit(path: PathBuf, albums: Vec<Album>) -> Self {
        let name = folder_name(&path);
        Self::new(path, name, CollectionKind::Explicit, albums)
    }
}

/// One card in the library view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LibraryEntry {
    Album(Album),
    Collection(Collection),
}

impl LibraryEntry {
    pub fn name(&self) -> &str {
        match self {
            LibraryEntry::Album(album) => &album.name,
            LibraryEntry::Collection(collection) => &collection.name,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            LibraryEntry::Album(album) => &album.path,
            LibraryEntry::Collection(collection) => &collection.path,
        }
    }

    pub fn cover(&self) -> Option<&Path> {
        match self {
            LibraryEntry::Album(album) => Some(&album.cover),
            LibraryEntry::Collection(collection) => collection.cover.as_deref(),
        }
    }

    pub fn image_count(&self) -> usize {
        match self {
            LibraryEntry::Album(album) => album.image_count,
            LibraryEntry::Collection(collection) => collection.image_count,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        match self {
            LibraryEntry::Album(album) => album.total_bytes,
            LibraryEntry::Collection(collection) => collection.total_bytes,
        }
    }

    /// Every album in this entry, in display order.
    pub fn albums(&self) -> &[Album] {
        match self {
            LibraryEntry::Album(album) => std::slice::from_ref(album),
            LibraryEntry::Collection(collection) => &collection.albums,
        }
    }

    pub fn as_album(&self) -> Option<&Album> {
        match self {
            LibraryEntry::Album(album) => Some(album),
            LibraryEntry::Collection(_) => None,
        }
    }

    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            LibraryEntry::Album(_) => None,
            LibraryEntry::Collection(collection) => Some(collection),
        }
    }
}

/// Totals over a scan result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Albums anywhere in the result, including inside collections
    pub albums: usize,
    pub collections: usize,
    pub smart_collections: usize,
    pub images: usize,
    pub bytes: u64,
}

impl ScanSummary {
    pub fn from_entries(entries: &[LibraryEntry]) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            if let LibraryEntry::Collection(collection) = entry {
                summary.collections += 1;
                if collection.kind == CollectionKind::Smart {
                    summary.smart_collections += 1;
                }
            }
            summary.albums += entry.albums().len();
            summary.images += entry.image_count();
            summary.bytes += entry.total_bytes();
        }
        summary
    }
}

pub(crate) fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
