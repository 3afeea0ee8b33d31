//! Directory walk that classifies folders into albums and collections
//!
//! Only the root is allowed to fail the scan. Any other folder that cannot
//! be read is logged and skipped, so a scan always returns whatever it
//! managed to gather.

use crate::album::{Album, Collection, LibraryEntry};
use crate::group::{self, GroupingConfig};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Supported image file extensions, compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "bmp", "webp"];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("library root not found: {0}")]
    RootNotFound(PathBuf),

    #[error("library root is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Direct contents of one folder, naturally sorted.
#[derive(Debug, Default)]
struct FolderListing {
    images: Vec<(PathBuf, u64)>,
    subdirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct AlbumScanner {
    grouping: GroupingConfig,
}

impl AlbumScanner {
    pub fn new(grouping: GroupingConfig) -> Self {
        Self { grouping }
    }

    /// Scan the immediate children of `root`.
    ///
    /// A child with images of its own is an album (its subfolders are not
    /// visited). A child without images is searched to any depth and becomes
    /// an explicit collection of every album found below it, or is dropped
    /// if none are. Remaining top-level albums are then grouped by name.
    pub fn scan(&self, root: &Path) -> Result<Vec<LibraryEntry>, ScanError> {
        if !root.exists() {
            return Err(ScanError::RootNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        let listing = read_folder(root).map_err(|source| ScanError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        // rayon keeps the input order when collecting
        let mut slots: Vec<Option<LibraryEntry>> =
            listing.subdirs.par_iter().map(|dir| classify(dir)).collect();

        if self.grouping.enabled {
            self.group_top_level_albums(&mut slots, root);
        }

        let entries: Vec<LibraryEntry> = slots.into_iter().flatten().collect();
        log::info!(
            "scanned {}: {} entries from {} folders",
            root.display(),
            entries.len(),
            listing.subdirs.len()
        );
        Ok(entries)
    }

    /// Replace top-level albums with their similarity groups. Each group takes
    /// the slot of its first member; groups of one stay plain albums.
    fn group_top_level_albums(&self, slots: &mut [Option<LibraryEntry>], root: &Path) {
        let mut positions = Vec::new();
        let mut albums = Vec::new();
        for (index, slot) in slots.iter_mut().enumerate() {
            if matches!(slot, Some(LibraryEntry::Album(_))) {
                if let Some(LibraryEntry::Album(album)) = slot.take() {
                    positions.push(index);
                    albums.push(album);
                }
            }
        }

        for (seed, entry) in group::group_indexed(albums, root, self.grouping.threshold) {
            slots[positions[seed]] = Some(entry);
        }
    }
}

/// Turn one top-level folder into a library entry, if it holds any images.
fn classify(dir: &Path) -> Option<LibraryEntry> {
    let listing = match read_folder(dir) {
        Ok(listing) => listing,
        Err(e) => {
            log::warn!("skipping {}: {}", dir.display(), e);
            return None;
        }
    };

    if !listing.images.is_empty() {
        return Album::from_images(dir.to_path_buf(), listing.images).map(LibraryEntry::Album);
    }

    let mut albums = Vec::new();
    collect_nested_albums(&listing.subdirs, &mut albums);
    if albums.is_empty() {
        log::debug!("no images under {}", dir.display());
        return None;
    }
    Some(LibraryEntry::Collection(Collection::explicit(
        dir.to_path_buf(),
        albums,
    )))
}

fn collect_nested_albums(dirs: &[PathBuf], albums: &mut Vec<Album>) {
    for dir in dirs {
        let listing = match read_folder(dir) {
            Ok(listing) => listing,
            Err(e) => {
                log::warn!("skipping {}: {}", dir.display(), e);
                continue;
            }
        };

        if listing.images.is_empty() {
            collect_nested_albums(&listing.subdirs, albums);
        } else if let Some(album) = Album::from_images(dir.clone(), listing.images) {
            albums.push(album);
        }
    }
}

/// List images and subfolders directly inside `dir`.
///
/// Hidden entries are ignored. Symlinked files count as images; symlinked
/// folders are not followed, which keeps link cycles from recursing forever.
fn read_folder(dir: &Path) -> io::Result<FolderListing> {
    let mut listing = FolderListing::default();

    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::debug!("unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                log::debug!("cannot stat {}: {}", path.display(), e);
                continue;
            }
        };

        if file_type.is_dir() {
            listing.subdirs.push(path);
        } else if (file_type.is_file() || file_type.is_symlink()) && is_image_file(&path) {
            // Follows symlinks; a file that vanished since listing is skipped
            match fs::metadata(&path) {
                Ok(metadata) if metadata.is_file() => listing.images.push((path, metadata.len())),
                Ok(_) => {}
                Err(e) => log::debug!("cannot stat {}: {}", path.display(), e),
            }
        }
    }

    listing.images.sort_by(|(a, _), (b, _)| natural_cmp(a, b));
    listing.subdirs.sort_by(|a, b| natural_cmp(a, b));
    Ok(listing)
}

fn natural_cmp(a: &Path, b: &Path) -> Ordering {
    let a = a.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    let b = b.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    natord::compare_ignore_case(&a, &b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::album::CollectionKind;
    use tempfile::tempdir;

    fn touch(path: &Path, bytes: usize) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![0u8; bytes]).unwrap();
    }

    fn scan(root: &Path) -> Vec<LibraryEntry> {
        AlbumScanner::default().scan(root).unwrap()
    }

    #[test]
    fn test_scan_classification() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        touch(&root.join("A/img1.jpg"), 10);
        touch(&root.join("B/sub1/img2.jpg"), 20);

        let entries = scan(root);
        assert_eq!(entries.len(), 2);

        let album = entries[0].as_album().unwrap();
        assert_eq!(album.name, "A");
        assert_eq!(album.image_count, 1);

        let collection = entries[1].as_collection().unwrap();
        assert_eq!(collection.name, "B");
        assert_eq!(collection.kind, CollectionKind::Explicit);
        assert_eq!(collection.albums.len(), 1);
        assert_eq!(collection.albums[0].name, "sub1");
    }

    #[test]
    fn test_missing_root_aborts() {
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("nope");
        let err = AlbumScanner::default().scan(&missing).unwrap_err();
        assert!(matches!(err, ScanError::RootNotFound(_)));

        let file = temp_dir.path().join("file.jpg");
        touch(&file, 1);
        let err = AlbumScanner::default().scan(&file).unwrap_err();
        assert!(matches!(err, ScanError::NotADirectory(_)));
    }

    #[test]
    fn test_empty_root_is_empty_result() {
        let temp_dir = tempdir().unwrap();
        fs::create_dir(temp_dir.path().join("empty")).unwrap();
        touch(&temp_dir.path().join("notes/readme.txt"), 5);

        assert!(scan(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_album_contents_are_naturally_ordered() {
        let temp_dir = tempdir().unwrap();
        let album_dir = temp_dir.path().join("Comic");
        touch(&album_dir.join("page10.jpg"), 100);
        touch(&album_dir.join("page2.PNG"), 50);
        touch(&album_dir.join("page1.webp"), 25);
        touch(&album_dir.join("info.txt"), 999);
        touch(&album_dir.join(".hidden.jpg"), 999);

        let entries = scan(temp_dir.path());
        let album = entries[0].as_album().unwrap();

        let names: Vec<String> = album
            .images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["page1.webp", "page2.PNG", "page10.jpg"]);
        assert_eq!(album.cover, album_dir.join("page1.webp"));
        assert_eq!(album.total_bytes, 175);
    }

    #[test]
    fn test_album_folder_is_a_leaf() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        touch(&root.join("Album/cover.jpg"), 1);
        touch(&root.join("Album/extras/bonus.jpg"), 1);

        let entries = scan(root);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].as_album().unwrap().image_count, 1);
    }

    #[test]
    fn test_deeply_nested_collection() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        touch(&root.join("Saga/Arc 1/Vol 1/001.jpg"), 1);
        touch(&root.join("Saga/Arc 1/Vol 2/001.jpg"), 1);
        touch(&root.join("Saga/Arc 2/Vol 10/001.jpg"), 1);
        fs::create_dir_all(root.join("Saga/Empty/Deeper")).unwrap();

        let entries = scan(root);
        let collection = entries[0].as_collection().unwrap();
        let names: Vec<&str> = collection.albums.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Vol 1", "Vol 2", "Vol 10"]);
        assert_eq!(collection.image_count, 3);
    }

    #[test]
    fn test_similar_albums_become_smart_collection() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        touch(&root.join("One Piece Vol.1/001.jpg"), 1);
        touch(&root.join("One Piece Vol.2/001.jpg"), 1);
        touch(&root.join("Naruto 001/001.jpg"), 1);

        let entries = scan(root);
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].as_album().unwrap().name, "Naruto 001");

        let collection = entries[1].as_collection().unwrap();
        assert_eq!(collection.kind, CollectionKind::Smart);
        assert_eq!(collection.name, "One Piece");
        assert_eq!(collection.path, root.join("[smart] One Piece"));
        let names: Vec<&str> = collection.albums.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["One Piece Vol.1", "One Piece Vol.2"]);
    }

    #[test]
    fn test_smart_path_avoids_real_folder() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        touch(&root.join("One Piece Vol.1/001.jpg"), 1);
        touch(&root.join("One Piece Vol.2/001.jpg"), 1);
        fs::create_dir(root.join("[smart] One Piece")).unwrap();

        let entries = scan(root);
        assert_eq!(entries.len(), 1);
        let collection = entries[0].as_collection().unwrap();
        assert_eq!(collection.name, "One Piece");
        assert_eq!(
            collection.path,
            root.join("[smart] One Piece (One Piece Vol.1)")
        );
    }

    #[test]
    fn test_explicit_collections_are_not_regrouped() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        touch(&root.join("Berserk Vol 1/001.jpg"), 1);
        touch(&root.join("Box/Berserk Vol 2/001.jpg"), 1);

        let entries = scan(root);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].as_album().is_some());
        assert_eq!(entries[1].as_collection().unwrap().kind, CollectionKind::Explicit);
    }

    #[test]
    fn test_grouping_can_be_disabled() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        touch(&root.join("One Piece Vol.1/001.jpg"), 1);
        touch(&root.join("One Piece Vol.2/001.jpg"), 1);

        let scanner = AlbumScanner::new(GroupingConfig {
            enabled: false,
            ..GroupingConfig::default()
        });
        let entries = scanner.scan(root).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.as_album().is_some()));
    }

    #[test]
    fn test_unreadable_folder_is_skipped() {
        let temp_dir = tempdir().unwrap();
        assert!(classify(&temp_dir.path().join("vanished")).is_none());

        let mut albums = Vec::new();
        collect_nested_albums(&[temp_dir.path().join("vanished")], &mut albums);
        assert!(albums.is_empty());
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("a/b.JPG")));
        assert!(is_image_file(Path::new("b.webp")));
        assert!(!is_image_file(Path::new("b.txt")));
        assert!(!is_image_file(Path::new("jpg")));
    }
}
