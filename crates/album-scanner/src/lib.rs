//! Album discovery and grouping for ComicShelf
//!
//! Walks a library root, turning folders that directly hold images into
//! albums and folders that only nest albums into collections. Sibling
//! albums whose names look alike ("One Piece Vol.1", "One Piece Vol.2")
//! are then clustered into smart collections.

pub mod album;
pub mod group;
pub mod scan;

pub use album::{Album, Collection, CollectionKind, LibraryEntry, ScanSummary};
pub use group::{clean_name, cluster, group_albums, similarity, GroupingConfig};
pub use scan::{is_image_file, AlbumScanner, ScanError, IMAGE_EXTENSIONS};
