use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use album_scanner::{AlbumScanner, GroupingConfig, LibraryEntry, ScanSummary};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use library_db::{EntryKind, LibraryDb};
use thumbnail_cache::{CacheConfig, DiskStore, LoadCoordinator, SizePreset};

#[derive(Parser)]
#[command(name = "comicshelf")]
#[command(about = "Browse comic and photo albums: scan libraries and manage the thumbnail cache")]
struct Cli {
    /// Thumbnail cache directory (overrides the config file)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// JSON file with cache settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Library database file (defaults to the user data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a library folder into albums and collections
    Scan {
        /// Library root folder
        root: PathBuf,

        /// Write the scan result to a JSON file
        #[arg(long)]
        json: Option<PathBuf>,

        /// Keep similarly named albums separate
        #[arg(long)]
        no_group: bool,

        /// Minimum name similarity for grouping (0.0 - 1.0)
        #[arg(long, default_value = "0.6")]
        threshold: f64,
    },

    /// Generate thumbnails for every image in a library
    Thumbs {
        /// Library root folder
        root: PathBuf,

        /// Target size: cover, grid or preview
        #[arg(long, default_value = "cover")]
        preset: SizePreset,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "600")]
        timeout_secs: u64,
    },

    /// Inspect or clean the thumbnail cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage favorite albums and collections
    Fav {
        #[command(subcommand)]
        action: FavAction,
    },

    /// Manage the recently viewed list
    Recent {
        #[command(subcommand)]
        action: RecentAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show file count and size of the disk cache
    Stats,
    /// Delete every cached thumbnail
    Clear,
    /// Delete thumbnails not used for a number of days
    Evict {
        #[arg(long, default_value = "30")]
        days: u64,
    },
}

#[derive(Subcommand)]
enum FavAction {
    /// Add a favorite
    Add {
        path: PathBuf,
        /// album, collection or smart
        #[arg(long, default_value = "album")]
        kind: String,
    },
    /// Remove a favorite
    Remove { path: PathBuf },
    /// List favorites, newest first
    List,
}

#[derive(Subcommand)]
enum RecentAction {
    /// List recently viewed entries
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Forget every recently viewed entry
    Clear,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            ref root,
            ref json,
            no_group,
            threshold,
        } => scan_library(root, json.as_deref(), !no_group, threshold),
        Commands::Thumbs {
            ref root,
            preset,
            timeout_secs,
        } => {
            let config = load_cache_config(cli.config.as_deref(), cli.cache_dir.as_deref())?;
            generate_thumbnails(root, preset, config, Duration::from_secs(timeout_secs))
        }
        Commands::Cache { ref action } => {
            let config = load_cache_config(cli.config.as_deref(), cli.cache_dir.as_deref())?;
            manage_cache(action, &config)
        }
        Commands::Fav { ref action } => manage_favorites(action, &open_db(cli.db.as_deref())?),
        Commands::Recent { ref action } => manage_recent(action, &open_db(cli.db.as_deref())?),
    }
}

fn load_cache_config(config_path: Option<&Path>, cache_dir: Option<&Path>) -> Result<CacheConfig> {
    let mut config = match config_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str::<CacheConfig>(&text)
                .with_context(|| format!("Invalid cache config {}", path.display()))?
        }
        None => CacheConfig::default(),
    };

    if let Some(dir) = cache_dir {
        config.cache_dir = dir.to_path_buf();
    }
    log::debug!("cache config: {:?}", config);
    Ok(config)
}

fn open_db(db_path: Option<&Path>) -> Result<LibraryDb> {
    match db_path {
        Some(path) => LibraryDb::open(path),
        None => LibraryDb::open_default(),
    }
}

fn scan_library(root: &Path, json: Option<&Path>, group: bool, threshold: f64) -> Result<()> {
    println!("🔍 Scanning library: {}", root.display());

    let scanner = AlbumScanner::new(GroupingConfig {
        enabled: group,
        threshold,
    });
    let started = Instant::now();
    let entries = scanner
        .scan(root)
        .with_context(|| format!("Failed to scan {}", root.display()))?;

    if entries.is_empty() {
        println!("⚠️  No albums found in {}", root.display());
        return Ok(());
    }

    print_scan_results(&entries);
    println!("\n⏱️  Scanned in {:.2}s", started.elapsed().as_secs_f64());

    if let Some(output_path) = json {
        let json = serde_json::to_string_pretty(&entries)
            .context("Failed to serialize scan result to JSON")?;
        std::fs::write(output_path, json)
            .with_context(|| format!("Failed to write output to {}", output_path.display()))?;
        println!("💾 Results saved to: {}", output_path.display());
    }

    Ok(())
}

fn print_scan_results(entries: &[LibraryEntry]) {
    let summary = ScanSummary::from_entries(entries);

    println!("\n📚 LIBRARY");
    println!("==========");
    println!("Albums: {}", summary.albums);
    println!(
        "Collections: {} ({} grouped by name)",
        summary.collections, summary.smart_collections
    );
    println!("Images: {}", summary.images);
    println!("Size: {}", format_bytes(summary.bytes));
    println!();

    for entry in entries {
        match entry {
            LibraryEntry::Album(album) => {
                println!("  📖 {} ({} images)", album.name, album.image_count);
            }
            LibraryEntry::Collection(collection) => {
                println!(
                    "  📚 {} [{:?}] ({} albums, {} images)",
                    collection.name,
                    collection.kind,
                    collection.album_count,
                    collection.image_count
                );
                for album in &collection.albums {
                    println!("      · {} ({} images)", album.name, album.image_count);
                }
            }
        }
    }
}

fn generate_thumbnails(
    root: &Path,
    preset: SizePreset,
    config: CacheConfig,
    timeout: Duration,
) -> Result<()> {
    let entries = AlbumScanner::default()
        .scan(root)
        .with_context(|| format!("Failed to scan {}", root.display()))?;

    let mut covers = Vec::new();
    let mut pages = Vec::new();
    for album in entries.iter().flat_map(|entry| entry.albums()) {
        covers.push(album.cover.clone());
        pages.extend(album.images.iter().skip(1).cloned());
    }

    if covers.is_empty() {
        println!("⚠️  No images found in {}", root.display());
        return Ok(());
    }

    let size = preset.size();
    println!(
        "🖼️  Generating {} thumbnails ({}) for {} images",
        preset,
        size,
        covers.len() + pages.len()
    );

    let mut coordinator = LoadCoordinator::new(config).context("Failed to start thumbnail workers")?;
    let started = Instant::now();

    // Covers are what the library grid shows first
    let queued_covers = coordinator.preload(&covers, size, true);
    let queued_pages = coordinator.preload(&pages, size, false);
    println!("📋 Queued {} covers and {} pages", queued_covers, queued_pages);

    let finished = coordinator.wait_until_idle(timeout);
    let stats = coordinator.cache_stats();
    let decoded = coordinator.decode_count();
    coordinator.shutdown();

    if !finished {
        println!(
            "⚠️  Timed out after {}s with {} jobs still pending",
            timeout.as_secs(),
            stats.in_flight_count
        );
    }

    println!("\n📈 THUMBNAILS");
    println!("=============");
    println!("Decoded from source: {}", decoded);
    println!("In memory: {} ({})", stats.memory_items, format_bytes(stats.memory_bytes as u64));
    println!("On disk: {} files ({})", stats.disk_files, format_bytes(stats.disk_bytes));
    println!("⏱️  Finished in {:.2}s", started.elapsed().as_secs_f64());

    Ok(())
}

fn manage_cache(action: &CacheAction, config: &CacheConfig) -> Result<()> {
    let store = DiskStore::open(&config.cache_dir, config.jpeg_quality)
        .with_context(|| format!("Failed to open cache {}", config.cache_dir.display()))?;

    match action {
        CacheAction::Stats => {
            let stats = store.stats()?;
            println!("📁 Cache: {}", store.dir().display());
            println!("Files: {}", stats.files);
            println!("Size: {}", format_bytes(stats.bytes));
        }
        CacheAction::Clear => {
            let removed = store.clear()?;
            println!("🗑️  Removed {} cached thumbnails", removed);
        }
        CacheAction::Evict { days } => {
            let max_age = Duration::from_secs(days.saturating_mul(24 * 60 * 60));
            let removed = store.evict_older_than(max_age)?;
            println!("🗑️  Removed {} thumbnails unused for {} days", removed, days);
        }
    }
    Ok(())
}

fn manage_favorites(action: &FavAction, db: &LibraryDb) -> Result<()> {
    match action {
        FavAction::Add { path, kind } => {
            let kind: EntryKind = kind.parse()?;
            let path = path.to_string_lossy();
            if db.add_favorite(&path, kind)? {
                println!("⭐ Added {} ({})", path, kind);
            } else {
                println!("Already a favorite: {}", path);
            }
        }
        FavAction::Remove { path } => {
            let path = path.to_string_lossy();
            if db.remove_favorite(&path)? {
                println!("Removed {}", path);
            } else {
                println!("Not a favorite: {}", path);
            }
        }
        FavAction::List => {
            let favorites = db.favorites()?;
            if favorites.is_empty() {
                println!("No favorites yet");
            }
            for favorite in favorites {
                println!(
                    "⭐ {}  [{}]  {}",
                    favorite.path,
                    favorite.kind,
                    favorite.added_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
    }
    Ok(())
}

fn manage_recent(action: &RecentAction, db: &LibraryDb) -> Result<()> {
    match action {
        RecentAction::List { limit } => {
            let recent = db.recent(*limit)?;
            if recent.is_empty() {
                println!("Nothing viewed yet");
            }
            for view in recent {
                println!(
                    "🕘 {}  [{}]  {}",
                    view.path,
                    view.kind,
                    view.viewed_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        RecentAction::Clear => {
            let removed = db.clear_recent()?;
            println!("🗑️  Cleared {} recently viewed entries", removed);
        }
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::try_parse_from([
            "comicshelf",
            "thumbs",
            "/library",
            "--preset",
            "grid",
            "--cache-dir",
            "/tmp/thumbs",
        ])
        .unwrap();

        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/thumbs")));
        match cli.command {
            Commands::Thumbs { root, preset, .. } => {
                assert_eq!(root, PathBuf::from("/library"));
                assert_eq!(preset, SizePreset::Grid);
            }
            _ => panic!("expected thumbs command"),
        }
    }

    #[test]
    fn test_config_file_with_cache_dir_override() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, r#"{ "worker_count": 4, "jpeg_quality": 70 }"#).unwrap();

        let override_dir = dir.path().join("thumbs");
        let config = load_cache_config(Some(&config_path), Some(&override_dir)).unwrap();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.jpeg_quality, 70);
        assert_eq!(config.cache_dir, override_dir);
        assert_eq!(config.max_memory_items, 256);
    }
}
