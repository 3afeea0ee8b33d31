//! SQLite persistence for ComicShelf library state.
//!
//! One database per user, by default at:
//!   {data_dir}/comicshelf/library.db
//!
//! Stores favorites and the recently viewed list. Paths are stored as given;
//! smart collections keep their virtual `[smart] ...` path.
//!
//! Uses WAL mode so a browser and the CLI can share the file.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default length of the recently viewed list.
pub const DEFAULT_MAX_RECENT: usize = 50;

/// What a stored path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Album,
    Collection,
    /// Name-grouped collection; its path does not exist on disk
    Smart,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Album => "album",
            EntryKind::Collection => "collection",
            EntryKind::Smart => "smart",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "album" => Ok(EntryKind::Album),
            "collection" => Ok(EntryKind::Collection),
            "smart" => Ok(EntryKind::Smart),
            other => anyhow::bail!("unknown entry kind: {}", other),
        }
    }
}

impl ToSql for EntryKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for EntryKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

/// A favorited album or collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Favorite {
    pub path: String,
    pub kind: EntryKind,
    pub added_at: DateTime<Utc>,
}

/// One entry of the recently viewed list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentView {
    pub path: String,
    pub kind: EntryKind,
    pub viewed_at: DateTime<Utc>,
}

/// Library database handle.
pub struct LibraryDb {
    conn: Connection,
    db_path: PathBuf,
    max_recent: usize,
}

impl LibraryDb {
    /// Open or create the per-user database in the platform data directory.
    pub fn open_default() -> Result<Self> {
        Self::open(&Self::default_path())
    }

    /// Default database location.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("comicshelf")
            .join("library.db")
    }

    /// Open or create a database at a specific path.
    /// Creates the parent directory if needed.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data dir: {}", parent.display()))?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

        // WAL mode for concurrent read/write
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn,
            db_path: db_path.to_path_buf(),
            max_recent: DEFAULT_MAX_RECENT,
        };
        db.create_tables()?;
        log::debug!("opened library database {}", db_path.display());
        Ok(db)
    }

    /// Change how many recently viewed entries are kept (at least one).
    pub fn with_max_recent(mut self, max_recent: usize) -> Self {
        self.max_recent = max_recent.max(1);
        self
    }

    /// Get the database file path.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn max_recent(&self) -> usize {
        self.max_recent
    }

    // -- Schema --

    fn create_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS favorites (
                path TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                added_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS recent_views (
                path TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                viewed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_favorites_added ON favorites(added_at);
            CREATE INDEX IF NOT EXISTS idx_recent_viewed ON recent_views(viewed_at);
            ",
        )?;
        Ok(())
    }

    // -- Favorites --

    /// Mark a path as favorite. Returns false if it already was one, in which
    /// case the original timestamp is kept.
    pub fn add_favorite(&self, path: &str, kind: EntryKind) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO favorites (path, kind, added_at) VALUES (?1, ?2, ?3)",
            params![path, kind, timestamp(Utc::now())],
        )?;
        Ok(inserted > 0)
    }

    /// Returns false if the path was not a favorite.
    pub fn remove_favorite(&self, path: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM favorites WHERE path = ?1", params![path])?;
        Ok(removed > 0)
    }

    pub fn is_favorite(&self, path: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM favorites WHERE path = ?1",
                params![path],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Flip the favorite state of a path and return the new state.
    pub fn toggle_favorite(&self, path: &str, kind: EntryKind) -> Result<bool> {
        if self.remove_favorite(path)? {
            Ok(false)
        } else {
            self.add_favorite(path, kind)?;
            Ok(true)
        }
    }

    /// All favorites, most recently added first.
    pub fn favorites(&self) -> Result<Vec<Favorite>> {
        let mut stmt = self.conn.prepare(
            "SELECT path, kind, added_at FROM favorites
             ORDER BY added_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, EntryKind>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut favorites = Vec::new();
        for row in rows {
            let (path, kind, added_at) = row?;
            favorites.push(Favorite {
                added_at: parse_timestamp(&added_at)?,
                path,
                kind,
            });
        }
        Ok(favorites)
    }

    // -- Recently viewed --

    /// Record that a path was opened. Moves it to the front of the list and
    /// trims the list to `max_recent` entries.
    pub fn record_view(&self, path: &str, kind: EntryKind) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        // REPLACE deletes the old row, so the rowid also reflects recency
        self.conn.execute(
            "INSERT OR REPLACE INTO recent_views (path, kind, viewed_at) VALUES (?1, ?2, ?3)",
            params![path, kind, timestamp(Utc::now())],
        )?;
        let trimmed = self.conn.execute(
            "DELETE FROM recent_views WHERE path NOT IN (
                SELECT path FROM recent_views ORDER BY viewed_at DESC, rowid DESC LIMIT ?1
            )",
            params![self.max_recent as i64],
        )?;
        tx.commit()?;

        if trimmed > 0 {
            log::debug!("trimmed {} old entries from recently viewed", trimmed);
        }
        Ok(())
    }

    /// Most recently viewed first, at most `limit` entries.
    pub fn recent(&self, limit: usize) -> Result<Vec<RecentView>> {
        let mut stmt = self.conn.prepare(
            "SELECT path, kind, viewed_at FROM recent_views
             ORDER BY viewed_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, EntryKind>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut recent = Vec::new();
        for row in rows {
            let (path, kind, viewed_at) = row?;
            recent.push(RecentView {
                viewed_at: parse_timestamp(&viewed_at)?,
                path,
                kind,
            });
        }
        Ok(recent)
    }

    /// Returns the number of entries removed.
    pub fn clear_recent(&self) -> Result<usize> {
        let removed = self.conn.execute("DELETE FROM recent_views", [])?;
        Ok(removed)
    }

    // -- Maintenance --

    /// Drop favorites and recent entries whose folder no longer exists.
    /// Smart collections have no folder and are always kept.
    /// Returns the number of rows removed across both lists.
    pub fn prune_missing(&self) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut removed = 0;

        for table in ["favorites", "recent_views"] {
            let missing: Vec<String> = {
                let mut stmt = self
                    .conn
                    .prepare(&format!("SELECT path, kind FROM {}", table))?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, EntryKind>(1)?))
                })?;
                let mut missing = Vec::new();
                for row in rows {
                    let (path, kind) = row?;
                    if kind != EntryKind::Smart && !Path::new(&path).exists() {
                        missing.push(path);
                    }
                }
                missing
            };

            for path in &missing {
                removed += self.conn.execute(
                    &format!("DELETE FROM {} WHERE path = ?1", table),
                    params![path],
                )?;
            }
        }

        tx.commit()?;
        if removed > 0 {
            log::info!("pruned {} entries for missing folders", removed);
        }
        Ok(removed)
    }

    // -- Statistics --

    pub fn favorite_count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM favorites", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn recent_count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM recent_views", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Fixed-width RFC 3339 so that text order matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(text)
        .with_context(|| format!("Invalid timestamp in database: {}", text))?;
    Ok(parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (LibraryDb, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = LibraryDb::open(&db_path).unwrap();
        (db, dir)
    }

    #[test]
    fn test_create_and_load_empty() {
        let (db, _dir) = test_db();
        assert!(db.favorites().unwrap().is_empty());
        assert!(db.recent(10).unwrap().is_empty());
    }

    #[test]
    fn test_open_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("library.db");
        let db = LibraryDb::open(&db_path).unwrap();
        assert_eq!(db.path(), db_path.as_path());
        assert!(db_path.exists());
    }

    #[test]
    fn test_add_and_remove_favorite() {
        let (db, _dir) = test_db();
        assert!(db.add_favorite("/comics/Akira", EntryKind::Album).unwrap());
        assert!(db.is_favorite("/comics/Akira").unwrap());

        // Second add is a no-op
        assert!(!db.add_favorite("/comics/Akira", EntryKind::Album).unwrap());
        assert_eq!(db.favorite_count().unwrap(), 1);

        assert!(db.remove_favorite("/comics/Akira").unwrap());
        assert!(!db.is_favorite("/comics/Akira").unwrap());
        assert!(!db.remove_favorite("/comics/Akira").unwrap());
    }

    #[test]
    fn test_toggle_favorite() {
        let (db, _dir) = test_db();
        assert!(db.toggle_favorite("/comics/Saga", EntryKind::Collection).unwrap());
        assert!(db.is_favorite("/comics/Saga").unwrap());
        assert!(!db.toggle_favorite("/comics/Saga", EntryKind::Collection).unwrap());
        assert!(!db.is_favorite("/comics/Saga").unwrap());
    }

    #[test]
    fn test_favorites_newest_first() {
        let (db, _dir) = test_db();
        db.add_favorite("/comics/A", EntryKind::Album).unwrap();
        db.add_favorite("/comics/B", EntryKind::Collection).unwrap();
        db.add_favorite("/comics/[smart] C", EntryKind::Smart).unwrap();

        let favorites = db.favorites().unwrap();
        let paths: Vec<&str> = favorites.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/comics/[smart] C", "/comics/B", "/comics/A"]);
        assert_eq!(favorites[0].kind, EntryKind::Smart);
        assert_eq!(favorites[1].kind, EntryKind::Collection);
    }

    #[test]
    fn test_record_view_moves_to_front() {
        let (db, _dir) = test_db();
        db.record_view("/comics/A", EntryKind::Album).unwrap();
        db.record_view("/comics/B", EntryKind::Album).unwrap();
        db.record_view("/comics/A", EntryKind::Album).unwrap();

        let recent = db.recent(10).unwrap();
        let paths: Vec<&str> = recent.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/comics/A", "/comics/B"]);
        assert!(recent[0].viewed_at >= recent[1].viewed_at);
    }

    #[test]
    fn test_recent_is_trimmed() {
        let (db, _dir) = test_db();
        let db = db.with_max_recent(3);
        for i in 0..5 {
            db.record_view(&format!("/comics/{}", i), EntryKind::Album)
                .unwrap();
        }

        assert_eq!(db.recent_count().unwrap(), 3);
        let recent = db.recent(10).unwrap();
        let paths: Vec<&str> = recent.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/comics/4", "/comics/3", "/comics/2"]);

        assert_eq!(db.recent(1).unwrap().len(), 1);
    }

    #[test]
    fn test_clear_recent() {
        let (db, _dir) = test_db();
        db.record_view("/comics/A", EntryKind::Album).unwrap();
        db.record_view("/comics/B", EntryKind::Album).unwrap();
        db.add_favorite("/comics/A", EntryKind::Album).unwrap();

        assert_eq!(db.clear_recent().unwrap(), 2);
        assert!(db.recent(10).unwrap().is_empty());
        // Favorites are independent
        assert!(db.is_favorite("/comics/A").unwrap());
    }

    #[test]
    fn test_prune_missing() {
        let (db, dir) = test_db();
        let present = dir.path().join("Present");
        std::fs::create_dir(&present).unwrap();
        let present = present.to_string_lossy().to_string();
        let gone = dir.path().join("Gone").to_string_lossy().to_string();

        db.add_favorite(&present, EntryKind::Album).unwrap();
        db.add_favorite(&gone, EntryKind::Album).unwrap();
        db.add_favorite("/nowhere/[smart] Virtual", EntryKind::Smart)
            .unwrap();
        db.record_view(&gone, EntryKind::Album).unwrap();
        db.record_view(&present, EntryKind::Album).unwrap();

        assert_eq!(db.prune_missing().unwrap(), 2);
        assert!(db.is_favorite(&present).unwrap());
        assert!(!db.is_favorite(&gone).unwrap());
        assert!(db.is_favorite("/nowhere/[smart] Virtual").unwrap());

        let recent = db.recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].path, present);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("library.db");
        {
            let db = LibraryDb::open(&db_path).unwrap();
            db.add_favorite("/comics/A", EntryKind::Album).unwrap();
            db.record_view("/comics/B", EntryKind::Collection).unwrap();
        }

        let db = LibraryDb::open(&db_path).unwrap();
        assert!(db.is_favorite("/comics/A").unwrap());
        assert_eq!(db.recent(10).unwrap()[0].kind, EntryKind::Collection);
    }

    #[test]
    fn test_entry_kind_parse() {
        assert_eq!("Album".parse::<EntryKind>().unwrap(), EntryKind::Album);
        assert_eq!("smart".parse::<EntryKind>().unwrap(), EntryKind::Smart);
        assert!("folder".parse::<EntryKind>().is_err());
        assert_eq!(EntryKind::Collection.to_string(), "collection");
    }

    #[test]
    fn test_timestamp_round_trip_keeps_order() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::milliseconds(1);
        assert!(timestamp(earlier) < timestamp(later));
        assert_eq!(
            parse_timestamp(&timestamp(earlier)).unwrap().timestamp_micros(),
            earlier.timestamp_micros()
        );
    }
}
