//! SQLite-backed [`ResultCache`], grounded on the `rusqlite` connection
//! and versioned-migration pattern another pack example uses for its
//! local database: WAL journaling, a tuned page cache, a single
//! `user_version`-gated schema migration, and a once-logged open failure.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use log::{trace, warn};
use rusqlite::{params, Connection};

use super::{CacheStats, ResultCache};
use crate::model::CacheEntry;

pub struct SqliteCache {
    conn: Option<Mutex<Connection>>,
    warned: AtomicBool,
}

impl SqliteCache {
    /// Opens (or creates) the cache database at `path`, configured per
    /// spec §4.L / §6: WAL mode, `page_cache_mb` page cache, mmap capped
    /// at `mmap_cap_mb`. On any failure, degrades to a permanently-absent
    /// cache (logged once) rather than propagating an error (spec §7
    /// `CacheUnavailable`).
    #[must_use]
    #[inline]
    pub fn open(path: &Path, page_cache_mb: u32, mmap_cap_mb: u32) -> Self {
        match Self::try_open(path, page_cache_mb, mmap_cap_mb) {
            Ok(conn) => Self {
                conn: Some(Mutex::new(conn)),
                warned: AtomicBool::new(false),
            },
            Err(e) => {
                warn!("result cache unavailable, degrading to no-op: {e}");
                Self {
                    conn: None,
                    warned: AtomicBool::new(true),
                }
            }
        }
    }

    fn try_open(path: &Path, page_cache_mb: u32, mmap_cap_mb: u32) -> rusqlite::Result<Connection> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "cache_size", -(i64::from(page_cache_mb) * 1024))?;
        conn.pragma_update(None, "mmap_size", i64::from(mmap_cap_mb) * 1024 * 1024)?;
        migrate(&conn)?;
        Ok(conn)
    }

    fn warn_once(&self, msg: &str) {
        if !self.warned.swap(true, Ordering::Relaxed) {
            warn!("{msg}");
        }
    }
}

fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                path TEXT PRIMARY KEY,
                mtime REAL NOT NULL,
                analysis TEXT NOT NULL,
                waveform BLOB,
                created_at REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cache_mtime ON cache_entries(mtime);
            PRAGMA user_version = 1;",
        )?;
    }
    Ok(())
}

impl ResultCache for SqliteCache {
    fn get(&self, path: &str, current_mtime: f64) -> Option<CacheEntry> {
        let Some(conn) = &self.conn else { return None };
        let Ok(conn) = conn.lock() else { return None };
        let result = conn.query_row(
            "SELECT path, mtime, analysis, waveform FROM cache_entries WHERE path = ?1",
            params![path],
            |row| {
                Ok(CacheEntry {
                    path: row.get(0)?,
                    mtime: row.get(1)?,
                    analysis_json: row.get(2)?,
                    waveform_blob: row.get(3)?,
                })
            },
        );
        match result {
            Ok(entry) if super::entry_is_fresh(entry.mtime, current_mtime) => {
                trace!("cache hit: {path}");
                Some(entry)
            }
            Ok(_) => {
                trace!("cache stale: {path}");
                None
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                trace!("cache miss: {path}");
                None
            }
            Err(e) => {
                self.warn_once(&format!("result cache read failed, treating as miss: {e}"));
                None
            }
        }
    }

    fn set(&self, entry: CacheEntry) {
        self.set_many(vec![entry]);
    }

    fn set_many(&self, entries: Vec<CacheEntry>) {
        let Some(conn) = &self.conn else { return };
        let Ok(mut conn) = conn.lock() else { return };
        let tx = match conn.transaction() {
            Ok(tx) => tx,
            Err(e) => {
                self.warn_once(&format!("result cache write failed: {e}"));
                return;
            }
        };
        for entry in entries {
            let now = entry.mtime;
            if let Err(e) = tx.execute(
                "INSERT INTO cache_entries (path, mtime, analysis, waveform, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(path) DO UPDATE SET mtime = excluded.mtime, analysis = excluded.analysis, waveform = excluded.waveform",
                params![entry.path, entry.mtime, entry.analysis_json, entry.waveform_blob, now],
            ) {
                self.warn_once(&format!("result cache write failed: {e}"));
                return;
            }
        }
        let _ = tx.commit();
    }

    fn remove(&self, path: &str) {
        let Some(conn) = &self.conn else { return };
        if let Ok(conn) = conn.lock() {
            let _ = conn.execute("DELETE FROM cache_entries WHERE path = ?1", params![path]);
        }
    }

    fn clear(&self) {
        let Some(conn) = &self.conn else { return };
        if let Ok(conn) = conn.lock() {
            let _ = conn.execute("DELETE FROM cache_entries", []);
        }
    }

    fn stats(&self) -> CacheStats {
        let Some(conn) = &self.conn else {
            return CacheStats { entries: 0, size_bytes: 0 };
        };
        let Ok(conn) = conn.lock() else {
            return CacheStats { entries: 0, size_bytes: 0 };
        };
        let entries: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |r| r.get(0)).unwrap_or(0);
        let size_bytes: i64 = conn
            .query_row("SELECT page_count * page_size FROM pragma_page_count, pragma_page_size", [], |r| r.get(0))
            .unwrap_or(0);
        CacheStats {
            entries: entries.max(0) as u64,
            size_bytes: size_bytes.max(0) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_an_entry_with_fresh_mtime() {
        let dir = tempdir().unwrap();
        let cache = SqliteCache::open(&dir.path().join("cache.db"), 4, 16);
        let entry = CacheEntry {
            path: "/tmp/song.mp3".to_string(),
            mtime: 100.0,
            analysis_json: "{\"bpm\":128}".to_string(),
            waveform_blob: vec![1, 2, 3, 4],
        };
        cache.set(entry.clone());
        let got = cache.get("/tmp/song.mp3", 100.0).unwrap();
        assert_eq!(got.analysis_json, entry.analysis_json);
        assert!(cache.get("/tmp/song.mp3", 200.0).is_none());
    }

    #[test]
    fn missing_path_is_a_miss() {
        let dir = tempdir().unwrap();
        let cache = SqliteCache::open(&dir.path().join("cache.db"), 4, 16);
        assert!(cache.get("/no/such/file", 0.0).is_none());
    }
}
