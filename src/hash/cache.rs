// Persistent hash cache
//
// SQLite file loaded fully at the start of a run and rewritten at the end
// with only the entries this run looked up or computed, so files that left
// the trees drop out. An entry is only trusted while the file's size, mtime
// and perceptual scheme are unchanged. A corrupt or unreadable cache is
// treated as empty.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use rusqlite::{params, Connection};

use crate::constants::HASH_CACHE_SCHEMA_VERSION;
use crate::error::{Result, SyncError};
use crate::tree::FileStat;
use super::PerceptualHash;

/// All migrations in order. Forward-only; never edit one after it ships.
const MIGRATIONS: &[&str] = &[
    // Migration 1: hash cache table
    r#"
    CREATE TABLE hash_cache (
        path TEXT PRIMARY KEY NOT NULL,
        size_bytes INTEGER NOT NULL,
        mtime_ns INTEGER NOT NULL,
        exact_hash TEXT NOT NULL,
        perceptual_scheme TEXT NOT NULL,
        perceptual_hash TEXT
    );
    "#,
];

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub stat: FileStat,
    pub exact_hash: String,
    pub perceptual_scheme: String,
    pub perceptual_hash: Option<PerceptualHash>,
}

#[derive(Debug, Default)]
pub struct HashCache {
    path: Option<PathBuf>,
    entries: HashMap<PathBuf, CacheEntry>,
    touched: HashSet<PathBuf>,
}

impl HashCache {
    /// A cache that lives only for this run.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the cache file. Never fails: problems are logged and yield an empty cache.
    pub fn load(path: &Path) -> Self {
        let entries = if path.exists() {
            match read_entries(path) {
                Ok(entries) => {
                    log::info!("Loaded {} cached hashes from {}", entries.len(), path.display());
                    entries
                }
                Err(e) => {
                    log::warn!("Ignoring unreadable hash cache {}: {}", path.display(), e);
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        Self { path: Some(path.to_path_buf()), entries, touched: HashSet::new() }
    }

    /// Entry for `path` if it is still valid for `stat` and `scheme`.
    /// A hit keeps the entry alive for the next `persist`.
    pub fn lookup(&mut self, path: &Path, stat: FileStat, scheme: &str) -> Option<&CacheEntry> {
        let valid = self
            .entries
            .get(path)
            .map_or(false, |e| e.stat == stat && e.perceptual_scheme == scheme);
        if !valid {
            return None;
        }
        self.touched.insert(path.to_path_buf());
        self.entries.get(path)
    }

    /// Insert or overwrite. Concurrent computation of the same entry is harmless.
    pub fn insert(&mut self, path: PathBuf, entry: CacheEntry) {
        self.touched.insert(path.clone());
        self.entries.insert(path, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite the cache file with the entries used this run. A corrupt file is replaced.
    pub fn persist(&self) -> Result<()> {
        let path = match &self.path {
            Some(p) => p,
            None => return Ok(()),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = match open_cache_db(path) {
            Ok(conn) => conn,
            Err(e) => {
                log::warn!("Replacing corrupt hash cache {}: {}", path.display(), e);
                std::fs::remove_file(path)?;
                open_cache_db(path)?
            }
        };

        let mut written = 0usize;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM hash_cache", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO hash_cache (path, size_bytes, mtime_ns, exact_hash, perceptual_scheme, perceptual_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (file_path, entry) in self.entries.iter().filter(|(p, _)| self.touched.contains(*p)) {
                // Keys are stored as text; a lossy key would never hit again
                let key = match file_path.to_str() {
                    Some(key) => key,
                    None => continue,
                };
                written += 1;
                stmt.execute(params![
                    key,
                    entry.stat.size as i64,
                    entry.stat.mtime_ns,
                    entry.exact_hash,
                    entry.perceptual_scheme,
                    entry.perceptual_hash.as_ref().map(|h| h.to_hex()),
                ])?;
            }
        }
        tx.commit()?;

        log::info!("Persisted {} cached hashes to {}", written, path.display());
        Ok(())
    }
}

/// Open or create the cache database and bring its schema up to date.
fn open_cache_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    run_migrations(&conn)?;
    Ok(conn)
}

fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let target_version = MIGRATIONS.len() as u32;
    debug_assert_eq!(target_version, HASH_CACHE_SCHEMA_VERSION);

    // Refuse a cache written by a newer build
    if current_version > target_version {
        return Err(SyncError::Other(format!(
            "Hash cache schema version {} is newer than this build supports (max {})",
            current_version, target_version
        )));
    }

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let migration_version = (i + 1) as u32;
        if migration_version <= current_version {
            continue;
        }
        conn.execute_batch(migration)?;
        conn.execute_batch(&format!("PRAGMA user_version = {}", migration_version))?;
    }

    Ok(())
}

fn read_entries(path: &Path) -> Result<HashMap<PathBuf, CacheEntry>> {
    let conn = open_cache_db(path)?;
    let mut stmt = conn.prepare(
        "SELECT path, size_bytes, mtime_ns, exact_hash, perceptual_scheme, perceptual_hash FROM hash_cache",
    )?;
    let rows = stmt.query_map([], |row| {
        let path: String = row.get(0)?;
        let size: i64 = row.get(1)?;
        let perceptual: Option<String> = row.get(5)?;
        Ok((
            PathBuf::from(path),
            CacheEntry {
                stat: FileStat { size: size as u64, mtime_ns: row.get(2)? },
                exact_hash: row.get(3)?,
                perceptual_scheme: row.get(4)?,
                perceptual_hash: perceptual.and_then(|h| PerceptualHash::from_hex(&h)),
            },
        ))
    })?;

    let mut entries = HashMap::new();
    for row in rows {
        let (path, entry) = row?;
        entries.insert(path, entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(size: u64, mtime_ns: i64) -> CacheEntry {
        CacheEntry {
            stat: FileStat { size, mtime_ns },
            exact_hash: "blake3:full:abc".to_string(),
            perceptual_scheme: "dct_mean:8".to_string(),
            perceptual_hash: Some(PerceptualHash::from_bytes(vec![0xAB; 8])),
        }
    }

    #[test]
    fn test_persist_and_reload() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("nested").join("cache.db");

        let mut cache = HashCache::load(&db);
        assert!(cache.is_empty());
        cache.insert(PathBuf::from("/t/a.jpg"), entry(10, 100));
        cache.persist().unwrap();

        let mut reloaded = HashCache::load(&db);
        assert_eq!(reloaded.len(), 1);
        let stat = FileStat { size: 10, mtime_ns: 100 };
        assert_eq!(reloaded.lookup(Path::new("/t/a.jpg"), stat, "dct_mean:8"), Some(&entry(10, 100)));
    }

    #[test]
    fn test_stale_entries_are_not_trusted() {
        let mut cache = HashCache::in_memory();
        cache.insert(PathBuf::from("/t/a.jpg"), entry(10, 100));

        let grown = FileStat { size: 11, mtime_ns: 100 };
        let touched = FileStat { size: 10, mtime_ns: 200 };
        assert!(cache.lookup(Path::new("/t/a.jpg"), grown, "dct_mean:8").is_none());
        assert!(cache.lookup(Path::new("/t/a.jpg"), touched, "dct_mean:8").is_none());
    }

    #[test]
    fn test_scheme_change_invalidates() {
        let mut cache = HashCache::in_memory();
        cache.insert(PathBuf::from("/t/a.jpg"), entry(10, 100));
        let stat = FileStat { size: 10, mtime_ns: 100 };
        assert!(cache.lookup(Path::new("/t/a.jpg"), stat, "dct_mean:16").is_none());
    }

    #[test]
    fn test_corrupt_cache_is_empty_and_replaced() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("cache.db");
        std::fs::write(&db, b"this is not a sqlite database, just garbage bytes").unwrap();

        let mut cache = HashCache::load(&db);
        assert!(cache.is_empty());

        cache.insert(PathBuf::from("/t/a.jpg"), entry(1, 1));
        cache.persist().unwrap();
        assert_eq!(HashCache::load(&db).len(), 1);
    }

    #[test]
    fn test_persist_drops_entries_not_used_this_run() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("cache.db");

        let mut cache = HashCache::load(&db);
        cache.insert(PathBuf::from("/t/kept.jpg"), entry(1, 1));
        cache.insert(PathBuf::from("/t/gone.jpg"), entry(2, 2));
        cache.persist().unwrap();

        let mut next_run = HashCache::load(&db);
        assert_eq!(next_run.len(), 2);
        let stat = FileStat { size: 1, mtime_ns: 1 };
        assert!(next_run.lookup(Path::new("/t/kept.jpg"), stat, "dct_mean:8").is_some());
        next_run.persist().unwrap();

        let mut reloaded = HashCache::load(&db);
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.lookup(Path::new("/t/kept.jpg"), stat, "dct_mean:8").is_some());
    }

    #[test]
    fn test_stale_hit_is_not_kept() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("cache.db");
        let mut cache = HashCache::load(&db);
        cache.insert(PathBuf::from("/t/a.jpg"), entry(1, 1));
        cache.persist().unwrap();

        let mut next_run = HashCache::load(&db);
        assert!(next_run.lookup(Path::new("/t/a.jpg"), FileStat { size: 9, mtime_ns: 9 }, "dct_mean:8").is_none());
        next_run.persist().unwrap();
        assert!(HashCache::load(&db).is_empty());
    }

    #[test]
    fn test_in_memory_persist_is_noop() {
        let mut cache = HashCache::in_memory();
        cache.insert(PathBuf::from("/t/a.jpg"), entry(1, 1));
        assert!(cache.persist().is_ok());
    }
}
