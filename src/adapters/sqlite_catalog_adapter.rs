//! SQLite rollup catalog adapter.

use crate::domain::error::BarscopeError;
use crate::ports::manifest_port::{ManifestSource, RawManifestEntry};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

const DEFAULT_POOL_SIZE: u32 = 2;

pub struct SqliteCatalogAdapter {
    pool: Pool<SqliteConnectionManager>,
    name: String,
}

impl SqliteCatalogAdapter {
    /// Open an existing catalog. A missing file is `ManifestUnavailable`, not an empty catalog.
    pub fn open(path: &Path) -> Result<Self, BarscopeError> {
        if !path.is_file() {
            return Err(BarscopeError::ManifestUnavailable {
                source_name: path.display().to_string(),
                reason: "catalog file not found".to_string(),
            });
        }
        Self::create(path)
    }

    /// Open or create a catalog file.
    pub fn create(path: &Path) -> Result<Self, BarscopeError> {
        let name = path.display().to_string();
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(DEFAULT_POOL_SIZE)
            .build(manager)
            .map_err(|e: r2d2::Error| unavailable(&name, e))?;
        Ok(Self { pool, name })
    }

    pub fn in_memory() -> Result<Self, BarscopeError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| unavailable(":memory:", e))?;
        Ok(Self {
            pool,
            name: ":memory:".to_string(),
        })
    }

    pub fn initialize_schema(&self) -> Result<(), BarscopeError> {
        let conn = self.pool.get().map_err(|e| unavailable(&self.name, e))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rollups (
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                path TEXT NOT NULL,
                row_count INTEGER,
                min_time TEXT,
                max_time TEXT,
                PRIMARY KEY (symbol, interval)
            );",
        )
        .map_err(|e: rusqlite::Error| unavailable(&self.name, e))?;
        Ok(())
    }

    pub fn insert_entries(&self, entries: &[RawManifestEntry]) -> Result<(), BarscopeError> {
        let mut conn = self.pool.get().map_err(|e| unavailable(&self.name, e))?;
        let tx = conn
            .transaction()
            .map_err(|e: rusqlite::Error| unavailable(&self.name, e))?;

        for entry in entries {
            tx.execute(
                "INSERT OR REPLACE INTO rollups (symbol, interval, path, row_count, min_time, max_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.symbol,
                    entry.interval,
                    entry.path,
                    entry.row_count.map(|c| c as i64),
                    entry.min_time,
                    entry.max_time
                ],
            )
            .map_err(|e: rusqlite::Error| unavailable(&self.name, e))?;
        }

        tx.commit()
            .map_err(|e: rusqlite::Error| unavailable(&self.name, e))?;
        Ok(())
    }
}

impl ManifestSource for SqliteCatalogAdapter {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn read_entries(&self) -> Result<Vec<RawManifestEntry>, BarscopeError> {
        let conn = self.pool.get().map_err(|e| unavailable(&self.name, e))?;
        let mut stmt = conn
            .prepare(
                "SELECT symbol, interval, path, row_count, min_time, max_time
                 FROM rollups
                 ORDER BY rowid",
            )
            .map_err(|e: rusqlite::Error| unavailable(&self.name, e))?;

        let rows = stmt
            .query_map([], |row| {
                let row_count: Option<i64> = row.get(3)?;
                Ok(RawManifestEntry {
                    symbol: row.get(0)?,
                    interval: row.get(1)?,
                    path: row.get(2)?,
                    // Negative counts are treated as unknown.
                    row_count: row_count.and_then(|c| u64::try_from(c).ok()),
                    min_time: row.get(4)?,
                    max_time: row.get(5)?,
                })
            })
            .map_err(|e: rusqlite::Error| unavailable(&self.name, e))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(|e: rusqlite::Error| unavailable(&self.name, e))?);
        }
        Ok(entries)
    }
}

fn unavailable(name: &str, reason: impl std::fmt::Display) -> BarscopeError {
    BarscopeError::ManifestUnavailable {
        source_name: name.to_string(),
        reason: reason.to_string(),
    }
}
