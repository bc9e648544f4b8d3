//! SQLite connection pools.
//!
//! The catalog opens two pools on the same WAL-mode database file:
//!
//! - **reader**: several connections for queries and graph snapshots.
//! - **writer**: exactly one connection. Every mutation runs as one
//!   transaction on it, so writes are serialized and readers only ever
//!   see committed state.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::Config;
use crate::error::StoreError;

const READER_CONNECTIONS: u32 = 5;

#[derive(Clone, Debug)]
pub struct Pools {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl Pools {
    pub async fn close(&self) {
        self.writer.close().await;
        self.reader.close().await;
    }
}

pub async fn connect(config: &Config) -> Result<Pools, StoreError> {
    let db_path = &config.db.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Corruption(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(10));

    // Open the writer first so the WAL switch and file creation happen once.
    let writer = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options.clone())
        .await
        .map_err(unreadable)?;

    let reader = SqlitePoolOptions::new()
        .max_connections(READER_CONNECTIONS)
        .connect_with(options)
        .await
        .map_err(unreadable)?;

    Ok(Pools { reader, writer })
}

/// A file that SQLite refuses to open is an unreadable store.
fn unreadable(e: sqlx::Error) -> StoreError {
    StoreError::Corruption(e.to_string())
}
