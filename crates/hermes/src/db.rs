//! SQLite connection management.
//!
//! Enables WAL mode for concurrent read/write, matching §5's connection
//! pool tuning guidance (pool sizing lives in [`PoolConfig`] rather than
//! a hardcoded constant since Central's registry pool and an Edge's
//! per-instance document pool have different load profiles).

use std::str::FromStr;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::config::DbConfig;

/// Pool sizing knobs; defaults follow §5's suggested values.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_connections: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig { max_connections: 25 }
    }
}

/// Open (creating if missing) the configured SQLite database with WAL
/// journaling and the given pool size.
pub async fn connect(config: &DbConfig, pool_config: PoolConfig) -> Result<SqlitePool> {
    if let Some(parent) = config.path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(pool_config.max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_creates_db_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("hermes.db");
        let config = DbConfig { path: db_path.clone() };
        let pool = connect(&config, PoolConfig::default()).await.unwrap();
        assert!(db_path.exists());
        pool.close().await;
    }
}
