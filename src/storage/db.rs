use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::time::Duration;

use crate::storage::migrations;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Create a new database connection pool
///
/// Every pooled connection gets WAL journaling and a busy timeout so the
/// webhook and web handlers can write concurrently. Schema migrations are
/// applied once on the first connection.
///
/// # Example
///
/// ```no_run
/// use televerify::storage::db;
///
/// let pool = db::create_pool("televerify.sqlite")?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn create_pool(database_path: &str) -> anyhow::Result<DbPool> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
    });
    let pool = Pool::builder()
        .max_size(10) // Maximum 10 connections in the pool
        .connection_timeout(Duration::from_secs(5))
        .build(manager)?;

    let mut conn = pool.get()?;
    migrations::run_migrations(&mut conn)?;

    Ok(pool)
}
