//! SQLite connection handling.
use std::str::FromStr;

use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{migrate, Sqlite};
use tracing::{debug, info};

use propdesk_core::{PropdeskError, Result};

/// Re-export of SQLite connection pool type.
pub type Pool = SqlitePool;

/// Create SQLite database if it doesn't already exist.
pub async fn create_database(url: &str) -> Result<()> {
    if !Sqlite::database_exists(url).await.map_err(db_err)? {
        Sqlite::create_database(url).await.map_err(db_err)?;
    }
    Ok(())
}

/// SQLite-backed store for every Propdesk resource.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pub(crate) pool: Pool,
}

impl SqliteStore {
    /// Create a new `SqliteStore` using the provided db `Pool`.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Opens (creating if missing) the database at `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(db_err)?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = url.contains(":memory:");
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_connections })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        info!(url = %url, "connected to database");
        Ok(Self { pool })
    }

    /// A fresh, migrated, private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let store = Self::connect("sqlite::memory:", 1).await?;
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run any pending database migrations from inside the application.
    pub async fn run_migrations(&self) -> Result<()> {
        migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PropdeskError::Database(e.to_string()))?;
        debug!("database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Maps driver errors onto the domain error, surfacing constraint
/// violations as conflicts.
pub(crate) fn db_err(err: sqlx::Error) -> PropdeskError {
    match &err {
        sqlx::Error::RowNotFound => PropdeskError::NotFound("row not found".to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            PropdeskError::Conflict(format!("already exists: {}", db.message()))
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            PropdeskError::Validation(format!("referenced row does not exist: {}", db.message()))
        }
        _ => PropdeskError::Database(err.to_string()),
    }
}

/// Parses a text column into one of the domain's text enums.
pub(crate) fn parse_col<T>(value: &str) -> Result<T>
where
    T: FromStr<Err = PropdeskError>,
{
    value
        .parse()
        .map_err(|e: PropdeskError| PropdeskError::Database(format!("corrupt column value: {}", e)))
}

/// `%q%` for a LIKE match with `\` as escape character.
pub(crate) fn like_pattern(q: &str) -> String {
    let escaped = q
        .trim()
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(" Main "), "%main%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[tokio::test]
    async fn in_memory_store_is_migrated() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.ping().await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM organizations")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn file_database_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("propdesk.db");
        let url = format!("sqlite://{}", path.display());
        let store = SqliteStore::connect(&url, 2).await.unwrap();
        store.run_migrations().await.unwrap();
        assert!(path.exists());
        store.close().await;
    }
}
