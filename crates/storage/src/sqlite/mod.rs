use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use thiserror::Error;

use crate::repository::{ProgressRepository, Storage, StorageError, SubmissionRepository};

mod mapping;
mod migrate;
mod progress_repo;
mod submission_repo;

/// Longest a writer waits on a locked database before reporting a connection error.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Saved progress and final submissions for one exam host.
#[derive(Clone)]
pub struct SqliteExamStore {
    pool: SqlitePool,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExamDbError {
    #[error("invalid exam database url `{url}`")]
    InvalidUrl {
        url: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("cannot open the exam database")]
    Open(#[source] sqlx::Error),
    #[error("exam schema migration {version} ({name}) failed")]
    Migration {
        version: i64,
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

impl SqliteExamStore {
    /// Open (creating if needed) the exam database at `database_url`.
    ///
    /// In-memory databases hold one connection for the pool's lifetime; their
    /// data lives only as long as it does.
    ///
    /// # Errors
    ///
    /// Returns `ExamDbError::InvalidUrl` for an unparseable URL and
    /// `ExamDbError::Open` if the file cannot be opened.
    pub async fn connect(database_url: &str) -> Result<Self, ExamDbError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|source| ExamDbError::InvalidUrl {
                url: database_url.to_owned(),
                source,
            })?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = if is_in_memory(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
        } else {
            // A submission acknowledged to the student must survive a crash.
            let options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Full);
            SqlitePoolOptions::new()
                .max_connections(2)
                .acquire_timeout(BUSY_TIMEOUT)
                .connect_with(options)
                .await
        }
        .map_err(ExamDbError::Open)?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Bring the schema up to the latest version.
    ///
    /// # Errors
    ///
    /// Returns `ExamDbError::Migration` naming the first version that failed;
    /// earlier versions stay applied.
    pub async fn migrate(&self) -> Result<(), ExamDbError> {
        migrate::run_migrations(&self.pool).await
    }

    /// Highest applied schema version, `None` before `migrate`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the database cannot be read.
    pub async fn schema_version(&self) -> Result<Option<i64>, StorageError> {
        migrate::current_version(&self.pool)
            .await
            .map_err(mapping::conn)
    }
}

impl Storage {
    /// Build a `Storage` backed by a migrated `SQLite` exam database.
    ///
    /// # Errors
    ///
    /// Returns `ExamDbError` if the database cannot be opened or migrated.
    pub async fn sqlite(database_url: &str) -> Result<Self, ExamDbError> {
        let store = SqliteExamStore::connect(database_url).await?;
        store.migrate().await?;
        let progress: Arc<dyn ProgressRepository> = Arc::new(store.clone());
        let submissions: Arc<dyn SubmissionRepository> = Arc::new(store);
        Ok(Self {
            progress,
            submissions,
        })
    }
}
