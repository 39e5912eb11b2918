use chrono::Utc;
use sqlx::SqlitePool;

use super::ExamDbError;

struct Migration {
    version: i64,
    name: &'static str,
    statements: &'static [&'static str],
}

/// Applied in order; each version runs in its own transaction.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "progress and submissions",
        statements: &[
            r"
            CREATE TABLE IF NOT EXISTS progress_snapshots (
                student_id TEXT NOT NULL,
                test_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                question_count INTEGER NOT NULL CHECK (question_count > 0),
                total_duration_seconds INTEGER NOT NULL CHECK (total_duration_seconds > 0),
                remaining_seconds INTEGER NOT NULL CHECK (remaining_seconds >= 0),
                answers TEXT NOT NULL,
                current_question INTEGER NOT NULL CHECK (current_question >= 0),
                visited TEXT NOT NULL,
                marked_for_review TEXT NOT NULL,
                warning_count INTEGER NOT NULL CHECK (warning_count >= 0),
                saved_at TEXT NOT NULL,
                PRIMARY KEY (student_id, test_id)
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS submissions (
                id INTEGER PRIMARY KEY,
                session_id TEXT NOT NULL UNIQUE,
                student_id TEXT NOT NULL,
                test_id TEXT NOT NULL,
                reason TEXT NOT NULL,
                answers TEXT NOT NULL,
                warning_count INTEGER NOT NULL CHECK (warning_count >= 0),
                time_remaining_seconds INTEGER NOT NULL CHECK (time_remaining_seconds >= 0),
                submitted_at TEXT NOT NULL
            )
            ",
        ],
    },
    Migration {
        version: 2,
        name: "submission history index",
        statements: &[r"
            CREATE INDEX IF NOT EXISTS idx_submissions_student_test
                ON submissions (student_id, test_id, submitted_at)
            "],
    },
];

pub(crate) const LATEST_VERSION: i64 = 2;

pub(crate) async fn current_version(pool: &SqlitePool) -> Result<Option<i64>, sqlx::Error> {
    let exists: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
    )
    .fetch_optional(pool)
    .await?;
    if exists.is_none() {
        return Ok(None);
    }
    sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await
}

/// Applies every migration newer than the recorded schema version.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), ExamDbError> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .map_err(ExamDbError::Open)?;

    let applied = current_version(pool)
        .await
        .map_err(ExamDbError::Open)?
        .unwrap_or(0);

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        apply(pool, migration)
            .await
            .map_err(|source| ExamDbError::Migration {
                version: migration.version,
                name: migration.name,
                source,
            })?;
    }
    Ok(())
}

async fn apply(pool: &SqlitePool, migration: &Migration) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for statement in migration.statements.iter().copied() {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)")
        .bind(migration.version)
        .bind(migration.name)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
    tx.commit().await
}
