pub mod models;
pub mod pagination;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use std::path::Path;

use crate::error::AppResult;
use crate::state::DbPool;

pub const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_accounts",
        include_str!("../../migrations/001_accounts.sql"),
    ),
    (
        "002_content",
        include_str!("../../migrations/002_content.sql"),
    ),
];

/// Attempts made by [`transaction`] before a busy or constraint failure is
/// handed back to the caller.
const MAX_TX_ATTEMPTS: u32 = 5;

fn configure(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )
}

pub fn create_pool(db_path: &Path) -> anyhow::Result<DbPool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(db_path).with_init(configure);
    let pool = Pool::builder().max_size(8).build(manager)?;

    // journal_mode is persistent, so setting it once is enough
    let conn = pool.get()?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        ",
    )?;

    Ok(pool)
}

/// A single-connection pool over a private in-memory database.
pub fn create_memory_pool() -> anyhow::Result<DbPool> {
    let manager = SqliteConnectionManager::memory().with_init(configure);
    let pool = Pool::builder().max_size(1).build(manager)?;
    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;

    // Create migrations tracking table
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_version WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        if !already_applied {
            tracing::info!("Applying migration: {}", name);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_version (name) VALUES (?1)",
                params![name],
            )?;
        }
    }

    tracing::info!("Database migrations complete");
    Ok(())
}

/// Run `f` inside an IMMEDIATE transaction and commit if it succeeds.
///
/// The write lock is taken up front, so two writers touching the same rows
/// serialize instead of racing on stale reads. Busy and constraint failures
/// roll back and re-run `f` from scratch.
pub fn transaction<T, F>(pool: &DbPool, mut f: F) -> AppResult<T>
where
    F: FnMut(&Transaction<'_>) -> AppResult<T>,
{
    let mut conn = pool.get()?;
    let mut attempt = 1;
    loop {
        match run_once(&mut conn, &mut f) {
            Err(err) if attempt < MAX_TX_ATTEMPTS && err.is_retryable() => {
                tracing::warn!(attempt, "Retrying transaction: {}", err);
                attempt += 1;
            }
            result => return result,
        }
    }
}

fn run_once<T, F>(conn: &mut Connection, f: &mut F) -> AppResult<T>
where
    F: FnMut(&Transaction<'_>) -> AppResult<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

/// Unique id for a new row, time-ordered like the rest of the schema.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn test_pool() -> DbPool {
        let pool = create_memory_pool().unwrap();
        run_migrations(&pool).unwrap();
        pool
    }

    #[test]
    fn create_pool_creates_db_file() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("sub/dir/test.db");
        let pool = create_pool(&db_path).unwrap();
        assert!(db_path.exists());
        let conn = pool.get().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn every_connection_enforces_foreign_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = create_pool(&tmp.path().join("fk.db")).unwrap();
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        for conn in [&a, &b] {
            let on: bool = conn
                .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
                .unwrap();
            assert!(on);
        }
    }

    #[test]
    fn migrations_run_successfully() {
        let pool = test_pool();
        let conn = pool.get().unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };
        for table in ["roles", "users", "follows", "sessions", "posts", "comments", "votes"] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let pool = test_pool();
        run_migrations(&pool).unwrap();

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn foreign_keys_enforced() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let result = conn.execute(
            "INSERT INTO posts (id, title, body, body_html, author_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            params!["post-1", "t", "b", "<p>b</p>", "nonexistent-user"],
        );
        assert!(result.is_err());
    }

    #[test]
    fn vote_rows_need_exactly_one_target() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO users (id, email, username, password_hash) VALUES ('u', 'u@x.io', 'u', '!')",
            [],
        )
        .unwrap();
        let neither = conn.execute(
            "INSERT INTO votes (id, upvote, user_id) VALUES ('v1', 1, 'u')",
            [],
        );
        assert!(neither.is_err());
    }

    #[test]
    fn transaction_commits_on_success() {
        let pool = test_pool();
        transaction(&pool, |tx| {
            tx.execute("INSERT INTO roles (name) VALUES ('Tester')", [])?;
            Ok(())
        })
        .unwrap();

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM roles WHERE name = 'Tester'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let pool = test_pool();
        let result: AppResult<()> = transaction(&pool, |tx| {
            tx.execute("INSERT INTO roles (name) VALUES ('Ghost')", [])?;
            Err(AppError::BadRequest("nope".into()))
        });
        assert!(matches!(result, Err(AppError::BadRequest(_))));

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM roles WHERE name = 'Ghost'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn transaction_gives_up_after_repeated_conflicts() {
        let pool = test_pool();
        let mut attempts = 0;
        let result: AppResult<()> = transaction(&pool, |tx| {
            attempts += 1;
            tx.execute("INSERT INTO roles (name) VALUES ('Dup')", [])?;
            tx.execute("INSERT INTO roles (name) VALUES ('Dup')", [])?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(attempts, MAX_TX_ATTEMPTS);
    }
}
