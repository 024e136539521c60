//! Database module for SQLite persistence.
//!
//! SQLite is the source of truth for users, communities, posts, comments and votes.

mod repository;
mod votes;

pub use repository::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::config::StoreMode;
use crate::errors::AppError;

/// Handle to the persistent store, scoped according to [`StoreMode`].
#[derive(Clone)]
pub enum StoreHandle {
    /// One pool for the whole process.
    Shared(Repository),
    /// Connection options used to open a fresh pool on every request.
    PerRequest(SqliteConnectOptions),
}

impl StoreHandle {
    /// Open the store and run migrations once.
    pub async fn open(db_path: &Path, mode: StoreMode) -> Result<Self, sqlx::Error> {
        let options = connect_options(db_path).await?;
        let pool = init_pool(options.clone(), 5).await?;

        match mode {
            StoreMode::Shared => Ok(StoreHandle::Shared(Repository::new(pool))),
            StoreMode::PerRequest => {
                pool.close().await;
                Ok(StoreHandle::PerRequest(options))
            }
        }
    }

    /// Get a repository for the current request.
    pub async fn acquire(&self) -> Result<Repository, AppError> {
        match self {
            StoreHandle::Shared(repo) => Ok(repo.clone()),
            StoreHandle::PerRequest(options) => {
                let pool = SqlitePoolOptions::new()
                    .max_connections(1)
                    .connect_with(options.clone())
                    .await?;
                Ok(Repository::new(pool))
            }
        }
    }
}

async fn connect_options(db_path: &Path) -> Result<SqliteConnectOptions, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    Ok(SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30)))
}

/// Initialize the database connection pool and run migrations.
async fn init_pool(
    options: SqliteConnectOptions,
    max_connections: u32,
) -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    // Run embedded migrations
    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT UNIQUE,
            email TEXT UNIQUE,
            image TEXT,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            expires_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subreddits (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            creator_id TEXT REFERENCES users(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            subreddit_id TEXT NOT NULL REFERENCES subreddits(id) ON DELETE CASCADE,
            PRIMARY KEY (user_id, subreddit_id)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS posts (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            subreddit_id TEXT NOT NULL REFERENCES subreddits(id) ON DELETE CASCADE,
            author_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS votes (
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            post_id TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            type TEXT NOT NULL CHECK (type IN ('UP', 'DOWN')),
            PRIMARY KEY (user_id, post_id)
        );

        CREATE TABLE IF NOT EXISTS comments (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            post_id TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            author_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            reply_to_id TEXT REFERENCES comments(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
        CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at);
        CREATE INDEX IF NOT EXISTS idx_posts_subreddit ON posts(subreddit_id);
        CREATE INDEX IF NOT EXISTS idx_votes_post ON votes(post_id);
        CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id);
        CREATE INDEX IF NOT EXISTS idx_comments_reply_to ON comments(reply_to_id);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
