//! Database initialization
//!
//! Creates the SQLite database file if missing and ensures the schema
//! exists. Filters and detections are stored as JSON columns; timestamps as
//! RFC 3339 text.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::Result;

/// Open (creating if necessary) the Vigil database and ensure the schema
pub async fn init_db(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    create_tables(&pool).await?;
    info!("Database initialized at {}", path.display());
    Ok(pool)
}

async fn create_tables(pool: &SqlitePool) -> Result<()> {
    // One active profile per user: user_id is the primary key and saving
    // replaces the prior row
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_profiles (
            user_id TEXT PRIMARY KEY,
            profile_id TEXT NOT NULL,
            profile_name TEXT NOT NULL,
            is_default INTEGER NOT NULL DEFAULT 1,
            filters TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS whitelist_entries (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            label TEXT NOT NULL,
            value_hash TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_whitelist_user ON whitelist_entries (user_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS detection_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            detection TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_detection_log_user ON detection_log (user_id, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
