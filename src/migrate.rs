use sqlx::SqlitePool;

use crate::error::Result;

/// Bumped whenever the table layout changes; stored in `index_meta`.
pub const SCHEMA_VERSION: &str = "1";

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Key/value metadata describing the index as a whole
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per chunk, with its embedding as a little-endian f32 blob
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            position INTEGER PRIMARY KEY,
            id TEXT NOT NULL UNIQUE,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            source_offset INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
