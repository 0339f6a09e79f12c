use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};

use crate::error::{RagError, Result};

/// File name of the SQLite database inside the persist directory.
pub const INDEX_FILE: &str = "index.sqlite";

pub fn index_path(persist_dir: &Path) -> PathBuf {
    persist_dir.join(INDEX_FILE)
}

/// Open the index database in `persist_dir`.
///
/// With `create` the directory and file are created when missing; without
/// it a missing file is an error.
pub async fn connect(persist_dir: &Path, create: bool) -> Result<SqlitePool> {
    let db_path = index_path(persist_dir);

    if create {
        std::fs::create_dir_all(persist_dir).map_err(RagError::store)?;
    } else if !db_path.is_file() {
        return Err(RagError::Store(format!(
            "{} is missing from {}",
            INDEX_FILE,
            persist_dir.display()
        )));
    }

    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(create)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Delete the index file and its WAL side files, if present.
pub fn remove_index_files(persist_dir: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let path = persist_dir.join(format!("{}{}", INDEX_FILE, suffix));
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(RagError::store(format!("{}: {}", path.display(), e))),
        }
    }
    Ok(())
}
