use std::path::PathBuf;
use std::sync::Arc;

use crate::error::StorageError;
use crate::store::{DetachedStore, KeyValueStore, MemoryStore, SqliteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StoreKind {
    /// SQLite file on disk
    Sqlite,
    /// In-process only, gone when the command exits
    Memory,
    /// No store at all: reads are empty, writes are dropped
    None,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreKind,
    pub db_path: PathBuf,
}

impl Config {
    pub fn new(store: StoreKind, db_path: Option<PathBuf>) -> Self {
        Self {
            store,
            db_path: db_path.unwrap_or_else(default_db_path),
        }
    }

    pub fn open_store(&self) -> Result<Arc<dyn KeyValueStore>, StorageError> {
        Ok(match self.store {
            StoreKind::Sqlite => Arc::new(SqliteStore::open(&self.db_path)?),
            StoreKind::Memory => Arc::new(MemoryStore::new()),
            StoreKind::None => Arc::new(DetachedStore),
        })
    }
}

pub fn default_db_path() -> PathBuf {
    // Use XDG data directory or fallback
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobes") {
        proj_dirs.data_dir().join("jobes.db")
    } else {
        PathBuf::from("jobes.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let config = Config::new(StoreKind::Sqlite, Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_default_path_ends_with_db_file() {
        assert!(default_db_path().ends_with("jobes.db"));
    }

    #[test]
    fn test_open_each_store_kind() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("jobes.db");

        let sqlite = Config::new(StoreKind::Sqlite, Some(db.clone())).open_store().unwrap();
        assert!(sqlite.is_attached());
        assert!(db.exists());

        let memory = Config::new(StoreKind::Memory, None).open_store().unwrap();
        assert!(memory.is_attached());

        let detached = Config::new(StoreKind::None, None).open_store().unwrap();
        assert!(!detached.is_attached());
    }
}
