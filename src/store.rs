use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::StorageError;

/// A string key-value store, the only thing the codec persists through.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// `false` when there is no backing store at all. Reads then see empty
    /// collections and writes are dropped.
    fn is_attached(&self) -> bool {
        true
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// --- SQLite ---

pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StorageError::write)?;
            }
        }
        let conn = Connection::open(path).map_err(StorageError::read)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        };
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init(&self) -> Result<(), StorageError> {
        lock(&self.conn)
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                );
                "#,
            )
            .map_err(StorageError::write)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        lock(&self.conn)
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(StorageError::read)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        lock(&self.conn)
            .execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![key, value],
            )
            .map_err(StorageError::write)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.conn)
            .execute("DELETE FROM kv WHERE key = ?1", [key])
            .map_err(StorageError::clear)?;
        Ok(())
    }
}

// --- In-memory ---

type WriteHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Process-local store. Reads or writes can be switched to fail, which is how
/// corruption, quota exhaustion and an unavailable store are simulated.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    faults: Mutex<Faults>,
    on_set: Mutex<Option<WriteHook>>,
}

#[derive(Default)]
struct Faults {
    reads: bool,
    writes: bool,
    write_key: Option<String>,
}

impl Faults {
    fn rejects_write(&self, key: &str) -> bool {
        self.writes || self.write_key.as_deref() == Some(key)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        lock(&self.faults).reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        lock(&self.faults).writes = fail;
    }

    /// Fails writes to one key only; `None` lifts it.
    pub fn fail_writes_to(&self, key: Option<&str>) {
        lock(&self.faults).write_key = key.map(str::to_string);
    }

    /// Calls `hook` with the key of every write before the write is applied.
    pub fn on_set(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *lock(&self.on_set) = Some(Arc::new(hook));
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if lock(&self.faults).reads {
            return Err(StorageError::read("store unavailable"));
        }
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let hook = lock(&self.on_set).clone();
        if let Some(hook) = hook {
            hook(key);
        }
        if lock(&self.faults).rejects_write(key) {
            return Err(StorageError::write("quota exceeded"));
        }
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        if lock(&self.faults).rejects_write(key) {
            return Err(StorageError::clear("store unavailable"));
        }
        lock(&self.entries).remove(key);
        Ok(())
    }
}

// --- Detached ---

/// Stand-in for contexts with no store at all.
pub struct DetachedStore;

impl KeyValueStore for DetachedStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }

    fn is_attached(&self) -> bool {
        false
    }
}
