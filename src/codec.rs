//! Versioned persistence of one named collection.
//!
//! A collection is stored as a single JSON array under `key`, with the schema
//! generation of that array under `version_key`. Loading upgrades older data
//! through the registered migrations; saving always stamps the current version.

use log::{debug, info};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::StorageError;
use crate::store::KeyValueStore;

/// Transform from the shape at version `v` to the shape at `v + 1`.
pub type Migration = fn(Value) -> Result<Value, StorageError>;

pub const CURRENT_VERSION: u32 = 1;

pub struct CollectionCodec<T> {
    store: Arc<dyn KeyValueStore>,
    key: String,
    version_key: String,
    seed: Box<dyn Fn() -> Vec<T> + Send + Sync>,
    current_version: u32,
    migrations: BTreeMap<u32, Migration>,
}

impl<T> CollectionCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        key: &str,
        seed: impl Fn() -> Vec<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            key: key.to_string(),
            version_key: format!("{key}-version"),
            seed: Box::new(seed),
            current_version: CURRENT_VERSION,
            migrations: BTreeMap::new(),
        }
    }

    /// Sets the schema generation this codec writes and the transforms that reach it.
    /// Versions without a transform are pass-through steps.
    pub fn with_migrations(
        mut self,
        current_version: u32,
        migrations: impl IntoIterator<Item = (u32, Migration)>,
    ) -> Self {
        self.current_version = current_version;
        self.migrations = migrations.into_iter().collect();
        self
    }

    pub fn load(&self) -> Result<Vec<T>, StorageError> {
        if !self.store.is_attached() {
            return Ok(Vec::new());
        }

        let Some(raw) = self.store.get(&self.key)? else {
            info!("seeding empty collection '{}'", self.key);
            let seed = (self.seed)();
            self.save(&seed)?;
            return Ok(seed);
        };

        let stored_version = self.stored_version()?;
        if stored_version > self.current_version {
            return Err(StorageError::read(format!(
                "'{}' was written by schema version {}, newer than supported version {}",
                self.key, stored_version, self.current_version
            )));
        }

        let value: Value = serde_json::from_str(&raw).map_err(StorageError::read)?;
        if stored_version == self.current_version {
            return serde_json::from_value(value).map_err(StorageError::read);
        }

        // The migrated value is persisted as is, so fields the record types don't
        // model survive the upgrade.
        let upgraded = self.migrate(value, stored_version)?;
        let collection: Vec<T> =
            serde_json::from_value(upgraded.clone()).map_err(StorageError::read)?;
        let json = serde_json::to_string(&upgraded).map_err(StorageError::write)?;
        self.write(&json, collection.len())?;
        info!(
            "upgraded '{}' from schema version {} to {}",
            self.key, stored_version, self.current_version
        );
        Ok(collection)
    }

    /// Writes the collection, then the version marker. If the process dies between
    /// the two writes the marker is stale but the data is intact, and the next
    /// load re-runs the migrations from the old marker.
    pub fn save(&self, collection: &[T]) -> Result<(), StorageError> {
        if !self.store.is_attached() {
            return Ok(());
        }
        let json = serde_json::to_string(collection).map_err(StorageError::write)?;
        self.write(&json, collection.len())
    }

    fn write(&self, json: &str, count: usize) -> Result<(), StorageError> {
        self.store.set(&self.key, json)?;
        self.store
            .set(&self.version_key, &self.current_version.to_string())?;
        debug!("saved {} record(s) to '{}'", count, self.key);
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        if !self.store.is_attached() {
            return Ok(());
        }
        self.store.remove(&self.key)?;
        self.store.remove(&self.version_key)?;
        info!("cleared collection '{}'", self.key);
        Ok(())
    }

    /// Version of the stored data; 0 when no marker exists (data predating versioning).
    fn stored_version(&self) -> Result<u32, StorageError> {
        match self.store.get(&self.version_key)? {
            None => Ok(0),
            Some(raw) => raw.trim().parse::<u32>().map_err(|e| {
                StorageError::read(format!("invalid version marker '{raw}': {e}"))
            }),
        }
    }

    fn migrate(&self, mut value: Value, from: u32) -> Result<Value, StorageError> {
        for version in from..self.current_version {
            if let Some(step) = self.migrations.get(&version) {
                debug!("migrating '{}' v{} -> v{}", self.key, version, version + 1);
                value = step(value)?;
            }
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DetachedStore, MemoryStore};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        text: String,
    }

    fn seed() -> Vec<Note> {
        vec![Note {
            id: "seed-1".to_string(),
            text: "hello".to_string(),
        }]
    }

    fn codec(store: &Arc<MemoryStore>) -> CollectionCodec<Note> {
        CollectionCodec::new(store.clone(), "notes", seed)
    }

    #[test]
    fn test_seeds_once_and_stamps_version() {
        let store = Arc::new(MemoryStore::new());
        let codec = codec(&store);

        let first = codec.load().unwrap();
        assert_eq!(first, seed());
        assert_eq!(store.get("notes-version").unwrap().as_deref(), Some("1"));

        // Mutate stored data; a second load must return it rather than reseed.
        codec.save(&[]).unwrap();
        assert!(codec.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_always_writes_current_version() {
        let store = Arc::new(MemoryStore::new());
        store.set("notes-version", "0").unwrap();
        codec(&store).save(&seed()).unwrap();
        assert_eq!(store.get("notes-version").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let codec = codec(&store);
        let notes = vec![
            Note {
                id: "a".to_string(),
                text: "one".to_string(),
            },
            Note {
                id: "b".to_string(),
                text: "two".to_string(),
            },
        ];
        codec.save(&notes).unwrap();
        assert_eq!(codec.load().unwrap(), notes);
    }

    #[test]
    fn test_legacy_data_without_marker_is_preserved_and_stamped() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("notes", r#"[{"id":"legacy","text":"kept"}]"#)
            .unwrap();

        let notes = codec(&store).load().unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].text, "kept");
        assert_eq!(store.get("notes-version").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_upgrade_keeps_fields_the_record_type_lacks() {
        let store = Arc::new(MemoryStore::new());
        let legacy = r#"[{"id":"legacy","text":"kept","pinned":true,"tags":["a"]}]"#;
        store.set("notes", legacy).unwrap();

        codec(&store).load().unwrap();

        let stored: Value = serde_json::from_str(&store.get("notes").unwrap().unwrap()).unwrap();
        assert_eq!(stored, serde_json::from_str::<Value>(legacy).unwrap());
        assert_eq!(store.get("notes-version").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_migrations_run_in_order_and_skip_gaps() {
        fn add_text(mut value: Value) -> Result<Value, StorageError> {
            for record in value.as_array_mut().into_iter().flatten() {
                record["text"] = json!("");
            }
            Ok(value)
        }
        fn uppercase_text(mut value: Value) -> Result<Value, StorageError> {
            for record in value.as_array_mut().into_iter().flatten() {
                let text = record["text"].as_str().unwrap_or_default().to_uppercase();
                record["text"] = json!(format!("{text}migrated"));
            }
            Ok(value)
        }

        let store = Arc::new(MemoryStore::new());
        store.set("notes", r#"[{"id":"old"}]"#).unwrap();
        store.set("notes-version", "1").unwrap();

        // 1 -> 2 adds the field, 2 -> 3 is a pass-through, 3 -> 4 rewrites it.
        let codec = CollectionCodec::new(store.clone(), "notes", seed)
            .with_migrations(4, [(1, add_text as Migration), (3, uppercase_text as Migration)]);

        let notes = codec.load().unwrap();
        assert_eq!(
            notes,
            vec![Note {
                id: "old".to_string(),
                text: "migrated".to_string(),
            }]
        );
        assert_eq!(store.get("notes-version").unwrap().as_deref(), Some("4"));
        // Second load sees current data and does not migrate again.
        assert_eq!(codec.load().unwrap(), notes);
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        store.set("notes", "[]").unwrap();
        store.set("notes-version", "7").unwrap();
        let err = codec(&store).load().unwrap_err();
        assert!(err.message().contains("newer than supported"));
    }

    #[test]
    fn test_corrupt_data_is_a_storage_error() {
        let store = Arc::new(MemoryStore::new());
        store.set("notes", "{not json").unwrap();
        store.set("notes-version", "1").unwrap();
        assert!(codec(&store).load().is_err());

        store.set("notes", "[]").unwrap();
        store.set("notes-version", "one").unwrap();
        let err = codec(&store).load().unwrap_err();
        assert!(err.message().contains("invalid version marker"));
    }

    #[test]
    fn test_read_failure_is_a_storage_error() {
        let store = Arc::new(MemoryStore::new());
        store.fail_reads(true);
        assert!(codec(&store).load().is_err());
    }

    #[test]
    fn test_failed_data_write_leaves_version_untouched() {
        let store = Arc::new(MemoryStore::new());
        store.fail_writes(true);
        assert!(codec(&store).save(&seed()).is_err());
        store.fail_writes(false);
        assert_eq!(store.get("notes").unwrap(), None);
        assert_eq!(store.get("notes-version").unwrap(), None);
    }

    #[test]
    fn test_clear_then_load_reseeds() {
        let store = Arc::new(MemoryStore::new());
        let codec = codec(&store);
        codec.save(&[]).unwrap();

        codec.clear().unwrap();
        assert_eq!(store.get("notes").unwrap(), None);
        assert_eq!(store.get("notes-version").unwrap(), None);

        assert_eq!(codec.load().unwrap(), seed());
        assert_eq!(store.get("notes-version").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_detached_store_reads_empty_and_ignores_writes() {
        let codec: CollectionCodec<Note> =
            CollectionCodec::new(Arc::new(DetachedStore), "notes", seed);
        assert!(codec.load().unwrap().is_empty());
        codec.save(&seed()).unwrap();
        codec.clear().unwrap();
        assert!(codec.load().unwrap().is_empty());
    }
}
