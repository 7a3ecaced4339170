//! Keyed query cache with optimistic mutations.
//!
//! Entries are addressed by hierarchical keys (`companies/list`,
//! `companies/detail/<id>`); cancellation and invalidation take a key prefix.
//! A mutation cancels in-flight reads, snapshots the entries it touches,
//! patches them, runs the real operation, restores the snapshot if that
//! fails, and finally marks the touched entries stale so the next read goes
//! back to storage.

use log::{debug, warn};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::error::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

pub mod keys {
    use super::QueryKey;

    pub fn companies() -> QueryKey {
        QueryKey::new(["companies"])
    }

    pub fn company_list() -> QueryKey {
        QueryKey::new(["companies", "list"])
    }

    pub fn company_detail(id: &str) -> QueryKey {
        QueryKey::new(["companies", "detail", id])
    }

    pub fn applications() -> QueryKey {
        QueryKey::new(["applications"])
    }

    pub fn application_list() -> QueryKey {
        QueryKey::new(["applications", "list"])
    }

    pub fn application_detail(id: &str) -> QueryKey {
        QueryKey::new(["applications", "detail", id])
    }
}

/// The one error kind the view layer sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct QueryError {
    message: String,
}

impl QueryError {
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ServiceError> for QueryError {
    fn from(err: ServiceError) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    Pending,
    Success,
    Error(QueryError),
}

type Data = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct Entry {
    data: Option<Data>,
    error: Option<QueryError>,
    stale: bool,
    // Bumped on cancel; a fetch only writes back if it still sees the epoch it started with.
    epoch: u64,
}

/// Cached contents of some keys, restorable verbatim.
pub struct Snapshot(Vec<(QueryKey, Option<Data>)>);

/// Keys a mutation cancels before patching and invalidates once settled.
pub struct MutationKeys<'a> {
    pub cancel: &'a [QueryKey],
    pub invalidate: &'a [QueryKey],
}

#[derive(Default)]
pub struct QueryCache {
    entries: Mutex<HashMap<QueryKey, Entry>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_query_data<T>(&self, key: &QueryKey) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.lock()
            .get(key)
            .and_then(|entry| entry.data.as_ref())
            .and_then(|data| data.downcast_ref::<T>())
            .cloned()
    }

    pub fn set_query_data<T>(&self, key: &QueryKey, value: T)
    where
        T: Send + Sync + 'static,
    {
        let mut entries = self.lock();
        let entry = entries.entry(key.clone()).or_default();
        entry.data = Some(Arc::new(value));
        entry.error = None;
        entry.stale = false;
    }

    /// Rewrites cached data in place. Absent (or differently typed) data is left alone.
    pub fn update_query_data<T>(&self, key: &QueryKey, f: impl FnOnce(T) -> T) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        match self.get_query_data::<T>(key) {
            Some(current) => {
                self.set_query_data(key, f(current));
                true
            }
            None => false,
        }
    }

    pub fn remove_query(&self, key: &QueryKey) {
        if let Some(entry) = self.lock().get_mut(key) {
            entry.data = None;
            entry.error = None;
        }
    }

    pub fn status(&self, key: &QueryKey) -> QueryStatus {
        match self.lock().get(key) {
            Some(Entry {
                error: Some(err), ..
            }) => QueryStatus::Error(err.clone()),
            Some(Entry { data: Some(_), .. }) => QueryStatus::Success,
            _ => QueryStatus::Pending,
        }
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.lock().get(key).is_none_or(|entry| entry.stale || entry.data.is_none())
    }

    /// Keeps in-flight fetches under `prefix` from writing their results back.
    pub fn cancel_queries(&self, prefix: &QueryKey) {
        // Every fetch registers its entry before awaiting, so in-flight keys exist here.
        for (key, entry) in self.lock().iter_mut() {
            if key.starts_with(prefix) {
                entry.epoch += 1;
            }
        }
    }

    pub fn invalidate_queries(&self, prefix: &QueryKey) {
        let mut count = 0;
        for (key, entry) in self.lock().iter_mut() {
            if key.starts_with(prefix) {
                entry.stale = true;
                count += 1;
            }
        }
        debug!("invalidated {count} query(ies) under {prefix}");
    }

    pub fn snapshot(&self, keys: &[QueryKey]) -> Snapshot {
        let entries = self.lock();
        Snapshot(
            keys.iter()
                .map(|key| {
                    let data = entries.get(key).and_then(|entry| entry.data.clone());
                    (key.clone(), data)
                })
                .collect(),
        )
    }

    /// Writes a snapshot back exactly: keys that were empty become empty again.
    pub fn restore(&self, snapshot: Snapshot) {
        let mut entries = self.lock();
        for (key, data) in snapshot.0 {
            let entry = entries.entry(key).or_default();
            entry.data = data;
            entry.error = None;
        }
    }

    /// Returns fresh cached data, or runs `fetch` and caches what it returns.
    ///
    /// If the key is cancelled while `fetch` runs, the result is handed to the
    /// caller but not written to the cache.
    pub async fn fetch_query<T, F, Fut>(&self, key: QueryKey, fetch: F) -> Result<T, QueryError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let epoch = {
            let mut entries = self.lock();
            let entry = entries.entry(key.clone()).or_default();
            if !entry.stale {
                if let Some(data) = entry.data.as_ref().and_then(|d| d.downcast_ref::<T>()) {
                    return Ok(data.clone());
                }
            }
            entry.epoch
        };

        let result = fetch().await.map_err(QueryError::from);

        let mut entries = self.lock();
        let entry = entries.entry(key.clone()).or_default();
        if entry.epoch != epoch {
            debug!("discarding result of cancelled fetch for {key}");
            return result;
        }
        match &result {
            Ok(value) => {
                entry.data = Some(Arc::new(value.clone()));
                entry.error = None;
                entry.stale = false;
            }
            Err(err) => entry.error = Some(err.clone()),
        }
        result
    }

    /// Runs `commit` with an optimistic patch in front of it.
    ///
    /// Order: cancel, `snapshot`, `patch`, `commit`; on failure `rollback` gets
    /// the snapshot back. Either way the invalidate keys are marked stale.
    pub async fn mutate<T, S, Fut>(
        &self,
        keys: MutationKeys<'_>,
        snapshot: impl FnOnce(&Self) -> S,
        patch: impl FnOnce(&Self),
        commit: impl FnOnce() -> Fut,
        rollback: impl FnOnce(&Self, S),
    ) -> Result<T, QueryError>
    where
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        for key in keys.cancel {
            self.cancel_queries(key);
        }
        let saved = snapshot(self);
        patch(self);

        let result = commit().await.map_err(QueryError::from);
        if let Err(err) = &result {
            warn!("mutation failed, rolling back optimistic update: {err}");
            rollback(self, saved);
        }

        for key in keys.invalidate {
            self.invalidate_queries(key);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use tokio::sync::oneshot;

    fn numbers() -> QueryKey {
        QueryKey::new(["numbers", "list"])
    }

    #[test]
    fn test_key_prefixes() {
        assert!(keys::company_detail("c1").starts_with(&keys::companies()));
        assert!(keys::company_list().starts_with(&keys::company_list()));
        assert!(!keys::application_list().starts_with(&keys::companies()));
        assert_eq!(keys::application_detail("a1").to_string(), "applications/detail/a1");
    }

    #[test]
    fn test_set_get_update_remove() {
        let cache = QueryCache::new();
        assert_eq!(cache.get_query_data::<Vec<i32>>(&numbers()), None);
        assert!(!cache.update_query_data::<Vec<i32>>(&numbers(), |v| v));

        cache.set_query_data(&numbers(), vec![1, 2]);
        assert!(cache.update_query_data::<Vec<i32>>(&numbers(), |mut v| {
            v.push(3);
            v
        }));
        assert_eq!(cache.get_query_data::<Vec<i32>>(&numbers()), Some(vec![1, 2, 3]));
        // Wrong type reads as absent.
        assert_eq!(cache.get_query_data::<String>(&numbers()), None);

        cache.remove_query(&numbers());
        assert_eq!(cache.get_query_data::<Vec<i32>>(&numbers()), None);
    }

    #[tokio::test]
    async fn test_fetch_caches_until_invalidated() {
        let cache = QueryCache::new();
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let fetch = || async {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok::<_, ServiceError>(vec![7])
        };

        assert_eq!(cache.fetch_query(numbers(), fetch).await, Ok(vec![7]));
        assert_eq!(cache.fetch_query(numbers(), fetch).await, Ok(vec![7]));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(cache.status(&numbers()), QueryStatus::Success);

        cache.invalidate_queries(&QueryKey::new(["numbers"]));
        assert!(cache.is_stale(&numbers()));
        cache.fetch_query(numbers(), fetch).await.unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(!cache.is_stale(&numbers()));
    }

    #[tokio::test]
    async fn test_failed_initial_fetch_is_an_error_state() {
        let cache = QueryCache::new();
        let result = cache
            .fetch_query::<Vec<i32>, _, _>(numbers(), || async {
                Err(ServiceError::from(StorageError::read("corrupt")))
            })
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.message(), "Failed to read from storage: corrupt");
        assert_eq!(cache.status(&numbers()), QueryStatus::Error(err));
        assert_eq!(cache.get_query_data::<Vec<i32>>(&numbers()), None);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_does_not_overwrite() {
        let cache = QueryCache::new();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let fetch = cache.fetch_query(numbers(), || async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            Ok::<_, ServiceError>(vec![1])
        });
        let supersede = async {
            let _ = started_rx.await;
            cache.cancel_queries(&numbers());
            cache.set_query_data(&numbers(), vec![2]);
            let _ = release_tx.send(());
        };

        let (fetched, ()) = tokio::join!(fetch, supersede);
        assert_eq!(fetched, Ok(vec![1]));
        assert_eq!(cache.get_query_data::<Vec<i32>>(&numbers()), Some(vec![2]));
    }

    #[tokio::test]
    async fn test_mutation_patch_is_visible_before_commit_finishes() {
        let cache = QueryCache::new();
        cache.set_query_data(&numbers(), vec![1]);
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let keys = [numbers()];

        let mutation = cache.mutate(
            MutationKeys {
                cancel: &keys,
                invalidate: &keys,
            },
            |c| c.snapshot(&keys),
            |c| {
                c.update_query_data::<Vec<i32>>(&numbers(), |mut v| {
                    v.push(99);
                    v
                });
            },
            || async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok::<_, ServiceError>(())
            },
            |c, snapshot| c.restore(snapshot),
        );
        let observer = async {
            let _ = started_rx.await;
            let seen = cache.get_query_data::<Vec<i32>>(&numbers());
            let _ = release_tx.send(());
            seen
        };

        let (result, seen) = tokio::join!(mutation, observer);
        assert_eq!(result, Ok(()));
        assert_eq!(seen, Some(vec![1, 99]));
        assert!(cache.is_stale(&numbers()));
    }

    #[tokio::test]
    async fn test_failed_mutation_restores_snapshot_verbatim() {
        let cache = QueryCache::new();
        let detail = QueryKey::new(["numbers", "detail", "1"]);
        cache.set_query_data(&numbers(), vec![1, 2]);
        let keys = [numbers(), detail.clone()];

        let result: Result<(), QueryError> = cache
            .mutate(
                MutationKeys {
                    cancel: &keys,
                    invalidate: &keys,
                },
                |c| c.snapshot(&keys),
                |c| {
                    c.set_query_data(&numbers(), vec![2]);
                    c.set_query_data(&detail, 5);
                },
                || async { Err(ServiceError::ApplicationNotFound("1".to_string())) },
                |c, snapshot| c.restore(snapshot),
            )
            .await;

        assert_eq!(
            result.unwrap_err().message(),
            "Application with id 1 not found"
        );
        assert_eq!(cache.get_query_data::<Vec<i32>>(&numbers()), Some(vec![1, 2]));
        // Absent before the mutation, absent after.
        assert_eq!(cache.get_query_data::<i32>(&detail), None);
        assert!(cache.is_stale(&numbers()));
    }
}
