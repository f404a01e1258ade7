//! In-process object store.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{
    apply_put, ObjectData, ObjectHead, ObjectMeta, ObjectStore, ObjectSummary, PutObject,
    PutOutcome,
};
use crate::error::StoreError;

type Container = BTreeMap<String, (Vec<u8>, ObjectMeta)>;

#[derive(Default)]
struct State {
    containers: HashMap<String, Container>,
    /// Last stamp handed out; stamps are strictly increasing
    clock: i64,
}

#[derive(Default)]
struct Faults {
    /// Consumed one per call, by any operation
    queued: VecDeque<StoreError>,
    /// Keys whose reads always fail with the given status
    broken_keys: HashMap<String, u16>,
}

/// Per-operation call counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub head_container: usize,
    pub create_container: usize,
    pub put: usize,
    pub get: usize,
    pub list: usize,
    pub head: usize,
}

#[derive(Default)]
struct Counters {
    head_container: AtomicUsize,
    create_container: AtomicUsize,
    put: AtomicUsize,
    get: AtomicUsize,
    list: AtomicUsize,
    head: AtomicUsize,
}

/// Object store kept entirely in memory.
///
/// Honors the append intent (see the [module docs](super)) and stamps every
/// write with a strictly increasing last-modified time so offsets computed
/// from it behave like a logical clock. Tests can queue failures and place
/// objects at explicit times.
#[derive(Default)]
pub struct MemoryObjectStore {
    state: Mutex<State>,
    faults: Mutex<Faults>,
    counters: Counters,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next store call (of any kind) with `error`.
    pub fn inject_failure(&self, error: StoreError) {
        self.faults.lock().queued.push_back(error);
    }

    /// Make every `get_object`/`head_object` on `key` fail with `status`.
    pub fn break_key(&self, key: &str, status: u16) {
        self.faults.lock().broken_keys.insert(key.to_string(), status);
    }

    /// Undo [`break_key`](Self::break_key).
    pub fn heal_key(&self, key: &str) {
        self.faults.lock().broken_keys.remove(key);
    }

    /// Store an object with an explicit last-modified time, creating the
    /// container if needed. Does not advance the store clock past `last_modified`
    /// unless it is newer.
    pub fn insert_at(&self, bucket: &str, key: &str, body: impl Into<Bytes>, last_modified: i64) {
        let mut state = self.state.lock();
        state.clock = state.clock.max(last_modified);
        let meta = ObjectMeta {
            last_modified,
            ..Default::default()
        };
        state
            .containers
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), (body.into().to_vec(), meta));
    }

    /// Raw body of an object, if present.
    pub fn object_body(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state
            .containers
            .get(bucket)
            .and_then(|c| c.get(key))
            .map(|(body, _)| body.clone())
    }

    /// Snapshot of the call counters.
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            head_container: self.counters.head_container.load(Ordering::Relaxed),
            create_container: self.counters.create_container.load(Ordering::Relaxed),
            put: self.counters.put.load(Ordering::Relaxed),
            get: self.counters.get.load(Ordering::Relaxed),
            list: self.counters.list.load(Ordering::Relaxed),
            head: self.counters.head.load(Ordering::Relaxed),
        }
    }

    fn take_fault(&self) -> Result<(), StoreError> {
        match self.faults.lock().queued.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_key(&self, key: &str) -> Result<(), StoreError> {
        match self.faults.lock().broken_keys.get(key) {
            Some(status) => Err(StoreError::Status {
                status: *status,
                message: format!("injected failure for {}", key),
            }),
            None => Ok(()),
        }
    }

    fn next_stamp(state: &mut State) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        state.clock = now.max(state.clock + 1);
        state.clock
    }
}

fn not_found(bucket: &str, key: &str) -> StoreError {
    StoreError::NotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn head_container(&self, bucket: &str) -> Result<(), StoreError> {
        self.counters.head_container.fetch_add(1, Ordering::Relaxed);
        self.take_fault()?;
        if self.state.lock().containers.contains_key(bucket) {
            Ok(())
        } else {
            Err(StoreError::ContainerNotFound(bucket.to_string()))
        }
    }

    async fn create_container(&self, bucket: &str) -> Result<(), StoreError> {
        self.counters.create_container.fetch_add(1, Ordering::Relaxed);
        self.take_fault()?;
        let mut state = self.state.lock();
        if state.containers.contains_key(bucket) {
            return Err(StoreError::ContainerExists(bucket.to_string()));
        }
        state.containers.insert(bucket.to_string(), Container::new());
        Ok(())
    }

    async fn put_object(&self, bucket: &str, request: PutObject) -> Result<(), StoreError> {
        self.counters.put.fetch_add(1, Ordering::Relaxed);
        self.take_fault()?;

        let mut state = self.state.lock();
        if !state.containers.contains_key(bucket) {
            return Err(StoreError::ContainerNotFound(bucket.to_string()));
        }
        let stamp = Self::next_stamp(&mut state);
        let key = request.key.clone();
        let Some(container) = state.containers.get_mut(bucket) else {
            return Err(StoreError::ContainerNotFound(bucket.to_string()));
        };

        let existing = container.remove(&key);
        let restore = existing.clone();
        match apply_put(existing, request, stamp) {
            PutOutcome::Write { body, meta } => {
                container.insert(key, (body, meta));
            }
            PutOutcome::Duplicate => {
                tracing::debug!(bucket, key = %key, "Ignoring repeated append");
                if let Some(previous) = restore {
                    container.insert(key, previous);
                }
            }
        }
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectData, StoreError> {
        self.counters.get.fetch_add(1, Ordering::Relaxed);
        self.take_fault()?;
        self.check_key(key)?;

        let state = self.state.lock();
        let container = state
            .containers
            .get(bucket)
            .ok_or_else(|| StoreError::ContainerNotFound(bucket.to_string()))?;
        let (body, meta) = container.get(key).ok_or_else(|| not_found(bucket, key))?;
        Ok(ObjectData {
            body: Bytes::copy_from_slice(body),
            last_modified: meta.last_modified,
            metadata: meta.metadata.clone(),
        })
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectSummary>, StoreError> {
        self.counters.list.fetch_add(1, Ordering::Relaxed);
        self.take_fault()?;

        let state = self.state.lock();
        let container = state
            .containers
            .get(bucket)
            .ok_or_else(|| StoreError::ContainerNotFound(bucket.to_string()))?;
        Ok(container
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (body, meta))| ObjectSummary {
                key: key.clone(),
                last_modified: meta.last_modified,
                size: body.len() as u64,
            })
            .collect())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead, StoreError> {
        self.counters.head.fetch_add(1, Ordering::Relaxed);
        self.take_fault()?;
        self.check_key(key)?;

        let state = self.state.lock();
        let container = state
            .containers
            .get(bucket)
            .ok_or_else(|| StoreError::ContainerNotFound(bucket.to_string()))?;
        let (body, meta) = container.get(key).ok_or_else(|| not_found(bucket, key))?;
        Ok(meta.head(body.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ensure_container, META_APPEND, META_APPEND_ID, META_APPEND_VERSION};

    fn append(key: &str, body: &str, id: &str) -> PutObject {
        PutObject::new(key, body.to_string())
            .with_metadata(META_APPEND, "true")
            .with_metadata(META_APPEND_ID, id)
    }

    #[tokio::test]
    async fn test_container_lifecycle() {
        let store = MemoryObjectStore::new();
        assert!(store.head_container("chat-a").await.unwrap_err().is_not_found());

        store.create_container("chat-a").await.unwrap();
        store.head_container("chat-a").await.unwrap();
        assert!(matches!(
            store.create_container("chat-a").await,
            Err(StoreError::ContainerExists(_))
        ));
    }

    #[tokio::test]
    async fn test_ensure_container_is_idempotent() {
        let store = MemoryObjectStore::new();
        ensure_container(&store, "profile-a").await.unwrap();
        ensure_container(&store, "profile-a").await.unwrap();
        assert_eq!(store.calls().create_container, 1);
    }

    #[tokio::test]
    async fn test_ensure_container_propagates_other_errors() {
        let store = MemoryObjectStore::new();
        store.inject_failure(StoreError::AccessDenied("nope".to_string()));
        assert!(matches!(
            ensure_container(&store, "chat-a").await,
            Err(StoreError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryObjectStore::new();
        store.create_container("b").await.unwrap();
        store
            .put_object("b", PutObject::new("k", "hello").with_metadata("x", "1"))
            .await
            .unwrap();

        let data = store.get_object("b", "k").await.unwrap();
        assert_eq!(data.text(), "hello");
        assert_eq!(data.metadata.get("x").unwrap(), "1");

        let head = store.head_object("b", "k").await.unwrap();
        assert_eq!(head.size, 5);
        assert_eq!(head.last_modified, data.last_modified);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let store = MemoryObjectStore::new();
        store.create_container("b").await.unwrap();
        assert!(store.get_object("b", "nope").await.unwrap_err().is_not_found());
        assert!(store.head_object("b", "nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_put_into_missing_container_fails() {
        let store = MemoryObjectStore::new();
        let err = store.put_object("nope", PutObject::new("k", "v")).await.unwrap_err();
        assert!(matches!(err, StoreError::ContainerNotFound(_)));
    }

    #[tokio::test]
    async fn test_append_emulation() {
        let store = MemoryObjectStore::new();
        store.create_container("b").await.unwrap();
        store.put_object("b", PutObject::new("log", "")).await.unwrap();
        store.put_object("b", append("log", "one\n", "a")).await.unwrap();
        store.put_object("b", append("log", "two\n", "b")).await.unwrap();
        // Retried append with the same id
        store.put_object("b", append("log", "two\n", "b")).await.unwrap();

        assert_eq!(store.object_body("b", "log").unwrap(), b"one\ntwo\n");
        let head = store.head_object("b", "log").await.unwrap();
        assert_eq!(head.metadata.get(META_APPEND_VERSION).unwrap(), "2");
    }

    #[tokio::test]
    async fn test_stamps_strictly_increase() {
        let store = MemoryObjectStore::new();
        store.create_container("b").await.unwrap();
        let mut last = 0;
        for i in 0..20 {
            store
                .put_object("b", PutObject::new(format!("k{}", i), "x"))
                .await
                .unwrap();
            let head = store.head_object("b", &format!("k{}", i)).await.unwrap();
            assert!(head.last_modified > last);
            last = head.last_modified;
        }
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix_in_key_order() {
        let store = MemoryObjectStore::new();
        store.insert_at("b", "inbox-2024030515.log", "", 2);
        store.insert_at("b", "inbox-2024030514.log", "", 1);
        store.insert_at("b", "profile-x.json", "", 3);

        let listed = store.list_objects("b", "inbox-").await.unwrap();
        let keys: Vec<_> = listed.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["inbox-2024030514.log", "inbox-2024030515.log"]);
        assert_eq!(listed[0].last_modified, 1);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = MemoryObjectStore::new();
        store.insert_at("b", "k", "v", 1);

        store.inject_failure(StoreError::Network("reset".to_string()));
        assert!(store.get_object("b", "k").await.unwrap_err().is_transient());
        assert!(store.get_object("b", "k").await.is_ok());

        store.break_key("k", 500);
        assert!(store.get_object("b", "k").await.is_err());
        assert!(store.get_object("b", "k").await.is_err());
        assert_eq!(store.calls().get, 4);
    }
}
