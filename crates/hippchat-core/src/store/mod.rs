//! Object store interface consumed by the messaging core.
//!
//! The core needs six operations from an S3-compatible store:
//!
//! ```text
//! head_container   create_container
//! put_object       get_object
//! list_objects     head_object
//! ```
//!
//! plus user metadata on objects and a per-object last-modified stamp that is
//! usable as a logical clock. Only eventual read-after-write visibility is
//! assumed, and no cross-object transactions.
//!
//! ## Append intent
//!
//! Log segments are appended to by writing with the metadata
//! `{append: "true", append-if-version: <probed>, append-id: <uuid>}`. The
//! backend is expected to concatenate server-side; the bundled bindings
//! ([`MemoryObjectStore`], [`FsObjectStore`]) emulate that behaviour and
//! treat a repeated `append-id` as already applied.

mod fs;
mod memory;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Metadata flag marking a put as an append.
pub const META_APPEND: &str = "append";
/// Version the writer observed before appending.
pub const META_APPEND_IF_VERSION: &str = "append-if-version";
/// Unique id of one append, used as an idempotency hint.
pub const META_APPEND_ID: &str = "append-id";
/// Append counter maintained on the object.
pub const META_APPEND_VERSION: &str = "append-version";

/// How many recent append ids an object remembers.
const APPEND_ID_HISTORY: usize = 256;

/// One entry of a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    /// Last-modified time, epoch milliseconds
    pub last_modified: i64,
    pub size: u64,
}

/// Result of a metadata-only read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    /// Last-modified time, epoch milliseconds
    pub last_modified: i64,
    pub size: u64,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Result of a full read.
#[derive(Debug, Clone)]
pub struct ObjectData {
    pub body: Bytes,
    /// Last-modified time, epoch milliseconds
    pub last_modified: i64,
    pub metadata: HashMap<String, String>,
}

impl ObjectData {
    /// Body as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A write request.
#[derive(Debug, Clone, Default)]
pub struct PutObject {
    pub key: String,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl PutObject {
    pub fn new(key: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether this put carries the append flag.
    pub fn is_append(&self) -> bool {
        self.metadata.get(META_APPEND).map(String::as_str) == Some("true")
    }
}

/// S3-style object store. Buckets are called containers here.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Succeeds if the container exists.
    async fn head_container(&self, bucket: &str) -> Result<(), StoreError>;

    /// Create a container. Fails with [`StoreError::ContainerExists`] if present.
    async fn create_container(&self, bucket: &str) -> Result<(), StoreError>;

    async fn put_object(&self, bucket: &str, request: PutObject) -> Result<(), StoreError>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectData, StoreError>;

    /// List objects whose key starts with `prefix`, in key order.
    async fn list_objects(&self, bucket: &str, prefix: &str)
        -> Result<Vec<ObjectSummary>, StoreError>;

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead, StoreError>;
}

/// Make sure a container exists, creating it when missing.
///
/// A creation race ("already exists") counts as success.
pub async fn ensure_container(store: &dyn ObjectStore, bucket: &str) -> Result<(), StoreError> {
    let bucket = bucket.trim();
    match store.head_container(bucket).await {
        Ok(()) => {
            tracing::debug!(bucket, "Container already exists");
            return Ok(());
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => {
            tracing::error!(bucket, error = %e, "Unexpected error checking container");
            return Err(e);
        }
    }

    match store.create_container(bucket).await {
        Ok(()) => {
            tracing::info!(bucket, "Container created");
            Ok(())
        }
        Err(StoreError::ContainerExists(_)) => Ok(()),
        Err(e) => {
            tracing::error!(bucket, error = %e, "Failed to create container");
            Err(e)
        }
    }
}

/// Stored object state shared by the bundled bindings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ObjectMeta {
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub last_modified: i64,
    #[serde(default)]
    pub append_ids: Vec<String>,
}

impl ObjectMeta {
    pub(crate) fn head(&self, size: u64) -> ObjectHead {
        ObjectHead {
            last_modified: self.last_modified,
            size,
            content_type: self.content_type.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Outcome of applying a put to an object.
pub(crate) enum PutOutcome {
    /// Body and metadata to store
    Write { body: Vec<u8>, meta: ObjectMeta },
    /// Repeated append id, nothing to do
    Duplicate,
}

/// Apply a put to the current object state.
///
/// Plain puts replace the object. Appends concatenate onto the existing
/// body and bump `append-version`; an append to a missing object creates it.
pub(crate) fn apply_put(
    existing: Option<(Vec<u8>, ObjectMeta)>,
    request: PutObject,
    stamp: i64,
) -> PutOutcome {
    let is_append = request.is_append();
    let append_id = request.metadata.get(META_APPEND_ID).cloned();

    let mut metadata = request.metadata;
    for control in [META_APPEND, META_APPEND_IF_VERSION, META_APPEND_ID] {
        metadata.remove(control);
    }

    match existing {
        Some((mut body, mut meta)) if is_append => {
            if let Some(id) = &append_id {
                if meta.append_ids.iter().any(|seen| seen == id) {
                    return PutOutcome::Duplicate;
                }
            }

            let version = meta
                .metadata
                .get(META_APPEND_VERSION)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);
            body.extend_from_slice(&request.body);
            meta.metadata
                .insert(META_APPEND_VERSION.to_string(), (version + 1).to_string());
            if let Some(id) = append_id {
                meta.append_ids.push(id);
                if meta.append_ids.len() > APPEND_ID_HISTORY {
                    let excess = meta.append_ids.len() - APPEND_ID_HISTORY;
                    meta.append_ids.drain(..excess);
                }
            }
            meta.last_modified = stamp;
            PutOutcome::Write { body, meta }
        }
        _ => {
            if is_append {
                metadata.insert(META_APPEND_VERSION.to_string(), "1".to_string());
            }
            let meta = ObjectMeta {
                content_type: request.content_type,
                metadata,
                last_modified: stamp,
                append_ids: append_id.into_iter().collect(),
            };
            PutOutcome::Write {
                body: request.body.to_vec(),
                meta,
            }
        }
    }
}
