//! Directory-backed object store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<bucket>/<escaped key>            object body
//! <root>/<bucket>/.meta/<escaped key>.json metadata sidecar
//! ```
//!
//! Keys are escaped so that characters such as `:` in ISO timestamps are
//! safe on every filesystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use super::{
    apply_put, ObjectData, ObjectHead, ObjectMeta, ObjectStore, ObjectSummary, PutObject,
    PutOutcome,
};
use crate::error::StoreError;

const META_DIR: &str = ".meta";

/// Object store rooted at a local directory.
///
/// Several processes may share one root; appends are serialized within a
/// process only.
pub struct FsObjectStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(escape_key(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.bucket_dir(bucket).join(escape_key(key))
    }

    fn meta_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.bucket_dir(bucket)
            .join(META_DIR)
            .join(format!("{}.json", escape_key(key)))
    }

    async fn require_bucket(&self, bucket: &str) -> Result<PathBuf, StoreError> {
        let dir = self.bucket_dir(bucket);
        if tokio::fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            Ok(dir)
        } else {
            Err(StoreError::ContainerNotFound(bucket.to_string()))
        }
    }

    /// Sidecar for an object, or one synthesized from the file's mtime.
    async fn read_meta(&self, bucket: &str, key: &str, body_path: &Path) -> Result<ObjectMeta, StoreError> {
        match tokio::fs::read(self.meta_path(bucket, key)).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|e| StoreError::Metadata(format!("{}/{}: {}", bucket, key, e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let modified = tokio::fs::metadata(body_path).await?.modified()?;
                let last_modified = chrono::DateTime::<chrono::Utc>::from(modified).timestamp_millis();
                Ok(ObjectMeta {
                    last_modified,
                    ..Default::default()
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_object(&self, bucket: &str, key: &str) -> Result<Option<(Vec<u8>, ObjectMeta)>, StoreError> {
        let path = self.object_path(bucket, key);
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta = self.read_meta(bucket, key, &path).await?;
        Ok(Some((body, meta)))
    }
}

/// Percent-escape everything outside `[A-Za-z0-9._-]`.
fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    // A leading dot would collide with the sidecar directory
    if out.starts_with('.') {
        out.replace_range(..1, "%2E");
    }
    out
}

fn unescape_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn head_container(&self, bucket: &str) -> Result<(), StoreError> {
        self.require_bucket(bucket).await.map(|_| ())
    }

    async fn create_container(&self, bucket: &str) -> Result<(), StoreError> {
        let dir = self.bucket_dir(bucket);
        if tokio::fs::metadata(&dir).await.is_ok() {
            return Err(StoreError::ContainerExists(bucket.to_string()));
        }
        tokio::fs::create_dir_all(dir.join(META_DIR)).await?;
        Ok(())
    }

    async fn put_object(&self, bucket: &str, request: PutObject) -> Result<(), StoreError> {
        self.require_bucket(bucket).await?;
        let _guard = self.write_lock.lock().await;

        let key = request.key.clone();
        let existing = self.read_object(bucket, &key).await?;
        let previous_stamp = existing.as_ref().map(|(_, m)| m.last_modified).unwrap_or(0);
        let stamp = chrono::Utc::now().timestamp_millis().max(previous_stamp + 1);

        let (body, meta) = match apply_put(existing, request, stamp) {
            PutOutcome::Write { body, meta } => (body, meta),
            PutOutcome::Duplicate => {
                tracing::debug!(bucket, key = %key, "Ignoring repeated append");
                return Ok(());
            }
        };

        let meta_json = serde_json::to_vec(&meta)
            .map_err(|e| StoreError::Metadata(format!("{}/{}: {}", bucket, key, e)))?;
        let meta_path = self.meta_path(bucket, &key);
        if let Some(parent) = meta_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to temp files and rename so readers never see a torn object
        let body_path = self.object_path(bucket, &key);
        let body_tmp = body_path.with_extension("tmp~");
        let meta_tmp = meta_path.with_extension("tmp~");
        tokio::fs::write(&body_tmp, &body).await?;
        tokio::fs::write(&meta_tmp, &meta_json).await?;
        tokio::fs::rename(&body_tmp, &body_path).await?;
        tokio::fs::rename(&meta_tmp, &meta_path).await?;

        tracing::trace!(bucket, key = %key, size = body.len(), last_modified = stamp, "Object written");
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectData, StoreError> {
        self.require_bucket(bucket).await?;
        let (body, meta) = self
            .read_object(bucket, key)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        Ok(ObjectData {
            body: Bytes::from(body),
            last_modified: meta.last_modified,
            metadata: meta.metadata,
        })
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>, StoreError> {
        let dir = self.require_bucket(bucket).await?;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut objects = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".tmp~") {
                continue;
            }
            let Some(key) = unescape_key(&name) else {
                tracing::warn!(bucket, file = %name, "Skipping unrecognized file");
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            let path = entry.path();
            let meta = self.read_meta(bucket, &key, &path).await?;
            let size = entry.metadata().await?.len();
            objects.push(ObjectSummary {
                key,
                last_modified: meta.last_modified,
                size,
            });
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead, StoreError> {
        self.require_bucket(bucket).await?;
        let path = self.object_path(bucket, key);
        let size = match tokio::fs::metadata(&path).await {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let meta = self.read_meta(bucket, key, &path).await?;
        Ok(meta.head(size))
    }
}
