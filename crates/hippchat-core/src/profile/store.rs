//! Reading and publishing profile versions.

use std::sync::Arc;

use super::{profile_bucket, UserProfile, PROFILE_PREFIX};
use crate::config::RetryPolicy;
use crate::error::{ChatError, ChatResult};
use crate::log::with_retries;
use crate::store::{ObjectStore, PutObject};

const PROFILE_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Profile access over an object store.
#[derive(Clone)]
pub struct ProfileStore {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
}

impl ProfileStore {
    pub fn new(store: Arc<dyn ObjectStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Current profile in `bucket`: the most recently modified version.
    ///
    /// Returns `Ok(None)` when there is no profile object, or no container.
    pub async fn get_profile(&self, bucket: &str) -> ChatResult<Option<UserProfile>> {
        let bucket = bucket.trim();
        let store = &*self.store;

        let listed = match with_retries(&self.retry, "list profiles", move || {
            store.list_objects(bucket, PROFILE_PREFIX)
        })
        .await
        {
            Ok(listed) => listed,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let Some(latest) = listed.into_iter().max_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.key.cmp(&b.key))
        }) else {
            return Ok(None);
        };

        let key = latest.key.as_str();
        let data = match with_retries(&self.retry, "get profile", move || store.get_object(bucket, key)).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let profile: UserProfile = serde_json::from_slice(&data.body)?;
        tracing::trace!(bucket, key = %latest.key, "Loaded profile");
        Ok(Some(profile))
    }

    /// Current profile of the user at `address`.
    pub async fn get_profile_for(&self, address: &str) -> ChatResult<Option<UserProfile>> {
        self.get_profile(&profile_bucket(address)).await
    }

    /// Publish a new profile version. Prior versions are never overwritten.
    ///
    /// `updatedAt` is normalized to ISO-8601 UTC (or set to now if it does
    /// not parse). Returns the profile as written.
    pub async fn put_profile(&self, bucket: &str, profile: &UserProfile) -> ChatResult<UserProfile> {
        let bucket = bucket.trim();
        let mut saved = profile.clone();
        match saved.normalized_updated_at() {
            Some(ts) => saved.updated_at = ts,
            None => saved.touch(),
        }

        let key = saved.object_key();
        let body = serde_json::to_vec(&saved)?;
        let request = PutObject::new(key.clone(), body).with_content_type(PROFILE_CONTENT_TYPE);

        let store = &*self.store;
        with_retries(&self.retry, "put profile", move || store.put_object(bucket, request.clone())).await?;

        tracing::info!(bucket, key = %key, "Published profile");
        Ok(saved)
    }

    /// Public key published by `address`.
    ///
    /// Fails with [`ChatError::RecipientProfileNotFound`] if the user has no
    /// profile.
    pub async fn resolve_public_key(&self, address: &str) -> ChatResult<[u8; 32]> {
        match self.get_profile_for(address).await? {
            Some(profile) => profile.public_key(),
            None => Err(ChatError::RecipientProfileNotFound(address.to_string())),
        }
    }
}
