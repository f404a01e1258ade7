//! Login and logout.

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::ChatCache;
use crate::chat::DecryptedMessage;
use crate::config::SyncConfig;
use crate::error::ChatResult;
use crate::identity::KeyPair;
use crate::log::with_retries;
use crate::profile::{chat_bucket, profile_bucket, UserProfile};
use crate::store::{ensure_container, ObjectStore};
use crate::sync::{Conversations, MessageSyncService};

/// A logged-in user: the sync service plus the open conversations.
pub struct Session {
    conversations: Conversations,
    profile: UserProfile,
}

impl Session {
    /// Log in as `keypair`.
    ///
    /// Makes sure our inbox and profile containers exist and publishes a
    /// first profile named `display_name` if we have none. An existing
    /// profile is kept as is.
    pub async fn login(
        store: Arc<dyn ObjectStore>,
        cache: Arc<dyn ChatCache>,
        keypair: KeyPair,
        display_name: &str,
        config: SyncConfig,
    ) -> ChatResult<Self> {
        let address = keypair.address().to_string();
        for bucket in [chat_bucket(&address), profile_bucket(&address)] {
            let store = &*store;
            let bucket = bucket.as_str();
            with_retries(&config.retry, "ensure container", move || {
                ensure_container(store, bucket)
            })
            .await?;
        }

        let service = MessageSyncService::new(store, cache, keypair, config);
        let profile = match service.own_profile().await? {
            Some(profile) => {
                if profile.pk != service.keypair().public_key_hex() {
                    warn!(
                        address = %address,
                        "Published profile key differs from this keypair; messages sent to us will not decrypt"
                    );
                }
                profile
            }
            None => {
                let profile = UserProfile::new(service.keypair(), display_name);
                service.update_profile(&profile).await?
            }
        };

        info!(address = %address, name = %profile.display_name, "Logged in");
        Ok(Self {
            conversations: Conversations::new(service),
            profile,
        })
    }

    pub fn address(&self) -> &str {
        self.service().address()
    }

    pub fn service(&self) -> &MessageSyncService {
        self.conversations.service()
    }

    pub fn conversations(&self) -> &Conversations {
        &self.conversations
    }

    /// Send a message and speed up polling of that conversation.
    pub async fn send_message(&self, to: &str, content: &str, kind: &str) -> ChatResult<DecryptedMessage> {
        self.conversations.send_message(to, content, kind).await
    }

    /// Profile as of login or the last [`update_profile`](Self::update_profile).
    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    /// Publish a new profile version with `display_name`.
    pub async fn update_profile(&mut self, display_name: &str) -> ChatResult<&UserProfile> {
        let mut profile = self.profile.clone();
        profile.display_name = display_name.to_string();
        profile.touch();
        self.profile = self.service().update_profile(&profile).await?;
        Ok(&self.profile)
    }

    /// Stop every conversation and forget which histories were loaded.
    ///
    /// The cache is left alone; a persistent cache keeps its offsets for
    /// the next login.
    pub async fn logout(self) {
        self.conversations.shutdown().await;
        self.service().context().reset();
        info!(address = %self.address(), "Logged out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::identity::derive_keypair;
    use crate::profile::PROFILE_PREFIX;
    use crate::store::MemoryObjectStore;

    async fn login(store: &Arc<MemoryObjectStore>, seed: &str, name: &str) -> Session {
        Session::login(
            store.clone(),
            Arc::new(MemoryCache::new()),
            derive_keypair(seed),
            name,
            SyncConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_login_creates_containers_and_profile() {
        let store = Arc::new(MemoryObjectStore::new());
        let session = login(&store, "alice", "Alice").await;
        let address = session.address().to_string();

        assert!(store.head_container(&chat_bucket(&address)).await.is_ok());
        assert!(store.head_container(&profile_bucket(&address)).await.is_ok());
        assert_eq!(session.profile().display_name, "Alice");
        assert_eq!(session.profile().pk, session.service().keypair().public_key_hex());
        session.logout().await;
    }

    #[tokio::test]
    async fn test_relogin_keeps_existing_profile() {
        let store = Arc::new(MemoryObjectStore::new());
        login(&store, "alice", "Alice").await.logout().await;

        let session = login(&store, "alice", "Someone Else").await;
        assert_eq!(session.profile().display_name, "Alice");
        let versions = store
            .list_objects(&profile_bucket(session.address()), PROFILE_PREFIX)
            .await
            .unwrap();
        assert_eq!(versions.len(), 1);
    }

    #[tokio::test]
    async fn test_update_profile_publishes_new_version() {
        let store = Arc::new(MemoryObjectStore::new());
        let mut session = login(&store, "alice", "Alice").await;
        session.update_profile("Alice L.").await.unwrap();

        let published = session.service().own_profile().await.unwrap().unwrap();
        assert_eq!(published.display_name, "Alice L.");
    }

    #[tokio::test]
    async fn test_logout_resets_history_context() {
        let store = Arc::new(MemoryObjectStore::new());
        let session = login(&store, "alice", "Alice").await;
        let bob = derive_keypair("bob");
        session
            .service()
            .load_initial_history(bob.address(), 10)
            .await
            .unwrap();
        assert!(session.service().context().is_done(bob.address()));

        let service = session.service().clone();
        session.logout().await;
        assert!(!service.context().is_done(bob.address()));
    }
}
