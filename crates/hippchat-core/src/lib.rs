//! HippChat Core Library
//!
//! End-to-end encrypted 1:1 messaging over plain object storage.
//!
//! ## Overview
//!
//! There is no chat server. Every user owns two containers in an
//! S3-compatible object store: `chat-{address}`, an append-only inbox log
//! split into hourly segments, and `profile-{address}`, holding versioned
//! profiles with the user's public key. A sender seals each message twice
//! (once for the recipient, once for themselves) and appends one line to
//! each inbox. Receivers poll their own inbox from a saved per-contact
//! offset.
//!
//! ## Core Principles
//!
//! - **Dumb storage**: the store sees only ciphertext and timestamps
//! - **Deterministic identity**: keys and addresses derive from a seed
//! - **Idempotent delivery**: messages carry content-hash ids and are
//!   deduplicated on merge
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use hippchat_core::{derive_keypair, FsObjectStore, MemoryCache, Session, SyncConfig, KIND_TEXT};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(FsObjectStore::new("./objects"));
//!     let session = Session::login(
//!         store,
//!         Arc::new(MemoryCache::new()),
//!         derive_keypair("alice seed"),
//!         "Alice",
//!         SyncConfig::default(),
//!     )
//!     .await?;
//!
//!     let bob = derive_keypair("bob seed");
//!     session.service().send_message(bob.address(), "hello", KIND_TEXT).await?;
//!
//!     for message in session.service().messages(bob.address())? {
//!         println!("{}: {}", message.display_sender(), message.display_content());
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod chat;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod log;
pub mod logging;
pub mod profile;
pub mod session;
pub mod storage;
pub mod store;
pub mod sync;

// Re-exports
pub use cache::{ChatCache, MemoryCache};
pub use chat::{Conversation, DecryptedMessage, Direction, Message, KIND_TEXT, UNDECRYPTABLE};
pub use config::{RetryPolicy, SyncConfig};
pub use crypto::EncryptedMessage;
pub use error::{ChatError, ChatResult, StoreError};
pub use identity::{derive_address_from_mnemonic, derive_keypair, KeyPair};
pub use log::{InboxLog, TailBatch};
pub use profile::{chat_bucket, profile_bucket, ProfileStore, UserProfile};
pub use session::Session;
pub use storage::Storage;
pub use store::{FsObjectStore, MemoryObjectStore, ObjectStore};
pub use sync::{
    ConversationEvent, ConversationHandle, ConversationState, Conversations, MessageSyncService,
    PollSchedule, SyncContext,
};
