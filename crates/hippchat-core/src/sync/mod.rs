//! Conversation synchronization
//!
//! ## Overview
//!
//! There is no server and no push channel. Each user owns one inbox
//! container; senders append to the recipient's inbox and to their own.
//! A conversation stays current by polling our inbox for content newer
//! than a saved per-contact offset.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  MessageSyncService                                             │
//! │  ├── send_message (seal twice, append twice)                    │
//! │  ├── load_initial_history / backfill_history                    │
//! │  ├── poll_messages (tail since offset, dedup, advance offset)   │
//! │  └── has_recent_incoming                                        │
//! │                                                                 │
//! │  SyncContext (per session)                                      │
//! │  ├── in-flight history loads, shared between callers            │
//! │  └── contacts whose history is loaded                           │
//! │                                                                 │
//! │  Conversations (background polling)                             │
//! │  ├── one poll task per open conversation                        │
//! │  ├── PollSchedule: steady, burst and backoff intervals          │
//! │  └── ConversationEvents for UI updates                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let service = MessageSyncService::new(store, cache, keypair, SyncConfig::default());
//! service.send_message(&bob, "hello", KIND_TEXT).await?;
//!
//! let conversations = Conversations::new(service);
//! let mut events = conversations.subscribe();
//! let handle = conversations.open(&bob).await;
//! ```

pub mod events;
pub mod manager;
pub mod schedule;
pub mod service;

pub use events::{ConversationEvent, ConversationState};
pub use manager::{ConversationHandle, Conversations};
pub use schedule::PollSchedule;
pub use service::{MessageSyncService, SyncContext};
