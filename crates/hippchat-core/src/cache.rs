//! Local message and offset state.
//!
//! The sync service reads and writes the local view of each conversation
//! through [`ChatCache`]: which messages are already known (for dedup) and
//! the per-contact offset (the high-water mark of delivered log content).

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::chat::{Conversation, DecryptedMessage};
use crate::error::ChatResult;

/// Per-contact messages and offsets.
///
/// Offsets only move forward: [`advance_offset`](ChatCache::advance_offset)
/// stores the maximum of the saved and the proposed value.
pub trait ChatCache: Send + Sync {
    /// Saved offset for `contact`, if any.
    fn offset(&self, contact: &str) -> ChatResult<Option<i64>>;

    /// Store `max(saved, offset)` and return the stored value.
    fn advance_offset(&self, contact: &str, offset: i64) -> ChatResult<i64>;

    /// Ids of every message known for `contact`.
    fn message_ids(&self, contact: &str) -> ChatResult<HashSet<String>>;

    /// Merge messages by id; returns the ones that were not known yet.
    fn add_messages(
        &self,
        contact: &str,
        messages: Vec<DecryptedMessage>,
    ) -> ChatResult<Vec<DecryptedMessage>>;

    /// Known messages for `contact`, oldest first.
    fn messages(&self, contact: &str) -> ChatResult<Vec<DecryptedMessage>>;

    /// Contacts with messages or an offset.
    fn contacts(&self) -> ChatResult<Vec<String>>;

    /// Forget everything.
    fn clear(&self) -> ChatResult<()>;
}

#[derive(Default)]
struct MemoryCacheInner {
    conversations: HashMap<String, Conversation>,
    offsets: HashMap<String, i64>,
}

/// Cache held in memory for the length of a session.
#[derive(Default)]
pub struct MemoryCache {
    inner: RwLock<MemoryCacheInner>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChatCache for MemoryCache {
    fn offset(&self, contact: &str) -> ChatResult<Option<i64>> {
        Ok(self.inner.read().offsets.get(contact).copied())
    }

    fn advance_offset(&self, contact: &str, offset: i64) -> ChatResult<i64> {
        let mut inner = self.inner.write();
        let slot = inner.offsets.entry(contact.to_string()).or_insert(offset);
        *slot = (*slot).max(offset);
        Ok(*slot)
    }

    fn message_ids(&self, contact: &str) -> ChatResult<HashSet<String>> {
        Ok(self
            .inner
            .read()
            .conversations
            .get(contact)
            .map(|c| c.message_ids().clone())
            .unwrap_or_default())
    }

    fn add_messages(
        &self,
        contact: &str,
        messages: Vec<DecryptedMessage>,
    ) -> ChatResult<Vec<DecryptedMessage>> {
        let mut inner = self.inner.write();
        let conversation = inner
            .conversations
            .entry(contact.to_string())
            .or_insert_with(|| Conversation::new(contact.to_string()));
        Ok(conversation.add_messages(messages))
    }

    fn messages(&self, contact: &str) -> ChatResult<Vec<DecryptedMessage>> {
        Ok(self
            .inner
            .read()
            .conversations
            .get(contact)
            .map(|c| c.messages().to_vec())
            .unwrap_or_default())
    }

    fn contacts(&self) -> ChatResult<Vec<String>> {
        let inner = self.inner.read();
        let mut contacts: Vec<String> = inner
            .conversations
            .keys()
            .chain(inner.offsets.keys())
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        contacts.sort();
        Ok(contacts)
    }

    fn clear(&self) -> ChatResult<()> {
        let mut inner = self.inner.write();
        inner.conversations.clear();
        inner.offsets.clear();
        Ok(())
    }
}
