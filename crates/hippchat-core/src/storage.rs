//! Persistent chat cache using redb.
//!
//! Keeps the local view of each conversation across process restarts:
//! - Per-contact offsets (high-water marks of delivered log content)
//! - Decrypted messages, keyed by contact and `msg_id`

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};

use crate::cache::ChatCache;
use crate::chat::{sort_chronologically, DecryptedMessage};
use crate::error::{ChatError, ChatResult};

/// contact address -> offset (epoch ms)
const OFFSETS_TABLE: TableDefinition<&str, i64> = TableDefinition::new("offsets");

/// "{contact}\x1f{msg_id}" -> JSON-serialized DecryptedMessage
const MESSAGES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("messages");

/// Separator between contact and msg_id in message keys
const KEY_SEPARATOR: char = '\u{1f}';

fn message_key(contact: &str, msg_id: &str) -> String {
    format!("{}{}{}", contact, KEY_SEPARATOR, msg_id)
}

fn contact_prefix(contact: &str) -> String {
    format!("{}{}", contact, KEY_SEPARATOR)
}

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will:
    /// - Create the database directory if it doesn't exist
    /// - Initialize the database file
    /// - Create all required tables
    pub fn new(path: impl AsRef<Path>) -> ChatResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(OFFSETS_TABLE)?;
            let _ = write_txn.open_table(MESSAGES_TABLE)?;
        }
        write_txn.commit()?;

        tracing::debug!(path = %path.display(), "Opened chat cache");
        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    fn decode(raw: &[u8]) -> ChatResult<DecryptedMessage> {
        serde_json::from_slice(raw).map_err(|e| ChatError::Serialization(e.to_string()))
    }
}

impl ChatCache for Storage {
    fn offset(&self, contact: &str) -> ChatResult<Option<i64>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(OFFSETS_TABLE)?;
        let offset = table.get(contact)?.map(|v| v.value());
        Ok(offset)
    }

    fn advance_offset(&self, contact: &str, offset: i64) -> ChatResult<i64> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let stored = {
            let mut table = write_txn.open_table(OFFSETS_TABLE)?;
            let current = table.get(contact)?.map(|v| v.value());
            let next = current.map_or(offset, |c| c.max(offset));
            if current != Some(next) {
                table.insert(contact, next)?;
            }
            next
        };
        write_txn.commit()?;
        Ok(stored)
    }

    fn message_ids(&self, contact: &str) -> ChatResult<HashSet<String>> {
        let prefix = contact_prefix(contact);
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(MESSAGES_TABLE)?;

        let mut ids = HashSet::new();
        for entry in table.range(prefix.as_str()..)? {
            let (key, _) = entry?;
            match key.value().strip_prefix(prefix.as_str()) {
                Some(id) => {
                    ids.insert(id.to_string());
                }
                None => break,
            }
        }
        Ok(ids)
    }

    fn add_messages(
        &self,
        contact: &str,
        messages: Vec<DecryptedMessage>,
    ) -> ChatResult<Vec<DecryptedMessage>> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let mut added = Vec::new();
        {
            let mut table = write_txn.open_table(MESSAGES_TABLE)?;
            for message in messages {
                let key = message_key(contact, message.msg_id());
                if table.get(key.as_str())?.is_some() {
                    continue;
                }
                let data = serde_json::to_vec(&message)?;
                table.insert(key.as_str(), data.as_slice())?;
                added.push(message);
            }
        }
        write_txn.commit()?;
        Ok(added)
    }

    fn messages(&self, contact: &str) -> ChatResult<Vec<DecryptedMessage>> {
        let prefix = contact_prefix(contact);
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(MESSAGES_TABLE)?;

        let mut messages = Vec::new();
        for entry in table.range(prefix.as_str()..)? {
            let (key, value) = entry?;
            if !key.value().starts_with(prefix.as_str()) {
                break;
            }
            messages.push(Self::decode(value.value())?);
        }
        sort_chronologically(&mut messages);
        Ok(messages)
    }

    fn contacts(&self) -> ChatResult<Vec<String>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;

        let mut contacts = HashSet::new();
        let offsets = read_txn.open_table(OFFSETS_TABLE)?;
        for entry in offsets.iter()? {
            let (key, _) = entry?;
            contacts.insert(key.value().to_string());
        }
        let messages = read_txn.open_table(MESSAGES_TABLE)?;
        for entry in messages.iter()? {
            let (key, _) = entry?;
            if let Some((contact, _)) = key.value().split_once(KEY_SEPARATOR) {
                contacts.insert(contact.to_string());
            }
        }

        let mut contacts: Vec<String> = contacts.into_iter().collect();
        contacts.sort();
        Ok(contacts)
    }

    fn clear(&self) -> ChatResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut offsets = write_txn.open_table(OFFSETS_TABLE)?;
            offsets.retain(|_, _| false)?;
            let mut messages = write_txn.open_table(MESSAGES_TABLE)?;
            messages.retain(|_, _| false)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
