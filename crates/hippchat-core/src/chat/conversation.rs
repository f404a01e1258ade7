//! Message history with one contact.
//!
//! A [`Conversation`] holds the decrypted messages exchanged with a contact,
//! in both directions, deduplicated by `msg_id` and kept in chronological order.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::message::{short_address, DecryptedMessage};

/// A conversation with a specific contact.
///
/// # Example
///
/// ```ignore
/// let mut conversation = Conversation::new("5Grwva...".to_string());
/// let added = conversation.add_messages(polled);
/// for msg in conversation.messages() {
///     println!("{}: {}", msg.display_sender(), msg.display_content());
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    /// Contact's address
    pub contact: String,
    /// Contact's display name (if known)
    #[serde(default)]
    pub contact_name: Option<String>,
    /// Messages in chronological order (oldest first)
    messages: Vec<DecryptedMessage>,
    #[serde(skip)]
    ids: HashSet<String>,
}

impl Conversation {
    pub fn new(contact: String) -> Self {
        Self {
            contact,
            ..Default::default()
        }
    }

    /// Rebuild the id index after deserialization.
    pub(crate) fn reindex(&mut self) {
        self.ids = self.messages.iter().map(|m| m.message.msg_id.clone()).collect();
    }

    pub fn contains(&self, msg_id: &str) -> bool {
        self.ids.contains(msg_id)
    }

    pub fn message_ids(&self) -> &HashSet<String> {
        &self.ids
    }

    /// Add one message. Returns `false` for a duplicate id.
    pub fn add_message(&mut self, message: DecryptedMessage) -> bool {
        if !self.ids.insert(message.message.msg_id.clone()) {
            return false;
        }

        // Insert after every message with an equal or earlier timestamp
        let ts = message.timestamp_ms().unwrap_or(0);
        let pos = self
            .messages
            .iter()
            .position(|m| m.timestamp_ms().unwrap_or(0) > ts)
            .unwrap_or(self.messages.len());
        self.messages.insert(pos, message);
        true
    }

    /// Add several messages, returning the ones that were new.
    pub fn add_messages(&mut self, messages: Vec<DecryptedMessage>) -> Vec<DecryptedMessage> {
        messages
            .into_iter()
            .filter(|m| self.add_message(m.clone()))
            .collect()
    }

    /// All messages in chronological order.
    pub fn messages(&self) -> &[DecryptedMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_message(&self) -> Option<&DecryptedMessage> {
        self.messages.last()
    }

    /// Timestamp of the newest message (epoch ms), 0 when empty.
    pub fn last_activity(&self) -> i64 {
        self.messages
            .iter()
            .filter_map(DecryptedMessage::timestamp_ms)
            .max()
            .unwrap_or(0)
    }

    /// Last message content truncated to `max_chars` characters.
    pub fn preview(&self, max_chars: usize) -> Option<String> {
        self.last_message().map(|m| {
            let content = m.display_content();
            if content.chars().count() > max_chars {
                let cut: String = content.chars().take(max_chars).collect();
                format!("{}...", cut)
            } else {
                content.to_string()
            }
        })
    }

    /// Contact name if known, otherwise the shortened address.
    pub fn display_name(&self) -> String {
        match &self.contact_name {
            Some(name) => name.clone(),
            None => short_address(&self.contact),
        }
    }

    /// Messages from the contact received after our last sent message.
    pub fn unread_count(&self) -> usize {
        let last_sent = self
            .messages
            .iter()
            .filter(|m| !m.is_from(&self.contact))
            .filter_map(DecryptedMessage::timestamp_ms)
            .max()
            .unwrap_or(0);

        self.messages
            .iter()
            .filter(|m| m.is_from(&self.contact) && m.timestamp_ms().unwrap_or(0) > last_sent)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::message::{Message, MessageMeta};

    const FRIEND: &str = "5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty";
    const ME: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";

    fn make_message(id: &str, from: &str, content: &str, second: u32) -> DecryptedMessage {
        let to = if from == ME { FRIEND } else { ME };
        DecryptedMessage::new(
            Message {
                v: 1,
                msg_id: id.to_string(),
                ts: format!("2024-03-05T14:30:{:02}.000Z", second),
                from: from.to_string(),
                to: to.to_string(),
                nonce: String::new(),
                ciphertext: String::new(),
                media: None,
                meta: MessageMeta::default(),
            },
            content,
        )
    }

    #[test]
    fn test_messages_sorted_by_timestamp() {
        let mut convo = Conversation::new(FRIEND.to_string());

        convo.add_message(make_message("c", FRIEND, "Third", 3));
        convo.add_message(make_message("a", FRIEND, "First", 1));
        convo.add_message(make_message("b", ME, "Second", 2));

        let contents: Vec<_> = convo.messages().iter().map(|m| m.display_content()).collect();
        assert_eq!(contents, vec!["First", "Second", "Third"]);
        assert_eq!(convo.last_message().unwrap().display_content(), "Third");
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let mut convo = Conversation::new(FRIEND.to_string());
        convo.add_message(make_message("a", FRIEND, "one", 1));
        convo.add_message(make_message("b", FRIEND, "two", 1));
        assert_eq!(convo.messages()[1].display_content(), "two");
    }

    #[test]
    fn test_duplicate_messages_ignored() {
        let mut convo = Conversation::new(FRIEND.to_string());

        let msg = make_message("a", FRIEND, "Hello!", 1);
        assert!(convo.add_message(msg.clone()));
        assert!(!convo.add_message(msg));
        assert_eq!(convo.len(), 1);
        assert!(convo.contains("a"));
    }

    #[test]
    fn test_add_messages_returns_new_only() {
        let mut convo = Conversation::new(FRIEND.to_string());
        convo.add_message(make_message("a", FRIEND, "old", 1));

        let added = convo.add_messages(vec![
            make_message("a", FRIEND, "old", 1),
            make_message("b", FRIEND, "new", 2),
        ]);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].msg_id(), "b");
    }

    #[test]
    fn test_last_activity() {
        let mut convo = Conversation::new(FRIEND.to_string());
        assert_eq!(convo.last_activity(), 0);

        convo.add_message(make_message("a", FRIEND, "x", 5));
        let expected = crate::chat::message::parse_timestamp_ms("2024-03-05T14:30:05.000Z").unwrap();
        assert_eq!(convo.last_activity(), expected);
    }

    #[test]
    fn test_preview() {
        let mut convo = Conversation::new(FRIEND.to_string());
        assert!(convo.preview(50).is_none());

        convo.add_message(make_message(
            "a",
            FRIEND,
            "This is a very long message that should be truncated",
            1,
        ));
        assert_eq!(convo.preview(20).unwrap(), "This is a very long ...");
    }

    #[test]
    fn test_display_name() {
        let mut convo = Conversation::new(FRIEND.to_string());
        assert_eq!(convo.display_name(), "5FHneW...94ty");
        convo.contact_name = Some("Bob".to_string());
        assert_eq!(convo.display_name(), "Bob");
    }

    #[test]
    fn test_unread_count() {
        let mut convo = Conversation::new(FRIEND.to_string());
        assert_eq!(convo.unread_count(), 0);

        convo.add_message(make_message("a", FRIEND, "Hello", 1));
        assert_eq!(convo.unread_count(), 1);

        convo.add_message(make_message("b", ME, "Hi!", 2));
        assert_eq!(convo.unread_count(), 0);

        convo.add_message(make_message("c", FRIEND, "How are you?", 3));
        convo.add_message(make_message("d", FRIEND, "Still there?", 4));
        assert_eq!(convo.unread_count(), 2);
    }

    #[test]
    fn test_reindex_after_deserialize() {
        let mut convo = Conversation::new(FRIEND.to_string());
        convo.add_message(make_message("a", FRIEND, "x", 1));

        let json = serde_json::to_string(&convo).unwrap();
        let mut back: Conversation = serde_json::from_str(&json).unwrap();
        assert!(!back.contains("a"));
        back.reindex();
        assert!(back.contains("a"));
        assert!(!back.add_message(make_message("a", FRIEND, "x", 1)));
    }
}
