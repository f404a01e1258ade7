//! Chat records and conversation history
//!
//! # Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Chat Layer (this module)                                       │
//! │  - Message: encrypted log line, the wire format                 │
//! │  - DecryptedMessage: record plus recovered plaintext            │
//! │  - Conversation: deduplicated history with a contact            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Log Layer (log module)                                         │
//! │  - InboxLog: hour-segmented append-only objects                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Store Layer (store module)                                     │
//! │  - ObjectStore: put/get/list/head over containers               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Message Flow
//!
//! **Sending:**
//! 1. The plaintext is sealed twice: for the recipient and for ourselves
//! 2. Each record is appended as one JSON line: to the recipient's inbox
//!    and to our own
//!
//! **Receiving:**
//! 1. Our inbox is tailed from a per-contact offset
//! 2. Lines are parsed, filtered to the conversation, and opened with our key
//! 3. New records are merged into the [`Conversation`] by `msg_id`

mod conversation;
mod message;

pub use conversation::Conversation;
pub use message::{
    format_timestamp, parse_timestamp_ms, short_address, DecryptedMessage, Direction, Message,
    MessageMeta, KIND_TEXT, MESSAGE_VERSION, UNDECRYPTABLE,
};

use crate::crypto::decrypt_from;
use crate::error::ChatResult;

/// Decrypt a record with our secret key.
///
/// Plaintext that is not valid UTF-8 is replaced lossily.
pub fn open_message(our_sk: &[u8; 32], message: Message) -> ChatResult<DecryptedMessage> {
    let plaintext = decrypt_from(our_sk, &message.encrypted())?;
    let content = String::from_utf8_lossy(&plaintext).into_owned();
    Ok(DecryptedMessage::new(message, content))
}

/// Sort ascending by timestamp; unparseable timestamps sort first.
pub fn sort_chronologically(messages: &mut [DecryptedMessage]) {
    messages.sort_by_key(|m| m.timestamp_ms().unwrap_or(0));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use crate::identity::derive_keypair;

    #[test]
    fn test_open_message() {
        let alice = derive_keypair("alice");
        let bob = derive_keypair("bob");
        let msg = Message::seal(
            "2024-03-05T14:30:00.000Z",
            alice.address(),
            bob.address(),
            KIND_TEXT,
            bob.public_key(),
            "héllo".as_bytes(),
        )
        .unwrap();

        let opened = open_message(bob.secret_key(), msg.clone()).unwrap();
        assert_eq!(opened.display_content(), "héllo");
        assert_eq!(opened.message, msg);

        assert!(matches!(
            open_message(alice.secret_key(), msg),
            Err(ChatError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_sort_chronologically() {
        let bob = derive_keypair("bob");
        let seal = |ts: &str| {
            DecryptedMessage::new(
                Message::seal(ts, "a", "b", KIND_TEXT, bob.public_key(), b"x").unwrap(),
                ts,
            )
        };
        let mut messages = vec![
            seal("2024-03-05T14:30:02.000Z"),
            seal("2024-03-05T14:30:00.000Z"),
            seal("2024-03-05T14:30:01.000Z"),
        ];
        sort_chronologically(&mut messages);
        let order: Vec<_> = messages.iter().map(|m| m.display_content()).collect();
        assert_eq!(
            order,
            vec![
                "2024-03-05T14:30:00.000Z",
                "2024-03-05T14:30:01.000Z",
                "2024-03-05T14:30:02.000Z"
            ]
        );
    }
}
