//! Message records as written to the inbox log, and their decrypted form.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{encrypt_for, generate_message_id, EncryptedMessage, KEY_SIZE};
use crate::error::{ChatError, ChatResult};

/// Record schema version.
pub const MESSAGE_VERSION: u32 = 1;

/// Default message kind.
pub const KIND_TEXT: &str = "text";

/// Shown in place of content that could not be decrypted.
pub const UNDECRYPTABLE: &str = "Unable to decrypt";

/// Message metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    /// Message kind: "text", "image", ...
    pub t: String,
}

impl Default for MessageMeta {
    fn default() -> Self {
        Self {
            t: KIND_TEXT.to_string(),
        }
    }
}

/// One encrypted log line.
///
/// Field order and names are the persisted wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub v: u32,
    pub msg_id: String,
    /// ISO-8601 UTC timestamp
    pub ts: String,
    pub from: String,
    pub to: String,
    pub nonce: String,
    pub ciphertext: String,
    /// Optional media reference
    #[serde(default)]
    pub media: Option<String>,
    #[serde(default)]
    pub meta: MessageMeta,
}

/// Which way a message travels relative to the local user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// ISO-8601 with milliseconds and a `Z` suffix.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an ISO-8601 timestamp to epoch milliseconds.
pub fn parse_timestamp_ms(ts: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|t| t.timestamp_millis())
}

impl Message {
    /// Encrypt `plaintext` for `recipient_pk` and build the record.
    ///
    /// `from`/`to` name the conversation, independent of whose key seals it,
    /// so the same call builds both the delivered copy and the self-copy.
    pub fn seal(
        ts: &str,
        from: &str,
        to: &str,
        kind: &str,
        recipient_pk: &[u8; KEY_SIZE],
        plaintext: &[u8],
    ) -> ChatResult<Self> {
        let EncryptedMessage { nonce, ciphertext } = encrypt_for(recipient_pk, plaintext)?;
        Ok(Self {
            v: MESSAGE_VERSION,
            msg_id: generate_message_id(ts, from, to, &nonce, &ciphertext),
            ts: ts.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            nonce,
            ciphertext,
            media: None,
            meta: MessageMeta { t: kind.to_string() },
        })
    }

    /// Parse one log line.
    pub fn from_line(line: &str) -> ChatResult<Self> {
        serde_json::from_str(line).map_err(|e| ChatError::MalformedLine(e.to_string()))
    }

    /// Serialize as a single log line (no trailing newline).
    pub fn to_line(&self) -> ChatResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn encrypted(&self) -> EncryptedMessage {
        EncryptedMessage {
            nonce: self.nonce.clone(),
            ciphertext: self.ciphertext.clone(),
        }
    }

    /// Timestamp as epoch milliseconds, if it parses.
    pub fn timestamp_ms(&self) -> Option<i64> {
        parse_timestamp_ms(&self.ts)
    }

    /// Direction relative to `me` when the message belongs to the
    /// conversation with `contact`, `None` otherwise.
    pub fn direction(&self, me: &str, contact: &str) -> Option<Direction> {
        if self.to == me && self.from == contact {
            Some(Direction::Incoming)
        } else if self.from == me && self.to == contact {
            Some(Direction::Outgoing)
        } else {
            None
        }
    }

    /// Whether the stored id matches the content hash of the fields.
    pub fn has_valid_id(&self) -> bool {
        self.msg_id == generate_message_id(&self.ts, &self.from, &self.to, &self.nonce, &self.ciphertext)
    }
}

/// A message together with its plaintext, when decryption succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedMessage {
    #[serde(flatten)]
    pub message: Message,
    #[serde(
        rename = "decryptedContent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub content: Option<String>,
}

impl DecryptedMessage {
    pub fn new(message: Message, content: impl Into<String>) -> Self {
        Self {
            message,
            content: Some(content.into()),
        }
    }

    /// A message whose content could not be recovered.
    pub fn undecryptable(message: Message) -> Self {
        Self {
            message,
            content: None,
        }
    }

    pub fn msg_id(&self) -> &str {
        &self.message.msg_id
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.message.timestamp_ms()
    }

    /// Content for display, or the undecryptable marker.
    pub fn display_content(&self) -> &str {
        self.content.as_deref().unwrap_or(UNDECRYPTABLE)
    }

    pub fn is_from(&self, address: &str) -> bool {
        self.message.from == address
    }

    /// Shortened sender address, e.g. "5Grwva...utQY".
    pub fn display_sender(&self) -> String {
        short_address(&self.message.from)
    }

    /// Relative time such as "5m ago".
    pub fn relative_time(&self) -> String {
        let Some(ts) = self.timestamp_ms() else {
            return String::new();
        };
        let diff_secs = (Utc::now().timestamp_millis() - ts) / 1000;

        if diff_secs < 60 {
            "Just now".to_string()
        } else if diff_secs < 3600 {
            format!("{}m ago", diff_secs / 60)
        } else if diff_secs < 86400 {
            format!("{}h ago", diff_secs / 3600)
        } else if diff_secs < 172800 {
            "Yesterday".to_string()
        } else {
            format!("{}d ago", diff_secs / 86400)
        }
    }
}

/// Shorten an address for display: first six and last four characters.
pub fn short_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 12 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::decrypt_from;
    use crate::identity::derive_keypair;

    const ALICE: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";
    const BOB: &str = "5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty";

    fn sample() -> Message {
        let bob = derive_keypair("bob");
        Message::seal("2024-03-05T14:30:00.000Z", ALICE, BOB, KIND_TEXT, bob.public_key(), b"hi").unwrap()
    }

    #[test]
    fn test_seal_builds_valid_record() {
        let bob = derive_keypair("bob");
        let msg = sample();

        assert_eq!(msg.v, 1);
        assert_eq!(msg.meta.t, "text");
        assert!(msg.media.is_none());
        assert!(msg.has_valid_id());
        assert_eq!(decrypt_from(bob.secret_key(), &msg.encrypted()).unwrap(), b"hi");
    }

    #[test]
    fn test_wire_field_names() {
        let line = sample().to_line().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        for field in ["v", "msg_id", "ts", "from", "to", "nonce", "ciphertext", "media", "meta"] {
            assert!(value.get(field).is_some(), "missing {}", field);
        }
        assert!(value["media"].is_null());
        assert_eq!(value["meta"]["t"], "text");
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_line_roundtrip() {
        let msg = sample();
        assert_eq!(Message::from_line(&msg.to_line().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let line = r#"{"v":1,"msg_id":"x","ts":"2024-03-05T14:30:00.000Z","from":"a","to":"b","nonce":"n","ciphertext":"c"}"#;
        let msg = Message::from_line(line).unwrap();
        assert_eq!(msg.meta.t, "text");
        assert!(msg.media.is_none());
    }

    #[test]
    fn test_malformed_line() {
        assert!(matches!(Message::from_line("not json"), Err(ChatError::MalformedLine(_))));
        assert!(matches!(Message::from_line(r#"{"v":1}"#), Err(ChatError::MalformedLine(_))));
    }

    #[test]
    fn test_direction() {
        let msg = sample();
        assert_eq!(msg.direction(BOB, ALICE), Some(Direction::Incoming));
        assert_eq!(msg.direction(ALICE, BOB), Some(Direction::Outgoing));
        assert_eq!(msg.direction(BOB, "someone-else"), None);
        assert_eq!(msg.direction("someone-else", ALICE), None);
    }

    #[test]
    fn test_timestamps() {
        let at = chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 3, 5, 14, 30, 0).unwrap();
        assert_eq!(format_timestamp(at), "2024-03-05T14:30:00.000Z");
        assert_eq!(sample().timestamp_ms(), Some(at.timestamp_millis()));
        assert_eq!(parse_timestamp_ms("yesterday"), None);
    }

    #[test]
    fn test_display_content_sentinel() {
        let msg = DecryptedMessage::undecryptable(sample());
        assert_eq!(msg.display_content(), "Unable to decrypt");

        let msg = DecryptedMessage::new(sample(), "hi");
        assert_eq!(msg.display_content(), "hi");
        assert!(msg.is_from(ALICE));
    }

    #[test]
    fn test_decrypted_serializes_flat() {
        let msg = DecryptedMessage::new(sample(), "hi");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["decryptedContent"], "hi");
        assert_eq!(value["from"], ALICE);

        let back: DecryptedMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_short_address() {
        assert_eq!(short_address(ALICE), "5Grwva...utQY");
        assert_eq!(short_address("short"), "short");
    }
}
