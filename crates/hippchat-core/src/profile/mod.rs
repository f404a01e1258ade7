//! User profiles: the published public key and display information.
//!
//! Profiles are immutable objects in the user's `profile-{address}`
//! container. An edit writes a new `profile-{updatedAt}.json` object; the
//! current profile is whichever object was modified last.

mod store;

pub use store::ProfileStore;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::chat::{format_timestamp, parse_timestamp_ms};
use crate::error::{ChatError, ChatResult};
use crate::identity::KeyPair;

/// Profile schema version.
pub const PROFILE_VERSION: u32 = 1;

/// Key prefix shared by all profile objects.
pub const PROFILE_PREFIX: &str = "profile-";

/// Container holding a user's inbox log.
pub fn chat_bucket(address: &str) -> String {
    format!("chat-{}", address.trim())
}

/// Container holding a user's profile versions.
pub fn profile_bucket(address: &str) -> String {
    format!("profile-{}", address.trim())
}

/// Published user profile.
///
/// Serialized with camelCase keys; this JSON is the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub v: u32,
    pub address: String,
    /// X25519 public key, lowercase hex
    pub pk: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    /// ISO-8601 timestamp of this version
    pub updated_at: String,
}

impl UserProfile {
    /// Create a profile for `keypair`, stamped now.
    pub fn new(keypair: &KeyPair, display_name: impl Into<String>) -> Self {
        Self {
            v: PROFILE_VERSION,
            address: keypair.address().to_string(),
            pk: keypair.public_key_hex(),
            display_name: display_name.into(),
            avatar_key: None,
            avatar_url: None,
            about: None,
            updated_at: format_timestamp(Utc::now()),
        }
    }

    /// Stamp the profile with the current time.
    pub fn touch(&mut self) {
        self.updated_at = format_timestamp(Utc::now());
    }

    /// The published public key as raw bytes.
    pub fn public_key(&self) -> ChatResult<[u8; 32]> {
        let bytes = hex::decode(self.pk.trim())
            .map_err(|e| ChatError::InvalidKey(format!("profile pk is not hex: {}", e)))?;
        let actual = bytes.len();
        bytes.try_into().map_err(|_| ChatError::InvalidLength {
            what: "public key",
            expected: 32,
            actual,
        })
    }

    /// `updatedAt` normalized to ISO-8601 UTC with milliseconds, or `None`
    /// if it does not parse.
    pub fn normalized_updated_at(&self) -> Option<String> {
        let ms = parse_timestamp_ms(&self.updated_at)?;
        chrono::DateTime::from_timestamp_millis(ms).map(format_timestamp)
    }

    /// Object key for this version.
    pub fn object_key(&self) -> String {
        let ts = self
            .normalized_updated_at()
            .unwrap_or_else(|| format_timestamp(Utc::now()));
        format!("{}{}.json", PROFILE_PREFIX, ts)
    }
}
