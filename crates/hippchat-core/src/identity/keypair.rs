//! Session keypair derived from a seed string.
//!
//! The seed is hashed with SHA-512 and the first 32 bytes become the X25519
//! secret used for sealed-box encryption. Nothing is stored server-side; the
//! keypair lives in memory for the length of a session.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey, StaticSecret};

use super::mnemonic::derive_address_from_mnemonic;
use super::ss58::{ss58_encode, DEFAULT_PREFIX};
use crate::error::ChatResult;

/// Credentials handed to an object store binding.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

/// X25519 keypair plus the user's address and storage identity.
#[derive(Clone)]
pub struct KeyPair {
    seed: String,
    secret_key: [u8; 32],
    public_key: [u8; 32],
    access_key_id: String,
    address: String,
}

impl KeyPair {
    /// Derive a keypair from a seed string.
    ///
    /// The address defaults to the SS58 encoding of the X25519 public key.
    /// Use [`KeyPair::with_address`] to bind an address derived elsewhere.
    pub fn derive(seed: &str) -> Self {
        let digest = Sha512::digest(seed.as_bytes());
        let mut secret_key = [0u8; 32];
        secret_key.copy_from_slice(&digest[..32]);

        let secret = StaticSecret::from(secret_key);
        let public_key = *PublicKey::from(&secret).as_bytes();

        // Only fails for prefixes above 16383.
        let address = ss58_encode(&public_key, DEFAULT_PREFIX).unwrap_or_default();

        Self {
            seed: seed.to_string(),
            secret_key,
            public_key,
            access_key_id: BASE64.encode(seed.as_bytes()),
            address,
        }
    }

    /// Derive a keypair from a seed and bind it to a known address.
    pub fn from_seed(seed: &str, address: &str) -> Self {
        Self::derive(seed).with_address(address)
    }

    /// Log in with a mnemonic: the phrase seeds the encryption keys and the
    /// sr25519 derivation supplies the address.
    pub fn from_mnemonic(mnemonic: &str, password: &str) -> ChatResult<Self> {
        let derived = derive_address_from_mnemonic(mnemonic, password)?;
        Ok(Self::derive(mnemonic.trim()).with_address(&derived.address))
    }

    /// Replace the address (trimmed).
    pub fn with_address(mut self, address: &str) -> Self {
        self.address = address.trim().to_string();
        self
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    pub fn secret_key(&self) -> &[u8; 32] {
        &self.secret_key
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Public key as lowercase hex (the profile `pk` field).
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }

    /// Secret key as lowercase hex.
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.secret_key)
    }

    /// Object store credentials: the access key id is derived from the seed,
    /// the seed itself is the secret.
    pub fn credentials(&self) -> StoreCredentials {
        StoreCredentials {
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.seed.clone(),
        }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address)
            .field("public_key", &hex::encode(self.public_key))
            .finish_non_exhaustive()
    }
}
