//! Sealed envelopes: per-message public-key encryption
//!
//! Every message is encrypted with a fresh ephemeral X25519 keypair and a
//! random 24-byte nonce using the NaCl `box` construction
//! (X25519 + XSalsa20-Poly1305). The ephemeral secret is discarded after
//! use; only its public half travels with the ciphertext.
//!
//! # Wire Format
//!
//! ```text
//! nonce      = base64(24 random bytes)
//! ciphertext = base64(ephemeral_pk (32 bytes) || box(plaintext) (len + 16 bytes))
//! ```
//!
//! Decryption needs only the recipient's secret key: the sender binding is
//! the embedded ephemeral key, checked implicitly by box authentication.
//! There is no long-term sender authentication.
//!
//! # Example
//!
//! ```
//! use hippchat_core::crypto::{decrypt_from, encrypt_for};
//! use hippchat_core::identity::derive_keypair;
//!
//! let bob = derive_keypair("bob");
//! let sealed = encrypt_for(bob.public_key(), b"hi").unwrap();
//! let opened = decrypt_from(bob.secret_key(), &sealed).unwrap();
//!
//! assert_eq!(opened, b"hi");
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::Aead;
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::error::{ChatError, ChatResult};

/// Nonce size for XSalsa20-Poly1305 (24 bytes)
pub const NONCE_SIZE: usize = 24;

/// X25519 key size (32 bytes)
pub const KEY_SIZE: usize = 32;

/// Poly1305 authentication tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Base64-encoded nonce and `ephemeral_pk || box` blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    pub nonce: String,
    pub ciphertext: String,
}

/// Generate a random nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);
    nonce
}

fn generate_ephemeral_secret() -> ChatResult<SecretKey> {
    // Use getrandom directly to avoid rand_core version conflicts with crypto_box
    let mut seed = [0u8; KEY_SIZE];
    getrandom::getrandom(&mut seed).map_err(|e| {
        ChatError::EncryptionFailed(format!("Failed to generate ephemeral key: {}", e))
    })?;
    Ok(SecretKey::from(seed))
}

/// Encrypt `plaintext` for the holder of `recipient_pk`.
///
/// Two calls with the same plaintext never produce the same output: each
/// call uses a new ephemeral keypair and a new nonce.
pub fn encrypt_for(recipient_pk: &[u8; KEY_SIZE], plaintext: &[u8]) -> ChatResult<EncryptedMessage> {
    let ephemeral_secret = generate_ephemeral_secret()?;
    let ephemeral_public = ephemeral_secret.public_key();
    let nonce = generate_nonce();

    let salsa_box = SalsaBox::new(&PublicKey::from(*recipient_pk), &ephemeral_secret);
    let sealed = salsa_box
        .encrypt(GenericArray::from_slice(&nonce), plaintext)
        .map_err(|e| ChatError::EncryptionFailed(e.to_string()))?;

    let mut combined = Vec::with_capacity(KEY_SIZE + sealed.len());
    combined.extend_from_slice(ephemeral_public.as_bytes());
    combined.extend_from_slice(&sealed);

    Ok(EncryptedMessage {
        nonce: BASE64.encode(nonce),
        ciphertext: BASE64.encode(combined),
    })
}

/// Decrypt a message sealed for `our_sk`.
///
/// Lengths are validated before any cryptography runs: the nonce must be
/// exactly 24 bytes and the blob must hold an ephemeral key plus a tag.
/// Authentication failure (wrong key, tampering) yields
/// [`ChatError::DecryptionFailed`].
pub fn decrypt_from(our_sk: &[u8; KEY_SIZE], encrypted: &EncryptedMessage) -> ChatResult<Vec<u8>> {
    let nonce = BASE64
        .decode(encrypted.nonce.as_bytes())
        .map_err(|e| ChatError::Encoding(format!("nonce is not base64: {}", e)))?;
    if nonce.len() != NONCE_SIZE {
        return Err(ChatError::InvalidLength {
            what: "nonce",
            expected: NONCE_SIZE,
            actual: nonce.len(),
        });
    }

    let combined = BASE64
        .decode(encrypted.ciphertext.as_bytes())
        .map_err(|e| ChatError::Encoding(format!("ciphertext is not base64: {}", e)))?;
    if combined.len() < KEY_SIZE + TAG_SIZE {
        return Err(ChatError::InvalidLength {
            what: "ciphertext",
            expected: KEY_SIZE + TAG_SIZE,
            actual: combined.len(),
        });
    }

    let (ephemeral_pk, sealed) = combined.split_at(KEY_SIZE);
    let mut ephemeral = [0u8; KEY_SIZE];
    ephemeral.copy_from_slice(ephemeral_pk);

    let salsa_box = SalsaBox::new(&PublicKey::from(ephemeral), &SecretKey::from(*our_sk));
    salsa_box
        .decrypt(GenericArray::from_slice(&nonce), sealed)
        .map_err(|_| {
            ChatError::DecryptionFailed("invalid ciphertext or wrong key".to_string())
        })
}

/// Content-addressed message id.
///
/// `base64(SHA-512(ts | from | to | nonce | ciphertext))`. Pure and
/// order-sensitive: identical fields always collide, which is what makes
/// dedup-by-id work.
pub fn generate_message_id(ts: &str, from: &str, to: &str, nonce: &str, ciphertext: &str) -> String {
    let data = format!("{}|{}|{}|{}|{}", ts, from, to, nonce, ciphertext);
    BASE64.encode(Sha512::digest(data.as_bytes()))
}
