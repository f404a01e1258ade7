//! Mnemonic to address derivation.
//!
//! Matches the Substrate key derivation so that addresses line up with
//! existing wallets:
//!
//! 1. Validate the phrase against the BIP39 English wordlist and checksum.
//! 2. Recover the entropy bytes the phrase encodes.
//! 3. PBKDF2-HMAC-SHA512(entropy, "mnemonic" + password, 2048 rounds) -> 64 bytes.
//! 4. First 32 bytes are the sr25519 mini-secret, expanded in Ed25519 mode.
//! 5. The sr25519 public key is SS58-encoded.

use bip39::{Language, Mnemonic};
use pbkdf2::pbkdf2_hmac;
use schnorrkel::{ExpansionMode, MiniSecretKey};
use serde::{Deserialize, Serialize};
use sha2::Sha512;

use super::ss58::{ss58_encode, DEFAULT_PREFIX};
use crate::error::{ChatError, ChatResult};

const PBKDF2_ROUNDS: u32 = 2048;

/// Address and sr25519 public key derived from a mnemonic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAddress {
    /// SS58 address (generic prefix 42)
    pub address: String,
    /// sr25519 public key, lowercase hex
    pub public_key_hex: String,
}

/// Normalize whitespace and case, then validate against the English wordlist.
fn parse_mnemonic(phrase: &str) -> ChatResult<Mnemonic> {
    let normalized = phrase
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    Mnemonic::parse_in_normalized(Language::English, &normalized)
        .map_err(|e| ChatError::InvalidMnemonic(e.to_string()))
}

/// 64-byte seed from the mnemonic's entropy.
pub(crate) fn seed_from_mnemonic(phrase: &str, password: &str) -> ChatResult<[u8; 64]> {
    let mnemonic = parse_mnemonic(phrase)?;
    let entropy = mnemonic.to_entropy();
    let salt = format!("mnemonic{}", password);

    let mut seed = [0u8; 64];
    pbkdf2_hmac::<Sha512>(&entropy, salt.as_bytes(), PBKDF2_ROUNDS, &mut seed);
    Ok(seed)
}

/// Derive the sr25519 public key for a mnemonic.
pub fn sr25519_public_from_mnemonic(phrase: &str, password: &str) -> ChatResult<[u8; 32]> {
    let seed = seed_from_mnemonic(phrase, password)?;
    let mini = MiniSecretKey::from_bytes(&seed[..32])
        .map_err(|e| ChatError::InvalidKey(format!("sr25519 mini-secret: {}", e)))?;
    let keypair = mini.expand_to_keypair(ExpansionMode::Ed25519);
    Ok(keypair.public.to_bytes())
}

/// Derive the SS58 address and public key for a mnemonic.
///
/// Fails with [`ChatError::InvalidMnemonic`] if the phrase does not validate.
pub fn derive_address_from_mnemonic(phrase: &str, password: &str) -> ChatResult<DerivedAddress> {
    let public_key = sr25519_public_from_mnemonic(phrase, password)?;
    Ok(DerivedAddress {
        address: ss58_encode(&public_key, DEFAULT_PREFIX)?,
        public_key_hex: hex::encode(public_key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Substrate development phrase; its root sr25519 account is well known.
    const DEV_PHRASE: &str =
        "bottom drive obey lake curtain smoke basket hold race lonely fit walk";

    #[test]
    fn test_dev_phrase_root_account() {
        let derived = derive_address_from_mnemonic(DEV_PHRASE, "").unwrap();
        assert_eq!(
            derived.public_key_hex,
            "46ebddef8cd9bb167dc30878d7113b7e168e6f0646beffd77d69d39bad76b47a"
        );
        assert_eq!(
            derived.address,
            "5DfhGyQdFobKM8NsWvEeAKk5EQQgYe9AydgJ7rMB6E1EqRzV"
        );
    }

    #[test]
    fn test_whitespace_and_case_are_normalized() {
        let messy = "  Bottom drive OBEY lake\tcurtain smoke basket hold race lonely fit walk ";
        assert_eq!(
            derive_address_from_mnemonic(messy, "").unwrap(),
            derive_address_from_mnemonic(DEV_PHRASE, "").unwrap()
        );
    }

    #[test]
    fn test_password_changes_address() {
        let plain = derive_address_from_mnemonic(DEV_PHRASE, "").unwrap();
        let salted = derive_address_from_mnemonic(DEV_PHRASE, "hunter2").unwrap();
        assert_ne!(plain.address, salted.address);
    }

    #[test]
    fn test_invalid_mnemonic_rejected() {
        let err = derive_address_from_mnemonic("not a real mnemonic phrase at all", "").unwrap_err();
        assert!(matches!(err, ChatError::InvalidMnemonic(_)));

        // Valid words, bad checksum.
        let bad_checksum = ["abandon"; 12].join(" ");
        assert!(matches!(
            derive_address_from_mnemonic(&bad_checksum, ""),
            Err(ChatError::InvalidMnemonic(_))
        ));
    }

    #[test]
    fn test_seed_is_64_bytes_and_deterministic() {
        let a = seed_from_mnemonic(DEV_PHRASE, "").unwrap();
        let b = seed_from_mnemonic(DEV_PHRASE, "").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
