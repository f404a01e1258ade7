//! Identity: deterministic key and address derivation.
//!
//! ## Overview
//!
//! - **KeyPair**: X25519 keys from `SHA-512(seed)[0..32]`, used for sealed boxes
//! - **Mnemonic addresses**: BIP39 entropy -> PBKDF2 -> sr25519 -> SS58
//! - **SS58**: checksummed base58 addresses with a network prefix
//!
//! ## Example
//!
//! ```rust
//! use hippchat_core::identity::{derive_keypair, ss58_decode};
//!
//! let keypair = derive_keypair("correct horse battery staple");
//! let (prefix, public_key) = ss58_decode(keypair.address()).unwrap();
//!
//! assert_eq!(prefix, 42);
//! assert_eq!(&public_key, keypair.public_key());
//! ```
//!
//! All functions are pure: no I/O, no global state.

mod keypair;
mod mnemonic;
mod ss58;

pub use keypair::{KeyPair, StoreCredentials};
pub use mnemonic::{derive_address_from_mnemonic, sr25519_public_from_mnemonic, DerivedAddress};
pub use ss58::{ss58_decode, ss58_encode, DEFAULT_PREFIX};

/// Derive a session keypair from a seed string.
pub fn derive_keypair(seed: &str) -> KeyPair {
    KeyPair::derive(seed)
}
