//! SS58 address encoding.
//!
//! ```text
//! payload  = prefix (1 or 2 bytes) || public key (32 bytes)
//! checksum = Blake2b-512("SS58PRE" || payload)[0..2]
//! address  = base58(payload || checksum)
//! ```
//!
//! Prefixes below 64 use the single-byte form; 64..16383 use the two-byte form.

use blake2::{Blake2b512, Digest};

use crate::error::{ChatError, ChatResult};

/// Generic Substrate network prefix.
pub const DEFAULT_PREFIX: u16 = 42;

const CHECKSUM_PREFIX: &[u8] = b"SS58PRE";
const CHECKSUM_LEN: usize = 2;
const MAX_PREFIX: u16 = 16_383;

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut hasher = Blake2b512::new();
    hasher.update(CHECKSUM_PREFIX);
    hasher.update(payload);
    let digest = hasher.finalize();
    [digest[0], digest[1]]
}

fn prefix_bytes(prefix: u16) -> ChatResult<Vec<u8>> {
    match prefix {
        0..=63 => Ok(vec![prefix as u8]),
        64..=MAX_PREFIX => {
            let first = (((prefix & 0b0000_0000_1111_1100) as u8) >> 2) | 0b0100_0000;
            let second = ((prefix >> 8) as u8) | (((prefix & 0b0000_0000_0000_0011) as u8) << 6);
            Ok(vec![first, second])
        }
        _ => Err(ChatError::Encoding(format!(
            "SS58 prefix {} out of range",
            prefix
        ))),
    }
}

/// Encode a 32-byte public key as an SS58 address.
pub fn ss58_encode(public_key: &[u8; 32], prefix: u16) -> ChatResult<String> {
    let mut payload = prefix_bytes(prefix)?;
    payload.extend_from_slice(public_key);
    let sum = checksum(&payload);
    payload.extend_from_slice(&sum);
    Ok(bs58::encode(payload).into_string())
}

/// Decode an SS58 address into its network prefix and public key.
///
/// Fails on bad base58, an unsupported length or prefix form, or a checksum
/// mismatch.
pub fn ss58_decode(address: &str) -> ChatResult<(u16, [u8; 32])> {
    let data = bs58::decode(address.trim())
        .into_vec()
        .map_err(|e| ChatError::Encoding(format!("invalid base58 address: {}", e)))?;

    let (prefix_len, prefix) = match data.first().copied() {
        Some(b @ 0..=63) => (1, b as u16),
        Some(b @ 64..=127) => {
            let second = data
                .get(1)
                .copied()
                .ok_or_else(|| ChatError::Encoding("truncated SS58 prefix".to_string()))?;
            let lower = (b << 2) | (second >> 6);
            let upper = second & 0b0011_1111;
            (2, (lower as u16) | ((upper as u16) << 8))
        }
        Some(b) => {
            return Err(ChatError::Encoding(format!(
                "unsupported SS58 prefix byte {}",
                b
            )))
        }
        None => return Err(ChatError::Encoding("empty address".to_string())),
    };

    let expected = prefix_len + 32 + CHECKSUM_LEN;
    if data.len() != expected {
        return Err(ChatError::InvalidLength {
            what: "SS58 address",
            expected,
            actual: data.len(),
        });
    }

    let (payload, sum) = data.split_at(prefix_len + 32);
    if checksum(payload) != sum {
        return Err(ChatError::Encoding("SS58 checksum mismatch".to_string()));
    }

    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&payload[prefix_len..]);
    Ok((prefix, public_key))
}
