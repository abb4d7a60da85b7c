//! Payload chunking and reassembly
//!
//! An encoded payload is split into parts no larger than the receiver's
//! POST ceiling minus a fixed overhead for the form fields that ride
//! along. Each part carries its own hash plus the hash of the whole
//! payload; the receiver verifies both before applying anything.

use crate::transfer::{TransferError, TransferResult};
use sha2::{Digest, Sha256};

/// Bytes reserved for form fields, headers, and hashes alongside the data
pub const PART_OVERHEAD: usize = 4096;

/// One part of a split payload
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadPart {
    /// Zero-based part index
    pub part: usize,
    /// Total number of parts
    pub num_parts: usize,
    /// This part's slice of the encoded payload
    pub data: String,
    /// Hex SHA-256 of `data`
    pub part_hash: String,
    /// Hex SHA-256 of the whole encoded payload; identical on every part
    pub hash_data: String,
}

/// Hex SHA-256 of a string
pub fn hash_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

/// Splits an encoded payload into parts of at most `max_post_size -
/// PART_OVERHEAD` bytes
pub fn split_payload(encoded: &str, max_post_size: usize) -> TransferResult<Vec<PayloadPart>> {
    let chunk_size = max_post_size.saturating_sub(PART_OVERHEAD);
    if chunk_size == 0 {
        return Err(TransferError::Corrupt(format!(
            "post_max_size {} leaves no room for data",
            max_post_size
        )));
    }

    let hash_data = hash_hex(encoded);
    let bytes = encoded.as_bytes();
    let num_parts = bytes.len().div_ceil(chunk_size).max(1);

    let mut parts = Vec::with_capacity(num_parts);
    for (part, chunk) in bytes.chunks(chunk_size).enumerate() {
        // Chunks split a base64 string, so every boundary is valid UTF-8
        let data = std::str::from_utf8(chunk)
            .map_err(|e| TransferError::Corrupt(e.to_string()))?
            .to_string();
        parts.push(PayloadPart {
            part,
            num_parts,
            part_hash: hash_hex(&data),
            hash_data: hash_data.clone(),
            data,
        });
    }

    if parts.is_empty() {
        parts.push(PayloadPart {
            part: 0,
            num_parts: 1,
            part_hash: hash_hex(""),
            hash_data,
            data: String::new(),
        });
    }

    Ok(parts)
}

/// Verifies one received part's self-hash and indices
pub fn verify_part(part: &PayloadPart) -> TransferResult<()> {
    if part.part >= part.num_parts {
        return Err(TransferError::PartOutOfRange {
            part: part.part,
            num_parts: part.num_parts,
        });
    }
    if hash_hex(&part.data) != part.part_hash {
        return Err(TransferError::HashMismatch);
    }
    Ok(())
}

/// Reassembles parts (already in part order) into the original payload
///
/// Verifies every part hash and the whole-payload hash; any mismatch
/// discards the lot.
pub fn reassemble(parts: &[PayloadPart]) -> TransferResult<String> {
    let Some(first) = parts.first() else {
        return Err(TransferError::Corrupt("no parts".to_string()));
    };
    if parts.len() != first.num_parts {
        return Err(TransferError::Corrupt(format!(
            "expected {} parts, got {}",
            first.num_parts,
            parts.len()
        )));
    }

    let mut whole = String::new();
    for (i, part) in parts.iter().enumerate() {
        if part.part != i {
            return Err(TransferError::PartOutOfRange {
                part: part.part,
                num_parts: first.num_parts,
            });
        }
        verify_part(part)?;
        whole.push_str(&part.data);
    }

    if hash_hex(&whole) != first.hash_data {
        return Err(TransferError::HashMismatch);
    }
    Ok(whole)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_reassembly_byte_exact() {
        let payload: String = (0..10_000).map(|i| ((i % 26) as u8 + b'a') as char).collect();
        let parts = split_payload(&payload, PART_OVERHEAD + 1000).unwrap();
        assert_eq!(parts.len(), 10);

        let rebuilt = reassemble(&parts).unwrap();
        assert_eq!(rebuilt, payload);
        assert_eq!(hash_hex(&rebuilt), parts[0].hash_data);
    }

    #[test]
    fn test_single_part_payload() {
        let parts = split_payload("short", PART_OVERHEAD + 1000).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(reassemble(&parts).unwrap(), "short");
    }

    #[test]
    fn test_tampered_part_rejected() {
        let payload = "a".repeat(3000);
        let mut parts = split_payload(&payload, PART_OVERHEAD + 1000).unwrap();
        parts[1].data = "b".repeat(parts[1].data.len());

        assert!(matches!(reassemble(&parts), Err(TransferError::HashMismatch)));
    }

    #[test]
    fn test_missing_part_rejected() {
        let payload = "a".repeat(3000);
        let mut parts = split_payload(&payload, PART_OVERHEAD + 1000).unwrap();
        parts.remove(1);
        assert!(reassemble(&parts).is_err());
    }

    #[test]
    fn test_no_room_for_data() {
        assert!(split_payload("data", PART_OVERHEAD).is_err());
    }
}
