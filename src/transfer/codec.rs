//! Payload encoding
//!
//! `bincode -> length-prefixed envelope -> gzip -> base64url`. The
//! envelope carries a format version and the serialized length; a declared
//! length that disagrees with the remaining buffer means the payload is
//! corrupt and the whole thing is discarded, never partially applied.

use crate::transfer::{TransferError, TransferResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

/// Envelope format version
const FORMAT_VERSION: u8 = 1;

/// Cap on the decompressed size; anything larger is corrupt or hostile
const MAX_DECODED_LEN: u64 = 256 * 1024 * 1024;

/// Encodes a value to its wire string
pub fn encode_payload<T: Serialize>(value: &T) -> TransferResult<String> {
    let body = bincode::serialize(value).map_err(|e| TransferError::Corrupt(e.to_string()))?;

    let mut raw = Vec::with_capacity(5 + body.len());
    raw.push(FORMAT_VERSION);
    raw.extend_from_slice(&(body.len() as u32).to_be_bytes());
    raw.extend_from_slice(&body);

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    let compressed = encoder.finish()?;

    Ok(URL_SAFE_NO_PAD.encode(compressed))
}

/// Decodes a wire string back into a value
///
/// Fail-fast: any decoding stage that disagrees with the envelope returns
/// `Corrupt` and the caller discards the whole payload.
pub fn decode_payload<T: DeserializeOwned>(encoded: &str) -> TransferResult<T> {
    let compressed = URL_SAFE_NO_PAD
        .decode(encoded.trim())
        .map_err(|e| TransferError::Corrupt(format!("base64: {}", e)))?;

    let mut raw = Vec::new();
    GzDecoder::new(&compressed[..])
        .take(MAX_DECODED_LEN)
        .read_to_end(&mut raw)
        .map_err(|e| TransferError::Corrupt(format!("gzip: {}", e)))?;

    if raw.len() < 5 {
        return Err(TransferError::Corrupt("envelope truncated".to_string()));
    }
    if raw[0] != FORMAT_VERSION {
        return Err(TransferError::Corrupt(format!(
            "unknown format version {}",
            raw[0]
        )));
    }

    let declared = u32::from_be_bytes([raw[1], raw[2], raw[3], raw[4]]) as usize;
    let body = &raw[5..];
    // Declared length must match the remaining buffer exactly
    if declared != body.len() {
        return Err(TransferError::Corrupt(format!(
            "declared length {} but {} bytes remain",
            declared,
            body.len()
        )));
    }

    bincode::deserialize(body).map_err(|e| TransferError::Corrupt(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        values: Vec<u64>,
    }

    fn sample() -> Sample {
        Sample {
            name: "netweft".to_string(),
            values: (0..100).collect(),
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let encoded = encode_payload(&sample()).unwrap();
        // Wire string is URL-safe
        assert!(!encoded.contains('+') && !encoded.contains('/'));

        let decoded: Sample = decode_payload(&encoded).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            decode_payload::<Sample>("!!!not base64!!!"),
            Err(TransferError::Corrupt(_))
        ));
        // Valid base64, not gzip
        let bogus = URL_SAFE_NO_PAD.encode(b"plainly not gzip");
        assert!(decode_payload::<Sample>(&bogus).is_err());
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let encoded = encode_payload(&sample()).unwrap();
        // Chop the tail off; either base64, gzip, or the length check trips
        let truncated = &encoded[..encoded.len() / 2];
        assert!(decode_payload::<Sample>(truncated).is_err());
    }

    #[test]
    fn test_declared_length_mismatch_rejected() {
        // Hand-build an envelope whose declared length exceeds the buffer
        let mut raw = vec![FORMAT_VERSION];
        raw.extend_from_slice(&1000u32.to_be_bytes());
        raw.extend_from_slice(&[0u8; 10]);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        let encoded = URL_SAFE_NO_PAD.encode(encoder.finish().unwrap());

        assert!(matches!(
            decode_payload::<Sample>(&encoded),
            Err(TransferError::Corrupt(_))
        ));
    }
}
