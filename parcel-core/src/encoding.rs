//! Payload framing. `encode` serializes a value to JSON and gzip-compresses it
//! when the serialized length meets `gzip_min_length`; `decode` sniffs the
//! first byte of the payload to tell the two cases apart.
//!
//! Every wire value here is a top-level JSON object or array, so the first
//! output byte is always `{` or `[` (printable ASCII) and can never collide
//! with the gzip magic byte `0x1F`, which is what lets the decoder skip an
//! explicit framing byte.

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;

use crate::error::BrokerError;

const GZIP_MAGIC: u8 = 0x1f;

pub fn encode<T: Serialize>(value: &T, gzip_min_length: usize) -> Result<Vec<u8>, BrokerError> {
    let json = serde_json::to_vec(value).map_err(|e| BrokerError::Encoding(e.to_string()))?;
    if gzip_min_length > 0 && json.len() >= gzip_min_length {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .map_err(|e| BrokerError::Encoding(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| BrokerError::Encoding(e.to_string()))
    } else {
        Ok(json)
    }
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, BrokerError> {
    let json = if data.first() == Some(&GZIP_MAGIC) {
        use flate2::read::GzDecoder;
        use std::io::Read;
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| BrokerError::Encoding(e.to_string()))?;
        out
    } else {
        data.to_vec()
    };
    serde_json::from_slice(&json).map_err(|e| BrokerError::Encoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RemoteError, ResultRecord};

    #[test]
    fn round_trips_without_gzip() {
        let rec = ResultRecord::ok(serde_json::json!({"x": 1}));
        let bytes = encode(&rec, 0).unwrap();
        assert_ne!(bytes.first(), Some(&GZIP_MAGIC));
        let back: ResultRecord = decode(&bytes).unwrap();
        assert_eq!(back.value, rec.value);
    }

    #[test]
    fn gzip_branch_chosen_past_threshold() {
        let rec = ResultRecord::err(RemoteError::new("ValueError", "x".repeat(200)));
        let small = encode(&rec, 10_000).unwrap();
        assert_ne!(small.first(), Some(&GZIP_MAGIC));
        let big = encode(&rec, 10).unwrap();
        assert_eq!(big.first(), Some(&GZIP_MAGIC));
        let back: ResultRecord = decode(&big).unwrap();
        assert_eq!(back.error, rec.error);
    }
}
