//! Persisted snapshot records and the axis codec
//!
//! Encoded axis layout:
//!
//! ```text
//! | magic "KVAX" | version u8 | payload len u32 LE | crc32 u32 LE | bincode payload |
//! ```

use crate::matrix::Axis;
use crate::{Error, Result};

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

const MAGIC: &[u8; 4] = b"KVAX";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 13;

/// One stored snapshot: `axis` holds the encoded [`Axis`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisRecord {
    pub layer: u8,
    /// Unix seconds
    pub end_time: i64,
    pub axis: Vec<u8>,
}

impl AxisRecord {
    pub fn new(layer: u8, end_time: i64, axis: &Axis) -> Result<Self> {
        Ok(Self {
            layer,
            end_time,
            axis: encode_axis(axis)?,
        })
    }

    /// Decode the stored axis, reporting failures as [`Error::CorruptRecord`].
    pub fn decode(&self) -> Result<Axis> {
        decode_axis(&self.axis).map_err(|e| Error::CorruptRecord {
            layer: self.layer,
            end_time: self.end_time,
            reason: e.to_string(),
        })
    }
}

pub fn encode_axis(axis: &Axis) -> Result<Vec<u8>> {
    let payload = bincode::serialize(axis)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Serialization("axis payload exceeds 4 GiB".to_string()))?;

    let mut hasher = Hasher::new();
    hasher.update(&payload);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&hasher.finalize().to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode and re-validate an axis. Structural violations surface as errors,
/// never as a malformed axis.
pub fn decode_axis(bytes: &[u8]) -> Result<Axis> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::Serialization("truncated axis header".to_string()));
    }
    if &bytes[0..4] != MAGIC {
        return Err(Error::Serialization("invalid axis magic".to_string()));
    }
    if bytes[4] != VERSION {
        return Err(Error::Serialization(format!(
            "unsupported axis version {}",
            bytes[4]
        )));
    }
    let len = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) as usize;
    let expected_crc = u32::from_le_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]);
    let payload = &bytes[HEADER_LEN..];
    if payload.len() != len {
        return Err(Error::Serialization(format!(
            "axis payload is {} bytes, header says {}",
            payload.len(),
            len
        )));
    }

    let mut hasher = Hasher::new();
    hasher.update(payload);
    if hasher.finalize() != expected_crc {
        return Err(Error::Serialization("axis checksum mismatch".to_string()));
    }

    let axis: Axis = bincode::deserialize(payload)?;
    let (keys, values) = axis.into_parts();
    Axis::new(keys, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::StatTag;
    use std::collections::BTreeMap;

    fn sample() -> Axis {
        let mut values = BTreeMap::new();
        values.insert(StatTag::WrittenBytes, vec![1, 2]);
        values.insert(StatTag::ReadKeys, vec![7, 0]);
        Axis::new(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()], values).unwrap()
    }

    #[test]
    fn test_record_round_trip() {
        let record = AxisRecord::new(2, 1_700_000_000, &sample()).unwrap();
        assert_eq!(record.decode().unwrap(), sample());
    }

    #[test]
    fn test_empty_axis_round_trip() {
        let bytes = encode_axis(&Axis::empty()).unwrap();
        assert!(decode_axis(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_detects_bit_flip() {
        let mut record = AxisRecord::new(0, 60, &sample()).unwrap();
        let last = record.axis.len() - 1;
        record.axis[last] ^= 0x01;
        let err = record.decode().unwrap_err();
        assert!(matches!(err, Error::CorruptRecord { layer: 0, end_time: 60, .. }));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(decode_axis(b"nope").is_err());
        assert!(decode_axis(b"XXXX\x01\x00\x00\x00\x00\x00\x00\x00\x00").is_err());
    }

    #[test]
    fn test_rejects_structurally_invalid_payload() {
        // valid framing around an axis whose boundaries go backwards
        #[derive(Serialize)]
        struct RawAxis {
            keys: Vec<Vec<u8>>,
            values: BTreeMap<StatTag, Vec<u64>>,
        }
        let raw = RawAxis {
            keys: vec![b"b".to_vec(), b"a".to_vec()],
            values: BTreeMap::from([(StatTag::WrittenBytes, vec![1])]),
        };
        let payload = bincode::serialize(&raw).unwrap();
        let mut hasher = Hasher::new();
        hasher.update(&payload);
        let mut bytes = MAGIC.to_vec();
        bytes.push(VERSION);
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&hasher.finalize().to_le_bytes());
        bytes.extend_from_slice(&payload);

        assert!(matches!(decode_axis(&bytes), Err(Error::InvalidAxis(_))));
    }
}
