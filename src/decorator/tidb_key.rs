//! TiDB key layout decoding
//!
//! Table data keys look like `t{table_id}_r{row_id}`, index keys like
//! `t{table_id}_i{index_id}{values}`, and meta keys start with `m`. Ids are
//! 8-byte big-endian integers with the sign bit flipped. Region boundaries
//! reported by PD are additionally memcomparable-encoded.

const TABLE_PREFIX: u8 = b't';
const META_PREFIX: u8 = b'm';
const RECORD_SEP: &[u8] = b"_r";
const INDEX_SEP: &[u8] = b"_i";
const ID_LEN: usize = 8;
const TABLE_PREFIX_LEN: usize = 1 + ID_LEN;
const RECORD_KEY_LEN: usize = TABLE_PREFIX_LEN + 2 + ID_LEN;

const ENC_GROUP_SIZE: usize = 8;
const ENC_MARKER: u8 = 0xFF;
const SIGN_MASK: u64 = 0x8000_0000_0000_0000;

/// Decode a memcomparable-encoded region key.
///
/// Returns `None` when the input is not a complete encoding.
pub fn decode_region_key(key: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(key.len());
    let mut rest = key;
    loop {
        if rest.len() < ENC_GROUP_SIZE + 1 {
            return None;
        }
        let (group, tail) = rest.split_at(ENC_GROUP_SIZE + 1);
        let marker = group[ENC_GROUP_SIZE];
        let pad = (ENC_MARKER - marker) as usize;
        if pad > ENC_GROUP_SIZE {
            return None;
        }
        let real = ENC_GROUP_SIZE - pad;
        out.extend_from_slice(&group[..real]);
        rest = tail;
        if pad != 0 {
            if group[real..ENC_GROUP_SIZE].iter().any(|b| *b != 0) {
                return None;
            }
            return Some(out);
        }
    }
}

fn decode_id(bytes: &[u8]) -> Option<i64> {
    let raw: [u8; ID_LEN] = bytes.get(..ID_LEN)?.try_into().ok()?;
    Some((u64::from_be_bytes(raw) ^ SIGN_MASK) as i64)
}

/// A decoded view over a TiDB key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TidbKey {
    raw: Vec<u8>,
}

impl TidbKey {
    /// Wrap a boundary key, decoding the memcomparable layer when present.
    pub fn from_region_key(key: &[u8]) -> Self {
        let raw = decode_region_key(key).unwrap_or_else(|| key.to_vec());
        Self { raw }
    }

    /// Wrap an already decoded key.
    pub fn from_raw(raw: impl Into<Vec<u8>>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// `(true, 0)` for meta keys and unrecognized layouts, `(false, table_id)`
    /// for table keys.
    pub fn meta_or_table(&self) -> (bool, i64) {
        match self.raw.first() {
            Some(&TABLE_PREFIX) => match decode_id(&self.raw[1..]) {
                Some(id) => (false, id),
                None => (true, 0),
            },
            Some(&META_PREFIX) => (true, 0),
            _ => (true, 0),
        }
    }

    /// Row id of a record key, 0 otherwise.
    pub fn row_id(&self) -> i64 {
        if self.raw.len() != RECORD_KEY_LEN || !self.has_separator(RECORD_SEP) {
            return 0;
        }
        decode_id(&self.raw[TABLE_PREFIX_LEN + 2..]).unwrap_or(0)
    }

    /// Index id of an index key, 0 otherwise.
    pub fn index_id(&self) -> i64 {
        if self.raw.len() < RECORD_KEY_LEN || !self.has_separator(INDEX_SEP) {
            return 0;
        }
        decode_id(&self.raw[TABLE_PREFIX_LEN + 2..]).unwrap_or(0)
    }

    fn has_separator(&self, sep: &[u8]) -> bool {
        self.raw.first() == Some(&TABLE_PREFIX)
            && self.raw.get(TABLE_PREFIX_LEN..TABLE_PREFIX_LEN + 2) == Some(sep)
    }
}

/// Encode helpers for building TiDB keys.
pub mod encode {
    use super::*;

    pub fn id(value: i64) -> [u8; ID_LEN] {
        ((value as u64) ^ SIGN_MASK).to_be_bytes()
    }

    pub fn table_prefix(table_id: i64) -> Vec<u8> {
        let mut key = vec![TABLE_PREFIX];
        key.extend_from_slice(&id(table_id));
        key
    }

    pub fn record_key(table_id: i64, row_id: i64) -> Vec<u8> {
        let mut key = table_prefix(table_id);
        key.extend_from_slice(RECORD_SEP);
        key.extend_from_slice(&id(row_id));
        key
    }

    pub fn index_key(table_id: i64, index_id: i64) -> Vec<u8> {
        let mut key = table_prefix(table_id);
        key.extend_from_slice(INDEX_SEP);
        key.extend_from_slice(&id(index_id));
        key
    }

    /// Memcomparable encoding, the inverse of [`decode_region_key`].
    pub fn region_key(raw: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity((raw.len() / ENC_GROUP_SIZE + 1) * (ENC_GROUP_SIZE + 1));
        let mut chunks = raw.chunks(ENC_GROUP_SIZE).peekable();
        loop {
            match chunks.next() {
                Some(chunk) if chunk.len() == ENC_GROUP_SIZE => {
                    out.extend_from_slice(chunk);
                    out.push(ENC_MARKER);
                    if chunks.peek().is_none() {
                        out.extend_from_slice(&[0u8; ENC_GROUP_SIZE]);
                        out.push(ENC_MARKER - ENC_GROUP_SIZE as u8);
                        return out;
                    }
                }
                Some(chunk) => {
                    let pad = ENC_GROUP_SIZE - chunk.len();
                    out.extend_from_slice(chunk);
                    out.extend(std::iter::repeat(0u8).take(pad));
                    out.push(ENC_MARKER - pad as u8);
                    return out;
                }
                None => {
                    out.extend_from_slice(&[0u8; ENC_GROUP_SIZE]);
                    out.push(ENC_MARKER - ENC_GROUP_SIZE as u8);
                    return out;
                }
            }
        }
    }
}
