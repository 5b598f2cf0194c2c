//! Binary snapshot format for PrefStore backing files
//!
//! A backing file holds the complete key-value mapping and is always
//! replaced as a whole. Layout:
//! SnapshotHeader (32 bytes) + entries, where each entry is
//! key_len(u32 LE) + value_len(u32 LE) + key_bytes + value_bytes.

use hashbrown::HashMap;

use crate::error::{StoreError, StoreResult};

/// Magic bytes identifying a PrefStore snapshot: "PREF" in ASCII
pub const MAGIC_ARRAY: [u8; 4] = *b"PREF";

/// Current snapshot format version
pub const FORMAT_VERSION: u16 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 32;

/// Per-entry length prefix: key_len(u32) + value_len(u32)
const ENTRY_PREFIX_SIZE: usize = 8;

/// Fixed-size header at the start of every snapshot
///
/// Layout:
///   [0..4]   magic:       [u8;4] - "PREF"
///   [4..6]   version:     u16 LE
///   [6..8]   reserved:    [u8;2]
///   [8..16]  entry_count: u64 LE
///   [16..24] payload_len: u64 LE - bytes following the header
///   [24..28] checksum:    u32 LE - CRC32C of the payload
///   [28..32] reserved:    [u8;4]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub entry_count: u64,
    pub payload_len: u64,
    pub checksum: u32,
}

impl SnapshotHeader {
    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[24..28].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        Self {
            magic,
            version: u16::from_le_bytes([buf[4], buf[5]]),
            entry_count: read_u64(&buf[8..16]),
            payload_len: read_u64(&buf[16..24]),
            checksum: u32::from_le_bytes([buf[24], buf[25], buf[26], buf[27]]),
        }
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Serialize the whole mapping into a snapshot buffer.
///
/// Entry order follows the map's iteration order; decoding does not depend on it.
pub fn encode_snapshot(map: &HashMap<String, String>) -> StoreResult<Vec<u8>> {
    let payload_size: usize = map
        .iter()
        .map(|(k, v)| ENTRY_PREFIX_SIZE + k.len() + v.len())
        .sum();

    let mut payload = Vec::with_capacity(payload_size);
    for (key, value) in map {
        let key_len = u32::try_from(key.len())
            .map_err(|_| StoreError::invalid_key(format!("key of {} bytes cannot be encoded", key.len())))?;
        let value_len = u32::try_from(value.len())
            .map_err(|_| StoreError::invalid_value(format!("value of {} bytes cannot be encoded", value.len())))?;
        payload.extend_from_slice(&key_len.to_le_bytes());
        payload.extend_from_slice(&value_len.to_le_bytes());
        payload.extend_from_slice(key.as_bytes());
        payload.extend_from_slice(value.as_bytes());
    }

    let header = SnapshotHeader {
        magic: MAGIC_ARRAY,
        version: FORMAT_VERSION,
        entry_count: map.len() as u64,
        payload_len: payload.len() as u64,
        checksum: crc32c::crc32c(&payload),
    };

    let mut buffer = Vec::with_capacity(HEADER_SIZE + payload.len());
    buffer.extend_from_slice(&header.to_bytes());
    buffer.extend_from_slice(&payload);
    Ok(buffer)
}

/// Parse a snapshot buffer back into a mapping.
///
/// Any deviation from the layout is reported as `StorageCorrupt` with the
/// byte offset where parsing stopped.
pub fn decode_snapshot(data: &[u8]) -> StoreResult<HashMap<String, String>> {
    if data.len() < HEADER_SIZE {
        return Err(StoreError::corrupt(
            0,
            format!("snapshot too short: {} bytes, need at least {}", data.len(), HEADER_SIZE),
        ));
    }

    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes.copy_from_slice(&data[..HEADER_SIZE]);
    let header = SnapshotHeader::from_bytes(&header_bytes);

    if header.magic != MAGIC_ARRAY {
        return Err(StoreError::corrupt(
            0,
            format!(
                "magic bytes not found: {:02x}{:02x}{:02x}{:02x}",
                header.magic[0], header.magic[1], header.magic[2], header.magic[3]
            ),
        ));
    }
    if header.version != FORMAT_VERSION {
        return Err(StoreError::corrupt(4, format!("unsupported format version {}", header.version)));
    }

    let available = (data.len() - HEADER_SIZE) as u64;
    if available != header.payload_len {
        return Err(StoreError::corrupt(
            HEADER_SIZE as u64,
            format!("payload length {} does not match {} available bytes", header.payload_len, available),
        ));
    }

    let payload = &data[HEADER_SIZE..];
    let computed = crc32c::crc32c(payload);
    if computed != header.checksum {
        return Err(StoreError::corrupt(
            HEADER_SIZE as u64,
            format!("checksum mismatch: expected 0x{:08x}, got 0x{:08x}", header.checksum, computed),
        ));
    }

    let mut map = HashMap::new();
    let mut pos = 0usize;
    while pos < payload.len() {
        let offset = (HEADER_SIZE + pos) as u64;
        if payload.len() - pos < ENTRY_PREFIX_SIZE {
            return Err(StoreError::corrupt(offset, "entry length prefix truncated"));
        }
        let key_len = read_u32(&payload[pos..pos + 4]) as usize;
        let value_len = read_u32(&payload[pos + 4..pos + 8]) as usize;
        let key_start = pos + ENTRY_PREFIX_SIZE;
        // Lengths come from the file; never add them unchecked on 32-bit targets
        let end = key_start
            .checked_add(key_len)
            .and_then(|value_start| value_start.checked_add(value_len))
            .filter(|&end| end <= payload.len());
        let end = match end {
            Some(end) => end,
            None => {
                let needed = ENTRY_PREFIX_SIZE as u64 + key_len as u64 + value_len as u64;
                return Err(StoreError::corrupt(
                    offset,
                    format!("entry needs {} bytes, only {} remain", needed, payload.len() - pos),
                ));
            }
        };
        let value_start = key_start + key_len;

        let key = std::str::from_utf8(&payload[key_start..value_start])
            .map_err(|e| StoreError::corrupt(offset, format!("key is not UTF-8: {}", e)))?;
        let value = std::str::from_utf8(&payload[value_start..end])
            .map_err(|e| StoreError::corrupt(offset, format!("value is not UTF-8: {}", e)))?;
        if key.is_empty() {
            return Err(StoreError::corrupt(offset, "empty key"));
        }
        if map.insert(key.to_owned(), value.to_owned()).is_some() {
            return Err(StoreError::corrupt(offset, format!("duplicate key {:?}", key)));
        }
        pos = end;
    }

    if map.len() as u64 != header.entry_count {
        return Err(StoreError::corrupt(
            8,
            format!("header promises {} entries, found {}", header.entry_count, map.len()),
        ));
    }

    Ok(map)
}
