//! Blob framing shared by every index slot payload

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::IndexError;

/// Magic (4) + CRC32 (4)
const HEADER_LEN: usize = 8;

pub(crate) fn encode_blob<T: Serialize>(magic: &[u8; 4], value: &T) -> Result<Bytes, IndexError> {
    let payload = bincode::serialize(value).map_err(|e| IndexError::Encode(e.to_string()))?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_slice(magic);
    buf.put_u32_le(crc32fast::hash(&payload));
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

pub(crate) fn decode_blob<T: DeserializeOwned>(
    magic: &[u8; 4],
    mut data: &[u8],
) -> Result<T, IndexError> {
    if data.len() < HEADER_LEN {
        return Err(IndexError::Truncated(data.len()));
    }

    let mut actual = [0u8; 4];
    data.copy_to_slice(&mut actual);
    if &actual != magic {
        return Err(IndexError::BadMagic {
            expected: *magic,
            actual,
        });
    }

    let expected = data.get_u32_le();
    let crc = crc32fast::hash(data);
    if crc != expected {
        return Err(IndexError::Checksum {
            expected,
            actual: crc,
        });
    }

    bincode::deserialize(data).map_err(|e| IndexError::Decode(e.to_string()))
}
