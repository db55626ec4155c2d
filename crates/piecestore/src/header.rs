//! `PieceHeader`: a small length-prefixed, protobuf-like structure appended
//! to the end of every piece's payload. The trailing 4 bytes of a committed
//! record always hold the header's own length so a reader can locate it
//! without parsing the data portion first.
//!
//! Wire shape: `data | field* | header_len(u32 BE)`, where each field is
//! `tag(u8) | len(u16 BE) | value[len]`. Unknown tags are skipped rather
//! than rejected, so a future field can be added without breaking readers
//! of the current version.

use byteorder::{BigEndian, ByteOrder};
use core_common::Key;

use crate::error::{Error, Result};

const TAG_HASH: u8 = 1;
const TAG_HASH_ALGORITHM: u8 = 2;
const TAG_ORDER_LIMIT_PIECE_ID: u8 = 3;
const TAG_CREATED_AT: u8 = 4;

const TRAILER_LEN: usize = 4;

/// Hash algorithm used to bind a piece header to its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-256.
    Sha256,
    /// BLAKE3, the primary/default algorithm.
    Blake3,
}

impl HashAlgorithm {
    fn to_u8(self) -> u8 {
        match self {
            HashAlgorithm::Sha256 => 0,
            HashAlgorithm::Blake3 => 1,
        }
    }

    fn from_u8(b: u8) -> Result<HashAlgorithm> {
        match b {
            0 => Ok(HashAlgorithm::Sha256),
            1 => Ok(HashAlgorithm::Blake3),
            other => Err(Error::Corrupt(format!("unknown hash algorithm tag {other}"))),
        }
    }

    /// Hash `data` with this algorithm, returning a 32-byte digest.
    pub fn hash(self, data: &[u8]) -> [u8; 32] {
        match self {
            HashAlgorithm::Sha256 => {
                use sha2::{Digest, Sha256};
                let mut hasher = Sha256::new();
                hasher.update(data);
                let digest = hasher.finalize();
                let mut out = [0u8; 32];
                out.copy_from_slice(&digest);
                out
            }
            HashAlgorithm::Blake3 => *blake3::hash(data).as_bytes(),
        }
    }
}

/// The minimal slice of an order limit this header needs: the piece id the
/// satellite authorized this write for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrderLimit {
    /// The authorized piece id, when the writer was given one.
    pub piece_id: Option<Key>,
}

/// The trailing structure appended to every committed piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceHeader {
    /// The declared hash of the data portion.
    pub hash: [u8; 32],
    /// Which algorithm `hash` was computed with.
    pub hash_algorithm: HashAlgorithm,
    /// The order limit this write was authorized under.
    pub order_limit: OrderLimit,
    /// Unix timestamp the piece was created.
    pub created_at: i64,
}

impl PieceHeader {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        write_field(&mut out, TAG_HASH, &self.hash);
        write_field(&mut out, TAG_HASH_ALGORITHM, &[self.hash_algorithm.to_u8()]);
        if let Some(piece_id) = &self.order_limit.piece_id {
            write_field(&mut out, TAG_ORDER_LIMIT_PIECE_ID, piece_id.as_bytes());
        }
        let mut created_at_bytes = [0u8; 8];
        BigEndian::write_i64(&mut created_at_bytes, self.created_at);
        write_field(&mut out, TAG_CREATED_AT, &created_at_bytes);
        out
    }

    fn decode(bytes: &[u8]) -> Result<PieceHeader> {
        let mut hash: Option<[u8; 32]> = None;
        let mut hash_algorithm: Option<HashAlgorithm> = None;
        let mut piece_id: Option<Key> = None;
        let mut created_at: Option<i64> = None;

        let mut cursor = 0usize;
        while cursor < bytes.len() {
            if cursor + 3 > bytes.len() {
                return Err(Error::Corrupt("truncated header field".into()));
            }
            let tag = bytes[cursor];
            let len = BigEndian::read_u16(&bytes[cursor + 1..cursor + 3]) as usize;
            let value_start = cursor + 3;
            let value_end = value_start + len;
            if value_end > bytes.len() {
                return Err(Error::Corrupt("header field overruns buffer".into()));
            }
            let value = &bytes[value_start..value_end];

            match tag {
                TAG_HASH => {
                    if value.len() != 32 {
                        return Err(Error::Corrupt("hash field is not 32 bytes".into()));
                    }
                    let mut buf = [0u8; 32];
                    buf.copy_from_slice(value);
                    hash = Some(buf);
                }
                TAG_HASH_ALGORITHM => {
                    if value.len() != 1 {
                        return Err(Error::Corrupt("hash_algorithm field is not 1 byte".into()));
                    }
                    hash_algorithm = Some(HashAlgorithm::from_u8(value[0])?);
                }
                TAG_ORDER_LIMIT_PIECE_ID => {
                    if value.len() != 32 {
                        return Err(Error::Corrupt("piece_id field is not 32 bytes".into()));
                    }
                    let mut buf = [0u8; 32];
                    buf.copy_from_slice(value);
                    piece_id = Some(Key::new(buf));
                }
                TAG_CREATED_AT => {
                    if value.len() != 8 {
                        return Err(Error::Corrupt("created_at field is not 8 bytes".into()));
                    }
                    created_at = Some(BigEndian::read_i64(value));
                }
                _ => {
                    // Unknown tag: skip forward, tolerating future fields.
                }
            }
            cursor = value_end;
        }

        Ok(PieceHeader {
            hash: hash.ok_or_else(|| Error::Corrupt("header missing hash field".into()))?,
            hash_algorithm: hash_algorithm
                .ok_or_else(|| Error::Corrupt("header missing hash_algorithm field".into()))?,
            order_limit: OrderLimit { piece_id },
            created_at: created_at
                .ok_or_else(|| Error::Corrupt("header missing created_at field".into()))?,
        })
    }

    /// Append this header's encoding, plus its own length trailer, onto
    /// `payload` (which already holds the piece's data bytes).
    pub fn append_to(&self, payload: &mut Vec<u8>) {
        let encoded = self.encode();
        payload.extend_from_slice(&encoded);
        let mut len_bytes = [0u8; TRAILER_LEN];
        BigEndian::write_u32(&mut len_bytes, encoded.len() as u32);
        payload.extend_from_slice(&len_bytes);
    }

    /// Split a committed payload into its data portion and parsed header.
    pub fn split_from(payload: &[u8]) -> Result<(&[u8], PieceHeader)> {
        if payload.len() < TRAILER_LEN {
            return Err(Error::Corrupt("payload shorter than header trailer".into()));
        }
        let (rest, len_bytes) = payload.split_at(payload.len() - TRAILER_LEN);
        let header_len = BigEndian::read_u32(len_bytes) as usize;
        if header_len > rest.len() {
            return Err(Error::Corrupt("header length exceeds payload".into()));
        }
        let (data, header_bytes) = rest.split_at(rest.len() - header_len);
        let header = PieceHeader::decode(header_bytes)?;
        Ok((data, header))
    }
}

fn write_field(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
    out.push(tag);
    let mut len_bytes = [0u8; 2];
    BigEndian::write_u16(&mut len_bytes, value.len() as u16);
    out.extend_from_slice(&len_bytes);
    out.extend_from_slice(value);
}

/// `pieceValid(pieceID, bytes)`: extracts the trailing header, recomputes
/// the declared hash over the data portion, and checks it against the
/// header's declared hash and (if present) the authorized piece id. Any
/// byte modification inside the data portion, or any truncation, causes
/// this to return `false`.
pub fn piece_valid(piece_id: &Key, bytes: &[u8]) -> bool {
    let (data, header) = match PieceHeader::split_from(bytes) {
        Ok(parts) => parts,
        Err(_) => return false,
    };
    if let Some(authorized) = header.order_limit.piece_id {
        if authorized != *piece_id {
            return false;
        }
    }
    header.hash_algorithm.hash(data) == header.hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(piece_id: Option<Key>) -> PieceHeader {
        PieceHeader {
            hash: [0u8; 32],
            hash_algorithm: HashAlgorithm::Blake3,
            order_limit: OrderLimit { piece_id },
            created_at: 1_700_000_000,
        }
    }

    fn build_payload(data: &[u8], piece_id: Option<Key>) -> Vec<u8> {
        let mut header = sample_header(piece_id);
        header.hash = header.hash_algorithm.hash(data);
        let mut payload = data.to_vec();
        header.append_to(&mut payload);
        payload
    }

    #[test]
    fn round_trips_through_split_from() {
        let payload = build_payload(b"some piece bytes", None);
        let (data, header) = PieceHeader::split_from(&payload).unwrap();
        assert_eq!(data, b"some piece bytes");
        assert_eq!(header.hash_algorithm, HashAlgorithm::Blake3);
    }

    #[test]
    fn piece_valid_accepts_unmodified_payload() {
        let piece_id = Key::new([7u8; 32]);
        let payload = build_payload(b"data portion", Some(piece_id));
        assert!(piece_valid(&piece_id, &payload));
    }

    #[test]
    fn piece_valid_rejects_any_single_byte_flip_in_data() {
        let piece_id = Key::new([7u8; 32]);
        let payload = build_payload(b"0123456789", Some(piece_id));
        let data_len = payload.len() - payload_trailer_len(&payload);
        for i in 0..data_len {
            let mut mutated = payload.clone();
            mutated[i] ^= 0xff;
            assert!(!piece_valid(&piece_id, &mutated), "byte {i} flip should invalidate");
        }
    }

    #[test]
    fn piece_valid_rejects_any_truncation() {
        let piece_id = Key::new([7u8; 32]);
        let payload = build_payload(b"0123456789", Some(piece_id));
        for n in 0..payload.len() {
            assert!(!piece_valid(&piece_id, &payload[..n]), "truncation to {n} should invalidate");
        }
    }

    #[test]
    fn piece_valid_rejects_mismatched_piece_id() {
        let piece_id = Key::new([7u8; 32]);
        let payload = build_payload(b"data portion", Some(piece_id));
        let other = Key::new([9u8; 32]);
        assert!(!piece_valid(&other, &payload));
    }

    fn payload_trailer_len(payload: &[u8]) -> usize {
        let (_, header) = PieceHeader::split_from(payload).unwrap();
        let mut tmp = Vec::new();
        header.append_to(&mut tmp);
        tmp.len()
    }
}
