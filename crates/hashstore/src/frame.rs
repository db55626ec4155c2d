//! On-disk record framing for log files.
//!
//! ```text
//! key[32] | length[u32] | expires_at[u32] | created_at[u32] | flags[u8] | crc64[u64] | payload[length]
//! ```
//!
//! All integer fields are big-endian. `crc64` covers every preceding header
//! byte (key through flags) plus the payload; it does not cover itself.

use byteorder::{BigEndian, ByteOrder};
use core_common::Key;
use crc::{Crc, CRC_64_XZ};
use std::io::{self, Read, Write};

/// CRC-64/XZ, matching the "crc64 of the header and payload" framing named
/// in the on-disk layout.
static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// Bytes of fixed-width header preceding the payload (key through crc64).
pub const HEADER_LEN: usize = 32 + 4 + 4 + 4 + 1 + 8;

/// Bit flag set when the record is (possibly provisionally) trashed.
pub const FLAG_TRASH: u8 = 0b0000_0001;

/// One framed record as it appears on disk, header fields plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Content key.
    pub key: Key,
    /// Day-epoch at which the record expires, 0 = never.
    pub expires_at: u32,
    /// Day-epoch at which the record was created.
    pub created_at: u32,
    /// Header flag byte (bit 0 = trash).
    pub flags: u8,
    /// Record payload bytes.
    pub payload: Vec<u8>,
}

impl Record {
    /// Whether the trash flag bit is set.
    pub fn is_trash(&self) -> bool {
        self.flags & FLAG_TRASH != 0
    }

    /// Return a copy of this record with the trash flag set.
    pub fn marked_trash(&self) -> Record {
        let mut r = self.clone();
        r.flags |= FLAG_TRASH;
        r
    }

    /// Return a copy of this record with the trash flag cleared.
    pub fn marked_live(&self) -> Record {
        let mut r = self.clone();
        r.flags &= !FLAG_TRASH;
        r
    }

    /// Serialize the fixed header (everything but the payload and crc) into
    /// `out`, appending exactly `HEADER_LEN - 8` bytes.
    fn write_header_prefix(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.key.as_bytes());
        let mut buf4 = [0u8; 4];
        BigEndian::write_u32(&mut buf4, self.payload.len() as u32);
        out.extend_from_slice(&buf4);
        BigEndian::write_u32(&mut buf4, self.expires_at);
        out.extend_from_slice(&buf4);
        BigEndian::write_u32(&mut buf4, self.created_at);
        out.extend_from_slice(&buf4);
        out.push(self.flags);
    }

    /// Encode this record (header + crc64 + payload) for appending to a log.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(HEADER_LEN - 8);
        self.write_header_prefix(&mut prefix);

        let mut digest = CRC64.digest();
        digest.update(&prefix);
        digest.update(&self.payload);
        let crc = digest.finalize();

        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&prefix);
        let mut buf8 = [0u8; 8];
        BigEndian::write_u64(&mut buf8, crc);
        out.extend_from_slice(&buf8);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Write this record to `w`, returning the number of bytes written.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<u64> {
        let bytes = self.to_bytes();
        w.write_all(&bytes)?;
        Ok(bytes.len() as u64)
    }

    /// Read one framed record from `r`. Returns `Ok(None)` on a clean EOF
    /// before any header bytes have been read (the normal end of a log);
    /// any other short read or a crc mismatch is [`FrameError::Corrupt`].
    pub fn read_from<R: Read>(r: &mut R) -> Result<Option<Record>, FrameError> {
        let mut prefix = vec![0u8; HEADER_LEN - 8];
        match read_exact_or_eof(r, &mut prefix)? {
            ReadOutcome::Eof => return Ok(None),
            ReadOutcome::Short => {
                return Err(FrameError::Corrupt("truncated record header".into()))
            }
            ReadOutcome::Full => {}
        }

        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&prefix[0..32]);
        let length = BigEndian::read_u32(&prefix[32..36]) as usize;
        let expires_at = BigEndian::read_u32(&prefix[36..40]);
        let created_at = BigEndian::read_u32(&prefix[40..44]);
        let flags = prefix[44];

        let mut crc_bytes = [0u8; 8];
        r.read_exact(&mut crc_bytes)
            .map_err(|_| FrameError::Corrupt("truncated crc field".into()))?;
        let expected_crc = BigEndian::read_u64(&crc_bytes);

        let mut payload = vec![0u8; length];
        r.read_exact(&mut payload)
            .map_err(|_| FrameError::Corrupt("truncated payload".into()))?;

        let mut digest = CRC64.digest();
        digest.update(&prefix);
        digest.update(&payload);
        let actual_crc = digest.finalize();
        if actual_crc != expected_crc {
            return Err(FrameError::CrcMismatch);
        }

        Ok(Some(Record {
            key: Key::new(key_bytes),
            expires_at,
            created_at,
            flags,
            payload,
        }))
    }
}

/// Failure decoding a single framed record.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The record's crc64 did not match its header+payload bytes.
    #[error("crc64 mismatch")]
    CrcMismatch,
    /// The record was truncated or otherwise malformed.
    #[error("corrupt record: {0}")]
    Corrupt(String),
    /// Underlying I/O failure reading the record.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

enum ReadOutcome {
    Full,
    Short,
    Eof,
}

/// Like `read_exact`, but distinguishes "zero bytes read, clean EOF" from
/// "some bytes read, then EOF" (a truncated header vs. the end of the log).
fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Short
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(ReadOutcome::Full)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record {
            key: Key::new([7u8; 32]),
            expires_at: 0,
            created_at: 19700,
            flags: 0,
            payload: b"hello world".to_vec(),
        }
    }

    #[test]
    fn round_trips() {
        let rec = sample();
        let bytes = rec.to_bytes();
        let mut cursor = std::io::Cursor::new(bytes);
        let decoded = Record::read_from(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn detects_bit_flip() {
        let rec = sample();
        let mut bytes = rec.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let mut cursor = std::io::Cursor::new(bytes);
        let err = Record::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, FrameError::CrcMismatch));
    }

    #[test]
    fn detects_truncation() {
        let rec = sample();
        let bytes = rec.to_bytes();
        let truncated = &bytes[..bytes.len() - 2];
        let mut cursor = std::io::Cursor::new(truncated.to_vec());
        let err = Record::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, FrameError::Corrupt(_)));
    }

    #[test]
    fn clean_eof_at_boundary_returns_none() {
        let mut bytes = sample().to_bytes();
        bytes.extend(sample().marked_trash().to_bytes());
        let mut cursor = std::io::Cursor::new(bytes);
        assert!(Record::read_from(&mut cursor).unwrap().is_some());
        assert!(Record::read_from(&mut cursor).unwrap().is_some());
        assert!(Record::read_from(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn trash_flag_round_trips() {
        let rec = sample().marked_trash();
        assert!(rec.is_trash());
        let bytes = rec.to_bytes();
        let mut cursor = std::io::Cursor::new(bytes);
        let decoded = Record::read_from(&mut cursor).unwrap().unwrap();
        assert!(decoded.is_trash());
        assert!(decoded.marked_live().is_trash() == false);
    }
}
