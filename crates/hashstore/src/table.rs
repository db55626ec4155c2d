//! The on-disk hash table: a power-of-two-sized, open-addressed array of
//! fixed-width slots mapping a 32-byte key to its log location.
//!
//! The table is held in memory as a plain `Vec<Option<RecordRef>>` for the
//! lifetime of a `Store`; [`Table::load`]/[`Table::save_atomic`] are the
//! only places that touch the file directly. A full rewrite (the
//! write-tmp/fsync/rename sequence) only happens during compaction —
//! day-to-day inserts mutate a single slot of the in-memory copy and the
//! caller (`Store`) is responsible for persisting that one slot in place.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use core_common::Key;

use crate::error::{Error, Result};

/// Magic bytes identifying a table file.
pub const MAGIC: [u8; 4] = *b"HTBL";
/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;
/// Size of the table file header in bytes.
pub const HEADER_LEN: usize = 32;
/// Size of one fixed-width slot in bytes.
pub const SLOT_LEN: usize = 64;

const OCCUPIED: u8 = 1;
const EMPTY: u8 = 0;

/// Bit set on a [`RecordRef`] when the record is trashed (pending removal
/// after the grace period).
pub const FLAG_TRASH: u8 = 0b0000_0001;

/// A slot's payload: everything the table needs to locate and describe a
/// record without reading the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef {
    /// The record's key.
    pub key: Key,
    /// Log file holding the record.
    pub log_id: u32,
    /// Byte offset of the framed record within that log.
    pub offset: u64,
    /// Length of the record's payload.
    pub length: u32,
    /// Day-epoch expiration, 0 = never.
    pub expires_at: u32,
    /// Day-epoch creation time.
    pub created_at: u32,
    /// Flag byte (bit 0 = trash).
    pub flags: u8,
    /// Day-epoch at which the trash flag was set, meaningful only when
    /// `flags & FLAG_TRASH != 0`.
    pub trash_time: u32,
}

impl RecordRef {
    /// Whether the trash bit is set.
    pub fn is_trash(&self) -> bool {
        self.flags & FLAG_TRASH != 0
    }

    fn encode(&self) -> [u8; SLOT_LEN] {
        let mut buf = [0u8; SLOT_LEN];
        buf[0] = OCCUPIED;
        buf[1..33].copy_from_slice(self.key.as_bytes());
        BigEndian::write_u32(&mut buf[33..37], self.log_id);
        BigEndian::write_u64(&mut buf[37..45], self.offset);
        BigEndian::write_u32(&mut buf[45..49], self.length);
        BigEndian::write_u32(&mut buf[49..53], self.expires_at);
        BigEndian::write_u32(&mut buf[53..57], self.created_at);
        buf[57] = self.flags;
        BigEndian::write_u32(&mut buf[58..62], self.trash_time);
        buf
    }

    fn decode(buf: &[u8; SLOT_LEN]) -> Option<RecordRef> {
        if buf[0] != OCCUPIED {
            return None;
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&buf[1..33]);
        Some(RecordRef {
            key: Key::new(key),
            log_id: BigEndian::read_u32(&buf[33..37]),
            offset: BigEndian::read_u64(&buf[37..45]),
            length: BigEndian::read_u32(&buf[45..49]),
            expires_at: BigEndian::read_u32(&buf[49..53]),
            created_at: BigEndian::read_u32(&buf[53..57]),
            flags: buf[57],
            trash_time: BigEndian::read_u32(&buf[58..62]),
        })
    }
}

fn empty_slot_bytes() -> [u8; SLOT_LEN] {
    let mut buf = [0u8; SLOT_LEN];
    buf[0] = EMPTY;
    buf
}

/// The in-memory open-addressed table.
#[derive(Debug, Clone)]
pub struct Table {
    bits: u32,
    slots: Vec<Option<RecordRef>>,
    live_count: u64,
}

impl Table {
    /// Create an empty table sized to hold at least `min_slots` entries at
    /// the target load factor (50%), rounded up to the next power of two.
    pub fn for_expected_records(min_slots: usize, target_load_factor: f64) -> Table {
        let needed = ((min_slots as f64) / target_load_factor).ceil().max(1.0) as usize;
        let bits = needed.next_power_of_two().trailing_zeros().max(1);
        Table {
            bits,
            slots: vec![None; 1usize << bits],
            live_count: 0,
        }
    }

    /// Number of slots in the table (always a power of two).
    pub fn slot_count(&self) -> usize {
        1usize << self.bits
    }

    /// Number of live (occupied) slots.
    pub fn live_count(&self) -> u64 {
        self.live_count
    }

    fn start_index(&self, key: &Key) -> usize {
        key.top_bits(self.bits) as usize
    }

    /// Look up `key`, returning its slot contents if present. Probing
    /// stops at the first empty slot (a key cannot hop over a hole it was
    /// never inserted behind).
    pub fn lookup(&self, key: &Key) -> Option<&RecordRef> {
        let n = self.slot_count();
        let start = self.start_index(key);
        for step in 0..n {
            let idx = (start + step) % n;
            match &self.slots[idx] {
                Some(rec) if &rec.key == key => return Some(rec),
                Some(_) => continue,
                None => return None,
            }
        }
        None
    }

    /// Insert or overwrite `rec`. Returns the slot index that was written,
    /// so the caller can persist just that slot. Fails with
    /// [`Error::Corrupt`]-free `Capacity`-style behavior is not applicable
    /// here — tables are always sized with headroom by the store/compactor
    /// before this is called; a table that is genuinely full is a bug, so
    /// this returns an `Err` describing it rather than silently wrapping.
    pub fn insert(&mut self, rec: RecordRef) -> Result<usize> {
        let n = self.slot_count();
        let start = self.start_index(&rec.key);
        for step in 0..n {
            let idx = (start + step) % n;
            match &self.slots[idx] {
                Some(existing) if existing.key == rec.key => {
                    self.slots[idx] = Some(rec);
                    return Ok(idx);
                }
                Some(_) => continue,
                None => {
                    self.slots[idx] = Some(rec);
                    self.live_count += 1;
                    return Ok(idx);
                }
            }
        }
        Err(Error::Corrupt(
            "hash table has no empty slot to probe into".into(),
        ))
    }

    /// Iterate every live slot.
    pub fn iter_live(&self) -> impl Iterator<Item = &RecordRef> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    /// Absolute byte offset of slot `idx` within the table file.
    pub fn slot_file_offset(idx: usize) -> u64 {
        HEADER_LEN as u64 + (idx * SLOT_LEN) as u64
    }

    fn slot_bytes(&self, idx: usize) -> [u8; SLOT_LEN] {
        match &self.slots[idx] {
            Some(rec) => rec.encode(),
            None => empty_slot_bytes(),
        }
    }

    fn header_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC);
        BigEndian::write_u32(&mut buf[4..8], FORMAT_VERSION);
        BigEndian::write_u64(&mut buf[8..16], self.slot_count() as u64);
        BigEndian::write_u64(&mut buf[16..24], self.live_count);
        buf
    }

    /// Serialize the full table (header + every slot) to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.slot_count() * SLOT_LEN);
        out.extend_from_slice(&self.header_bytes());
        for idx in 0..self.slot_count() {
            out.extend_from_slice(&self.slot_bytes(idx));
        }
        out
    }

    /// Parse a table from its full on-disk byte representation. Only the
    /// current format version this engine writes is accepted; an
    /// unrecognized version is a hard `corrupt` error rather than a guess
    /// at forward-compatible parsing.
    pub fn from_bytes(bytes: &[u8]) -> Result<Table> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Corrupt("table file shorter than its header".into()));
        }
        if bytes[0..4] != MAGIC {
            return Err(Error::Corrupt("table file has the wrong magic".into()));
        }
        let format_version = BigEndian::read_u32(&bytes[4..8]);
        if format_version != FORMAT_VERSION {
            return Err(Error::Corrupt(format!(
                "unsupported table format version {}",
                format_version
            )));
        }
        let slot_count = BigEndian::read_u64(&bytes[8..16]) as usize;
        let expected_len = HEADER_LEN + slot_count * SLOT_LEN;
        if bytes.len() != expected_len {
            return Err(Error::Corrupt(format!(
                "table file length {} does not match slot_count {}",
                bytes.len(),
                slot_count
            )));
        }

        let mut slots = Vec::with_capacity(slot_count);
        let mut live_count = 0u64;
        for idx in 0..slot_count {
            let start = HEADER_LEN + idx * SLOT_LEN;
            let mut raw = [0u8; SLOT_LEN];
            raw.copy_from_slice(&bytes[start..start + SLOT_LEN]);
            let slot = RecordRef::decode(&raw);
            if slot.is_some() {
                live_count += 1;
            }
            slots.push(slot);
        }

        Ok(Table {
            bits: slot_count.trailing_zeros(),
            slots,
            live_count,
        })
    }

    /// Load a table from `path`.
    pub fn load(path: &Path) -> Result<Table> {
        let mut file = crate::fs::open_read(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Table::from_bytes(&bytes)
    }

    /// Atomically persist the full table: write to a `.tmp` sibling,
    /// fsync, then rename over `path`.
    pub fn save_atomic(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&self.to_bytes())?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Write a single slot's bytes to `path` at its fixed offset, without
    /// rewriting the rest of the file. Used for incremental inserts
    /// outside of compaction.
    pub fn persist_slot(path: &Path, idx: usize, rec: Option<&RecordRef>) -> Result<()> {
        use std::io::{Seek, SeekFrom};
        let mut file = crate::fs::open_read_write(path)?;
        file.seek(SeekFrom::Start(Table::slot_file_offset(idx)))?;
        let bytes = match rec {
            Some(r) => r.encode(),
            None => empty_slot_bytes(),
        };
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    }

    /// Rewrite just the header's live-count field in place.
    pub fn persist_live_count(path: &Path, live_count: u64) -> Result<()> {
        use std::io::{Seek, SeekFrom};
        let mut file = crate::fs::open_read_write(path)?;
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, live_count);
        file.seek(SeekFrom::Start(16))?;
        file.write_all(&buf)?;
        file.sync_all()?;
        Ok(())
    }
}
