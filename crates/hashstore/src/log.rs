//! Append-only log files.
//!
//! A log is named `log-<id>` inside its store's directory (`<root>/<namespace>/s0/log-<id>`).
//! Only the store's current log accepts appends; once the store rotates to a
//! successor, the prior log's bytes are immutable until a later compaction
//! removes the whole file.

use std::fs::File;
use std::io::{self, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::frame::{FrameError, Record};

/// Build the path of log `log_id` inside `dir`.
pub fn log_path(dir: &Path, log_id: u32) -> PathBuf {
    dir.join(format!("log-{:010}", log_id))
}

/// Location of a record within its log: where the framed record starts and
/// how many payload bytes follow its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPointer {
    /// Id of the log file.
    pub log_id: u32,
    /// Absolute byte offset of the start of the framed record.
    pub offset: u64,
    /// Length of the record's payload in bytes.
    pub length: u32,
}

/// Append-only writer for a single log file.
pub struct LogWriter {
    file: File,
    path: PathBuf,
    log_id: u32,
    size: u64,
}

impl LogWriter {
    /// Create a brand new, empty log file.
    pub fn create(dir: &Path, log_id: u32) -> Result<Self> {
        let path = log_path(dir, log_id);
        let file = crate::fs::create(&path)?;
        Ok(LogWriter {
            file,
            path,
            log_id,
            size: 0,
        })
    }

    /// Open an existing log for continued appends, recovering from a crash
    /// mid-write.
    ///
    /// The file is scanned from the start. If the very last record fails
    /// its crc check, the file is truncated just before that record (a
    /// torn write from an unclean shutdown). A crc failure on any earlier
    /// record is a hard error — the store cannot tell which later records
    /// are trustworthy.
    pub fn open_for_append(dir: &Path, log_id: u32) -> Result<Self> {
        let path = log_path(dir, log_id);
        let mut file = crate::fs::open_read_write(&path)?;

        let mut good_end: u64 = 0;
        loop {
            let pos_before = file.stream_position()?;
            match Record::read_from(&mut file) {
                Ok(Some(_)) => {
                    good_end = file.stream_position()?;
                }
                Ok(None) => break,
                Err(FrameError::Io(e)) => return Err(Error::Io(e)),
                Err(_) => {
                    // Crc mismatch or truncation. Acceptable only if this
                    // is the tail of the file.
                    let total_len = file.metadata()?.len();
                    let is_tail = pos_before < total_len;
                    if is_tail {
                        // Truncate to the last known-good record boundary.
                        file.set_len(good_end)?;
                        break;
                    } else {
                        return Err(Error::Corrupt(format!(
                            "log {} has a corrupt record before its tail",
                            log_id
                        )));
                    }
                }
            }
        }

        file.seek(SeekFrom::Start(good_end))?;
        Ok(LogWriter {
            file,
            path,
            log_id,
            size: good_end,
        })
    }

    /// Append one record, returning its location for the hash table.
    pub fn append(&mut self, record: &Record) -> Result<LogPointer> {
        if record.payload.is_empty() {
            return Err(Error::InvalidArgument(
                "record payload must be non-empty".into(),
            ));
        }
        let offset = self.size;
        let bytes = record.to_bytes();
        self.file.write_all(&bytes)?;
        self.size += bytes.len() as u64;
        Ok(LogPointer {
            log_id: self.log_id,
            offset,
            length: record.payload.len() as u32,
        })
    }

    /// fsync the file, retrying once on transient failure.
    pub fn sync(&mut self) -> Result<()> {
        match self.file.sync_all() {
            Ok(()) => Ok(()),
            Err(_) => Ok(self.file.sync_all()?),
        }
    }

    /// Current size of the log in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// This log's id.
    pub fn log_id(&self) -> u32 {
        self.log_id
    }

    /// Path of this log on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and mark the log as immutable going forward. Sealing is a
    /// bookkeeping operation only (there is no on-disk seal marker); the
    /// store simply stops directing new appends at this log's id.
    pub fn seal(mut self) -> Result<u64> {
        self.sync()?;
        Ok(self.size)
    }
}

/// Read-only accessor for a sealed or active log.
pub struct LogReader {
    file: BufReader<File>,
    log_id: u32,
}

impl LogReader {
    /// Open a log for reading.
    pub fn open(dir: &Path, log_id: u32) -> Result<Self> {
        let path = log_path(dir, log_id);
        let file = crate::fs::open_read(&path)?;
        Ok(LogReader {
            file: BufReader::new(file),
            log_id,
        })
    }

    /// Read and validate the framed record starting at `offset`.
    pub fn read_record_at(&mut self, offset: u64) -> Result<Record> {
        self.file.seek(SeekFrom::Start(offset))?;
        match Record::read_from(&mut self.file) {
            Ok(Some(rec)) => Ok(rec),
            Ok(None) => Err(Error::Corrupt(format!(
                "log {} offset {} points past end of file",
                self.log_id, offset
            ))),
            Err(FrameError::Io(e)) => Err(Error::Io(e)),
            Err(e) => Err(Error::Corrupt(e.to_string())),
        }
    }

    /// Iterate every record in the log from the start, in order, yielding
    /// `(offset, record)` pairs. Used by compaction to scan a store's logs
    /// when rebuilding from scratch is cheaper than following the table.
    pub fn iter_from_start(&mut self) -> Result<Vec<(u64, Record)>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut out = Vec::new();
        loop {
            let offset = self.file.stream_position()?;
            match Record::read_from(&mut self.file) {
                Ok(Some(rec)) => out.push((offset, rec)),
                Ok(None) => break,
                Err(FrameError::Io(e)) => return Err(Error::Io(e)),
                Err(e) => return Err(Error::Corrupt(e.to_string())),
            }
        }
        Ok(out)
    }
}

/// Remove a log file, tolerating an already-missing file.
pub fn remove_log(dir: &Path, log_id: u32) -> io::Result<()> {
    match std::fs::remove_file(log_path(dir, log_id)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_common::Key;
    use tempfile::tempdir;

    fn record(byte: u8) -> Record {
        Record {
            key: Key::new([byte; 32]),
            expires_at: 0,
            created_at: 19700,
            flags: 0,
            payload: vec![byte; 16],
        }
    }

    #[test]
    fn append_then_read_back() {
        let dir = tempdir().unwrap();
        let mut writer = LogWriter::create(dir.path(), 1).unwrap();
        let ptr1 = writer.append(&record(1)).unwrap();
        let ptr2 = writer.append(&record(2)).unwrap();
        writer.sync().unwrap();

        let mut reader = LogReader::open(dir.path(), 1).unwrap();
        let r1 = reader.read_record_at(ptr1.offset).unwrap();
        let r2 = reader.read_record_at(ptr2.offset).unwrap();
        assert_eq!(r1.payload, vec![1u8; 16]);
        assert_eq!(r2.payload, vec![2u8; 16]);
    }

    #[test]
    fn recovers_from_torn_tail_write() {
        let dir = tempdir().unwrap();
        {
            let mut writer = LogWriter::create(dir.path(), 1).unwrap();
            writer.append(&record(1)).unwrap();
            writer.append(&record(2)).unwrap();
            writer.sync().unwrap();
        }
        // Simulate a torn write: truncate off the last few bytes of the
        // second record.
        let path = log_path(dir.path(), 1);
        let full_len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full_len - 3).unwrap();

        let writer = LogWriter::open_for_append(dir.path(), 1).unwrap();
        // Only the first record should have survived recovery.
        let mut reader = LogReader::open(dir.path(), 1).unwrap();
        let recovered = reader.iter_from_start().unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(writer.size(), recovered[0].0 + recovered[0].1.to_bytes().len() as u64);
    }

    #[test]
    fn hard_error_on_corruption_before_tail() {
        let dir = tempdir().unwrap();
        {
            let mut writer = LogWriter::create(dir.path(), 1).unwrap();
            writer.append(&record(1)).unwrap();
            writer.append(&record(2)).unwrap();
            writer.sync().unwrap();
        }
        let path = log_path(dir.path(), 1);
        let mut bytes = std::fs::read(&path).unwrap();
        // Flip a byte inside the first record's payload, well before the
        // end of the file.
        bytes[40] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        let err = LogWriter::open_for_append(dir.path(), 1).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn rejects_empty_payload() {
        let dir = tempdir().unwrap();
        let mut writer = LogWriter::create(dir.path(), 1).unwrap();
        let mut rec = record(1);
        rec.payload.clear();
        let err = writer.append(&rec).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
