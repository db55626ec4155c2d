//! `PieceReader`: exposes the data portion of a committed piece plus its
//! parsed header and trash status.

use std::io::{self, Cursor, Read};

use core_common::Key;
use hashstore::ReadHandle;

use crate::error::{Error, Result};
use crate::header::{piece_valid, PieceHeader};

/// A piece read back from the store: the data portion (header stripped),
/// the parsed header, and whether the underlying record is trashed.
pub struct PieceReader {
    piece_id: Key,
    header: PieceHeader,
    data: Cursor<Vec<u8>>,
    trash: bool,
}

impl PieceReader {
    pub(crate) fn from_handle(piece_id: Key, handle: ReadHandle) -> Result<PieceReader> {
        let (data, header) = PieceHeader::split_from(&handle.payload)
            .map_err(|_| Error::Corrupt("stored piece is missing a valid trailing header".into()))?;
        let data = data.to_vec();
        Ok(PieceReader {
            piece_id,
            header,
            data: Cursor::new(data),
            trash: handle.trash,
        })
    }

    /// The piece's parsed trailing header.
    pub fn header(&self) -> &PieceHeader {
        &self.header
    }

    /// Whether the underlying record currently carries the trash flag.
    pub fn is_trash(&self) -> bool {
        self.trash
    }

    /// The data portion's total length in bytes.
    pub fn len(&self) -> usize {
        self.data.get_ref().len()
    }

    /// Whether the data portion is empty.
    pub fn is_empty(&self) -> bool {
        self.data.get_ref().is_empty()
    }

    /// Re-run `pieceValid` over the bytes this reader holds.
    pub fn validate(&self) -> bool {
        let mut full = self.data.get_ref().clone();
        self.header.append_to(&mut full);
        piece_valid(&self.piece_id, &full)
    }
}

impl Read for PieceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}
