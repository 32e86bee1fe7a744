use serde::Serialize;

use crate::err::{EvtxError, Result};
use crate::utils::bytes;
use crate::utils::time::format_filetime;

pub(crate) const RECORD_MAGIC: [u8; 4] = [0x2A, 0x2A, 0x00, 0x00];

/// Fixed part of a record frame: magic, size, id, written time. The frame
/// then carries `size - 28` payload bytes and a trailing size copy.
pub(crate) const RECORD_HEADER_SIZE: usize = 24;
pub(crate) const RECORD_ENVELOPE_SIZE: usize = RECORD_HEADER_SIZE + 4;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EvtxRecordHeader {
    pub size: u32,
    pub record_id: u64,
    /// Windows FILETIME: 100-ns ticks since 1601-01-01 UTC.
    pub written_filetime: u64,
}

impl EvtxRecordHeader {
    pub(crate) fn from_buf(buf: &[u8], offset: usize) -> Result<EvtxRecordHeader> {
        let magic = bytes::read_array_r::<4>(buf, offset, "record magic")?;
        if magic != RECORD_MAGIC {
            return Err(EvtxError::BadRecordMagic {
                offset: offset as u64,
                magic,
            });
        }

        Ok(EvtxRecordHeader {
            size: bytes::read_u32_le_r(buf, offset + 4, "record size")?,
            record_id: bytes::read_u64_le_r(buf, offset + 8, "record id")?,
            written_filetime: bytes::read_u64_le_r(buf, offset + 16, "record written time")?,
        })
    }

    pub fn timestamp(&self) -> String {
        format_filetime(self.written_filetime).unwrap_or_default()
    }
}

/// A fully decoded record, payload serialised per the configured output
/// format (XML text or JSON text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedRecord {
    pub record_id: u64,
    /// The frame's written time as ISO-8601 (`yyyy-MM-ddTHH:mm:ss.fffffffZ`).
    pub timestamp: String,
    pub chunk_index: u32,
    pub data: String,
}

/// A framed record inside a chunk, payload still undecoded.
#[derive(Debug, Clone)]
pub(crate) struct RecordFrame<'a> {
    pub header: EvtxRecordHeader,
    /// Chunk-relative offset of the frame start.
    pub offset: usize,
    /// The BinXml payload (`size - 28` bytes).
    pub payload: &'a [u8],
    /// The trailing size copy; must equal `header.size` (advisory).
    pub trailing_size: u32,
}

impl<'a> RecordFrame<'a> {
    /// Slice a full frame out of chunk data. The caller has already
    /// validated that `offset + size` stays inside the record area.
    pub(crate) fn from_chunk(chunk_data: &'a [u8], offset: usize) -> Result<RecordFrame<'a>> {
        let header = EvtxRecordHeader::from_buf(chunk_data, offset)?;

        let size = header.size as usize;
        if size < RECORD_ENVELOPE_SIZE {
            return Err(EvtxError::Truncated {
                what: "record frame",
                offset: offset as u64,
                need: RECORD_ENVELOPE_SIZE,
                have: size,
            });
        }

        let payload = bytes::slice_r(
            chunk_data,
            offset + RECORD_HEADER_SIZE,
            size - RECORD_ENVELOPE_SIZE,
            "record payload",
        )?;
        let trailing_size =
            bytes::read_u32_le_r(chunk_data, offset + size - 4, "record trailing size")?;

        Ok(RecordFrame {
            header,
            offset,
            payload,
            trailing_size,
        })
    }
}
