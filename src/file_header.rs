use std::io::{Cursor, Read, Seek, SeekFrom};

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};

use crate::err::{EvtxError, Result};

/// Chunks are fixed 64 KiB blocks.
pub const EVTX_CHUNK_SIZE: usize = 65536;
/// The file header occupies one 4096-byte block.
pub const EVTX_FILE_HEADER_BLOCK_SIZE: usize = 4096;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u32 {
        /// The file was not closed cleanly; header counters may lag the chunks.
        const DIRTY = 0x1;
        /// The file reached its maximum size.
        const FULL = 0x2;
        /// Checksums were not maintained by the writer.
        const NO_CRC = 0x4;
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EvtxFileHeader {
    pub first_chunk_number: u64,
    pub last_chunk_number: u64,
    pub next_record_id: u64,
    pub header_size: u32,
    pub minor_version: u16,
    pub major_version: u16,
    pub header_block_size: u16,
    pub chunk_count: u16,
    pub flags: HeaderFlags,
    // Checksum is of first 120 bytes of header.
    pub checksum: u32,
}

impl EvtxFileHeader {
    pub fn from_reader<T: Read + Seek>(stream: &mut T) -> Result<EvtxFileHeader> {
        let mut magic = [0_u8; 8];
        stream.read_exact(&mut magic)?;

        if &magic != b"ElfFile\x00" {
            return Err(EvtxError::BadFileMagic { magic });
        }

        let first_chunk_number = stream.read_u64::<LittleEndian>()?;
        let last_chunk_number = stream.read_u64::<LittleEndian>()?;
        let next_record_id = stream.read_u64::<LittleEndian>()?;
        let header_size = stream.read_u32::<LittleEndian>()?;
        let minor_version = stream.read_u16::<LittleEndian>()?;
        let major_version = stream.read_u16::<LittleEndian>()?;
        let header_block_size = stream.read_u16::<LittleEndian>()?;
        let chunk_count = stream.read_u16::<LittleEndian>()?;

        // Unused.
        stream.seek(SeekFrom::Current(76))?;

        // Unknown bits are tolerated; the three documented ones are kept.
        let flags = HeaderFlags::from_bits_truncate(stream.read_u32::<LittleEndian>()?);
        let checksum = stream.read_u32::<LittleEndian>()?;

        Ok(EvtxFileHeader {
            first_chunk_number,
            last_chunk_number,
            next_record_id,
            header_size,
            minor_version,
            major_version,
            header_block_size,
            chunk_count,
            flags,
            checksum,
        })
    }

    pub fn from_buf(buf: &[u8]) -> Result<EvtxFileHeader> {
        // The block is 4096 bytes but only the first 128 are meaningful; a
        // truncated tail past that is tolerated.
        if buf.len() < 128 {
            return Err(EvtxError::Truncated {
                what: "file header",
                offset: 0,
                need: 128,
                have: buf.len(),
            });
        }
        let mut cursor = Cursor::new(buf);
        EvtxFileHeader::from_reader(&mut cursor)
    }

    /// Absolute offsets of every 64 KiB block that could hold a chunk.
    ///
    /// The stride starts at `header_block_size` and runs while a full chunk
    /// still fits in `data_len`. Whether a candidate actually carries the
    /// `ElfChnk\0` magic is the chunk parser's concern; zeroed or torn
    /// blocks are skipped there, not here.
    pub fn chunk_offsets(&self, data_len: usize) -> impl Iterator<Item = usize> {
        let start = self.header_block_size as usize;
        (0_usize..)
            .map(move |k| start + k * EVTX_CHUNK_SIZE)
            .take_while(move |&offset| {
                offset
                    .checked_add(EVTX_CHUNK_SIZE)
                    .map(|end| end <= data_len)
                    .unwrap_or(false)
            })
    }
}
