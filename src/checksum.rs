//! Advisory CRC32 verification.
//!
//! EVTX carries three IEEE CRC32 checksums: one over the file header, one
//! over each chunk header, and one over each chunk's record area. All
//! verification is advisory: a mismatch becomes a diagnostic warning naming
//! the range that failed, never a fatal error.

use crc32fast::Hasher;

use crate::err::{EvtxError, Result};
use crate::utils::bytes;

/// CRC32 of a single contiguous range.
fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Verify the file header checksum: stored at offset 120, computed over
/// bytes `[0, 120)`.
pub(crate) fn verify_file_header(header: &[u8]) -> Result<()> {
    let expected = bytes::read_u32_le_r(header, 120, "file header checksum")?;
    let computed = crc32(bytes::slice_r(header, 0, 120, "file header checksum range")?);

    if computed != expected {
        return Err(EvtxError::ChecksumMismatch {
            what: "file header",
            expected,
            computed,
        });
    }
    Ok(())
}

/// Verify the chunk header checksum: stored at offset 124, computed over
/// bytes `[0, 120) ∪ [128, 512)` (the flags word and the stored checksum
/// are skipped, the string and template tables are included).
pub(crate) fn verify_chunk_header(chunk: &[u8]) -> Result<()> {
    let expected = bytes::read_u32_le_r(chunk, 124, "chunk header checksum")?;

    let mut hasher = Hasher::new();
    hasher.update(bytes::slice_r(chunk, 0, 120, "chunk header checksum range")?);
    hasher.update(bytes::slice_r(chunk, 128, 512 - 128, "chunk header checksum range")?);
    let computed = hasher.finalize();

    if computed != expected {
        return Err(EvtxError::ChecksumMismatch {
            what: "chunk header",
            expected,
            computed,
        });
    }
    Ok(())
}

/// Verify the record-area checksum: stored at chunk offset 52, computed
/// over `[512, free_space_offset)`.
pub(crate) fn verify_chunk_records(chunk: &[u8], free_space_offset: u32) -> Result<()> {
    let expected = bytes::read_u32_le_r(chunk, 52, "records checksum")?;

    let end = (free_space_offset as usize).min(chunk.len());
    if end <= 512 {
        // Empty record area checksums to the CRC of nothing; skip.
        return Ok(());
    }
    let computed = crc32(bytes::slice_r(chunk, 512, end - 512, "records checksum range")?);

    if computed != expected {
        return Err(EvtxError::ChecksumMismatch {
            what: "chunk records",
            expected,
            computed,
        });
    }
    Ok(())
}
