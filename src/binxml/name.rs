use std::rc::Rc;

use crate::err::{EvtxError, Result};
use crate::string_cache::StringCache;
use crate::utils::bytes;
use crate::utils::cursor::SliceCursor;
use crate::utils::utf16::decode_utf16le;

/// A decoded chunk name-table entry.
///
/// On disk: u32 next-in-hash-chain, u16 hash, u16 character count, that many
/// UTF-16LE code units, and a terminating NUL code unit.
#[derive(Debug, PartialEq, Eq, Clone)]
pub(crate) struct NameEntry {
    pub name: String,
    pub hash: u16,
    /// Total on-disk size: `10 + 2 * num_chars`. Needed to step over inline
    /// name entries embedded in a token stream.
    pub entry_len: usize,
}

impl NameEntry {
    pub(crate) fn from_buf(data: &[u8], offset: u32) -> Result<Rc<NameEntry>> {
        let offset = offset as usize;

        let hash = bytes::read_u16_le(data, offset + 4);
        let num_chars = bytes::read_u16_le(data, offset + 6);
        let (Some(hash), Some(num_chars)) = (hash, num_chars) else {
            return Err(EvtxError::MalformedName {
                offset: offset as u64,
            });
        };

        let char_bytes = match bytes::slice_r(data, offset + 8, num_chars as usize * 2, "name") {
            Ok(b) => b,
            Err(_) => {
                return Err(EvtxError::MalformedName {
                    offset: offset as u64,
                })
            }
        };

        Ok(Rc::new(NameEntry {
            name: decode_utf16le(char_bytes),
            hash,
            entry_len: 10 + num_chars as usize * 2,
        }))
    }
}

/// Read a name reference from a token stream: a u32 chunk-relative offset,
/// possibly followed by the entry itself.
///
/// If the offset equals the cursor position after the read, the entry is
/// inline and the cursor steps over it; otherwise it is a back-reference
/// resolved through the per-chunk cache. Either way the decoded entry ends
/// up cached for the rest of the chunk.
pub(crate) fn read_name_ref(
    cursor: &mut SliceCursor<'_>,
    cache: &mut StringCache,
) -> Result<Rc<NameEntry>> {
    let name_offset = cursor.u32("name offset")?;

    let entry = cache.get_or_decode(cursor.buf(), name_offset)?;
    if name_offset as usize == cursor.pos() {
        cursor.advance(entry.entry_len, "inline name entry")?;
    }

    Ok(entry)
}
