use std::rc::Rc;

use hashbrown::HashMap;

use crate::binxml::name::NameEntry;
use crate::diagnostics::Diagnostics;
use crate::err::Result;
use crate::ChunkOffset;

/// Per-chunk name table.
///
/// Names are addressed by chunk-relative offset. The cache is pre-seeded
/// from the 64-slot common-string offset table at chunk open and grows
/// lazily as records reference names outside it. Entries are shared between
/// all records of the chunk via `Rc`.
#[derive(Debug, Default)]
pub(crate) struct StringCache {
    map: HashMap<ChunkOffset, Rc<NameEntry>, ahash::RandomState>,
}

impl StringCache {
    /// Seed the cache from the common-string offset table. Malformed slots
    /// are advisory; the slot is simply left unseeded.
    pub(crate) fn populate(
        data: &[u8],
        offsets: &[ChunkOffset],
        chunk_index: u32,
        diagnostics: &mut Diagnostics,
    ) -> Self {
        let mut cache = StringCache::default();

        for &offset in offsets.iter().filter(|&&offset| offset > 0) {
            match NameEntry::from_buf(data, offset) {
                Ok(entry) => {
                    cache.map.insert(offset, entry);
                }
                Err(e) => diagnostics.warn_chunk(
                    chunk_index,
                    format!("bad common-string table entry at offset {offset}: {e}"),
                ),
            }
        }

        cache
    }

    /// Resolve a name by chunk-relative offset, decoding and caching it on
    /// first use.
    pub(crate) fn get_or_decode(&mut self, data: &[u8], offset: ChunkOffset) -> Result<Rc<NameEntry>> {
        if let Some(entry) = self.map.get(&offset) {
            return Ok(Rc::clone(entry));
        }

        let entry = NameEntry::from_buf(data, offset)?;
        self.map.insert(offset, Rc::clone(&entry));
        Ok(entry)
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}
