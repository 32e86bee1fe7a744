use hashbrown::HashMap;

use crate::diagnostics::Diagnostics;
use crate::err::Result;
use crate::guid::Guid;
use crate::utils::bytes;
use crate::ChunkOffset;

/// On-disk template definition header: u32 next-in-chain, 16-byte GUID,
/// u32 body size. The body (starting with a fragment header) follows.
pub(crate) const TEMPLATE_HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TemplateDescriptor {
    pub guid: Guid,
    /// Chunk-relative offset of the BinXml body.
    pub body_offset: usize,
    pub body_size: u32,
}

/// Per-chunk template catalogue.
///
/// Keyed by the chunk-relative offset of the definition. Preloaded by
/// walking the 32-bucket chained hash table in the chunk header; grows when
/// records carry inline definitions or back-reference offsets the table
/// never mentioned (legitimate for templates nested in embedded BinXml).
/// Offsets are chunk-local, so the catalogue dies with the chunk; only the
/// GUID-keyed compiled-template cache outlives it.
#[derive(Debug, Default)]
pub(crate) struct TemplateCatalogue {
    map: HashMap<ChunkOffset, TemplateDescriptor, ahash::RandomState>,
}

impl TemplateCatalogue {
    pub(crate) fn populate(
        data: &[u8],
        bucket_heads: &[ChunkOffset],
        chunk_index: u32,
        diagnostics: &mut Diagnostics,
    ) -> Self {
        let mut catalogue = TemplateCatalogue::default();

        for &head in bucket_heads.iter().filter(|&&head| head > 0) {
            let mut offset = head;
            loop {
                if offset == 0 {
                    break;
                }
                if catalogue.map.contains_key(&offset) {
                    // A cycle in the chain; stop following it.
                    diagnostics.warn_chunk(
                        chunk_index,
                        format!("template chain revisits offset {offset}"),
                    );
                    break;
                }

                match catalogue.ingest(data, offset, diagnostics) {
                    Ok(next_offset) => offset = next_offset,
                    Err(e) => {
                        diagnostics.warn_chunk(
                            chunk_index,
                            format!("bad template definition at offset {offset}: {e}"),
                        );
                        break;
                    }
                }
            }
        }

        catalogue
    }

    /// Read the definition header at `offset`, insert it, and return the
    /// next-in-chain offset.
    fn ingest(
        &mut self,
        data: &[u8],
        offset: ChunkOffset,
        diagnostics: &mut Diagnostics,
    ) -> Result<ChunkOffset> {
        let at = offset as usize;

        let next_offset = bytes::read_u32_le_r(data, at, "template next offset")?;
        let guid = Guid::from_buf(data, at + 4)?;
        let body_size = bytes::read_u32_le_r(data, at + 20, "template body size")?;

        let body_offset = at + TEMPLATE_HEADER_SIZE;
        // The body must stay inside the chunk.
        let _ = bytes::slice_r(data, body_offset, body_size as usize, "template body")?;

        self.map.insert(
            offset,
            TemplateDescriptor {
                guid,
                body_offset,
                body_size,
            },
        );
        diagnostics.template_definitions += 1;

        Ok(next_offset)
    }

    pub(crate) fn get(&self, offset: ChunkOffset) -> Option<&TemplateDescriptor> {
        self.map.get(&offset)
    }

    /// Fallback path: a record back-referenced a definition the pointer
    /// table never mentioned. Read it directly and remember it.
    pub(crate) fn insert_at(
        &mut self,
        data: &[u8],
        offset: ChunkOffset,
        diagnostics: &mut Diagnostics,
    ) -> Result<TemplateDescriptor> {
        if let Some(found) = self.map.get(&offset) {
            return Ok(found.clone());
        }

        self.ingest(data, offset, diagnostics)?;

        Ok(self
            .map
            .get(&offset)
            .cloned()
            .expect("ingest inserted this offset"))
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}
