use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::atomic::Ordering;

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, warn};

use crate::binxml::parser::{parse_record_payload, ParserContext, RecordData};
use crate::checksum;
use crate::compiled_template::CompiledTemplateCache;
use crate::diagnostics::Diagnostics;
use crate::err::{EvtxError, Result};
use crate::file_header::EVTX_CHUNK_SIZE;
use crate::json_output;
use crate::record::{ParsedRecord, RecordFrame, RECORD_ENVELOPE_SIZE, RECORD_HEADER_SIZE, RECORD_MAGIC};
use crate::settings::{OutputFormat, ParserSettings};
use crate::string_cache::StringCache;
use crate::template_catalogue::TemplateCatalogue;
use crate::utils::bytes;
use crate::xml_output;

pub(crate) const CHUNK_HEADER_SIZE: usize = 512;

/// Chunk flag: checksums were not maintained; advisory verification is
/// suppressed.
const CHUNK_FLAG_NO_CRC: u32 = 0x4;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EvtxChunkHeader {
    pub first_record_number: u64,
    pub last_record_number: u64,
    pub first_record_id: u64,
    pub last_record_id: u64,
    pub header_size: u32,
    pub last_record_offset: u32,
    pub free_space_offset: u32,
    pub records_checksum: u32,
    pub flags: u32,
    pub header_checksum: u32,
    pub common_string_offsets: [u32; 64],
    pub template_table_offsets: [u32; 32],
}

impl EvtxChunkHeader {
    pub fn from_reader<T: Read + Seek>(
        stream: &mut T,
        chunk_index: u32,
    ) -> Result<EvtxChunkHeader> {
        let mut magic = [0_u8; 8];
        stream.read_exact(&mut magic)?;

        if &magic != b"ElfChnk\x00" {
            return Err(EvtxError::BadChunkMagic { chunk_index, magic });
        }

        let first_record_number = stream.read_u64::<LittleEndian>()?;
        let last_record_number = stream.read_u64::<LittleEndian>()?;
        let first_record_id = stream.read_u64::<LittleEndian>()?;
        let last_record_id = stream.read_u64::<LittleEndian>()?;

        let header_size = stream.read_u32::<LittleEndian>()?;
        let last_record_offset = stream.read_u32::<LittleEndian>()?;
        let free_space_offset = stream.read_u32::<LittleEndian>()?;
        let records_checksum = stream.read_u32::<LittleEndian>()?;

        // Reserved.
        stream.seek(SeekFrom::Current(64))?;

        let flags = stream.read_u32::<LittleEndian>()?;
        let header_checksum = stream.read_u32::<LittleEndian>()?;

        let mut common_string_offsets = [0_u32; 64];
        stream.read_u32_into::<LittleEndian>(&mut common_string_offsets)?;

        let mut template_table_offsets = [0_u32; 32];
        stream.read_u32_into::<LittleEndian>(&mut template_table_offsets)?;

        Ok(EvtxChunkHeader {
            first_record_number,
            last_record_number,
            first_record_id,
            last_record_id,
            header_size,
            last_record_offset,
            free_space_offset,
            records_checksum,
            flags,
            header_checksum,
            common_string_offsets,
            template_table_offsets,
        })
    }

    pub fn from_buf(chunk_data: &[u8], chunk_index: u32) -> Result<EvtxChunkHeader> {
        let mut cursor = Cursor::new(chunk_data);
        EvtxChunkHeader::from_reader(&mut cursor, chunk_index)
    }

    fn no_crc(&self) -> bool {
        self.flags & CHUNK_FLAG_NO_CRC != 0
    }

    /// Record-count hint from the header id range; real chunks can deviate.
    pub fn expected_record_count(&self) -> u64 {
        self.last_record_id
            .saturating_sub(self.first_record_id)
            .saturating_add(1)
    }
}

/// Everything a chunk decode produces. Records are in chunk order; the
/// diagnostics are this chunk's local bundle, merged globally by the caller.
#[derive(Debug)]
pub(crate) struct ChunkOutput {
    pub records: Vec<ParsedRecord>,
    pub diagnostics: Diagnostics,
}

/// Decode one 64 KiB chunk into serialised records.
///
/// `on_batch` fires every `batch_size` records with the running count for
/// this chunk (sequential mode wires the progress callback through it).
/// Header-level failures (bad magic, header checksum, truncated header)
/// return `Err`; the caller records them and skips the chunk.
pub(crate) fn decode_chunk(
    chunk_data: &[u8],
    chunk_index: u32,
    settings: &ParserSettings,
    compiled_cache: &CompiledTemplateCache,
    mut on_batch: Option<&mut dyn FnMut(usize)>,
) -> Result<ChunkOutput> {
    let mut diagnostics = Diagnostics::default();
    let header = EvtxChunkHeader::from_buf(chunk_data, chunk_index)?;

    debug!(
        "chunk {chunk_index}: records {}..={}, free space at {}",
        header.first_record_id, header.last_record_id, header.free_space_offset
    );

    if settings.should_verify_checksums() && !header.no_crc() {
        // A bad header checksum condemns the whole chunk; a bad record-area
        // checksum is only worth a warning.
        checksum::verify_chunk_header(chunk_data)?;
        if let Err(e) = checksum::verify_chunk_records(chunk_data, header.free_space_offset) {
            diagnostics.warn_chunk(chunk_index, e.to_string());
        }
    }

    let mut records_end = header.free_space_offset as usize;
    if records_end > EVTX_CHUNK_SIZE {
        diagnostics.warn_chunk(
            chunk_index,
            format!(
                "free space offset {records_end} exceeds the chunk size; clamping to {EVTX_CHUNK_SIZE}"
            ),
        );
        records_end = EVTX_CHUNK_SIZE;
    }
    records_end = records_end.min(chunk_data.len());
    if records_end < CHUNK_HEADER_SIZE {
        diagnostics.warn_chunk(
            chunk_index,
            format!("free space offset {records_end} points inside the chunk header"),
        );
        records_end = CHUNK_HEADER_SIZE;
    }

    let mut string_cache = StringCache::populate(
        chunk_data,
        &header.common_string_offsets,
        chunk_index,
        &mut diagnostics,
    );
    let mut catalogue = TemplateCatalogue::populate(
        chunk_data,
        &header.template_table_offsets,
        chunk_index,
        &mut diagnostics,
    );
    debug!(
        "chunk {chunk_index}: {} common strings, {} preloaded templates",
        string_cache.len(),
        catalogue.len()
    );

    let expected = header.expected_record_count();
    let mut records: Vec<ParsedRecord> =
        Vec::with_capacity(usize::try_from(expected).unwrap_or(0).min(8192));

    let allow_compiled_xml = settings.get_output_format() == OutputFormat::Xml
        && !settings.should_indent();
    let batch_size = settings.get_batch_size();
    let cancel = settings.get_cancel_signal();

    let mut offset = CHUNK_HEADER_SIZE;
    let mut prev_record_id: Option<u64> = None;
    let mut stopped_early = false;

    while offset + RECORD_ENVELOPE_SIZE <= records_end {
        match bytes::read_array::<4>(chunk_data, offset) {
            Some(magic) if magic == RECORD_MAGIC => {}
            _ => {
                stopped_early = true;
                break;
            }
        }

        let size = match bytes::read_u32_le(chunk_data, offset + 4) {
            Some(size) => size as usize,
            None => break,
        };
        if size < RECORD_ENVELOPE_SIZE {
            stopped_early = true;
            break;
        }
        if offset + size > records_end {
            diagnostics.warn_chunk(
                chunk_index,
                format!(
                    "record frame at offset {offset} (size {size}) extends past the free space offset"
                ),
            );
            break;
        }

        let frame = match RecordFrame::from_chunk(chunk_data, offset) {
            Ok(frame) => frame,
            Err(e) => {
                diagnostics.warn_chunk(chunk_index, e.chained_message());
                break;
            }
        };
        let record_id = frame.header.record_id;

        if let Some(prev) = prev_record_id {
            if record_id != prev.wrapping_add(1) {
                warn!("chunk {chunk_index}: record id {record_id} follows {prev}");
                diagnostics.non_sequential_record_ids += 1;
            }
        }
        prev_record_id = Some(record_id);

        let data = if frame.trailing_size != frame.header.size {
            let e = EvtxError::SizeMismatch {
                record_id,
                declared: frame.header.size,
                trailing: frame.trailing_size,
            };
            if settings.should_stop_on_error() {
                return Err(e);
            }
            diagnostics.record_error(record_id, e.chained_message());
            placeholder_payload(settings, record_id, &e.chained_message())
        } else {
            let mut ctx = ParserContext {
                data: chunk_data,
                chunk_index,
                record_id,
                string_cache: &mut string_cache,
                catalogue: &mut catalogue,
                diagnostics: &mut diagnostics,
                settings,
                compiled_cache,
            };

            let decoded = parse_record_payload(
                &mut ctx,
                offset + RECORD_HEADER_SIZE,
                size - RECORD_ENVELOPE_SIZE,
                allow_compiled_xml,
            )
            .and_then(|data| match data {
                RecordData::Xml(xml) => Ok(xml),
                RecordData::Nodes(nodes) => match settings.get_output_format() {
                    OutputFormat::Xml => {
                        xml_output::render_record(&nodes, settings.should_indent())
                    }
                    OutputFormat::Json => {
                        json_output::render_record(&nodes, settings.should_indent())
                    }
                },
            });

            match decoded {
                Ok(payload) => payload,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    if settings.should_stop_on_error() {
                        return Err(EvtxError::FailedToDecodeRecord {
                            record_id,
                            source: Box::new(e),
                        });
                    }
                    let message = e.chained_message();
                    diagnostics.record_error(record_id, message.clone());
                    placeholder_payload(settings, record_id, &message)
                }
            }
        };

        records.push(ParsedRecord {
            record_id,
            timestamp: frame.header.timestamp(),
            chunk_index,
            data,
        });
        offset += size;

        if records.len() % batch_size == 0 {
            if let Some(cb) = on_batch.as_mut() {
                cb(records.len());
            }
            if let Some(cancel) = cancel {
                if cancel.load(Ordering::Relaxed) {
                    diagnostics.cancelled = true;
                    break;
                }
            }
        }
    }

    if stopped_early && (records.len() as u64) < expected {
        diagnostics.warn_chunk(
            chunk_index,
            format!(
                "record enumeration stopped after {} of {expected} expected records",
                records.len()
            ),
        );
    }

    Ok(ChunkOutput {
        records,
        diagnostics,
    })
}

/// The payload emitted for a record that failed to decode.
fn placeholder_payload(settings: &ParserSettings, record_id: u64, message: &str) -> String {
    match settings.get_output_format() {
        OutputFormat::Xml => format!(
            "<!-- record {record_id} parse error: {} -->",
            message.replace("--", "- -")
        ),
        OutputFormat::Json => serde_json::to_string(&serde_json::json!({
            "#comment": format!("record {record_id} parse error: {message}")
        }))
        .unwrap_or_else(|_| "{}".to_string()),
    }
}
