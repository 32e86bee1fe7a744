use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::Ordering;

use log::{debug, warn};

use crate::chunk::{decode_chunk, ChunkOutput};
use crate::checksum;
use crate::compiled_template::CompiledTemplateCache;
use crate::diagnostics::Diagnostics;
use crate::err::Result;
use crate::file_header::{EvtxFileHeader, HeaderFlags, EVTX_CHUNK_SIZE};
use crate::record::ParsedRecord;
use crate::settings::{OutputFormat, ParserSettings};

/// Result of a full-file parse: records in file order, the diagnostics
/// bundle, and the number of chunk slots enumerated.
#[derive(Debug)]
pub struct ParseOutput {
    pub records: Vec<ParsedRecord>,
    pub diagnostics: Diagnostics,
    pub total_chunks: u32,
}

impl ParseOutput {
    /// "N records parsed, M warnings, K errors".
    pub fn summary(&self) -> String {
        format!(
            "{} records parsed, {} warnings, {} errors",
            self.records.len(),
            self.diagnostics.warning_count(),
            self.diagnostics.error_count()
        )
    }
}

/// Decode an EVTX byte range into serialised records. Pure: same bytes and
/// settings produce identical output.
///
/// Chunks are decoded sequentially or on a worker pool per
/// `ParserSettings::num_threads`; results are always delivered in file
/// order and the diagnostics bundle is identical either way.
pub fn parse(data: &[u8], settings: &ParserSettings) -> Result<ParseOutput> {
    let header = EvtxFileHeader::from_buf(data)?;
    let mut diagnostics = Diagnostics::default();

    if settings.should_verify_checksums() && !header.flags.contains(HeaderFlags::NO_CRC) {
        if let Err(e) = checksum::verify_file_header(data) {
            diagnostics.warn_chunk(0, e.chained_message());
        }
    }

    let chunk_offsets: Vec<usize> = header.chunk_offsets(data.len()).collect();
    let total_chunks = chunk_offsets.len() as u32;
    debug!("parsing {total_chunks} chunks (header says {})", header.chunk_count);

    let compiled_cache = CompiledTemplateCache::default();
    let workers = effective_workers(settings, chunk_offsets.len());

    let chunk_results: Vec<(u32, Result<ChunkOutput>)> = if workers > 1 {
        parse_chunks_parallel(data, &chunk_offsets, settings, &compiled_cache, workers)?
    } else {
        parse_chunks_sequential(data, &chunk_offsets, settings, &compiled_cache, total_chunks)?
    };

    // Merge in ascending chunk order so output and diagnostics are
    // deterministic regardless of scheduling.
    let mut records = Vec::new();
    let mut last_record_id: Option<u64> = None;

    for (chunk_index, result) in chunk_results {
        match result {
            Ok(output) => {
                if let (Some(prev), Some(first)) = (last_record_id, output.records.first()) {
                    if first.record_id != prev.wrapping_add(1) {
                        warn!(
                            "chunk {chunk_index}: first record id {} follows {prev}",
                            first.record_id
                        );
                        diagnostics.non_sequential_record_ids += 1;
                    }
                }
                if let Some(last) = output.records.last() {
                    last_record_id = Some(last.record_id);
                }

                diagnostics.merge(output.diagnostics);
                records.extend(output.records);

                if let Some(callback) = settings.get_progress_callback() {
                    let fraction = f64::from(chunk_index + 1) / f64::from(total_chunks.max(1));
                    callback(records.len(), fraction);
                }
            }
            Err(e) if e.is_fatal() || settings.should_stop_on_error() => return Err(e),
            Err(e) => {
                // Per-chunk advisory: note it and keep going.
                diagnostics.warn_chunk(chunk_index, e.chained_message());
            }
        }

        if diagnostics.cancelled {
            break;
        }
    }

    debug!(
        "parse complete: {} records, {} distinct compiled templates",
        records.len(),
        compiled_cache.len()
    );

    Ok(ParseOutput {
        records,
        diagnostics,
        total_chunks,
    })
}

fn effective_workers(settings: &ParserSettings, chunk_count: usize) -> usize {
    if !cfg!(feature = "multithreading") || chunk_count <= 1 {
        return 1;
    }
    match settings.get_num_threads() {
        0 => std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1)
            .min(chunk_count),
        n => n.min(chunk_count),
    }
}

fn parse_chunks_sequential(
    data: &[u8],
    chunk_offsets: &[usize],
    settings: &ParserSettings,
    compiled_cache: &CompiledTemplateCache,
    total_chunks: u32,
) -> Result<Vec<(u32, Result<ChunkOutput>)>> {
    let mut results = Vec::with_capacity(chunk_offsets.len());
    let mut records_before = 0_usize;

    for (idx, &offset) in chunk_offsets.iter().enumerate() {
        let chunk_index = idx as u32;

        if let Some(cancel) = settings.get_cancel_signal() {
            if cancel.load(Ordering::Relaxed) {
                let mut diagnostics = Diagnostics::default();
                diagnostics.cancelled = true;
                results.push((
                    chunk_index,
                    Ok(ChunkOutput {
                        records: Vec::new(),
                        diagnostics,
                    }),
                ));
                break;
            }
        }

        let chunk_data = &data[offset..offset + EVTX_CHUNK_SIZE];

        // Wire the progress callback through the per-chunk batch hook so
        // cooperative callers get a tick every `batch_size` records.
        let result = match settings.get_progress_callback() {
            Some(callback) => {
                let mut on_batch = |in_chunk: usize| {
                    let fraction = f64::from(chunk_index) / f64::from(total_chunks.max(1));
                    callback(records_before + in_chunk, fraction);
                };
                decode_chunk(
                    chunk_data,
                    chunk_index,
                    settings,
                    compiled_cache,
                    Some(&mut on_batch),
                )
            }
            None => decode_chunk(chunk_data, chunk_index, settings, compiled_cache, None),
        };

        if let Ok(output) = &result {
            records_before += output.records.len();
        }
        results.push((chunk_index, result));
    }

    Ok(results)
}

#[cfg(feature = "multithreading")]
fn parse_chunks_parallel(
    data: &[u8],
    chunk_offsets: &[usize],
    settings: &ParserSettings,
    compiled_cache: &CompiledTemplateCache,
    workers: usize,
) -> Result<Vec<(u32, Result<ChunkOutput>)>> {
    use rayon::prelude::*;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| crate::format_err!("failed to build worker pool: {e}"))?;

    let results = pool.install(|| {
        chunk_offsets
            .par_iter()
            .enumerate()
            .map(|(idx, &offset)| {
                let chunk_index = idx as u32;

                if let Some(cancel) = settings.get_cancel_signal() {
                    if cancel.load(Ordering::Relaxed) {
                        let mut diagnostics = Diagnostics::default();
                        diagnostics.cancelled = true;
                        return (
                            chunk_index,
                            Ok(ChunkOutput {
                                records: Vec::new(),
                                diagnostics,
                            }),
                        );
                    }
                }

                let chunk_data = &data[offset..offset + EVTX_CHUNK_SIZE];
                (
                    chunk_index,
                    decode_chunk(chunk_data, chunk_index, settings, compiled_cache, None),
                )
            })
            .collect()
    });

    Ok(results)
}

#[cfg(not(feature = "multithreading"))]
fn parse_chunks_parallel(
    data: &[u8],
    chunk_offsets: &[usize],
    settings: &ParserSettings,
    compiled_cache: &CompiledTemplateCache,
    _workers: usize,
) -> Result<Vec<(u32, Result<ChunkOutput>)>> {
    parse_chunks_sequential(
        data,
        chunk_offsets,
        settings,
        compiled_cache,
        chunk_offsets.len() as u32,
    )
}

/// Convenience wrapper around [`parse`] owning the file bytes, in the
/// spirit of streaming one chunk at a time.
pub struct EvtxParser {
    data: Vec<u8>,
    settings: ParserSettings,
}

impl EvtxParser {
    /// Read the whole file into memory and validate its header.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_buffer(data)
    }

    pub fn from_buffer(data: Vec<u8>) -> Result<Self> {
        // Fail fast on files that are not EVTX at all.
        EvtxFileHeader::from_buf(&data)?;
        Ok(EvtxParser {
            data,
            settings: ParserSettings::default(),
        })
    }

    pub fn with_configuration(mut self, settings: ParserSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Full parse with the configured settings.
    pub fn parse(&self) -> Result<ParseOutput> {
        parse(&self.data, &self.settings)
    }

    /// Iterate records as XML, one chunk decoded at a time. Chunk-level
    /// failures surface as `Err` items; diagnostics beyond that are logged
    /// only. Use [`EvtxParser::parse`] to get the full bundle.
    pub fn records(&mut self) -> IterRecords<'_> {
        let settings = self.settings.clone().output_format(OutputFormat::Xml);
        IterRecords::new(&self.data, settings)
    }

    /// Iterate records as JSON, one chunk decoded at a time.
    pub fn records_json(&mut self) -> IterRecords<'_> {
        let settings = self.settings.clone().output_format(OutputFormat::Json);
        IterRecords::new(&self.data, settings)
    }
}

pub struct IterRecords<'a> {
    data: &'a [u8],
    settings: ParserSettings,
    chunk_offsets: VecDeque<(u32, usize)>,
    compiled_cache: CompiledTemplateCache,
    pending: VecDeque<ParsedRecord>,
}

impl<'a> IterRecords<'a> {
    fn new(data: &'a [u8], settings: ParserSettings) -> Self {
        let chunk_offsets = match EvtxFileHeader::from_buf(data) {
            Ok(header) => header
                .chunk_offsets(data.len())
                .enumerate()
                .map(|(idx, offset)| (idx as u32, offset))
                .collect(),
            // The constructor validated the header; a failure here means
            // the buffer changed under us.
            Err(_) => VecDeque::new(),
        };

        IterRecords {
            data,
            settings,
            chunk_offsets,
            compiled_cache: CompiledTemplateCache::default(),
            pending: VecDeque::new(),
        }
    }
}

impl Iterator for IterRecords<'_> {
    type Item = Result<ParsedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }

            let (chunk_index, offset) = self.chunk_offsets.pop_front()?;
            let chunk_data = &self.data[offset..offset + EVTX_CHUNK_SIZE];

            match decode_chunk(
                chunk_data,
                chunk_index,
                &self.settings,
                &self.compiled_cache,
                None,
            ) {
                Ok(output) => self.pending.extend(output.records),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
