use serde::Serialize;

/// A template back-reference that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingTemplateRef {
    pub record_id: u64,
    pub def_offset: u32,
    /// Known when the instance could name its definition before failing.
    pub guid: Option<String>,
}

/// A record that failed to decode (its payload was replaced by a comment
/// placeholder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordError {
    pub record_id: u64,
    pub message: String,
}

/// A chunk-scoped advisory condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkWarning {
    pub chunk_index: u32,
    pub message: String,
}

/// Parse-time diagnostics sink.
///
/// Everything in here is advisory: the bundle is returned to the caller
/// unconditionally, alongside whatever records did decode. Each chunk task
/// accumulates into its own local bundle, which is merged into the global
/// one when the chunk completes, so parallel parses produce the same
/// bundle as sequential ones.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Template definitions discovered (table preload + inline + fallback).
    pub template_definitions: u64,
    /// Template instances observed in record payloads.
    pub template_references: u64,
    pub missing_templates: Vec<MissingTemplateRef>,
    pub record_errors: Vec<RecordError>,
    pub chunk_warnings: Vec<ChunkWarning>,
    /// Records whose id was not its predecessor's id + 1.
    pub non_sequential_record_ids: u64,
    pub cancelled: bool,
}

impl Diagnostics {
    pub fn missing_count(&self) -> usize {
        self.missing_templates.len()
    }

    pub fn error_count(&self) -> usize {
        self.record_errors.len()
    }

    pub fn warning_count(&self) -> usize {
        self.chunk_warnings.len() + self.non_sequential_record_ids as usize
    }

    pub(crate) fn warn_chunk(&mut self, chunk_index: u32, message: impl Into<String>) {
        let message = message.into();
        log::warn!("chunk {chunk_index}: {message}");
        self.chunk_warnings.push(ChunkWarning {
            chunk_index,
            message,
        });
    }

    pub(crate) fn record_error(&mut self, record_id: u64, message: impl Into<String>) {
        let message = message.into();
        log::warn!("record {record_id}: {message}");
        self.record_errors.push(RecordError { record_id, message });
    }

    pub(crate) fn missing_template(
        &mut self,
        record_id: u64,
        def_offset: u32,
        guid: Option<String>,
    ) {
        log::warn!("record {record_id}: missing template definition at offset {def_offset}");
        self.missing_templates.push(MissingTemplateRef {
            record_id,
            def_offset,
            guid,
        });
    }

    /// Fold a per-chunk bundle into the global one.
    pub(crate) fn merge(&mut self, other: Diagnostics) {
        self.template_definitions += other.template_definitions;
        self.template_references += other.template_references;
        self.missing_templates.extend(other.missing_templates);
        self.record_errors.extend(other.record_errors);
        self.chunk_warnings.extend(other.chunk_warnings);
        self.non_sequential_record_ids += other.non_sequential_record_ids;
        self.cancelled |= other.cancelled;
    }
}
