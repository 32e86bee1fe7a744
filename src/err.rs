use std::fmt::Write as _;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EvtxError>;

/// All failure modes of the decoder.
///
/// Only a handful of these are ever fatal (see `EvtxError::is_fatal`); the
/// rest are recorded as diagnostics and the parse continues, unless
/// `stop_on_error` is set.
#[derive(Debug, Error)]
pub enum EvtxError {
    #[error("Invalid EVTX file header magic, expected `ElfFile\\0`, found `{magic:02x?}`")]
    BadFileMagic { magic: [u8; 8] },

    #[error("Chunk {chunk_index}: invalid chunk header magic, expected `ElfChnk\\0`, found `{magic:02x?}`")]
    BadChunkMagic { chunk_index: u32, magic: [u8; 8] },

    #[error("Offset {offset}: invalid record header magic, expected `2a2a0000`, found `{magic:02x?}`")]
    BadRecordMagic { offset: u64, magic: [u8; 4] },

    #[error("Offset {offset}: not enough data reading {what} (need {need}, have {have})")]
    Truncated {
        what: &'static str,
        offset: u64,
        need: usize,
        have: usize,
    },

    #[error("Record {record_id}: trailing size {trailing} does not match header size {declared}")]
    SizeMismatch {
        record_id: u64,
        declared: u32,
        trailing: u32,
    },

    #[error("Checksum mismatch over {what} (expected {expected:#010x}, computed {computed:#010x})")]
    ChecksumMismatch {
        what: &'static str,
        expected: u32,
        computed: u32,
    },

    #[error("Offset {offset}: tried to read an invalid byte `{value:#04x}` as a binxml token")]
    UnknownToken { value: u8, offset: u64 },

    #[error("Record {record_id}: template definition at offset {def_offset} is not available")]
    MissingTemplate { record_id: u64, def_offset: u32 },

    #[error("Offset {offset}: malformed name entry")]
    MalformedName { offset: u64 },

    #[error("Parse cancelled by caller")]
    CancelRequested,

    #[error("Maximum binxml nesting depth ({limit}) exceeded at offset {offset}")]
    DepthLimitExceeded { limit: usize, offset: u64 },

    #[error("Failed to decode record {record_id}")]
    FailedToDecodeRecord {
        record_id: u64,
        source: Box<EvtxError>,
    },

    #[error("An I/O error has occurred")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Writing XML output failed")]
    XmlOutput {
        #[from]
        source: quick_xml::Error,
    },

    #[error("`serde_json` failed")]
    JsonOutput {
        #[from]
        source: serde_json::Error,
    },

    #[error("An unexpected error has occurred: {message}")]
    Internal { message: String },
}

impl EvtxError {
    /// Fatal errors abort the parse regardless of `stop_on_error`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EvtxError::BadFileMagic { .. }
                | EvtxError::Internal { .. }
                | EvtxError::Io { .. }
                | EvtxError::CancelRequested
        )
    }

    /// Short single-line rendering used for diagnostic lists and XML comment
    /// placeholders. Includes the source chain.
    pub fn chained_message(&self) -> String {
        let mut msg = String::new();
        let _ = write!(msg, "{self}");
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            let _ = write!(msg, ": {cause}");
            source = cause.source();
        }
        msg
    }
}

#[macro_export]
macro_rules! format_err {
   ($($arg:tt)*) => { $crate::err::EvtxError::Internal { message: format!($($arg)*) } }
}
