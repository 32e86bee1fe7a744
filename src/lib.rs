//! A fast (and safe) decoder for the Windows XML Event Log (EVTX) format.
//!
//! An EVTX file is a 4096-byte header followed by fixed 64 KiB chunks; each
//! chunk frames event records whose payloads are "binary XML", a
//! token-oriented encoding referencing a chunk-local name table and a
//! chunk-local catalogue of templates with typed substitution slots. This
//! crate walks that structure and renders each record as canonical XML or
//! structured JSON, forensically faithfully: corrupt frames, missing
//! templates, and checksum mismatches become diagnostics, not aborts.
//!
//! ```no_run
//! use winevtx::{EvtxParser, ParserSettings};
//!
//! # fn main() -> winevtx::Result<()> {
//! let mut parser = EvtxParser::from_path("Security.evtx")?
//!     .with_configuration(ParserSettings::new().num_threads(1));
//!
//! for record in parser.records() {
//!     println!("{}", record?.data);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The underlying pure entry point is [`parse`], which takes an immutable
//! byte range plus [`ParserSettings`] and returns the records, the full
//! diagnostics bundle, and chunk totals.

pub mod err;

mod binxml;
mod checksum;
mod chunk;
mod compiled_template;
mod diagnostics;
mod file_header;
mod guid;
mod json_output;
mod model;
mod parser;
mod record;
mod settings;
mod sid;
mod string_cache;
mod template_catalogue;
mod utils;
mod xml_output;

/// All on-disk pointers inside a chunk are chunk-relative u32 offsets.
pub type ChunkOffset = u32;

pub use crate::chunk::EvtxChunkHeader;
pub use crate::diagnostics::{ChunkWarning, Diagnostics, MissingTemplateRef, RecordError};
pub use crate::err::{EvtxError, Result};
pub use crate::file_header::{EvtxFileHeader, HeaderFlags, EVTX_CHUNK_SIZE};
pub use crate::guid::Guid;
pub use crate::parser::{parse, EvtxParser, IterRecords, ParseOutput};
pub use crate::record::{EvtxRecordHeader, ParsedRecord};
pub use crate::settings::{OutputFormat, ParserSettings, ProgressCallback};
pub use crate::sid::Sid;
