use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use encoding::{Encoding, EncodingRef};

/// Progress observer: `(records_so_far, fraction_complete)`.
pub type ProgressCallback = Arc<dyn Fn(usize, f64) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Xml,
    Json,
}

/// Decoder configuration, builder-style:
///
/// ```
/// use winevtx::{OutputFormat, ParserSettings};
///
/// let settings = ParserSettings::new()
///     .output_format(OutputFormat::Json)
///     .num_threads(1)
///     .verify_checksums(true);
/// # let _ = settings;
/// ```
#[derive(Clone)]
pub struct ParserSettings {
    output_format: OutputFormat,
    /// Number of chunk workers. 1 decodes sequentially; 0 lets the worker
    /// pool pick (effectively the number of cores when `multithreading` is
    /// enabled).
    num_threads: usize,
    /// Records between progress callbacks and cancellation polls.
    batch_size: usize,
    progress_callback: Option<ProgressCallback>,
    verify_checksums: bool,
    stop_on_error: bool,
    cancel_signal: Option<Arc<AtomicBool>>,
    /// Recursion bound for nested binxml (elements, embedded documents).
    max_depth: usize,
    /// Codec for `AnsiString` values. The on-disk format does not say;
    /// ISO-8859-1 gives a byte-per-code-point passthrough.
    ansi_codec: EncodingRef,
    /// Pretty-print output (XML indentation / JSON multi-line).
    indent: bool,
}

pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_MAX_DEPTH: usize = 64;

impl Default for ParserSettings {
    fn default() -> Self {
        ParserSettings {
            output_format: OutputFormat::Xml,
            num_threads: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            progress_callback: None,
            verify_checksums: false,
            stop_on_error: false,
            cancel_signal: None,
            max_depth: DEFAULT_MAX_DEPTH,
            ansi_codec: encoding::all::ISO_8859_1,
            indent: false,
        }
    }
}

impl PartialEq for ParserSettings {
    fn eq(&self, other: &Self) -> bool {
        self.output_format == other.output_format
            && self.num_threads == other.num_threads
            && self.batch_size == other.batch_size
            && self.verify_checksums == other.verify_checksums
            && self.stop_on_error == other.stop_on_error
            && self.max_depth == other.max_depth
            && self.ansi_codec.name() == other.ansi_codec.name()
            && self.indent == other.indent
    }
}

impl fmt::Debug for ParserSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserSettings")
            .field("output_format", &self.output_format)
            .field("num_threads", &self.num_threads)
            .field("batch_size", &self.batch_size)
            .field("has_progress_callback", &self.progress_callback.is_some())
            .field("verify_checksums", &self.verify_checksums)
            .field("stop_on_error", &self.stop_on_error)
            .field("has_cancel_signal", &self.cancel_signal.is_some())
            .field("max_depth", &self.max_depth)
            .field("ansi_codec", &self.ansi_codec.name())
            .field("indent", &self.indent)
            .finish()
    }
}

impl ParserSettings {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    pub fn cancel_signal(mut self, signal: Arc<AtomicBool>) -> Self {
        self.cancel_signal = Some(signal);
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn ansi_codec(mut self, codec: EncodingRef) -> Self {
        self.ansi_codec = codec;
        self
    }

    pub fn indent(mut self, indent: bool) -> Self {
        self.indent = indent;
        self
    }

    pub fn get_output_format(&self) -> OutputFormat {
        self.output_format
    }

    pub fn get_num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn get_batch_size(&self) -> usize {
        self.batch_size
    }

    pub(crate) fn get_progress_callback(&self) -> Option<&ProgressCallback> {
        self.progress_callback.as_ref()
    }

    pub fn should_verify_checksums(&self) -> bool {
        self.verify_checksums
    }

    pub fn should_stop_on_error(&self) -> bool {
        self.stop_on_error
    }

    pub(crate) fn get_cancel_signal(&self) -> Option<&Arc<AtomicBool>> {
        self.cancel_signal.as_ref()
    }

    pub fn get_max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn get_ansi_codec(&self) -> EncodingRef {
        self.ansi_codec
    }

    pub fn should_indent(&self) -> bool {
        self.indent
    }
}
