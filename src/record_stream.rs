//! Chunk-boundary-safe splitting of a byte stream into delimited records.
//!
//! Subprocess stdout arrives in arbitrary chunks: a record separator can
//! straddle two chunks, and so can the bytes of a single multi-byte character.
//! [`RecordStream`] absorbs chunks, decodes them statefully, and emits only
//! complete records to its sink. The sink can end processing early; the stream
//! then swallows the rest of the input without emitting anything.

use std::ops::ControlFlow;

use encoding_rs::{CoderResult, Decoder, Encoding};
use regex::Regex;

/// Where a separator was found inside the pending text, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeparatorMatch {
    pub start: usize,
    pub length: usize,
}

/// How records are delimited.
///
/// `Scanner` is the escape hatch for separators that aren't a fixed string or
/// a regex: the callback receives the pending decoded text and reports the
/// first separator occurrence, or `None` to wait for more input. A scanner
/// must report a non-empty match (`length > 0`); a zero-length match would
/// never consume input.
pub enum Separator {
    Literal(String),
    Pattern(Regex),
    Scanner(Box<dyn FnMut(&str) -> Option<SeparatorMatch> + Send>),
}

impl Separator {
    fn find(&mut self, haystack: &str) -> Option<SeparatorMatch> {
        match self {
            Separator::Literal(lit) => haystack.find(lit.as_str()).map(|start| SeparatorMatch {
                start,
                length: lit.len(),
            }),
            Separator::Pattern(re) => re.find(haystack).map(|m| SeparatorMatch {
                start: m.start(),
                length: m.len(),
            }),
            Separator::Scanner(scan) => scan(haystack),
        }
    }
}

impl std::fmt::Debug for Separator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Separator::Literal(lit) => f.debug_tuple("Literal").field(lit).finish(),
            Separator::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            Separator::Scanner(_) => f.write_str("Scanner(..)"),
        }
    }
}

#[derive(Debug)]
pub enum RecordStreamError {
    /// The literal separator is empty; it would match everywhere.
    EmptySeparator,
    /// The pattern separator can match the empty string; scanning would never
    /// consume input.
    PatternMatchesEmpty(String),
}

impl std::fmt::Display for RecordStreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordStreamError::EmptySeparator => write!(f, "record separator is empty"),
            RecordStreamError::PatternMatchesEmpty(pattern) => {
                write!(f, "record separator /{pattern}/ matches the empty string")
            }
        }
    }
}

impl std::error::Error for RecordStreamError {}

/// Splits a stream of byte chunks into records.
///
/// Feed input with [`push`](Self::push) (raw bytes, decoded with the active
/// encoding) or [`push_str`](Self::push_str) (already-decoded text). Call
/// [`finish`](Self::finish) once the input is exhausted; a non-empty carryover
/// is emitted as the final record.
///
/// The sink returns [`ControlFlow::Break`] to end processing early. After
/// that, further input is still consumed but nothing more is emitted.
pub struct RecordStream<F>
where
    F: FnMut(&str) -> ControlFlow<()>,
{
    separator: Separator,
    decoder: Decoder,
    carryover: String,
    stopped: bool,
    sink: F,
}

impl<F> RecordStream<F>
where
    F: FnMut(&str) -> ControlFlow<()>,
{
    pub fn new(
        separator: Separator,
        encoding: &'static Encoding,
        sink: F,
    ) -> Result<Self, RecordStreamError> {
        match &separator {
            Separator::Literal(lit) if lit.is_empty() => {
                return Err(RecordStreamError::EmptySeparator);
            }
            Separator::Pattern(re) if re.is_match("") => {
                return Err(RecordStreamError::PatternMatchesEmpty(re.as_str().into()));
            }
            _ => {}
        }
        Ok(Self {
            separator,
            decoder: encoding.new_decoder(),
            carryover: String::new(),
            stopped: false,
            sink,
        })
    }

    /// Whether the sink requested early termination.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Feed a chunk of raw bytes, decoded with the active encoding.
    ///
    /// Bytes of a multi-byte character split across chunks are held by the
    /// decoder until the character completes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.decode_append(chunk, false);
        self.drain_records();
    }

    /// Feed already-decoded text, bypassing the decoder.
    pub fn push_str(&mut self, chunk: &str) {
        if self.stopped {
            return;
        }
        self.carryover.push_str(chunk);
        self.drain_records();
    }

    /// Switch the input encoding mid-stream.
    ///
    /// The current decoder's residue (a dangling partial sequence becomes a
    /// replacement character) is flushed into the carryover first, so bytes
    /// already pushed keep their original interpretation.
    pub fn set_encoding(&mut self, encoding: &'static Encoding) {
        self.decode_append(&[], true);
        self.decoder = encoding.new_decoder();
        self.drain_records();
    }

    /// Flush the decoder and emit any non-empty carryover as the final record.
    pub fn finish(&mut self) {
        self.decode_append(&[], true);
        self.drain_records();
        if self.stopped || self.carryover.is_empty() {
            return;
        }
        let tail = std::mem::take(&mut self.carryover);
        if (self.sink)(&tail).is_break() {
            self.stopped = true;
        }
    }

    fn decode_append(&mut self, mut bytes: &[u8], last: bool) {
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(bytes.len())
                .unwrap_or(bytes.len() + 16);
            self.carryover.reserve(needed);
            let (result, read, _replaced) = self.decoder.decode_to_string(bytes, &mut self.carryover, last);
            bytes = &bytes[read..];
            if result == CoderResult::InputEmpty {
                break;
            }
        }
    }

    fn drain_records(&mut self) {
        loop {
            if self.stopped {
                // Early termination: swallow whatever else arrives.
                self.carryover.clear();
                return;
            }
            let Some(m) = self.separator.find(&self.carryover) else {
                return;
            };
            if m.length == 0 {
                // A zero-length match can only come from a misbehaving
                // scanner; treat it as "no separator" rather than loop.
                return;
            }
            let record = self.carryover[..m.start].to_string();
            self.carryover.drain(..m.start + m.length);
            if (self.sink)(&record).is_break() {
                self.stopped = true;
            }
        }
    }
}

impl<F> std::fmt::Debug for RecordStream<F>
where
    F: FnMut(&str) -> ControlFlow<()>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream")
            .field("separator", &self.separator)
            .field("carryover_len", &self.carryover.len())
            .field("stopped", &self.stopped)
            .finish()
    }
}
