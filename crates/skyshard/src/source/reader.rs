//! Delimited row reader.
//!
//! Splits an async byte stream into rows with CSV quoting rules and validates
//! each row against the schema. Only the partition key fields are cast here;
//! every other field is checked for nulls and kept as text until flush.
//!
//! Every input line is a row, blank ones included: the parser skips blank
//! lines on its own, so they are located while the bytes stream past and
//! reported as zero-field rows.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use csv_async::{AsyncReader, AsyncReaderBuilder, ByteRecord, StringRecord};
use snafu::prelude::*;
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::{ReadSnafu, ReaderError};
use crate::partition::PartitionKey;
use crate::schema::{CastValue, KeyFields, Schema};

/// Null tokens recognised when none are configured. Empty fields are always null.
pub const DEFAULT_NULL_VALUES: [&str; 3] = ["\\N", "None", "NULL"];

/// Options for splitting and validating rows.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Field separator.
    pub delimiter: u8,
    /// Values (compared after trimming) that mark a field as missing.
    pub null_values: Vec<String>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            delimiter: b'|',
            null_values: DEFAULT_NULL_VALUES.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// One row as read, fields still in their textual form.
#[derive(Debug, Clone)]
pub struct RawRecord {
    fields: StringRecord,
}

impl PartialEq for RawRecord {
    fn eq(&self, other: &Self) -> bool {
        self.fields.iter().eq(other.fields.iter())
    }
}

impl Eq for RawRecord {}

impl RawRecord {
    pub fn new<I, T>(fields: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.fields.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Size of this row when written back out: field bytes plus one separator
    /// or newline per field.
    pub fn byte_estimate(&self) -> usize {
        self.fields.as_slice().len() + self.fields.len()
    }
}

impl From<StringRecord> for RawRecord {
    fn from(fields: StringRecord) -> Self {
        Self { fields }
    }
}

/// A row that passed read-time validation, with its partition key.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    pub record: RawRecord,
    pub key: PartitionKey,
}

/// Why a row was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Field count differs from the schema.
    WrongArity { found: usize },
    /// A field is empty or a null token.
    NullField { field: &'static str },
    /// A key field could not be cast.
    TypeCastFailure { field: &'static str },
    /// The row is not valid UTF-8.
    InvalidEncoding,
}

impl SkipReason {
    /// Metric label for this reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::WrongArity { .. } => "wrong_arity",
            SkipReason::NullField { .. } => "null_field",
            SkipReason::TypeCastFailure { .. } => "type_cast_failure",
            SkipReason::InvalidEncoding => "invalid_encoding",
        }
    }
}

/// Result of pulling one row.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Record(ValidatedRecord),
    Skip(SkipReason),
}

/// Running totals for one reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderCounters {
    /// Every row pulled off the stream.
    pub rows_read: u64,
    /// Rows that passed validation.
    pub rows_retained: u64,
    pub wrong_arity: u64,
    pub null_field: u64,
    pub type_cast_failure: u64,
    pub invalid_encoding: u64,
}

impl ReaderCounters {
    pub fn rows_skipped(&self) -> u64 {
        self.wrong_arity + self.null_field + self.type_cast_failure + self.invalid_encoding
    }

    /// Skip counts labelled with their metric reason.
    pub fn skipped_by_reason(&self) -> [(&'static str, u64); 4] {
        [
            (SkipReason::WrongArity { found: 0 }.as_str(), self.wrong_arity),
            (SkipReason::NullField { field: "" }.as_str(), self.null_field),
            (
                SkipReason::TypeCastFailure { field: "" }.as_str(),
                self.type_cast_failure,
            ),
            (SkipReason::InvalidEncoding.as_str(), self.invalid_encoding),
        ]
    }

    fn record_skip(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::WrongArity { .. } => self.wrong_arity += 1,
            SkipReason::NullField { .. } => self.null_field += 1,
            SkipReason::TypeCastFailure { .. } => self.type_cast_failure += 1,
            SkipReason::InvalidEncoding => self.invalid_encoding += 1,
        }
    }
}

/// Passes bytes through unchanged, noting the offset of every blank line.
///
/// A line holding nothing or a lone `\r` is blank. Offsets point at the
/// line's `\n`. Newlines inside quoted fields do not end a line.
struct BlankLineTracker<R> {
    inner: R,
    delimiter: u8,
    offset: u64,
    line_len: u64,
    last: u8,
    quote: QuoteState,
    blanks: VecDeque<u64>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    Unquoted,
    Quoted,
    /// A quote seen inside a quoted field: either the closing quote or the
    /// first half of an escaped `""`.
    QuoteInQuoted,
}

impl<R> BlankLineTracker<R> {
    fn new(inner: R, delimiter: u8) -> Self {
        Self {
            inner,
            delimiter,
            offset: 0,
            line_len: 0,
            last: b'\n',
            quote: QuoteState::Unquoted,
            blanks: VecDeque::new(),
        }
    }

    /// Remove and count the blank lines that lie before byte `consumed`.
    fn take_before(&mut self, consumed: u64) -> u64 {
        let mut count = 0;
        while self.blanks.front().is_some_and(|&offset| offset < consumed) {
            self.blanks.pop_front();
            count += 1;
        }
        count
    }

    fn scan(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.step(byte);
            self.last = byte;
            self.offset += 1;
        }
    }

    fn step(&mut self, byte: u8) {
        match self.quote {
            QuoteState::Quoted => {
                if byte == b'"' {
                    self.quote = QuoteState::QuoteInQuoted;
                }
                self.line_len += 1;
                return;
            }
            QuoteState::QuoteInQuoted if byte == b'"' => {
                self.quote = QuoteState::Quoted;
                self.line_len += 1;
                return;
            }
            QuoteState::QuoteInQuoted => self.quote = QuoteState::Unquoted,
            QuoteState::Unquoted => {}
        }

        match byte {
            b'\n' => {
                if self.line_len == 0 || (self.line_len == 1 && self.last == b'\r') {
                    self.blanks.push_back(self.offset);
                }
                self.line_len = 0;
            }
            b'"' if self.line_len == 0 || self.last == self.delimiter => {
                self.quote = QuoteState::Quoted;
                self.line_len += 1;
            }
            _ => self.line_len += 1,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for BlankLineTracker<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
        self.scan(&buf.filled()[before..]);
        Poll::Ready(Ok(()))
    }
}

/// Lazily yields one validated record or skip per call.
pub struct RecordReader<R> {
    inner: AsyncReader<BlankLineTracker<R>>,
    schema: Arc<Schema>,
    keys: KeyFields,
    null_values: Vec<String>,
    location: String,
    row: ByteRecord,
    /// Blank lines read ahead of `row` and not yet reported.
    pending_blanks: u64,
    /// `row` holds a record that has not been validated yet.
    row_pending: bool,
    counters: ReaderCounters,
}

impl<R> RecordReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(
        reader: R,
        options: &ReaderOptions,
        schema: Arc<Schema>,
        keys: KeyFields,
        location: impl Into<String>,
    ) -> Self {
        let inner = AsyncReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(false)
            .flexible(true)
            .create_reader(BlankLineTracker::new(reader, options.delimiter));

        Self {
            inner,
            schema,
            keys,
            null_values: options.null_values.clone(),
            location: location.into(),
            row: ByteRecord::new(),
            pending_blanks: 0,
            row_pending: false,
            counters: ReaderCounters::default(),
        }
    }

    pub fn counters(&self) -> ReaderCounters {
        self.counters
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Pull the next row. `Ok(None)` at end of stream.
    ///
    /// Blank lines come back as `WrongArity { found: 0 }` skips, in stream
    /// order.
    pub async fn next_outcome(&mut self) -> Result<Option<ReadOutcome>, ReaderError> {
        loop {
            if self.pending_blanks > 0 {
                self.pending_blanks -= 1;
                return Ok(Some(self.count(Err(SkipReason::WrongArity { found: 0 }))));
            }
            if self.row_pending {
                self.row_pending = false;
                let result = self.validate();
                return Ok(Some(self.count(result)));
            }

            let more = self
                .inner
                .read_byte_record(&mut self.row)
                .await
                .context(ReadSnafu {
                    location: &self.location,
                })?;
            let consumed = self.inner.position().byte();
            self.pending_blanks = self.inner.get_mut().take_before(consumed);
            self.row_pending = more;

            if !more && self.pending_blanks == 0 {
                return Ok(None);
            }
        }
    }

    fn count(&mut self, result: Result<ValidatedRecord, SkipReason>) -> ReadOutcome {
        self.counters.rows_read += 1;
        match result {
            Ok(record) => {
                self.counters.rows_retained += 1;
                ReadOutcome::Record(record)
            }
            Err(reason) => {
                self.counters.record_skip(reason);
                ReadOutcome::Skip(reason)
            }
        }
    }

    fn validate(&self) -> Result<ValidatedRecord, SkipReason> {
        let fields = StringRecord::from_byte_record(self.row.clone())
            .map_err(|_| SkipReason::InvalidEncoding)?;

        if fields.len() != self.schema.len() {
            return Err(SkipReason::WrongArity {
                found: fields.len(),
            });
        }

        for (value, field) in fields.iter().zip(self.schema.fields()) {
            if self.is_null(value) {
                return Err(SkipReason::NullField { field: field.name });
            }
        }

        let zone_id = self.cast_key(&fields, self.keys.zone_id)?.as_i64() as i32;
        let ra = self.cast_key(&fields, self.keys.ra)?.as_f64();
        let dec = match self.keys.dec {
            Some(index) => Some(self.cast_key(&fields, index)?.as_f64()),
            None => None,
        };

        Ok(ValidatedRecord {
            record: RawRecord::from(fields),
            key: PartitionKey { zone_id, ra, dec },
        })
    }

    fn is_null(&self, value: &str) -> bool {
        let value = value.trim();
        value.is_empty() || self.null_values.iter().any(|token| token == value)
    }

    fn cast_key(&self, fields: &StringRecord, index: usize) -> Result<CastValue, SkipReason> {
        let field = &self.schema.fields()[index];
        let raw = fields.get(index).unwrap_or_default();
        field
            .field_type
            .cast(raw)
            .map_err(|_| SkipReason::TypeCastFailure { field: field.name })
    }
}
