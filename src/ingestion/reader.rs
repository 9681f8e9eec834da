//! Chunked CSV reader.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use crate::error::{EtlError, EtlResult};
use crate::types::{RowBatch, Value};

// Capacity hint cap; a batch larger than this grows on demand.
const MAX_PREALLOCATED_ROWS: usize = 8_192;

/// Options controlling how a source file is split into batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Maximum number of rows per batch.
    pub batch_size: usize,
    /// Field delimiter of the source file.
    pub delimiter: u8,
    /// Whether the first line is a header. Without headers columns are taken positionally.
    pub has_headers: bool,
    /// Cell values (after trimming) that mean "missing". Empty cells are always null.
    pub null_tokens: Vec<String>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            delimiter: b',',
            has_headers: true,
            null_tokens: ["NULL", "NONE", "None", "null", "NaN"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl ReaderOptions {
    pub fn validate(&self) -> EtlResult<()> {
        if self.batch_size == 0 {
            return Err(EtlError::config("batch_size must be > 0"));
        }
        if matches!(self.delimiter, b'"' | b'\n' | b'\r') {
            return Err(EtlError::config(format!(
                "invalid source delimiter {:?}",
                self.delimiter as char
            )));
        }
        Ok(())
    }
}

/// Lazily reads a delimited file in batches of at most `batch_size` rows, projected onto a fixed
/// column list.
///
/// Single pass: once exhausted (or after an error) the iterator only returns `None`. Restarting a
/// load means opening a new reader.
pub struct ChunkedReader<R: Read = File> {
    rdr: csv::Reader<R>,
    columns: Arc<[String]>,
    projection: Vec<usize>,
    batch_size: usize,
    null_tokens: Vec<String>,
    record: csv::ByteRecord,
    rows_read: u64,
    done: bool,
}

impl ChunkedReader<File> {
    /// Open `path` and validate its header against `columns`.
    pub fn open(path: impl AsRef<Path>, columns: &[String], options: &ReaderOptions) -> EtlResult<Self> {
        let file = File::open(path)?;
        Self::from_reader(file, columns, options)
    }
}

impl<R: Read> ChunkedReader<R> {
    /// Wrap an existing reader.
    ///
    /// Rules:
    ///
    /// - With headers, every column in `columns` must be present (order can differ, extra columns
    ///   are ignored).
    /// - Without headers, `columns` map positionally onto the first fields of each record.
    pub fn from_reader(reader: R, columns: &[String], options: &ReaderOptions) -> EtlResult<Self> {
        options.validate()?;
        if columns.is_empty() {
            return Err(EtlError::schema_mismatch("no columns to project"));
        }

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(options.has_headers)
            .delimiter(options.delimiter)
            .flexible(true)
            .from_reader(reader);

        let projection = if options.has_headers {
            let headers: Vec<String> = rdr
                .byte_headers()?
                .iter()
                .map(|h| String::from_utf8_lossy(h).trim().to_string())
                .collect();

            // Map declared columns -> source column indexes (allows re-ordered source columns).
            let mut idxs = Vec::with_capacity(columns.len());
            for column in columns {
                match headers.iter().position(|h| h == column) {
                    Some(idx) => idxs.push(idx),
                    None => {
                        return Err(EtlError::schema_mismatch(format!(
                            "missing required column '{column}'. headers={headers:?}"
                        )));
                    }
                }
            }
            idxs
        } else {
            (0..columns.len()).collect()
        };

        Ok(Self {
            rdr,
            columns: columns.to_vec().into(),
            projection,
            batch_size: options.batch_size,
            null_tokens: options.null_tokens.clone(),
            record: csv::ByteRecord::new(),
            rows_read: 0,
            done: false,
        })
    }

    /// Projected column names, in declaration order.
    pub fn columns(&self) -> &Arc<[String]> {
        &self.columns
    }

    /// Data rows read so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    fn next_batch(&mut self) -> EtlResult<Option<RowBatch>> {
        let offset = self.rows_read;
        let mut rows = Vec::with_capacity(self.batch_size.min(MAX_PREALLOCATED_ROWS));
        while rows.len() < self.batch_size {
            if !self.rdr.read_byte_record(&mut self.record)? {
                self.done = true;
                break;
            }
            let row = self
                .projection
                .iter()
                .map(|&idx| self.cell(idx))
                .collect::<Vec<_>>();
            rows.push(row);
            self.rows_read += 1;
        }

        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(RowBatch::new(Arc::clone(&self.columns), rows, offset)))
    }

    fn cell(&self, idx: usize) -> Value {
        let Some(bytes) = self.record.get(idx) else {
            return Value::Null;
        };
        let raw = String::from_utf8_lossy(bytes);
        let trimmed = raw.trim();
        if trimmed.is_empty() || self.null_tokens.iter().any(|t| t == trimmed) {
            return Value::Null;
        }
        Value::Text(raw.into_owned())
    }
}

impl<R: Read> Iterator for ChunkedReader<R> {
    type Item = EtlResult<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => None,
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Count the data rows of a file by counting raw lines (minus the header line, if any).
///
/// Quoted fields with embedded newlines make this over-count; the result is only used for
/// progress reporting.
pub fn count_data_lines(path: impl AsRef<Path>, has_headers: bool) -> EtlResult<u64> {
    let mut reader = BufReader::with_capacity(1 << 16, File::open(path)?);
    let mut lines = 0u64;
    let mut last = None;
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            break;
        }
        lines += buf.iter().filter(|&&b| b == b'\n').count() as u64;
        last = buf.last().copied();
        let n = buf.len();
        reader.consume(n);
    }
    if matches!(last, Some(b) if b != b'\n') {
        lines += 1;
    }
    if has_headers {
        lines = lines.saturating_sub(1);
    }
    Ok(lines)
}
