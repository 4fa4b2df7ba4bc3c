// ==============================================================================
// parsers/eqtl_tsv.rs - eQTL Summary Statistics Reader
// ==============================================================================
// Description: Streaming reader for (gzipped) tab-delimited eQTL association files
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// Format: Tab-delimited text with a single header row, usually gzip/bgzip
// compressed (*.cc.tsv.gz / *.all.tsv.gz from the eQTL Catalogue)
// Example:
//   molecular_trait_id  chromosome  position  ref  alt  variant  ...  rsid
//   ENSG00000187583     1           14464     A    T    chr1_14464_A_T  ...
// ==============================================================================

use csv::{ByteRecord, ReaderBuilder, StringRecord};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::validator;

/// Internal read buffer; large files are decompressed through this window
const READ_BUFFER_CAPACITY: usize = 1 << 20;

/// One data row as read from the file, before any typing
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 1-based data row number (the header row is not counted)
    pub index: usize,
    pub cells: StringRecord,
    /// False when the raw bytes were not UTF-8; `cells` then holds a lossy copy
    pub valid_utf8: bool,
}

impl RawRow {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, position: usize) -> Option<&str> {
        self.cells.get(position)
    }
}

/// Errors that end the row sequence of a file
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Source file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read {}: {details}", path.display())]
    Read { path: PathBuf, details: String },
}

impl SourceError {
    fn read(path: &Path, details: impl ToString) -> Self {
        SourceError::Read {
            path: path.to_path_buf(),
            details: details.to_string(),
        }
    }
}

/// Lazy row iterator over one association file
///
/// Decompression and tab splitting are streamed, so memory use is bounded by
/// the read buffer rather than the file size. Reopening the path restarts the
/// sequence. After a read error the iterator yields that error once and then
/// ends.
pub struct EqtlTsvReader {
    path: PathBuf,
    headers: StringRecord,
    inner: csv::Reader<Box<dyn Read + Send>>,
    rows_read: usize,
    finished: bool,
}

impl std::fmt::Debug for EqtlTsvReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EqtlTsvReader")
            .field("path", &self.path)
            .field("columns", &self.headers.len())
            .field("rows_read", &self.rows_read)
            .finish()
    }
}

impl EqtlTsvReader {
    /// Open a file and read its header row
    ///
    /// Gzip input is detected from the magic number, so plain `.tsv` files
    /// are accepted too. Multi-member streams (bgzip) are decoded in full.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(SourceError::NotFound(path.to_path_buf()));
        }

        let gzip = validator::is_gzip(path).map_err(|e| SourceError::read(path, e))?;
        let file = File::open(path).map_err(|e| SourceError::read(path, e))?;

        let input: Box<dyn Read + Send> = if gzip {
            Box::new(MultiGzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(file)
        };

        let mut inner = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .quoting(false)
            .buffer_capacity(READ_BUFFER_CAPACITY)
            .from_reader(input);

        let headers = inner
            .headers()
            .map_err(|e| SourceError::read(path, e))?
            .clone();

        if headers.is_empty() {
            return Err(SourceError::read(path, "file is empty (no header row)"));
        }

        Ok(Self {
            path: path.to_path_buf(),
            headers,
            inner,
            rows_read: 0,
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    /// Data rows yielded so far
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }
}

impl Iterator for EqtlTsvReader {
    type Item = Result<RawRow, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut record = ByteRecord::new();
        match self.inner.read_byte_record(&mut record) {
            Ok(true) => {
                self.rows_read += 1;
                // Invalid UTF-8 is flagged on the row, not fatal for the file
                let (cells, valid_utf8) = match StringRecord::from_byte_record(record) {
                    Ok(cells) => (cells, true),
                    Err(e) => (StringRecord::from_byte_record_lossy(e.into_byte_record()), false),
                };
                Some(Ok(RawRow {
                    index: self.rows_read,
                    cells,
                    valid_utf8,
                }))
            }
            Ok(false) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(SourceError::read(
                    &self.path,
                    format!("after data row {}: {}", self.rows_read, e),
                )))
            }
        }
    }
}
