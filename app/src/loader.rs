// ==============================================================================
// loader.rs - Chunked Bulk Loader
// ==============================================================================
// Description: Groups normalized records into chunks and commits each atomically
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::task;
use tracing::{debug, error};

use crate::retry::{Clock, RetryPolicy, TokioClock};
use crate::schema::{AssociationRecord, TableSpec};
use crate::storage::AssociationStore;

pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// A chunk that was never committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkFailure {
    /// 1-based chunk number within the file
    pub ordinal: usize,
    pub rows: usize,
    pub attempts: u32,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub rows_submitted: u64,
    pub rows_committed: u64,
    pub chunks_submitted: usize,
    pub failed_chunks: Vec<ChunkFailure>,
}

impl LoadReport {
    pub fn rows_lost(&self) -> u64 {
        self.rows_submitted - self.rows_committed
    }
}

/// Streams records into the store `chunk_size` rows at a time
///
/// At most one chunk is buffered. A chunk that still fails after its
/// retries is recorded and skipped; earlier chunks stay committed and later
/// chunks are still attempted.
#[derive(Clone)]
pub struct BulkLoader {
    chunk_size: usize,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for BulkLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkLoader")
            .field("chunk_size", &self.chunk_size)
            .field("retry", &self.retry)
            .finish()
    }
}

impl BulkLoader {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            retry: RetryPolicy::none(),
            clock: Arc::new(TokioClock),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Commit `records` chunk by chunk, in source order
    ///
    /// Each chunk is filled on the blocking pool, so decompression and parsing
    /// never run on a runtime worker thread. The sequence is handed back with
    /// the report; `None` means the thread filling a chunk panicked.
    pub async fn load<I>(
        &self,
        store: &dyn AssociationStore,
        table: &TableSpec,
        source: &Path,
        records: I,
    ) -> (LoadReport, Option<I>)
    where
        I: Iterator<Item = AssociationRecord> + Send + 'static,
    {
        let mut records = records;
        let mut report = LoadReport::default();
        let mut ordinal = 0usize;

        loop {
            let chunk_size = self.chunk_size;
            let filled = task::spawn_blocking(move || {
                let chunk: Vec<AssociationRecord> = records.by_ref().take(chunk_size).collect();
                (chunk, records)
            })
            .await;

            let chunk = match filled {
                Ok((chunk, rest)) => {
                    records = rest;
                    chunk
                }
                Err(e) => {
                    error!("{}: chunk reader aborted: {}", source.display(), e);
                    return (report, None);
                }
            };
            if chunk.is_empty() {
                break;
            }

            ordinal += 1;
            report.chunks_submitted += 1;
            report.rows_submitted += chunk.len() as u64;

            let operation = format!("Chunk {} of {}", ordinal, source.display());
            let result = self
                .retry
                .run(self.clock.as_ref(), &operation, |_| {
                    store.insert_batch(table, &chunk)
                })
                .await;

            match result {
                Ok(committed) => {
                    debug!("{}: committed {} rows", operation, committed);
                    report.rows_committed += committed;
                }
                Err(e) => {
                    error!(
                        "{}: {} rows not committed after {} attempt(s): {}",
                        operation,
                        chunk.len(),
                        e.attempts,
                        e.last_error
                    );
                    report.failed_chunks.push(ChunkFailure {
                        ordinal,
                        rows: chunk.len(),
                        attempts: e.attempts,
                        error: e.last_error.to_string(),
                    });
                }
            }

            if chunk.len() < self.chunk_size {
                break;
            }
        }

        (report, Some(records))
    }
}

impl Default for BulkLoader {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}
