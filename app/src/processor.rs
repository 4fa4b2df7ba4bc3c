// ==============================================================================
// processor.rs - eQTL Ingestion Driver
// ==============================================================================
// Description: Discovers association files and runs Reader -> Normalizer -> Loader
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// Per-file state machine:
//   Pending -> Reading -> Loading -> Completed | Failed
// Failed only on reader-level errors or missing required columns. Chunk
// failures leave the file Completed with a partial row count.
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::{matches_pattern, ConfigError, IngestConfig};
use crate::loader::{BulkLoader, ChunkFailure};
use crate::normalizer::{NormalizeError, RowNormalizer};
use crate::parsers::{EqtlTsvReader, SourceError};
use crate::retry::Clock;
use crate::schema::{AssociationRecord, SchemaVersion, TableSpec};
use crate::storage::{AssociationStore, StorageError};
use crate::validator::{self, SourceFingerprint};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Schema preparation failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker pool failure: {0}")]
    WorkerPool(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Pending,
    Reading,
    Loading,
    Completed,
    Failed,
}

/// Why a file ended up `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileErrorKind {
    SourceNotFound,
    SourceRead,
    SchemaMismatch,
    WorkerPanic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub file: PathBuf,
    pub dataset_id: Option<String>,
    pub state: FileState,
    pub rows_read: u64,
    pub rows_ingested: u64,
    pub rows_rejected: u64,
    pub chunks_submitted: usize,
    pub failed_chunks: Vec<ChunkFailure>,
    pub error: Option<String>,
    pub error_kind: Option<FileErrorKind>,
    pub fingerprint: Option<SourceFingerprint>,
}

impl FileOutcome {
    fn new(file: &Path) -> Self {
        Self {
            file: file.to_path_buf(),
            dataset_id: None,
            state: FileState::Pending,
            rows_read: 0,
            rows_ingested: 0,
            rows_rejected: 0,
            chunks_submitted: 0,
            failed_chunks: Vec::new(),
            error: None,
            error_kind: None,
            fingerprint: None,
        }
    }

    fn transition(&mut self, next: FileState) {
        debug!("{}: {:?} -> {:?}", self.file.display(), self.state, next);
        self.state = next;
    }

    fn fail(mut self, kind: FileErrorKind, error: impl ToString) -> Self {
        let error = error.to_string();
        warn!("{}: failed: {}", self.file.display(), error);
        self.transition(FileState::Failed);
        self.error_kind = Some(kind);
        self.error = Some(error);
        self
    }

    pub fn is_failed(&self) -> bool {
        self.state == FileState::Failed
    }
}

/// Result of one ingestion run, in discovery order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub table: String,
    pub schema_version: SchemaVersion,
    pub files: Vec<FileOutcome>,
}

impl RunSummary {
    pub fn total_files(&self) -> usize {
        self.files.len()
    }

    /// Rows committed across all files
    pub fn total_rows(&self) -> u64 {
        self.files.iter().map(|f| f.rows_ingested).sum()
    }

    pub fn rejected_rows(&self) -> u64 {
        self.files.iter().map(|f| f.rows_rejected).sum()
    }

    pub fn failed_files(&self) -> Vec<&FileOutcome> {
        self.files.iter().filter(|f| f.is_failed()).collect()
    }

    pub fn failed_chunks(&self) -> usize {
        self.files.iter().map(|f| f.failed_chunks.len()).sum()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Ingestion run {} into {} ({})", self.run_id, self.table, self.schema_version)?;
        writeln!(f, "  Total files:   {}", self.total_files())?;
        writeln!(f, "  Total rows:    {}", self.total_rows())?;
        writeln!(f, "  Rejected rows: {}", self.rejected_rows())?;
        writeln!(f, "  Failed chunks: {}", self.failed_chunks())?;
        write!(f, "  Failed files:  {}", self.failed_files().len())?;

        for failed in self.failed_files() {
            write!(
                f,
                "\n    {}: {}",
                failed.file.display(),
                failed.error.as_deref().unwrap_or("unknown error")
            )?;
        }
        Ok(())
    }
}

/// Normalized record stream over one reader
///
/// Rejected rows are counted and skipped. A read error ends the stream and
/// is kept so the file can be marked failed after the rows before it load.
struct NormalizedRows {
    reader: EqtlTsvReader,
    normalizer: RowNormalizer,
    rows_read: u64,
    rows_rejected: u64,
    read_error: Option<SourceError>,
}

impl NormalizedRows {
    fn new(reader: EqtlTsvReader, normalizer: RowNormalizer) -> Self {
        Self {
            reader,
            normalizer,
            rows_read: 0,
            rows_rejected: 0,
            read_error: None,
        }
    }
}

impl Iterator for NormalizedRows {
    type Item = AssociationRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.reader.next()? {
                Ok(raw) => {
                    self.rows_read += 1;
                    match self.normalizer.normalize(&raw) {
                        Ok(record) => return Some(record),
                        Err(e) => {
                            self.rows_rejected += 1;
                            warn!("{}: rejected {}", self.reader.path().display(), e);
                        }
                    }
                }
                Err(e) => {
                    self.read_error = Some(e);
                    return None;
                }
            }
        }
    }
}

pub struct IngestionDriver {
    config: IngestConfig,
    table: TableSpec,
    store: Arc<dyn AssociationStore>,
    loader: BulkLoader,
}

impl IngestionDriver {
    pub fn new(config: IngestConfig, store: Arc<dyn AssociationStore>) -> Result<Self, IngestError> {
        config.validate()?;
        let table = config.table_spec()?;
        let loader = BulkLoader::new(config.chunk_size).with_retry(config.chunk_retry_policy());

        Ok(Self {
            config,
            table,
            store,
            loader,
        })
    }

    /// Replace the clock used for chunk retry delays
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.loader = self.loader.with_clock(clock);
        self
    }

    pub fn table(&self) -> &TableSpec {
        &self.table
    }

    /// Matching regular files directly under the data directory, sorted by path
    ///
    /// A missing or unreadable directory yields no files, like an empty one.
    pub fn discover_files(&self) -> Vec<PathBuf> {
        let dir = &self.config.data_dir;
        if !dir.is_dir() {
            warn!("Data directory {} does not exist or is not a directory", dir.display());
            return Vec::new();
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    continue;
                }
            };

            let name = entry.file_name().to_string_lossy();
            if entry.file_type().is_file() && matches_pattern(&self.config.pattern, &name) {
                files.push(entry.into_path());
            }
        }

        files.sort();
        files
    }

    /// Create the table if needed; drop it first only on explicit request
    pub async fn prepare_schema(&self) -> Result<(), IngestError> {
        if self.config.reset_schema {
            warn!("Resetting table {}; existing rows will be lost", self.table);
            self.store.reset_schema(&self.table).await?;
        } else {
            self.store.ensure_schema(&self.table).await?;
        }
        Ok(())
    }

    pub async fn run(&self) -> Result<RunSummary, IngestError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let files = self.discover_files();
        if files.is_empty() {
            warn!(
                "No files matching {} found in {}",
                self.config.pattern,
                self.config.data_dir.display()
            );
        } else {
            info!(
                "Run {}: {} file(s) to ingest into {} with {} worker(s)",
                run_id,
                files.len(),
                self.table,
                self.config.workers
            );
        }

        self.prepare_schema().await?;

        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut tasks = JoinSet::new();

        // Permits are taken in discovery order, so with one worker files run
        // strictly one after another
        for (idx, path) in files.iter().cloned().enumerate() {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| IngestError::WorkerPool(e.to_string()))?;

            let store = Arc::clone(&self.store);
            let loader = self.loader.clone();
            let table = self.table.clone();
            let hash_sources = self.config.hash_sources;

            tasks.spawn(async move {
                let outcome = ingest_file(store.as_ref(), &loader, &table, &path, hash_sources).await;
                drop(permit);
                (idx, outcome)
            });
        }

        let mut slots: Vec<Option<FileOutcome>> = files.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => slots[idx] = Some(outcome),
                Err(e) => error!("Ingestion task aborted: {}", e),
            }
        }

        let outcomes: Vec<FileOutcome> = slots
            .into_iter()
            .zip(files.iter())
            .map(|(slot, path)| {
                slot.unwrap_or_else(|| {
                    FileOutcome::new(path).fail(FileErrorKind::WorkerPanic, "ingestion task panicked")
                })
            })
            .collect();

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            table: self.table.name().to_string(),
            schema_version: self.table.version(),
            files: outcomes,
        };

        info!(
            "Run {} finished: {} file(s), {} rows ingested, {} rejected, {} failed file(s)",
            run_id,
            summary.total_files(),
            summary.total_rows(),
            summary.rejected_rows(),
            summary.failed_files().len()
        );

        Ok(summary)
    }
}

/// Ingest one file; never fails, the outcome carries any error
pub async fn ingest_file(
    store: &dyn AssociationStore,
    loader: &BulkLoader,
    table: &TableSpec,
    path: &Path,
    hash_sources: bool,
) -> FileOutcome {
    let mut outcome = FileOutcome::new(path);
    info!("Ingesting {}", path.display());
    outcome.transition(FileState::Reading);

    // Opening reads the header and hashing reads the whole file
    let source = path.to_path_buf();
    let opened = task::spawn_blocking(move || {
        let reader = EqtlTsvReader::open(&source)?;
        let fingerprint = validator::inspect_source(&source, hash_sources);
        Ok::<_, SourceError>((reader, fingerprint))
    })
    .await;

    let reader = match opened {
        Ok(Ok((reader, fingerprint))) => {
            match fingerprint {
                Ok(fingerprint) => outcome.fingerprint = Some(fingerprint),
                Err(e) => warn!("{}: could not fingerprint source: {}", path.display(), e),
            }
            reader
        }
        Ok(Err(e)) => {
            let kind = match e {
                SourceError::NotFound(_) => FileErrorKind::SourceNotFound,
                SourceError::Read { .. } => FileErrorKind::SourceRead,
            };
            return outcome.fail(kind, e);
        }
        Err(e) => return outcome.fail(FileErrorKind::WorkerPanic, e),
    };

    let normalizer = match RowNormalizer::new(reader.headers(), table.version(), path) {
        Ok(normalizer) => normalizer,
        Err(e @ NormalizeError::SchemaMismatch { .. }) => {
            return outcome.fail(FileErrorKind::SchemaMismatch, e)
        }
        Err(e) => return outcome.fail(FileErrorKind::SourceRead, e),
    };
    outcome.dataset_id = normalizer.dataset_id().map(str::to_string);

    outcome.transition(FileState::Loading);
    let rows = NormalizedRows::new(reader, normalizer);
    let (report, rows) = loader.load(store, table, path, rows).await;

    outcome.rows_ingested = report.rows_committed;
    outcome.chunks_submitted = report.chunks_submitted;
    outcome.failed_chunks = report.failed_chunks;

    let rows = match rows {
        Some(rows) => rows,
        None => return outcome.fail(FileErrorKind::WorkerPanic, "chunk reader panicked"),
    };
    outcome.rows_read = rows.rows_read;
    outcome.rows_rejected = rows.rows_rejected;

    if let Some(e) = rows.read_error {
        return outcome.fail(FileErrorKind::SourceRead, e);
    }

    outcome.transition(FileState::Completed);
    info!(
        "{}: {} rows read, {} ingested, {} rejected, {} failed chunk(s)",
        path.display(),
        outcome.rows_read,
        outcome.rows_ingested,
        outcome.rows_rejected,
        outcome.failed_chunks.len()
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use crate::storage::MemoryStore;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn header() -> String {
        Field::ALL.iter().map(|f| f.name()).collect::<Vec<_>>().join("\t")
    }

    fn data_row(i: usize) -> String {
        format!(
            "ENSG{:08}\t1\t{}\tA\tT\tchr1_{}_A_T\t10\t0.1\t0.001\t0.5\t0.1\tSNP\t20\t200\t0.9\tENSG{:08}\t3.5\trs{}",
            i, i, i, i, i
        )
    }

    fn write_gz(dir: &TempDir, name: &str, lines: &[String]) -> PathBuf {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        for line in lines {
            writeln!(encoder, "{}", line).unwrap();
        }
        let path = dir.path().join(name);
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();
        path
    }

    fn file_with_rows(dir: &TempDir, name: &str, n: usize) -> PathBuf {
        let mut lines = vec![header()];
        lines.extend((0..n).map(data_row));
        write_gz(dir, name, &lines)
    }

    fn config(dir: &TempDir) -> IngestConfig {
        IngestConfig {
            data_dir: dir.path().to_path_buf(),
            chunk_retries: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_discovery_is_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        file_with_rows(&dir, "QTD000002.cc.tsv.gz", 1);
        file_with_rows(&dir, "QTD000001.cc.tsv.gz", 1);
        file_with_rows(&dir, "QTD000001.all.tsv.gz", 1);
        std::fs::create_dir(dir.path().join("nested.cc.tsv.gz")).unwrap();

        let driver = IngestionDriver::new(config(&dir), Arc::new(MemoryStore::new())).unwrap();
        let names: Vec<String> = driver
            .discover_files()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["QTD000001.cc.tsv.gz", "QTD000002.cc.tsv.gz"]);
    }

    #[tokio::test]
    async fn test_missing_data_dir_is_an_empty_run() {
        let dir = TempDir::new().unwrap();
        let config = IngestConfig {
            data_dir: dir.path().join("absent"),
            ..Default::default()
        };

        let store = Arc::new(MemoryStore::new());
        let driver = IngestionDriver::new(config, store.clone()).unwrap();
        assert!(driver.discover_files().is_empty());

        let summary = driver.run().await.unwrap();
        assert_eq!(summary.total_files(), 0);
        assert!(summary.failed_files().is_empty());
        // Schema is still prepared
        assert_eq!(store.count_rows(driver.table()).await.unwrap(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = IngestConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            IngestionDriver::new(config, Arc::new(MemoryStore::new())),
            Err(IngestError::Config(ConfigError::InvalidChunkSize))
        ));
    }

    #[tokio::test]
    async fn test_empty_directory_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let driver = IngestionDriver::new(config(&dir), store.clone()).unwrap();

        let summary = driver.run().await.unwrap();
        assert_eq!(summary.total_files(), 0);
        // Schema is still prepared
        assert_eq!(store.count_rows(driver.table()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_schema_mismatch_fails_file_only() {
        let dir = TempDir::new().unwrap();
        file_with_rows(&dir, "QTD000001.cc.tsv.gz", 3);
        write_gz(
            &dir,
            "QTD000002.cc.tsv.gz",
            &["molecular_trait_id\tchromosome".to_string(), "ENSG1\t1".to_string()],
        );
        file_with_rows(&dir, "QTD000003.cc.tsv.gz", 2);

        let driver = IngestionDriver::new(config(&dir), Arc::new(MemoryStore::new())).unwrap();
        let summary = driver.run().await.unwrap();

        assert_eq!(summary.total_files(), 3);
        assert_eq!(summary.total_rows(), 5);

        let failed = summary.failed_files();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].file.ends_with("QTD000002.cc.tsv.gz"));
        assert_eq!(failed[0].error_kind, Some(FileErrorKind::SchemaMismatch));
        assert!(failed[0].error.as_deref().unwrap().contains("pvalue"));
    }

    #[tokio::test]
    async fn test_missing_file_outcome() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let table = TableSpec::default();
        store.ensure_schema(&table).await.unwrap();

        let outcome = ingest_file(
            &store,
            &BulkLoader::new(10),
            &table,
            &dir.path().join("gone.cc.tsv.gz"),
            false,
        )
        .await;

        assert_eq!(outcome.state, FileState::Failed);
        assert_eq!(outcome.error_kind, Some(FileErrorKind::SourceNotFound));
        assert_eq!(store.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_truncated_file_loads_prefix_then_fails() {
        let dir = TempDir::new().unwrap();
        let full = file_with_rows(&dir, "full.cc.tsv.gz", 4_000);
        let bytes = std::fs::read(&full).unwrap();
        let truncated = dir.path().join("QTD000009.cc.tsv.gz");
        std::fs::write(&truncated, &bytes[..bytes.len() / 2]).unwrap();

        let store = MemoryStore::new();
        let table = TableSpec::default();
        store.ensure_schema(&table).await.unwrap();

        let outcome = ingest_file(&store, &BulkLoader::new(500), &table, &truncated, false).await;

        assert_eq!(outcome.state, FileState::Failed);
        assert_eq!(outcome.error_kind, Some(FileErrorKind::SourceRead));
        assert!(outcome.rows_read > 0 && outcome.rows_read < 4_000);
        assert_eq!(outcome.rows_ingested, outcome.rows_read);
        assert_eq!(store.count_rows(&table).await.unwrap() as u64, outcome.rows_read);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_file_reading_leaves_runtime_responsive() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::{Duration, Instant};

        let dir = TempDir::new().unwrap();
        let path = file_with_rows(&dir, "QTD000500.cc.tsv.gz", 150_000);

        let store = Arc::new(MemoryStore::new());
        let table = TableSpec::default();
        store.ensure_schema(&table).await.unwrap();

        // Shares the single runtime worker with the ingestion task
        let done = Arc::new(AtomicBool::new(false));
        let ticker = tokio::spawn({
            let done = Arc::clone(&done);
            async move {
                let mut longest = Duration::ZERO;
                let mut last = Instant::now();
                while !done.load(Ordering::Relaxed) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    longest = longest.max(last.elapsed());
                    last = Instant::now();
                }
                longest
            }
        });

        let ingest = tokio::spawn({
            let store = Arc::clone(&store);
            async move {
                ingest_file(store.as_ref(), &BulkLoader::new(150_000), &table, &path, true).await
            }
        });

        let outcome = ingest.await.unwrap();
        done.store(true, Ordering::Relaxed);
        let longest = ticker.await.unwrap();

        assert_eq!(outcome.state, FileState::Completed);
        assert_eq!(outcome.rows_ingested, 150_000);
        assert!(outcome.fingerprint.unwrap().sha256.is_some());
        assert!(longest < Duration::from_secs(1), "runtime stalled for {:?}", longest);
    }

    #[tokio::test]
    async fn test_fingerprint_and_dataset_id_recorded() {
        let dir = TempDir::new().unwrap();
        file_with_rows(&dir, "QTD000393.cc.tsv.gz", 2);

        let driver = IngestionDriver::new(config(&dir), Arc::new(MemoryStore::new())).unwrap();
        let summary = driver.run().await.unwrap();
        let outcome = &summary.files[0];

        assert_eq!(outcome.state, FileState::Completed);
        assert_eq!(outcome.dataset_id.as_deref(), Some("QTD000393"));
        let fingerprint = outcome.fingerprint.as_ref().unwrap();
        assert!(fingerprint.gzip);
        assert!(fingerprint.sha256.is_some());
    }

    #[tokio::test]
    async fn test_worker_pool_preserves_discovery_order() {
        let dir = TempDir::new().unwrap();
        for i in 0..6 {
            file_with_rows(&dir, &format!("QTD00000{}.cc.tsv.gz", i), i + 1);
        }

        let config = IngestConfig {
            workers: 3,
            chunk_size: 2,
            ..config(&dir)
        };
        let store = Arc::new(MemoryStore::new());
        let driver = IngestionDriver::new(config, store.clone()).unwrap();
        let summary = driver.run().await.unwrap();

        let ingested: Vec<u64> = summary.files.iter().map(|f| f.rows_ingested).collect();
        assert_eq!(ingested, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(store.count_rows(driver.table()).await.unwrap(), 21);
    }

    #[test]
    fn test_summary_display_lists_failed_files() {
        let summary = RunSummary {
            run_id: Uuid::nil(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            table: "eqtl_data".to_string(),
            schema_version: SchemaVersion::V2,
            files: vec![
                FileOutcome::new(Path::new("a.cc.tsv.gz")),
                FileOutcome::new(Path::new("b.cc.tsv.gz"))
                    .fail(FileErrorKind::SourceRead, "unexpected end of file"),
            ],
        };

        let text = summary.to_string();
        assert!(text.contains("Total files:   2"));
        assert!(text.contains("Failed files:  1"));
        assert!(text.contains("b.cc.tsv.gz: unexpected end of file"));
    }
}
