// ==============================================================================
// config.rs - Ingestion Run Configuration
// ==============================================================================
// Description: Validated settings for one ingestion run
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::loader::DEFAULT_CHUNK_SIZE;
use crate::retry::RetryPolicy;
use crate::schema::{SchemaError, SchemaVersion, TableSpec, DEFAULT_TABLE};

/// Glob used by the upstream loader for credible-set exports
pub const DEFAULT_PATTERN: &str = "*.cc.tsv.gz";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_CHUNK_RETRIES: u32 = 2;
pub const DEFAULT_CHUNK_RETRY_DELAY: Duration = Duration::from_millis(1_000);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Chunk size must be at least 1")]
    InvalidChunkSize,

    #[error("Worker count must be at least 1")]
    InvalidWorkers,

    #[error(transparent)]
    Table(#[from] SchemaError),

    #[error("Invalid file pattern: {0:?}")]
    InvalidPattern(String),

    #[error("DATABASE_URL or DATABASE_URL_FILE must be provided")]
    MissingDatabaseUrl,

    #[error("Failed to read DATABASE_URL_FILE {}: {source}", path.display())]
    DatabaseUrlFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    pub data_dir: PathBuf,
    /// File name pattern; `*` and `?` wildcards
    pub pattern: String,
    pub table: String,
    pub schema_version: SchemaVersion,
    pub chunk_size: usize,
    /// Extra attempts per chunk after the first
    pub chunk_retries: u32,
    pub chunk_retry_delay: Duration,
    /// Drop and recreate the table before loading
    pub reset_schema: bool,
    pub workers: usize,
    /// SHA-256 every source file before reading it
    pub hash_sources: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            pattern: DEFAULT_PATTERN.to_string(),
            table: DEFAULT_TABLE.to_string(),
            schema_version: SchemaVersion::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_retries: DEFAULT_CHUNK_RETRIES,
            chunk_retry_delay: DEFAULT_CHUNK_RETRY_DELAY,
            reset_schema: false,
            workers: 1,
            hash_sources: true,
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize);
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidWorkers);
        }
        if self.pattern.is_empty() || self.pattern.contains('/') {
            return Err(ConfigError::InvalidPattern(self.pattern.clone()));
        }
        self.table_spec()?;
        Ok(())
    }

    pub fn table_spec(&self) -> Result<TableSpec, ConfigError> {
        Ok(TableSpec::new(self.table.clone(), self.schema_version)?)
    }

    pub fn chunk_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.chunk_retries.saturating_add(1), self.chunk_retry_delay)
    }
}

/// Explicit URL first, then the contents of `DATABASE_URL_FILE`
pub fn resolve_database_url(
    explicit: Option<String>,
    url_file: Option<&Path>,
) -> Result<String, ConfigError> {
    if let Some(url) = explicit.filter(|u| !u.trim().is_empty()) {
        return Ok(url);
    }

    match url_file {
        Some(path) => std::fs::read_to_string(path)
            .map(|contents| contents.trim().to_string())
            .map_err(|source| ConfigError::DatabaseUrlFile {
                path: path.to_path_buf(),
                source,
            }),
        None => Err(ConfigError::MissingDatabaseUrl),
    }
}

/// Shell-style match of a file name against `*` / `?` wildcards
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();

    let (mut p, mut n) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            resume = n;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            resume += 1;
            n = resume;
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size, 100_000);
        assert_eq!(config.chunk_retry_policy().max_attempts, 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_chunk = IngestConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(zero_chunk.validate(), Err(ConfigError::InvalidChunkSize)));

        let zero_workers = IngestConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(zero_workers.validate(), Err(ConfigError::InvalidWorkers)));

        let bad_table = IngestConfig {
            table: "eqtl data".to_string(),
            ..Default::default()
        };
        assert!(matches!(bad_table.validate(), Err(ConfigError::Table(_))));

        let nested_pattern = IngestConfig {
            pattern: "sub/*.tsv.gz".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            nested_pattern.validate(),
            Err(ConfigError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern("*.cc.tsv.gz", "QTD000393.cc.tsv.gz"));
        assert!(!matches_pattern("*.cc.tsv.gz", "QTD000393.all.tsv.gz"));
        assert!(!matches_pattern("*.cc.tsv.gz", "QTD000393.cc.tsv.gz.tbi"));
        assert!(matches_pattern("QTD00039?.*", "QTD000393.cc.tsv.gz"));
        assert!(matches_pattern("*", "anything"));
        assert!(matches_pattern("*.tsv*", "a.tsv.gz"));
        assert!(!matches_pattern("?", ""));
    }

    #[test]
    fn test_resolve_database_url() {
        assert_eq!(
            resolve_database_url(Some("postgres://a".to_string()), None).unwrap(),
            "postgres://a"
        );
        assert!(matches!(
            resolve_database_url(None, None),
            Err(ConfigError::MissingDatabaseUrl)
        ));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "  postgres://from-file  ").unwrap();
        assert_eq!(
            resolve_database_url(Some(String::new()), Some(file.path())).unwrap(),
            "postgres://from-file"
        );

        assert!(matches!(
            resolve_database_url(None, Some(Path::new("/nonexistent/url"))),
            Err(ConfigError::DatabaseUrlFile { .. })
        ));
    }
}
