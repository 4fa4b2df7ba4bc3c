// ==============================================================================
// storage/mod.rs - Association Store Abstraction
// ==============================================================================
// Description: Storage trait shared by the ingestion driver and the query API
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgAssociationStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::{AssociationRecord, SchemaError, StoredAssociation, TableSpec};

/// Maximum rows returned by a lookup
pub const LOOKUP_LIMIT: i64 = 100;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Table {0} does not exist")]
    MissingTable(String),

    #[error("Table {table} does not match schema {expected}: found columns [{found}]")]
    SchemaDrift {
        table: String,
        expected: String,
        found: String,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Equality filters plus an inclusive p-value ceiling
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssociationQuery {
    pub molecular_trait_id: Option<String>,
    pub gene_id: Option<String>,
    pub chromosome: Option<String>,
    pub variant: Option<String>,
    /// `pvalue <= pvalue_max`; rows with a NULL pvalue never match
    pub pvalue_max: Option<f64>,
}

impl AssociationQuery {
    pub fn matches(&self, record: &AssociationRecord) -> bool {
        fn eq(filter: &Option<String>, value: &Option<String>) -> bool {
            match filter {
                Some(wanted) => value.as_deref() == Some(wanted.as_str()),
                None => true,
            }
        }

        let pvalue_ok = match self.pvalue_max {
            Some(max) => record.pvalue.map(|p| p <= max).unwrap_or(false),
            None => true,
        };

        eq(&self.molecular_trait_id, &record.molecular_trait_id)
            && eq(&self.gene_id, &record.gene_id)
            && eq(&self.chromosome, &record.chromosome)
            && eq(&self.variant, &record.variant)
            && pvalue_ok
    }
}

/// Persistence seam for association records
///
/// `insert_batch` is all-or-nothing: either every row of the batch is
/// visible afterwards or none is.
#[async_trait]
pub trait AssociationStore: Send + Sync {
    /// Create the table and indexes if absent; an existing table must match
    async fn ensure_schema(&self, table: &TableSpec) -> Result<(), StorageError>;

    /// Drop and recreate the table
    async fn reset_schema(&self, table: &TableSpec) -> Result<(), StorageError>;

    /// Insert one batch atomically, returning the rows committed
    async fn insert_batch(
        &self,
        table: &TableSpec,
        rows: &[AssociationRecord],
    ) -> Result<u64, StorageError>;

    /// Connectivity probe
    async fn ping(&self) -> Result<(), StorageError>;

    async fn count_rows(&self, table: &TableSpec) -> Result<i64, StorageError>;

    /// Filtered read ordered by id, capped at `LOOKUP_LIMIT`
    async fn lookup(
        &self,
        table: &TableSpec,
        query: &AssociationQuery,
    ) -> Result<Vec<StoredAssociation>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(gene: &str, chromosome: &str, pvalue: Option<f64>) -> AssociationRecord {
        AssociationRecord {
            gene_id: Some(gene.to_string()),
            chromosome: Some(chromosome.to_string()),
            pvalue,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let query = AssociationQuery::default();
        assert!(query.matches(&AssociationRecord::default()));
    }

    #[test]
    fn test_equality_filters() {
        let query = AssociationQuery {
            gene_id: Some("ENSG01".to_string()),
            chromosome: Some("1".to_string()),
            ..Default::default()
        };

        assert!(query.matches(&record("ENSG01", "1", None)));
        assert!(!query.matches(&record("ENSG01", "2", None)));
        assert!(!query.matches(&record("ENSG02", "1", None)));
        assert!(!query.matches(&AssociationRecord::default()));
    }

    #[test]
    fn test_pvalue_ceiling_is_inclusive_and_skips_nulls() {
        let query = AssociationQuery {
            pvalue_max: Some(0.05),
            ..Default::default()
        };

        assert!(query.matches(&record("g", "1", Some(0.05))));
        assert!(query.matches(&record("g", "1", Some(1e-10))));
        assert!(!query.matches(&record("g", "1", Some(0.051))));
        assert!(!query.matches(&record("g", "1", None)));
    }

    #[test]
    fn test_zero_threshold_still_filters() {
        let query = AssociationQuery {
            pvalue_max: Some(0.0),
            ..Default::default()
        };

        assert!(query.matches(&record("g", "1", Some(0.0))));
        assert!(!query.matches(&record("g", "1", Some(0.2))));
    }
}
