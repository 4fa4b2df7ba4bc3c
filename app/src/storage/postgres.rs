// ==============================================================================
// storage/postgres.rs - PostgreSQL Association Store
// ==============================================================================
// Description: sqlx-backed store with transactional multi-row inserts
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// Batches are written inside one transaction. Postgres caps a statement at
// 65535 bind parameters, so a batch is split into several multi-row INSERT
// statements that share the transaction; a failure in any of them rolls the
// whole batch back.
// ==============================================================================

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use std::time::Duration;
use tracing::{debug, info};

use super::{AssociationQuery, AssociationStore, StorageError, LOOKUP_LIMIT};
use crate::retry::{Clock, RetryError, RetryPolicy};
use crate::schema::{quote_ident, AssociationRecord, StoredAssociation, TableSpec, DATASET_ID_COLUMN};

/// Postgres wire protocol limit on bind parameters per statement
const MAX_BIND_PARAMS: usize = 65_535;

/// `undefined_table`
const PG_UNDEFINED_TABLE: &str = "42P01";

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PgAssociationStore {
    pool: PgPool,
}

impl PgAssociationStore {
    /// Connect and probe with `SELECT 1`, retrying per `policy`
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        policy: &RetryPolicy,
        clock: &dyn Clock,
    ) -> Result<Self, RetryError<sqlx::Error>> {
        let pool = policy
            .run(clock, "Database connection", |attempt| async move {
                debug!("Connecting to database (attempt {})", attempt);
                let pool = PgPoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .connect(database_url)
                    .await?;
                sqlx::query("SELECT 1").execute(&pool).await?;
                Ok::<_, sqlx::Error>(pool)
            })
            .await?;

        info!("Connected to database");
        Ok(Self { pool })
    }

    /// Compare the live column list against the expected record shape
    async fn verify_columns(&self, table: &TableSpec) -> Result<(), StorageError> {
        let found: Vec<String> = sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
        )
        .bind(table.name())
        .fetch_all(&self.pool)
        .await?;

        if found.is_empty() {
            return Err(StorageError::MissingTable(table.name().to_string()));
        }

        let mut expected = vec!["id"];
        expected.extend(table.column_names());

        if found.iter().map(String::as_str).ne(expected.iter().copied()) {
            return Err(StorageError::SchemaDrift {
                table: table.name().to_string(),
                expected: table.version().to_string(),
                found: found.join(", "),
            });
        }

        Ok(())
    }
}

fn map_missing_table(e: sqlx::Error, table: &TableSpec) -> StorageError {
    let undefined = e
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == PG_UNDEFINED_TABLE)
        .unwrap_or(false);

    if undefined {
        StorageError::MissingTable(table.name().to_string())
    } else {
        StorageError::Database(e)
    }
}

fn decode_row(row: &PgRow, with_dataset_id: bool) -> Result<StoredAssociation, sqlx::Error> {
    Ok(StoredAssociation {
        id: row.try_get("id")?,
        record: AssociationRecord {
            molecular_trait_id: row.try_get("molecular_trait_id")?,
            chromosome: row.try_get("chromosome")?,
            position: row.try_get("position")?,
            ref_allele: row.try_get("ref")?,
            alt_allele: row.try_get("alt")?,
            variant: row.try_get("variant")?,
            ma_samples: row.try_get("ma_samples")?,
            maf: row.try_get("maf")?,
            pvalue: row.try_get("pvalue")?,
            beta: row.try_get("beta")?,
            se: row.try_get("se")?,
            variant_type: row.try_get("type")?,
            ac: row.try_get("ac")?,
            an: row.try_get("an")?,
            r2: row.try_get("r2")?,
            gene_id: row.try_get("gene_id")?,
            median_tpm: row.try_get("median_tpm")?,
            rsid: row.try_get("rsid")?,
            dataset_id: if with_dataset_id {
                row.try_get(DATASET_ID_COLUMN)?
            } else {
                None
            },
        },
    })
}

#[async_trait]
impl AssociationStore for PgAssociationStore {
    async fn ensure_schema(&self, table: &TableSpec) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&table.create_table_sql()).execute(&mut *tx).await?;
        for statement in table.create_index_sql() {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        self.verify_columns(table).await?;

        debug!("Schema ready: {}", table);
        Ok(())
    }

    async fn reset_schema(&self, table: &TableSpec) -> Result<(), StorageError> {
        let drop = format!("DROP TABLE IF EXISTS {}", quote_ident(table.name()));
        sqlx::query(&drop).execute(&self.pool).await?;

        info!("Dropped table {}", table.name());
        self.ensure_schema(table).await
    }

    async fn insert_batch(
        &self,
        table: &TableSpec,
        rows: &[AssociationRecord],
    ) -> Result<u64, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let columns = table.column_names();
        let with_dataset_id = table.version().includes_dataset_id();
        let rows_per_statement = (MAX_BIND_PARAMS / columns.len()).max(1);

        let insert_prefix = format!(
            "INSERT INTO {} ({}) ",
            quote_ident(table.name()),
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        );

        // Dropped without commit on any error below, which rolls back
        let mut tx = self.pool.begin().await?;
        let mut committed = 0u64;

        for statement_rows in rows.chunks(rows_per_statement) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(&insert_prefix);

            builder.push_values(statement_rows, |mut b, row| {
                b.push_bind(row.molecular_trait_id.as_deref())
                    .push_bind(row.chromosome.as_deref())
                    .push_bind(row.position)
                    .push_bind(row.ref_allele.as_deref())
                    .push_bind(row.alt_allele.as_deref())
                    .push_bind(row.variant.as_deref())
                    .push_bind(row.ma_samples)
                    .push_bind(row.maf)
                    .push_bind(row.pvalue)
                    .push_bind(row.beta)
                    .push_bind(row.se)
                    .push_bind(row.variant_type.as_deref())
                    .push_bind(row.ac)
                    .push_bind(row.an)
                    .push_bind(row.r2)
                    .push_bind(row.gene_id.as_deref())
                    .push_bind(row.median_tpm)
                    .push_bind(row.rsid.as_deref());
                if with_dataset_id {
                    b.push_bind(row.dataset_id.as_deref());
                }
            });

            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| map_missing_table(e, table))?;
            committed += result.rows_affected();
        }

        tx.commit().await?;
        Ok(committed)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn count_rows(&self, table: &TableSpec) -> Result<i64, StorageError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table.name()));
        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_missing_table(e, table))
    }

    async fn lookup(
        &self,
        table: &TableSpec,
        query: &AssociationQuery,
    ) -> Result<Vec<StoredAssociation>, StorageError> {
        let with_dataset_id = table.version().includes_dataset_id();
        let mut columns = vec![quote_ident("id")];
        columns.extend(table.column_names().iter().map(|c| quote_ident(c)));

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM {} WHERE TRUE",
            columns.join(", "),
            quote_ident(table.name())
        ));

        let filters = [
            ("molecular_trait_id", &query.molecular_trait_id),
            ("gene_id", &query.gene_id),
            ("chromosome", &query.chromosome),
            ("variant", &query.variant),
        ];
        for (column, value) in filters {
            if let Some(value) = value {
                builder
                    .push(format!(" AND {} = ", quote_ident(column)))
                    .push_bind(value.as_str());
            }
        }
        if let Some(max) = query.pvalue_max {
            builder.push(" AND \"pvalue\" <= ").push_bind(max);
        }
        builder.push(" ORDER BY \"id\" LIMIT ").push_bind(LOOKUP_LIMIT);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_missing_table(e, table))?;

        rows.iter()
            .map(|row| decode_row(row, with_dataset_id).map_err(StorageError::from))
            .collect()
    }
}
