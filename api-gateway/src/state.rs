// ==============================================================================
// state.rs - Application State Management
// ==============================================================================
// Description: Shared application state for the query API
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use eqtl_ingest::config::resolve_database_url;
use eqtl_ingest::retry::{RetryPolicy, TokioClock};
use eqtl_ingest::schema::{SchemaVersion, TableSpec, DEFAULT_TABLE};
use eqtl_ingest::storage::{AssociationStore, PgAssociationStore};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Association store (PostgreSQL in production)
    store: Arc<dyn AssociationStore>,

    /// Table served by the lookup endpoint
    table: TableSpec,
}

impl AppState {
    /// Create new application state from environment
    ///
    /// Connects with the startup retry policy and creates the table if it
    /// does not exist yet.
    pub async fn new() -> Result<Self> {
        let url_file = std::env::var_os("DATABASE_URL_FILE").map(PathBuf::from);
        let database_url = resolve_database_url(std::env::var("DATABASE_URL").ok(), url_file.as_deref())?;

        let table_name = std::env::var("EQTL_TABLE").unwrap_or_else(|_| DEFAULT_TABLE.to_string());
        let version = match std::env::var("EQTL_SCHEMA_VERSION") {
            Ok(raw) => raw.parse::<SchemaVersion>()?,
            Err(_) => SchemaVersion::default(),
        };
        let table = TableSpec::new(table_name, version)?;

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);

        let store = PgAssociationStore::connect(
            &database_url,
            max_connections,
            &RetryPolicy::startup(),
            &TokioClock,
        )
        .await
        .context("Failed to connect to PostgreSQL")?;

        store
            .ensure_schema(&table)
            .await
            .context("Failed to prepare association table")?;
        info!("Serving table {}", table);

        Ok(Self::from_store(Arc::new(store), table))
    }

    /// Build state around an existing store
    pub fn from_store(store: Arc<dyn AssociationStore>, table: TableSpec) -> Self {
        Self {
            inner: Arc::new(AppStateInner { store, table }),
        }
    }

    /// Get association store
    pub fn store(&self) -> &dyn AssociationStore {
        self.inner.store.as_ref()
    }

    /// Get served table
    pub fn table(&self) -> &TableSpec {
        &self.inner.table
    }
}
