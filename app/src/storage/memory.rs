// ==============================================================================
// storage/memory.rs - In-Memory Association Store
// ==============================================================================
// Description: Process-local store for dry runs and tests, with failure injection
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::{AssociationQuery, AssociationStore, StorageError, LOOKUP_LIMIT};
use crate::schema::{AssociationRecord, SchemaVersion, StoredAssociation, TableSpec};

#[derive(Debug)]
struct MemoryTable {
    version: SchemaVersion,
    next_id: i64,
    rows: Vec<StoredAssociation>,
}

impl MemoryTable {
    fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            next_id: 1,
            rows: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    insert_calls: usize,
    /// 1-based `insert_batch` call numbers that fail
    fail_on_calls: HashSet<usize>,
    batch_sizes: Vec<usize>,
}

/// Association store held in a mutex
///
/// Batches are applied under a single lock, so they are atomic the same way
/// a committed transaction is.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose nth `insert_batch` calls fail with `Unavailable`
    pub fn failing_on_calls(calls: impl IntoIterator<Item = usize>) -> Self {
        let store = Self::default();
        store.lock().fail_on_calls = calls.into_iter().collect();
        store
    }

    /// Number of `insert_batch` calls seen, failed ones included
    pub fn insert_calls(&self) -> usize {
        self.lock().insert_calls
    }

    /// Size of every batch submitted, in call order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().batch_sizes.clone()
    }

    /// Snapshot of a table's rows in id order
    pub fn rows(&self, table: &str) -> Vec<StoredAssociation> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not wedge every later call
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AssociationStore for MemoryStore {
    async fn ensure_schema(&self, table: &TableSpec) -> Result<(), StorageError> {
        let mut state = self.lock();

        match state.tables.get(table.name()) {
            Some(existing) if existing.version != table.version() => {
                Err(StorageError::SchemaDrift {
                    table: table.name().to_string(),
                    expected: table.version().to_string(),
                    found: existing.version.column_names().join(", "),
                })
            }
            Some(_) => Ok(()),
            None => {
                state
                    .tables
                    .insert(table.name().to_string(), MemoryTable::new(table.version()));
                Ok(())
            }
        }
    }

    async fn reset_schema(&self, table: &TableSpec) -> Result<(), StorageError> {
        self.lock()
            .tables
            .insert(table.name().to_string(), MemoryTable::new(table.version()));
        Ok(())
    }

    async fn insert_batch(
        &self,
        table: &TableSpec,
        rows: &[AssociationRecord],
    ) -> Result<u64, StorageError> {
        let mut state = self.lock();
        state.insert_calls += 1;
        state.batch_sizes.push(rows.len());

        let call = state.insert_calls;
        if state.fail_on_calls.contains(&call) {
            return Err(StorageError::Unavailable(format!(
                "injected failure on insert call {}",
                call
            )));
        }

        let target = state
            .tables
            .get_mut(table.name())
            .ok_or_else(|| StorageError::MissingTable(table.name().to_string()))?;

        let keep_dataset_id = target.version.includes_dataset_id();
        for row in rows {
            let mut record = row.clone();
            if !keep_dataset_id {
                record.dataset_id = None;
            }
            target.rows.push(StoredAssociation {
                id: target.next_id,
                record,
            });
            target.next_id += 1;
        }

        Ok(rows.len() as u64)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn count_rows(&self, table: &TableSpec) -> Result<i64, StorageError> {
        self.lock()
            .tables
            .get(table.name())
            .map(|t| t.rows.len() as i64)
            .ok_or_else(|| StorageError::MissingTable(table.name().to_string()))
    }

    async fn lookup(
        &self,
        table: &TableSpec,
        query: &AssociationQuery,
    ) -> Result<Vec<StoredAssociation>, StorageError> {
        let state = self.lock();
        let target = state
            .tables
            .get(table.name())
            .ok_or_else(|| StorageError::MissingTable(table.name().to_string()))?;

        Ok(target
            .rows
            .iter()
            .filter(|row| query.matches(&row.record))
            .take(LOOKUP_LIMIT as usize)
            .cloned()
            .collect())
    }
}
