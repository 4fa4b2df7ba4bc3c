// ==============================================================================
// normalizer.rs - Raw Row to Association Record
// ==============================================================================
// Description: Type coercion, null normalization and dataset_id derivation
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// Rules:
//   - empty, whitespace-only and upstream NA markers become NULL
//   - unparseable integers/floats become NULL (never 0, never an error)
//   - text cells pass through verbatim
//   - a row whose width differs from the header is rejected
// ==============================================================================

use csv::StringRecord;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::parsers::RawRow;
use crate::schema::{AssociationRecord, Field, SchemaVersion};

/// Missing-value markers written by the upstream (R/pandas) exports
pub const NULL_MARKERS: [&str; 4] = ["NA", "NaN", "nan", "N/A"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    /// Reported once per file; the file cannot be interpreted
    #[error("{}: missing required columns: {}", path.display(), missing.join(", "))]
    SchemaMismatch { path: PathBuf, missing: Vec<String> },

    /// Structural anomaly in a single row; only that row is dropped
    #[error("Row {row}: {details}")]
    RowShape { row: usize, details: String },
}

/// Per-file normalizer, built once from the header row
#[derive(Debug, Clone)]
pub struct RowNormalizer {
    /// Header position of each `Field`, indexed by `Field::slot()`
    positions: [usize; Field::COUNT],
    width: usize,
    dataset_id: Option<String>,
}

impl RowNormalizer {
    /// Resolve the required columns against a file header
    ///
    /// Extra columns (e.g. `molecular_trait_object_id`) are ignored. A
    /// missing required column fails the whole file with every missing name
    /// listed, since no row of it can be interpreted safely.
    pub fn new(
        headers: &StringRecord,
        version: SchemaVersion,
        source: &Path,
    ) -> Result<Self, NormalizeError> {
        let mut positions = [0usize; Field::COUNT];
        let mut missing = Vec::new();

        for field in Field::ALL {
            match headers.iter().position(|h| h == field.name()) {
                Some(idx) => positions[field.slot()] = idx,
                None => missing.push(field.name().to_string()),
            }
        }

        if !missing.is_empty() {
            return Err(NormalizeError::SchemaMismatch {
                path: source.to_path_buf(),
                missing,
            });
        }

        let dataset_id = if version.includes_dataset_id() {
            derive_dataset_id(source)
        } else {
            None
        };

        Ok(Self {
            positions,
            width: headers.len(),
            dataset_id,
        })
    }

    pub fn dataset_id(&self) -> Option<&str> {
        self.dataset_id.as_deref()
    }

    /// Number of cells every data row must carry
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn normalize(&self, row: &RawRow) -> Result<AssociationRecord, NormalizeError> {
        if row.len() != self.width {
            return Err(NormalizeError::RowShape {
                row: row.index,
                details: format!("expected {} columns, found {}", self.width, row.len()),
            });
        }

        if !row.valid_utf8 {
            return Err(NormalizeError::RowShape {
                row: row.index,
                details: "invalid UTF-8".to_string(),
            });
        }

        let cell = |field: Field| row.cell(self.positions[field.slot()]).unwrap_or("");

        Ok(AssociationRecord {
            molecular_trait_id: text(cell(Field::MolecularTraitId)),
            chromosome: text(cell(Field::Chromosome)),
            position: integer(cell(Field::Position)),
            ref_allele: text(cell(Field::Ref)),
            alt_allele: text(cell(Field::Alt)),
            variant: text(cell(Field::Variant)),
            ma_samples: integer(cell(Field::MaSamples)),
            maf: float(cell(Field::Maf)),
            pvalue: float(cell(Field::Pvalue)),
            beta: float(cell(Field::Beta)),
            se: float(cell(Field::Se)),
            variant_type: text(cell(Field::VariantType)),
            ac: integer(cell(Field::Ac)),
            an: integer(cell(Field::An)),
            r2: float(cell(Field::R2)),
            gene_id: text(cell(Field::GeneId)),
            median_tpm: float(cell(Field::MedianTpm)),
            rsid: text(cell(Field::Rsid)),
            dataset_id: self.dataset_id.clone(),
        })
    }
}

/// `QTD000393.cc.tsv.gz` -> `QTD000393`
///
/// Base name truncated at the first `.`; an empty prefix yields `None`.
pub fn derive_dataset_id(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy();
    let prefix = name.split('.').next().unwrap_or("");

    if prefix.is_empty() {
        None
    } else {
        Some(prefix.to_string())
    }
}

pub fn is_missing(cell: &str) -> bool {
    let trimmed = cell.trim();
    trimmed.is_empty() || NULL_MARKERS.contains(&trimmed)
}

fn text(cell: &str) -> Option<String> {
    if is_missing(cell) {
        None
    } else {
        Some(cell.to_string())
    }
}

fn integer(cell: &str) -> Option<i64> {
    if is_missing(cell) {
        return None;
    }
    cell.trim().parse::<i64>().ok()
}

fn float(cell: &str) -> Option<f64> {
    if is_missing(cell) {
        return None;
    }
    cell.trim().parse::<f64>().ok().filter(|v| !v.is_nan())
}
