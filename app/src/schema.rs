// ==============================================================================
// schema.rs - Association Record Schema
// ==============================================================================
// Description: Canonical eQTL association record, column kinds and table DDL
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// Source columns follow the eQTL Catalogue summary statistics export:
//   molecular_trait_id chromosome position ref alt variant ma_samples maf
//   pvalue beta se type ac an r2 gene_id median_tpm rsid
// V2 tables additionally carry dataset_id (derived from the file name).
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default target table (matches the API collaborator)
pub const DEFAULT_TABLE: &str = "eqtl_data";

/// Column holding the derived dataset identifier (V2 only)
pub const DATASET_ID_COLUMN: &str = "dataset_id";

/// Postgres identifier length limit
const MAX_IDENTIFIER_LEN: usize = 63;

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    /// Chromosome names ("1"-"22", "X", "Y", "MT")
    ShortText,
    Integer,
    Float,
}

impl ColumnKind {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::Text => "TEXT",
            ColumnKind::ShortText => "VARCHAR(3)",
            ColumnKind::Integer => "BIGINT",
            ColumnKind::Float => "DOUBLE PRECISION",
        }
    }
}

/// One source column of an association file, in source order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    MolecularTraitId,
    Chromosome,
    Position,
    Ref,
    Alt,
    Variant,
    MaSamples,
    Maf,
    Pvalue,
    Beta,
    Se,
    VariantType,
    Ac,
    An,
    R2,
    GeneId,
    MedianTpm,
    Rsid,
}

impl Field {
    pub const COUNT: usize = 18;

    pub const ALL: [Field; Field::COUNT] = [
        Field::MolecularTraitId,
        Field::Chromosome,
        Field::Position,
        Field::Ref,
        Field::Alt,
        Field::Variant,
        Field::MaSamples,
        Field::Maf,
        Field::Pvalue,
        Field::Beta,
        Field::Se,
        Field::VariantType,
        Field::Ac,
        Field::An,
        Field::R2,
        Field::GeneId,
        Field::MedianTpm,
        Field::Rsid,
    ];

    /// Column name as it appears in the source header and in storage
    pub fn name(&self) -> &'static str {
        match self {
            Field::MolecularTraitId => "molecular_trait_id",
            Field::Chromosome => "chromosome",
            Field::Position => "position",
            Field::Ref => "ref",
            Field::Alt => "alt",
            Field::Variant => "variant",
            Field::MaSamples => "ma_samples",
            Field::Maf => "maf",
            Field::Pvalue => "pvalue",
            Field::Beta => "beta",
            Field::Se => "se",
            Field::VariantType => "type",
            Field::Ac => "ac",
            Field::An => "an",
            Field::R2 => "r2",
            Field::GeneId => "gene_id",
            Field::MedianTpm => "median_tpm",
            Field::Rsid => "rsid",
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Field::Chromosome => ColumnKind::ShortText,
            Field::Position | Field::MaSamples | Field::Ac | Field::An => ColumnKind::Integer,
            Field::Maf
            | Field::Pvalue
            | Field::Beta
            | Field::Se
            | Field::R2
            | Field::MedianTpm => ColumnKind::Float,
            _ => ColumnKind::Text,
        }
    }

    /// Columns the query API filters on get a btree index
    pub fn indexed(&self) -> bool {
        matches!(
            self,
            Field::MolecularTraitId
                | Field::Chromosome
                | Field::Variant
                | Field::Pvalue
                | Field::GeneId
                | Field::Rsid
        )
    }

    /// Position within the source column order
    pub fn slot(&self) -> usize {
        *self as usize
    }
}

/// Explicit version of the stored record shape
///
/// - V1: the 18 source columns (append-only table, original backend shape)
/// - V2: V1 + `dataset_id` derived from the source file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    V1,
    #[default]
    V2,
}

#[derive(Error, Debug, PartialEq)]
pub enum SchemaError {
    #[error("Unknown schema version: {0} (expected v1 or v2)")]
    UnknownVersion(String),

    #[error("Invalid table name: {0:?} (letters, digits and underscores only)")]
    InvalidTableName(String),
}

impl SchemaVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaVersion::V1 => "v1",
            SchemaVersion::V2 => "v2",
        }
    }

    pub fn includes_dataset_id(&self) -> bool {
        matches!(self, SchemaVersion::V2)
    }

    /// Stored column names in insert order (surrogate id excluded)
    pub fn column_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Field::ALL.iter().map(|f| f.name()).collect();
        if self.includes_dataset_id() {
            names.push(DATASET_ID_COLUMN);
        }
        names
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this version
    pub fn create_table_sql(&self, table: &str) -> String {
        let mut columns = vec!["id BIGSERIAL PRIMARY KEY".to_string()];
        for field in Field::ALL {
            columns.push(format!("{} {}", quote_ident(field.name()), field.kind().sql_type()));
        }
        if self.includes_dataset_id() {
            columns.push(format!(
                "{} {}",
                quote_ident(DATASET_ID_COLUMN),
                ColumnKind::Text.sql_type()
            ));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote_ident(table),
            columns.join(",\n    ")
        )
    }

    /// `CREATE INDEX IF NOT EXISTS` statements for the filterable columns
    pub fn create_index_sql(&self, table: &str) -> Vec<String> {
        let mut indexed: Vec<&'static str> = Field::ALL
            .iter()
            .filter(|f| f.indexed())
            .map(|f| f.name())
            .collect();
        if self.includes_dataset_id() {
            indexed.push(DATASET_ID_COLUMN);
        }

        indexed
            .into_iter()
            .map(|column| {
                format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    quote_ident(&format!("ix_{}_{}", table, column)),
                    quote_ident(table),
                    quote_ident(column)
                )
            })
            .collect()
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaVersion {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "v1" | "1" => Ok(SchemaVersion::V1),
            "v2" | "2" => Ok(SchemaVersion::V2),
            other => Err(SchemaError::UnknownVersion(other.to_string())),
        }
    }
}

/// One eQTL association row; every field is nullable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssociationRecord {
    pub molecular_trait_id: Option<String>,
    pub chromosome: Option<String>,
    pub position: Option<i64>,
    #[serde(rename = "ref")]
    pub ref_allele: Option<String>,
    #[serde(rename = "alt")]
    pub alt_allele: Option<String>,
    pub variant: Option<String>,
    pub ma_samples: Option<i64>,
    pub maf: Option<f64>,
    pub pvalue: Option<f64>,
    pub beta: Option<f64>,
    pub se: Option<f64>,
    #[serde(rename = "type")]
    pub variant_type: Option<String>,
    pub ac: Option<i64>,
    pub an: Option<i64>,
    pub r2: Option<f64>,
    pub gene_id: Option<String>,
    pub median_tpm: Option<f64>,
    pub rsid: Option<String>,
    /// Only populated for V2 tables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
}

/// A stored record with its surrogate identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAssociation {
    pub id: i64,
    #[serde(flatten)]
    pub record: AssociationRecord,
}

/// Target table: validated name plus the record shape it stores
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    name: String,
    version: SchemaVersion,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, version: SchemaVersion) -> Result<Self, SchemaError> {
        let name = name.into();
        validate_table_name(&name)?;
        Ok(Self { name, version })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.version.column_names()
    }

    pub fn create_table_sql(&self) -> String {
        self.version.create_table_sql(&self.name)
    }

    pub fn create_index_sql(&self) -> Vec<String> {
        self.version.create_index_sql(&self.name)
    }
}

impl Default for TableSpec {
    fn default() -> Self {
        Self {
            name: DEFAULT_TABLE.to_string(),
            version: SchemaVersion::default(),
        }
    }
}

impl fmt::Display for TableSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.version)
    }
}

/// Reject anything that is not a plain SQL identifier
///
/// Table names are interpolated into DDL, so they never come from row data.
pub fn validate_table_name(name: &str) -> Result<(), SchemaError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);

    if !valid_start
        || name.len() > MAX_IDENTIFIER_LEN
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(SchemaError::InvalidTableName(name.to_string()));
    }

    Ok(())
}

/// Double-quote an identifier for Postgres
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
