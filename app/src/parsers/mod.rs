// ==============================================================================
// parsers/mod.rs - Source file readers
// ==============================================================================
// Description: Readers for eQTL association file formats
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

pub mod eqtl_tsv;

pub use eqtl_tsv::{EqtlTsvReader, RawRow, SourceError};
