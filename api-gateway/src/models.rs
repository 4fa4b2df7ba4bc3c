// ==============================================================================
// models.rs - API Data Models
// ==============================================================================
// Description: Request/response models for the eQTL query API
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Query string of `GET /eqtl_data/`
///
/// Kept as strings so an unparseable threshold becomes a 400 with our own
/// error body instead of the extractor's rejection text.
#[derive(Debug, Default, Deserialize)]
pub struct EqtlDataParams {
    pub molecular_trait_id: Option<String>,
    pub gene_id: Option<String>,
    pub chromosome: Option<String>,
    pub variant: Option<String>,
    pub p_value_threshold: Option<String>,
}

/// API information response
#[derive(Debug, Serialize)]
pub struct ApiInfoResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub message: &'static str,
    pub endpoints: Vec<&'static str>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}
