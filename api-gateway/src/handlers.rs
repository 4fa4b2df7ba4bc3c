// ==============================================================================
// handlers.rs - API Request Handlers
// ==============================================================================
// Description: HTTP request handlers for the eQTL query API
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use tracing::{error, warn};

use eqtl_ingest::schema::StoredAssociation;
use eqtl_ingest::storage::{AssociationQuery, AssociationStore};

use crate::{models::*, state::AppState};

/// Root endpoint - API information
pub async fn root() -> Json<ApiInfoResponse> {
    Json(ApiInfoResponse {
        service: "eQTL Catalogue API",
        version: env!("CARGO_PKG_VERSION"),
        message: "Welcome to the eQTL Catalogue API",
        endpoints: vec![
            "/health - Health check (database connectivity)",
            "/eqtl_data/ - Association lookup (GET; molecular_trait_id, gene_id, chromosome, variant, p_value_threshold)",
        ],
    })
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    state
        .store()
        .ping()
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(Json(HealthResponse {
        status: "ok",
        database: "connected",
        timestamp: Utc::now(),
    }))
}

/// Association lookup endpoint
///
/// Empty parameters are treated as absent. At most 100 rows are returned,
/// ordered by id.
pub async fn get_eqtl_data(
    State(state): State<AppState>,
    Query(params): Query<EqtlDataParams>,
) -> Result<Json<Vec<StoredAssociation>>, AppError> {
    let query = build_query(params)?;

    let rows = state
        .store()
        .lookup(state.table(), &query)
        .await
        .map_err(|e| AppError::Internal(format!("Lookup failed: {}", e)))?;

    Ok(Json(rows))
}

fn build_query(params: EqtlDataParams) -> Result<AssociationQuery, AppError> {
    fn present(value: Option<String>) -> Option<String> {
        value.filter(|v| !v.trim().is_empty())
    }

    let pvalue_max = match present(params.p_value_threshold) {
        Some(raw) => {
            let parsed = raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    warn!("Rejected p_value_threshold {:?}", raw);
                    AppError::BadRequest(format!("Invalid p_value_threshold: {}", raw))
                })?;
            Some(parsed)
        }
        None => None,
    };

    Ok(AssociationQuery {
        molecular_trait_id: present(params.molecular_trait_id),
        gene_id: present(params.gene_id),
        chromosome: present(params.chromosome),
        variant: present(params.variant),
        pvalue_max,
    })
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    /// Storage unreachable; reported with details like the health probe expects
    Database(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorResponse::new(msg)),
            AppError::Database(msg) => {
                error!("Database connection failed: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_details("Database connection failed", msg),
                )
            }
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
