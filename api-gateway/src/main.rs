// ==============================================================================
// main.rs - eQTL Catalogue API Entry Point
// ==============================================================================
// Description: Axum web server for eQTL association lookups
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod handlers;
mod models;
mod state;

use state::AppState;

const DEFAULT_PORT: u16 = 8001;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eqtl_catalogue_api=info,tower_http=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    info!("Starting eQTL Catalogue API v{}", env!("CARGO_PKG_VERSION"));

    let server_port = std::env::var("API_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    // Initialize application state (exits non-zero if the database stays unreachable)
    let state = AppState::new()
        .await
        .context("Failed to initialize application state")?;

    let app = build_router(state);

    // Bind server
    let addr = SocketAddr::from(([0, 0, 0, 0], server_port));
    info!("eQTL Catalogue API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    // Origins are configured via CORS_ALLOWED_ORIGINS env var (comma-separated)
    let cors_origins = std::env::var("CORS_ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000".to_string());
    let allowed_origins: Vec<_> = cors_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_credentials(false)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/eqtl_data/", get(handlers::get_eqtl_data))
        .route("/eqtl_data", get(handlers::get_eqtl_data))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use eqtl_ingest::schema::{AssociationRecord, StoredAssociation, TableSpec};
    use eqtl_ingest::storage::{AssociationQuery, AssociationStore, MemoryStore, StorageError};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Store whose database is always down
    struct DownStore;

    #[async_trait]
    impl AssociationStore for DownStore {
        async fn ensure_schema(&self, _: &TableSpec) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }

        async fn reset_schema(&self, _: &TableSpec) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }

        async fn insert_batch(&self, _: &TableSpec, _: &[AssociationRecord]) -> Result<u64, StorageError> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }

        async fn ping(&self) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }

        async fn count_rows(&self, _: &TableSpec) -> Result<i64, StorageError> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }

        async fn lookup(
            &self,
            _: &TableSpec,
            _: &AssociationQuery,
        ) -> Result<Vec<StoredAssociation>, StorageError> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }
    }

    fn record(gene: &str, position: i64, pvalue: Option<f64>) -> AssociationRecord {
        AssociationRecord {
            molecular_trait_id: Some(gene.to_string()),
            gene_id: Some(gene.to_string()),
            chromosome: Some("1".to_string()),
            position: Some(position),
            pvalue,
            dataset_id: Some("QTD000001".to_string()),
            ..Default::default()
        }
    }

    async fn seeded_state() -> AppState {
        let store = MemoryStore::new();
        let table = TableSpec::default();
        store.ensure_schema(&table).await.unwrap();
        store
            .insert_batch(
                &table,
                &[
                    record("ENSG01", 100, Some(0.01)),
                    record("ENSG01", 200, None),
                    record("ENSG02", 300, Some(0.5)),
                ],
            )
            .await
            .unwrap();

        AppState::from_store(Arc::new(store), table)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_root_describes_service() {
        let (status, body) = get_json(build_router(seeded_state().await), "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Welcome to the eQTL Catalogue API");
    }

    #[tokio::test]
    async fn test_health_reports_connected_database() {
        let (status, body) = get_json(build_router(seeded_state().await), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "connected");
    }

    #[tokio::test]
    async fn test_health_fails_when_database_down() {
        let state = AppState::from_store(Arc::new(DownStore), TableSpec::default());
        let (status, body) = get_json(build_router(state), "/health").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Database connection failed");
    }

    #[tokio::test]
    async fn test_lookup_without_filters_returns_all_rows_in_id_order() {
        let (status, body) = get_json(build_router(seeded_state().await), "/eqtl_data/").await;

        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["id"], 1);
        assert_eq!(rows[2]["id"], 3);
        assert_eq!(rows[0]["dataset_id"], "QTD000001");
    }

    #[tokio::test]
    async fn test_lookup_applies_filters_and_threshold() {
        let (status, body) = get_json(
            build_router(seeded_state().await),
            "/eqtl_data/?gene_id=ENSG01&p_value_threshold=0.05",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        // The null-pvalue row never satisfies a threshold
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["position"], 100);
    }

    #[tokio::test]
    async fn test_lookup_rejects_invalid_threshold() {
        let (status, body) = get_json(
            build_router(seeded_state().await),
            "/eqtl_data/?p_value_threshold=small",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("p_value_threshold"));
    }

    #[tokio::test]
    async fn test_lookup_without_trailing_slash() {
        let (status, body) = get_json(
            build_router(seeded_state().await),
            "/eqtl_data?chromosome=1&gene_id=ENSG02",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }
}
