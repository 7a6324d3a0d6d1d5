use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::{LandmarkError, Result};
use crate::index::builder::{build_index, TrackSource};
use crate::models::{BuildConfig, BuildReport};

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexRequest {
    /// Directory the sharded store is created in
    pub db_path: String,
    pub tracks: Vec<TrackSource>,
    #[serde(default)]
    pub config: BuildConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexResponse {
    pub report: BuildReport,
    pub processing_time_ms: u128,
}

pub async fn index_handler(
    Json(req): Json<IndexRequest>,
) -> Result<(StatusCode, Json<IndexResponse>)> {
    let start = Instant::now();
    tracing::info!(
        "indexing {} tracks into {}",
        req.tracks.len(),
        req.db_path
    );

    // Build is CPU bound; keep it off the async runtime.
    let report = tokio::task::spawn_blocking(move || {
        build_index(&req.tracks, &req.config, &req.db_path, None)
    })
    .await
    .map_err(|e| LandmarkError::KvWrite(format!("task join error: {}", e)))??;

    let response = IndexResponse {
        report,
        processing_time_ms: start.elapsed().as_millis(),
    };
    tracing::info!(
        "indexed {} tracks in {}ms ({} warnings)",
        response.report.tracks_ingested,
        response.processing_time_ms,
        response.report.warnings.len()
    );
    Ok((StatusCode::OK, Json(response)))
}
