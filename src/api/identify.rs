use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::{LandmarkError, Result};
use crate::models::{IdentifyConfig, IdentifyOutcome};
use crate::search::identify::identify_path;

#[derive(Debug, Serialize, Deserialize)]
pub struct IdentifyRequest {
    /// Directory of an existing sharded store
    pub db_path: String,
    /// Query clip to identify
    pub filepath: String,
    #[serde(default)]
    pub config: IdentifyConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub result: IdentifyOutcome,
    pub processing_time_ms: u128,
}

pub async fn identify_handler(
    Json(req): Json<IdentifyRequest>,
) -> Result<(StatusCode, Json<IdentifyResponse>)> {
    let start = Instant::now();
    tracing::debug!("identifying {} against {}", req.filepath, req.db_path);

    let result = tokio::task::spawn_blocking(move || {
        identify_path(&req.filepath, &req.config, &req.db_path)
    })
    .await
    .map_err(|e| LandmarkError::KvRead(format!("task join error: {}", e)))??;

    let response = IdentifyResponse {
        result,
        processing_time_ms: start.elapsed().as_millis(),
    };
    tracing::info!(
        "identify finished in {}ms: {:?}",
        response.processing_time_ms,
        response.result
    );
    Ok((StatusCode::OK, Json(response)))
}
