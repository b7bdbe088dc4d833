//! # GET /health
//!
//! 設定値を返すヘルスチェック。ストレージへの疎通は確認しない。

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use sas_upload_types::HealthResponse;

use crate::config::GatewayState;

/// GET /health — ヘルスチェック。
pub async fn handle_health(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        storage_account: state.config.storage_account.clone(),
        container: state.config.container.clone(),
        sas_expiry_minutes: state.config.sas_expiry_minutes,
    })
}
