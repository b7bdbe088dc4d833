//! # Gatewayエンドポイント

pub mod health;
pub mod upload;

pub use health::handle_health;
pub use upload::handle_upload;

use axum::http::StatusCode;
use axum::Json;
use sas_upload_types::ErrorResponse;

/// 未定義のパス。
pub async fn handle_not_found() -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new("Not found")))
}
