//! # Gateway エラー型
//!
//! 全エンドポイントで共通のエラー型。レスポンスボディは常に
//! `ErrorResponse`（`{error, details?}`）形式のJSON。

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use sas_upload_types::ErrorResponse;

/// Gatewayエラー型。
///
/// いずれのエラーもリクエストにとって終端であり、自動リトライは行わない。
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// 不正なリクエスト（ファイルなし、空ファイル、multipartの不正）
    #[error("不正なリクエスト: {0}")]
    InvalidRequest(String),
    /// アップロードサイズ超過
    #[error("ペイロードサイズが上限を超えています: {0}")]
    PayloadTooLarge(String),
    /// Blobの書き込みに失敗
    #[error("Blobの書き込みに失敗: {0}")]
    StoreWriteFailed(String),
    /// SASの発行に失敗
    #[error("SASの発行に失敗: {0}")]
    GrantIssuanceFailed(String),
    /// 内部エラー（詳細はクライアントに返さない）
    #[error("内部エラー: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTPステータスコード。
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::StoreWriteFailed(_)
            | GatewayError::GrantIssuanceFailed(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// クライアントに返すレスポンスボディ。
    pub fn to_body(&self) -> ErrorResponse {
        match self {
            GatewayError::InvalidRequest(d) => ErrorResponse::with_details("Invalid request", d),
            GatewayError::PayloadTooLarge(d) => ErrorResponse::with_details("File too large", d),
            GatewayError::StoreWriteFailed(d) => {
                ErrorResponse::with_details("Failed to upload file", d)
            }
            GatewayError::GrantIssuanceFailed(d) => {
                ErrorResponse::with_details("Failed to generate access token", d)
            }
            GatewayError::Internal(_) => ErrorResponse::new("Internal server error"),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "リクエスト処理に失敗しました");
        } else {
            tracing::debug!(error = %self, "リクエストを拒否しました");
        }
        (status, Json(self.to_body())).into_response()
    }
}
