//! # SAS Upload 共有型定義
//!
//! Upload GatewayのHTTP APIで送受信するJSONボディをRust構造体として提供する。
//!
//! ## エンコーディング規則
//! - フィールド名: camelCase
//! - 時刻: RFC 3339（UTC、`Z`サフィックス）

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// POST /upload
// ---------------------------------------------------------------------------

/// アップロード成功時のレスポンス。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// 常に `true`
    pub success: bool,
    /// 人間向けのメッセージ
    pub message: String,
    /// クライアントが送信した元のファイル名
    pub file_name: String,
    /// ストレージ上のBlob名（`{unix-millis}-{sanitized}`）
    pub blob_name: String,
    /// 読み取り専用SASトークン付きのBlob URL
    pub sas_url: String,
    /// SASの有効期限（RFC 3339）
    pub expires_at: String,
    /// SASの有効期間（分）
    pub expires_in_minutes: u32,
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

/// ヘルスチェックのレスポンス。ストレージへの疎通は確認しない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// 常に `"healthy"`
    pub status: String,
    /// ストレージアカウント名
    pub storage_account: String,
    /// コンテナ名
    pub container: String,
    /// SASの有効期間（分）
    pub sas_expiry_minutes: u32,
}

// ---------------------------------------------------------------------------
// エラー
// ---------------------------------------------------------------------------

/// 4xx/5xx 時のレスポンスボディ。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// エラーの概要
    pub error: String,
    /// 診断用の詳細（上流のエラーメッセージ等）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// 詳細なしのエラーボディを構築する。
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    /// 詳細付きのエラーボディを構築する。
    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_response_uses_camel_case() {
        let resp = UploadResponse {
            success: true,
            message: "File uploaded successfully".to_string(),
            file_name: "report.pdf".to_string(),
            blob_name: "1700000000000-report.pdf".to_string(),
            sas_url: "https://acct.blob.core.windows.net/uploads/1700000000000-report.pdf?sv=x"
                .to_string(),
            expires_at: "2023-11-14T23:13:20Z".to_string(),
            expires_in_minutes: 60,
        };

        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["fileName"], "report.pdf");
        assert_eq!(value["blobName"], "1700000000000-report.pdf");
        assert_eq!(value["expiresInMinutes"], 60);
        assert!(value.get("sasUrl").is_some());
        assert!(value.get("expiresAt").is_some());
        assert!(value.get("file_name").is_none());
    }

    #[test]
    fn test_health_response_field_names() {
        let resp = HealthResponse {
            status: "healthy".to_string(),
            storage_account: "acct".to_string(),
            container: "uploads".to_string(),
            sas_expiry_minutes: 15,
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "status": "healthy",
                "storageAccount": "acct",
                "container": "uploads",
                "sasExpiryMinutes": 15
            })
        );
    }

    /// detailsがNoneの場合はフィールド自体を出力しない
    #[test]
    fn test_error_response_omits_missing_details() {
        let value = serde_json::to_value(ErrorResponse::new("Not found")).unwrap();
        assert_eq!(value, serde_json::json!({ "error": "Not found" }));

        let value =
            serde_json::to_value(ErrorResponse::with_details("Invalid request", "no file"))
                .unwrap();
        assert_eq!(value["details"], "no file");
    }
}
