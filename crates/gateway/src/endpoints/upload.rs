//! # POST /upload
//!
//! multipartの `file` フィールドを受け取り、Blobに書き込んで読み取り専用SAS URLを返す。
//!
//! 書き込みとSAS発行は逐次実行する。SAS発行に失敗した場合、書き込み済みのBlobは
//! 削除されずに残る。

use std::sync::Arc;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::{Bytes, BytesMut};
use chrono::{Duration, SecondsFormat, Utc};
use sas_upload_types::UploadResponse;

use crate::config::GatewayState;
use crate::error::GatewayError;
use crate::naming;

/// ファイルを受け取るmultipartフィールド名
pub const FILE_FIELD: &str = "file";

/// SAS開始時刻を現在時刻から遡らせる幅（クロックスキュー許容）
pub const CLOCK_SKEW_MINUTES: i64 = 10;

/// 1回のアップロード要求。リクエスト処理中のみ存在する。
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// クライアントが送信した元のファイル名
    pub file_name: String,
    /// クライアントが宣言したContent-Type（記録のみ）
    pub declared_content_type: Option<String>,
    pub data: Bytes,
}

/// POST /upload — アップロードとSAS発行。
pub async fn handle_upload(
    State(state): State<Arc<GatewayState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, GatewayError> {
    let multipart =
        multipart.map_err(|rejection| GatewayError::InvalidRequest(rejection.body_text()))?;

    let request = read_file_field(multipart, state.config.max_upload_size).await?;
    let response = process_upload(&state, request).await?;
    Ok(Json(response))
}

fn multipart_error(err: MultipartError, limit: u64) -> GatewayError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        GatewayError::PayloadTooLarge(format!("上限は {limit} bytes です"))
    } else {
        GatewayError::InvalidRequest(err.body_text())
    }
}

/// `file` フィールドを読み出す。上限を超えた時点で読み込みを打ち切る。
async fn read_file_field(
    mut multipart: Multipart,
    limit: u64,
) -> Result<UploadRequest, GatewayError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let declared_content_type = field.content_type().map(str::to_string);

        let mut data = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, limit))? {
            if (data.len() + chunk.len()) as u64 > limit {
                return Err(GatewayError::PayloadTooLarge(format!(
                    "上限は {limit} bytes です"
                )));
            }
            data.extend_from_slice(&chunk);
        }

        return Ok(UploadRequest {
            file_name,
            declared_content_type,
            data: data.freeze(),
        });
    }

    Err(GatewayError::InvalidRequest(format!(
        "`{FILE_FIELD}` フィールドがありません"
    )))
}

/// アップロード処理の本体。
///
/// 1. 検証（空・サイズ超過・長すぎるファイル名はストレージに触れずに拒否）
/// 2. Blob名とContent-Typeの決定
/// 3. 書き込み
/// 4. `[now - 10分, now + 有効期間]` の読み取り専用SAS発行
pub async fn process_upload(
    state: &GatewayState,
    request: UploadRequest,
) -> Result<UploadResponse, GatewayError> {
    if request.data.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "ファイルが空です".to_string(),
        ));
    }

    let limit = state.config.max_upload_size;
    if request.data.len() as u64 > limit {
        return Err(GatewayError::PayloadTooLarge(format!(
            "ファイルサイズが上限を超えています: {} bytes (上限: {limit} bytes)",
            request.data.len()
        )));
    }

    let now = Utc::now();
    let timestamp_millis = u64::try_from(now.timestamp_millis())
        .map_err(|e| GatewayError::Internal(format!("時刻取得失敗: {e}")))?;
    let blob_name = naming::blob_name(timestamp_millis, &request.file_name);
    if blob_name.len() > naming::MAX_BLOB_NAME_LEN {
        return Err(GatewayError::InvalidRequest(format!(
            "ファイル名が長すぎます: Blob名は{}文字以内である必要があります",
            naming::MAX_BLOB_NAME_LEN
        )));
    }
    let content_type = naming::content_type_for(&request.file_name);
    let size = request.data.len();

    tracing::info!(
        blob_name = %blob_name,
        size,
        content_type,
        declared_content_type = request.declared_content_type.as_deref().unwrap_or(""),
        "ファイルをアップロードします"
    );

    state
        .blob_store
        .write_object(&blob_name, request.data, content_type)
        .await
        .map_err(|e| GatewayError::StoreWriteFailed(e.to_string()))?;

    let expires_in_minutes = state.config.sas_expiry_minutes;
    let starts_on = now - Duration::minutes(CLOCK_SKEW_MINUTES);
    let expires_on = now + Duration::minutes(i64::from(expires_in_minutes));

    let grant = state
        .blob_store
        .issue_read_grant(&blob_name, starts_on, expires_on)
        .await
        .map_err(|e| {
            tracing::warn!(
                blob_name = %blob_name,
                "SAS発行に失敗しました。書き込み済みのBlobは残ります"
            );
            GatewayError::GrantIssuanceFailed(e.to_string())
        })?;

    tracing::info!(
        blob_name = %blob_name,
        starts_on = %grant.starts_on,
        expires_on = %grant.expires_on,
        "SASを発行しました"
    );

    Ok(UploadResponse {
        success: true,
        message: "File uploaded successfully".to_string(),
        file_name: request.file_name,
        blob_name,
        sas_url: grant.url,
        expires_at: grant.expires_on.to_rfc3339_opts(SecondsFormat::Secs, true),
        expires_in_minutes,
    })
}
