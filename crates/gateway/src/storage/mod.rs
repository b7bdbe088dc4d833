//! # Blob Storage
//!
//! Gatewayが書き込み先として使うBlobストレージの抽象インターフェース。
//! Azure Blob Storage実装は `azure` サブモジュールを参照。

pub mod azure;
pub mod credential;
pub mod sas;

pub use azure::AzureBlobStore;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// ストレージ操作のエラー型。
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// アンビエントIDからのトークン取得に失敗
    #[error("認証トークンの取得に失敗: {0}")]
    Credential(String),
    /// HTTP送信・受信に失敗
    #[error("HTTP送信失敗: {0}")]
    Http(#[from] reqwest::Error),
    /// ストレージサービスがエラーを返した
    #[error("ストレージがエラーを返しました: HTTP {status} - {body}")]
    Service { status: u16, body: String },
    /// レスポンスの形式が不正
    #[error("レスポンスのパースに失敗: {0}")]
    InvalidResponse(String),
    /// SAS署名の構築に失敗
    #[error("SAS署名に失敗: {0}")]
    Signing(String),
}

/// 読み取り専用アクセス許可（SAS付きURL）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadGrant {
    /// BlobのURL + 署名付きクエリ
    pub url: String,
    /// 有効期間の開始
    pub starts_on: DateTime<Utc>,
    /// 有効期限
    pub expires_on: DateTime<Utc>,
}

/// Blobストレージの抽象インターフェース。
///
/// 実装は単一のコンテナに束縛される。起動時に一度だけ構築し、
/// `GatewayState` に注入して使う。テストではモック実装に差し替える。
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// コンテナが存在しなければ作成する。既に存在する場合は成功とする。
    async fn create_container_if_absent(&self) -> Result<(), StorageError>;

    /// `blob_name` にデータを書き込む。成功はストレージの書き込み確認を意味する。
    async fn write_object(
        &self,
        blob_name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// `blob_name` に対する読み取り専用のアクセス許可を発行する。
    async fn issue_read_grant(
        &self,
        blob_name: &str,
        starts_on: DateTime<Utc>,
        expires_on: DateTime<Utc>,
    ) -> Result<ReadGrant, StorageError>;
}
