//! # Azure Blob Storage 実装
//!
//! Blob REST APIを `reqwest` で直接呼び出す `BlobStore` 実装。
//! 認証はアンビエントIDのBearerトークン、SASはユーザー委任キーで署名する。

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;

use super::credential::{AmbientCredential, CredentialConfig};
use super::sas::{BlobReadSas, KeyInfo, UserDelegationKey};
use super::{BlobStore, ReadGrant, StorageError};
use crate::config::GatewayConfig;

/// Blob REST APIのバージョン（`x-ms-version`）
pub const AZURE_API_VERSION: &str = "2021-08-06";

/// Azure Blob Storageによる `BlobStore` 実装。単一のコンテナに束縛される。
pub struct AzureBlobStore {
    http: reqwest::Client,
    credential: AmbientCredential,
    account: String,
    container: String,
    /// `https://{account}.blob.core.windows.net`（末尾スラッシュなし）
    endpoint: String,
}

impl AzureBlobStore {
    pub fn new(
        http: reqwest::Client,
        credential: AmbientCredential,
        account: impl Into<String>,
        container: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            http,
            credential,
            account: account.into(),
            container: container.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    /// Gateway設定と環境のアンビエントIDから構築する。
    pub fn from_config(config: &GatewayConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("sas-upload-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let credential = AmbientCredential::new(http.clone(), CredentialConfig::from_env());

        tracing::info!(
            storage_account = %config.storage_account,
            container = %config.container,
            endpoint = %config.blob_endpoint,
            credential = credential.source_name(),
            "Azure Blob Storageクライアントを初期化しました"
        );

        Ok(Self::new(
            http,
            credential,
            &config.storage_account,
            &config.container,
            &config.blob_endpoint,
        ))
    }

    fn container_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.container)
    }

    /// Blobの正規URL（SASなし）。
    pub fn blob_url(&self, blob_name: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.container, blob_name)
    }

    /// SASの `spr`。HTTPのエンドポイント（エミュレータ等）ではHTTPも許可する。
    fn sas_protocol(&self) -> &'static str {
        if self.endpoint.starts_with("https://") {
            "https"
        } else {
            "https,http"
        }
    }

    /// 共通ヘッダーとBearerトークンを付与する。
    async fn authorized(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, StorageError> {
        let token = self.credential.token().await?;
        Ok(request
            .bearer_auth(token)
            .header("x-ms-version", AZURE_API_VERSION)
            .header(
                "x-ms-date",
                Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            )
            .header("x-ms-client-request-id", uuid::Uuid::new_v4().to_string()))
    }

    /// ユーザー委任キーを取得する。キーの有効期間はSASの有効期間と同じにする。
    async fn get_user_delegation_key(
        &self,
        starts_on: DateTime<Utc>,
        expires_on: DateTime<Utc>,
    ) -> Result<UserDelegationKey, StorageError> {
        let body = KeyInfo::new(starts_on, expires_on).to_xml()?;
        let request = self
            .http
            .post(format!(
                "{}/?restype=service&comp=userdelegationkey",
                self.endpoint
            ))
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(body);

        let response = self.authorized(request).await?.send().await?;
        let response = error_for_status(response).await?;
        let xml = response.text().await?;

        UserDelegationKey::from_xml(&xml)
    }
}

/// 2xx以外のレスポンスを `StorageError::Service` に変換する。
async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StorageError::Service {
        status: status.as_u16(),
        body,
    })
}

#[async_trait::async_trait]
impl BlobStore for AzureBlobStore {
    async fn create_container_if_absent(&self) -> Result<(), StorageError> {
        let request = self
            .http
            .put(format!("{}?restype=container", self.container_url()))
            .header(reqwest::header::CONTENT_LENGTH, 0);

        let response = self.authorized(request).await?.send().await?;
        if response.status() == StatusCode::CONFLICT {
            tracing::debug!(container = %self.container, "コンテナは既に存在します");
            return Ok(());
        }
        error_for_status(response).await?;

        tracing::info!(container = %self.container, "コンテナを作成しました");
        Ok(())
    }

    async fn write_object(
        &self,
        blob_name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let request = self
            .http
            .put(self.blob_url(blob_name))
            .header("x-ms-blob-type", "BlockBlob")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data);

        let response = self.authorized(request).await?.send().await?;
        error_for_status(response).await?;
        Ok(())
    }

    async fn issue_read_grant(
        &self,
        blob_name: &str,
        starts_on: DateTime<Utc>,
        expires_on: DateTime<Utc>,
    ) -> Result<ReadGrant, StorageError> {
        let key = self.get_user_delegation_key(starts_on, expires_on).await?;
        let query = BlobReadSas::new(
            &self.account,
            &self.container,
            blob_name,
            starts_on,
            expires_on,
            &key,
        )
        .with_protocol(self.sas_protocol())
        .query()?;

        Ok(ReadGrant {
            url: format!("{}?{query}", self.blob_url(blob_name)),
            starts_on,
            expires_on,
        })
    }
}
