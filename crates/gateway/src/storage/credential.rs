//! # アンビエントID
//!
//! 実行環境から解決される資格情報でAzure Storage用のアクセストークンを取得する。
//! シークレットを設定として受け取ることはない。
//!
//! 解決順（最初に条件を満たしたものを使う）:
//! 1. ワークロードID（`AZURE_FEDERATED_TOKEN_FILE` + `AZURE_TENANT_ID` + `AZURE_CLIENT_ID`）
//! 2. App Service / Container Appsのマネージド ID（`IDENTITY_ENDPOINT` + `IDENTITY_HEADER`）
//! 3. VMのIMDSマネージド ID

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use super::StorageError;

/// Azure Storageのトークンスコープ（AAD v2）
const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";
/// Azure Storageのリソース（マネージド ID）
const STORAGE_RESOURCE: &str = "https://storage.azure.com/";
const AZURE_PUBLIC_CLOUD: &str = "https://login.microsoftonline.com";
const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";
/// 有効期限のこの時間前にトークンを更新する
const REFRESH_MARGIN_MINUTES: i64 = 5;

pub const AZURE_CLIENT_ID: &str = "AZURE_CLIENT_ID";
pub const AZURE_TENANT_ID: &str = "AZURE_TENANT_ID";
pub const AZURE_FEDERATED_TOKEN_FILE: &str = "AZURE_FEDERATED_TOKEN_FILE";
pub const AZURE_AUTHORITY_HOST: &str = "AZURE_AUTHORITY_HOST";
pub const IDENTITY_ENDPOINT: &str = "IDENTITY_ENDPOINT";
pub const IDENTITY_HEADER: &str = "IDENTITY_HEADER";

/// アンビエントIDの解決に使う環境情報。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialConfig {
    /// ユーザー割り当てIDのクライアントID（ワークロードIDでは必須）
    pub client_id: Option<String>,
    pub tenant_id: Option<String>,
    pub federated_token_file: Option<String>,
    pub authority_host: String,
    pub identity_endpoint: Option<String>,
    pub identity_header: Option<String>,
    pub imds_endpoint: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            tenant_id: None,
            federated_token_file: None,
            authority_host: AZURE_PUBLIC_CLOUD.to_string(),
            identity_endpoint: None,
            identity_header: None,
            imds_endpoint: IMDS_ENDPOINT.to_string(),
        }
    }
}

impl CredentialConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let default = Self::default();

        Self {
            client_id: get(AZURE_CLIENT_ID),
            tenant_id: get(AZURE_TENANT_ID),
            federated_token_file: get(AZURE_FEDERATED_TOKEN_FILE),
            authority_host: get(AZURE_AUTHORITY_HOST).unwrap_or(default.authority_host),
            identity_endpoint: get(IDENTITY_ENDPOINT),
            identity_header: get(IDENTITY_HEADER),
            imds_endpoint: default.imds_endpoint,
        }
    }
}

/// 解決済みのトークン取得方法。
#[derive(Debug, Clone, PartialEq, Eq)]
enum IdentitySource {
    WorkloadIdentity {
        token_file: String,
        tenant_id: String,
        client_id: String,
        authority_host: String,
    },
    AppService {
        endpoint: String,
        header: String,
        client_id: Option<String>,
    },
    Imds {
        endpoint: String,
        client_id: Option<String>,
    },
}

impl IdentitySource {
    fn resolve(config: CredentialConfig) -> Self {
        if let (Some(token_file), Some(tenant_id), Some(client_id)) = (
            config.federated_token_file,
            config.tenant_id,
            config.client_id.clone(),
        ) {
            return Self::WorkloadIdentity {
                token_file,
                tenant_id,
                client_id,
                authority_host: config.authority_host,
            };
        }

        if let (Some(endpoint), Some(header)) = (config.identity_endpoint, config.identity_header)
        {
            return Self::AppService {
                endpoint,
                header,
                client_id: config.client_id,
            };
        }

        Self::Imds {
            endpoint: config.imds_endpoint,
            client_id: config.client_id,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::WorkloadIdentity { .. } => "workload_identity",
            Self::AppService { .. } => "app_service_managed_identity",
            Self::Imds { .. } => "imds_managed_identity",
        }
    }
}

/// Bearerトークン。
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_on - Duration::minutes(REFRESH_MARGIN_MINUTES) > now
    }
}

/// トークンエンドポイントのレスポンス。
///
/// `expires_on` / `expires_in` はエンドポイントにより数値または文字列で返る。
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_on: Option<serde_json::Value>,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

fn as_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl TokenResponse {
    fn into_access_token(self, now: DateTime<Utc>) -> AccessToken {
        let expires_on = self
            .expires_on
            .as_ref()
            .and_then(as_i64)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .or_else(|| {
                self.expires_in
                    .as_ref()
                    .and_then(as_i64)
                    .and_then(Duration::try_seconds)
                    .and_then(|d| now.checked_add_signed(d))
            })
            // 期限不明のトークンはキャッシュしない
            .unwrap_or(now);

        AccessToken {
            token: self.access_token,
            expires_on,
        }
    }
}

/// アンビエントIDによるトークンプロバイダ。取得したトークンは期限までキャッシュする。
pub struct AmbientCredential {
    http: reqwest::Client,
    source: IdentitySource,
    cached: Mutex<Option<AccessToken>>,
}

impl AmbientCredential {
    pub fn new(http: reqwest::Client, config: CredentialConfig) -> Self {
        Self {
            http,
            source: IdentitySource::resolve(config),
            cached: Mutex::new(None),
        }
    }

    /// IMDSエンドポイントを差し替える（テスト用）。
    #[cfg(test)]
    fn with_imds_endpoint(http: reqwest::Client, endpoint: &str, client_id: Option<&str>) -> Self {
        Self {
            http,
            source: IdentitySource::Imds {
                endpoint: endpoint.to_string(),
                client_id: client_id.map(str::to_string),
            },
            cached: Mutex::new(None),
        }
    }

    /// 使用中の資格情報の種類（ログ用）。
    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// 有効なBearerトークンを返す。期限が近い場合は再取得する。
    pub async fn token(&self) -> Result<String, StorageError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.token.clone());
        }

        let token = self.fetch(now).await?;
        tracing::debug!(
            source = self.source.name(),
            expires_on = %token.expires_on,
            "アクセストークンを取得しました"
        );
        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }

    fn endpoint_url(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Url, StorageError> {
        reqwest::Url::parse_with_params(endpoint, query).map_err(|e| {
            StorageError::Credential(format!(
                "{}のエンドポイントが不正です ({endpoint}): {e}",
                self.source.name()
            ))
        })
    }

    async fn fetch(&self, now: DateTime<Utc>) -> Result<AccessToken, StorageError> {
        let request = match &self.source {
            IdentitySource::WorkloadIdentity {
                token_file,
                tenant_id,
                client_id,
                authority_host,
            } => {
                let assertion = tokio::fs::read_to_string(token_file).await.map_err(|e| {
                    StorageError::Credential(format!(
                        "フェデレーショントークンの読み込みに失敗 ({token_file}): {e}"
                    ))
                })?;
                let url = format!(
                    "{}/{tenant_id}/oauth2/v2.0/token",
                    authority_host.trim_end_matches('/')
                );
                let body = form_urlencoded::Serializer::new(String::new())
                    .append_pair("client_id", client_id)
                    .append_pair("scope", STORAGE_SCOPE)
                    .append_pair(
                        "client_assertion_type",
                        "urn:ietf:params:oauth:client-assertion-type:jwt-bearer",
                    )
                    .append_pair("client_assertion", assertion.trim())
                    .append_pair("grant_type", "client_credentials")
                    .finish();

                self.http
                    .post(url)
                    .header(
                        reqwest::header::CONTENT_TYPE,
                        "application/x-www-form-urlencoded",
                    )
                    .body(body)
            }
            IdentitySource::AppService {
                endpoint,
                header,
                client_id,
            } => {
                let mut query = vec![
                    ("api-version", APP_SERVICE_API_VERSION),
                    ("resource", STORAGE_RESOURCE),
                ];
                if let Some(client_id) = client_id {
                    query.push(("client_id", client_id.as_str()));
                }
                self.http
                    .get(self.endpoint_url(endpoint, &query)?)
                    .header("X-IDENTITY-HEADER", header)
            }
            IdentitySource::Imds {
                endpoint,
                client_id,
            } => {
                let mut query = vec![
                    ("api-version", IMDS_API_VERSION),
                    ("resource", STORAGE_RESOURCE),
                ];
                if let Some(client_id) = client_id {
                    query.push(("client_id", client_id.as_str()));
                }
                self.http
                    .get(self.endpoint_url(endpoint, &query)?)
                    .header("Metadata", "true")
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| StorageError::Credential(format!("{}: {e}", self.source.name())))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StorageError::Credential(format!("{}: {e}", self.source.name())))?;

        if !status.is_success() {
            return Err(StorageError::Credential(format!(
                "{}がエラーを返しました: HTTP {} - {}",
                self.source.name(),
                status,
                body
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            StorageError::Credential(format!("トークンレスポンスのパースに失敗: {e}"))
        })?;

        Ok(parsed.into_access_token(now))
    }
}
