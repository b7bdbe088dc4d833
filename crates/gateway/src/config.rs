//! # Gateway設定・共有状態
//!
//! 環境変数からの設定読み込みとGatewayの共有状態の定義。

use anyhow::{anyhow, Context};

use crate::storage::BlobStore;

/// コンテナ名のデフォルト値
pub const DEFAULT_CONTAINER_NAME: &str = "uploads";
/// SAS有効期間（分）のデフォルト値
pub const DEFAULT_SAS_EXPIRY_MINUTES: u32 = 60;
/// SAS有効期間（分）の上限。
///
/// ユーザー委任キーの有効期限はサービス側の時計で7日以内でなければならないため、
/// 7日から時計ずれの余裕分を差し引く。
pub const MAX_SAS_EXPIRY_MINUTES: u32 = 7 * 24 * 60 - CLOCK_DRIFT_MARGIN_MINUTES;
/// サービス側時計とのずれとして見込む幅（分）
pub const CLOCK_DRIFT_MARGIN_MINUTES: u32 = 15;
/// 待受ポートのデフォルト値
pub const DEFAULT_PORT: u16 = 3000;
/// アップロード最大サイズのデフォルト値（100 MiB）
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// 環境変数から読み込むGateway設定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// ストレージアカウント名（`STORAGE_ACCOUNT_NAME`、必須）
    pub storage_account: String,
    /// コンテナ名（`STORAGE_CONTAINER_NAME`）
    pub container: String,
    /// SASの有効期間（分）（`ACCESS_TOKEN_EXPIRY_MINUTES`）
    pub sas_expiry_minutes: u32,
    /// 待受ポート（`PORT`）
    pub port: u16,
    /// アップロード最大サイズ（バイト）（`MAX_UPLOAD_SIZE_BYTES`）
    pub max_upload_size: u64,
    /// Blobサービスのエンドポイント（`STORAGE_BLOB_ENDPOINT`）。
    /// 未設定の場合は `https://{account}.blob.core.windows.net`。
    pub blob_endpoint: String,
}

impl GatewayConfig {
    /// プロセスの環境変数から構築する。
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意のキー参照関数から構築する。
    /// 空文字列の値は未設定として扱う。
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let storage_account = get("STORAGE_ACCOUNT_NAME")
            .ok_or_else(|| anyhow!("STORAGE_ACCOUNT_NAMEが設定されていません"))?;

        let container =
            get("STORAGE_CONTAINER_NAME").unwrap_or_else(|| DEFAULT_CONTAINER_NAME.to_string());

        let sas_expiry_minutes = match get("ACCESS_TOKEN_EXPIRY_MINUTES") {
            Some(v) => v
                .trim()
                .parse::<u32>()
                .with_context(|| format!("ACCESS_TOKEN_EXPIRY_MINUTESが不正です: {v}"))?,
            None => DEFAULT_SAS_EXPIRY_MINUTES,
        };
        if sas_expiry_minutes == 0 || sas_expiry_minutes > MAX_SAS_EXPIRY_MINUTES {
            return Err(anyhow!(
                "ACCESS_TOKEN_EXPIRY_MINUTESは1以上{MAX_SAS_EXPIRY_MINUTES}以下である必要があります: {sas_expiry_minutes}"
            ));
        }

        let port = match get("PORT") {
            Some(v) => v
                .trim()
                .parse::<u16>()
                .with_context(|| format!("PORTが不正です: {v}"))?,
            None => DEFAULT_PORT,
        };

        let max_upload_size = match get("MAX_UPLOAD_SIZE_BYTES") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .with_context(|| format!("MAX_UPLOAD_SIZE_BYTESが不正です: {v}"))?,
            None => DEFAULT_MAX_UPLOAD_SIZE,
        };
        if max_upload_size == 0 {
            return Err(anyhow!("MAX_UPLOAD_SIZE_BYTESは1以上である必要があります"));
        }

        let blob_endpoint = get("STORAGE_BLOB_ENDPOINT")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://{storage_account}.blob.core.windows.net"));

        Ok(Self {
            storage_account,
            container,
            sas_expiry_minutes,
            port,
            max_upload_size,
            blob_endpoint,
        })
    }
}

/// Gatewayの共有状態。
///
/// ストレージクライアントは起動時に一度だけ構築され、ここに注入される。
pub struct GatewayState {
    /// 起動時に確定した設定
    pub config: GatewayConfig,
    /// Blobストレージ（Azure等、トレイトで抽象化）
    pub blob_store: Box<dyn BlobStore>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, blob_store: Box<dyn BlobStore>) -> Self {
        Self { config, blob_store }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_lookup(lookup_from(&[("STORAGE_ACCOUNT_NAME", "acct")]))
            .unwrap();

        assert_eq!(config.storage_account, "acct");
        assert_eq!(config.container, DEFAULT_CONTAINER_NAME);
        assert_eq!(config.sas_expiry_minutes, 60);
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_upload_size, 100 * 1024 * 1024);
        assert_eq!(config.blob_endpoint, "https://acct.blob.core.windows.net");
    }

    /// STORAGE_ACCOUNT_NAMEの欠落は起動時エラー
    #[test]
    fn test_missing_account_is_fatal() {
        let err = GatewayConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("STORAGE_ACCOUNT_NAME"));

        let err = GatewayConfig::from_lookup(lookup_from(&[("STORAGE_ACCOUNT_NAME", "  ")]))
            .unwrap_err();
        assert!(err.to_string().contains("STORAGE_ACCOUNT_NAME"));
    }

    #[test]
    fn test_overrides() {
        let config = GatewayConfig::from_lookup(lookup_from(&[
            ("STORAGE_ACCOUNT_NAME", "acct"),
            ("STORAGE_CONTAINER_NAME", "files"),
            ("ACCESS_TOKEN_EXPIRY_MINUTES", "15"),
            ("PORT", "8080"),
            ("MAX_UPLOAD_SIZE_BYTES", "2048"),
            ("STORAGE_BLOB_ENDPOINT", "http://127.0.0.1:10000/devstoreaccount1/"),
        ]))
        .unwrap();

        assert_eq!(config.container, "files");
        assert_eq!(config.sas_expiry_minutes, 15);
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_upload_size, 2048);
        assert_eq!(config.blob_endpoint, "http://127.0.0.1:10000/devstoreaccount1");
    }

    #[test]
    fn test_invalid_expiry_rejected() {
        for value in ["0", "-5", "abc", "10080", "10081"] {
            let result = GatewayConfig::from_lookup(lookup_from(&[
                ("STORAGE_ACCOUNT_NAME", "acct"),
                ("ACCESS_TOKEN_EXPIRY_MINUTES", value),
            ]));
            assert!(result.is_err(), "expiry {value} should be rejected");
        }

        let config = GatewayConfig::from_lookup(lookup_from(&[
            ("STORAGE_ACCOUNT_NAME", "acct"),
            ("ACCESS_TOKEN_EXPIRY_MINUTES", "10065"),
        ]))
        .unwrap();
        assert_eq!(config.sas_expiry_minutes, MAX_SAS_EXPIRY_MINUTES);
    }

    #[test]
    fn test_invalid_port_and_size_rejected() {
        assert!(GatewayConfig::from_lookup(lookup_from(&[
            ("STORAGE_ACCOUNT_NAME", "acct"),
            ("PORT", "70000"),
        ]))
        .is_err());

        assert!(GatewayConfig::from_lookup(lookup_from(&[
            ("STORAGE_ACCOUNT_NAME", "acct"),
            ("MAX_UPLOAD_SIZE_BYTES", "0"),
        ]))
        .is_err());
    }
}
