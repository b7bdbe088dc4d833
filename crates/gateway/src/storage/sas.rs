//! # ユーザー委任SAS
//!
//! ユーザー委任キーで署名した、単一Blobに対する読み取り専用SASを構築する。
//! アカウントキーは使わない。
//!
//! 参照: <https://learn.microsoft.com/en-us/rest/api/storageservices/create-user-delegation-sas>

use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::StorageError;

/// SASの署名バージョン（`sv`）
pub const SAS_VERSION: &str = "2021-08-06";
/// 読み取りのみ
const SAS_PERMISSIONS: &str = "r";
/// 対象リソース: Blob
const SAS_RESOURCE: &str = "b";

type HmacSha256 = Hmac<Sha256>;

/// SASおよびKeyInfoで使う時刻形式（秒精度、UTC）。
pub fn format_sas_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Get User Delegation Keyのリクエストボディ。
#[derive(Debug, Serialize)]
#[serde(rename = "KeyInfo", rename_all = "PascalCase")]
pub struct KeyInfo {
    pub start: String,
    pub expiry: String,
}

impl KeyInfo {
    pub fn new(starts_on: DateTime<Utc>, expires_on: DateTime<Utc>) -> Self {
        Self {
            start: format_sas_time(starts_on),
            expiry: format_sas_time(expires_on),
        }
    }

    /// XML宣言付きでシリアライズする。
    pub fn to_xml(&self) -> Result<String, StorageError> {
        let body = quick_xml::se::to_string(self)
            .map_err(|e| StorageError::Signing(format!("KeyInfoのシリアライズに失敗: {e}")))?;
        Ok(format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>{body}"))
    }
}

/// Get User Delegation Keyのレスポンス。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserDelegationKey {
    pub signed_oid: String,
    pub signed_tid: String,
    pub signed_start: String,
    pub signed_expiry: String,
    pub signed_service: String,
    pub signed_version: String,
    /// Base64エンコードされた署名鍵
    pub value: String,
}

impl UserDelegationKey {
    /// レスポンスXMLをパースする。
    pub fn from_xml(xml: &str) -> Result<Self, StorageError> {
        quick_xml::de::from_str(xml).map_err(|e| {
            StorageError::InvalidResponse(format!("UserDelegationKeyのパースに失敗: {e}"))
        })
    }
}

/// 単一Blobに対する読み取り専用のユーザー委任SAS。
pub struct BlobReadSas<'a> {
    account: &'a str,
    container: &'a str,
    blob_name: &'a str,
    starts_on: DateTime<Utc>,
    expires_on: DateTime<Utc>,
    protocol: &'a str,
    key: &'a UserDelegationKey,
}

impl<'a> BlobReadSas<'a> {
    pub fn new(
        account: &'a str,
        container: &'a str,
        blob_name: &'a str,
        starts_on: DateTime<Utc>,
        expires_on: DateTime<Utc>,
        key: &'a UserDelegationKey,
    ) -> Self {
        Self {
            account,
            container,
            blob_name,
            starts_on,
            expires_on,
            protocol: "https",
            key,
        }
    }

    /// 許可するプロトコル（`spr`）を指定する。エミュレータ向けに `https,http` を使う。
    pub fn with_protocol(mut self, protocol: &'a str) -> Self {
        self.protocol = protocol;
        self
    }

    /// 署名対象文字列（バージョン2020-12-06以降の形式）。
    fn string_to_sign(&self) -> String {
        let canonicalized_resource =
            format!("/blob/{}/{}/{}", self.account, self.container, self.blob_name);
        let start = format_sas_time(self.starts_on);
        let expiry = format_sas_time(self.expires_on);

        [
            SAS_PERMISSIONS,
            start.as_str(),
            expiry.as_str(),
            canonicalized_resource.as_str(),
            self.key.signed_oid.as_str(),
            self.key.signed_tid.as_str(),
            self.key.signed_start.as_str(),
            self.key.signed_expiry.as_str(),
            self.key.signed_service.as_str(),
            self.key.signed_version.as_str(),
            "", // signedAuthorizedUserObjectId
            "", // signedUnauthorizedUserObjectId
            "", // signedCorrelationId
            "", // signedIP
            self.protocol,
            SAS_VERSION,
            SAS_RESOURCE,
            "", // signedSnapshotTime
            "", // signedEncryptionScope
            "", // rscc
            "", // rscd
            "", // rsce
            "", // rscl
            "", // rsct
        ]
        .join("\n")
    }

    fn signature(&self) -> Result<String, StorageError> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(&self.key.value)
            .map_err(|e| StorageError::Signing(format!("委任キーのBase64デコードに失敗: {e}")))?;

        let mut mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| StorageError::Signing(format!("HMAC鍵の初期化に失敗: {e}")))?;
        mac.update(self.string_to_sign().as_bytes());

        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// SASのクエリパラメータ（エンコード前）。
    pub fn token(&self) -> Result<Vec<(&'static str, String)>, StorageError> {
        Ok(vec![
            ("sp", SAS_PERMISSIONS.to_string()),
            ("st", format_sas_time(self.starts_on)),
            ("se", format_sas_time(self.expires_on)),
            ("skoid", self.key.signed_oid.clone()),
            ("sktid", self.key.signed_tid.clone()),
            ("skt", self.key.signed_start.clone()),
            ("ske", self.key.signed_expiry.clone()),
            ("sks", self.key.signed_service.clone()),
            ("skv", self.key.signed_version.clone()),
            ("spr", self.protocol.to_string()),
            ("sv", SAS_VERSION.to_string()),
            ("sr", SAS_RESOURCE.to_string()),
            ("sig", self.signature()?),
        ])
    }

    /// URLエンコード済みのクエリ文字列（先頭の `?` なし）。
    pub fn query(&self) -> Result<String, StorageError> {
        let token = self.token()?;
        Ok(form_urlencoded::Serializer::new(String::new())
            .extend_pairs(token.iter().map(|(k, v)| (*k, v.as_str())))
            .finish())
    }
}
