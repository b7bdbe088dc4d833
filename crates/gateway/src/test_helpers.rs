//! # テスト用共通ヘルパー
//!
//! エンドポイントテストとルーターテストで共有するモックストアと状態。

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::config::GatewayConfig;
use crate::config::GatewayState;
use crate::storage::{BlobStore, ReadGrant, StorageError};

/// モックストアが受け付けた書き込み
#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub blob_name: String,
    pub data: Bytes,
    pub content_type: String,
}

/// モックストアが受け付けたアクセス許可の要求
#[derive(Debug, Clone)]
pub struct RecordedGrant {
    pub blob_name: String,
    pub starts_on: DateTime<Utc>,
    pub expires_on: DateTime<Utc>,
}

/// 呼び出しを記録するモックBlobStore。ネットワーク接続なしでSAS URLのダミーを返す。
#[derive(Clone, Default)]
pub struct RecordingBlobStore {
    pub writes: Arc<Mutex<Vec<RecordedWrite>>>,
    pub grants: Arc<Mutex<Vec<RecordedGrant>>>,
    pub fail_write: bool,
    pub fail_grant: bool,
    /// 書き込み時にpanicする（panicハンドラの確認用）
    pub panic_on_write: bool,
}

impl RecordingBlobStore {
    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn grant_count(&self) -> usize {
        self.grants.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl BlobStore for RecordingBlobStore {
    async fn create_container_if_absent(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn write_object(
        &self,
        blob_name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        if self.panic_on_write {
            panic!("recording store: write panicked for {blob_name}");
        }
        if self.fail_write {
            return Err(StorageError::Service {
                status: 503,
                body: "ServerBusy".to_string(),
            });
        }
        self.writes.lock().unwrap().push(RecordedWrite {
            blob_name: blob_name.to_string(),
            data,
            content_type: content_type.to_string(),
        });
        Ok(())
    }

    async fn issue_read_grant(
        &self,
        blob_name: &str,
        starts_on: DateTime<Utc>,
        expires_on: DateTime<Utc>,
    ) -> Result<ReadGrant, StorageError> {
        if self.fail_grant {
            return Err(StorageError::Service {
                status: 403,
                body: "AuthorizationPermissionMismatch".to_string(),
            });
        }
        self.grants.lock().unwrap().push(RecordedGrant {
            blob_name: blob_name.to_string(),
            starts_on,
            expires_on,
        });
        Ok(ReadGrant {
            url: format!("http://mock-storage/uploads/{blob_name}?sp=r&sig=test"),
            starts_on,
            expires_on,
        })
    }
}

/// テスト用のGateway設定
pub fn test_config(max_upload_size: u64) -> GatewayConfig {
    GatewayConfig {
        storage_account: "testaccount".to_string(),
        container: "uploads".to_string(),
        sas_expiry_minutes: 30,
        port: 0,
        max_upload_size,
        blob_endpoint: "http://mock-storage".to_string(),
    }
}

/// テスト用GatewayStateを構築するヘルパー
pub fn test_state(store: RecordingBlobStore, max_upload_size: u64) -> Arc<GatewayState> {
    Arc::new(GatewayState::new(
        test_config(max_upload_size),
        Box::new(store),
    ))
}
