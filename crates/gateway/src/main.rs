//! # SAS Upload Gateway
//!
//! ファイルを受け取ってAzure Blob Storageに書き込み、読み取り専用の
//! 短期SAS URLを返すGateway。
//!
//! ## 役割
//! - アップロードの検証（空ファイル・サイズ上限）
//! - Blob名の導出とContent-Typeの決定
//! - Blobへの書き込み
//! - ユーザー委任SASの発行
//!
//! ## API エンドポイント
//! - `POST /upload` — multipartの `file` フィールドをアップロードしSAS URLを返す
//! - `GET /health` — 設定値を返すヘルスチェック

mod config;
mod endpoints;
mod error;
mod naming;
mod storage;
#[cfg(test)]
mod test_helpers;

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::response::IntoResponse;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use config::{GatewayConfig, GatewayState};
use endpoints::{handle_health, handle_not_found, handle_upload};
use error::GatewayError;
use storage::{AzureBlobStore, BlobStore};

/// multipartの境界・ヘッダー分としてボディ上限に上乗せする量
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// ハンドラ内のpanicを内部情報を含まない500に変換する。
fn handle_panic(_err: Box<dyn Any + Send + 'static>) -> axum::response::Response {
    tracing::error!("ハンドラ内でpanicが発生しました");
    GatewayError::Internal("panic".to_string()).into_response()
}

/// ルーターを構築する。
fn build_router(state: Arc<GatewayState>) -> axum::Router {
    let body_limit = usize::try_from(state.config.max_upload_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    axum::Router::new()
        .route(
            "/upload",
            axum::routing::post(handle_upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/health", axum::routing::get(handle_health))
        .fallback(handle_not_found)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Ctrl-C / SIGTERM を待つ。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Ctrl-Cハンドラの登録に失敗: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("SIGTERMハンドラの登録に失敗: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("シャットダウンします");
}

// ---------------------------------------------------------------------------
// エントリポイント
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 環境変数の読み込み（STORAGE_ACCOUNT_NAMEの欠落はここで終了）
    let config = GatewayConfig::from_env()?;

    // Blob Storage（アンビエントIDで認証）
    let blob_store = AzureBlobStore::from_config(&config)?;

    // コンテナの作成に失敗しても起動は継続する（作成権限がない場合など）
    if let Err(e) = blob_store.create_container_if_absent().await {
        tracing::warn!(
            container = %config.container,
            "コンテナの確認・作成に失敗しました: {e}"
        );
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(
        storage_account = %config.storage_account,
        container = %config.container,
        sas_expiry_minutes = config.sas_expiry_minutes,
        max_upload_size = config.max_upload_size,
        "Gatewayを {} で起動します",
        addr
    );

    let state = Arc::new(GatewayState::new(config, Box::new(blob_store)));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// テスト
// ---------------------------------------------------------------------------
