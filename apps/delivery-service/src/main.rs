//! # Delivery Service
//!
//! メッセージの定期配信を行う常駐サービス。
//!
//! ## 構成
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Scheduler   │────→│  Dispatcher  │────→│    Queue     │────→│  SMTP / SES  │
//! └──────────────┘     └──────────────┘     └──────────────┘     └──────────────┘
//!        │                    │
//!        └────────┬───────────┘
//!                 ↓
//!          ┌──────────────┐
//!          │  PostgreSQL  │
//!          └──────────────┘
//! ```
//!
//! 環境変数の一覧は [`smsrelay_delivery_service::config`] を参照。
//!
//! ## 起動方法
//!
//! ```bash
//! DATABASE_URL=postgres://... cargo run -p smsrelay-delivery-service
//! ```

use std::sync::Arc;

use anyhow::Context;
use smsrelay_delivery_service::{
    config::{DeliveryConfig, TransportBackend, TransportConfig},
    usecase::{DueMessageScheduler, RecipientDispatcher},
};
use smsrelay_domain::clock::{Clock, SystemClock};
use smsrelay_infra::{
    db,
    repository::{MessageRepository, PostgresMessageRepository},
    transport::{DeliveryQueue, NoopTransport, SesTransport, SmtpTransport, Transport},
};
use smsrelay_shared::observability::{TracingConfig, init_tracing};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env ファイルを読み込む（存在する場合）
    dotenvy::dotenv().ok();

    let _app = init_tracing(&TracingConfig::from_env("delivery-service")).entered();

    let config = DeliveryConfig::from_env().context("設定の読み込みに失敗しました")?;

    let pool = db::create_pool(&config.database_url)
        .await
        .context("データベースに接続できません")?;
    db::run_migrations(&pool)
        .await
        .context("マイグレーションに失敗しました")?;
    tracing::info!("データベースに接続しました");

    let backend = build_transport(&config.transport).await?;
    let cancel = CancellationToken::new();
    let (queue, worker) = DeliveryQueue::new(config.queue.clone(), backend);
    let worker_handle = worker.spawn(cancel.clone());

    let repository: Arc<dyn MessageRepository> = Arc::new(PostgresMessageRepository::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let dispatcher = Arc::new(
        RecipientDispatcher::new(
            repository.clone(),
            Arc::new(queue),
            Arc::new(config.gateways),
            clock.clone(),
        )
        .with_max_attempts(config.scheduler.max_attempts),
    );
    let scheduler = Arc::new(DueMessageScheduler::new(
        repository,
        dispatcher,
        clock,
        config.scheduler.poll_interval,
    ));
    let scheduler_handle = scheduler.spawn(cancel.clone());

    tokio::signal::ctrl_c()
        .await
        .context("シグナルの待機に失敗しました")?;
    tracing::info!("停止シグナルを受信しました");

    cancel.cancel();
    scheduler_handle.await?;
    worker_handle.await?;

    tracing::info!("Delivery Service を停止しました");
    Ok(())
}

async fn build_transport(config: &TransportConfig) -> anyhow::Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match config.backend {
        TransportBackend::Smtp => {
            tracing::info!(host = %config.smtp_host, port = config.smtp_port, "SMTP で送信します");
            Arc::new(SmtpTransport::new(
                &config.smtp_host,
                config.smtp_port,
                config.smtp_credentials.clone(),
                &config.from_address,
                config.reply_to.as_deref(),
            )?)
        }
        TransportBackend::Ses => {
            tracing::info!("Amazon SES で送信します");
            let aws_config = aws_config::load_from_env().await;
            Arc::new(SesTransport::new(
                aws_sdk_sesv2::Client::new(&aws_config),
                config.from_address.clone(),
                config.reply_to.clone(),
            ))
        }
        TransportBackend::Noop => {
            tracing::info!("送信を行わずログ出力のみ行います");
            Arc::new(NoopTransport)
        }
    };
    Ok(transport)
}
