//! # 送信経路（トランスポート）
//!
//! ゲートウェイ宛てメールの送信を担当するインフラストラクチャモジュール。
//!
//! ## 設計方針
//!
//! - **trait による抽象化**: [`Transport`] トレイトで送信処理を抽象化
//! - **3 つの実装**: SMTP（開発・リレー用）、SES（本番用）、Noop（ログのみ）
//! - **送信キュー**: [`DeliveryQueue`] も [`Transport`] を実装し、
//!   呼び出し側からは同期的な送信に見える。実際の送信は単一のワーカーが
//!   FIFO 順・レート制限付きで行う
//! - **環境変数切替**: `TRANSPORT_BACKEND` でランタイム選択

mod noop;
mod queue;
mod rate_limit;
mod ses;
mod smtp;

use async_trait::async_trait;
pub use noop::NoopTransport;
pub use queue::{DeliveryQueue, DeliveryQueueConfig, DeliveryWorker, OverflowPolicy};
pub use rate_limit::TokenBucket;
pub use ses::SesTransport;
use smsrelay_domain::delivery::{OutboundEmail, TransportError};
pub use smtp::{SmtpCredentials, SmtpTransport};

/// メール送信トレイト
///
/// 成功は送信経路がメールを受け付けたことを意味する。
#[async_trait]
pub trait Transport: Send + Sync {
    /// メールを送信する
    async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError>;
}
