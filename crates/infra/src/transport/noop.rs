//! Noop 送信実装
//!
//! メールを実際に送信せず、ログ出力のみ行う。

use async_trait::async_trait;
use smsrelay_domain::delivery::{OutboundEmail, TransportError};

use super::Transport;

/// Noop 送信（ログ出力のみ）
#[derive(Debug, Clone)]
pub struct NoopTransport;

#[async_trait]
impl Transport for NoopTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError> {
        tracing::info!(
            to = %email.to,
            body_len = email.body.len(),
            "Noop: メール送信をスキップ"
        );
        Ok(())
    }
}
