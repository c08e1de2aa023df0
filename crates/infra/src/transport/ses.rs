//! SES 送信実装
//!
//! AWS SES v2 API を使用してテキストメールを送信する。本番環境で使用する。

use async_trait::async_trait;
use aws_sdk_sesv2::{
    Client,
    types::{Body, Content, Destination, EmailContent, Message},
};
use smsrelay_domain::delivery::{OutboundEmail, TransportError};

use super::Transport;

/// SES 送信
pub struct SesTransport {
    client:       Client,
    from_address: String,
    reply_to:     Option<String>,
}

impl SesTransport {
    /// 新しい SES 送信インスタンスを作成
    ///
    /// - `from_address`: 送信元メールアドレス（SES で検証済みであること）
    /// - `reply_to`: 返信先アドレス。SMS の返信を受信用アドレスに集める場合に指定する
    pub fn new(client: Client, from_address: String, reply_to: Option<String>) -> Self {
        Self {
            client,
            from_address,
            reply_to,
        }
    }
}

fn content(data: &str, label: &str) -> Result<Content, TransportError> {
    Content::builder()
        .data(data)
        .charset("UTF-8")
        .build()
        .map_err(|e| TransportError::SendFailed(format!("{label}構築失敗: {e}")))
}

#[async_trait]
impl Transport for SesTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError> {
        let destination = Destination::builder().to_addresses(&email.to).build();

        let content = EmailContent::builder()
            .simple(
                Message::builder()
                    .subject(content(&email.subject, "件名")?)
                    .body(Body::builder().text(content(&email.body, "本文")?).build())
                    .build(),
            )
            .build();

        let mut request = self
            .client
            .send_email()
            .from_email_address(&self.from_address)
            .destination(destination)
            .content(content);
        if let Some(reply_to) = &self.reply_to {
            request = request.reply_to_addresses(reply_to);
        }

        request
            .send()
            .await
            .map_err(|e| TransportError::SendFailed(format!("SES 送信失敗: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SesTransport>();
    }
}
