//! SMTP 送信実装
//!
//! lettre の `AsyncSmtpTransport` を使用してメールを送信する。
//! 開発環境ではローカル SMTP サーバー（Mailpit 等）に接続する。
//! SMTP リレーが認証を要求する場合は [`SmtpCredentials`] を渡す。

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport,
    AsyncTransport,
    Tokio1Executor,
    message::{Mailbox, Message, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use smsrelay_domain::delivery::{OutboundEmail, TransportError};

use super::Transport;

/// SMTP 認証情報
#[derive(Clone)]
pub struct SmtpCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SmtpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// SMTP 送信
pub struct SmtpTransport {
    transport:    AsyncSmtpTransport<Tokio1Executor>,
    from_address: Mailbox,
    reply_to:     Option<Mailbox>,
}

impl SmtpTransport {
    /// 新しい SMTP 送信インスタンスを作成
    ///
    /// # Errors
    ///
    /// 送信元・返信先アドレスがメールアドレスとして不正な場合
    pub fn new(
        host: &str,
        port: u16,
        credentials: Option<SmtpCredentials>,
        from_address: &str,
        reply_to: Option<&str>,
    ) -> Result<Self, TransportError> {
        // builder_dangerous: TLS なしで接続（ローカル SMTP 向け）
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(port);
        if let Some(credentials) = credentials {
            builder = builder.credentials(Credentials::new(
                credentials.username,
                credentials.password,
            ));
        }

        Ok(Self {
            transport:    builder.build(),
            from_address: parse_mailbox(from_address, "送信元")?,
            reply_to:     reply_to
                .map(|address| parse_mailbox(address, "返信先"))
                .transpose()?,
        })
    }
}

fn parse_mailbox(address: &str, label: &str) -> Result<Mailbox, TransportError> {
    address
        .parse()
        .map_err(|e| TransportError::SendFailed(format!("{label}アドレス不正: {e}")))
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError> {
        let mut builder = Message::builder()
            .from(self.from_address.clone())
            .to(parse_mailbox(&email.to, "宛先")?)
            .subject(&email.subject)
            .header(ContentType::TEXT_PLAIN);
        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to.clone());
        }
        let message = builder
            .body(email.body.clone())
            .map_err(|e| TransportError::SendFailed(format!("メッセージ構築失敗: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(format!("SMTP 送信失敗: {e}")))?;

        Ok(())
    }
}
