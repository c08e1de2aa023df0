//! # メッセージ
//!
//! 作成された本文（`[[PARAM]]` プレースホルダを含みうる）と、その宛先の集合。
//!
//! ## 設計方針
//!
//! - **ID は初回保存時に確定**: 保存前のメッセージは `id() == None`
//! - **スラッグは業務キー**: テンプレートメッセージの冪等な検索に使う。
//!   前後の空白を除去し小文字に正規化する
//! - **保存前の検証**: 本文とスラッグが空のメッセージは保存できない
//!   （[`Message::ensure_persistable`]）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{
    DomainError,
    recipient::{Destination, NewRecipient, Recipient},
};

define_uuid_id! {
    /// メッセージ ID
    pub struct MessageId;
}

/// メッセージの方向
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
    /// 送信するメッセージ
    Outgoing,
    /// 受信した返信の記録
    Incoming,
}

/// メッセージエンティティ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: Option<MessageId>,
    slug: String,
    body: String,
    direction: Direction,
    created_at: DateTime<Utc>,
    send_on: Option<DateTime<Utc>>,
    origin: Option<Destination>,
    recipients: Vec<Recipient>,
}

/// 新規メッセージの作成パラメータ
pub struct NewMessage {
    pub slug:    String,
    pub body:    String,
    pub send_on: Option<DateTime<Utc>>,
    pub now:     DateTime<Utc>,
}

/// 受信メッセージの作成パラメータ
pub struct NewInboundMessage {
    pub origin: Destination,
    pub body:   String,
    pub now:    DateTime<Utc>,
}

/// メッセージの DB 復元パラメータ
pub struct MessageRecord {
    pub id: MessageId,
    pub slug: String,
    pub body: String,
    pub direction: Direction,
    pub created_at: DateTime<Utc>,
    pub send_on: Option<DateTime<Utc>>,
    pub origin: Option<Destination>,
}

impl Message {
    /// 送信用の新しいメッセージを作成する
    pub fn new(params: NewMessage) -> Self {
        Self {
            id: None,
            slug: normalize_slug(&params.slug),
            body: params.body,
            direction: Direction::Outgoing,
            created_at: params.now,
            send_on: params.send_on,
            origin: None,
            recipients: Vec::new(),
        }
    }

    /// 受信した返信を記録するメッセージを作成する
    ///
    /// スラッグは `inbound_<network>_<subscriber>_<マイクロ秒>` で自動生成する。
    pub fn inbound(params: NewInboundMessage) -> Self {
        let slug = format!(
            "inbound_{}_{}_{}",
            params.origin.network,
            params.origin.subscriber_id,
            params.now.timestamp_micros()
        );
        Self {
            id: None,
            slug: normalize_slug(&slug),
            body: params.body,
            direction: Direction::Incoming,
            created_at: params.now,
            send_on: None,
            origin: Some(params.origin),
            recipients: Vec::new(),
        }
    }

    /// 既存のデータから復元する（宛先は [`Message::with_recipients`] で付与する）
    pub fn from_db(record: MessageRecord) -> Self {
        Self {
            id: Some(record.id),
            slug: record.slug,
            body: record.body,
            direction: record.direction,
            created_at: record.created_at,
            send_on: record.send_on,
            origin: record.origin,
            recipients: Vec::new(),
        }
    }

    // Getter メソッド

    pub fn id(&self) -> Option<&MessageId> {
        self.id.as_ref()
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn send_on(&self) -> Option<DateTime<Utc>> {
        self.send_on
    }

    pub fn origin(&self) -> Option<&Destination> {
        self.origin.as_ref()
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    // ビジネスロジックメソッド

    /// 宛先を追加する
    pub fn add_to(&mut self, recipient: NewRecipient) {
        self.recipients.push(Recipient::new(recipient));
    }

    /// 永続化できる状態か検証する
    ///
    /// # Errors
    ///
    /// 本文またはスラッグが空（空白のみを含む）の場合は `DomainError::Validation`
    pub fn ensure_persistable(&self) -> Result<(), DomainError> {
        if self.body.trim().is_empty() {
            return Err(DomainError::Validation(
                "メッセージ本文は必須です".to_string(),
            ));
        }
        if self.slug.is_empty() {
            return Err(DomainError::Validation(
                "メッセージのスラッグは必須です".to_string(),
            ));
        }
        Ok(())
    }

    /// 採番された ID を設定する
    pub fn persisted(self, id: MessageId) -> Self {
        Self {
            id: Some(id),
            ..self
        }
    }

    /// 宛先の一覧を置き換える
    pub fn with_recipients(self, recipients: Vec<Recipient>) -> Self {
        Self { recipients, ..self }
    }
}

fn normalize_slug(slug: &str) -> String {
    slug.trim().to_lowercase()
}
