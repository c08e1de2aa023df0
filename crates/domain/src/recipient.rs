//! # 宛先（配信ジョブ）
//!
//! メッセージを 1 つの宛先へ届けるジョブ。宛先ごとのパラメータ、
//! 送信予定時刻、送信済みフラグを持つ。
//!
//! ## 状態
//!
//! ```text
//! 未送信 ──(送信成功)──→ 送信済み
//!   │
//!   └──(失敗回数が上限に到達)──→ デッドレター
//! ```
//!
//! 送信済み・デッドレターのどちらも終端状態で、以後の配信対象にならない。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{carrier::Network, message::MessageId, params::Params};

define_uuid_id! {
    /// 宛先 ID
    pub struct RecipientId;
}

/// 配信先（キャリアネットワーク + 購読者 ID）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub network:       Network,
    pub subscriber_id: String,
}

impl Destination {
    pub fn new(network: Network, subscriber_id: impl Into<String>) -> Self {
        Self {
            network,
            subscriber_id: subscriber_id.into(),
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.network, self.subscriber_id)
    }
}

/// 宛先エンティティ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    id: Option<RecipientId>,
    message_id: Option<MessageId>,
    destination: Destination,
    params: Params,
    scheduled_at: Option<DateTime<Utc>>,
    sent: bool,
    attempts: u32,
    dead_lettered: bool,
}

/// 新規宛先の作成パラメータ
pub struct NewRecipient {
    pub destination:  Destination,
    pub params:       Params,
    /// 未指定の場合、保存時に親メッセージの `send_on` を引き継ぐ
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// 宛先の DB 復元パラメータ
pub struct RecipientRecord {
    pub id: RecipientId,
    pub message_id: MessageId,
    pub destination: Destination,
    pub params: Params,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent: bool,
    pub attempts: u32,
    pub dead_lettered: bool,
}

impl Recipient {
    /// 未保存の宛先を作成する
    pub fn new(params: NewRecipient) -> Self {
        Self {
            id: None,
            message_id: None,
            destination: params.destination,
            params: params.params,
            scheduled_at: params.scheduled_at,
            sent: false,
            attempts: 0,
            dead_lettered: false,
        }
    }

    /// 既存のデータから復元する
    pub fn from_db(record: RecipientRecord) -> Self {
        Self {
            id: Some(record.id),
            message_id: Some(record.message_id),
            destination: record.destination,
            params: record.params,
            scheduled_at: record.scheduled_at,
            sent: record.sent,
            attempts: record.attempts,
            dead_lettered: record.dead_lettered,
        }
    }

    // Getter メソッド

    pub fn id(&self) -> Option<&RecipientId> {
        self.id.as_ref()
    }

    pub fn message_id(&self) -> Option<&MessageId> {
        self.message_id.as_ref()
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_dead_lettered(&self) -> bool {
        self.dead_lettered
    }

    // ビジネスロジックメソッド

    /// 一度でも永続化されたか
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// 送信予定が `now` より厳密に未来か
    pub fn is_scheduled_after(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_some_and(|at| at > now)
    }

    /// `now` の時点で配信対象か
    ///
    /// 未送信かつデッドレターでなく、送信予定が未設定または `now` 以前のもの。
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.sent && !self.dead_lettered && !self.is_scheduled_after(now)
    }

    /// 親メッセージに紐付ける
    ///
    /// 送信予定が未設定なら親メッセージの既定送信予定を引き継ぐ。
    pub fn attached_to(self, message_id: MessageId, default_send_on: Option<DateTime<Utc>>) -> Self {
        Self {
            message_id: Some(message_id),
            scheduled_at: self.scheduled_at.or(default_send_on),
            ..self
        }
    }

    /// 採番された ID を設定する
    pub fn persisted(self, id: RecipientId) -> Self {
        Self {
            id: Some(id),
            ..self
        }
    }

    /// 送信済みにする
    pub fn marked_sent(self) -> Self {
        Self { sent: true, ..self }
    }

    /// 失敗した試行を記録する
    ///
    /// `max_attempts` が指定されていて失敗回数がそれに達した場合はデッドレターにする。
    /// 未指定なら無期限に再試行する。
    pub fn failed_attempt(self, max_attempts: Option<u32>) -> Self {
        let attempts = self.attempts.saturating_add(1);
        let dead_lettered = max_attempts.is_some_and(|max| attempts >= max);
        Self {
            attempts,
            dead_lettered,
            ..self
        }
    }
}
