//! テスト共通フィクスチャ
//!
//! DB を使用する統合テストで共通利用するエンティティ生成ヘルパー。

// 各テストファイルが独立したクレートとしてコンパイルされるため、
// 使用しない関数に dead_code 警告が出る。モジュール全体で抑制する。
#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use smsrelay_domain::{
    carrier::Network,
    message::{Message, NewMessage},
    params::Params,
    recipient::{Destination, NewRecipient, Recipient},
};

/// テスト用の基準時刻
pub fn test_now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// 未保存のメッセージを作成する
pub fn new_message(slug: &str, body: &str) -> Message {
    Message::new(NewMessage {
        slug:    slug.to_string(),
        body:    body.to_string(),
        send_on: None,
        now:     test_now(),
    })
}

pub fn destination(network: &str, subscriber: &str) -> Destination {
    Destination::new(Network::new(network).unwrap(), subscriber)
}

/// 保存済みメッセージに紐付いた未保存の宛先を作成する
pub fn attached_recipient(
    message: &Message,
    destination: Destination,
    offset_secs: Option<i64>,
) -> Recipient {
    Recipient::new(NewRecipient {
        destination,
        params: Params::new().with("NAME", "Alice"),
        scheduled_at: offset_secs.map(|s| test_now() + Duration::seconds(s)),
    })
    .attached_to(message.id().cloned().unwrap(), None)
}
