//! # 送信メールと送信エラー
//!
//! 配信ジョブをゲートウェイへ渡すときの値オブジェクトと、
//! 送信経路（トランスポート）が返すエラーを定義する。

use std::time::Duration;

use thiserror::Error;

/// ゲートウェイ宛てに送信するメール
///
/// 件名は常に空文字列で送る（SMS では件名が本文の先頭に表示されるため）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to:      String,
    pub subject: String,
    pub body:    String,
}

impl OutboundEmail {
    /// 件名なしのメールを作成する
    pub fn sms(to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to:      to.into(),
            subject: String::new(),
            body:    body.into(),
        }
    }

    /// 宛先と本文が揃っているか
    pub fn is_complete(&self) -> bool {
        !self.to.trim().is_empty() && !self.body.is_empty()
    }
}

/// 送信経路で発生するエラー
///
/// いずれも次回のスケジューラ周期で再試行可能な失敗として扱う。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// 宛先または本文が空のメール
    #[error("メールの宛先または本文が空です: to={0:?}")]
    Incomplete(String),

    /// 送信経路が送信に失敗した
    #[error("送信に失敗しました: {0}")]
    SendFailed(String),

    /// 送信がタイムアウトした
    #[error("送信がタイムアウトしました（{0:?}）")]
    Timeout(Duration),

    /// 送信キューが満杯
    #[error("送信キューが満杯です")]
    QueueFull,

    /// 送信キューが停止済み
    #[error("送信キューは停止しています")]
    QueueClosed,
}
