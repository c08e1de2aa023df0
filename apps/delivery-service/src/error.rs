//! # 配信ユースケースのエラー
//!
//! ## 分類と扱い
//!
//! | エラー | 扱い |
//! |--------|------|
//! | `Validation` | 終端。呼び出し元の入力を直す必要がある |
//! | `NotFound` | 終端 |
//! | `Store` | ストア障害。次回のスケジューラ周期で再試行される |
//! | `Undeliverable` | 宛先単位で終端。未送信のまま残り、集計されて報告される |
//! | `Transport` | 再試行可能。次回のスケジューラ周期で再試行される |
//!
//! 宛先ごとの失敗は [`AggregateError`] に集約し、握りつぶさない。

use smsrelay_domain::{
    DomainError,
    delivery::TransportError,
    recipient::{Destination, RecipientId},
};
use smsrelay_infra::{InfraError, InfraErrorKind};
use thiserror::Error;

/// 配信ユースケースで発生するエラー
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    #[error("{entity_type} が見つかりません: {id}")]
    NotFound {
        entity_type: &'static str,
        id:          String,
    },

    #[error("ストアエラー: {0}")]
    Store(#[source] InfraError),

    /// キャリアゲートウェイ表に存在しないネットワーク
    #[error("配信できないネットワークです: {network}")]
    Undeliverable { network: String },

    #[error("送信エラー: {0}")]
    Transport(#[from] TransportError),
}

impl DeliveryError {
    /// 次回のスケジューラ周期で再試行する意味があるか
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Transport(_))
    }

    /// ログの `error.kind` に出力する種別
    pub fn kind(&self) -> &'static str {
        use smsrelay_shared::event_log::error::kind;

        match self {
            Self::Validation(_) | Self::NotFound { .. } => kind::VALIDATION,
            Self::Store(_) => kind::DATABASE,
            Self::Undeliverable { .. } => kind::UNDELIVERABLE,
            Self::Transport(_) => kind::TRANSPORT,
        }
    }
}

/// 入力エラーはバリデーションエラーとして扱い、それ以外はストアエラーとする
impl From<InfraError> for DeliveryError {
    fn from(err: InfraError) -> Self {
        let (kind, span_trace) = err.into_parts();
        match kind {
            InfraErrorKind::InvalidInput(msg) => Self::Validation(msg),
            InfraErrorKind::Conflict { entity, id } => {
                Self::Validation(format!("既に存在します: {entity}({id})"))
            }
            kind => Self::Store(InfraError::from_parts(kind, span_trace)),
        }
    }
}

impl From<DomainError> for DeliveryError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => Self::Validation(msg),
            DomainError::NotFound { entity_type, id } => Self::NotFound { entity_type, id },
        }
    }
}

/// 1 件の宛先の失敗
#[derive(Debug)]
pub struct RecipientFailure {
    /// 失敗した宛先の ID（メッセージ自体の保存に失敗した場合は `None`）
    pub recipient_id: Option<RecipientId>,
    pub destination:  Option<Destination>,
    pub error:        DeliveryError,
}

/// 送信で発生した失敗の集約
///
/// 成功した宛先の送信は取り消されない。
#[derive(Debug, Error)]
#[error("{} 件の失敗が発生しました", .failures.len())]
pub struct AggregateError {
    failures: Vec<RecipientFailure>,
}

impl AggregateError {
    pub fn new(failures: Vec<RecipientFailure>) -> Self {
        Self { failures }
    }

    /// 宛先に紐付かない単独の失敗（メッセージの保存失敗など）
    pub fn single(error: DeliveryError) -> Self {
        Self::new(vec![RecipientFailure {
            recipient_id: None,
            destination: None,
            error,
        }])
    }

    pub fn failures(&self) -> &[RecipientFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<RecipientFailure> {
        self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}
