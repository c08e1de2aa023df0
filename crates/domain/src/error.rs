//! # ドメイン層エラー定義
//!
//! ビジネスルール違反やドメイン固有の例外状態を表現するエラー型。
//!
//! ## エラーの種類
//!
//! | エラー種別 | 用途 |
//! |-----------|------|
//! | `Validation` | 入力値の検証失敗（本文・スラッグ未入力、ゲートウェイ定義不正など） |
//! | `NotFound` | エンティティが存在しない |
//!
//! ## 使用例
//!
//! ```rust
//! use smsrelay_domain::DomainError;
//!
//! fn validate_slug(slug: &str) -> Result<(), DomainError> {
//!     if slug.is_empty() {
//!         return Err(DomainError::Validation("スラッグは必須です".to_string()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// ドメイン層で発生するエラー
#[derive(Debug, Error)]
pub enum DomainError {
    /// バリデーションエラー
    ///
    /// 入力値がビジネスルールに違反している場合に使用する。
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    /// エンティティが見つからない
    ///
    /// `entity_type` にはエンティティの種類（"Message", "Recipient" など）を指定する。
    #[error("{entity_type} が見つかりません: {id}")]
    NotFound {
        /// エンティティの種類
        entity_type: &'static str,
        /// 検索に使用した識別子
        id:          String,
    },
}
