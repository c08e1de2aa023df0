//! # SMS Relay インフラ層
//!
//! 外部システムとの接続を担当する。
//!
//! ## モジュール構成
//!
//! - [`db`]: PostgreSQL 接続プールとマイグレーション
//! - [`repository`]: メッセージストア（[`repository::MessageRepository`]）
//! - [`transport`]: 送信経路（SMTP / SES / Noop）と送信キュー
//! - [`error`]: インフラ層エラー
//! - `mock`: テスト用インメモリ実装（`test-utils` feature）

pub mod db;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod repository;
pub mod transport;

pub use error::{InfraError, InfraErrorKind};
