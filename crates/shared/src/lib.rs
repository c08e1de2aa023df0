//! # SMS Relay 共有ユーティリティ
//!
//! 複数クレートで共通利用するログ・トレーシング関連のヘルパー。
//!
//! - [`observability`]: トレーシング初期化とログ出力形式（`observability` feature）
//! - [`event_log`]: ビジネスイベントログのマクロとフィールド定数

pub mod event_log;
pub mod observability;

pub use observability::{LogFormat, TracingConfig};
