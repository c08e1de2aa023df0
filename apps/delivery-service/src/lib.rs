//! # Delivery Service ライブラリ
//!
//! メッセージの保存・送信・定期配信のユースケースと設定を公開する。

pub mod config;
pub mod error;
pub mod usecase;
