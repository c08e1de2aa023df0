//! # リポジトリ
//!
//! メッセージと宛先の永続化を担当する。
//!
//! - **トレイトで抽象化**: ユースケース層は [`MessageRepository`] だけに依存する
//! - **PostgreSQL 実装**: sqlx の実行時クエリ（`query_as` + `FromRow`）
//! - **テスト**: `mock::MockMessageRepository`（`test-utils` feature）

pub mod message_repository;

pub use message_repository::{MessageRepository, PostgresMessageRepository};
