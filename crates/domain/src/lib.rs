//! # SMS Relay ドメイン層
//!
//! SMS リレーのビジネスルールを表現するドメインモデルを提供する。
//!
//! ## 設計方針
//!
//! - **I/O を持たない**: 永続化・送信はインフラ層のトレイト実装に委ねる
//! - **不変な状態遷移**: エンティティの更新は `self` を消費して新しい値を返す
//! - **時刻の注入**: 現在時刻は [`clock::Clock`] 経由で受け取る
//!
//! ## モジュール構成
//!
//! - [`message`]: メッセージ（作成されたテキストとその既定送信予定）
//! - [`recipient`]: 宛先ごとの配信ジョブ（パラメータ、送信予定、送信済みフラグ）
//! - [`params`]: テンプレートパラメータとその永続化形式
//! - [`carrier`]: キャリアネットワークとメール→SMS ゲートウェイの対応表
//! - [`delivery`]: 送信するメールと送信エラー
//! - [`clock`]: 時刻プロバイダ
//! - [`error`]: ドメインエラー

#[macro_use]
mod macros;

pub mod carrier;
pub mod clock;
pub mod delivery;
pub mod error;
pub mod message;
pub mod params;
pub mod recipient;

pub use error::DomainError;
