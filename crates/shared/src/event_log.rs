//! # ビジネスイベントログ
//!
//! 配信の結果を `jq` で追跡できるよう、ログフィールドの命名規約と
//! ヘルパーマクロを提供する。
//!
//! [`log_business_event!`] で出力したログには `event.kind = "business_event"` が
//! 自動付与され、`jq 'select(.["event.kind"] == "business_event")'` でフィルタできる。
//!
//! フィールド名はドット記法（`event.category`、`event.action`）を使う。

/// ビジネスイベントを構造化ログとして出力する。
///
/// ## 必須フィールド（慣例）
///
/// - `event.category`: [`event::category`] の定数
/// - `event.action`: [`event::action`] の定数
/// - `event.result`: [`event::result`] の定数
///
/// ## 推奨フィールド
///
/// - `event.entity_type`: [`event::entity_type`] の定数
/// - `event.entity_id`: エンティティ ID
#[macro_export]
macro_rules! log_business_event {
    ($($args:tt)*) => {
        ::tracing::info!(
            event.kind = "business_event",
            $($args)*
        )
    };
}

/// イベントフィールドの定数
pub mod event {
    /// イベントカテゴリ
    pub mod category {
        pub const DELIVERY: &str = "delivery";
        pub const SCHEDULER: &str = "scheduler";
    }

    /// イベントアクション
    pub mod action {
        // 配信
        pub const RECIPIENT_SENT: &str = "recipient.sent";
        pub const RECIPIENT_DEFERRED: &str = "recipient.deferred";
        pub const RECIPIENT_FAILED: &str = "recipient.failed";
        pub const RECIPIENT_DEAD_LETTERED: &str = "recipient.dead_lettered";

        // 受信
        pub const INBOUND_RECORDED: &str = "inbound.recorded";

        // スケジューラ
        pub const CYCLE_COMPLETED: &str = "scheduler.cycle_completed";
    }

    /// エンティティ種別
    pub mod entity_type {
        pub const MESSAGE: &str = "message";
        pub const RECIPIENT: &str = "recipient";
    }

    /// イベント結果
    pub mod result {
        pub const SUCCESS: &str = "success";
        pub const FAILURE: &str = "failure";
    }
}

/// エラーコンテキストフィールドの定数
pub mod error {
    /// エラーカテゴリ
    pub mod category {
        /// インフラストラクチャ（DB）
        pub const INFRASTRUCTURE: &str = "infrastructure";
        /// 外部サービス呼び出し（SMTP、SES）
        pub const EXTERNAL_SERVICE: &str = "external_service";
    }

    /// エラー種別
    pub mod kind {
        pub const DATABASE: &str = "database";
        pub const TRANSPORT: &str = "transport";
        pub const UNDELIVERABLE: &str = "undeliverable";
        pub const VALIDATION: &str = "validation";
    }
}
