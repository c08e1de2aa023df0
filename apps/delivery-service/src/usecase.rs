//! # ユースケース層
//!
//! - [`template_renderer`]: 本文のプレースホルダ置換
//! - [`dispatcher`]: 1 件の宛先の配信（保留・送信・失敗の記録）
//! - [`send`]: メッセージの保存と全宛先への送信
//! - [`scheduler`]: 配信予定を迎えた宛先の定期配信
//! - [`inbound`]: 受信した返信の記録と宛先ごとのやり取り

pub mod dispatcher;
pub mod inbound;
pub mod scheduler;
pub mod send;
pub mod template_renderer;

pub use dispatcher::{DispatchFailure, DispatchOutcome, RecipientDispatcher};
pub use inbound::InboundMessageService;
pub use scheduler::{CycleReport, DueMessageScheduler, SchedulerState};
pub use send::{MessageSendService, SendReport};
pub use template_renderer::render;
