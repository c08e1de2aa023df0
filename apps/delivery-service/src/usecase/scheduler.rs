//! # 配信スケジューラ
//!
//! 一定間隔でストアから配信対象の宛先（未送信かつ送信予定が現在時刻以前）を取得し、
//! [`RecipientDispatcher`] で配信する。
//!
//! 配信周期は重ならない。周期の実行中に次の周期を要求した場合は、実行中の周期が
//! 終わるまで待ってから実行する。1 件の失敗は記録して周期を続ける。
//!
//! 状態は [`SchedulerState`] として `watch` チャネルで公開する。

use std::{sync::Arc, time::Duration};

use smsrelay_domain::clock::Clock;
use smsrelay_infra::repository::MessageRepository;
use smsrelay_shared::{
    event_log::{
        error::category as error_category,
        event::{action, category, result},
    },
    log_business_event,
};
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::dispatcher::{DispatchFailure, DispatchOutcome, RecipientDispatcher};
use crate::error::DeliveryError;

/// スケジューラの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    /// 配信対象を取得している
    Polling,
    /// 取得した宛先を配信している
    Dispatching,
}

/// 1 回の配信周期の結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// 取得した配信対象の数
    pub due:      usize,
    pub sent:     usize,
    pub deferred: usize,
    pub failed:   usize,
}

/// 配信スケジューラ
pub struct DueMessageScheduler {
    repository: Arc<dyn MessageRepository>,
    dispatcher: Arc<RecipientDispatcher>,
    clock:      Arc<dyn Clock>,
    interval:   Duration,
    cycle_lock: Mutex<()>,
    state:      watch::Sender<SchedulerState>,
}

impl DueMessageScheduler {
    pub fn new(
        repository: Arc<dyn MessageRepository>,
        dispatcher: Arc<RecipientDispatcher>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            repository,
            dispatcher,
            clock,
            interval,
            cycle_lock: Mutex::new(()),
            state,
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// 状態の変化を購読する
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// 配信周期を 1 回実行する
    ///
    /// # Errors
    ///
    /// 配信対象の取得に失敗した場合は `DeliveryError::Store`。
    /// 宛先ごとの失敗はエラーにせず [`CycleReport::failed`] に数える。
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn run_cycle(&self) -> Result<CycleReport, DeliveryError> {
        let _cycle = self.cycle_lock.lock().await;

        self.state.send_replace(SchedulerState::Polling);
        let due = match self.repository.find_due_recipients(self.clock.now()).await {
            Ok(due) => due,
            Err(e) => {
                self.state.send_replace(SchedulerState::Idle);
                return Err(e.into());
            }
        };

        self.state.send_replace(SchedulerState::Dispatching);
        let mut report = CycleReport {
            due: due.len(),
            ..CycleReport::default()
        };
        for (message, recipient) in due {
            match self.dispatcher.dispatch(&message, recipient).await {
                Ok((_, DispatchOutcome::Sent)) => report.sent += 1,
                Ok((_, DispatchOutcome::Deferred)) => report.deferred += 1,
                Err(DispatchFailure { error, .. }) => {
                    report.failed += 1;
                    tracing::warn!(
                        error.kind = error.kind(),
                        retryable = error.is_retryable(),
                        message.slug = %message.slug(),
                        "配信周期中の宛先の配信に失敗しました: {error}"
                    );
                }
            }
        }
        self.state.send_replace(SchedulerState::Idle);

        let outcome = if report.failed == 0 {
            result::SUCCESS
        } else {
            result::FAILURE
        };
        log_business_event!(
            event.category = category::SCHEDULER,
            event.action = action::CYCLE_COMPLETED,
            event.result = outcome,
            due = report.due,
            sent = report.sent,
            deferred = report.deferred,
            failed = report.failed,
            "配信周期が完了しました"
        );

        Ok(report)
    }

    /// `cancel` されるまで配信周期を繰り返す
    ///
    /// 実行中の周期は最後まで実行してから停止する。
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "配信スケジューラを開始しました"
        );

        while !cancel.is_cancelled() {
            if let Err(e) = self.run_cycle().await {
                tracing::error!(
                    error.category = error_category::INFRASTRUCTURE,
                    error.kind = e.kind(),
                    "配信対象の取得に失敗しました: {e}"
                );
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!("配信スケジューラを停止しました");
    }

    /// 呼び出し元のスパンを引き継いでタスクを起動する
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel).in_current_span())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;
    use smsrelay_domain::{
        carrier::{CarrierGatewayTable, Network},
        clock::ManualClock,
        message::{Message, NewMessage},
        params::Params,
        recipient::{Destination, NewRecipient, Recipient},
    };
    use smsrelay_infra::mock::{MockMessageRepository, MockTransport};

    use super::*;

    const INTERVAL: Duration = Duration::from_secs(30);

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    struct Fixture {
        repository: MockMessageRepository,
        transport:  MockTransport,
        clock:      Arc<ManualClock>,
        sut:        Arc<DueMessageScheduler>,
    }

    fn fixture() -> Fixture {
        let repository = MockMessageRepository::new();
        let transport = MockTransport::new();
        let clock = Arc::new(ManualClock::new(now()));
        let dispatcher = Arc::new(RecipientDispatcher::new(
            Arc::new(repository.clone()),
            Arc::new(transport.clone()),
            Arc::new(CarrierGatewayTable::default_table()),
            clock.clone(),
        ));
        let sut = Arc::new(DueMessageScheduler::new(
            Arc::new(repository.clone()),
            dispatcher,
            clock.clone(),
            INTERVAL,
        ));
        Fixture {
            repository,
            transport,
            clock,
            sut,
        }
    }

    /// メッセージと宛先をストアに直接保存する
    async fn seed(
        repository: &MockMessageRepository,
        slug: &str,
        destinations: &[(&str, Option<i64>)],
    ) -> Message {
        let message = Message::new(NewMessage {
            slug:    slug.to_string(),
            body:    "Hi".to_string(),
            send_on: None,
            now:     now(),
        });
        let id = repository.save_message(&message).await.unwrap();
        for (network, offset_secs) in destinations {
            let recipient = Recipient::new(NewRecipient {
                destination:  Destination::new(Network::new(*network).unwrap(), "5551234567"),
                params:       Params::new(),
                scheduled_at: offset_secs.map(|s| now() + chrono::Duration::seconds(s)),
            })
            .attached_to(id.clone(), None);
            repository.save_recipient(&recipient).await.unwrap();
        }
        message.persisted(id)
    }

    #[tokio::test]
    async fn 配信対象の宛先だけを送信する() {
        let f = fixture();
        seed(&f.repository, "a", &[("att", None), ("verizon", Some(0))]).await;
        seed(&f.repository, "b", &[("tmobile", Some(-60)), ("sprint", Some(60))]).await;

        let report = f.sut.run_cycle().await.unwrap();

        assert_eq!(
            report,
            CycleReport {
                due:      3,
                sent:     3,
                deferred: 0,
                failed:   0,
            }
        );
        assert_eq!(f.transport.sent().len(), 3);
        assert_eq!(f.sut.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn 宛先の失敗は周期を止めずに数えられる() {
        let f = fixture();
        seed(&f.repository, "a", &[("att", None), ("unknown", None), ("verizon", None)]).await;
        f.transport.fail_for("5551234567@vtext.com");

        let report = f.sut.run_cycle().await.unwrap();

        assert_eq!(report.due, 3);
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(f.sut.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn 失敗した宛先は次の周期で再試行される() {
        let f = fixture();
        seed(&f.repository, "a", &[("verizon", None)]).await;
        f.transport.fail_for("5551234567@vtext.com");
        let first = f.sut.run_cycle().await.unwrap();

        f.transport.recover("5551234567@vtext.com");
        let second = f.sut.run_cycle().await.unwrap();
        let third = f.sut.run_cycle().await.unwrap();

        assert_eq!(first.failed, 1);
        assert_eq!(second.sent, 1);
        assert_eq!(third.due, 0);
        assert_eq!(f.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn 時刻が送信予定に達すると配信対象になる() {
        let f = fixture();
        seed(&f.repository, "later", &[("att", Some(3600))]).await;

        let before = f.sut.run_cycle().await.unwrap();
        f.clock.advance(chrono::Duration::seconds(3600));
        let after = f.sut.run_cycle().await.unwrap();

        assert_eq!(before.due, 0);
        assert_eq!(after.sent, 1);
    }

    #[tokio::test]
    async fn 同時に要求された周期は重ならず二重送信しない() {
        let f = fixture();
        seed(&f.repository, "a", &[("att", None)]).await;

        let (first, second) = tokio::join!(f.sut.run_cycle(), f.sut.run_cycle());

        assert_eq!(first.unwrap().sent + second.unwrap().sent, 1);
        assert_eq!(f.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn 周期の状態遷移を購読できる() {
        let f = fixture();
        let mut states = f.sut.subscribe();

        f.sut.run_cycle().await.unwrap();

        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), SchedulerState::Idle);
        assert_eq!(SchedulerState::Dispatching.to_string(), "dispatching");
    }

    #[tokio::test(start_paused = true)]
    async fn 間隔ごとに周期を実行しキャンセルで停止する() {
        let f = fixture();
        let cancel = CancellationToken::new();
        let handle = f.sut.clone().spawn(cancel.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;

        seed(&f.repository, "a", &[("att", None)]).await;
        assert!(f.transport.sent().is_empty());
        tokio::time::sleep(INTERVAL).await;
        assert_eq!(f.transport.sent().len(), 1);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(f.sut.state(), SchedulerState::Idle);
    }
}
