//! # 宛先ディスパッチャー
//!
//! 1 件の宛先を配信する。
//!
//! ## 処理手順
//!
//! 1. 送信予定が現在時刻より厳密に未来なら保留する（未保存なら保存する）
//! 2. キャリアゲートウェイ表でアドレスを解決する。未知のネットワークは配信不能
//! 3. 本文を宛先のパラメータで置換する
//! 4. 件名なしで送信経路に渡す
//! 5. 送信経路が成功を返した場合だけ送信済みにして保存する
//!
//! 失敗した試行は回数を記録して保存する。上限が設定されていれば、
//! 上限に達した宛先はデッドレターになり配信対象から外れる。

use std::sync::Arc;

use smsrelay_domain::{
    carrier::CarrierGatewayTable,
    clock::Clock,
    delivery::OutboundEmail,
    message::Message,
    recipient::Recipient,
};
use smsrelay_infra::{repository::MessageRepository, transport::Transport};
use smsrelay_shared::{
    event_log::{
        error::category as error_category,
        event::{action, category, entity_type, result},
    },
    log_business_event,
};

use super::template_renderer::render;
use crate::error::DeliveryError;

/// 配信の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 送信して送信済みにした
    Sent,
    /// 送信予定が未来のため保留した
    Deferred,
}

/// 配信の失敗
#[derive(Debug)]
pub struct DispatchFailure {
    /// 失敗を記録した後の宛先（記録できなかった場合は記録前の状態）
    pub recipient: Recipient,
    pub error:     DeliveryError,
}

/// 宛先ディスパッチャー
pub struct RecipientDispatcher {
    repository:   Arc<dyn MessageRepository>,
    transport:    Arc<dyn Transport>,
    gateways:     Arc<CarrierGatewayTable>,
    clock:        Arc<dyn Clock>,
    max_attempts: Option<u32>,
}

impl RecipientDispatcher {
    pub fn new(
        repository: Arc<dyn MessageRepository>,
        transport: Arc<dyn Transport>,
        gateways: Arc<CarrierGatewayTable>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            transport,
            gateways,
            clock,
            max_attempts: None,
        }
    }

    /// デッドレターにするまでの失敗回数を設定する（`None` なら無期限に再試行）
    pub fn with_max_attempts(self, max_attempts: Option<u32>) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }

    /// 宛先を配信し、更新後の宛先と結果を返す
    ///
    /// 親メッセージは保存済みである必要がある。親メッセージに紐付いていない
    /// 宛先は、親の既定送信予定を引き継いで紐付けてから処理する。
    ///
    /// # Errors
    ///
    /// [`DispatchFailure`] に失敗を記録した後の宛先とエラーを返す。
    ///
    /// - 親メッセージが未保存: `DeliveryError::Validation`
    /// - ネットワークが未知: `DeliveryError::Undeliverable`
    /// - 送信経路の失敗: `DeliveryError::Transport`
    /// - 保留または送信済みの保存に失敗: `DeliveryError::Store`
    pub async fn dispatch(
        &self,
        message: &Message,
        recipient: Recipient,
    ) -> Result<(Recipient, DispatchOutcome), DispatchFailure> {
        let Some(message_id) = message.id() else {
            return Err(DispatchFailure {
                recipient,
                error: DeliveryError::Validation(
                    "保存されていないメッセージの宛先は配信できません".to_string(),
                ),
            });
        };
        let recipient = match recipient.message_id() {
            Some(_) => recipient,
            None => recipient.attached_to(message_id.clone(), message.send_on()),
        };

        let now = self.clock.now();
        if recipient.is_scheduled_after(now) {
            let recipient = if recipient.is_persisted() {
                recipient
            } else {
                self.persist(recipient).await?
            };
            log_business_event!(
                event.category = category::DELIVERY,
                event.action = action::RECIPIENT_DEFERRED,
                event.entity_type = entity_type::RECIPIENT,
                event.entity_id = %entity_id(&recipient),
                event.result = result::SUCCESS,
                scheduled_at = ?recipient.scheduled_at(),
                "送信予定が未来のため保留しました"
            );
            return Ok((recipient, DispatchOutcome::Deferred));
        }

        let destination = recipient.destination();
        let Some(address) = self
            .gateways
            .network_to_address(&destination.network, &destination.subscriber_id)
        else {
            let error = DeliveryError::Undeliverable {
                network: destination.network.to_string(),
            };
            return Err(self.record_failure(recipient, error).await);
        };

        let email = OutboundEmail::sms(address, render(message.body(), recipient.params()));
        if let Err(e) = self.transport.send(&email).await {
            return Err(self
                .record_failure(recipient, DeliveryError::Transport(e))
                .await);
        }

        let recipient = self.persist(recipient.marked_sent()).await?;
        log_business_event!(
            event.category = category::DELIVERY,
            event.action = action::RECIPIENT_SENT,
            event.entity_type = entity_type::RECIPIENT,
            event.entity_id = %entity_id(&recipient),
            event.result = result::SUCCESS,
            message.slug = %message.slug(),
            network = %recipient.destination().network,
            "宛先に送信しました"
        );

        Ok((recipient, DispatchOutcome::Sent))
    }

    async fn persist(&self, recipient: Recipient) -> Result<Recipient, DispatchFailure> {
        match self.repository.save_recipient(&recipient).await {
            Ok(id) => Ok(recipient.persisted(id)),
            Err(e) => Err(DispatchFailure {
                recipient,
                error: e.into(),
            }),
        }
    }

    /// 失敗した試行を記録して保存する
    ///
    /// 記録の保存に失敗しても、返すのは配信の失敗のほう。
    /// 宛先は未送信のまま残るため、次回の周期で再試行される。
    async fn record_failure(&self, recipient: Recipient, error: DeliveryError) -> DispatchFailure {
        let recipient = recipient.failed_attempt(self.max_attempts);
        tracing::warn!(
            error.category = error_category::EXTERNAL_SERVICE,
            error.kind = error.kind(),
            recipient_id = %entity_id(&recipient),
            attempts = recipient.attempts(),
            "宛先への配信に失敗しました: {error}"
        );
        log_business_event!(
            event.category = category::DELIVERY,
            event.action = action::RECIPIENT_FAILED,
            event.entity_type = entity_type::RECIPIENT,
            event.entity_id = %entity_id(&recipient),
            event.result = result::FAILURE,
            "宛先への配信に失敗しました"
        );

        let recipient = match self.persist(recipient).await {
            Ok(recipient) => recipient,
            Err(DispatchFailure {
                recipient,
                error: store_error,
            }) => {
                tracing::error!(
                    error.category = error_category::INFRASTRUCTURE,
                    error.kind = store_error.kind(),
                    recipient_id = %entity_id(&recipient),
                    "失敗した試行を記録できませんでした: {store_error}"
                );
                return DispatchFailure { recipient, error };
            }
        };

        if recipient.is_dead_lettered() {
            log_business_event!(
                event.category = category::DELIVERY,
                event.action = action::RECIPIENT_DEAD_LETTERED,
                event.entity_type = entity_type::RECIPIENT,
                event.entity_id = %entity_id(&recipient),
                event.result = result::FAILURE,
                attempts = recipient.attempts(),
                "失敗回数が上限に達したためデッドレターにしました"
            );
        }

        DispatchFailure { recipient, error }
    }
}

fn entity_id(recipient: &Recipient) -> String {
    recipient.id().map(ToString::to_string).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use smsrelay_domain::{
        carrier::Network,
        clock::FixedClock,
        message::NewMessage,
        params::Params,
        recipient::{Destination, NewRecipient},
    };
    use smsrelay_infra::mock::{MockMessageRepository, MockTransport};

    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    struct Fixture {
        repository: MockMessageRepository,
        transport:  MockTransport,
        sut:        RecipientDispatcher,
    }

    fn fixture(max_attempts: Option<u32>) -> Fixture {
        let repository = MockMessageRepository::new();
        let transport = MockTransport::new();
        let sut = RecipientDispatcher::new(
            Arc::new(repository.clone()),
            Arc::new(transport.clone()),
            Arc::new(CarrierGatewayTable::default_table()),
            Arc::new(FixedClock::new(now())),
        )
        .with_max_attempts(max_attempts);
        Fixture {
            repository,
            transport,
            sut,
        }
    }

    async fn saved_message(repository: &MockMessageRepository, body: &str) -> Message {
        let message = Message::new(NewMessage {
            slug: "welcome".to_string(),
            body: body.to_string(),
            send_on: None,
            now: now(),
        });
        let id = repository.save_message(&message).await.unwrap();
        message.persisted(id)
    }

    fn recipient(network: &str, scheduled_at: Option<DateTime<Utc>>) -> Recipient {
        Recipient::new(NewRecipient {
            destination: Destination::new(Network::new(network).unwrap(), "5551234567"),
            params: Params::new().with("NAME", "Alice"),
            scheduled_at,
        })
    }

    #[tokio::test]
    async fn 送信成功時に本文を置換して送信済みとして保存する() {
        let f = fixture(None);
        let message = saved_message(&f.repository, "Hi [[name]]").await;

        let (recipient, outcome) = f
            .sut
            .dispatch(&message, recipient("verizon", None))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Sent);
        assert!(recipient.is_sent());
        assert_eq!(
            f.transport.sent(),
            vec![OutboundEmail::sms("5551234567@vtext.com", "Hi Alice")]
        );
        let stored = f.repository.recipients();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].is_sent());
    }

    #[rstest]
    #[case::ちょうど現在は送信する(0, DispatchOutcome::Sent)]
    #[case::過去は送信する(-1, DispatchOutcome::Sent)]
    #[case::一秒後は保留する(1, DispatchOutcome::Deferred)]
    #[tokio::test]
    async fn 送信予定の境界(#[case] offset_secs: i64, #[case] expected: DispatchOutcome) {
        let f = fixture(None);
        let message = saved_message(&f.repository, "Hi").await;
        let at = now() + Duration::seconds(offset_secs);

        let (_, outcome) = f
            .sut
            .dispatch(&message, recipient("att", Some(at)))
            .await
            .unwrap();

        assert_eq!(outcome, expected);
        assert_eq!(
            f.transport.sent().len(),
            usize::from(expected == DispatchOutcome::Sent)
        );
    }

    #[tokio::test]
    async fn 保留した未保存の宛先は未送信のまま保存される() {
        let f = fixture(None);
        let message = saved_message(&f.repository, "Hi").await;

        let (recipient, _) = f
            .sut
            .dispatch(&message, recipient("att", Some(now() + Duration::hours(1))))
            .await
            .unwrap();

        assert!(recipient.is_persisted());
        let stored = f.repository.recipients();
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].is_sent());
        assert_eq!(stored[0].message_id(), message.id());
    }

    #[tokio::test]
    async fn 未紐付けの宛先は親メッセージの既定送信予定を引き継ぐ() {
        let f = fixture(None);
        let message = Message::new(NewMessage {
            slug: "later".to_string(),
            body: "Hi".to_string(),
            send_on: Some(now() + Duration::days(1)),
            now: now(),
        });
        let id = f.repository.save_message(&message).await.unwrap();
        let message = message.persisted(id);

        let (recipient, outcome) = f
            .sut
            .dispatch(&message, recipient("att", None))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Deferred);
        assert_eq!(recipient.scheduled_at(), Some(now() + Duration::days(1)));
    }

    #[tokio::test]
    async fn 未知のネットワークは配信不能で未送信のまま残る() {
        let f = fixture(None);
        let message = saved_message(&f.repository, "Hi").await;

        let failure = f
            .sut
            .dispatch(&message, recipient("unknown", None))
            .await
            .unwrap_err();

        assert!(matches!(
            failure.error,
            DeliveryError::Undeliverable { ref network } if network == "unknown"
        ));
        assert!(f.transport.sent().is_empty());
        let stored = f.repository.recipients();
        assert!(!stored[0].is_sent());
        assert_eq!(stored[0].attempts(), 1);
        assert_eq!(failure.recipient, stored[0]);
    }

    #[tokio::test]
    async fn 送信経路の失敗は未送信のまま次回の配信対象に残る() {
        let f = fixture(None);
        f.transport.fail_for("5551234567@txt.att.net");
        let message = saved_message(&f.repository, "Hi").await;

        let failure = f
            .sut
            .dispatch(&message, recipient("att", None))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, DeliveryError::Transport(_)));
        let due = f.repository.find_due_recipients(now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert!(!due[0].1.is_sent());
    }

    #[tokio::test]
    async fn 失敗回数が上限に達するとデッドレターになり配信対象から外れる() {
        let f = fixture(Some(2));
        f.transport.fail_for("5551234567@txt.att.net");
        let message = saved_message(&f.repository, "Hi").await;
        f.sut
            .dispatch(&message, recipient("att", None))
            .await
            .unwrap_err();
        let (_, retry) = f
            .repository
            .find_due_recipients(now())
            .await
            .unwrap()
            .remove(0);

        f.sut.dispatch(&message, retry).await.unwrap_err();

        let stored = f.repository.recipients();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].is_dead_lettered());
        assert!(f.repository.find_due_recipients(now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn 送信後の保存に失敗するとストアエラーを返す() {
        let f = fixture(None);
        let message = saved_message(&f.repository, "Hi").await;
        f.repository.fail_recipient_saves(true);

        let failure = f
            .sut
            .dispatch(&message, recipient("att", None))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, DeliveryError::Store(_)));
        assert_eq!(f.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn 失敗した試行を記録できなくても配信の失敗を返す() {
        let f = fixture(None);
        f.transport.fail_for("5551234567@txt.att.net");
        let message = saved_message(&f.repository, "Hi").await;
        f.repository.fail_recipient_saves(true);

        let failure = f
            .sut
            .dispatch(&message, recipient("att", None))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, DeliveryError::Transport(_)));
        assert_eq!(failure.recipient.attempts(), 1);
        assert!(!failure.recipient.is_persisted());
        assert!(f.repository.recipients().is_empty());
    }

    #[tokio::test]
    async fn 未保存のメッセージの宛先はバリデーションエラー() {
        let f = fixture(None);
        let message = Message::new(NewMessage {
            slug: "welcome".to_string(),
            body: "Hi".to_string(),
            send_on: None,
            now: now(),
        });

        let result = f.sut.dispatch(&message, recipient("att", None)).await;

        assert!(matches!(
            result,
            Err(DispatchFailure {
                error: DeliveryError::Validation(_),
                ..
            })
        ));
    }
}
