//! # 受信記録サービス
//!
//! ゲートウェイ経由で届いた返信を、送信元の宛先（ネットワークと加入者）に
//! 正規化して受信メッセージとして保存する。

use std::sync::Arc;

use smsrelay_domain::{
    carrier::CarrierGatewayTable,
    clock::Clock,
    message::{Message, NewInboundMessage},
    recipient::Destination,
};
use smsrelay_infra::repository::MessageRepository;
use smsrelay_shared::{
    event_log::event::{action, category, entity_type, result},
    log_business_event,
};

use crate::error::DeliveryError;

pub struct InboundMessageService {
    repository: Arc<dyn MessageRepository>,
    gateways:   Arc<CarrierGatewayTable>,
    clock:      Arc<dyn Clock>,
}

impl InboundMessageService {
    pub fn new(
        repository: Arc<dyn MessageRepository>,
        gateways: Arc<CarrierGatewayTable>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            gateways,
            clock,
        }
    }

    /// 送信元アドレスを宛先に正規化する
    ///
    /// ゲートウェイのドメインでなければ、汎用ネットワークでアドレス全体を加入者とする。
    ///
    /// # Errors
    ///
    /// - `local@domain` の形でない: `DeliveryError::Validation`
    /// - 汎用ネットワークが定義されていない: `DeliveryError::Undeliverable`
    pub fn resolve_sender(&self, from_address: &str) -> Result<Destination, DeliveryError> {
        let address = from_address.trim();
        let Some((local, domain)) = address.rsplit_once('@') else {
            return Err(DeliveryError::Validation(format!(
                "送信元アドレスの形式が不正です: {address}"
            )));
        };
        if local.is_empty() || domain.is_empty() {
            return Err(DeliveryError::Validation(format!(
                "送信元アドレスの形式が不正です: {address}"
            )));
        }

        if let Some(network) = self.gateways.address_domain_to_network(domain) {
            return Ok(Destination::new(network.clone(), local));
        }
        match self.gateways.generic_network() {
            Some(network) => Ok(Destination::new(network.clone(), address)),
            None => Err(DeliveryError::Undeliverable {
                network: domain.to_lowercase(),
            }),
        }
    }

    /// 受信した返信を記録する
    #[tracing::instrument(skip_all, fields(from = %from_address))]
    pub async fn record(&self, from_address: &str, body: &str) -> Result<Message, DeliveryError> {
        let origin = self.resolve_sender(from_address)?;
        let message = Message::inbound(NewInboundMessage {
            origin,
            body: body.to_string(),
            now: self.clock.now(),
        });
        message.ensure_persistable()?;

        let id = self.repository.save_message(&message).await?;
        let message = message.persisted(id);

        log_business_event!(
            event.category = category::DELIVERY,
            event.action = action::INBOUND_RECORDED,
            event.entity_type = entity_type::MESSAGE,
            event.entity_id = %message.id().map(ToString::to_string).unwrap_or_default(),
            event.result = result::SUCCESS,
            message.slug = %message.slug(),
            "返信を記録しました"
        );

        Ok(message)
    }

    /// 宛先とのやり取り（送信と受信）を作成日時順に返す
    pub async fn thread(&self, destination: &Destination) -> Result<Vec<Message>, DeliveryError> {
        Ok(self.repository.find_thread(destination).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use smsrelay_domain::{
        carrier::Network,
        clock::FixedClock,
        message::{Direction, NewMessage},
        params::Params,
        recipient::{NewRecipient, Recipient},
    };
    use smsrelay_infra::mock::MockMessageRepository;

    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn sut_with(
        repository: &MockMessageRepository,
        gateways: CarrierGatewayTable,
    ) -> InboundMessageService {
        InboundMessageService::new(
            Arc::new(repository.clone()),
            Arc::new(gateways),
            Arc::new(FixedClock::new(now())),
        )
    }

    fn gateways_with_generic() -> CarrierGatewayTable {
        CarrierGatewayTable::parse("att={}@txt.att.net;email={}").unwrap()
    }

    #[rstest]
    #[case::ゲートウェイのドメイン("5551234567@txt.att.net", "att", "5551234567")]
    #[case::ドメインの大文字小文字は区別しない("5551234567@TXT.ATT.NET", "att", "5551234567")]
    #[case::未知のドメインは汎用ネットワーク("bob@example.com", "email", "bob@example.com")]
    fn test_送信元アドレスの正規化(
        #[case] from: &str,
        #[case] network: &str,
        #[case] subscriber: &str,
    ) {
        let sut = sut_with(&MockMessageRepository::new(), gateways_with_generic());

        let destination = sut.resolve_sender(from).unwrap();

        assert_eq!(
            destination,
            Destination::new(Network::new(network).unwrap(), subscriber)
        );
    }

    #[rstest]
    #[case::アットマークなし("5551234567")]
    #[case::ローカル部なし("@txt.att.net")]
    #[case::ドメインなし("5551234567@")]
    fn test_不正な送信元アドレスはバリデーションエラー(#[case] from: &str) {
        let sut = sut_with(&MockMessageRepository::new(), gateways_with_generic());

        let result = sut.resolve_sender(from);

        assert!(matches!(result, Err(DeliveryError::Validation(_))));
    }

    #[test]
    fn test_汎用ネットワークがなければ未知のドメインは配信不能() {
        let gateways = CarrierGatewayTable::parse("att={}@txt.att.net").unwrap();
        let sut = sut_with(&MockMessageRepository::new(), gateways);

        let result = sut.resolve_sender("bob@example.com");

        assert!(matches!(
            result,
            Err(DeliveryError::Undeliverable { network }) if network == "example.com"
        ));
    }

    #[tokio::test]
    async fn 返信は送信元を持つ受信メッセージとして保存される() {
        let repository = MockMessageRepository::new();
        let sut = sut_with(&repository, gateways_with_generic());

        let message = sut.record("5551234567@txt.att.net", "STOP").await.unwrap();

        assert!(message.id().is_some());
        assert_eq!(message.direction(), Direction::Incoming);
        assert_eq!(
            message.slug(),
            format!("inbound_att_5551234567_{}", now().timestamp_micros())
        );
        assert_eq!(repository.messages().len(), 1);
    }

    #[tokio::test]
    async fn 本文が空の返信は保存しない() {
        let repository = MockMessageRepository::new();
        let sut = sut_with(&repository, gateways_with_generic());

        let result = sut.record("5551234567@txt.att.net", " ").await;

        assert!(matches!(result, Err(DeliveryError::Validation(_))));
        assert!(repository.messages().is_empty());
    }

    #[tokio::test]
    async fn やり取りには送信と受信の両方が含まれる() {
        let repository = MockMessageRepository::new();
        let sut = sut_with(&repository, gateways_with_generic());
        let destination = Destination::new(Network::new("att").unwrap(), "5551234567");
        let outgoing = Message::new(NewMessage {
            slug:    "welcome".to_string(),
            body:    "Hi".to_string(),
            send_on: None,
            now:     now() - chrono::Duration::minutes(5),
        });
        let id = repository.save_message(&outgoing).await.unwrap();
        let recipient = Recipient::new(NewRecipient {
            destination:  destination.clone(),
            params:       Params::new(),
            scheduled_at: None,
        })
        .attached_to(id, None);
        repository.save_recipient(&recipient).await.unwrap();

        sut.record("5551234567@txt.att.net", "Thanks").await.unwrap();
        sut.record("5559999999@txt.att.net", "Other").await.unwrap();
        let thread = sut.thread(&destination).await.unwrap();

        let bodies: Vec<&str> = thread.iter().map(Message::body).collect();
        assert_eq!(bodies, vec!["Hi", "Thanks"]);
    }
}
