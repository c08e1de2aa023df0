//! # メッセージ送信サービス
//!
//! メッセージ（テンプレート）の保存・読み込みと、全宛先への送信を担う。
//!
//! 送信は宛先ごとに [`RecipientDispatcher`] へ委ねる。1 件の失敗で残りの宛先の
//! 送信を止めることはなく、失敗はすべて [`AggregateError`] に集約して返す。

use std::sync::Arc;

use smsrelay_domain::{
    clock::Clock,
    message::{Message, MessageId, NewMessage},
};
use smsrelay_infra::repository::MessageRepository;

use super::dispatcher::{DispatchFailure, DispatchOutcome, RecipientDispatcher};
use crate::error::{AggregateError, DeliveryError, RecipientFailure};

/// 送信結果
#[derive(Debug)]
pub struct SendReport {
    /// 保存・送信後のメッセージ（宛先の状態は最新）
    pub message:  Message,
    pub sent:     usize,
    pub deferred: usize,
    /// 送信済みまたはデッドレターのため対象外とした宛先の数
    pub skipped:  usize,
}

/// メッセージ送信サービス
pub struct MessageSendService {
    repository: Arc<dyn MessageRepository>,
    dispatcher: Arc<RecipientDispatcher>,
    clock:      Arc<dyn Clock>,
}

impl MessageSendService {
    pub fn new(
        repository: Arc<dyn MessageRepository>,
        dispatcher: Arc<RecipientDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            dispatcher,
            clock,
        }
    }

    /// メッセージと宛先を保存する
    ///
    /// 送信予定が未設定の宛先は、メッセージの既定送信予定を引き継ぐ。
    #[tracing::instrument(skip_all, level = "debug", fields(slug = %message.slug()))]
    pub async fn save(&self, message: Message) -> Result<Message, DeliveryError> {
        message.ensure_persistable()?;

        let id = self.repository.save_message(&message).await?;
        let recipients = message.recipients().to_vec();
        let message = message.persisted(id.clone());

        let mut saved = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let recipient = recipient.attached_to(id.clone(), message.send_on());
            let recipient_id = self.repository.save_recipient(&recipient).await?;
            saved.push(recipient.persisted(recipient_id));
        }

        Ok(message.with_recipients(saved))
    }

    pub async fn load_by_id(&self, id: &MessageId) -> Result<Message, DeliveryError> {
        self.repository
            .find_message_by_id(id)
            .await?
            .ok_or_else(|| DeliveryError::NotFound {
                entity_type: "Message",
                id:          id.to_string(),
            })
    }

    /// スラッグでメッセージを読み込む（前後の空白と大文字小文字は区別しない）
    pub async fn load_by_slug(&self, slug: &str) -> Result<Message, DeliveryError> {
        let slug = slug.trim().to_lowercase();
        let found = self.repository.find_message_by_slug(&slug).await?;
        found.ok_or(DeliveryError::NotFound {
            entity_type: "Message",
            id:          slug,
        })
    }

    /// スラッグのメッセージがなければ作成する
    ///
    /// 既に存在する場合は本文を書き換えずにそのまま返す。
    pub async fn ensure_template(&self, slug: &str, body: &str) -> Result<Message, DeliveryError> {
        match self.load_by_slug(slug).await {
            Ok(existing) => Ok(existing),
            Err(DeliveryError::NotFound { .. }) => {
                self.save(Message::new(NewMessage {
                    slug:    slug.to_string(),
                    body:    body.to_string(),
                    send_on: None,
                    now:     self.clock.now(),
                }))
                .await
            }
            Err(e) => Err(e),
        }
    }

    /// 全宛先に送信する
    ///
    /// 未保存のメッセージは先に保存する。送信済みとデッドレターの宛先は対象外。
    ///
    /// # Errors
    ///
    /// 1 件以上の宛先が失敗した場合、すべての失敗を含む `AggregateError`。
    /// 成功した宛先の送信は取り消されない。
    #[tracing::instrument(skip_all, fields(slug = %message.slug()))]
    pub async fn send(&self, message: Message) -> Result<SendReport, AggregateError> {
        let message = if message.id().is_none() {
            self.save(message).await.map_err(AggregateError::single)?
        } else {
            message
        };

        let mut sent = 0;
        let mut deferred = 0;
        let mut skipped = 0;
        let mut failures = Vec::new();
        let mut updated = Vec::with_capacity(message.recipients().len());

        for recipient in message.recipients().to_vec() {
            if recipient.is_sent() || recipient.is_dead_lettered() {
                skipped += 1;
                updated.push(recipient);
                continue;
            }

            match self.dispatcher.dispatch(&message, recipient).await {
                Ok((recipient, DispatchOutcome::Sent)) => {
                    sent += 1;
                    updated.push(recipient);
                }
                Ok((recipient, DispatchOutcome::Deferred)) => {
                    deferred += 1;
                    updated.push(recipient);
                }
                Err(DispatchFailure { recipient, error }) => {
                    failures.push(RecipientFailure {
                        recipient_id: recipient.id().cloned(),
                        destination: Some(recipient.destination().clone()),
                        error,
                    });
                    updated.push(recipient);
                }
            }
        }

        if !failures.is_empty() {
            return Err(AggregateError::new(failures));
        }

        Ok(SendReport {
            message: message.with_recipients(updated),
            sent,
            deferred,
            skipped,
        })
    }
}
