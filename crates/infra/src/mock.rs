//! # テスト用モック
//!
//! ユースケーステストで使用するインメモリのメッセージストアと送信経路。
//! `test-utils` feature を有効にすることで、他クレートからも利用可能。
//!
//! ```toml
//! [dev-dependencies]
//! smsrelay-infra = { workspace = true, features = ["test-utils"] }
//! ```

use std::sync::{
   Arc,
   Mutex,
   atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use smsrelay_domain::{
   delivery::{OutboundEmail, TransportError},
   message::{Direction, Message, MessageId},
   recipient::{Destination, Recipient, RecipientId},
};

use crate::{error::InfraError, repository::MessageRepository, transport::Transport};

// ===== MockMessageRepository =====

#[derive(Clone, Default)]
pub struct MockMessageRepository {
   messages:             Arc<Mutex<Vec<Message>>>,
   recipients:           Arc<Mutex<Vec<Recipient>>>,
   fail_recipient_saves: Arc<AtomicBool>,
}

impl MockMessageRepository {
   pub fn new() -> Self {
      Self::default()
   }

   /// 保存済みの宛先（保存順）
   pub fn recipients(&self) -> Vec<Recipient> {
      self.recipients.lock().unwrap().clone()
   }

   /// 保存済みのメッセージ（宛先を含まない、保存順）
   pub fn messages(&self) -> Vec<Message> {
      self.messages.lock().unwrap().clone()
   }

   /// 以後の `save_recipient` をデータベースエラーにする
   pub fn fail_recipient_saves(&self, fail: bool) {
      self.fail_recipient_saves.store(fail, Ordering::SeqCst);
   }

   fn recipients_of(&self, id: &MessageId) -> Vec<Recipient> {
      self.recipients
         .lock()
         .unwrap()
         .iter()
         .filter(|r| r.message_id() == Some(id))
         .cloned()
         .collect()
   }
}

#[async_trait]
impl MessageRepository for MockMessageRepository {
   async fn save_message(&self, message: &Message) -> Result<MessageId, InfraError> {
      message
         .ensure_persistable()
         .map_err(|e| InfraError::invalid_input(e.to_string()))?;

      let id = message.id().cloned().unwrap_or_default();
      let mut messages = self.messages.lock().unwrap();

      if messages
         .iter()
         .any(|m| m.slug() == message.slug() && m.id() != Some(&id))
      {
         return Err(InfraError::conflict("messages", message.slug()));
      }

      let stored = message
         .clone()
         .persisted(id.clone())
         .with_recipients(Vec::new());
      match messages.iter_mut().find(|m| m.id() == Some(&id)) {
         Some(existing) => *existing = stored,
         None => messages.push(stored),
      }

      Ok(id)
   }

   async fn find_message_by_id(&self, id: &MessageId) -> Result<Option<Message>, InfraError> {
      let message = self
         .messages
         .lock()
         .unwrap()
         .iter()
         .find(|m| m.id() == Some(id))
         .cloned();
      Ok(message.map(|m| m.with_recipients(self.recipients_of(id))))
   }

   async fn find_message_by_slug(&self, slug: &str) -> Result<Option<Message>, InfraError> {
      let message = self
         .messages
         .lock()
         .unwrap()
         .iter()
         .find(|m| m.slug() == slug)
         .cloned();
      Ok(message.map(|m| {
         let recipients = m.id().map(|id| self.recipients_of(id)).unwrap_or_default();
         m.with_recipients(recipients)
      }))
   }

   async fn save_recipient(&self, recipient: &Recipient) -> Result<RecipientId, InfraError> {
      if self.fail_recipient_saves.load(Ordering::SeqCst) {
         return Err(sqlx::Error::PoolTimedOut.into());
      }
      let Some(message_id) = recipient.message_id() else {
         return Err(InfraError::invalid_input(
            "宛先がメッセージに紐付いていません",
         ));
      };
      if !self
         .messages
         .lock()
         .unwrap()
         .iter()
         .any(|m| m.id() == Some(message_id))
      {
         return Err(InfraError::invalid_input("親メッセージが存在しません"));
      }

      let id = recipient.id().cloned().unwrap_or_default();
      let stored = recipient.clone().persisted(id.clone());
      let mut recipients = self.recipients.lock().unwrap();
      match recipients.iter_mut().find(|r| r.id() == Some(&id)) {
         Some(existing) => *existing = stored,
         None => recipients.push(stored),
      }

      Ok(id)
   }

   async fn find_due_recipients(
      &self,
      now: DateTime<Utc>,
   ) -> Result<Vec<(Message, Recipient)>, InfraError> {
      let messages = self.messages.lock().unwrap();
      Ok(self
         .recipients
         .lock()
         .unwrap()
         .iter()
         .filter(|r| r.is_due(now))
         .filter_map(|r| {
            messages
               .iter()
               .find(|m| m.id() == r.message_id())
               .map(|m| (m.clone(), r.clone()))
         })
         .collect())
   }

   async fn find_thread(&self, destination: &Destination) -> Result<Vec<Message>, InfraError> {
      let mut thread: Vec<Message> = self
         .messages()
         .into_iter()
         .filter_map(|m| {
            let own: Vec<Recipient> = m
               .id()
               .map(|id| self.recipients_of(id))
               .unwrap_or_default()
               .into_iter()
               .filter(|r| r.destination() == destination)
               .collect();
            let received =
               m.direction() == Direction::Incoming && m.origin() == Some(destination);
            (received || !own.is_empty()).then(|| m.with_recipients(own))
         })
         .collect();
      thread.sort_by_key(Message::created_at);
      Ok(thread)
   }
}

// ===== MockTransport =====

/// 送信したメールを記録する送信経路
///
/// [`fail_for`](Self::fail_for) で指定した宛先への送信は失敗する。
#[derive(Clone, Default)]
pub struct MockTransport {
   sent:    Arc<Mutex<Vec<OutboundEmail>>>,
   failing: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
   pub fn new() -> Self {
      Self::default()
   }

   /// 送信に成功したメール（送信順）
   pub fn sent(&self) -> Vec<OutboundEmail> {
      self.sent.lock().unwrap().clone()
   }

   pub fn fail_for(&self, address: &str) {
      self.failing.lock().unwrap().push(address.to_string());
   }

   pub fn recover(&self, address: &str) {
      self.failing.lock().unwrap().retain(|a| a != address);
   }
}

#[async_trait]
impl Transport for MockTransport {
   async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError> {
      if self.failing.lock().unwrap().contains(&email.to) {
         return Err(TransportError::SendFailed(format!(
            "送信に失敗しました（モック）: {}",
            email.to
         )));
      }
      self.sent.lock().unwrap().push(email.clone());
      Ok(())
   }
}
