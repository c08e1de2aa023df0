//! # MessageRepository
//!
//! メッセージと宛先の永続化を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **保存は upsert**: ID 未採番なら採番して INSERT、採番済みなら ID で UPDATE
//! - **スラッグの一意性はストアが保証**: 重複は `InfraErrorKind::Conflict`
//! - **現在時刻は引数で受け取る**: 配信対象の判定に DB の `now()` を使わず、
//!   ユースケース層の Clock に従う
//! - **宛先は削除しない**: 送信済みの宛先も履歴として残る

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use smsrelay_domain::{
    carrier::Network,
    message::{Direction, Message, MessageId, MessageRecord},
    params::Params,
    recipient::{Destination, Recipient, RecipientId, RecipientRecord},
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// メッセージストアのトレイト
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// メッセージを保存し、その ID を返す
    ///
    /// ID 未採番なら新規作成、採番済みなら更新する。宛先は保存しない
    /// （[`save_recipient`](Self::save_recipient) で個別に保存する）。
    ///
    /// # Errors
    ///
    /// - 本文またはスラッグが空: `InfraErrorKind::InvalidInput`
    /// - スラッグが別のメッセージと重複: `InfraErrorKind::Conflict`
    async fn save_message(&self, message: &Message) -> Result<MessageId, InfraError>;

    /// ID でメッセージを取得する（宛先を含む）
    async fn find_message_by_id(&self, id: &MessageId) -> Result<Option<Message>, InfraError>;

    /// スラッグでメッセージを取得する（宛先を含む）
    async fn find_message_by_slug(&self, slug: &str) -> Result<Option<Message>, InfraError>;

    /// 宛先を保存し、その ID を返す
    ///
    /// 宛先は親メッセージに紐付いている必要がある。
    async fn save_recipient(&self, recipient: &Recipient) -> Result<RecipientId, InfraError>;

    /// `now` の時点で配信対象の宛先を親メッセージと組にして返す
    ///
    /// 未送信かつデッドレターでなく、送信予定が未設定または `now` 以前のもの。
    /// 宛先の作成順に並ぶ。親メッセージには宛先一覧を含めない。
    async fn find_due_recipients(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Message, Recipient)>, InfraError>;

    /// 1 つの宛先とのやり取りを作成日時順に返す
    ///
    /// その宛先を含む送信メッセージ（その宛先の分の宛先だけを付与）と、
    /// その宛先から受信したメッセージ。
    async fn find_thread(&self, destination: &Destination) -> Result<Vec<Message>, InfraError>;
}

// ===== DB 行の型 =====

const MESSAGE_COLUMNS: &str = "id, slug, body, direction, created_at, send_on, \
                               origin_network, origin_subscriber_id";

const RECIPIENT_COLUMNS: &str = "id, message_id, network, subscriber_id, params, \
                                 scheduled_at, sent, attempts, dead_lettered";

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    slug: String,
    body: String,
    direction: String,
    created_at: DateTime<Utc>,
    send_on: Option<DateTime<Utc>>,
    origin_network: Option<String>,
    origin_subscriber_id: Option<String>,
}

impl TryFrom<MessageRow> for Message {
    type Error = InfraError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let direction: Direction = row.direction.parse().map_err(|_| {
            InfraError::unexpected(format!("不正な direction: {}", row.direction))
        })?;

        let origin = match (row.origin_network, row.origin_subscriber_id) {
            (Some(network), Some(subscriber_id)) => Some(Destination::new(
                Network::new(network).map_err(|e| InfraError::unexpected(e.to_string()))?,
                subscriber_id,
            )),
            _ => None,
        };

        Ok(Message::from_db(MessageRecord {
            id: MessageId::from_uuid(row.id),
            slug: row.slug,
            body: row.body,
            direction,
            created_at: row.created_at,
            send_on: row.send_on,
            origin,
        }))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RecipientRow {
    id: Uuid,
    message_id: Uuid,
    network: String,
    subscriber_id: String,
    params: String,
    scheduled_at: Option<DateTime<Utc>>,
    sent: bool,
    attempts: i32,
    dead_lettered: bool,
}

impl TryFrom<RecipientRow> for Recipient {
    type Error = InfraError;

    fn try_from(row: RecipientRow) -> Result<Self, Self::Error> {
        let network = Network::new(row.network).map_err(|e| InfraError::unexpected(e.to_string()))?;
        let params = Params::decode(&row.params).map_err(|e| InfraError::unexpected(e.to_string()))?;

        Ok(Recipient::from_db(RecipientRecord {
            id: RecipientId::from_uuid(row.id),
            message_id: MessageId::from_uuid(row.message_id),
            destination: Destination::new(network, row.subscriber_id),
            params,
            scheduled_at: row.scheduled_at,
            sent: row.sent,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            dead_lettered: row.dead_lettered,
        }))
    }
}

/// PostgreSQL 実装の MessageRepository
#[derive(Debug, Clone)]
pub struct PostgresMessageRepository {
    pool: PgPool,
}

impl PostgresMessageRepository {
    /// 新しいリポジトリインスタンスを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_message(
        &self,
        condition: &str,
        bind: MessageKey<'_>,
    ) -> Result<Option<Message>, InfraError> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE {condition}");
        let query = sqlx::query_as::<_, MessageRow>(&sql);
        let row = match bind {
            MessageKey::Id(id) => query.bind(id),
            MessageKey::Slug(slug) => query.bind(slug),
        }
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let message = Message::try_from(row)?;
        let Some(id) = message.id().cloned() else {
            return Err(InfraError::unexpected("復元したメッセージに ID がありません"));
        };

        let recipients = sqlx::query_as::<_, RecipientRow>(&format!(
            "SELECT {RECIPIENT_COLUMNS} FROM recipients WHERE message_id = $1 \
             ORDER BY created_at, id"
        ))
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Recipient::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(message.with_recipients(recipients)))
    }

    async fn fetch_messages_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Message>, InfraError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ANY($1)");
        sqlx::query_as::<_, MessageRow>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Message::try_from)
            .collect()
    }
}

enum MessageKey<'a> {
    Id(&'a Uuid),
    Slug(&'a str),
}

#[async_trait]
impl MessageRepository for PostgresMessageRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(slug = %message.slug()))]
    async fn save_message(&self, message: &Message) -> Result<MessageId, InfraError> {
        message
            .ensure_persistable()
            .map_err(|e| InfraError::invalid_input(e.to_string()))?;

        let id = message.id().cloned().unwrap_or_default();
        let direction: &'static str = message.direction().into();
        let (origin_network, origin_subscriber_id) = match message.origin() {
            Some(origin) => (
                Some(origin.network.as_str()),
                Some(origin.subscriber_id.as_str()),
            ),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, slug, body, direction, created_at, send_on,
                origin_network, origin_subscriber_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                slug = EXCLUDED.slug,
                body = EXCLUDED.body,
                direction = EXCLUDED.direction,
                send_on = EXCLUDED.send_on,
                origin_network = EXCLUDED.origin_network,
                origin_subscriber_id = EXCLUDED.origin_subscriber_id
            "#,
        )
        .bind(id.as_uuid())
        .bind(message.slug())
        .bind(message.body())
        .bind(direction)
        .bind(message.created_at())
        .bind(message.send_on())
        .bind(origin_network)
        .bind(origin_subscriber_id)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    #[tracing::instrument(skip_all, level = "debug", fields(id = %id))]
    async fn find_message_by_id(&self, id: &MessageId) -> Result<Option<Message>, InfraError> {
        self.fetch_message("id = $1", MessageKey::Id(id.as_uuid()))
            .await
    }

    #[tracing::instrument(skip_all, level = "debug", fields(slug = %slug))]
    async fn find_message_by_slug(&self, slug: &str) -> Result<Option<Message>, InfraError> {
        self.fetch_message("slug = $1", MessageKey::Slug(slug)).await
    }

    #[tracing::instrument(skip_all, level = "debug", fields(destination = %recipient.destination()))]
    async fn save_recipient(&self, recipient: &Recipient) -> Result<RecipientId, InfraError> {
        let Some(message_id) = recipient.message_id() else {
            return Err(InfraError::invalid_input(
                "宛先がメッセージに紐付いていません",
            ));
        };
        let id = recipient.id().cloned().unwrap_or_default();
        let attempts = i32::try_from(recipient.attempts()).unwrap_or(i32::MAX);

        sqlx::query(
            r#"
            INSERT INTO recipients (
                id, message_id, network, subscriber_id, params,
                scheduled_at, sent, attempts, dead_lettered
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                network = EXCLUDED.network,
                subscriber_id = EXCLUDED.subscriber_id,
                params = EXCLUDED.params,
                scheduled_at = EXCLUDED.scheduled_at,
                sent = EXCLUDED.sent,
                attempts = EXCLUDED.attempts,
                dead_lettered = EXCLUDED.dead_lettered
            "#,
        )
        .bind(id.as_uuid())
        .bind(message_id.as_uuid())
        .bind(recipient.destination().network.as_str())
        .bind(&recipient.destination().subscriber_id)
        .bind(recipient.params().encode())
        .bind(recipient.scheduled_at())
        .bind(recipient.is_sent())
        .bind(attempts)
        .bind(recipient.is_dead_lettered())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    #[tracing::instrument(skip_all, level = "debug", fields(now = %now))]
    async fn find_due_recipients(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Message, Recipient)>, InfraError> {
        let recipients = sqlx::query_as::<_, RecipientRow>(&format!(
            "SELECT {RECIPIENT_COLUMNS} FROM recipients \
             WHERE sent = FALSE AND dead_lettered = FALSE \
               AND (scheduled_at IS NULL OR scheduled_at <= $1) \
             ORDER BY created_at, id"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Recipient::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        let mut message_ids: Vec<Uuid> = recipients
            .iter()
            .filter_map(|r| r.message_id().map(|id| *id.as_uuid()))
            .collect();
        message_ids.sort_unstable();
        message_ids.dedup();
        let messages = self.fetch_messages_by_ids(&message_ids).await?;

        recipients
            .into_iter()
            .map(|recipient| {
                let message = messages
                    .iter()
                    .find(|m| m.id() == recipient.message_id())
                    .cloned()
                    .ok_or_else(|| InfraError::unexpected("宛先の親メッセージが見つかりません"))?;
                Ok((message, recipient))
            })
            .collect()
    }

    #[tracing::instrument(skip_all, level = "debug", fields(destination = %destination))]
    async fn find_thread(&self, destination: &Destination) -> Result<Vec<Message>, InfraError> {
        let messages = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m \
             WHERE (m.direction = 'incoming' \
                    AND m.origin_network = $1 AND m.origin_subscriber_id = $2) \
                OR EXISTS (SELECT 1 FROM recipients r \
                           WHERE r.message_id = m.id \
                             AND r.network = $1 AND r.subscriber_id = $2) \
             ORDER BY m.created_at, m.id"
        ))
        .bind(destination.network.as_str())
        .bind(&destination.subscriber_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Message::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        let recipients = sqlx::query_as::<_, RecipientRow>(&format!(
            "SELECT {RECIPIENT_COLUMNS} FROM recipients \
             WHERE network = $1 AND subscriber_id = $2 \
             ORDER BY created_at, id"
        ))
        .bind(destination.network.as_str())
        .bind(&destination.subscriber_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Recipient::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(messages
            .into_iter()
            .map(|message| {
                let own: Vec<Recipient> = recipients
                    .iter()
                    .filter(|r| r.message_id() == message.id())
                    .cloned()
                    .collect();
                message.with_recipients(own)
            })
            .collect())
    }
}
