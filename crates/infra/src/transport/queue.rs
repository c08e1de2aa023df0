//! 送信キュー
//!
//! 配信ジョブの送信を単一のワーカーに集約する有界キュー。
//!
//! ## 設計方針
//!
//! - **明示的に生成・所有する**: [`DeliveryQueue::new`] が生産者ハンドルと
//!   ワーカーの組を返す。生産者ハンドルは `Clone` して各呼び出し元に渡し、
//!   ワーカーは一度だけ起動する
//! - **有界バッファ + 溢れ時の方針**: [`OverflowPolicy`] で即時拒否か
//!   一定時間の待機かを選ぶ。どちらも溢れた場合は `TransportError::QueueFull`
//! - **呼び出し側には同期的**: ジョブは oneshot の返信チャネルを持ち、
//!   `send` はワーカーが送信結果を返すまで待つ
//! - **FIFO**: ワーカーは 1 つだけで、受け付けた順に送信する
//! - **送信ごとのタイムアウトとレート制限**: [`TokenBucket`] で送信開始の間隔を制限する
//! - **停止**: `CancellationToken` でワーカーを止めると、バッファに残った
//!   ジョブには `TransportError::QueueClosed` を返す

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use smsrelay_domain::delivery::{OutboundEmail, TransportError};
use tokio::{
    sync::{
        mpsc::{
            self,
            error::{SendTimeoutError, TrySendError},
        },
        oneshot,
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{Transport, rate_limit::TokenBucket};

/// キューが満杯のときの方針
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// 即座に `QueueFull` を返す
    #[default]
    Reject,
    /// `enqueue_timeout` まで空きを待ち、それでも満杯なら `QueueFull` を返す
    Block,
}

/// 送信キューの設定
#[derive(Debug, Clone)]
pub struct DeliveryQueueConfig {
    /// バッファに保持できるジョブ数
    pub capacity:        usize,
    pub overflow:        OverflowPolicy,
    /// [`OverflowPolicy::Block`] で空きを待つ上限
    pub enqueue_timeout: Duration,
    /// 1 通の送信にかけられる上限
    pub send_timeout:    Duration,
    /// 毎秒の送信数
    pub rate_per_second: f64,
    /// 連続して送信できる数
    pub burst:           u32,
}

impl Default for DeliveryQueueConfig {
    fn default() -> Self {
        Self {
            capacity:        64,
            overflow:        OverflowPolicy::Reject,
            enqueue_timeout: Duration::from_secs(1),
            send_timeout:    Duration::from_secs(30),
            rate_per_second: 5.0,
            burst:           1,
        }
    }
}

struct DeliveryJob {
    email: OutboundEmail,
    reply: oneshot::Sender<Result<(), TransportError>>,
}

/// 送信キューの生産者ハンドル
#[derive(Clone)]
pub struct DeliveryQueue {
    sender:          mpsc::Sender<DeliveryJob>,
    overflow:        OverflowPolicy,
    enqueue_timeout: Duration,
}

/// 送信キューの消費者（単一のワーカー）
pub struct DeliveryWorker {
    receiver:     mpsc::Receiver<DeliveryJob>,
    transport:    Arc<dyn Transport>,
    limiter:      TokenBucket,
    send_timeout: Duration,
}

impl DeliveryQueue {
    /// キューを作成し、生産者ハンドルとワーカーを返す
    ///
    /// `transport` は実際にメールを送る送信経路（SMTP / SES / Noop）。
    pub fn new(config: DeliveryQueueConfig, transport: Arc<dyn Transport>) -> (Self, DeliveryWorker) {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));

        let queue = Self {
            sender,
            overflow: config.overflow,
            enqueue_timeout: config.enqueue_timeout,
        };
        let worker = DeliveryWorker {
            receiver,
            transport,
            limiter: TokenBucket::new(config.rate_per_second, config.burst),
            send_timeout: config.send_timeout,
        };

        (queue, worker)
    }

    /// バッファの空き数
    pub fn available_capacity(&self) -> usize {
        self.sender.capacity()
    }

    async fn enqueue(&self, job: DeliveryJob) -> Result<(), TransportError> {
        match self.overflow {
            OverflowPolicy::Reject => self.sender.try_send(job).map_err(|e| match e {
                TrySendError::Full(_) => TransportError::QueueFull,
                TrySendError::Closed(_) => TransportError::QueueClosed,
            }),
            OverflowPolicy::Block => self
                .sender
                .send_timeout(job, self.enqueue_timeout)
                .await
                .map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => TransportError::QueueFull,
                    SendTimeoutError::Closed(_) => TransportError::QueueClosed,
                }),
        }
    }
}

#[async_trait]
impl Transport for DeliveryQueue {
    async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError> {
        if !email.is_complete() {
            return Err(TransportError::Incomplete(email.to.clone()));
        }

        let (reply, result) = oneshot::channel();
        self.enqueue(DeliveryJob {
            email: email.clone(),
            reply,
        })
        .await?;

        // ワーカーが返信せずに終了した場合は停止扱い
        result.await.unwrap_or(Err(TransportError::QueueClosed))
    }
}

impl DeliveryWorker {
    /// 呼び出し元のスパンを引き継いでワーカーを起動する
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel).in_current_span())
    }

    /// キャンセルされるか、すべての生産者ハンドルが破棄されるまでジョブを処理する
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("送信ワーカーを開始しました");

        loop {
            let job = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                job = self.receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.process(job, &cancel).await;
        }

        self.receiver.close();
        let mut rejected = 0_usize;
        while let Ok(job) = self.receiver.try_recv() {
            let _ = job.reply.send(Err(TransportError::QueueClosed));
            rejected += 1;
        }

        tracing::info!(rejected, "送信ワーカーを停止しました");
    }

    async fn process(&mut self, job: DeliveryJob, cancel: &CancellationToken) {
        if job.reply.is_closed() {
            tracing::debug!(to = %job.email.to, "呼び出し元が待機をやめたため送信をスキップ");
            return;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = job.reply.send(Err(TransportError::QueueClosed));
                return;
            }
            () = self.limiter.acquire() => {}
        }

        let result = match tokio::time::timeout(self.send_timeout, self.transport.send(&job.email)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.send_timeout)),
        };

        match &result {
            Ok(()) => tracing::debug!(to = %job.email.to, "メールを送信しました"),
            Err(e) => tracing::warn!(to = %job.email.to, error = %e, "メール送信に失敗しました"),
        }

        let _ = job.reply.send(result);
    }
}
