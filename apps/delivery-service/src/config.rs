//! # Delivery Service 設定
//!
//! 環境変数から配信サービスの設定を読み込む。
//! `.env` ファイルは `main` で `dotenvy` が読み込む。

use std::{env, fmt::Display, str::FromStr, time::Duration};

use smsrelay_domain::carrier::CarrierGatewayTable;
use smsrelay_infra::transport::{DeliveryQueueConfig, OverflowPolicy, SmtpCredentials};
use thiserror::Error;

/// 設定の読み込みエラー
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} が設定されていません")]
    Missing(&'static str),

    #[error("{name} の値が不正です: {value:?}（{reason}）")]
    Invalid {
        name:   &'static str,
        value:  String,
        reason: String,
    },
}

/// 配信サービスの設定
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// データベース接続 URL
    pub database_url: String,
    pub transport:    TransportConfig,
    pub queue:        DeliveryQueueConfig,
    pub scheduler:    SchedulerConfig,
    /// キャリアゲートウェイ表（`CARRIER_GATEWAYS` 未設定なら既定の表）
    pub gateways:     CarrierGatewayTable,
}

/// 送信バックエンド
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TransportBackend {
    /// SMTP サーバー経由
    Smtp,
    /// Amazon SES v2 経由
    Ses,
    /// 送信しない（ログ出力のみ）
    Noop,
}

/// 送信経路の設定
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub backend:          TransportBackend,
    pub smtp_host:        String,
    pub smtp_port:        u16,
    pub smtp_credentials: Option<SmtpCredentials>,
    pub from_address:     String,
    pub reply_to:         Option<String>,
}

/// スケジューラの設定
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// ポーリング間隔
    pub poll_interval: Duration,
    /// デッドレターにするまでの失敗回数（未設定なら無期限に再試行）
    pub max_attempts:  Option<u32>,
}

impl DeliveryConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// 任意の取得関数から設定を読み込む
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let source = Source { lookup: &lookup };

        let gateways = match source.get("CARRIER_GATEWAYS") {
            Some(raw) => {
                CarrierGatewayTable::parse(&raw).map_err(|e| ConfigError::Invalid {
                    name:   "CARRIER_GATEWAYS",
                    value:  raw.clone(),
                    reason: e.to_string(),
                })?
            }
            None => CarrierGatewayTable::default_table(),
        };

        Ok(Self {
            database_url: source.required("DATABASE_URL")?,
            transport: TransportConfig::from_source(&source)?,
            queue: queue_config(&source)?,
            scheduler: SchedulerConfig::from_source(&source)?,
            gateways,
        })
    }
}

impl TransportConfig {
    fn from_source(source: &Source<'_>) -> Result<Self, ConfigError> {
        let smtp_credentials = match (source.get("SMTP_USERNAME"), source.get("SMTP_PASSWORD")) {
            (Some(username), Some(password)) => Some(SmtpCredentials { username, password }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("SMTP_PASSWORD")),
            (None, Some(_)) => return Err(ConfigError::Missing("SMTP_USERNAME")),
        };

        Ok(Self {
            backend: source.parse_or("TRANSPORT_BACKEND", TransportBackend::Noop)?,
            smtp_host: source
                .get("SMTP_HOST")
                .unwrap_or_else(|| "localhost".to_string()),
            smtp_port: source.parse_or("SMTP_PORT", 1025)?,
            smtp_credentials,
            from_address: source
                .get("TRANSPORT_FROM_ADDRESS")
                .unwrap_or_else(|| "sms@smsrelay.example.com".to_string()),
            reply_to: source.get("TRANSPORT_REPLY_TO"),
        })
    }
}

impl SchedulerConfig {
    fn from_source(source: &Source<'_>) -> Result<Self, ConfigError> {
        let max_attempts = match source.get("DISPATCH_MAX_ATTEMPTS") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(0) | Err(_) => {
                    return Err(ConfigError::Invalid {
                        name:   "DISPATCH_MAX_ATTEMPTS",
                        value:  raw,
                        reason: "1 以上の整数である必要があります".to_string(),
                    });
                }
                Ok(max) => Some(max),
            },
            None => None,
        };

        Ok(Self {
            poll_interval: Duration::from_secs(
                source.parse_or("SCHEDULER_POLL_INTERVAL_SECS", 600)?,
            ),
            max_attempts,
        })
    }
}

fn queue_config(source: &Source<'_>) -> Result<DeliveryQueueConfig, ConfigError> {
    let defaults = DeliveryQueueConfig::default();

    let overflow = match source.get("QUEUE_OVERFLOW").as_deref() {
        None | Some("reject") => OverflowPolicy::Reject,
        Some("block") => OverflowPolicy::Block,
        Some(other) => {
            return Err(ConfigError::Invalid {
                name:   "QUEUE_OVERFLOW",
                value:  other.to_string(),
                reason: "reject または block を指定してください".to_string(),
            });
        }
    };

    let rate_per_second: f64 = source.parse_or("QUEUE_RATE_PER_SECOND", defaults.rate_per_second)?;
    if !(rate_per_second.is_finite() && rate_per_second > 0.0) {
        return Err(ConfigError::Invalid {
            name:   "QUEUE_RATE_PER_SECOND",
            value:  rate_per_second.to_string(),
            reason: "正の数である必要があります".to_string(),
        });
    }

    Ok(DeliveryQueueConfig {
        capacity: source.parse_or("QUEUE_CAPACITY", defaults.capacity)?,
        overflow,
        enqueue_timeout: Duration::from_millis(source.parse_or("QUEUE_ENQUEUE_TIMEOUT_MS", 1000)?),
        send_timeout: Duration::from_secs(source.parse_or("QUEUE_SEND_TIMEOUT_SECS", 30)?),
        rate_per_second,
        burst: source.parse_or("QUEUE_RATE_BURST", defaults.burst)?,
    })
}

struct Source<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Source<'_> {
    /// 空文字列は未設定として扱う
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn parse_or<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(name) {
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value: raw.clone(),
            }),
            None => Ok(default),
        }
    }
}
