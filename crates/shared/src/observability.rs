//! # Observability 基盤
//!
//! トレーシングの初期化と、サービス名を載せるルートスパンを提供する。
//!
//! ```ignore
//! let _app = init_tracing(&TracingConfig::from_env("delivery-service")).entered();
//! ```
//!
//! JSON 形式ではスパンの一覧（`spans`）を出力するため、ルートスパンの
//! `service` がすべてのログ行に含まれる。`tokio::spawn` するタスクは
//! `Instrument::in_current_span` でルートスパンを引き継ぐ。

/// ログ出力形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON 形式（本番環境向け）
    Json,
    /// 人間が読みやすい形式（開発環境向け）
    #[default]
    Pretty,
}

impl LogFormat {
    /// `json` / `pretty` を大文字小文字を区別せずにパースする
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("json") {
            Some(Self::Json)
        } else if s.eq_ignore_ascii_case("pretty") {
            Some(Self::Pretty)
        } else {
            None
        }
    }
}

/// トレーシング初期化設定
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// サービス名（ルートスパンの `service` フィールド）
    pub service_name:    String,
    pub log_format:      LogFormat,
    /// 解釈できなかった `LOG_FORMAT` の値。初期化後に警告として出力する
    pub rejected_format: Option<String>,
}

impl TracingConfig {
    pub fn new(service_name: impl Into<String>, log_format: LogFormat) -> Self {
        Self {
            service_name: service_name.into(),
            log_format,
            rejected_format: None,
        }
    }

    /// 環境変数 `LOG_FORMAT` で出力形式を決定する
    pub fn from_env(service_name: impl Into<String>) -> Self {
        Self::from_lookup(service_name, |name| std::env::var(name).ok())
    }

    /// 任意の取得関数から設定を読み込む
    ///
    /// 未設定や空文字列は既定の Pretty、解釈できない値も Pretty にして
    /// `rejected_format` に残す。
    pub fn from_lookup(
        service_name: impl Into<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut config = Self::new(service_name, LogFormat::default());
        if let Some(raw) = lookup("LOG_FORMAT").filter(|raw| !raw.trim().is_empty()) {
            match LogFormat::parse(&raw) {
                Some(format) => config.log_format = format,
                None => config.rejected_format = Some(raw),
            }
        }
        config
    }
}

/// トレーシングを初期化し、サービスのルートスパンを返す
///
/// `RUST_LOG` でログレベルを制御できる（既定は `"info,smsrelay=debug"`）。
/// `tracing_error::ErrorLayer` を登録するため、インフラ層のエラーは
/// 生成時点のスパン（`SpanTrace`）を保持する。
#[cfg(feature = "observability")]
pub fn init_tracing(config: &TracingConfig) -> tracing::Span {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,smsrelay=debug".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer(config.log_format, std::io::stdout))
        .with(tracing_error::ErrorLayer::default())
        .init();

    if let Some(raw) = &config.rejected_format {
        tracing::warn!(log_format = %raw, "不明な LOG_FORMAT のため pretty 形式で出力します");
    }

    service_span(config)
}

/// サービス名を載せたルートスパン
#[cfg(feature = "observability")]
pub fn service_span(config: &TracingConfig) -> tracing::Span {
    tracing::info_span!("app", service = %config.service_name)
}

#[cfg(feature = "observability")]
fn fmt_layer<S, W>(
    format: LogFormat,
    writer: W,
) -> Box<dyn tracing_subscriber::Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    use tracing_subscriber::Layer as _;

    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_current_span(false)
            .with_span_list(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().with_writer(writer).boxed(),
    }
}
