use std::{
    env,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use reqwest::Url;
use thiserror::Error;

use crate::{
    clients::oracle::OracleSettings,
    observability::TracingSettings,
    pipeline::{
        checkpoint::{CheckpointMode, default_checkpoint_path},
        driver::JobSettings,
    },
    store::ColumnSpec,
    util::retry::{BackoffStrategy, RetryPolicy},
};

#[cfg(test)]
use once_cell::sync::Lazy;
#[cfg(test)]
pub(crate) static ENV_MUTEX: Lazy<std::sync::Mutex<()>> = Lazy::new(|| std::sync::Mutex::new(()));

#[derive(Clone, PartialEq)]
pub struct Config {
    input_path: PathBuf,
    output_path: PathBuf,
    checkpoint_path: PathBuf,
    batch_size: NonZeroUsize,
    checkpoint_every: NonZeroUsize,
    checkpoint_mode: CheckpointMode,
    columns: ColumnSpec,
    strict_identifiers: bool,
    taxonomy_path: Option<PathBuf>,
    prompt_version: String,
    metrics_path: Option<PathBuf>,
    oracle_base_url: String,
    oracle_api_key: String,
    oracle_model: String,
    oracle_timeout: Duration,
    oracle_max_attempts: NonZeroUsize,
    oracle_retry_delay_ms: u64,
    oracle_backoff_cap_ms: u64,
    oracle_backoff: BackoffStrategy,
    otel_exporter_endpoint: Option<String>,
    otel_sampling_ratio: f64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("input_path", &self.input_path)
            .field("output_path", &self.output_path)
            .field("checkpoint_path", &self.checkpoint_path)
            .field("batch_size", &self.batch_size)
            .field("checkpoint_every", &self.checkpoint_every)
            .field("checkpoint_mode", &self.checkpoint_mode)
            .field("oracle", &self.oracle_settings())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数からラベリングジョブの設定値を読み込み、検証する。
    ///
    /// # Errors
    /// `ORACLE_API_KEY` が未設定、もしくは各種値のパースに失敗した場合は [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        // Dataset paths
        let input_path = parse_path("LABELER_INPUT_PATH", "posts_with_topics_v1.csv");
        let output_path = parse_path("LABELER_OUTPUT_PATH", "posts_with_topics_v2.csv");
        let checkpoint_path = env::var("LABELER_CHECKPOINT_PATH")
            .map_or_else(|_| default_checkpoint_path(&output_path), PathBuf::from);
        if checkpoint_path == output_path {
            return Err(ConfigError::Invalid {
                name: "LABELER_CHECKPOINT_PATH",
                source: anyhow::anyhow!("checkpoint path must differ from the output path"),
            });
        }

        // Batching and checkpoint cadence
        let batch_size = parse_non_zero_usize("LABELER_BATCH_SIZE", 25)?;
        let checkpoint_every = parse_non_zero_usize("LABELER_CHECKPOINT_EVERY", 20)?;
        let checkpoint_mode = parse_from_str("LABELER_CHECKPOINT_MODE", "batch-index")?;

        // Input columns
        let columns = ColumnSpec {
            id: env::var("LABELER_ID_COLUMN").unwrap_or_else(|_| "id".to_string()),
            text: env::var("LABELER_TEXT_COLUMN").unwrap_or_else(|_| "text".to_string()),
            timestamp: env::var("LABELER_DATE_COLUMN").unwrap_or_else(|_| "date".to_string()),
            prior_category: env::var("LABELER_CATEGORY_COLUMN")
                .unwrap_or_else(|_| "category".to_string()),
            require_prior_category: parse_bool("LABELER_REQUIRE_PRIOR_CATEGORY", false)?,
        };
        let strict_identifiers = parse_bool("LABELER_STRICT_IDENTIFIERS", false)?;
        let taxonomy_path = env::var("LABELER_TAXONOMY_PATH").ok().map(PathBuf::from);
        let prompt_version =
            env::var("LABELER_PROMPT_VERSION").unwrap_or_else(|_| "v2".to_string());
        let metrics_path = env::var("LABELER_METRICS_PATH").ok().map(PathBuf::from);

        // Oracle settings
        let oracle_base_url = parse_url("ORACLE_BASE_URL", "https://api.openai.com/v1/")?;
        let oracle_api_key = env_var("ORACLE_API_KEY")?;
        let oracle_model = env::var("ORACLE_MODEL").unwrap_or_else(|_| "gpt-4.1-mini".to_string());
        let oracle_timeout = parse_duration_secs("ORACLE_TIMEOUT_SECS", 120)?;

        // Retry settings (fixed delay by default, exponential backoff + jitter on request)
        let oracle_max_attempts = parse_non_zero_usize("ORACLE_MAX_ATTEMPTS", 3)?;
        let oracle_retry_delay_ms = parse_u64("ORACLE_RETRY_DELAY_MS", 2000)?;
        let oracle_backoff_cap_ms = parse_u64("ORACLE_BACKOFF_CAP_MS", 10000)?;
        let oracle_backoff = parse_from_str("ORACLE_BACKOFF", "fixed")?;

        // OpenTelemetry settings
        let otel_exporter_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();
        let otel_sampling_ratio = parse_f64("OTEL_SAMPLING_RATIO", 1.0)?;
        if !(0.0..=1.0).contains(&otel_sampling_ratio) {
            return Err(ConfigError::Invalid {
                name: "OTEL_SAMPLING_RATIO",
                source: anyhow::anyhow!("sampling ratio must be within 0.0..=1.0"),
            });
        }

        Ok(Self {
            input_path,
            output_path,
            checkpoint_path,
            batch_size,
            checkpoint_every,
            checkpoint_mode,
            columns,
            strict_identifiers,
            taxonomy_path,
            prompt_version,
            metrics_path,
            oracle_base_url,
            oracle_api_key,
            oracle_model,
            oracle_timeout,
            oracle_max_attempts,
            oracle_retry_delay_ms,
            oracle_backoff_cap_ms,
            oracle_backoff,
            otel_exporter_endpoint,
            otel_sampling_ratio,
        })
    }

    #[must_use]
    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    #[must_use]
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    #[must_use]
    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    #[must_use]
    pub fn batch_size(&self) -> NonZeroUsize {
        self.batch_size
    }

    #[must_use]
    pub fn checkpoint_every(&self) -> NonZeroUsize {
        self.checkpoint_every
    }

    #[must_use]
    pub fn checkpoint_mode(&self) -> CheckpointMode {
        self.checkpoint_mode
    }

    #[must_use]
    pub fn columns(&self) -> &ColumnSpec {
        &self.columns
    }

    #[must_use]
    pub fn strict_identifiers(&self) -> bool {
        self.strict_identifiers
    }

    #[must_use]
    pub fn taxonomy_path(&self) -> Option<&Path> {
        self.taxonomy_path.as_deref()
    }

    #[must_use]
    pub fn prompt_version(&self) -> &str {
        &self.prompt_version
    }

    #[must_use]
    pub fn metrics_path(&self) -> Option<&Path> {
        self.metrics_path.as_deref()
    }

    #[must_use]
    pub fn oracle_model(&self) -> &str {
        &self.oracle_model
    }

    #[must_use]
    pub fn oracle_timeout(&self) -> Duration {
        self.oracle_timeout
    }

    #[must_use]
    pub fn otel_exporter_endpoint(&self) -> Option<&str> {
        self.otel_exporter_endpoint.as_deref()
    }

    #[must_use]
    pub fn otel_sampling_ratio(&self) -> f64 {
        self.otel_sampling_ratio
    }

    /// トレースのエクスポート設定。
    #[must_use]
    pub fn tracing_settings(&self) -> TracingSettings {
        TracingSettings {
            otlp_endpoint: self.otel_exporter_endpoint.clone(),
            sampling_ratio: self.otel_sampling_ratio,
        }
    }

    /// オラクルクライアントへ渡す接続設定。
    #[must_use]
    pub fn oracle_settings(&self) -> OracleSettings {
        OracleSettings {
            base_url: self.oracle_base_url.clone(),
            api_key: self.oracle_api_key.clone(),
            model: self.oracle_model.clone(),
            timeout: self.oracle_timeout,
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.oracle_max_attempts.get(),
            self.oracle_retry_delay_ms,
            self.oracle_backoff_cap_ms,
            self.oracle_backoff,
        )
    }

    #[must_use]
    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            input_path: self.input_path.clone(),
            output_path: self.output_path.clone(),
            checkpoint_path: self.checkpoint_path.clone(),
            batch_size: self.batch_size,
            checkpoint_every: self.checkpoint_every,
            checkpoint_mode: self.checkpoint_mode,
            columns: self.columns.clone(),
        }
    }
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parse_path(name: &'static str, default: &str) -> PathBuf {
    PathBuf::from(env::var(name).unwrap_or_else(|_| default.to_string()))
}

fn parse_url(name: &'static str, default: &str) -> Result<String, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    Url::parse(&raw).map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    Ok(raw)
}

fn parse_non_zero_usize(name: &'static str, default: usize) -> Result<NonZeroUsize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    NonZeroUsize::new(parsed).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("must be greater than zero"),
    })
}

fn parse_duration_secs(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_secs)?;
    Ok(Duration::from_secs(value))
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<f64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("invalid boolean value: {raw}"),
        }),
    }
}

fn parse_from_str<T>(name: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = String>,
{
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>().map_err(|message| ConfigError::Invalid {
        name,
        source: anyhow::Error::msg(message),
    })
}
