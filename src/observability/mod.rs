pub mod metrics;
pub(crate) mod tracing;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use prometheus::{Encoder, Registry, TextEncoder};

use self::metrics::Metrics;
pub use self::tracing::TracingSettings;

/// Telemetry（メトリクスとトレーシング）を管理する構造体。
#[derive(Debug, Clone)]
pub struct Telemetry {
    registry: Arc<Registry>,
    metrics: Arc<Metrics>,
}

impl Telemetry {
    /// 新しいTelemetryインスタンスを作成し、トレーシングとメトリクスを初期化する。
    ///
    /// # Errors
    /// トレーシングの初期化やメトリクス登録に失敗した場合はエラーを返す。
    pub fn new(settings: &TracingSettings) -> Result<Self> {
        tracing::init(settings)?;
        Self::without_tracing()
    }

    /// トレーシングを初期化せずにメトリクスだけを用意する。
    ///
    /// # Errors
    /// メトリクス登録に失敗した場合はエラーを返す。
    pub fn without_tracing() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(
            Metrics::new(Arc::clone(&registry)).context("failed to register metrics")?,
        );
        Ok(Self { registry, metrics })
    }

    /// メトリクスへのアクセスを提供する。
    #[must_use]
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Prometheusメトリクスをレンダリングする。
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// 未送信のスパンを送り出してトレースのエクスポーターを止める。
    ///
    /// # Errors
    /// エクスポーターの停止に失敗した場合はエラーを返す。
    #[allow(clippy::unused_self)]
    pub fn shutdown(&self) -> Result<()> {
        tracing::shutdown()
    }

    /// レンダリングしたメトリクスをファイルへ書き出す。
    ///
    /// # Errors
    /// 書き込みに失敗した場合はエラーを返す。
    pub fn write_prometheus(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render_prometheus())
            .with_context(|| format!("failed to write metrics to {}", path.display()))
    }
}
