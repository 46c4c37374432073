//! Prometheusメトリクス定義。
use prometheus::{
    Counter, Gauge, Histogram, Registry, register_counter_with_registry,
    register_gauge_with_registry, register_histogram_with_registry,
};
use std::sync::Arc;

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // カウンター
    pub batches_processed: Counter,
    pub batches_failed: Counter,
    pub oracle_attempts: Counter,
    pub oracle_failures: Counter,
    pub rows_labeled: Counter,
    pub missing_ids: Counter,
    pub extraneous_ids: Counter,
    pub taxonomy_violations: Counter,
    pub checkpoints_written: Counter,

    // ヒストグラム
    pub oracle_latency: Histogram,
    pub job_duration: Histogram,

    // ゲージ
    pub rows_unlabeled: Gauge,
}

impl Metrics {
    /// 新しいメトリクスコレクターを作成する。
    ///
    /// # Errors
    /// 同じ名前のメトリクスが既に登録されている場合はエラーを返す。
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            batches_processed: register_counter_with_registry!(
                "labeler_batches_processed_total",
                "Total number of batches labeled and merged",
                registry
            )?,
            batches_failed: register_counter_with_registry!(
                "labeler_batches_failed_total",
                "Total number of batches that exhausted their retry budget",
                registry
            )?,
            oracle_attempts: register_counter_with_registry!(
                "labeler_oracle_attempts_total",
                "Total number of oracle calls, including retries",
                registry
            )?,
            oracle_failures: register_counter_with_registry!(
                "labeler_oracle_failures_total",
                "Total number of failed oracle attempts",
                registry
            )?,
            rows_labeled: register_counter_with_registry!(
                "labeler_rows_labeled_total",
                "Total number of dataset rows written by merges",
                registry
            )?,
            missing_ids: register_counter_with_registry!(
                "labeler_missing_ids_total",
                "Batch identifiers absent from the oracle reply",
                registry
            )?,
            extraneous_ids: register_counter_with_registry!(
                "labeler_extraneous_ids_total",
                "Reply identifiers that were not part of the batch",
                registry
            )?,
            taxonomy_violations: register_counter_with_registry!(
                "labeler_taxonomy_violations_total",
                "Labels outside the configured taxonomy, stored verbatim",
                registry
            )?,
            checkpoints_written: register_counter_with_registry!(
                "labeler_checkpoints_written_total",
                "Total number of checkpoint snapshots written",
                registry
            )?,
            oracle_latency: register_histogram_with_registry!(
                "labeler_oracle_latency_seconds",
                "Latency of a single oracle attempt",
                registry
            )?,
            job_duration: register_histogram_with_registry!(
                "labeler_job_duration_seconds",
                "Duration of a complete labeling run",
                registry
            )?,
            rows_unlabeled: register_gauge_with_registry!(
                "labeler_rows_unlabeled",
                "Rows without a primary category at the end of the last run",
                registry
            )?,
        })
    }
}
