//! Orchestrator driver: runs every batch in order, merges, checkpoints and persists.

use std::{
    fmt,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clients::classifier::BatchClassifier,
    error::JobError,
    observability::metrics::Metrics,
    store::{ColumnSpec, DatasetStore},
};

use super::{
    batch::{Batch, partition},
    checkpoint::{CheckpointManager, CheckpointMode},
    merge::merge,
};

/// ジョブ1回分の入出力と区切り方。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub batch_size: NonZeroUsize,
    pub checkpoint_every: NonZeroUsize,
    pub checkpoint_mode: CheckpointMode,
    pub columns: ColumnSpec,
}

/// バッチの状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Requesting,
    Labeled,
    Failed,
}

/// ジョブ全体の状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Complete,
    Aborted,
}

impl BatchState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Requesting => "requesting",
            Self::Labeled => "labeled",
            Self::Failed => "failed",
        }
    }
}

impl JobState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 完了したジョブの集計。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub batches: usize,
    pub rows: usize,
    pub rows_labeled: usize,
    pub rows_unlabeled: usize,
    pub missing_ids: usize,
    pub extraneous_ids: usize,
    pub checkpoints_written: usize,
    /// 最終出力を書いた場合のパス
    pub output_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// バッチ分類ジョブ。
pub struct LabelingJob {
    settings: JobSettings,
    classifier: Arc<BatchClassifier>,
    checkpoints: CheckpointManager,
    metrics: Arc<Metrics>,
}

impl LabelingJob {
    #[must_use]
    pub fn new(
        settings: JobSettings,
        classifier: Arc<BatchClassifier>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let checkpoints = CheckpointManager::new(
            settings.checkpoint_path.clone(),
            settings.checkpoint_every,
            settings.checkpoint_mode,
        );
        Self {
            settings,
            classifier,
            checkpoints,
            metrics,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    /// 入力を読み込み、全バッチを処理し、最終出力を書き出す。
    ///
    /// # Errors
    /// 入力の読み込み、分類、チェックポイント、最終出力のいずれかに失敗した場合は
    /// [`JobError`] を返す。失敗時に最終出力は書かれない。
    pub async fn execute(&self) -> Result<RunSummary, JobError> {
        let mut store = DatasetStore::from_path(&self.settings.input_path, &self.settings.columns)?;
        info!(
            input = %self.settings.input_path.display(),
            rows = store.len(),
            "input dataset loaded"
        );

        let mut summary = self.run(&mut store).await?;
        persist(&store, &self.settings.output_path)?;
        summary.output_path = Some(self.settings.output_path.clone());

        info!(
            run_id = %summary.run_id,
            output = %self.settings.output_path.display(),
            "final output written"
        );
        Ok(summary)
    }

    /// ストア上で全バッチを順に処理する。最終出力は書かない。
    ///
    /// 失敗したバッチでジョブを中断し、以降のバッチは処理しない。直前の
    /// チェックポイントはそのまま残る。
    ///
    /// # Errors
    /// バッチの分類が再試行上限に達した場合、チェックポイントの書き込みに失敗した
    /// 場合は [`JobError`] を返す。
    pub async fn run(&self, store: &mut DatasetStore) -> Result<RunSummary, JobError> {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        let started = Instant::now();

        let records = store.records();
        let batches = partition(&records, self.settings.batch_size);
        let total = batches.len();

        info!(
            %run_id,
            rows = records.len(),
            batches = total,
            batch_size = self.settings.batch_size.get(),
            state = %JobState::Running,
            "labeling job started"
        );

        let mut summary = RunSummary {
            run_id,
            batches: 0,
            rows: store.len(),
            rows_labeled: 0,
            rows_unlabeled: 0,
            missing_ids: 0,
            extraneous_ids: 0,
            checkpoints_written: 0,
            output_path: None,
            started_at,
            finished_at: started_at,
        };

        for batch in &batches {
            if let Err(err) = self.process_batch(store, batch, total, &mut summary).await {
                self.metrics
                    .job_duration
                    .observe(started.elapsed().as_secs_f64());
                error!(
                    %run_id,
                    batch_index = batch.index,
                    batches_completed = summary.batches,
                    checkpoint = %self.checkpoints.path().display(),
                    state = %JobState::Aborted,
                    error = %err,
                    "labeling job aborted"
                );
                return Err(err);
            }
        }

        // ラベル済み行数はストアの最終状態から数える
        summary.rows_unlabeled = store.unlabeled_count();
        summary.rows_labeled = store.len() - summary.rows_unlabeled;
        summary.finished_at = Utc::now();
        #[allow(clippy::cast_precision_loss)]
        {
            self.metrics
                .rows_labeled
                .inc_by(summary.rows_labeled as f64);
            self.metrics
                .rows_unlabeled
                .set(summary.rows_unlabeled as f64);
        }
        self.metrics
            .job_duration
            .observe(started.elapsed().as_secs_f64());

        if summary.rows_unlabeled > 0 {
            warn!(
                %run_id,
                rows_unlabeled = summary.rows_unlabeled,
                "some rows are still unlabeled after the run"
            );
        }
        info!(
            %run_id,
            batches = summary.batches,
            rows_labeled = summary.rows_labeled,
            rows_unlabeled = summary.rows_unlabeled,
            checkpoints_written = summary.checkpoints_written,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            state = %JobState::Complete,
            "labeling job complete"
        );

        Ok(summary)
    }

    async fn process_batch(
        &self,
        store: &mut DatasetStore,
        batch: &Batch<'_>,
        total: usize,
        summary: &mut RunSummary,
    ) -> Result<(), JobError> {
        debug!(
            batch_index = batch.index,
            offset = batch.offset,
            size = batch.len(),
            state = %BatchState::Pending,
            "batch queued"
        );
        debug!(batch_index = batch.index, state = %BatchState::Requesting, "requesting labels");

        let labels = match self.classifier.classify(batch).await {
            Ok(labels) => labels,
            Err(source) => {
                self.metrics.batches_failed.inc();
                warn!(
                    batch_index = batch.index,
                    state = %BatchState::Failed,
                    "batch could not be classified"
                );
                return Err(JobError::Classification {
                    batch_index: batch.index,
                    source,
                });
            }
        };

        let outcome = merge(store, batch, &labels);
        if !outcome.is_complete() {
            warn!(
                batch_index = batch.index,
                missing = outcome.missing.len(),
                extraneous = outcome.extraneous.len(),
                missing_ids = ?outcome.missing,
                extraneous_ids = ?outcome.extraneous,
                "oracle reply did not match the batch identifiers"
            );
        }

        #[allow(clippy::cast_precision_loss)]
        {
            self.metrics.missing_ids.inc_by(outcome.missing.len() as f64);
            self.metrics
                .extraneous_ids
                .inc_by(outcome.extraneous.len() as f64);
        }
        self.metrics.batches_processed.inc();

        summary.batches += 1;
        summary.missing_ids += outcome.missing.len();
        summary.extraneous_ids += outcome.extraneous.len();

        info!(
            batch_index = batch.index,
            batch = batch.index + 1,
            total,
            matched = outcome.matched,
            rows_updated = outcome.rows_updated,
            state = %BatchState::Labeled,
            "batch labeled"
        );

        if self.checkpoints.maybe_checkpoint(store, batch.index)? {
            self.metrics.checkpoints_written.inc();
            summary.checkpoints_written += 1;
        }

        Ok(())
    }
}

/// ストア全体を出力パスへ書き出す。
///
/// # Errors
/// 書き込みに失敗した場合は [`JobError::Persist`] を返す。
pub fn persist(store: &DatasetStore, path: &Path) -> Result<(), JobError> {
    store.write_csv(path).map_err(|source| JobError::Persist {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clients::oracle::{ClassificationPrompt, LabelOracle, PromptBuilder},
        observability::Telemetry,
        taxonomy::Taxonomy,
        util::retry::RetryPolicy,
    };
    use anyhow::anyhow;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    /// プロンプト内のIDをそのまま返すオラクル。`fail_on` 回目の呼び出し以降は失敗する。
    struct EchoOracle {
        calls: Mutex<usize>,
        fail_from_call: Option<usize>,
    }

    impl EchoOracle {
        fn new(fail_from_call: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(0),
                fail_from_call,
            })
        }
    }

    #[async_trait]
    impl LabelOracle for EchoOracle {
        async fn complete(&self, prompt: &ClassificationPrompt) -> anyhow::Result<String> {
            let call = {
                let mut calls = self.calls.lock().expect("calls lock");
                *calls += 1;
                *calls
            };
            if self.fail_from_call.is_some_and(|first| call >= first) {
                return Err(anyhow!("service unavailable"));
            }
            let items: Vec<Value> = prompt
                .user
                .lines()
                .filter_map(|line| line.strip_prefix("ID: "))
                .map(|id| json!({"id": id, "primary_category": "Otherwise", "secondary_tags": {"intensity": "Low"}}))
                .collect();
            Ok(Value::Array(items).to_string())
        }
    }

    fn settings(dir: &Path, batch_size: usize) -> JobSettings {
        JobSettings {
            input_path: dir.join("in.csv"),
            output_path: dir.join("out.csv"),
            checkpoint_path: dir.join("out.tmp.csv"),
            batch_size: NonZeroUsize::new(batch_size).expect("non-zero"),
            checkpoint_every: NonZeroUsize::new(20).expect("non-zero"),
            checkpoint_mode: CheckpointMode::BatchIndex,
            columns: ColumnSpec::default(),
        }
    }

    fn job(settings: JobSettings, oracle: Arc<EchoOracle>) -> LabelingJob {
        let metrics = Telemetry::without_tracing().expect("telemetry").metrics();
        let prompts = PromptBuilder::new(Arc::new(Taxonomy::builtin()), "test");
        let classifier = Arc::new(BatchClassifier::new(
            oracle,
            prompts,
            RetryPolicy::immediate(3),
            Arc::clone(&metrics),
        ));
        LabelingJob::new(settings, classifier, metrics)
    }

    fn input(rows: usize) -> String {
        let mut csv = String::from("id,text\n");
        for n in 0..rows {
            csv.push_str(&format!("{n},post {n}\n"));
        }
        csv
    }

    #[tokio::test]
    async fn thirty_records_run_as_two_batches_with_one_checkpoint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings(dir.path(), 25);
        std::fs::write(&settings.input_path, input(30)).expect("input written");
        let oracle = EchoOracle::new(None);
        let job = job(settings.clone(), Arc::clone(&oracle));

        let summary = job.execute().await.expect("job completes");

        assert_eq!(summary.batches, 2);
        assert_eq!(summary.rows_labeled, 30);
        assert_eq!(summary.rows_unlabeled, 0);
        assert_eq!(summary.checkpoints_written, 1);
        assert_eq!(summary.output_path.as_deref(), Some(settings.output_path.as_path()));
        assert_eq!(*oracle.calls.lock().expect("calls lock"), 2);

        // checkpoint taken after batch 0 holds only the first 25 labels
        let checkpoint = DatasetStore::from_path(&settings.checkpoint_path, &settings.columns)
            .expect("checkpoint loads");
        assert_eq!(checkpoint.unlabeled_count(), 5);
        let output = DatasetStore::from_path(&settings.output_path, &settings.columns)
            .expect("output loads");
        assert_eq!(output.unlabeled_count(), 0);
    }

    #[tokio::test]
    async fn failed_batch_aborts_without_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings(dir.path(), 2);
        std::fs::write(&settings.input_path, input(6)).expect("input written");
        // first batch succeeds, second batch fails on every attempt
        let job = job(settings.clone(), EchoOracle::new(Some(2)));
        let mut store = DatasetStore::from_path(&settings.input_path, &settings.columns)
            .expect("input loads");

        let error = job.run(&mut store).await.expect_err("second batch fails");

        assert!(matches!(error, JobError::Classification { batch_index: 1, .. }));
        assert_eq!(store.primary_category(0), Some("Otherwise"));
        assert_eq!(store.primary_category(1), Some("Otherwise"));
        assert!(store.primary_category(2).is_none());
        assert_eq!(store.unlabeled_count(), 4);
        assert!(settings.checkpoint_path.exists());
        assert!(!settings.output_path.exists());
    }

    #[tokio::test]
    async fn empty_input_persists_header_only_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings(dir.path(), 25);
        std::fs::write(&settings.input_path, "id,text\n").expect("input written");
        let oracle = EchoOracle::new(None);
        let job = job(settings.clone(), Arc::clone(&oracle));

        let summary = job.execute().await.expect("job completes");

        assert_eq!(summary.batches, 0);
        assert_eq!(*oracle.calls.lock().expect("calls lock"), 0);
        assert_eq!(
            std::fs::read_to_string(&settings.output_path).expect("output exists"),
            "id,text,primary_category,secondary_tags\n"
        );
    }

    #[tokio::test]
    async fn duplicate_id_across_batches_counts_each_row_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings(dir.path(), 1);
        std::fs::write(&settings.input_path, "id,text\nX,a\nX,b\n").expect("input written");
        let oracle = EchoOracle::new(None);
        let job = job(settings.clone(), Arc::clone(&oracle));

        let summary = job.execute().await.expect("job completes");

        assert_eq!(summary.batches, 2);
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.rows_labeled, 2);
        assert_eq!(summary.rows_unlabeled, 0);
    }

    #[test]
    fn states_render_lowercase() {
        assert_eq!(BatchState::Requesting.to_string(), "requesting");
        assert_eq!(JobState::Aborted.to_string(), "aborted");
    }
}
