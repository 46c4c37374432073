use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{
    clients::{
        classifier::BatchClassifier,
        oracle::{ChatCompletionsOracle, LabelOracle, PromptBuilder},
    },
    config::Config,
    observability::Telemetry,
    pipeline::driver::{LabelingJob, RunSummary},
    taxonomy::Taxonomy,
};

/// 設定から組み立てた実行時コンポーネント一式。
pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    taxonomy: Arc<Taxonomy>,
    classifier: Arc<BatchClassifier>,
}

impl ComponentRegistry {
    /// 構成情報と依存をまとめて初期化する。
    ///
    /// # Errors
    /// Telemetry の初期化、タクソノミーの読み込み、HTTP クライアント構築が失敗した場合は
    /// エラーを返す。
    pub fn build(config: Config) -> Result<Self> {
        let telemetry = Telemetry::new(&config.tracing_settings())?;
        let oracle = ChatCompletionsOracle::new(&config.oracle_settings())
            .context("failed to build oracle client")?;
        info!(
            endpoint = %oracle.endpoint(),
            model = config.oracle_model(),
            "oracle client ready"
        );
        Self::with_oracle(config, telemetry, Arc::new(oracle))
    }

    /// 任意のオラクル実装でレジストリを組み立てる。
    ///
    /// # Errors
    /// タクソノミーファイルの読み込みに失敗した場合はエラーを返す。
    pub fn with_oracle(
        config: Config,
        telemetry: Telemetry,
        oracle: Arc<dyn LabelOracle>,
    ) -> Result<Self> {
        let taxonomy = match config.taxonomy_path() {
            Some(path) => Taxonomy::from_path(path)?,
            None => Taxonomy::builtin(),
        };
        let taxonomy = Arc::new(taxonomy);
        info!(
            categories = taxonomy.categories.len(),
            tags = taxonomy.tags.len(),
            custom = config.taxonomy_path().is_some(),
            "taxonomy loaded"
        );

        let prompts = PromptBuilder::new(Arc::clone(&taxonomy), config.prompt_version());
        let classifier = BatchClassifier::new(
            oracle,
            prompts,
            config.retry_policy(),
            telemetry.metrics(),
        )
        .with_strict_identifiers(config.strict_identifiers());

        Ok(Self {
            config: Arc::new(config),
            telemetry,
            taxonomy,
            classifier: Arc::new(classifier),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    #[must_use]
    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    #[must_use]
    pub fn labeling_job(&self) -> LabelingJob {
        LabelingJob::new(
            self.config.job_settings(),
            Arc::clone(&self.classifier),
            self.telemetry.metrics(),
        )
    }

    /// ジョブを1回実行する。メトリクスの出力先があれば成否に関わらず書き出す。
    ///
    /// # Errors
    /// ジョブが中断した場合はエラーチェーンを返す。
    pub async fn run(&self) -> Result<RunSummary> {
        let result = self.labeling_job().execute().await;

        if let Some(path) = self.config.metrics_path() {
            if let Err(error) = self.telemetry.write_prometheus(path) {
                warn!(error = %format!("{error:#}"), "failed to write metrics file");
            }
        }

        result.context("labeling job failed")
    }
}
