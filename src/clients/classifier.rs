//! Batch classification client: prompt → oracle → validated label map, with retry.

use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
    time::Instant,
};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    observability::metrics::Metrics,
    pipeline::batch::Batch,
    schema::{oracle::LABEL_REPLY_SCHEMA, validate_json},
    store::{LabelMap, LabelResult, dataset::canonical_id},
    util::retry::RetryPolicy,
};

use super::oracle::{ClassificationPrompt, LabelOracle, PromptBuilder};

/// 応答本文の解釈に失敗した理由。
#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("oracle reply is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("oracle reply failed schema validation: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),
    #[error(
        "oracle reply identifiers differ from the batch (missing: {missing:?}, unexpected: {unexpected:?})"
    )]
    IdentifierMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
}

/// 1回の試行の失敗。種類に関わらず同じ方針で再試行する。
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("oracle call failed: {0:#}")]
    Transport(anyhow::Error),
    #[error(transparent)]
    Reply(#[from] ReplyError),
}

impl AttemptError {
    /// ログ・メトリクス用の失敗種別。
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Reply(ReplyError::Malformed(_)) => "malformed",
            Self::Reply(ReplyError::SchemaViolation(_)) => "schema_violation",
            Self::Reply(ReplyError::IdentifierMismatch { .. }) => "identifier_mismatch",
        }
    }
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classification failed after {attempts} attempts")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        last: AttemptError,
    },
}

#[derive(Deserialize)]
struct ReplyItem {
    id: ReplyId,
    primary_category: String,
    secondary_tags: Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplyId {
    Text(String),
    Number(serde_json::Number),
}

impl ReplyId {
    fn into_canonical(self) -> String {
        match self {
            Self::Text(text) => canonical_id(&text),
            Self::Number(number) => canonical_number(&number),
        }
    }
}

/// 整数値の浮動小数（`1.0` など）は整数として表記する。
#[allow(clippy::float_cmp)]
fn canonical_number(number: &serde_json::Number) -> String {
    match number.as_f64() {
        Some(value) if number.is_f64() && value.fract() == 0.0 => format!("{value:.0}"),
        _ => number.to_string(),
    }
}

/// 応答本文をラベルマップに変換する。
///
/// 同じIDが複数回現れた場合は後のものが勝つ。
///
/// # Errors
/// JSONとして読めない場合は [`ReplyError::Malformed`]、形が契約と違う場合は
/// [`ReplyError::SchemaViolation`] を返す。
pub fn parse_reply(raw: &str) -> Result<LabelMap, ReplyError> {
    let value: Value = serde_json::from_str(raw.trim()).map_err(ReplyError::Malformed)?;

    let validation = validate_json(&LABEL_REPLY_SCHEMA, &value);
    if !validation.valid {
        return Err(ReplyError::SchemaViolation(validation.errors));
    }

    let items: Vec<ReplyItem> = serde_json::from_value(value)
        .map_err(|error| ReplyError::SchemaViolation(vec![error.to_string()]))?;

    Ok(items
        .into_iter()
        .map(|item| {
            (
                item.id.into_canonical(),
                LabelResult {
                    primary_category: item.primary_category,
                    secondary_tags: item.secondary_tags,
                },
            )
        })
        .collect())
}

/// 応答のID集合がバッチと一致するか確認する。
///
/// # Errors
/// 不足または余分なIDがある場合は [`ReplyError::IdentifierMismatch`] を返す。
pub fn check_identifiers(labels: &LabelMap, batch: &Batch<'_>) -> Result<(), ReplyError> {
    let requested: BTreeSet<&str> = batch.ids().collect();
    let missing: Vec<String> = requested
        .iter()
        .filter(|id| !labels.contains_key(**id))
        .map(ToString::to_string)
        .collect();
    let mut unexpected: Vec<String> = labels
        .keys()
        .filter(|id| !requested.contains(id.as_str()))
        .cloned()
        .collect();
    unexpected.sort();

    if missing.is_empty() && unexpected.is_empty() {
        Ok(())
    } else {
        Err(ReplyError::IdentifierMismatch {
            missing,
            unexpected,
        })
    }
}

/// バッチをオラクルで分類するクライアント。
pub struct BatchClassifier {
    oracle: Arc<dyn LabelOracle>,
    prompts: PromptBuilder,
    retry: RetryPolicy,
    strict_identifiers: bool,
    metrics: Arc<Metrics>,
}

impl BatchClassifier {
    #[must_use]
    pub fn new(
        oracle: Arc<dyn LabelOracle>,
        prompts: PromptBuilder,
        retry: RetryPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            oracle,
            prompts,
            retry,
            strict_identifiers: false,
            metrics,
        }
    }

    /// 応答のID集合がバッチと一致しない場合も失敗として扱う。
    #[must_use]
    pub fn with_strict_identifiers(mut self, strict: bool) -> Self {
        self.strict_identifiers = strict;
        self
    }

    /// バッチを分類する。失敗時はポリシーに従って再試行する。
    ///
    /// 空のバッチではオラクルを呼ばずに空のマップを返す。
    ///
    /// # Errors
    /// すべての試行が失敗した場合は [`ClassifyError::RetriesExhausted`] を返す。
    pub async fn classify(&self, batch: &Batch<'_>) -> Result<LabelMap, ClassifyError> {
        if batch.is_empty() {
            debug!(batch_index = batch.index, "skipping empty batch");
            return Ok(LabelMap::new());
        }

        let prompt = self.prompts.build(batch.records);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.metrics.oracle_attempts.inc();
            let started = Instant::now();
            let outcome = self.attempt(&prompt, batch).await;
            self.metrics
                .oracle_latency
                .observe(started.elapsed().as_secs_f64());

            match outcome {
                Ok(labels) => {
                    if attempt > 1 {
                        info!(
                            batch_index = batch.index,
                            attempt, "classification succeeded after retry"
                        );
                    }
                    self.audit(batch, &labels);
                    return Ok(labels);
                }
                Err(error) => {
                    self.metrics.oracle_failures.inc();
                    warn!(
                        batch_index = batch.index,
                        attempt,
                        max_attempts,
                        kind = error.kind(),
                        error = %error,
                        "oracle call failed"
                    );

                    if !self.retry.can_retry(attempt) {
                        return Err(ClassifyError::RetriesExhausted {
                            attempts: attempt,
                            last: error,
                        });
                    }

                    let delay = self.retry.delay_for_attempt(attempt);
                    debug!(
                        batch_index = batch.index,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "waiting before retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(
        &self,
        prompt: &ClassificationPrompt,
        batch: &Batch<'_>,
    ) -> Result<LabelMap, AttemptError> {
        let raw = self
            .oracle
            .complete(prompt)
            .await
            .map_err(AttemptError::Transport)?;
        let labels = parse_reply(&raw)?;
        if self.strict_identifiers {
            check_identifiers(&labels, batch)?;
        }
        Ok(labels)
    }

    /// タクソノミー外のラベルを記録する。ラベルはそのまま保存される。
    fn audit(&self, batch: &Batch<'_>, labels: &LabelMap) {
        let requested: HashSet<&str> = batch.ids().collect();
        let taxonomy = self.prompts.taxonomy();

        for (id, label) in labels {
            if !requested.contains(id.as_str()) {
                continue;
            }
            let violations = taxonomy.audit(label);
            if violations.is_empty() {
                continue;
            }
            self.metrics
                .taxonomy_violations
                .inc_by(violations.len() as f64);
            warn!(
                batch_index = batch.index,
                id = %id,
                violations = ?violations,
                "label outside configured taxonomy stored verbatim"
            );
        }
    }
}
