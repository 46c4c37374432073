use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
};

use tracing::info;

use crate::{error::JobError, store::DatasetStore};

/// チェックポイントを書くタイミングの判定方法。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointMode {
    /// 0始まりのバッチ番号が K の倍数のとき（バッチ 0, K, 2K, ... の後）
    #[default]
    BatchIndex,
    /// 完了したバッチ数が K の倍数のとき（バッチ K-1, 2K-1, ... の後）
    CompletedCount,
}

impl FromStr for CheckpointMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "batch-index" | "batch_index" => Ok(Self::BatchIndex),
            "completed-count" | "completed_count" => Ok(Self::CompletedCount),
            other => Err(format!("unknown checkpoint mode: {other}")),
        }
    }
}

/// 出力パスから既定のチェックポイントパスを作る（拡張子を `tmp.csv` に置き換える）。
#[must_use]
pub fn default_checkpoint_path(output: &Path) -> PathBuf {
    output.with_extension("tmp.csv")
}

/// 一定間隔でストア全体をスナップショットする。
///
/// 書き込みは既存ファイルの上書きで、アトミックではない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointManager {
    path: PathBuf,
    every: NonZeroUsize,
    mode: CheckpointMode,
}

impl CheckpointManager {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, every: NonZeroUsize, mode: CheckpointMode) -> Self {
        Self {
            path: path.into(),
            every,
            mode,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn should_checkpoint(&self, batch_index: usize) -> bool {
        let every = self.every.get();
        match self.mode {
            CheckpointMode::BatchIndex => batch_index % every == 0,
            CheckpointMode::CompletedCount => (batch_index + 1) % every == 0,
        }
    }

    /// 判定に当たればストアを書き出し、書いたかどうかを返す。
    ///
    /// # Errors
    /// 書き込みに失敗した場合は [`JobError::Checkpoint`] を返す。ジョブはここで止まる。
    pub fn maybe_checkpoint(
        &self,
        store: &DatasetStore,
        batch_index: usize,
    ) -> Result<bool, JobError> {
        if !self.should_checkpoint(batch_index) {
            return Ok(false);
        }

        store
            .write_csv(&self.path)
            .map_err(|source| JobError::Checkpoint {
                path: self.path.clone(),
                source,
            })?;

        info!(
            batch_index,
            path = %self.path.display(),
            rows = store.len(),
            "checkpoint written"
        );
        Ok(true)
    }
}
