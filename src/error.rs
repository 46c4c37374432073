use std::path::PathBuf;

use thiserror::Error;

use crate::clients::classifier::ClassifyError;

/// データセットの読み書きエラー。
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed CSV at {context}: {source}")]
    Csv {
        context: String,
        #[source]
        source: csv::Error,
    },
    #[error("input has no header row")]
    MissingHeader,
    #[error("missing required column: {0}")]
    MissingColumn(String),
}

impl DatasetError {
    pub(crate) fn csv(context: impl Into<String>) -> impl FnOnce(csv::Error) -> Self {
        let context = context.into();
        move |source| Self::Csv { context, source }
    }
}

/// ラベリングジョブを中断させるエラー。ドライバ内では回復しない。
#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to load dataset")]
    Dataset(#[from] DatasetError),
    #[error("batch {batch_index} could not be classified")]
    Classification {
        batch_index: usize,
        #[source]
        source: ClassifyError,
    },
    #[error("failed to write checkpoint to {}", .path.display())]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: DatasetError,
    },
    #[error("failed to write output to {}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: DatasetError,
    },
}
