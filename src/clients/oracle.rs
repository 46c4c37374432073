//! Classification oracle boundary.

mod builder;
mod client;
mod models;

use anyhow::Result;
use async_trait::async_trait;

pub use builder::PromptBuilder;
pub use client::{ChatCompletionsOracle, OracleSettings};
pub use models::ClassificationPrompt;

/// 外部の分類サービス。プロンプトを受け取り、応答本文（JSON文字列のはず）を返す。
#[async_trait]
pub trait LabelOracle: Send + Sync {
    async fn complete(&self, prompt: &ClassificationPrompt) -> Result<String>;
}
