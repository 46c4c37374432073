use std::{fmt, time::Duration};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use crate::util::redact::redact;

use super::LabelOracle;
use super::models::{
    ChatCompletionRequest, ChatCompletionResponse, ClassificationPrompt, truncate_error_message,
};

/// オラクル接続設定。起動時に一度だけ構築してクライアントへ渡す。
#[derive(Clone, PartialEq, Eq)]
pub struct OracleSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl fmt::Debug for OracleSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// OpenAI互換の Chat Completions エンドポイントを呼び出すオラクル。
#[derive(Clone)]
pub struct ChatCompletionsOracle {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

impl fmt::Debug for ChatCompletionsOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCompletionsOracle")
            .field("endpoint", &self.endpoint.as_str())
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionsOracle {
    /// 新しいオラクルクライアントを作成する。
    ///
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合はエラーを返す。
    pub fn new(settings: &OracleSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("failed to build oracle HTTP client")?;

        // 末尾スラッシュが無いと join で最後のセグメントが置き換わる
        let mut base = settings.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)
            .context("invalid oracle base URL")?
            .join("chat/completions")
            .context("failed to build chat completions URL")?;

        Ok(Self {
            client,
            endpoint,
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl LabelOracle for ChatCompletionsOracle {
    async fn complete(&self, prompt: &ClassificationPrompt) -> Result<String> {
        let request = ChatCompletionRequest::deterministic(&self.model, prompt);

        debug!(
            model = %self.model,
            system_chars = prompt.system.len(),
            user_chars = prompt.user.len(),
            "sending classification request to oracle"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("oracle request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let truncated_body = truncate_error_message(&body);
            return Err(anyhow!(
                "oracle endpoint returned error status {status}: {truncated_body}"
            ));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("failed to deserialize oracle completion")?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("oracle completion contained no choices"))?;

        debug!(
            model = completion.model.as_deref().unwrap_or("unknown"),
            finish_reason = choice.finish_reason.as_deref().unwrap_or("unknown"),
            "received oracle completion"
        );

        choice
            .message
            .content
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| anyhow!("oracle completion contained no message content"))
    }
}
