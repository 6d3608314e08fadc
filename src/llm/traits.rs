//! LLM 客户端抽象与重试包装
//!
//! 推理端只依赖 LlmClient::complete；RetryingLlmClient 对可重试错误做有界指数退避。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("request rejected: {0}")]
    InvalidRequest(String),

    #[error("empty completion")]
    EmptyResponse,
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Transport(_) | LlmError::RateLimited { .. } | LlmError::EmptyResponse
        )
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 累计 token 使用：(prompt, completion, total)；默认不统计
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// 单次请求超时，超时按 Transport 错误处理（可重试）
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    fn backoff(&self, attempt: u32, err: &LlmError) -> Duration {
        if let LlmError::RateLimited { retry_after_ms } = err {
            return Duration::from_millis(*retry_after_ms).min(self.max_backoff);
        }
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// 重试包装：不可重试错误立即返回
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            let reply = tokio::time::timeout(self.config.request_timeout, self.inner.complete(messages))
                .await
                .unwrap_or_else(|_| {
                    Err(LlmError::Transport(format!(
                        "request timed out after {}s",
                        self.config.request_timeout.as_secs()
                    )))
                });
            match reply {
                Ok(content) => return Ok(content),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let wait = self.config.backoff(attempt, &e);
                    tracing::warn!(error = %e, attempt = attempt + 1, wait_ms = wait.as_millis() as u64, "llm call failed, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockLlmClient;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let mock = Arc::new(MockLlmClient::new(vec![
            Err(LlmError::Transport("connection reset".into())),
            Ok("{\"final_answer\": \"done\"}".into()),
        ]));
        let client = RetryingLlmClient::new(mock.clone(), fast());
        let out = client.complete(&[Message::user("go")]).await.unwrap();
        assert!(out.contains("done"));
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let mock = Arc::new(MockLlmClient::new(vec![Err(LlmError::Transport("down".into()))]));
        let client = RetryingLlmClient::new(mock.clone(), fast());
        assert!(client.complete(&[]).await.is_err());
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_invalid_request_not_retried() {
        let mock = Arc::new(MockLlmClient::new(vec![Err(LlmError::InvalidRequest("bad model".into()))]));
        let client = RetryingLlmClient::new(mock.clone(), fast());
        assert!(client.complete(&[]).await.is_err());
        assert_eq!(mock.calls(), 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.backoff(0, &LlmError::EmptyResponse), Duration::from_millis(500));
        assert_eq!(cfg.backoff(10, &LlmError::EmptyResponse), Duration::from_secs(8));
        assert_eq!(
            cfg.backoff(0, &LlmError::RateLimited { retry_after_ms: 1200 }),
            Duration::from_millis(1200)
        );
    }
}
