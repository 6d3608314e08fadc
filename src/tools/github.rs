//! GitHub Pull Request API
//!
//! POST /repos/{owner}/{repo}/pulls：201 为新建；422 且提示 PR 已存在时按 head 分支查回已有 PR，
//! 视为成功（带 notice）。其它 422（如 No commits between）与非 2xx 均为失败。

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::tools::call::CreatePrArgs;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GitHubError {
    #[error("GitHub token is not configured")]
    MissingToken,

    #[error("GitHub repository (owner/repo) is not configured")]
    MissingRepository,

    #[error("GitHub request failed: {0}")]
    Http(String),

    #[error("GitHub API returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl GitHubError {
    /// 422「No commits between」：源分支相对目标分支没有新提交
    pub fn is_empty_diff(&self) -> bool {
        matches!(self, GitHubError::Api { status: 422, message } if message.contains("No commits between"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestOutcome {
    Created { url: String },
    /// url 为按 head 分支查回的已有 PR；查询失败时为 None
    AlreadyExists { url: Option<String> },
}

#[async_trait]
pub trait PullRequestApi: Send + Sync {
    async fn create_pull_request(&self, args: &CreatePrArgs) -> Result<PullRequestOutcome, GitHubError>;
}

#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    html_url: String,
}

/// reqwest 实现
pub struct GitHubClient {
    http: reqwest::Client,
    settings: GitHubSettings,
}

impl GitHubClient {
    pub fn new(settings: GitHubSettings) -> Result<Self, GitHubError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("upgrader/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GitHubError::Http(e.to_string()))?;
        Ok(Self { http, settings })
    }

    fn pulls_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/pulls",
            self.settings.api_base.trim_end_matches('/'),
            self.settings.owner,
            self.settings.repo
        )
    }

    fn token(&self) -> Result<&str, GitHubError> {
        match self.settings.token.as_deref() {
            Some(t) if !t.is_empty() => Ok(t),
            _ => Err(GitHubError::MissingToken),
        }
    }

    /// 已存在的 open PR（head 需带 owner 前缀）
    async fn find_open_pull(&self, head: &str) -> Result<Option<String>, GitHubError> {
        let head = if head.contains(':') {
            head.to_string()
        } else {
            format!("{}:{}", self.settings.owner, head)
        };
        let resp = self
            .http
            .get(self.pulls_url())
            .bearer_auth(self.token()?)
            .header("Accept", "application/vnd.github+json")
            .query(&[("head", head.as_str()), ("state", "open")])
            .send()
            .await
            .map_err(|e| GitHubError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let pulls: Vec<PullRequestResponse> = resp
            .json()
            .await
            .map_err(|e| GitHubError::Http(e.to_string()))?;
        Ok(pulls.into_iter().next().map(|p| p.html_url))
    }
}

#[async_trait]
impl PullRequestApi for GitHubClient {
    async fn create_pull_request(&self, args: &CreatePrArgs) -> Result<PullRequestOutcome, GitHubError> {
        if self.settings.owner.is_empty() || self.settings.repo.is_empty() {
            return Err(GitHubError::MissingRepository);
        }
        let payload = json!({
            "title": args.title,
            "body": args.body,
            "head": args.source_branch,
            "base": args.target_branch,
        });
        tracing::info!(head = %args.source_branch, base = %args.target_branch, "creating pull request");

        let resp = self
            .http
            .post(self.pulls_url())
            .bearer_auth(self.token()?)
            .header("Accept", "application/vnd.github+json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| GitHubError::Http(e.to_string()))?;

        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| GitHubError::Http(e.to_string()))?;
        match status {
            201 => {
                let pr: PullRequestResponse = serde_json::from_str(&text)
                    .map_err(|e| GitHubError::Http(format!("unexpected response: {}", e)))?;
                Ok(PullRequestOutcome::Created { url: pr.html_url })
            }
            422 if is_duplicate_error(&text) => {
                let url = self.find_open_pull(&args.source_branch).await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "lookup of existing pull request failed");
                    None
                });
                Ok(PullRequestOutcome::AlreadyExists { url })
            }
            _ => Err(GitHubError::Api {
                status,
                message: api_message(&text),
            }),
        }
    }
}

/// 422 响应体中的「already exists」
pub fn is_duplicate_error(body: &str) -> bool {
    body.to_lowercase().contains("already exists")
}

/// 提取 message 与 errors[].message，便于模型理解失败原因
fn api_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    let mut parts = Vec::new();
    if let Some(msg) = value.get("message").and_then(Value::as_str) {
        parts.push(msg.to_string());
    }
    if let Some(errors) = value.get("errors").and_then(Value::as_array) {
        parts.extend(
            errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .map(str::to_string),
        );
    }
    if parts.is_empty() {
        body.trim().to_string()
    } else {
        parts.join(": ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_diff_detection() {
        let empty = GitHubError::Api {
            status: 422,
            message: "Validation Failed: No commits between main and feat/deps".into(),
        };
        assert!(empty.is_empty_diff());
        let other = GitHubError::Api {
            status: 422,
            message: "Validation Failed: head sha can't be blank".into(),
        };
        assert!(!other.is_empty_diff());
        assert!(!GitHubError::MissingToken.is_empty_diff());
    }

    #[test]
    fn test_duplicate_detection() {
        let body = r#"{"message":"Validation Failed","errors":[{"resource":"PullRequest","code":"custom","message":"A pull request already exists for acme:feat/deps."}]}"#;
        assert!(is_duplicate_error(body));
        let body = r#"{"message":"Validation Failed","errors":[{"message":"No commits between main and feat/deps"}]}"#;
        assert!(!is_duplicate_error(body));
    }

    #[test]
    fn test_api_message() {
        let body = r#"{"message":"Validation Failed","errors":[{"message":"No commits between main and feat/deps"}]}"#;
        assert_eq!(
            api_message(body),
            "Validation Failed: No commits between main and feat/deps"
        );
        assert_eq!(api_message("Bad gateway"), "Bad gateway");
    }

    #[tokio::test]
    async fn test_missing_token() {
        let client = GitHubClient::new(GitHubSettings {
            api_base: "http://127.0.0.1:9".into(),
            owner: "acme".into(),
            repo: "app".into(),
            token: None,
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        let args = CreatePrArgs {
            source_branch: "feat/deps".into(),
            target_branch: "main".into(),
            title: "t".into(),
            body: "b".into(),
        };
        assert_eq!(
            client.create_pull_request(&args).await.unwrap_err(),
            GitHubError::MissingToken
        );
    }
}
