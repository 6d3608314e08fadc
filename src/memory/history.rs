//! 执行历史：一次运行内唯一的记忆
//!
//! 只追加、按步骤有序；推理端每轮收到完整 history。分支与 PR 状态不单独缓存，
//! 需要时从最近的工具输出中重新推导。

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::tools::call::{Action, ExecutionResult};
use crate::tools::registry::ToolKind;

fn pr_url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s'\x22<>()]+/pull/\d+").expect("static regex"))
}

/// 文本中第一个形如 `.../pull/<number>` 的链接（`/pull/new/<branch>` 不算）
pub fn find_pr_url(text: &str) -> Option<String> {
    pr_url_pattern().find(text).map(|m| m.as_str().to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// 从 1 开始的推理/行动循环序号
    pub step: usize,
    pub action: Action,
    pub result: ExecutionResult,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionHistory {
    entries: Vec<HistoryEntry>,
}

impl ExecutionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, step: usize, action: Action, result: ExecutionResult) -> &HistoryEntry {
        self.entries.push(HistoryEntry {
            step,
            action,
            result,
            recorded_at: Utc::now(),
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 最近一次成功的 create_github_pr 结果中的 PR 链接
    pub fn latest_pr_url(&self) -> Option<String> {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.result.is_success())
            .filter(|e| ToolKind::resolve(&e.action.tool_name) == Some(ToolKind::CreateGithubPr))
            .find_map(|e| find_pr_url(&e.result.output))
    }

    /// 某个 URL 是否出现在成功的 create_github_pr 结果中
    pub fn observed_pr_url(&self, url: &str) -> bool {
        self.entries.iter().any(|e| {
            e.result.is_success()
                && ToolKind::resolve(&e.action.tool_name) == Some(ToolKind::CreateGithubPr)
                && pr_url_pattern()
                    .find_iter(&e.result.output)
                    .any(|m| m.as_str() == url)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::call::FailureKind;
    use serde_json::json;

    #[test]
    fn test_find_pr_url() {
        assert_eq!(
            find_pr_url("Pull request created: https://github.com/acme/app/pull/42."),
            Some("https://github.com/acme/app/pull/42".to_string())
        );
        assert_eq!(
            find_pr_url("Create a pull request: https://github.com/acme/app/pull/new/feat/deps"),
            None
        );
    }

    #[test]
    fn test_latest_pr_url_ignores_failures_and_other_tools() {
        let mut history = ExecutionHistory::new();
        history.append(
            1,
            Action::from_json("git_push", json!({"branch_name": "feat"})),
            ExecutionResult::success("remote: https://github.com/acme/app/pull/1"),
        );
        history.append(
            2,
            Action::from_json("pr", json!({})),
            ExecutionResult::success("Pull request created: https://github.com/acme/app/pull/9"),
        );
        history.append(
            3,
            Action::from_json("create_github_pr", json!({})),
            ExecutionResult::failure(FailureKind::Execution, "https://github.com/acme/app/pull/10"),
        );
        assert_eq!(
            history.latest_pr_url().as_deref(),
            Some("https://github.com/acme/app/pull/9")
        );
        assert!(history.observed_pr_url("https://github.com/acme/app/pull/9"));
        assert!(!history.observed_pr_url("https://github.com/acme/app/pull/1"));
        assert_eq!(history.len(), 3);
        assert_eq!(history.entries()[1].step, 2);
    }

    #[test]
    fn test_observed_pr_url_requires_the_whole_url() {
        let mut history = ExecutionHistory::new();
        history.append(
            1,
            Action::from_json("create_github_pr", json!({})),
            ExecutionResult::success("Pull request created: https://github.com/acme/app/pull/55"),
        );
        assert!(history.observed_pr_url("https://github.com/acme/app/pull/55"));
        assert!(!history.observed_pr_url("https://github.com/acme/app/pull/5"));
        assert!(!history.observed_pr_url("https://github.com/acme/app"));
    }
}
