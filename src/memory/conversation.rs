//! 对话消息：把 ExecutionHistory 展开成推理端的消息序列
//!
//! 每条 history 条目变成一对消息：assistant（模型当时的原始输出）+ user（Observation）。

use serde::{Deserialize, Serialize};

use crate::memory::history::{ExecutionHistory, HistoryEntry};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Observation 文本：状态、退出码、notice、输出
pub fn observation(entry: &HistoryEntry) -> String {
    let result = &entry.result;
    let tool = if entry.action.tool_name.is_empty() {
        "(unparsed)"
    } else {
        entry.action.tool_name.as_str()
    };
    let mut text = format!(
        "Observation [step {}] {}: {}",
        entry.step,
        tool,
        if result.is_success() { "SUCCESS" } else { "FAILURE" }
    );
    if let Some(kind) = result.failure {
        text.push_str(&format!(" ({:?})", kind).to_lowercase());
    }
    if let Some(code) = result.exit_code {
        text.push_str(&format!(", exit_code {}", code));
    }
    if let Some(notice) = &result.notice {
        text.push_str(&format!("\nNotice: {}", notice));
    }
    text.push('\n');
    text.push_str(&result.output);
    text
}

pub fn history_messages(history: &ExecutionHistory) -> Vec<Message> {
    history
        .entries()
        .iter()
        .flat_map(|entry| {
            let said = if entry.action.raw_text.trim().is_empty() {
                format!("{{\"tool\": \"{}\"}}", entry.action.tool_name)
            } else {
                entry.action.raw_text.clone()
            };
            [Message::assistant(said), Message::user(observation(entry))]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::call::{Action, ExecutionResult, FailureKind};
    use serde_json::json;

    #[test]
    fn test_history_rendered_as_pairs() {
        let mut history = ExecutionHistory::new();
        history.append(
            1,
            Action::from_json("run_shell_command", json!({"command": "pytest"})),
            ExecutionResult::failure(FailureKind::Execution, "TypeError").with_exit_code(1),
        );
        history.append(
            2,
            Action::from_json("git_create_branch", json!({"branch_name": "feat"})),
            ExecutionResult::success_with_notice("Now on branch 'feat'", "branch 'feat' already exists"),
        );

        let messages = history_messages(&history);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::Assistant);
        assert!(messages[0].content.contains("pytest"));
        assert_eq!(messages[1].role, Role::User);
        assert!(messages[1].content.starts_with("Observation [step 1] run_shell_command: FAILURE (execution), exit_code 1"));
        assert!(messages[3].content.contains("Notice: branch 'feat' already exists"));
    }
}
