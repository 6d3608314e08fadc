//! 错误恢复引擎
//!
//! 把推理阶段的错误映射为 RecoveryAction：可纠正的写成带提示的失败条目交还推理端，
//! 推理端不可用则终止运行。

use crate::core::{AgentError, RecoveryAction};
use crate::tools::registry::ToolKind;

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::JsonParse(detail) => RecoveryAction::RetryWithPrompt(format!(
                "Your last reply could not be parsed ({detail}). \
                 Reply with exactly one JSON object: {{\"tool\": \"<name>\", \"args\": {{...}}}}, \
                 or {{\"final_answer\": \"...\"}} when the work is finished."
            )),
            AgentError::Normalization(e) => RecoveryAction::RetryWithPrompt(format!(
                "{e}. Known tools: {}.",
                ToolKind::names().join(", ")
            )),
            AgentError::Veto(reason) => {
                RecoveryAction::RetryWithPrompt(format!("Rejected before execution: {reason}"))
            }
            AgentError::ExecutionFailure(msg) => RecoveryAction::RetryWithPrompt(msg.clone()),
            AgentError::Timeout { .. } | AgentError::PathEscape(_) => {
                RecoveryAction::RetryWithPrompt(err.to_string())
            }
            AgentError::Llm(_) | AgentError::Config(_) => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::policy::VetoReason;

    #[test]
    fn test_recovery_json_parse_error() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(&AgentError::JsonParse("EOF while parsing".into()));
        match action {
            RecoveryAction::RetryWithPrompt(msg) => {
                assert!(msg.contains("EOF while parsing"));
                assert!(msg.contains("\"tool\""));
            }
            _ => panic!("Expected RetryWithPrompt"),
        }
    }

    #[test]
    fn test_recovery_veto() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Veto(VetoReason::InteractiveCommand { binary: "vim".into() });
        assert!(matches!(engine.handle(&err), RecoveryAction::RetryWithPrompt(m) if m.contains("vim")));
    }

    #[test]
    fn test_recovery_llm_error_aborts() {
        let engine = RecoveryEngine::new();
        assert_eq!(
            engine.handle(&AgentError::Llm("connection refused".into())),
            RecoveryAction::Abort
        );
    }
}
