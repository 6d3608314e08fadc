//! 引擎阶段与单次运行的上下文

use serde::Serialize;
use uuid::Uuid;

use crate::memory::ExecutionHistory;

/// 状态机阶段：Reasoning → Acting → Observing → Reasoning，或进入两个终态之一
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    Reasoning,
    Acting,
    Observing,
    TerminalSuccess,
    TerminalAbort,
}

impl EnginePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, EnginePhase::TerminalSuccess | EnginePhase::TerminalAbort)
    }

    /// 合法迁移
    pub fn can_transition_to(self, next: EnginePhase) -> bool {
        use EnginePhase::*;
        matches!(
            (self, next),
            (Reasoning, Acting)
                | (Reasoning, TerminalSuccess)
                | (Reasoning, TerminalAbort)
                | (Reasoning, Reasoning)
                | (Acting, Observing)
                | (Acting, Reasoning)
                | (Observing, Reasoning)
        )
    }
}

/// 单次运行的全部状态，沿流水线显式传递
#[derive(Debug)]
pub struct RunContext {
    pub run_id: Uuid,
    pub goal: String,
    pub history: ExecutionHistory,
    /// 已发起的推理调用次数
    pub step: usize,
    pub phase: EnginePhase,
}

impl RunContext {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            goal: goal.into(),
            history: ExecutionHistory::new(),
            step: 0,
            phase: EnginePhase::Reasoning,
        }
    }

    pub fn transition(&mut self, next: EnginePhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.phase,
            next
        );
        tracing::trace!(from = ?self.phase, to = ?next, step = self.step, "phase");
        self.phase = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use EnginePhase::*;
        assert!(Reasoning.can_transition_to(Acting));
        assert!(Acting.can_transition_to(Reasoning));
        assert!(Observing.can_transition_to(Reasoning));
        assert!(!Observing.can_transition_to(TerminalSuccess));
        assert!(!TerminalAbort.can_transition_to(Reasoning));
        assert!(TerminalSuccess.is_terminal());
    }

    #[test]
    fn test_new_context() {
        let ctx = RunContext::new("upgrade requests");
        assert_eq!(ctx.phase, EnginePhase::Reasoning);
        assert_eq!(ctx.step, 0);
        assert!(ctx.history.is_empty());
    }
}
