//! 脚本化推理端（用于测试）：按顺序返回预设步骤，只剩最后一步时重复返回

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::memory::ExecutionHistory;
use crate::react::planner::{Reasoner, Step};

#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    steps: Mutex<VecDeque<Step>>,
    /// 每次被调用时看到的 history 长度
    seen: Mutex<Vec<usize>>,
}

impl ScriptedReasoner {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn history_lengths(&self) -> Vec<usize> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn next_step(&self, _goal: &str, history: &ExecutionHistory) -> Result<Step, AgentError> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(history.len());
        let mut steps = self.steps.lock().unwrap_or_else(|e| e.into_inner());
        let step = if steps.len() > 1 {
            steps.pop_front()
        } else {
            steps.front().cloned()
        };
        Ok(step.unwrap_or_else(|| Step::Finish(String::new())))
    }
}
