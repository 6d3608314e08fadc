//! Agent 错误类型与恢复动作
//!
//! 前四类（Veto / Normalization / ExecutionFailure / Timeout）可恢复：一律转成 history 中的失败条目，
//! 交还给推理循环；AbortError 是唯一的终止性失败，携带完整 history 返回给调用方。

use thiserror::Error;
use uuid::Uuid;

use crate::memory::ExecutionHistory;
use crate::tools::normalizer::NormalizationError;
use crate::tools::policy::VetoReason;

/// 单次运行中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 策略拒绝，从未执行
    #[error("Vetoed: {0}")]
    Veto(#[from] VetoReason),

    /// 调用参数畸形，从未执行
    #[error("Malformed tool call: {0}")]
    Normalization(#[from] NormalizationError),

    /// 工具已运行但底层操作失败（测试失败、git 错误、网络错误等）
    #[error("Tool execution failed: {0}")]
    ExecutionFailure(String),

    #[error("Tool '{tool}' timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    /// 路径逃逸与禁用命令属于「对抗性/畸形输出」，需与普通失败分开记录
    pub fn is_security_event(&self) -> bool {
        match self {
            AgentError::PathEscape(_) => true,
            AgentError::Veto(reason) => reason.is_security_event(),
            _ => false,
        }
    }
}

/// 终止原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// 达到推理/行动循环上限
    StepLimit { max_steps: usize },
    /// 推理端不可用（重试后仍失败）
    ReasonerUnavailable(String),
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::StepLimit { max_steps } => {
                write!(f, "recursion limit of {max_steps} steps reached")
            }
            AbortReason::ReasonerUnavailable(msg) => write!(f, "reasoner unavailable: {msg}"),
        }
    }
}

/// 唯一的终止性失败：附带完整 history 供诊断
#[derive(Error, Debug)]
#[error("run {run_id} aborted after {steps} steps: {reason}")]
pub struct AbortError {
    pub run_id: Uuid,
    pub reason: AbortReason,
    pub steps: usize,
    pub history: ExecutionHistory,
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 将失败与纠正提示写入 history，交给下一轮推理
    RetryWithPrompt(String),
    /// 终止当前运行
    Abort,
}
