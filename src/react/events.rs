//! 引擎过程事件：用于终端/日志渲染运行轨迹

use serde::Serialize;
use uuid::Uuid;

use crate::tools::call::ExecutionResult;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    RunStarted { run_id: Uuid, goal: String },
    /// 第 step 轮推理开始
    StepStarted { step: usize, max_steps: usize },
    ToolProposed {
        tool: String,
        args: serde_json::Value,
    },
    Vetoed { tool: String, reason: String },
    /// 参数规范化失败或推理输出无法解析
    Rejected { tool: String, reason: String },
    Observed {
        step: usize,
        tool: String,
        result: ExecutionResult,
    },
    Finished { summary: String, pr_url: Option<String> },
    Aborted { reason: String },
}
