//! 调用与结果的数据模型：Action（未校验）→ NormalizedCall（已校验）→ ExecutionResult（不可变）

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::registry::ToolKind;

/// 推理端提出的一次工具调用，参数形状在规范化之前不受约束
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    /// 模型原始输出，仅用于诊断
    pub raw_text: String,
}

impl Action {
    pub fn new(tool_name: impl Into<String>, arguments: Map<String, Value>, raw_text: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            raw_text: raw_text.into(),
        }
    }

    /// 无法解析的模型输出：保留原文，tool_name 为空
    pub fn unparsed(raw_text: impl Into<String>) -> Self {
        Self::new("", Map::new(), raw_text)
    }

    /// 测试与脚本化推理端的便捷构造：arguments 需为 JSON object，否则视为空
    pub fn from_json(tool_name: impl Into<String>, arguments: Value) -> Self {
        let tool_name = tool_name.into();
        let raw_text = serde_json::json!({ "tool": tool_name, "args": arguments }).to_string();
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(tool_name, arguments, raw_text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitCloneArgs {
    pub repo_url: String,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchArgs {
    pub branch_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitCommitArgs {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOutdatedArgs {
    #[serde(default)]
    pub package_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilesArgs {
    #[serde(default = "default_list_path")]
    pub path: String,
    #[serde(default = "default_list_depth")]
    pub max_depth: u32,
    #[serde(default)]
    pub include_hidden: bool,
}

fn default_list_path() -> String {
    ".".to_string()
}

fn default_list_depth() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadFileArgs {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFileArgs {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceInFileArgs {
    pub path: String,
    pub search_text: String,
    pub replace_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellArgs {
    pub command: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePrArgs {
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
    pub body: String,
}

/// 已按 schema 校验的调用：每个工具一个变体
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case")]
pub enum ToolCall {
    GitClone(GitCloneArgs),
    GitCreateBranch(BranchArgs),
    GitCommit(GitCommitArgs),
    GitPush(BranchArgs),
    ListOutdatedPackages(ListOutdatedArgs),
    ListFiles(ListFilesArgs),
    ReadFile(ReadFileArgs),
    WriteFile(WriteFileArgs),
    ReplaceInFile(ReplaceInFileArgs),
    RunShellCommand(ShellArgs),
    CreateGithubPr(CreatePrArgs),
}

impl ToolCall {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolCall::GitClone(_) => ToolKind::GitClone,
            ToolCall::GitCreateBranch(_) => ToolKind::GitCreateBranch,
            ToolCall::GitCommit(_) => ToolKind::GitCommit,
            ToolCall::GitPush(_) => ToolKind::GitPush,
            ToolCall::ListOutdatedPackages(_) => ToolKind::ListOutdatedPackages,
            ToolCall::ListFiles(_) => ToolKind::ListFiles,
            ToolCall::ReadFile(_) => ToolKind::ReadFile,
            ToolCall::WriteFile(_) => ToolKind::WriteFile,
            ToolCall::ReplaceInFile(_) => ToolKind::ReplaceInFile,
            ToolCall::RunShellCommand(_) => ToolKind::RunShellCommand,
            ToolCall::CreateGithubPr(_) => ToolKind::CreateGithubPr,
        }
    }
}

/// 规范化产物：类型化调用 + 被丢弃的未知字段（非致命诊断）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedCall {
    pub call: ToolCall,
    pub dropped_fields: Vec<String>,
}

impl NormalizedCall {
    pub fn new(call: ToolCall) -> Self {
        Self {
            call,
            dropped_fields: Vec::new(),
        }
    }

    pub fn kind(&self) -> ToolKind {
        self.call.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
}

/// 失败分类：前两类从未触达沙箱
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Veto,
    Normalization,
    Execution,
    Timeout,
}

/// 一次调用的结果；写入 history 后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub output: String,
    /// shell 类工具的退出码
    pub exit_code: Option<i32>,
    /// 幂等操作命中「已存在」时的提示（仍为 success）
    pub notice: Option<String>,
    pub failure: Option<FailureKind>,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            output: output.into(),
            exit_code: None,
            notice: None,
            failure: None,
        }
    }

    pub fn success_with_notice(output: impl Into<String>, notice: impl Into<String>) -> Self {
        Self {
            notice: Some(notice.into()),
            ..Self::success(output)
        }
    }

    pub fn failure(kind: FailureKind, output: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failure,
            output: output.into(),
            exit_code: None,
            notice: None,
            failure: Some(kind),
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}
