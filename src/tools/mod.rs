//! 工具层：注册表、参数规范化、命令策略、沙箱执行

pub mod call;
pub mod code_edit;
pub mod executor;
pub mod filesystem;
pub mod git;
pub mod github;
pub mod mock;
pub mod normalizer;
pub mod packages;
pub mod policy;
pub mod registry;
pub mod schema;
pub mod shell;
pub mod syntax;
pub mod workspace;

pub use call::{Action, ExecutionResult, ExecutionStatus, FailureKind, NormalizedCall, ToolCall};
pub use executor::{ExecutorConfig, SandboxExecutor};
pub use git::GitSettings;
pub use github::{GitHubClient, GitHubError, GitHubSettings, PullRequestApi, PullRequestOutcome};
pub use normalizer::{normalize, normalize_action, NormalizationError};
pub use policy::{CommandPolicy, VetoReason};
pub use registry::{catalog_json, ToolKind, ToolSchema};
pub use schema::{final_answer_schema_json, tool_call_schema_json};
pub use shell::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner, RunnerError};
pub use workspace::{lexical_relative, WorkspaceRoot};
