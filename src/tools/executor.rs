//! Sandbox Executor：唯一触碰 workspace 的组件
//!
//! execute(&NormalizedCall) 在 workspace 互斥锁内运行一次调用：路径与命令先校验再执行，
//! 每次调用有超时；输出脱敏（访问令牌）并截断（保留首尾）后返回不可变的 ExecutionResult。
//! 每次调用输出结构化审计日志（JSON），路径逃逸与禁用命令另记 security 目标。
//! `.py` 文件写入前先做语法检查，语法错误时拒绝写入。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::call::{ExecutionResult, FailureKind, NormalizedCall, ToolCall};
use crate::tools::code_edit;
use crate::tools::filesystem;
use crate::tools::git::{redact, GitSettings, GitTool};
use crate::tools::github::{PullRequestApi, PullRequestOutcome};
use crate::tools::packages::{self, DEFAULT_OUTDATED_COMMAND};
use crate::tools::policy::CommandPolicy;
use crate::tools::registry::ToolKind;
use crate::tools::shell::{CommandRunner, CommandSpec, RunnerError};
use crate::tools::syntax;
use crate::tools::workspace::WorkspaceRoot;

/// 外层超时在工具自身超时之上的余量，让子进程超时先以 RunnerError 形式返回
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// 默认单次调用超时
    pub tool_timeout: Duration,
    /// run_shell_command 可请求的最大超时
    pub max_timeout: Duration,
    pub max_output_chars: usize,
    pub outdated_command: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(300),
            max_timeout: Duration::from_secs(900),
            max_output_chars: 8000,
            outdated_command: DEFAULT_OUTDATED_COMMAND.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// 锁内状态：git / shell / 包管理命令的工作目录（git_clone 成功后切换到克隆目录）
#[derive(Debug)]
struct WorkspaceState {
    repo_dir: PathBuf,
}

pub struct SandboxExecutor {
    workspace: WorkspaceRoot,
    state: Mutex<WorkspaceState>,
    runner: Arc<dyn CommandRunner>,
    git: GitTool,
    pr_api: Arc<dyn PullRequestApi>,
    policy: CommandPolicy,
    config: ExecutorConfig,
}

impl SandboxExecutor {
    pub fn new(
        workspace: WorkspaceRoot,
        runner: Arc<dyn CommandRunner>,
        pr_api: Arc<dyn PullRequestApi>,
    ) -> Self {
        let state = WorkspaceState {
            repo_dir: workspace.path().to_path_buf(),
        };
        Self {
            git: GitTool::new(runner.clone(), GitSettings::default()),
            workspace,
            state: Mutex::new(state),
            runner,
            pr_api,
            policy: CommandPolicy::default(),
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_policy(mut self, policy: CommandPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_git_settings(mut self, settings: GitSettings) -> Self {
        self.git = GitTool::new(self.runner.clone(), settings);
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn workspace(&self) -> &WorkspaceRoot {
        &self.workspace
    }

    /// 当前 git / shell 工作目录
    pub async fn repo_dir(&self) -> PathBuf {
        self.state.lock().await.repo_dir.clone()
    }

    /// 执行已规范化的调用；任何错误都折叠为失败结果，不向上抛出
    pub async fn execute(&self, call: &NormalizedCall) -> ExecutionResult {
        let kind = call.kind();
        let start = Instant::now();
        let limit = self.call_timeout(&call.call);

        let result = {
            let mut state = self.state.lock().await;
            match timeout(limit + TIMEOUT_GRACE, self.dispatch(&mut state, &call.call)).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => self.failure_from(kind, e),
                Err(_) => ExecutionResult::failure(
                    FailureKind::Timeout,
                    format!("Tool '{}' timed out after {}s", kind, limit.as_secs()),
                ),
            }
        };
        let result = self.finish(result);

        let outcome = match (result.is_success(), result.failure) {
            (true, _) => "ok",
            (false, Some(FailureKind::Timeout)) => "timeout",
            (false, Some(FailureKind::Veto)) => "rejected",
            (false, _) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": kind.name(),
            "ok": result.is_success(),
            "outcome": outcome,
            "exit_code": result.exit_code,
            "notice": result.notice,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": self.args_preview(&call.call),
            "dropped_fields": call.dropped_fields,
        });
        tracing::info!(target: "tool_audit", audit = %audit.to_string(), "tool");
        result
    }

    fn call_timeout(&self, call: &ToolCall) -> Duration {
        match call {
            ToolCall::RunShellCommand(args) => args
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.config.tool_timeout)
                .min(self.config.max_timeout),
            _ => self.config.tool_timeout,
        }
    }

    async fn dispatch(
        &self,
        state: &mut WorkspaceState,
        call: &ToolCall,
    ) -> Result<ExecutionResult, AgentError> {
        let ws = &self.workspace;
        match call {
            ToolCall::GitClone(args) => {
                let dest = ws.resolve(&args.destination)?;
                let shown = ws.display(&dest);
                let mut result = self
                    .git
                    .clone_repo(ws.path(), &dest, &shown, &args.repo_url)
                    .await?;
                if result.is_success() {
                    state.repo_dir = dest;
                    result
                        .output
                        .push_str(&format!("\nShell and git commands now run in {}", shown));
                }
                Ok(result)
            }
            ToolCall::GitCreateBranch(args) => {
                self.git.create_branch(&state.repo_dir, &args.branch_name).await
            }
            ToolCall::GitCommit(args) => self.git.commit(&state.repo_dir, &args.message).await,
            ToolCall::GitPush(args) => {
                self.policy.check_push_branch(&args.branch_name)?;
                self.git.push(&state.repo_dir, &args.branch_name).await
            }
            ToolCall::ListOutdatedPackages(args) => {
                let Some((program, rest)) = self.config.outdated_command.split_first() else {
                    return Err(AgentError::Config("outdated_command is empty".to_string()));
                };
                let spec = CommandSpec::new(program.as_str(), &state.repo_dir, self.config.tool_timeout)
                    .args(rest.iter().cloned());
                let out = self.run(ToolKind::ListOutdatedPackages, &spec).await?;
                if !out.success() {
                    return Err(AgentError::ExecutionFailure(format!(
                        "{} exited with {}: {}",
                        spec.display(),
                        out.exit_code,
                        out.combined()
                    )));
                }
                let found = packages::filter_packages(
                    packages::parse_outdated(&out.stdout)?,
                    args.package_name.as_deref(),
                );
                Ok(ExecutionResult::success(packages::render(&found)))
            }
            ToolCall::ListFiles(args) => {
                filesystem::list_files(ws, &args.path, args.max_depth, args.include_hidden)
                    .map(ExecutionResult::success)
            }
            ToolCall::ReadFile(args) => filesystem::read_file(ws, &args.path).map(ExecutionResult::success),
            ToolCall::WriteFile(args) => {
                let pending = filesystem::prepare_write(ws, &args.path, &args.content)?;
                if let Some(summary) = self.python_syntax_error(&pending.resolved, &pending.content).await {
                    return Err(AgentError::ExecutionFailure(format!(
                        "Invalid Python syntax in {}: {}. The file was not modified.",
                        ws.display(&pending.resolved),
                        summary
                    )));
                }
                filesystem::commit_write(ws, &args.path, &pending).map(ExecutionResult::success)
            }
            ToolCall::ReplaceInFile(args) => {
                let pending =
                    code_edit::prepare_replacement(ws, &args.path, &args.search_text, &args.replace_text)?;
                if let Some(summary) = self.python_syntax_error(&pending.resolved, &pending.edit.content).await {
                    return Err(AgentError::ExecutionFailure(format!(
                        "Resulting code has syntax errors in {}: {}. The file was not modified.",
                        ws.display(&pending.resolved),
                        summary
                    )));
                }
                code_edit::commit_replacement(ws, &args.path, &pending).map(ExecutionResult::success)
            }
            ToolCall::RunShellCommand(args) => {
                self.policy.check_command(&args.command)?;
                let spec = CommandSpec::shell(&args.command, &state.repo_dir, self.call_timeout(call));
                tracing::info!(command = %args.command, "shell tool execute");
                let out = self.run(ToolKind::RunShellCommand, &spec).await?;
                let text = format!(
                    "exit_code: {}\nstdout:\n{}\nstderr:\n{}",
                    out.exit_code,
                    out.stdout.trim_end(),
                    out.stderr.trim_end()
                );
                Ok(if out.success() {
                    ExecutionResult::success(text).with_exit_code(out.exit_code)
                } else {
                    ExecutionResult::failure(FailureKind::Execution, text).with_exit_code(out.exit_code)
                })
            }
            ToolCall::CreateGithubPr(args) => {
                match self.pr_api.create_pull_request(args).await {
                    Ok(PullRequestOutcome::Created { url }) => {
                        Ok(ExecutionResult::success(format!("Pull request created: {}", url)))
                    }
                    Ok(PullRequestOutcome::AlreadyExists { url }) => {
                        let notice = format!(
                            "a pull request from '{}' already exists",
                            args.source_branch
                        );
                        let output = match url {
                            Some(url) => format!("Pull request already exists: {}", url),
                            None => format!(
                                "Pull request already exists for branch '{}'",
                                args.source_branch
                            ),
                        };
                        Ok(ExecutionResult::success_with_notice(output, notice))
                    }
                    Err(e) if e.is_empty_diff() => Err(AgentError::ExecutionFailure(format!(
                        "{}. Nothing to merge: '{}' has no commits that '{}' lacks. \
                         Commit the changes and git_push '{}' before creating the pull request.",
                        e, args.source_branch, args.target_branch, args.source_branch
                    ))),
                    Err(e) => Err(AgentError::ExecutionFailure(e.to_string())),
                }
            }
        }
    }

    /// `.py` 目标的候选内容在沙箱里解析一遍；返回语法错误摘要，其余情况放行
    async fn python_syntax_error(&self, target: &Path, content: &str) -> Option<String> {
        if !syntax::is_python(target) {
            return None;
        }
        let ws = &self.workspace;
        let scratch = ws.path().join(syntax::scratch_name());
        if let Err(e) = std::fs::write(&scratch, content.as_bytes()) {
            tracing::warn!(error = %e, "cannot stage python syntax check, skipping");
            return None;
        }
        let spec = CommandSpec::new(syntax::PYTHON_SYNTAX_CHECK[0], ws.path(), self.config.tool_timeout)
            .args(syntax::PYTHON_SYNTAX_CHECK[1..].iter().copied())
            .arg(ws.display(&scratch));
        let outcome = self.runner.run(&spec).await;
        if let Err(e) = std::fs::remove_file(&scratch) {
            tracing::warn!(path = %scratch.display(), error = %e, "failed to remove syntax check file");
        }

        match outcome {
            Ok(out) if !out.success() => {
                let summary = syntax::syntax_error_summary(&out.combined());
                if summary.is_none() {
                    tracing::warn!(exit_code = out.exit_code, "python syntax check unavailable, skipping");
                }
                summary
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "python syntax check did not run, skipping");
                None
            }
        }
    }

    async fn run(
        &self,
        kind: ToolKind,
        spec: &CommandSpec,
    ) -> Result<crate::tools::shell::CommandOutput, AgentError> {
        self.runner.run(spec).await.map_err(|e| match e {
            RunnerError::Timeout { secs } => AgentError::Timeout {
                tool: kind.name().to_string(),
                secs,
            },
            RunnerError::Spawn { .. } => AgentError::ExecutionFailure(e.to_string()),
        })
    }

    fn failure_from(&self, kind: ToolKind, err: AgentError) -> ExecutionResult {
        if err.is_security_event() {
            tracing::warn!(target: "security", tool = %kind, error = %err, "sandbox boundary violation rejected");
        } else {
            tracing::warn!(tool = %kind, error = %err, "tool failed");
        }
        match err {
            AgentError::PathEscape(path) => ExecutionResult::failure(
                FailureKind::Veto,
                format!("Rejected: path '{}' resolves outside the workspace root", path),
            ),
            AgentError::Veto(reason) => {
                ExecutionResult::failure(FailureKind::Veto, format!("Rejected: {}", reason))
            }
            e @ AgentError::Timeout { .. } => ExecutionResult::failure(FailureKind::Timeout, e.to_string()),
            e => ExecutionResult::failure(FailureKind::Execution, e.to_string()),
        }
    }

    /// 脱敏 + 截断
    fn finish(&self, mut result: ExecutionResult) -> ExecutionResult {
        let token = self.git.token();
        result.output = truncate_middle(&redact(&result.output, token), self.config.max_output_chars);
        result.notice = result.notice.map(|n| redact(&n, token));
        result
    }

    fn args_preview(&self, call: &ToolCall) -> String {
        let s = serde_json::to_string(call).unwrap_or_default();
        let s = redact(&s, self.git.token());
        if s.chars().count() > 200 {
            format!("{}...", s.chars().take(200).collect::<String>())
        } else {
            s
        }
    }
}

/// 超长输出保留首尾各一半，中间替换为标记
pub fn truncate_middle(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let head_len = max_chars / 2;
    let tail_len = max_chars - head_len;
    let head: String = text.chars().take(head_len).collect();
    let tail: String = text.chars().skip(total - tail_len).collect();
    format!(
        "{}\n... [{} characters truncated] ...\n{}",
        head,
        total - max_chars,
        tail
    )
}
