//! 进程执行边界：CommandRunner trait 与基于 tokio::process 的实现
//!
//! 所有 shell、git、包管理命令都经由 CommandRunner 执行。ProcessRunner 关闭 stdin、
//! 强制非交互环境变量，超时后 kill 子进程；可选 exec_prefix 把命令转发进容器（如 docker exec）。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// 一次待执行的命令（不经 shell 解析，除非 program 本身是 sh）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            timeout,
            env: Vec::new(),
        }
    }

    /// `sh -c <command>`
    pub fn shell(command: &str, cwd: impl AsRef<Path>, timeout: Duration) -> Self {
        Self::new("sh", cwd, timeout).arg("-c").arg(command)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// 日志用的命令行
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout 与 stderr 合并（git 常把正常信息写到 stderr）
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", "") => String::new(),
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("command timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },
}

/// 命令执行抽象：生产用 ProcessRunner，测试用脚本化的假实现
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError>;
}

/// 强制非交互的环境变量
const NON_INTERACTIVE_ENV: &[(&str, &str)] = &[
    ("GIT_TERMINAL_PROMPT", "0"),
    ("GIT_EDITOR", "true"),
    ("GIT_PAGER", "cat"),
    ("PAGER", "cat"),
    ("PIP_NO_INPUT", "1"),
    ("PIP_DISABLE_PIP_VERSION_CHECK", "1"),
    ("DEBIAN_FRONTEND", "noninteractive"),
    ("CI", "1"),
];

/// 本机或容器内执行
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    /// 如 ["docker", "exec", "-w", "{cwd}", "sandbox"]；`{cwd}` 替换为容器内工作目录
    exec_prefix: Vec<String>,
    /// 宿主机 workspace 根与容器内挂载点，用于换算 `{cwd}`
    mount: Option<(PathBuf, String)>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exec_prefix(mut self, prefix: Vec<String>, host_root: PathBuf, mount_alias: Option<String>) -> Self {
        self.exec_prefix = prefix;
        self.mount = mount_alias.map(|alias| (host_root, alias));
        self
    }

    fn container_cwd(&self, cwd: &Path) -> String {
        match &self.mount {
            Some((host_root, alias)) => match cwd.strip_prefix(host_root) {
                Ok(rel) if rel.as_os_str().is_empty() => alias.clone(),
                Ok(rel) => format!("{}/{}", alias.trim_end_matches('/'), rel.display()),
                Err(_) => cwd.display().to_string(),
            },
            None => cwd.display().to_string(),
        }
    }

    fn build(&self, spec: &CommandSpec) -> Command {
        let mut cmd = match self.exec_prefix.split_first() {
            Some((program, prefix_args)) => {
                let cwd = self.container_cwd(&spec.cwd);
                let mut c = Command::new(program);
                c.args(prefix_args.iter().map(|a| a.replace("{cwd}", &cwd)));
                c.arg(&spec.program);
                c
            }
            None => {
                let mut c = Command::new(&spec.program);
                c.current_dir(&spec.cwd);
                c
            }
        };
        cmd.args(&spec.args)
            .envs(NON_INTERACTIVE_ENV.iter().copied())
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError> {
        tracing::debug!(command = %spec.display(), cwd = %spec.cwd.display(), "spawn");
        let child = self.build(spec).spawn().map_err(|e| RunnerError::Spawn {
            program: spec.program.clone(),
            message: e.to_string(),
        })?;

        // 超时后 future 被丢弃，kill_on_drop 负责结束子进程
        let output = tokio::time::timeout(spec.timeout, child.wait_with_output())
            .await
            .map_err(|_| RunnerError::Timeout {
                secs: spec.timeout.as_secs(),
            })?
            .map_err(|e| RunnerError::Spawn {
                program: spec.program.clone(),
                message: e.to_string(),
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_display() {
        let spec = CommandSpec::new("git", "/tmp", Duration::from_secs(5)).args(["checkout", "-b", "feat"]);
        assert_eq!(spec.display(), "git checkout -b feat");
    }

    #[test]
    fn test_combined_output() {
        let out = CommandOutput {
            exit_code: 1,
            stdout: "".into(),
            stderr: "fatal: not a git repository\n".into(),
        };
        assert_eq!(out.combined(), "fatal: not a git repository");
        assert!(!out.success());
    }

    #[test]
    fn test_container_cwd_mapping() {
        let runner = ProcessRunner::new().with_exec_prefix(
            vec!["docker".into(), "exec".into(), "-w".into(), "{cwd}".into(), "box".into()],
            PathBuf::from("/srv/ws"),
            Some("/workspace".into()),
        );
        assert_eq!(runner.container_cwd(Path::new("/srv/ws")), "/workspace");
        assert_eq!(runner.container_cwd(Path::new("/srv/ws/repo")), "/workspace/repo");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_captures_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::shell("echo hi; echo oops >&2; exit 3", dir.path(), Duration::from_secs(10));
        let out = ProcessRunner::new().run(&spec).await.unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "hi");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::shell("sleep 5", dir.path(), Duration::from_millis(200));
        let err = ProcessRunner::new().run(&spec).await.unwrap_err();
        assert!(matches!(err, RunnerError::Timeout { .. }));
    }
}
