//! 脚本化的进程执行器与 PR API（用于测试，无需 git / 网络）

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::tools::call::CreatePrArgs;
use crate::tools::github::{GitHubError, PullRequestApi, PullRequestOutcome};
use crate::tools::shell::{CommandOutput, CommandRunner, CommandSpec, RunnerError};

#[derive(Debug, Clone)]
enum Scripted {
    Output(CommandOutput),
    Timeout,
}

#[derive(Debug)]
struct Rule {
    needle: String,
    responses: VecDeque<Scripted>,
}

/// 按命令行子串匹配规则（先注册先匹配）；同一规则的多条响应依次弹出，最后一条重复使用。
/// 未匹配的命令返回 exit 0、空输出。所有调用都会被记录。
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, needle: &str, response: Scripted) -> Self {
        {
            let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
            match rules.iter_mut().find(|r| r.needle == needle) {
                Some(rule) => rule.responses.push_back(response),
                None => rules.push(Rule {
                    needle: needle.to_string(),
                    responses: VecDeque::from([response]),
                }),
            }
        }
        self
    }

    pub fn on_exit(self, needle: &str, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        self.push(
            needle,
            Scripted::Output(CommandOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            }),
        )
    }

    pub fn on_timeout(self, needle: &str) -> Self {
        self.push(needle, Scripted::Timeout)
    }

    /// 已执行命令的展示形式（program + args）
    pub fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(CommandSpec::display)
            .collect()
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(spec.clone());

        let display = spec.display();
        let scripted = {
            let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
            rules
                .iter_mut()
                .find(|r| display.contains(&r.needle))
                .and_then(|rule| {
                    if rule.responses.len() > 1 {
                        rule.responses.pop_front()
                    } else {
                        rule.responses.front().cloned()
                    }
                })
        };

        match scripted {
            Some(Scripted::Output(out)) => Ok(out),
            Some(Scripted::Timeout) => Err(RunnerError::Timeout {
                secs: spec.timeout.as_secs(),
            }),
            None => Ok(CommandOutput::default()),
        }
    }
}

/// Mock PR API：返回预设结果并记录请求
#[derive(Debug)]
pub struct MockPullRequestApi {
    outcome: Mutex<Result<PullRequestOutcome, GitHubError>>,
    requests: Mutex<Vec<CreatePrArgs>>,
}

impl MockPullRequestApi {
    pub fn created(url: &str) -> Self {
        Self::with_outcome(Ok(PullRequestOutcome::Created {
            url: url.to_string(),
        }))
    }

    pub fn with_outcome(outcome: Result<PullRequestOutcome, GitHubError>) -> Self {
        Self {
            outcome: Mutex::new(outcome),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CreatePrArgs> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl PullRequestApi for MockPullRequestApi {
    async fn create_pull_request(&self, args: &CreatePrArgs) -> Result<PullRequestOutcome, GitHubError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(args.clone());
        self.outcome.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
