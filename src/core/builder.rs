//! 构建器：由 AppConfig 组装 Engine 的各个组件
//!
//! 生产路径用 ProcessRunner / GitHubClient / OpenAiClient；测试可以通过 build_engine_with
//! 注入脚本化的 CommandRunner、PullRequestApi 与 Reasoner。

use std::sync::Arc;
use std::time::Duration;

use crate::config::{secret_from_env, AppConfig};
use crate::core::AgentError;
use crate::llm::{LlmClient, OpenAiClient, RetryConfig, RetryingLlmClient};
use crate::react::{default_system_prompt, Engine, Planner, Reasoner, Reflector};
use crate::tools::{
    CommandPolicy, CommandRunner, ExecutorConfig, GitHubClient, GitHubSettings, GitSettings, ProcessRunner,
    PullRequestApi, SandboxExecutor, WorkspaceRoot,
};

pub struct AgentBuilder {
    config: AppConfig,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 创建并规范化 workspace 根目录
    pub fn build_workspace(&self) -> Result<WorkspaceRoot, AgentError> {
        WorkspaceRoot::new(&self.config.app.workspace_root, self.config.app.mount_alias.clone())
    }

    pub fn build_policy(&self) -> CommandPolicy {
        let tools = &self.config.tools;
        CommandPolicy::new(
            tools.interactive_commands.clone(),
            tools.destructive_patterns.clone(),
            tools.protected_branches.clone(),
        )
    }

    pub fn build_runner(&self, workspace: &WorkspaceRoot) -> Arc<dyn CommandRunner> {
        let prefix = &self.config.tools.exec_prefix;
        if prefix.is_empty() {
            return Arc::new(ProcessRunner::new());
        }
        tracing::info!(prefix = ?prefix, "commands run through exec prefix");
        Arc::new(ProcessRunner::new().with_exec_prefix(
            prefix.clone(),
            workspace.path().to_path_buf(),
            workspace.mount_alias().map(str::to_string),
        ))
    }

    pub fn build_pr_api(&self) -> Result<Arc<dyn PullRequestApi>, AgentError> {
        let gh = &self.config.github;
        let token = secret_from_env(&gh.token_env);
        if token.is_none() {
            tracing::warn!(env = %gh.token_env, "GitHub token not set; push and pull requests will fail");
        }
        let client = GitHubClient::new(GitHubSettings {
            api_base: gh.api_base.clone(),
            owner: gh.owner.clone().unwrap_or_default(),
            repo: gh.repo.clone().unwrap_or_default(),
            token,
            timeout: Duration::from_secs(gh.request_timeout_secs),
        })
        .map_err(|e| AgentError::Config(e.to_string()))?;
        Ok(Arc::new(client))
    }

    pub fn git_settings(&self) -> GitSettings {
        let tools = &self.config.tools;
        GitSettings {
            token: secret_from_env(&self.config.github.token_env),
            remote_url: self.config.github.remote_url(),
            user_name: tools.git_user_name.clone(),
            user_email: tools.git_user_email.clone(),
            timeout: Duration::from_secs(tools.tool_timeout_secs),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        let tools = &self.config.tools;
        ExecutorConfig {
            tool_timeout: Duration::from_secs(tools.tool_timeout_secs),
            max_timeout: Duration::from_secs(tools.max_timeout_secs.max(tools.tool_timeout_secs)),
            max_output_chars: tools.max_output_chars,
            outdated_command: tools.outdated_command.clone(),
        }
    }

    /// OpenAI 兼容客户端，外层包一层有界重试
    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        let llm = &self.config.llm;
        let api_key = secret_from_env(&llm.api_key_env);
        if api_key.is_none() {
            tracing::warn!(env = %llm.api_key_env, "LLM API key not set");
        }
        let client = OpenAiClient::new(llm.base_url.as_deref(), &llm.model, api_key.as_deref())
            .with_temperature(llm.temperature);
        Arc::new(RetryingLlmClient::new(
            Arc::new(client),
            RetryConfig {
                max_retries: llm.max_retries,
                request_timeout: Duration::from_secs(llm.request_timeout_secs),
                ..RetryConfig::default()
            },
        ))
    }

    pub fn system_prompt(&self) -> Result<String, AgentError> {
        match &self.config.agent.system_prompt_file {
            Some(path) => std::fs::read_to_string(path)
                .map_err(|e| AgentError::Config(format!("system prompt {}: {}", path.display(), e))),
            None => Ok(default_system_prompt()),
        }
    }

    /// 生产组件组装的 Engine
    pub fn build_engine(&self) -> Result<Engine, AgentError> {
        let workspace = self.build_workspace()?;
        let runner = self.build_runner(&workspace);
        let pr_api = self.build_pr_api()?;
        let reasoner = Arc::new(Planner::new(self.build_llm(), self.system_prompt()?));
        self.build_engine_with(workspace, runner, pr_api, reasoner)
    }

    pub fn build_engine_with(
        &self,
        workspace: WorkspaceRoot,
        runner: Arc<dyn CommandRunner>,
        pr_api: Arc<dyn PullRequestApi>,
        reasoner: Arc<dyn Reasoner>,
    ) -> Result<Engine, AgentError> {
        if self.config.agent.max_steps == 0 {
            return Err(AgentError::Config("agent.max_steps must be at least 1".into()));
        }
        let policy = self.build_policy();
        let reflector = Reflector::new(
            policy.clone(),
            workspace.path(),
            workspace.mount_alias().map(str::to_string),
        );
        let executor = SandboxExecutor::new(workspace, runner, pr_api)
            .with_policy(policy)
            .with_git_settings(self.git_settings())
            .with_config(self.executor_config());
        tracing::info!(
            workspace = %executor.workspace().path().display(),
            max_steps = self.config.agent.max_steps,
            "engine assembled"
        );
        Ok(Engine::new(reasoner, reflector, Arc::new(executor)).with_max_steps(self.config.agent.max_steps))
    }
}
