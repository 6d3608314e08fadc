//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `UPGRADER__*` 覆盖（双下划线表示嵌套，如 `UPGRADER__AGENT__MAX_STEPS=30`）。
//! 凭据不写进配置文件：配置里只记录环境变量名（`GITHUB_TOKEN`、`OPENAI_API_KEY`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::tools::policy::{DEFAULT_DESTRUCTIVE, DEFAULT_INTERACTIVE, DEFAULT_PROTECTED_BRANCHES};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub github: GitHubSection,
}

/// [app] 段：沙箱根目录与容器内挂载点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub workspace_root: PathBuf,
    /// 容器内看到的 workspace 路径（如 /workspace），模型给出的绝对路径按它换算
    pub mount_alias: Option<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("workspace"),
            mount_alias: Some("/workspace".to_string()),
        }
    }
}

/// [agent] 段：循环上限与默认目标
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_steps: usize,
    pub goal: Option<String>,
    /// 覆盖内置 system prompt 的文件
    pub system_prompt_file: Option<PathBuf>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: crate::react::DEFAULT_MAX_STEPS,
            goal: None,
            system_prompt_file: None,
        }
    }
}

/// [llm] 段：OpenAI 兼容端点、模型、超时与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub base_url: Option<String>,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: None,
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.0,
            request_timeout_secs: 120,
            max_retries: 3,
        }
    }
}

/// [tools] 段：超时、输出上限、容器执行前缀、命令策略与 git 身份
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// run_shell_command 可请求的超时上限（秒）
    pub max_timeout_secs: u64,
    pub max_output_chars: usize,
    pub outdated_command: Vec<String>,
    /// 容器执行前缀，如 ["docker", "exec", "-w", "{cwd}", "sandbox"]；为空时在本机执行
    pub exec_prefix: Vec<String>,
    pub interactive_commands: Vec<String>,
    pub destructive_patterns: Vec<String>,
    pub protected_branches: Vec<String>,
    pub git_user_name: String,
    pub git_user_email: String,
}

impl Default for ToolsSection {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            tool_timeout_secs: 300,
            max_timeout_secs: 900,
            max_output_chars: 8000,
            outdated_command: owned(crate::tools::packages::DEFAULT_OUTDATED_COMMAND),
            exec_prefix: Vec::new(),
            interactive_commands: owned(DEFAULT_INTERACTIVE),
            destructive_patterns: owned(DEFAULT_DESTRUCTIVE),
            protected_branches: owned(DEFAULT_PROTECTED_BRANCHES),
            git_user_name: "upgrader-bot".to_string(),
            git_user_email: "upgrader-bot@users.noreply.github.com".to_string(),
        }
    }
}

/// [github] 段：目标仓库与 API 地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubSection {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub api_base: String,
    /// push 远端的 web 地址前缀
    pub web_base: String,
    pub token_env: String,
    pub request_timeout_secs: u64,
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            owner: None,
            repo: None,
            api_base: "https://api.github.com".to_string(),
            web_base: "https://github.com".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl GitHubSection {
    /// owner 与 repo 都配置时的 push 远端
    pub fn remote_url(&self) -> Option<String> {
        match (&self.owner, &self.repo) {
            (Some(owner), Some(repo)) => Some(format!(
                "{}/{}/{}.git",
                self.web_base.trim_end_matches('/'),
                owner,
                repo
            )),
            _ => None,
        }
    }
}

/// 从环境变量读取凭据；空值视为未设置
pub fn secret_from_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// 从 config 目录加载配置，环境变量 UPGRADER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 UPGRADER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("UPGRADER")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("tools.exec_prefix")
            .with_list_parse_key("tools.outdated_command")
            .with_list_parse_key("tools.protected_branches")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
