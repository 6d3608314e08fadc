//! 命令与内容策略：交互式命令、破坏性命令、受保护分支、占位内容
//!
//! Reflector 在规范化前调用（纯函数、无 I/O），Executor 在 spawn 前再校验一次命令。

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// 策略拒绝原因
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VetoReason {
    #[error("'{binary}' is interactive and would block the sandbox; use a non-interactive alternative")]
    InteractiveCommand { binary: String },

    #[error("command matches forbidden pattern '{pattern}'")]
    DestructiveCommand { pattern: String },

    #[error("path '{path}' is outside the workspace root")]
    PathEscape { path: String },

    #[error("pushing to protected branch '{branch}' is forbidden; push a feature branch instead")]
    ProtectedBranch { branch: String },

    #[error("content for '{path}' contains placeholder text; write the complete file")]
    PlaceholderContent { path: String },

    #[error("empty command")]
    EmptyCommand,
}

impl VetoReason {
    /// 需要在 security 目标下单独记录的违规
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            VetoReason::InteractiveCommand { .. }
                | VetoReason::DestructiveCommand { .. }
                | VetoReason::PathEscape { .. }
        )
    }
}

/// 终端编辑器、分页器等：任何参数下都会阻塞
pub const DEFAULT_INTERACTIVE: &[&str] = &[
    "vim", "vi", "nvim", "nano", "emacs", "pico", "joe", "ed", "less", "more", "most", "man",
    "top", "htop", "watch", "ssh", "telnet", "ftp", "tmux", "screen",
];

/// 不带参数时进入 REPL 的解释器
pub const DEFAULT_REPL: &[&str] = &[
    "python", "python3", "ipython", "node", "irb", "bash", "sh", "zsh", "psql", "mysql", "sqlite3",
];

/// 破坏性命令（正则）
pub const DEFAULT_DESTRUCTIVE: &[&str] = &[
    r"\brm\s+-[a-zA-Z]*[rR][a-zA-Z]*\s+(/|~|\*|\.{1,2})/?(\s|$)",
    r"\bmkfs",
    r"\bdd\s+if=",
    r">\s*/dev/sd",
    r":\(\)\s*\{\s*:\|:&\s*\};:",
    r"\bchmod\s+(-R\s+)?777\b",
    r"\b(curl|wget)\b[^|]*\|\s*(sudo\s+)?(ba)?sh\b",
    r"\bgit\s+push\b.*\s(--force|-f)\b",
    r"\b(shutdown|reboot|halt)\b",
];

pub const DEFAULT_PROTECTED_BRANCHES: &[&str] = &["main", "master"];

/// 前缀包装命令：检查其后真正执行的二进制
const WRAPPERS: &[&str] = &["sudo", "env", "nohup", "time", "exec", "command"];

fn segment_splitter() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\|\||&&|[|;&\n]").expect("static regex"))
}

fn placeholder_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?im)^\s*(#|//)\s*(\.\.\.|…)|rest of (the )?(file|code)|existing code (here|unchanged)|\.\.\.\s*\((unchanged|omitted)\)",
        )
        .expect("static regex")
    })
}

/// 命令策略：交互式黑名单 + 破坏性正则 + 受保护分支
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    interactive: HashSet<String>,
    repl: HashSet<String>,
    destructive: Vec<(String, Regex)>,
    protected_branches: HashSet<String>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_INTERACTIVE.iter().map(|s| s.to_string()).collect(),
            DEFAULT_DESTRUCTIVE.iter().map(|s| s.to_string()).collect(),
            DEFAULT_PROTECTED_BRANCHES.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl CommandPolicy {
    /// 非法正则会被跳过并告警，不影响其余规则
    pub fn new(interactive: Vec<String>, destructive: Vec<String>, protected_branches: Vec<String>) -> Self {
        let destructive = destructive
            .into_iter()
            .filter_map(|pattern| match Regex::new(&pattern) {
                Ok(re) => Some((pattern, re)),
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "skipping invalid destructive pattern");
                    None
                }
            })
            .collect();
        Self {
            interactive: interactive.into_iter().map(|s| s.to_lowercase()).collect(),
            repl: DEFAULT_REPL.iter().map(|s| s.to_string()).collect(),
            destructive,
            protected_branches: protected_branches
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect(),
        }
    }

    /// 校验整条命令行：逐段（管道、&&、; 分隔）检查
    pub fn check_command(&self, raw: &str) -> Result<(), VetoReason> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(VetoReason::EmptyCommand);
        }
        for (pattern, re) in &self.destructive {
            if re.is_match(raw) {
                return Err(VetoReason::DestructiveCommand {
                    pattern: pattern.clone(),
                });
            }
        }
        for segment in segment_splitter().split(raw) {
            self.check_segment(segment)?;
        }
        Ok(())
    }

    fn check_segment(&self, segment: &str) -> Result<(), VetoReason> {
        let mut tokens = segment
            .split_whitespace()
            .skip_while(|t| is_env_assignment(t) || WRAPPERS.contains(t));
        let Some(first) = tokens.next() else {
            return Ok(());
        };
        let binary = first.rsplit('/').next().unwrap_or(first).to_lowercase();
        let rest: Vec<&str> = tokens.collect();

        if self.interactive.contains(&binary) {
            return Err(VetoReason::InteractiveCommand { binary });
        }
        if rest.is_empty() && self.repl.contains(&binary) {
            return Err(VetoReason::InteractiveCommand { binary });
        }
        if binary == "git" && opens_git_editor(&rest) {
            return Err(VetoReason::InteractiveCommand {
                binary: format!("git {}", rest.first().copied().unwrap_or_default()),
            });
        }
        Ok(())
    }

    pub fn check_push_branch(&self, branch: &str) -> Result<(), VetoReason> {
        let name = branch.trim();
        let short = name.strip_prefix("refs/heads/").unwrap_or(name);
        if self.protected_branches.contains(&short.to_lowercase()) {
            return Err(VetoReason::ProtectedBranch {
                branch: short.to_string(),
            });
        }
        Ok(())
    }
}

fn is_env_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

/// 会拉起编辑器或交互式选择的 git 子命令
fn opens_git_editor(args: &[&str]) -> bool {
    let has = |flag: &str| args.iter().any(|a| *a == flag);
    match args.first().copied() {
        Some("commit") => {
            let has_message = has("-m")
                || has("-F")
                || has("--no-edit")
                || args
                    .iter()
                    .any(|a| a.starts_with("--message") || a.starts_with("-am"));
            !has_message
        }
        Some("rebase") => has("-i") || has("--interactive"),
        Some("add") => has("-i") || has("-p") || has("--interactive") || has("--patch"),
        Some("merge") => !(has("--no-edit") || has("-m") || has("--ff-only")),
        _ => false,
    }
}

/// 写文件内容是否为占位（模型常用 "# ..." 省略其余代码）
pub fn is_placeholder_content(content: &str) -> bool {
    let trimmed = content.trim();
    trimmed.is_empty() || trimmed == "..." || placeholder_pattern().is_match(content)
}
