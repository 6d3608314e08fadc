//! 工具注册表
//!
//! 工具集合是封闭的：ToolKind 枚举列出全部可调用操作，每个变体携带自己的参数 schema
//! （字段、类型、是否必需、同义词、安全角色）。新增工具需要新增变体，由编译器检查所有 match。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// 字段语义类型（规范化时据此做类型校验与转换）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Boolean,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
        }
    }
}

/// 字段的安全角色：Reflector 据此定位需要检查的参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Plain,
    /// 相对 WorkspaceRoot 的路径
    Path,
    /// 交给 shell 执行的命令行
    Command,
    /// 推送目标分支（受保护分支检查）
    PushBranch,
    /// 写入文件的完整内容（占位符检查）
    FileContent,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub role: FieldRole,
    /// 模型常用的错误字段名，规范化时改写为 name
    pub synonyms: &'static [&'static str],
    pub description: &'static str,
}

impl FieldSpec {
    const fn required(
        name: &'static str,
        role: FieldRole,
        synonyms: &'static [&'static str],
        description: &'static str,
    ) -> Self {
        Self {
            name,
            ty: FieldType::String,
            required: true,
            role,
            synonyms,
            description,
        }
    }

    const fn optional(
        name: &'static str,
        ty: FieldType,
        role: FieldRole,
        synonyms: &'static [&'static str],
        description: &'static str,
    ) -> Self {
        Self {
            name,
            ty,
            required: false,
            role,
            synonyms,
            description,
        }
    }
}

/// 单个工具的参数 schema
#[derive(Debug)]
pub struct ToolSchema {
    pub kind: ToolKind,
    pub fields: &'static [FieldSpec],
}

const PATH_SYNONYMS: &[&str] = &["filename", "file", "file_path", "filepath", "file_name"];
const BRANCH_SYNONYMS: &[&str] = &["branch", "name", "branch_name", "ref"];

static GIT_CLONE: ToolSchema = ToolSchema {
    kind: ToolKind::GitClone,
    fields: &[
        FieldSpec::required(
            "repo_url",
            FieldRole::Plain,
            &["url", "repo", "repository", "repository_url", "remote", "remote_url"],
            "HTTPS URL of the repository to clone",
        ),
        FieldSpec::required(
            "destination",
            FieldRole::Path,
            &["dest", "path", "directory", "dir", "target_dir", "target"],
            "Directory inside the workspace to clone into ('.' for the root)",
        ),
    ],
};

static GIT_CREATE_BRANCH: ToolSchema = ToolSchema {
    kind: ToolKind::GitCreateBranch,
    fields: &[FieldSpec::required(
        "branch_name",
        FieldRole::Plain,
        BRANCH_SYNONYMS,
        "Branch to create (or switch to if it already exists)",
    )],
};

static GIT_COMMIT: ToolSchema = ToolSchema {
    kind: ToolKind::GitCommit,
    fields: &[FieldSpec::required(
        "message",
        FieldRole::Plain,
        &["msg", "commit_message", "commit_msg", "text"],
        "Commit message; all workspace changes are staged first",
    )],
};

static GIT_PUSH: ToolSchema = ToolSchema {
    kind: ToolKind::GitPush,
    fields: &[FieldSpec::required(
        "branch_name",
        FieldRole::PushBranch,
        BRANCH_SYNONYMS,
        "Feature branch to push (protected branches are refused)",
    )],
};

static LIST_OUTDATED_PACKAGES: ToolSchema = ToolSchema {
    kind: ToolKind::ListOutdatedPackages,
    fields: &[FieldSpec::optional(
        "package_name",
        FieldType::String,
        FieldRole::Plain,
        &["package", "name", "library", "pkg"],
        "Only report this package",
    )],
};

static LIST_FILES: ToolSchema = ToolSchema {
    kind: ToolKind::ListFiles,
    fields: &[
        FieldSpec::optional(
            "path",
            FieldType::String,
            FieldRole::Path,
            &["dir", "directory", "folder"],
            "Directory to list, default '.'",
        ),
        FieldSpec::optional(
            "max_depth",
            FieldType::Integer,
            FieldRole::Plain,
            &["depth", "level", "levels"],
            "Maximum depth, default 2",
        ),
        FieldSpec::optional(
            "include_hidden",
            FieldType::Boolean,
            FieldRole::Plain,
            &["hidden", "all", "show_hidden"],
            "Include dot-files, default false",
        ),
    ],
};

static READ_FILE: ToolSchema = ToolSchema {
    kind: ToolKind::ReadFile,
    fields: &[FieldSpec::required(
        "path",
        FieldRole::Path,
        PATH_SYNONYMS,
        "File to read",
    )],
};

static WRITE_FILE: ToolSchema = ToolSchema {
    kind: ToolKind::WriteFile,
    fields: &[
        FieldSpec::required("path", FieldRole::Path, PATH_SYNONYMS, "File to (over)write"),
        FieldSpec::required(
            "content",
            FieldRole::FileContent,
            &["text", "code", "data", "contents", "body"],
            "Complete new file content",
        ),
    ],
};

static REPLACE_IN_FILE: ToolSchema = ToolSchema {
    kind: ToolKind::ReplaceInFile,
    fields: &[
        FieldSpec::required("path", FieldRole::Path, PATH_SYNONYMS, "File to edit"),
        FieldSpec::required(
            "search_text",
            FieldRole::Plain,
            &[
                "find", "search", "pattern", "old", "old_string", "old_text", "old_code",
                "original", "target",
            ],
            "Exact text to find (leading indentation is tolerated)",
        ),
        FieldSpec::required(
            "replace_text",
            FieldRole::Plain,
            &[
                "replace", "replacement", "new", "new_string", "new_text", "new_code",
                "new_line", "with",
            ],
            "Text that replaces the first match",
        ),
    ],
};

static RUN_SHELL_COMMAND: ToolSchema = ToolSchema {
    kind: ToolKind::RunShellCommand,
    fields: &[
        FieldSpec::required(
            "command",
            FieldRole::Command,
            &["cmd", "shell", "script", "command_line", "bash"],
            "Non-interactive shell command run from the workspace root",
        ),
        FieldSpec::optional(
            "timeout_secs",
            FieldType::Integer,
            FieldRole::Plain,
            &["timeout", "timeout_seconds"],
            "Per-call timeout override in seconds (capped by configuration)",
        ),
    ],
};

static CREATE_GITHUB_PR: ToolSchema = ToolSchema {
    kind: ToolKind::CreateGithubPr,
    fields: &[
        FieldSpec::required(
            "source_branch",
            FieldRole::Plain,
            &["head", "head_branch", "from", "from_branch", "branch", "branch_name"],
            "Branch containing the changes",
        ),
        FieldSpec::required(
            "target_branch",
            FieldRole::Plain,
            &["base", "base_branch", "into", "to", "to_branch"],
            "Branch to merge into",
        ),
        FieldSpec::required(
            "title",
            FieldRole::Plain,
            &["pr_title", "name", "subject", "summary"],
            "Pull request title",
        ),
        FieldSpec::required(
            "body",
            FieldRole::Plain,
            &["pr_body", "description", "desc", "details", "message"],
            "Pull request description",
        ),
    ],
};

/// 全部工具（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    GitClone,
    GitCreateBranch,
    GitCommit,
    GitPush,
    ListOutdatedPackages,
    ListFiles,
    ReadFile,
    WriteFile,
    ReplaceInFile,
    RunShellCommand,
    CreateGithubPr,
}

/// 工具名别名：模型经常用简写或同义词称呼工具
const TOOL_ALIASES: &[(&str, ToolKind)] = &[
    ("clone", ToolKind::GitClone),
    ("branch", ToolKind::GitCreateBranch),
    ("create_branch", ToolKind::GitCreateBranch),
    ("checkout", ToolKind::GitCreateBranch),
    ("commit", ToolKind::GitCommit),
    ("push", ToolKind::GitPush),
    ("outdated", ToolKind::ListOutdatedPackages),
    ("check_updates", ToolKind::ListOutdatedPackages),
    ("list_outdated", ToolKind::ListOutdatedPackages),
    ("ls", ToolKind::ListFiles),
    ("list", ToolKind::ListFiles),
    ("read", ToolKind::ReadFile),
    ("cat", ToolKind::ReadFile),
    ("write", ToolKind::WriteFile),
    ("save", ToolKind::WriteFile),
    ("create", ToolKind::WriteFile),
    ("create_file", ToolKind::WriteFile),
    ("replace", ToolKind::ReplaceInFile),
    ("edit", ToolKind::ReplaceInFile),
    ("edit_file", ToolKind::ReplaceInFile),
    ("update", ToolKind::ReplaceInFile),
    ("run_command", ToolKind::RunShellCommand),
    ("cmd", ToolKind::RunShellCommand),
    ("shell", ToolKind::RunShellCommand),
    ("bash", ToolKind::RunShellCommand),
    ("run", ToolKind::RunShellCommand),
    ("pr", ToolKind::CreateGithubPr),
    ("create_pr", ToolKind::CreateGithubPr),
    ("open_pr", ToolKind::CreateGithubPr),
    ("create_pull_request", ToolKind::CreateGithubPr),
];

impl ToolKind {
    pub const ALL: [ToolKind; 11] = [
        ToolKind::GitClone,
        ToolKind::GitCreateBranch,
        ToolKind::GitCommit,
        ToolKind::GitPush,
        ToolKind::ListOutdatedPackages,
        ToolKind::ListFiles,
        ToolKind::ReadFile,
        ToolKind::WriteFile,
        ToolKind::ReplaceInFile,
        ToolKind::RunShellCommand,
        ToolKind::CreateGithubPr,
    ];

    /// 规范工具名（JSON 中的 "tool" 字段）
    pub fn name(self) -> &'static str {
        match self {
            ToolKind::GitClone => "git_clone",
            ToolKind::GitCreateBranch => "git_create_branch",
            ToolKind::GitCommit => "git_commit",
            ToolKind::GitPush => "git_push",
            ToolKind::ListOutdatedPackages => "list_outdated_packages",
            ToolKind::ListFiles => "list_files",
            ToolKind::ReadFile => "read_file",
            ToolKind::WriteFile => "write_file",
            ToolKind::ReplaceInFile => "replace_in_file",
            ToolKind::RunShellCommand => "run_shell_command",
            ToolKind::CreateGithubPr => "create_github_pr",
        }
    }

    /// 工具描述（供 LLM 理解功能）
    pub fn description(self) -> &'static str {
        match self {
            ToolKind::GitClone => "Clone a repository into the workspace. Cloning into an existing clone is a no-op.",
            ToolKind::GitCreateBranch => "Create and switch to a branch; switches if it already exists.",
            ToolKind::GitCommit => "Stage all changes and commit them.",
            ToolKind::GitPush => "Push a feature branch to the remote. Never pushes main/master.",
            ToolKind::ListOutdatedPackages => "List outdated packages as a JSON array of {name, version, latest}.",
            ToolKind::ListFiles => "List files in the workspace (hidden entries skipped).",
            ToolKind::ReadFile => "Read the full content of a file.",
            ToolKind::WriteFile => "Overwrite a file with complete content. No placeholders.",
            ToolKind::ReplaceInFile => "Replace the first occurrence of search_text with replace_text.",
            ToolKind::RunShellCommand => "Run a non-interactive shell command; returns exit code, stdout and stderr.",
            ToolKind::CreateGithubPr => "Open a pull request; an existing PR for the branch counts as success.",
        }
    }

    pub fn schema(self) -> &'static ToolSchema {
        match self {
            ToolKind::GitClone => &GIT_CLONE,
            ToolKind::GitCreateBranch => &GIT_CREATE_BRANCH,
            ToolKind::GitCommit => &GIT_COMMIT,
            ToolKind::GitPush => &GIT_PUSH,
            ToolKind::ListOutdatedPackages => &LIST_OUTDATED_PACKAGES,
            ToolKind::ListFiles => &LIST_FILES,
            ToolKind::ReadFile => &READ_FILE,
            ToolKind::WriteFile => &WRITE_FILE,
            ToolKind::ReplaceInFile => &REPLACE_IN_FILE,
            ToolKind::RunShellCommand => &RUN_SHELL_COMMAND,
            ToolKind::CreateGithubPr => &CREATE_GITHUB_PR,
        }
    }

    /// 按名称解析工具：规范名或别名，大小写与连字符不敏感
    pub fn resolve(name: &str) -> Option<ToolKind> {
        let folded = fold_key(name);
        if folded.is_empty() {
            return None;
        }
        ToolKind::ALL
            .into_iter()
            .find(|k| k.name() == folded)
            .or_else(|| {
                TOOL_ALIASES
                    .iter()
                    .find(|(alias, _)| *alias == folded)
                    .map(|(_, kind)| *kind)
            })
    }

    pub fn names() -> Vec<&'static str> {
        ToolKind::ALL.into_iter().map(|k| k.name()).collect()
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl ToolSchema {
    /// 按（已折叠的）参数名查找字段：先规范名，再同义词
    pub fn field_for_key(&self, folded: &str) -> Option<&'static FieldSpec> {
        self.fields
            .iter()
            .find(|f| f.name == folded)
            .or_else(|| self.fields.iter().find(|f| f.synonyms.contains(&folded)))
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &'static FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }

    /// 参数 JSON Schema（供 LLM 生成正确的参数格式）
    pub fn parameters_schema(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .map(|f| {
                (
                    f.name.to_string(),
                    json!({ "type": f.ty.as_str(), "description": f.description }),
                )
            })
            .collect();
        let required: Vec<&str> = self.required_fields().map(|f| f.name).collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// 给模型看的简短签名，如 `replace_in_file(path, search_text, replace_text)`
    pub fn signature(&self) -> String {
        let args: Vec<String> = self
            .fields
            .iter()
            .map(|f| {
                if f.required {
                    f.name.to_string()
                } else {
                    format!("{}?", f.name)
                }
            })
            .collect();
        format!("{}({})", self.kind.name(), args.join(", "))
    }
}

/// 全部工具的 schema JSON，拼入 system prompt 的 Available tools 段落
pub fn catalog_json() -> String {
    let tools: Vec<Value> = ToolKind::ALL
        .into_iter()
        .map(|kind| {
            json!({
                "name": kind.name(),
                "description": kind.description(),
                "parameters": kind.schema().parameters_schema(),
            })
        })
        .collect();
    serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
}

/// 参数名折叠：camelCase / kebab-case / 空格 统一为小写 snake_case
pub fn fold_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for ch in raw.trim().chars() {
        if ch == '-' || ch == ' ' || ch == '.' {
            if !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        } else if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_key_variants() {
        assert_eq!(fold_key("branchName"), "branch_name");
        assert_eq!(fold_key("Branch-Name"), "branch_name");
        assert_eq!(fold_key("PR_TITLE"), "pr_title");
        assert_eq!(fold_key(" search text "), "search_text");
    }

    #[test]
    fn test_resolve_canonical_and_alias() {
        assert_eq!(ToolKind::resolve("run_shell_command"), Some(ToolKind::RunShellCommand));
        assert_eq!(ToolKind::resolve("cmd"), Some(ToolKind::RunShellCommand));
        assert_eq!(ToolKind::resolve("Edit-File"), Some(ToolKind::ReplaceInFile));
        assert_eq!(ToolKind::resolve("createGithubPr"), Some(ToolKind::CreateGithubPr));
        assert_eq!(ToolKind::resolve("launch_rockets"), None);
        assert_eq!(ToolKind::resolve(""), None);
    }

    #[test]
    fn test_every_schema_matches_its_kind() {
        for kind in ToolKind::ALL {
            assert_eq!(kind.schema().kind, kind);
        }
    }

    #[test]
    fn test_synonyms_do_not_shadow_canonical_names() {
        for kind in ToolKind::ALL {
            let schema = kind.schema();
            for field in schema.fields {
                for syn in field.synonyms {
                    let owner = schema.field_for_key(syn).map(|f| f.name);
                    assert!(
                        owner == Some(field.name) || schema.fields.iter().any(|f| f.name == *syn),
                        "{kind}: synonym {syn} resolves to {owner:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_parameters_schema_lists_required() {
        let schema = ToolKind::ReplaceInFile.schema().parameters_schema();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 3);
        assert_eq!(schema["properties"]["search_text"]["type"], "string");
    }

    #[test]
    fn test_signature_marks_optional() {
        assert_eq!(
            ToolKind::ListFiles.schema().signature(),
            "list_files(path?, max_depth?, include_hidden?)"
        );
    }
}
