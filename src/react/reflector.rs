//! Safety Reflector：在规范化之前对 Action 做快速本地否决
//!
//! 纯同步、无 I/O。按字段的安全角色（经同义词解析）定位命令、路径、推送分支与写入内容，
//! 交给 CommandPolicy / 词法路径检查 / 占位内容检查。

use std::path::PathBuf;

use serde_json::Value;

use crate::tools::call::Action;
use crate::tools::policy::{is_placeholder_content, CommandPolicy, VetoReason};
use crate::tools::registry::{fold_key, FieldRole, ToolKind};
use crate::tools::workspace::lexical_relative;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Veto(VetoReason),
}

pub struct Reflector {
    policy: CommandPolicy,
    root: PathBuf,
    mount_alias: Option<String>,
}

impl Reflector {
    pub fn new(policy: CommandPolicy, root: impl Into<PathBuf>, mount_alias: Option<String>) -> Self {
        Self {
            policy,
            root: root.into(),
            mount_alias,
        }
    }

    /// 未知工具放行，由 Normalizer 报告
    pub fn inspect(&self, action: &Action) -> Verdict {
        let Some(kind) = ToolKind::resolve(&action.tool_name) else {
            return Verdict::Allow;
        };
        let schema = kind.schema();

        let mut content_path: Option<&str> = None;
        let mut content: Option<&str> = None;
        for (key, value) in &action.arguments {
            let Some(field) = schema.field_for_key(&fold_key(key)) else {
                continue;
            };
            let Value::String(text) = value else {
                continue;
            };
            let verdict = match field.role {
                FieldRole::Plain => Ok(()),
                FieldRole::Command => self.policy.check_command(text),
                FieldRole::PushBranch => self.policy.check_push_branch(text),
                FieldRole::Path => {
                    if kind == ToolKind::WriteFile {
                        content_path = Some(text);
                    }
                    self.check_path(text)
                }
                FieldRole::FileContent => {
                    content = Some(text);
                    Ok(())
                }
            };
            if let Err(reason) = verdict {
                return self.veto(kind, reason);
            }
        }

        if let Some(text) = content {
            if is_placeholder_content(text) {
                return self.veto(
                    kind,
                    VetoReason::PlaceholderContent {
                        path: content_path.unwrap_or("?").to_string(),
                    },
                );
            }
        }
        Verdict::Allow
    }

    fn check_path(&self, raw: &str) -> Result<(), VetoReason> {
        match lexical_relative(raw, &self.root, self.mount_alias.as_deref()) {
            Some(_) => Ok(()),
            None => Err(VetoReason::PathEscape {
                path: raw.to_string(),
            }),
        }
    }

    fn veto(&self, kind: ToolKind, reason: VetoReason) -> Verdict {
        if reason.is_security_event() {
            tracing::warn!(target: "security", tool = %kind, reason = %reason, "action vetoed");
        } else {
            tracing::info!(tool = %kind, reason = %reason, "action vetoed");
        }
        Verdict::Veto(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reflector() -> Reflector {
        Reflector::new(CommandPolicy::default(), "/srv/ws", Some("/workspace".into()))
    }

    #[test]
    fn test_interactive_command_vetoed_via_alias_and_synonym() {
        let r = reflector();
        let verdict = r.inspect(&Action::from_json("cmd", json!({"cmd": "nano requirements.txt"})));
        assert!(matches!(verdict, Verdict::Veto(VetoReason::InteractiveCommand { .. })));
    }

    #[test]
    fn test_paths_checked_lexically() {
        let r = reflector();
        assert!(matches!(
            r.inspect(&Action::from_json("read_file", json!({"filename": "/etc/passwd"}))),
            Verdict::Veto(VetoReason::PathEscape { .. })
        ));
        assert!(matches!(
            r.inspect(&Action::from_json("replace_in_file", json!({"path": "../x.py", "search_text": "a", "replace_text": "b"}))),
            Verdict::Veto(VetoReason::PathEscape { .. })
        ));
        assert_eq!(
            r.inspect(&Action::from_json("read_file", json!({"path": "/workspace/app.py"}))),
            Verdict::Allow
        );
    }

    #[test]
    fn test_protected_branch_push_vetoed() {
        let r = reflector();
        assert!(matches!(
            r.inspect(&Action::from_json("git_push", json!({"branch": "master"}))),
            Verdict::Veto(VetoReason::ProtectedBranch { .. })
        ));
        assert_eq!(
            r.inspect(&Action::from_json("git_push", json!({"branch_name": "feat/deps"}))),
            Verdict::Allow
        );
    }

    #[test]
    fn test_placeholder_write_vetoed() {
        let r = reflector();
        let verdict = r.inspect(&Action::from_json(
            "write_file",
            json!({"path": "app.py", "content": "import requests\n# ... rest of the code\n"}),
        ));
        assert_eq!(
            verdict,
            Verdict::Veto(VetoReason::PlaceholderContent { path: "app.py".into() })
        );
    }

    #[test]
    fn test_unknown_tool_and_malformed_args_pass_through() {
        let r = reflector();
        assert_eq!(r.inspect(&Action::from_json("teleport", json!({"to": "/"}))), Verdict::Allow);
        assert_eq!(
            r.inspect(&Action::from_json("run_shell_command", json!({"command": ["vim"]}))),
            Verdict::Allow
        );
    }
}
