//! 参数规范化：把模型给出的松散参数映射到目标工具的规范 schema，或拒绝
//!
//! - 参数名折叠（大小写、camelCase、连字符）后查规范名与同义词表
//! - 无歧义时做类型转换（数字→字符串、字符串→整数/布尔），否则拒绝
//! - 缺少必需字段时精确列出缺失字段；未知字段丢弃并记录
//! - 参数形状明显属于另一个工具时报告意图不匹配，不做猜测

use std::collections::HashMap;

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::tools::call::{Action, NormalizedCall, ToolCall};
use crate::tools::registry::{fold_key, FieldSpec, FieldType, ToolKind, ToolSchema};

/// 规范化失败：调用从未执行，诊断交还推理循环
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("Unknown tool '{name}'. Available tools: {}", .known.join(", "))]
    UnknownTool { name: String, known: Vec<String> },

    #[error("{tool} is missing required field(s): {}. Expected {expected}", .missing.join(", "))]
    MissingFields {
        tool: ToolKind,
        missing: Vec<String>,
        expected: String,
    },

    #[error("{tool}: field '{field}' must be {expected}, got {found}")]
    InvalidType {
        tool: ToolKind,
        field: String,
        expected: &'static str,
        found: String,
    },

    #[error(
        "{tool} was called with arguments shaped like {likely} (missing {}). Call {likely} explicitly if that was the intent. Expected {expected}",
        .missing.join(", ")
    )]
    IntentMismatch {
        tool: ToolKind,
        likely: ToolKind,
        missing: Vec<String>,
        expected: String,
    },
}

impl NormalizationError {
    /// 缺失的规范字段名（MissingFields / IntentMismatch）
    pub fn missing_fields(&self) -> &[String] {
        match self {
            NormalizationError::MissingFields { missing, .. }
            | NormalizationError::IntentMismatch { missing, .. } => missing,
            _ => &[],
        }
    }
}

/// 先按工具名（含别名）找到 schema，再规范化
pub fn normalize_action(action: &Action) -> Result<NormalizedCall, NormalizationError> {
    let kind = ToolKind::resolve(&action.tool_name).ok_or_else(|| {
        NormalizationError::UnknownTool {
            name: action.tool_name.clone(),
            known: ToolKind::names().into_iter().map(String::from).collect(),
        }
    })?;
    normalize(action, kind.schema())
}

/// 按给定 schema 规范化 Action 的参数
pub fn normalize(action: &Action, schema: &ToolSchema) -> Result<NormalizedCall, NormalizationError> {
    let mut canonical: Map<String, Value> = Map::new();
    // 记录每个规范字段的值来自规范名（true）还是同义词（false）
    let mut from_canonical: HashMap<&'static str, (bool, String)> = HashMap::new();
    let mut dropped: Vec<String> = Vec::new();

    for (raw_key, value) in &action.arguments {
        if value.is_null() {
            continue;
        }
        let folded = fold_key(raw_key);
        let Some(field) = schema.field_for_key(&folded) else {
            dropped.push(raw_key.clone());
            continue;
        };
        let is_canonical = folded == field.name;
        match from_canonical.get(field.name) {
            Some((true, _)) => {
                dropped.push(raw_key.clone());
                continue;
            }
            // 两个同义词争同一字段：保留先到的
            Some((false, _)) if !is_canonical => {
                dropped.push(raw_key.clone());
                continue;
            }
            Some((false, previous)) => dropped.push(previous.clone()),
            None => {}
        }
        let coerced = coerce(schema.kind, field, value)?;
        canonical.insert(field.name.to_string(), coerced);
        from_canonical.insert(field.name, (is_canonical, raw_key.clone()));
    }

    let missing: Vec<String> = schema
        .required_fields()
        .filter(|f| !canonical.contains_key(f.name))
        .map(|f| f.name.to_string())
        .collect();

    if !missing.is_empty() {
        let expected = schema.signature();
        // 只有参数与声明工具的字段毫无交集时，才判断为选错了工具
        let intent = if canonical.is_empty() {
            likely_intent(schema.kind, &action.arguments)
        } else {
            None
        };
        if let Some(likely) = intent {
            return Err(NormalizationError::IntentMismatch {
                tool: schema.kind,
                likely,
                missing,
                expected,
            });
        }
        return Err(NormalizationError::MissingFields {
            tool: schema.kind,
            missing,
            expected,
        });
    }

    if !dropped.is_empty() {
        tracing::debug!(tool = %schema.kind, dropped = ?dropped, "dropped unknown arguments");
    }

    let call = build_call(schema.kind, canonical)?;
    Ok(NormalizedCall {
        call,
        dropped_fields: dropped,
    })
}

/// 参数是否完整满足另一个工具的全部必需字段；取满足字段最多的那个
fn likely_intent(declared: ToolKind, arguments: &Map<String, Value>) -> Option<ToolKind> {
    let folded: Vec<String> = arguments
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, _)| fold_key(k))
        .collect();

    ToolKind::ALL
        .into_iter()
        .filter(|k| *k != declared)
        .filter_map(|k| {
            let schema = k.schema();
            let required: Vec<&FieldSpec> = schema.required_fields().collect();
            if required.is_empty() {
                return None;
            }
            let satisfied = required.iter().all(|f| {
                folded
                    .iter()
                    .any(|key| schema.field_for_key(key).map(|spec| spec.name) == Some(f.name))
            });
            satisfied.then_some((k, required.len()))
        })
        .fold(None, |best: Option<(ToolKind, usize)>, (k, n)| match best {
            Some((_, m)) if m >= n => best,
            _ => Some((k, n)),
        })
        .map(|(k, _)| k)
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string {s:?}"),
        Value::Array(_) => "an array".to_string(),
        Value::Object(_) => "an object".to_string(),
    }
}

fn coerce(tool: ToolKind, field: &FieldSpec, value: &Value) -> Result<Value, NormalizationError> {
    let invalid = || NormalizationError::InvalidType {
        tool,
        field: field.name.to_string(),
        expected: field.ty.as_str(),
        found: describe(value),
    };

    match field.ty {
        FieldType::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(invalid()),
        },
        FieldType::Integer => match value {
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Ok(Value::Number(Number::from(u)))
                } else if let Some(f) = n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0) {
                    Ok(Value::Number(Number::from(f as u64)))
                } else {
                    Err(invalid())
                }
            }
            Value::String(s) => s
                .trim()
                .parse::<u64>()
                .map(|u| Value::Number(Number::from(u)))
                .map_err(|_| invalid()),
            _ => Err(invalid()),
        },
        FieldType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "0" => Ok(Value::Bool(false)),
                _ => Err(invalid()),
            },
            Value::Number(n) => match n.as_u64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        },
    }
}

fn build_call(kind: ToolKind, args: Map<String, Value>) -> Result<ToolCall, NormalizationError> {
    let value = Value::Object(args);
    let unrepresentable = |e: serde_json::Error| NormalizationError::InvalidType {
        tool: kind,
        field: "arguments".to_string(),
        expected: "values matching the tool schema",
        found: e.to_string(),
    };
    let call = match kind {
        ToolKind::GitClone => ToolCall::GitClone(serde_json::from_value(value).map_err(unrepresentable)?),
        ToolKind::GitCreateBranch => {
            ToolCall::GitCreateBranch(serde_json::from_value(value).map_err(unrepresentable)?)
        }
        ToolKind::GitCommit => ToolCall::GitCommit(serde_json::from_value(value).map_err(unrepresentable)?),
        ToolKind::GitPush => ToolCall::GitPush(serde_json::from_value(value).map_err(unrepresentable)?),
        ToolKind::ListOutdatedPackages => {
            ToolCall::ListOutdatedPackages(serde_json::from_value(value).map_err(unrepresentable)?)
        }
        ToolKind::ListFiles => ToolCall::ListFiles(serde_json::from_value(value).map_err(unrepresentable)?),
        ToolKind::ReadFile => ToolCall::ReadFile(serde_json::from_value(value).map_err(unrepresentable)?),
        ToolKind::WriteFile => ToolCall::WriteFile(serde_json::from_value(value).map_err(unrepresentable)?),
        ToolKind::ReplaceInFile => {
            ToolCall::ReplaceInFile(serde_json::from_value(value).map_err(unrepresentable)?)
        }
        ToolKind::RunShellCommand => {
            ToolCall::RunShellCommand(serde_json::from_value(value).map_err(unrepresentable)?)
        }
        ToolKind::CreateGithubPr => {
            ToolCall::CreateGithubPr(serde_json::from_value(value).map_err(unrepresentable)?)
        }
    };
    Ok(call)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::call::{CreatePrArgs, ListFilesArgs, ShellArgs};
    use serde_json::json;

    fn pr_action(args: Value) -> Action {
        Action::from_json("create_github_pr", args)
    }

    #[test]
    fn test_synonym_matches_canonical() {
        let canonical = normalize_action(&pr_action(json!({
            "source_branch": "feat/upgrade-deps",
            "target_branch": "main",
            "title": "Upgrade requests",
            "body": "Bumps requests to 2.32.3"
        })))
        .unwrap();
        let synonyms = normalize_action(&pr_action(json!({
            "head": "feat/upgrade-deps",
            "base_branch": "main",
            "pr_title": "Upgrade requests",
            "description": "Bumps requests to 2.32.3"
        })))
        .unwrap();
        assert_eq!(canonical, synonyms);
        assert_eq!(
            canonical.call,
            ToolCall::CreateGithubPr(CreatePrArgs {
                source_branch: "feat/upgrade-deps".into(),
                target_branch: "main".into(),
                title: "Upgrade requests".into(),
                body: "Bumps requests to 2.32.3".into(),
            })
        );
    }

    #[test]
    fn test_key_casing_is_folded() {
        let call = normalize_action(&Action::from_json(
            "git_create_branch",
            json!({"BranchName": "feat/x"}),
        ))
        .unwrap();
        assert_eq!(call.kind(), ToolKind::GitCreateBranch);
        assert!(call.dropped_fields.is_empty());
    }

    #[test]
    fn test_missing_fields_named_exactly() {
        let err = normalize_action(&pr_action(json!({
            "title": "Upgrade",
            "head": "feat/x"
        })))
        .unwrap_err();
        match &err {
            NormalizationError::MissingFields { tool, missing, .. } => {
                assert_eq!(*tool, ToolKind::CreateGithubPr);
                assert_eq!(missing, &vec!["target_branch".to_string(), "body".to_string()]);
            }
            other => panic!("expected MissingFields, got {other:?}"),
        }
        assert_eq!(err.missing_fields().len(), 2);
        assert!(err.to_string().contains("create_github_pr(source_branch, target_branch, title, body)"));
    }

    #[test]
    fn test_unknown_fields_dropped_not_fatal() {
        let call = normalize_action(&Action::from_json(
            "replace_in_file",
            json!({
                "filename": "app.py",
                "old_string": "a",
                "new_string": "b",
                "line_number": 12
            }),
        ))
        .unwrap();
        assert_eq!(call.dropped_fields, vec!["line_number".to_string()]);
    }

    #[test]
    fn test_canonical_wins_over_synonym() {
        let call = normalize_action(&Action::from_json(
            "run_shell_command",
            json!({"cmd": "ls", "command": "pytest -q"}),
        ))
        .unwrap();
        assert_eq!(
            call.call,
            ToolCall::RunShellCommand(ShellArgs {
                command: "pytest -q".into(),
                timeout_secs: None
            })
        );
        assert_eq!(call.dropped_fields, vec!["cmd".to_string()]);
    }

    #[test]
    fn test_string_to_number_and_bool_coercion() {
        let call = normalize_action(&Action::from_json(
            "list_files",
            json!({"path": "src", "depth": "3", "hidden": "yes"}),
        ))
        .unwrap();
        assert_eq!(
            call.call,
            ToolCall::ListFiles(ListFilesArgs {
                path: "src".into(),
                max_depth: 3,
                include_hidden: true
            })
        );
    }

    #[test]
    fn test_number_into_string_field() {
        let call = normalize_action(&Action::from_json("git_push", json!({"branch": 42}))).unwrap();
        assert_eq!(call.call, ToolCall::GitPush(crate::tools::call::BranchArgs { branch_name: "42".into() }));
    }

    #[test]
    fn test_ambiguous_coercion_rejected() {
        let err = normalize_action(&Action::from_json(
            "run_shell_command",
            json!({"command": "pytest", "timeout": "soon"}),
        ))
        .unwrap_err();
        assert!(matches!(err, NormalizationError::InvalidType { ref field, .. } if field == "timeout_secs"));

        let err = normalize_action(&Action::from_json(
            "run_shell_command",
            json!({"command": ["pytest", "-q"]}),
        ))
        .unwrap_err();
        assert!(matches!(err, NormalizationError::InvalidType { .. }));
    }

    #[test]
    fn test_shell_with_edit_shape_is_intent_mismatch() {
        let err = normalize_action(&Action::from_json(
            "run_shell_command",
            json!({"path": "app.py", "search_text": "a", "replace_text": "b"}),
        ))
        .unwrap_err();
        match err {
            NormalizationError::IntentMismatch { tool, likely, missing, .. } => {
                assert_eq!(tool, ToolKind::RunShellCommand);
                assert_eq!(likely, ToolKind::ReplaceInFile);
                assert_eq!(missing, vec!["command".to_string()]);
            }
            other => panic!("expected IntentMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_partial_call_reports_missing_fields_not_other_tool() {
        let err = normalize_action(&Action::from_json(
            "replace_in_file",
            json!({"path": "app.py", "search_text": "verify_ssl=False"}),
        ))
        .unwrap_err();
        match err {
            NormalizationError::MissingFields { tool, missing, .. } => {
                assert_eq!(tool, ToolKind::ReplaceInFile);
                assert_eq!(missing, vec!["replace_text".to_string()]);
            }
            other => panic!("expected MissingFields, got {other:?}"),
        }

        let err = normalize_action(&pr_action(json!({
            "branch": "feat/deps",
            "title": "Upgrade",
            "body": "Bump"
        })))
        .unwrap_err();
        assert!(matches!(
            err,
            NormalizationError::MissingFields { ref missing, .. } if missing == &vec!["target_branch".to_string()]
        ));
        assert!(!err.to_string().contains("git_create_branch"));
    }

    #[test]
    fn test_write_shape_prefers_most_specific_tool() {
        let err = normalize_action(&Action::from_json(
            "run_shell_command",
            json!({"file": "requirements.txt", "content": "requests==2.32.3\n"}),
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            NormalizationError::IntentMismatch { likely: ToolKind::WriteFile, .. }
        ));
    }

    #[test]
    fn test_unknown_tool() {
        let err = normalize_action(&Action::from_json("deploy_to_prod", json!({}))).unwrap_err();
        match err {
            NormalizationError::UnknownTool { name, known } => {
                assert_eq!(name, "deploy_to_prod");
                assert!(known.contains(&"git_push".to_string()));
            }
            other => panic!("expected UnknownTool, got {other:?}"),
        }
    }

    #[test]
    fn test_null_counts_as_missing() {
        let err = normalize_action(&Action::from_json("read_file", json!({"path": null}))).unwrap_err();
        assert_eq!(err.missing_fields(), ["path".to_string()]);
    }

    #[test]
    fn test_tool_without_required_fields_accepts_empty() {
        let call = normalize_action(&Action::from_json("outdated", json!({}))).unwrap();
        assert_eq!(call.kind(), ToolKind::ListOutdatedPackages);
    }
}
