//! list_outdated_packages：调用包管理器列出可升级依赖
//!
//! 默认命令 `pip list --outdated --format=json`，输出统一为 `[{name, version, latest}]`。

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

pub const DEFAULT_OUTDATED_COMMAND: &[&str] = &["pip", "list", "--outdated", "--format=json"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutdatedPackage {
    pub name: String,
    pub version: String,
    #[serde(alias = "latest_version")]
    pub latest: String,
}

/// 解析包管理器输出；stdout 前可能混有告警行，取第一个 `[` 起的 JSON
pub fn parse_outdated(stdout: &str) -> Result<Vec<OutdatedPackage>, AgentError> {
    let start = stdout.find('[').ok_or_else(|| {
        AgentError::ExecutionFailure(format!(
            "Unexpected package manager output: {}",
            stdout.trim()
        ))
    })?;
    serde_json::from_str(stdout[start..].trim())
        .map_err(|e| AgentError::ExecutionFailure(format!("Cannot parse outdated list: {}", e)))
}

/// PEP 503 风格的名称比较：大小写、`-`、`_`、`.` 不敏感
fn canonical_name(name: &str) -> String {
    name.to_lowercase().replace(['_', '.'], "-")
}

pub fn filter_packages(packages: Vec<OutdatedPackage>, name: Option<&str>) -> Vec<OutdatedPackage> {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(wanted) => {
            let wanted = canonical_name(wanted);
            packages
                .into_iter()
                .filter(|p| canonical_name(&p.name) == wanted)
                .collect()
        }
        None => packages,
    }
}

pub fn render(packages: &[OutdatedPackage]) -> String {
    serde_json::to_string_pretty(packages).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIP_OUTPUT: &str = r#"[{"name": "requests", "version": "2.25.1", "latest_version": "2.32.3", "latest_filetype": "wheel"}, {"name": "typing_extensions", "version": "4.0.0", "latest_version": "4.12.2", "latest_filetype": "wheel"}]"#;

    #[test]
    fn test_parse_pip_output() {
        let pkgs = parse_outdated(PIP_OUTPUT).unwrap();
        assert_eq!(pkgs.len(), 2);
        assert_eq!(
            pkgs[0],
            OutdatedPackage {
                name: "requests".into(),
                version: "2.25.1".into(),
                latest: "2.32.3".into()
            }
        );
    }

    #[test]
    fn test_parse_with_leading_warning() {
        let out = format!("WARNING: You are using pip version 21.0\n{}", PIP_OUTPUT);
        assert_eq!(parse_outdated(&out).unwrap().len(), 2);
        assert!(parse_outdated("ERROR: no pip").is_err());
    }

    #[test]
    fn test_filter_by_canonical_name() {
        let pkgs = parse_outdated(PIP_OUTPUT).unwrap();
        let filtered = filter_packages(pkgs.clone(), Some("Typing-Extensions"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].latest, "4.12.2");
        assert_eq!(filter_packages(pkgs, Some("  ")).len(), 2);
    }

    #[test]
    fn test_render_uses_latest_key() {
        let pkgs = parse_outdated(PIP_OUTPUT).unwrap();
        let rendered = render(&pkgs[..1]);
        assert!(rendered.contains("\"latest\": \"2.32.3\""));
        assert!(!rendered.contains("latest_version"));
    }
}
