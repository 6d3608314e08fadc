//! replace_in_file：按文本片段修改文件
//!
//! 先精确匹配（替换第一处）；失败后按行做缩进容忍匹配，替换文本按命中位置的缩进重新对齐。

use std::path::PathBuf;

use crate::core::AgentError;
use crate::tools::workspace::WorkspaceRoot;

/// 诊断信息中展示的搜索文本最大长度
const SEARCH_PREVIEW_CHARS: usize = 200;

/// 一次成功的替换
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub content: String,
    /// 命中位置的起始行号（1 起）
    pub line: usize,
    pub indentation_tolerant: bool,
    /// 精确匹配时文件中出现的总次数
    pub occurrences: usize,
}

/// 纯函数：在 content 中查找 search 并替换；找不到返回 None
pub fn apply_replacement(content: &str, search: &str, replace: &str) -> Option<Replacement> {
    if search.trim().is_empty() {
        return None;
    }

    if let Some(pos) = content.find(search) {
        let new_content = format!(
            "{}{}{}",
            &content[..pos],
            replace,
            &content[pos + search.len()..]
        );
        return Some(Replacement {
            content: new_content,
            line: content[..pos].matches('\n').count() + 1,
            indentation_tolerant: false,
            occurrences: content.matches(search).count(),
        });
    }

    let (start, len, indent) = find_with_indentation_tolerance(content, search)?;
    let lines: Vec<&str> = content.split('\n').collect();
    let reindented: Vec<String> = dedent(replace)
        .into_iter()
        .map(|line| {
            if line.is_empty() {
                line
            } else {
                format!("{}{}", indent, line)
            }
        })
        .collect();

    let mut out: Vec<String> = Vec::with_capacity(lines.len() + reindented.len());
    out.extend(lines[..start].iter().map(|l| l.to_string()));
    out.extend(reindented);
    out.extend(lines[start + len..].iter().map(|l| l.to_string()));
    Some(Replacement {
        content: out.join("\n"),
        line: start + 1,
        indentation_tolerant: true,
        occurrences: 1,
    })
}

/// 逐行比较（忽略首尾空白）；返回 (起始行, 行数, 命中首行的缩进)
fn find_with_indentation_tolerance(content: &str, search: &str) -> Option<(usize, usize, String)> {
    let wanted: Vec<&str> = trim_blank_edges(search.lines().collect())
        .into_iter()
        .map(str::trim)
        .collect();
    if wanted.is_empty() {
        return None;
    }

    let lines: Vec<&str> = content.split('\n').collect();
    if lines.len() < wanted.len() {
        return None;
    }
    for i in 0..=(lines.len() - wanted.len()) {
        let matched = wanted
            .iter()
            .enumerate()
            .all(|(j, w)| lines[i + j].trim() == *w);
        if matched {
            let first = lines[i];
            let indent: String = first
                .chars()
                .take_while(|c| *c == ' ' || *c == '\t')
                .collect();
            return Some((i, wanted.len(), indent));
        }
    }
    None
}

fn trim_blank_edges(mut lines: Vec<&str>) -> Vec<&str> {
    while lines.first().is_some_and(|l| l.trim().is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    lines
}

/// 去掉公共前导缩进，保留相对缩进；空白行变为空串
fn dedent(text: &str) -> Vec<String> {
    let lines = trim_blank_edges(text.lines().collect());
    let common = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.chars().take_while(|c| *c == ' ' || *c == '\t').count())
        .min()
        .unwrap_or(0);
    lines
        .into_iter()
        .map(|l| {
            if l.trim().is_empty() {
                String::new()
            } else {
                l.chars().skip(common).collect::<String>().trim_end().to_string()
            }
        })
        .collect()
}

fn preview(text: &str) -> String {
    if text.chars().count() > SEARCH_PREVIEW_CHARS {
        format!("{}...", text.chars().take(SEARCH_PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 已算出替换结果、尚未写回的编辑
#[derive(Debug, Clone)]
pub struct PendingEdit {
    pub resolved: PathBuf,
    pub edit: Replacement,
}

/// 读取文件并计算替换结果；找不到搜索文本时报错，文件保持原样
pub fn prepare_replacement(
    ws: &WorkspaceRoot,
    path: &str,
    search_text: &str,
    replace_text: &str,
) -> Result<PendingEdit, AgentError> {
    let resolved = ws.resolve(path)?;
    if !resolved.is_file() {
        return Err(AgentError::ExecutionFailure(format!("File not found: {}", path)));
    }
    let content = std::fs::read_to_string(&resolved)
        .map_err(|e| AgentError::ExecutionFailure(format!("Read failed for {}: {}", path, e)))?;

    let Some(edit) = apply_replacement(&content, search_text, replace_text) else {
        return Err(AgentError::ExecutionFailure(format!(
            "Text to replace not found in {}: {:?}. Read the file and copy the exact text to replace.",
            path,
            preview(search_text)
        )));
    };
    Ok(PendingEdit { resolved, edit })
}

pub fn commit_replacement(ws: &WorkspaceRoot, path: &str, pending: &PendingEdit) -> Result<String, AgentError> {
    let edit = &pending.edit;
    std::fs::write(&pending.resolved, edit.content.as_bytes())
        .map_err(|e| AgentError::ExecutionFailure(format!("Write failed for {}: {}", path, e)))?;
    let shown = ws.display(&pending.resolved);
    tracing::info!(
        path = %shown,
        line = edit.line,
        tolerant = edit.indentation_tolerant,
        "file edited"
    );

    let mut message = format!("Replaced text in {} at line {}", shown, edit.line);
    if edit.indentation_tolerant {
        message.push_str(" (with indentation tolerance)");
    }
    if edit.occurrences > 1 {
        message.push_str(&format!(
            "; {} occurrences found, only the first was replaced",
            edit.occurrences
        ));
    }
    Ok(message)
}
