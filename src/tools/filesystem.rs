//! 沙箱文件工具：read_file / write_file / list_files
//!
//! 所有路径经 WorkspaceRoot::resolve 校验，越界直接拒绝，不产生任何写入。
//! write_file 分两步：prepare_write 只做校验，commit_write 才落盘，中间留给调用方做语法检查。

use std::path::PathBuf;

use walkdir::{DirEntry, WalkDir};

use crate::core::AgentError;
use crate::tools::workspace::WorkspaceRoot;

/// list_files 最多返回的条目数
const MAX_LIST_ENTRIES: usize = 500;

pub fn read_file(ws: &WorkspaceRoot, path: &str) -> Result<String, AgentError> {
    let resolved = ws.resolve(path)?;
    if !resolved.is_file() {
        return Err(AgentError::ExecutionFailure(format!("File not found: {}", path)));
    }
    std::fs::read_to_string(&resolved)
        .map_err(|e| AgentError::ExecutionFailure(format!("Read failed for {}: {}", path, e)))
}

/// 待写入的文件：路径已校验、内容已清理，尚未落盘
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub resolved: PathBuf,
    pub content: String,
}

/// 校验路径并清理内容，不触碰文件系统
pub fn prepare_write(ws: &WorkspaceRoot, path: &str, content: &str) -> Result<PendingWrite, AgentError> {
    let resolved = ws.resolve(path)?;
    if resolved.is_dir() {
        return Err(AgentError::ExecutionFailure(format!(
            "{} is a directory, not a file",
            path
        )));
    }
    Ok(PendingWrite {
        resolved,
        content: clean_content(content),
    })
}

/// 写入完整文件内容；父目录不存在时创建
pub fn commit_write(ws: &WorkspaceRoot, path: &str, pending: &PendingWrite) -> Result<String, AgentError> {
    if let Some(parent) = pending.resolved.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            AgentError::ExecutionFailure(format!("Cannot create directory for {}: {}", path, e))
        })?;
    }
    std::fs::write(&pending.resolved, pending.content.as_bytes())
        .map_err(|e| AgentError::ExecutionFailure(format!("Write failed for {}: {}", path, e)))?;
    let shown = ws.display(&pending.resolved);
    tracing::info!(path = %shown, bytes = pending.content.len(), "file written");
    Ok(format!("Wrote {} bytes to {}", pending.content.len(), shown))
}

/// 递归列出目录，目录名以 `/` 结尾；默认跳过隐藏文件，.git 始终跳过
pub fn list_files(
    ws: &WorkspaceRoot,
    path: &str,
    max_depth: u32,
    include_hidden: bool,
) -> Result<String, AgentError> {
    let base = ws.resolve(path)?;
    if !base.is_dir() {
        return Err(AgentError::ExecutionFailure(format!("Not a directory: {}", path)));
    }

    let walker = WalkDir::new(&base)
        .min_depth(1)
        .max_depth(max_depth.max(1) as usize)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || keep_entry(e, include_hidden));

    let mut entries = Vec::new();
    let mut skipped = 0usize;
    for entry in walker {
        let entry = entry.map_err(|e| AgentError::ExecutionFailure(format!("List failed: {}", e)))?;
        if entries.len() >= MAX_LIST_ENTRIES {
            skipped += 1;
            continue;
        }
        let mut name = ws.display(entry.path());
        if entry.file_type().is_dir() {
            name.push('/');
        }
        entries.push(name);
    }

    if entries.is_empty() {
        return Ok(format!("{} is empty", ws.display(&base)));
    }
    let mut out = entries.join("\n");
    if skipped > 0 {
        out.push_str(&format!("\n... ({} more entries not shown)", skipped));
    }
    Ok(out)
}

fn keep_entry(entry: &DirEntry, include_hidden: bool) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name == ".git" {
        return false;
    }
    include_hidden || !name.starts_with('.')
}

/// 去掉模型常加的 Markdown 代码围栏；整段内容无真实换行却含字面量 `\n` 时还原换行
pub fn clean_content(content: &str) -> String {
    let mut text = content;
    let trimmed = text.trim();
    if trimmed.starts_with("```") && trimmed.ends_with("```") && trimmed.len() >= 6 {
        let inner = &trimmed[3..trimmed.len() - 3];
        // 第一行是语言标记（可能为空）
        text = match inner.split_once('\n') {
            Some((_lang, body)) => body,
            None => inner,
        };
    }
    if !text.contains('\n') && text.contains("\\n") {
        return text.replace("\\n", "\n").replace("\\t", "\t");
    }
    text.to_string()
}
