//! WorkspaceRoot：所有工具唯一可触及的目录
//!
//! 路径先做纯词法规整（剥离容器挂载前缀、消解 `.` 与 `..`），再解析最深的已存在祖先的符号链接，
//! 结果必须仍在根目录之下，否则整体拒绝，绝不部分执行。

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::core::AgentError;

/// 纯词法解析：返回相对根目录的规整路径；越界、`~`、非根下绝对路径返回 None。无 I/O。
pub fn lexical_relative(raw: &str, root: &Path, mount_alias: Option<&str>) -> Option<PathBuf> {
    let raw = raw.trim();
    if raw.starts_with('~') {
        return None;
    }
    let path = Path::new(raw);
    let relative: &Path = if path.is_absolute() {
        let alias_stripped = mount_alias.and_then(|alias| path.strip_prefix(alias).ok());
        alias_stripped.or_else(|| path.strip_prefix(root).ok())?
    } else {
        path
    };

    let mut out = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

/// 沙箱根目录：绑定已规范化的根路径，resolve 校验路径在根下
#[derive(Debug, Clone)]
pub struct WorkspaceRoot {
    root: PathBuf,
    mount_alias: Option<String>,
}

impl WorkspaceRoot {
    /// 根目录不存在时创建；mount_alias 为容器内的挂载点（如 /workspace）
    pub fn new(root: impl AsRef<Path>, mount_alias: Option<String>) -> Result<Self, AgentError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| {
            AgentError::Config(format!("cannot create workspace {}: {}", root.display(), e))
        })?;
        let root = root.canonicalize().map_err(|e| {
            AgentError::Config(format!("cannot resolve workspace {}: {}", root.display(), e))
        })?;
        Ok(Self { root, mount_alias })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn mount_alias(&self) -> Option<&str> {
        self.mount_alias.as_deref()
    }

    /// 解析工具参数中的路径；目标可以尚不存在（写文件、clone 目标）
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, AgentError> {
        let escape = || AgentError::PathEscape(raw.to_string());
        let relative =
            lexical_relative(raw, &self.root, self.mount_alias.as_deref()).ok_or_else(escape)?;
        let full = self.root.join(&relative);

        // 找到最深的已存在祖先（悬空符号链接也算存在，随后 canonicalize 会失败）
        let mut probe = full.as_path();
        let mut tail: Vec<OsString> = Vec::new();
        while std::fs::symlink_metadata(probe).is_err() {
            match (probe.parent(), probe.file_name()) {
                (Some(parent), Some(name)) => {
                    tail.push(name.to_os_string());
                    probe = parent;
                }
                _ => return Err(escape()),
            }
        }
        let mut resolved = probe.canonicalize().map_err(|_| escape())?;
        if !resolved.starts_with(&self.root) {
            return Err(escape());
        }
        for name in tail.iter().rev() {
            resolved.push(name);
        }
        Ok(resolved)
    }

    /// 展示用：根目录下的相对路径
    pub fn display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexical_relative() {
        let root = Path::new("/srv/ws");
        let alias = Some("/workspace");
        assert_eq!(lexical_relative("a/b.txt", root, alias), Some(PathBuf::from("a/b.txt")));
        assert_eq!(lexical_relative("./a/../b", root, alias), Some(PathBuf::from("b")));
        assert_eq!(lexical_relative("/workspace/req.txt", root, alias), Some(PathBuf::from("req.txt")));
        assert_eq!(lexical_relative("/srv/ws/x", root, alias), Some(PathBuf::from("x")));
        assert_eq!(lexical_relative(".", root, alias), Some(PathBuf::new()));
        assert_eq!(lexical_relative("../etc/passwd", root, alias), None);
        assert_eq!(lexical_relative("a/../../x", root, alias), None);
        assert_eq!(lexical_relative("/etc/passwd", root, alias), None);
        assert_eq!(lexical_relative("/workspacefoo", root, alias), None);
        assert_eq!(lexical_relative("~/.ssh/id_rsa", root, alias), None);
    }

    #[test]
    fn test_resolve_new_file_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceRoot::new(dir.path(), None).unwrap();
        let p = ws.resolve("new/dir/file.txt").unwrap();
        assert!(p.starts_with(ws.path()));
        assert_eq!(ws.display(&p), "new/dir/file.txt");
    }

    #[test]
    fn test_resolve_rejects_parent_escape() {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceRoot::new(dir.path().join("root"), None).unwrap();
        assert!(matches!(ws.resolve("../outside.txt"), Err(AgentError::PathEscape(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        let ws = WorkspaceRoot::new(dir.path().join("root"), None).unwrap();
        std::os::unix::fs::symlink(&outside, ws.path().join("link")).unwrap();

        assert!(matches!(ws.resolve("link/secret.txt"), Err(AgentError::PathEscape(_))));
        assert!(matches!(ws.resolve("link"), Err(AgentError::PathEscape(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_dangling_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceRoot::new(dir.path().join("root"), None).unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing"), ws.path().join("dangling")).unwrap();
        assert!(ws.resolve("dangling").is_err());
    }

    #[test]
    fn test_mount_alias_maps_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceRoot::new(dir.path(), Some("/workspace".into())).unwrap();
        let p = ws.resolve("/workspace/requirements.txt").unwrap();
        assert_eq!(p, ws.path().join("requirements.txt"));
    }
}
