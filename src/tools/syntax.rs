//! Python 语法检查
//!
//! write_file / replace_in_file 写入 `.py` 之前，把候选内容放到 workspace 根下的临时文件，
//! 经 CommandRunner 在沙箱里用 `ast.parse` 解析（不生成 `__pycache__`）。
//! 只有输出里确实是语法错误才拒绝写入；解释器缺失等情况放行。

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

/// 检查命令，临时文件的相对路径追加在最后
pub const PYTHON_SYNTAX_CHECK: &[&str] = &[
    "python3",
    "-c",
    "import ast, sys; ast.parse(open(sys.argv[1], encoding='utf-8').read(), sys.argv[1])",
];

/// 临时文件名前缀（位于 workspace 根下，检查后删除）
pub const SCRATCH_PREFIX: &str = ".upgrader-syntax-";

fn error_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(SyntaxError|IndentationError|TabError): (.*)$").expect("static regex")
    })
}

fn line_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r", line (\d+)").expect("static regex"))
}

pub fn is_python(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "py")
}

pub fn scratch_name() -> String {
    format!("{}{}.py", SCRATCH_PREFIX, Uuid::new_v4().simple())
}

/// 从解释器输出提取 `SyntaxError on line N: msg`；不是语法错误返回 None
pub fn syntax_error_summary(output: &str) -> Option<String> {
    let caps = error_pattern().captures_iter(output).last()?;
    let whole = caps.get(0)?;
    let kind = &caps[1];
    let message = caps[2].trim();
    // traceback 里最后一个 `, line N` 就是出错位置
    let line = line_pattern()
        .captures_iter(&output[..whole.start()])
        .last()
        .map(|c| c[1].to_string());
    Some(match line {
        Some(line) => format!("{} on line {}: {}", kind, line, message),
        None => format!("{}: {}", kind, message),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_names_the_failing_line() {
        let stderr = "Traceback (most recent call last):\n  File \"<string>\", line 1, in <module>\n  File \"/usr/lib/python3.11/ast.py\", line 50, in parse\n  File \".upgrader-syntax-1.py\", line 3\n    def f(:\n          ^\nSyntaxError: invalid syntax\n";
        assert_eq!(
            syntax_error_summary(stderr).as_deref(),
            Some("SyntaxError on line 3: invalid syntax")
        );
    }

    #[test]
    fn test_other_failures_are_not_syntax_errors() {
        assert_eq!(syntax_error_summary("sh: 1: python3: not found"), None);
        assert_eq!(
            syntax_error_summary("UnicodeDecodeError: 'utf-8' codec can't decode byte 0xff"),
            None
        );
    }

    #[test]
    fn test_is_python() {
        assert!(is_python(Path::new("src/app.py")));
        assert!(!is_python(Path::new("requirements.txt")));
        assert!(!is_python(Path::new("setup.pyc")));
    }
}
