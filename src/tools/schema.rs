//! 模型输出格式的 JSON Schema（schemars 生成），拼入 system prompt 以减少格式错误

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 一次工具调用：`{"tool": "...", "args": {...}}`
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，如 run_shell_command、replace_in_file、create_github_pr
    pub tool: String,
    /// 工具参数，字段见 Available tools 中各工具的 parameters
    pub args: HashMap<String, Value>,
}

/// 结束运行：`{"final_answer": "..."}`，应包含 PR 链接
#[allow(dead_code)]
#[derive(JsonSchema)]
struct FinalAnswerFormat {
    /// 给操作者的总结，包含 create_github_pr 返回的 PR URL
    pub final_answer: String,
}

pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

pub fn final_answer_schema_json() -> String {
    let schema = schema_for!(FinalAnswerFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schemas_name_their_fields() {
        let call = tool_call_schema_json();
        assert!(call.contains("\"tool\""));
        assert!(call.contains("\"args\""));
        assert!(final_answer_schema_json().contains("final_answer"));
    }
}
