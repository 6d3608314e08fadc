//! Planner：推理端适配与模型输出解析
//!
//! Reasoner 给出下一步（工具调用或最终回答）。Planner 是基于 LlmClient 的实现：拼接 system prompt
//! 与完整 history，调用 LLM，再由 parse_llm_output 把不可信的文本解析成 Step。
//! 支持 JSON（```json 代码块或裸 JSON，`tool|name` + `args|arguments|parameters`）与 `tool(key="v")` 调用写法。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Number, Value};

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::{history_messages, ExecutionHistory, Message};
use crate::tools::call::Action;
use crate::tools::registry::{catalog_json, ToolKind};
use crate::tools::schema::{final_answer_schema_json, tool_call_schema_json};

/// 推理端的一步输出
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Act(Action),
    Finish(String),
}

#[async_trait]
pub trait Reasoner: Send + Sync {
    /// 每轮收到目标与完整 history
    async fn next_step(&self, goal: &str, history: &ExecutionHistory) -> Result<Step, AgentError>;
}

const ARG_KEYS: &[&str] = &["args", "arguments", "parameters", "params", "input"];
const NAME_KEYS: &[&str] = &["tool", "name", "tool_name", "function"];
const FINAL_KEYS: &[&str] = &["final_answer", "final", "answer"];

/// 解析 LLM 输出
pub fn parse_llm_output(output: &str) -> Result<Step, AgentError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(AgentError::JsonParse("empty reply; emit a tool call or a final answer".to_string()));
    }

    let mut json_error = None;
    for candidate in json_candidates(trimmed) {
        match candidate {
            Ok(value) => {
                if let Some(step) = step_from_json(value, output) {
                    return Ok(step);
                }
            }
            Err(e) => {
                json_error.get_or_insert(e);
            }
        }
    }

    if let Some(action) = parse_call_syntax(trimmed, output) {
        return Ok(Step::Act(action));
    }

    let looks_like_call = trimmed.starts_with('{') || trimmed.contains("\"tool\"") || trimmed.contains("```json");
    if looks_like_call {
        let detail = json_error.unwrap_or_else(|| "no \"tool\" field".to_string());
        return Err(AgentError::JsonParse(format!(
            "{}: {}",
            detail,
            preview(trimmed)
        )));
    }
    if trimmed.contains("```") {
        return Err(AgentError::JsonParse(
            "code was written in the reply but not executed; use write_file or replace_in_file".to_string(),
        ));
    }
    Ok(Step::Finish(trimmed.to_string()))
}

fn preview(text: &str) -> String {
    if text.chars().count() > 300 {
        format!("{}...", text.chars().take(300).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 依次尝试每个 `{` 起始位置的 JSON 值（跳过已成功解析的对象内部）
fn json_candidates(text: &str) -> Vec<Result<Value, String>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(offset) = text[pos..].find('{') {
        let start = pos + offset;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                pos = start + stream.byte_offset();
                out.push(Ok(value));
            }
            Some(Err(e)) => {
                out.push(Err(e.to_string()));
                pos = start + 1;
            }
            None => break,
        }
    }
    out
}

fn step_from_json(value: Value, raw: &str) -> Option<Step> {
    let Value::Object(mut obj) = value else {
        return None;
    };
    for key in FINAL_KEYS {
        if let Some(Value::String(answer)) = obj.get(*key) {
            if !obj.keys().any(|k| NAME_KEYS.contains(&k.as_str())) {
                return Some(Step::Finish(answer.clone()));
            }
        }
    }

    // OpenAI 风格：{"function": {"name": ..., "arguments": "..."}}
    if let Some(Value::Object(inner)) = obj.get("function").cloned() {
        obj = inner;
    }

    let name = NAME_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|n| !n.is_empty())?
        .to_string();

    let args = ARG_KEYS.iter().find_map(|k| obj.remove(*k));
    let arguments = match args {
        Some(Value::Object(map)) => map,
        // 参数被序列化成字符串
        Some(Value::String(s)) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        Some(_) => Map::new(),
        // 参数直接平铺在顶层
        None => obj
            .into_iter()
            .filter(|(k, _)| !NAME_KEYS.contains(&k.as_str()))
            .collect(),
    };
    Some(Step::Act(Action::new(name, arguments, raw)))
}

/// `replace_in_file("app.py", search_text="a", replace_text="b")` 形式，只认已知工具名（含别名）
fn parse_call_syntax(text: &str, raw: &str) -> Option<Action> {
    for line in text.lines() {
        let line = line.trim().trim_end_matches(';');
        if line.starts_with('#') || line.starts_with("//") || !line.ends_with(')') {
            continue;
        }
        let Some(open) = line.find('(') else {
            continue;
        };
        let name = line[..open].trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            continue;
        }
        let Some(kind) = ToolKind::resolve(name) else {
            continue;
        };
        let Some((positional, mut keyword)) = parse_call_args(&line[open + 1..line.len() - 1]) else {
            continue;
        };
        // 位置参数按 schema 字段顺序对应
        for (field, value) in kind.schema().fields.iter().zip(positional) {
            keyword.entry(field.name.to_string()).or_insert(value);
        }
        return Some(Action::new(name, keyword, raw));
    }
    None
}

fn parse_call_args(src: &str) -> Option<(Vec<Value>, Map<String, Value>)> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut positional = Vec::new();
    let mut keyword = Map::new();

    let skip_ws = |i: &mut usize| {
        while *i < chars.len() && chars[*i].is_whitespace() {
            *i += 1;
        }
    };

    loop {
        skip_ws(&mut i);
        if i >= chars.len() {
            break;
        }

        // key=
        let mut key = None;
        let ident_end = chars[i..]
            .iter()
            .position(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
            .map(|p| i + p)
            .unwrap_or(chars.len());
        if ident_end > i {
            let mut j = ident_end;
            skip_ws(&mut j);
            if j < chars.len() && chars[j] == '=' && chars.get(j + 1) != Some(&'=') {
                key = Some(chars[i..ident_end].iter().collect::<String>());
                i = j + 1;
                skip_ws(&mut i);
            }
        }

        let value = if i < chars.len() && (chars[i] == '"' || chars[i] == '\'') {
            let quote = chars[i];
            i += 1;
            let mut s = String::new();
            loop {
                let c = *chars.get(i)?;
                i += 1;
                match c {
                    '\\' => {
                        let escaped = *chars.get(i)?;
                        i += 1;
                        s.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    }
                    c if c == quote => break,
                    c => s.push(c),
                }
            }
            Value::String(s)
        } else {
            let start = i;
            while i < chars.len() && chars[i] != ',' {
                i += 1;
            }
            literal(chars[start..i].iter().collect::<String>().trim())?
        };

        match key {
            Some(k) => {
                keyword.insert(k, value);
            }
            None => positional.push(value),
        }

        skip_ws(&mut i);
        if i < chars.len() {
            if chars[i] != ',' {
                return None;
            }
            i += 1;
        }
    }
    Some((positional, keyword))
}

fn literal(token: &str) -> Option<Value> {
    match token {
        "" => None,
        "true" | "True" => Some(Value::Bool(true)),
        "false" | "False" => Some(Value::Bool(false)),
        "null" | "None" => Some(Value::Null),
        _ => Some(
            token
                .parse::<i64>()
                .map(|n| Value::Number(Number::from(n)))
                .unwrap_or_else(|_| Value::String(token.to_string())),
        ),
    }
}

/// 默认 system prompt：工具目录 + 输出格式 + 工作流约束
pub fn default_system_prompt() -> String {
    format!(
        "You are an autonomous dependency-upgrade agent working inside a sandboxed repository.\n\
         You act only through tools. Reply with exactly one JSON tool call per turn:\n{call}\n\
         When the work is finished, reply with:\n{finish}\n\n\
         Available tools:\n{catalog}\n\n\
         Rules:\n\
         - Paths are relative to the workspace root.\n\
         - Interactive programs (editors, pagers, bare interpreters) are rejected; pass flags such as -m or -y.\n\
         - If tests fail after an upgrade, fix the code before committing.\n\
         - Never push to main or master; push a feature branch.\n\
         - The URL printed by git_push (/pull/new/...) is not a pull request; call create_github_pr.\n\
         - A notice such as 'already exists' means the step is already done.\n\
         - Your final answer must include the pull request URL returned by create_github_pr.",
        call = tool_call_schema_json(),
        finish = final_answer_schema_json(),
        catalog = catalog_json(),
    )
}

/// Planner：持有 LLM 与 system prompt
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn with_default_prompt(llm: Arc<dyn LlmClient>) -> Self {
        Self::new(llm, default_system_prompt())
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// system + 目标 + history 展开的消息对
    pub fn build_messages(&self, goal: &str, history: &ExecutionHistory) -> Vec<Message> {
        let mut messages = vec![Message::system(self.system_prompt.clone()), Message::user(goal)];
        messages.extend(history_messages(history));
        messages
    }
}

#[async_trait]
impl Reasoner for Planner {
    async fn next_step(&self, goal: &str, history: &ExecutionHistory) -> Result<Step, AgentError> {
        let messages = self.build_messages(goal, history);
        let reply = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| AgentError::Llm(e.to_string()))?;
        tracing::debug!(reply = %preview(&reply), "llm reply");
        parse_llm_output(&reply)
    }
}
