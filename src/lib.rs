//! Upgrader - 沙箱内的依赖升级智能体
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、运行状态、组件构建
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）与重试
//! - **memory**: 单次运行的执行历史与对话展开
//! - **observability**: 日志初始化
//! - **react**: Reasoner 适配、Safety Reflector、编排主循环
//! - **tools**: 工具注册表、参数规范化、命令策略与沙箱执行器

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use crate::core::{AbortError, AgentBuilder, AgentError};
pub use crate::react::{Engine, FinalReport};
