//! 核心编排层：错误与恢复、运行状态、组件构建

pub mod builder;
pub mod error;
pub mod recovery;
pub mod state;

pub use builder::AgentBuilder;
pub use error::{AbortError, AbortReason, AgentError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use state::{EnginePhase, RunContext};
