//! 认知层：推理端适配、安全反射、编排主循环

pub mod events;
pub mod loop_;
pub mod mock;
pub mod planner;
pub mod reflector;

pub use events::EngineEvent;
pub use loop_::{Engine, FinalReport, DEFAULT_MAX_STEPS};
pub use mock::ScriptedReasoner;
pub use planner::{default_system_prompt, parse_llm_output, Planner, Reasoner, Step};
pub use reflector::{Reflector, Verdict};
