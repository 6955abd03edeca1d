//! 自主层：评审、反思与闭环控制

pub mod critic;
pub mod events;
pub mod loop_;
pub mod reflection;
pub mod types;

pub use critic::{parse_critique, Critic};
pub use events::LoopEvent;
pub use loop_::AutonomousLoop;
pub use reflection::{extract_lessons, is_success, Reflection, ReflectionOutcome};
pub use types::{
    AutonomousExecutionResult, Critique, ExecutionStatus, IterationResult, TerminationReason,
};
