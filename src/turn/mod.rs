//! Turn assembly: folds one live event stream into an assistant message.

pub mod blocks;
pub mod controller;
pub mod message;
pub mod orchestration;
pub mod stage;
pub mod state;
pub mod thinking;
pub mod tools;

pub use blocks::{ContentBlock, ContentBlockAssembler};
pub use controller::{DisplayPreferences, NoopSink, TurnController, TurnOutcome, TurnSink};
pub use message::{AssembledMessage, PipelineMetrics};
pub use stage::StageTracker;
pub use state::{LiveSnapshot, TurnPhase, TurnState, TurnTerminal};
pub use thinking::extract_thinking;
pub use tools::{ToolCall, ToolCallStatus};
