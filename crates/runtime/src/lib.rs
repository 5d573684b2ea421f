//! The agent runtime: context management, the shared agent lifecycle,
//! the prompt queue driving the main agent, and the tournament scheduler
//! that runs many sub-agents toward a synthesized result.

pub mod agent_core;
pub mod cancel;
pub mod context;
pub mod main_agent;
pub mod prompt_queue;
pub mod subagent;
pub mod tournament;

pub use agent_core::{Agent, AgentStatus, StepOutcome};
pub use cancel::{CancelMap, CancelToken};
pub use context::ContextManager;
pub use main_agent::MainAgent;
pub use prompt_queue::{Priority, PromptQueue, QueuedPrompt};
pub use subagent::SubAgent;
pub use tournament::{Tournament, TournamentScheduler, TournamentStatus};
