//! The runtime agent shell (§4.8): a bounded tool surface, a deterministic
//! add/update/no_op decision policy, prompt templates, the pluggable
//! `LlmClient` seam, and an orchestrator that wires the three together and
//! validates whatever artifacts a run leaves behind.

pub mod contracts;
pub mod decision;
pub mod llm;
pub mod orchestrator;
pub mod prompts;
pub mod tools;

pub use contracts::PromptVars;
pub use decision::{decide, token_overlap, DecisionAction};
pub use llm::{LlmClient, MaintainAgentInput, StubLlmClient, SyncAgentInput};
pub use orchestrator::{run_chat, run_maintain_agent, run_sync_agent};
pub use tools::{AllowedRoots, ToolContext};
