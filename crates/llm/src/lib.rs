//! LLM orchestration core.
//!
//! Mediates between chat clients, upstream model providers, and tool
//! servers: for each request it drives a tool-calling loop (send the
//! conversation, dispatch any requested tool calls, fold the results back,
//! iterate), delivers the terminal answer either completed or as a live
//! stream, and accounts token usage and phase timings across every turn.

mod chat;
mod deadline;
mod error;
mod messages;
pub mod provider;
mod server;
mod stream;

pub use chat::{ChatOutcome, ChatStream, McpDispatcher, ToolDispatcher, run_chat};
pub use deadline::with_deadline;
pub use error::{LlmError, LlmResult as Result};
pub use messages::{
    DurationUsage, Message, Role, TokenUsage, ToolCall, validate_conversation,
};
pub use server::router;
pub use stream::{StreamFrame, event_frames, raw_frames, sse_events};
