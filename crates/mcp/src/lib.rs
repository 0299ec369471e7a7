//! Unified client for tool servers.
//!
//! A tool server is an out-of-process HTTP service exposing callable
//! functions. Three wire variants exist in the wild: MCP over SSE, MCP over
//! streamable HTTP, and a plain HTTP/JSON convention (`GET /tools`,
//! `POST /call`). This crate auto-detects the variant behind a base URL and
//! hides it behind one [`ToolServer`] with `list_tools` / `call_tool`.
//!
//! Clients are cached per URL for the process lifetime; concurrent callers
//! share one underlying transport.

mod client;
mod detect;
mod error;
mod probe;
mod registry;
mod schema;

pub use client::ToolServer;
pub use error::ToolError;
pub use probe::{ProbeReport, ProbeStatus, probe};
pub use registry::tool_server;
pub use schema::ToolSchema;
