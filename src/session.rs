//! Client side of an MCP session over stdio.
//!
//! This module owns everything between the UI bridge and the server process:
//!
//! ```text
//! ┌─────────────┐  tools/list, tools/call   ┌──────────────────┐
//! │   Session   │ ◄───────────────────────► │  MCP server      │
//! │ (Dispatcher)│  newline-delimited JSON   │  (child process) │
//! └─────────────┘       over stdio          └──────────────────┘
//! ```
//!
//! - `transport` resolves a server path into a launch command and spawns it.
//! - `framing` reads and writes one JSON-RPC message per line.
//! - `dispatcher` correlates responses to requests and applies timeouts.
//! - `client` wraps it all into a [`Session`] with the MCP handshake.
//!
//! # Usage
//!
//! ```ignore
//! use mcpcalc_tui::config::ClientConfig;
//! use mcpcalc_tui::models::ToolCall;
//! use mcpcalc_tui::session::{ServerTarget, Session};
//!
//! let config = ClientConfig::default();
//! let target = ServerTarget::resolve("server.py", &config)?;
//! let session = Session::connect(&target, &config).await?;
//! let result = session.call_tool(ToolCall::new("add").arg("a", 4).arg("b", 5)).await?;
//! session.close().await;
//! ```

mod client;
mod dispatcher;
mod framing;
mod transport;

pub use client::{Session, SessionError, CLIENT_NAME};
pub use dispatcher::Dispatcher;
pub use framing::{read_message, write_message, MAX_MESSAGE_SIZE};
pub use transport::ServerTarget;
