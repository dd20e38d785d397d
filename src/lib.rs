//! mcpcalc library
//!
//! Core components shared by the `mcpcalc` TUI and the `mcpcalc-server`
//! reference server:
//!
//! - `session` - MCP client session over a child process's stdio
//! - `bridge` - worker thread connecting the synchronous UI to a session
//! - `server` - the reference `add` tool server
//! - `protocol` - JSON-RPC 2.0 message types
//! - `models` - tool descriptors, calls, results and MCP payloads
//! - `config` - environment configuration
//!
//! ```ignore
//! use mcpcalc_tui::config::ClientConfig;
//! use mcpcalc_tui::models::ToolCall;
//! use mcpcalc_tui::session::{ServerTarget, Session};
//!
//! let config = ClientConfig::from_env()?;
//! let target = ServerTarget::resolve("server.py", &config)?;
//! let session = Session::connect(&target, &config).await?;
//! let result = session.call_tool(ToolCall::new("add").arg("a", 4).arg("b", 5)).await?;
//! session.close().await;
//! ```

pub mod bridge;
pub mod config;
pub mod models;
pub mod protocol;
pub mod server;
pub mod session;
