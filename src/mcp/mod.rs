//! Model Context Protocol (MCP) server implementation.
//!
//! Exposes the Library Management System REST API as MCP tools. The server
//! communicates over stdio using JSON-RPC 2.0 messages.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          MCP Server                          │
//! │                                                              │
//! │   ┌─────────────┐    ┌─────────────┐    ┌────────────────┐   │
//! │   │  Transport  │───▶│   Server    │───▶│  Tool Router   │   │
//! │   │   (stdio)   │    │ (lifecycle) │    │ (one call each)│   │
//! │   └─────────────┘    └─────────────┘    └────────────────┘   │
//! │                                                 │            │
//! │                                                 ▼            │
//! │                      ┌──────────────────────────────────┐    │
//! │                      │ Orchestrator ─▶ Library API      │    │
//! │                      │ (session tokens, refresh, retry) │    │
//! │                      └──────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2024-11-05.

pub mod protocol;
pub mod server;
pub mod tools;
pub mod transport;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use server::McpServer;
pub use tools::{ToolCallResult, ToolRouter};
pub use transport::{StdioTransport, Transport};
