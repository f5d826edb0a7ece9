//! library-mcp: MCP server for the Library Management System REST API
//!
//! Exposes catalogue, borrowing, wishlist, review and admin operations as
//! MCP tools, and keeps each client session logged in.
//!
//! # Architecture
//!
//! The client logs in once per session. After that every tool call goes
//! through the session's cached credentials:
//!
//! - **Attach**: The cached access token is sent unless the call carries its own
//! - **Refresh ahead**: Tokens near expiry are refreshed before the call
//! - **Retry once**: A 401 triggers one refresh and one retry
//!
//! Concurrent calls in one session share a single in-flight refresh.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types
//! - [`auth`]: Session credential store and call orchestration
//! - [`api`]: Library API HTTP client
//! - [`mcp`]: MCP protocol implementation

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod mcp;
