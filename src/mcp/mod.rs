//! Model Context Protocol implementation
//!
//! This module provides the session core shared by both MCP peers:
//! the JSON-RPC wire envelope, the protocol data model, the host
//! capability interfaces, and the server and client coordinators.

/// Client coordinator and client-side dispatch
pub mod client;

/// JSON-RPC 2.0 wire envelope and codec
pub mod message;

/// Host capability interfaces
pub mod providers;

/// Server coordinator and server-side dispatch
pub mod server;

/// Protocol data model
pub mod types;

pub(crate) mod session;

pub use client::{Client, McpClient, McpClientBuilder};
pub use message::{JsonRpcError, JsonRpcMessage, MessageId, MessageKind};
pub use server::{McpServer, McpServerBuilder, Server};
pub use session::{DEFAULT_PING_INTERVAL, DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT};
