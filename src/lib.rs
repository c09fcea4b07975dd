#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_html_tags)]
#![deny(rustdoc::bare_urls)]

//! Bidirectional Model Context Protocol (MCP) peers over JSON-RPC 2.0.
//!
//! Two symmetric peer types share one session core: the server
//! exposes prompts, resources, and tools to an LLM-driven host, and
//! the client consumes them while answering the server's own requests
//! (root discovery, sampling). Each connection is a session that
//! multiplexes concurrent in-flight requests, correlates responses by
//! id, fans out change notifications, enforces read/write/ping
//! deadlines, and cancels cleanly on teardown.
//!
//! Transports are external: the core consumes an opaque byte writer
//! per session and is handed inbound frames one at a time via the
//! coordinators' `handle_msg`.

/// Core MCP protocol implementation: wire envelope, data model,
/// capability interfaces, session machinery, and the two peer
/// coordinators.
pub mod mcp;

/// Utility modules for error handling and common functionality.
pub mod utils;

pub use mcp::{
    client::{Client, McpClient, McpClientBuilder},
    message::{JsonRpcError, JsonRpcMessage, MessageId, MessageKind},
    server::{McpServer, McpServerBuilder, Server},
    types::PROTOCOL_VERSION,
    DEFAULT_PING_INTERVAL, DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT,
};

pub use utils::error::{McpError, McpResult};
