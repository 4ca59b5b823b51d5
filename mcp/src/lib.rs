//! Tool registry, naming resolution and MCP side-car proxying.
//!
//! ## Modules
//!
//! - [`inventory`]: tool descriptors, the registry and the naming index
//! - [`transform`]: forwarding wrappers and flat-name aliases
//! - [`core`]: configuration, transports and the proxy manager
//!
//! Local tools are registered with a [`ToolSpec`] and a [`ToolHandler`];
//! remote tools are published by [`ProxyManager::start_servers`]. Every tool
//! is reachable through [`ToolRegistry::resolve`] under its dotted, flat or
//! shortened name.

pub mod core;
pub mod error;
pub mod inventory;
pub mod transform;

pub use core::{
    CallEnvelope, ConfigValidationError, McpMetrics, McpServerEntry, MetricsSnapshot,
    ProviderState, ProxyManager, ProxySettings, RemoteToolMeta, RmcpConnector, RuntimeConfig,
    StartReport, StreamManager, TransportConnector, TransportKind, TransportSpec,
};
pub use error::{McpError, McpResult};
pub use inventory::{
    arg, opt_arg, ExecutionKind, JsonType, ParamSpec, ParamType, ToolArgs, ToolDescriptor,
    ToolEntry, ToolHandler, ToolOrigin, ToolRegistry, ToolSpec,
};
pub use transform::{create_proxy_tool, OpenAiToolsAdapter};
