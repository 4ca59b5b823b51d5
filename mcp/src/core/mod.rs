//! Proxy layer infrastructure: configuration, transports, provider
//! sessions and the proxy manager.

pub mod config;
pub mod connector;
pub mod manager;
pub mod metrics;
pub mod session;
pub mod transport;

pub use config::{
    ConfigValidationError, McpServerEntry, ProxySettings, RuntimeConfig, TransportKind,
};
pub use connector::{RmcpConnector, RmcpStreamManager};
pub use manager::{ProxyManager, StartReport, TEXT_TOOL};
pub use metrics::{CallOutcome, LatencySnapshot, McpMetrics, MetricsSnapshot};
pub use session::{ProviderSession, ProviderState};
pub use transport::{
    CallEnvelope, RemoteToolMeta, SseProviderSpec, StdioProviderSpec, StreamManager,
    TrackedStreamManager, TransportConnector, TransportSpec,
};
