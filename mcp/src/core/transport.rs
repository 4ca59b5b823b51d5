//! Stream-manager collaborator interfaces.
//!
//! A [`StreamManager`] is one multiplexed handle over a group of side-car
//! providers sharing a transport kind. The proxy layer only talks to
//! providers through this trait; [`TransportConnector`] builds handles from a
//! [`TransportSpec`]. [`TrackedStreamManager`] adds in-flight call tracking so
//! shutdown can drain or cancel calls before the transport closes.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use super::config::TransportKind;
use crate::{
    error::{McpError, McpResult},
    inventory::ToolArgs,
};

/// Tool metadata reported by a provider's `list_tools`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteToolMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

impl RemoteToolMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: empty_object_schema(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Reply envelope of a remote call: `{"isError", "content", "error"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    #[serde(rename = "isError", default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallEnvelope {
    pub fn ok(content: Value) -> Self {
        Self {
            is_error: false,
            content: Some(content),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: None,
            error: Some(message.into()),
        }
    }

    /// Content on success, [`McpError::RemoteTool`] when the provider flagged
    /// an error.
    pub fn into_result(self) -> McpResult<Value> {
        if self.is_error {
            Err(McpError::RemoteTool(
                self.error
                    .unwrap_or_else(|| "Unknown MCP error".to_string()),
            ))
        } else {
            Ok(self.content.unwrap_or(Value::Null))
        }
    }
}

#[async_trait]
pub trait StreamManager: Send + Sync {
    /// Ordered tool list of one provider.
    async fn list_tools(&self, provider: &str) -> McpResult<Vec<RemoteToolMeta>>;

    async fn call_tool(
        &self,
        tool: &str,
        args: ToolArgs,
        provider: &str,
    ) -> McpResult<CallEnvelope>;

    /// Ok once `provider` is connected and initialized on this handle.
    async fn ready(&self, provider: &str) -> McpResult<()>;

    async fn close(&self) -> McpResult<()>;
}

/// Launch parameters of one stdio provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioProviderSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

/// Endpoint of one SSE provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseProviderSpec {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for SseProviderSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseProviderSpec")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "****"))
            .finish()
    }
}

/// Combined transport descriptor for every provider of one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSpec {
    Stdio(BTreeMap<String, StdioProviderSpec>),
    Sse(Vec<SseProviderSpec>),
}

impl TransportSpec {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportSpec::Stdio(_) => TransportKind::Stdio,
            TransportSpec::Sse(_) => TransportKind::Sse,
        }
    }

    pub fn provider_names(&self) -> Vec<String> {
        match self {
            TransportSpec::Stdio(map) => map.keys().cloned().collect(),
            TransportSpec::Sse(list) => list.iter().map(|s| s.name.clone()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TransportSpec::Stdio(map) => map.is_empty(),
            TransportSpec::Sse(list) => list.is_empty(),
        }
    }
}

/// Builds stream-manager handles.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// One handle covering every provider in `spec`. Individual provider
    /// failures are reported through [`StreamManager::ready`]; an `Err` here
    /// means the whole group failed.
    async fn connect(&self, spec: &TransportSpec) -> McpResult<Arc<dyn StreamManager>>;
}

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Stream manager decorator tracking in-flight calls.
///
/// Every forwarded call holds a [`TaskTracker`] token. Shutdown closes the
/// tracker, so a call either registered its token before the close and is
/// waited for, or sees the tracker closed and is rejected without touching
/// the transport.
pub struct TrackedStreamManager {
    inner: Arc<dyn StreamManager>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    drain_timeout: Duration,
}

impl TrackedStreamManager {
    pub fn new(inner: Arc<dyn StreamManager>) -> Self {
        Self {
            inner,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// How long shutdown waits for in-flight calls before cancelling them.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_closing(&self) -> bool {
        self.tracker.is_closed()
    }

    async fn wait_idle(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.tracker.wait()).await.is_ok()
    }

    /// Refuse new calls, drain or cancel in-flight ones, then close the
    /// underlying transport. Subsequent calls are no-ops.
    pub async fn shutdown(&self) -> McpResult<()> {
        if !self.tracker.close() {
            return Ok(());
        }

        let pending = self.in_flight();
        if pending > 0 {
            info!("Waiting for {} in-flight proxy calls to finish", pending);
        }
        if !self.wait_idle(self.drain_timeout).await {
            warn!(
                "Drain timeout reached; cancelling {} in-flight proxy calls",
                self.in_flight()
            );
            self.cancel.cancel();
            if !self.wait_idle(Duration::from_secs(1)).await {
                warn!(
                    "{} cancelled proxy calls were not released before close",
                    self.in_flight()
                );
            }
        }
        self.cancel.cancel();
        self.inner.close().await
    }
}

#[async_trait]
impl StreamManager for TrackedStreamManager {
    async fn list_tools(&self, provider: &str) -> McpResult<Vec<RemoteToolMeta>> {
        if self.is_closing() {
            return Err(McpError::Cancelled(format!(
                "stream manager for '{provider}' is closing"
            )));
        }
        self.inner.list_tools(provider).await
    }

    async fn call_tool(
        &self,
        tool: &str,
        args: ToolArgs,
        provider: &str,
    ) -> McpResult<CallEnvelope> {
        // Token first, then the closed check: shutdown cannot slip between them.
        let _token = self.tracker.token();
        if self.tracker.is_closed() {
            return Err(McpError::Cancelled(format!(
                "call to '{provider}.{tool}' rejected: stream manager is closing"
            )));
        }

        debug!("Forwarding '{}' to provider '{}'", tool, provider);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(McpError::Cancelled(format!(
                "call to '{provider}.{tool}' cancelled by shutdown"
            ))),
            reply = self.inner.call_tool(tool, args, provider) => reply,
        }
    }

    async fn ready(&self, provider: &str) -> McpResult<()> {
        self.inner.ready(provider).await
    }

    async fn close(&self) -> McpResult<()> {
        self.shutdown().await
    }
}
