//! Per-provider lifecycle state.
//!
//! Each configured side-car provider is tracked by one [`ProviderSession`]
//! moving through `Unstarted -> Starting -> Running -> Stopped`, with
//! `Failed` reachable only from `Starting`. Sessions are independent: one
//! provider failing never touches a sibling's state.

use std::{collections::BTreeSet, fmt, sync::Arc};

use super::{config::TransportKind, transport::StreamManager};
use crate::error::{McpError, McpResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderState {
    Unstarted,
    Starting,
    Running,
    Stopped,
    /// Terminal; carries the start failure reason.
    Failed(String),
}

impl ProviderState {
    fn label(&self) -> &'static str {
        match self {
            ProviderState::Unstarted => "unstarted",
            ProviderState::Starting => "starting",
            ProviderState::Running => "running",
            ProviderState::Stopped => "stopped",
            ProviderState::Failed(_) => "failed",
        }
    }

    fn can_transition_to(&self, next: &ProviderState) -> bool {
        matches!(
            (self, next),
            (ProviderState::Unstarted, ProviderState::Starting)
                | (ProviderState::Starting, ProviderState::Running)
                | (ProviderState::Starting, ProviderState::Failed(_))
                | (ProviderState::Running, ProviderState::Stopped)
                | (ProviderState::Starting, ProviderState::Stopped)
        )
    }
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderState::Failed(reason) => write!(f, "failed ({reason})"),
            other => f.write_str(other.label()),
        }
    }
}

/// One side-car provider managed by the proxy layer.
pub struct ProviderSession {
    name: String,
    transport: TransportKind,
    namespace: String,
    state: ProviderState,
    /// Shared handle; owned by the transport group, not by this session.
    handle: Option<Arc<dyn StreamManager>>,
    wrapped_tools: BTreeSet<String>,
}

impl ProviderSession {
    pub fn new(name: impl Into<String>, transport: TransportKind, namespace_root: &str) -> Self {
        let name = name.into();
        Self {
            namespace: format!("{namespace_root}.{name}"),
            name,
            transport,
            state: ProviderState::Unstarted,
            handle: None,
            wrapped_tools: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// `<root>.<provider>`
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn state(&self) -> &ProviderState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ProviderState::Running
    }

    pub fn handle(&self) -> Option<&Arc<dyn StreamManager>> {
        self.handle.as_ref()
    }

    /// Registry names this provider contributed.
    pub fn wrapped_tools(&self) -> &BTreeSet<String> {
        &self.wrapped_tools
    }

    pub fn record_tool(&mut self, name: impl Into<String>) {
        self.wrapped_tools.insert(name.into());
    }

    fn transition(&mut self, next: ProviderState) -> McpResult<()> {
        if !self.state.can_transition_to(&next) {
            return Err(McpError::ProviderStart {
                provider: self.name.clone(),
                reason: format!("invalid state transition {} -> {}", self.state, next),
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn begin_start(&mut self) -> McpResult<()> {
        self.transition(ProviderState::Starting)
    }

    pub fn mark_running(&mut self, handle: Arc<dyn StreamManager>) -> McpResult<()> {
        self.transition(ProviderState::Running)?;
        self.handle = Some(handle);
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> McpResult<()> {
        self.transition(ProviderState::Failed(reason.into()))
    }

    /// Drop the handle reference and tool set. A no-op for sessions that
    /// never reached `Running` or `Starting`.
    pub fn stop(&mut self) {
        if matches!(self.state, ProviderState::Running | ProviderState::Starting) {
            self.state = ProviderState::Stopped;
        }
        self.handle = None;
        self.wrapped_tools.clear();
    }
}

impl fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSession")
            .field("name", &self.name)
            .field("transport", &self.transport)
            .field("namespace", &self.namespace)
            .field("state", &self.state)
            .field("has_handle", &self.handle.is_some())
            .field("wrapped_tools", &self.wrapped_tools)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        core::transport::{CallEnvelope, RemoteToolMeta},
        inventory::ToolArgs,
    };

    struct NullManager;

    #[async_trait]
    impl StreamManager for NullManager {
        async fn list_tools(&self, _provider: &str) -> McpResult<Vec<RemoteToolMeta>> {
            Ok(vec![])
        }

        async fn call_tool(
            &self,
            _tool: &str,
            _args: ToolArgs,
            _provider: &str,
        ) -> McpResult<CallEnvelope> {
            Ok(CallEnvelope::ok(serde_json::Value::Null))
        }

        async fn ready(&self, _provider: &str) -> McpResult<()> {
            Ok(())
        }

        async fn close(&self) -> McpResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_namespace() {
        let session = ProviderSession::new("bing", TransportKind::Stdio, "proxy");
        assert_eq!(session.namespace(), "proxy.bing");
        assert_eq!(session.state(), &ProviderState::Unstarted);
    }

    #[test]
    fn test_happy_path() {
        let mut session = ProviderSession::new("bing", TransportKind::Sse, "proxy");
        session.begin_start().unwrap();
        session.mark_running(Arc::new(NullManager)).unwrap();
        assert!(session.is_running());
        session.record_tool("proxy.bing.search");
        assert_eq!(session.wrapped_tools().len(), 1);

        session.stop();
        assert_eq!(session.state(), &ProviderState::Stopped);
        assert!(session.handle().is_none());
        assert!(session.wrapped_tools().is_empty());
    }

    #[test]
    fn test_failed_only_from_starting() {
        let mut session = ProviderSession::new("x", TransportKind::Stdio, "proxy");
        assert!(session.mark_failed("nope").is_err());
        assert_eq!(session.state(), &ProviderState::Unstarted);

        session.begin_start().unwrap();
        session.mark_failed("spawn error").unwrap();
        assert_eq!(session.state().to_string(), "failed (spawn error)");

        assert!(session.mark_running(Arc::new(NullManager)).is_err());
        session.stop();
        assert!(matches!(session.state(), ProviderState::Failed(_)));
    }

    #[test]
    fn test_stop_is_noop_when_unstarted() {
        let mut session = ProviderSession::new("x", TransportKind::Stdio, "proxy");
        session.stop();
        assert_eq!(session.state(), &ProviderState::Unstarted);
    }
}
