//! Common test utilities for proxy integration tests.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Once,
    },
    time::Duration,
};

use async_trait::async_trait;
use mcp_proxy::{
    core::{CallEnvelope, RemoteToolMeta, StreamManager, TransportConnector, TransportSpec},
    inventory::ToolArgs,
    McpError, McpResult, ProxyManager, RuntimeConfig, ToolRegistry, TransportKind,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .with(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .try_init();
    });
}

/// Remote tool whose schema declares one required string `query`.
pub fn search_tool(name: &str) -> RemoteToolMeta {
    RemoteToolMeta::new(name).with_input_schema(json!({
        "type": "object",
        "properties": {
            "query": {"type": "string"},
            "limit": {"type": "integer", "default": 5}
        },
        "required": ["query"]
    }))
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub provider: String,
    pub tool: String,
    pub args: ToolArgs,
}

/// In-memory stream manager replaying a fixed tool catalogue.
///
/// Tool behavior is chosen by name: `explode` answers with an error envelope
/// carrying `boom`, `slow` replies after [`SLOW_CALL`], `process_text`
/// echoes its `text` argument unless the provider is listed as text-failing.
/// Every other tool echoes its provider, name and arguments.
#[derive(Default)]
pub struct ScriptedStreamManager {
    tools: HashMap<String, Vec<RemoteToolMeta>>,
    unready: HashMap<String, String>,
    list_failures: HashSet<String>,
    text_failures: HashSet<String>,
    pub calls: Mutex<Vec<RecordedCall>>,
    pub closed: AtomicUsize,
}

pub const SLOW_CALL: Duration = Duration::from_millis(150);

impl ScriptedStreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(mut self, name: &str, tools: Vec<RemoteToolMeta>) -> Self {
        self.tools.insert(name.to_string(), tools);
        self
    }

    /// Provider that never becomes ready.
    pub fn unready(mut self, name: &str, reason: &str) -> Self {
        self.unready.insert(name.to_string(), reason.to_string());
        self
    }

    /// Provider whose `list_tools` fails.
    pub fn list_failure(mut self, name: &str) -> Self {
        self.list_failures.insert(name.to_string());
        self
    }

    pub fn text_failure(mut self, name: &str) -> Self {
        self.text_failures.insert(name.to_string());
        self
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamManager for ScriptedStreamManager {
    async fn list_tools(&self, provider: &str) -> McpResult<Vec<RemoteToolMeta>> {
        if self.list_failures.contains(provider) {
            return Err(McpError::Transport(format!("{provider} hung up")));
        }
        Ok(self.tools.get(provider).cloned().unwrap_or_default())
    }

    async fn call_tool(
        &self,
        tool: &str,
        args: ToolArgs,
        provider: &str,
    ) -> McpResult<CallEnvelope> {
        self.calls.lock().push(RecordedCall {
            provider: provider.to_string(),
            tool: tool.to_string(),
            args: args.clone(),
        });
        match tool {
            "explode" => Ok(CallEnvelope::err("boom")),
            "slow" => {
                tokio::time::sleep(SLOW_CALL).await;
                Ok(CallEnvelope::ok(json!("done")))
            }
            "process_text" if self.text_failures.contains(provider) => {
                Ok(CallEnvelope::err(format!("{provider} cannot read")))
            }
            "process_text" => Ok(CallEnvelope::ok(
                args.get("text").cloned().unwrap_or(Value::Null),
            )),
            _ => Ok(CallEnvelope::ok(json!({
                "provider": provider,
                "tool": tool,
                "args": Value::Object(args),
            }))),
        }
    }

    async fn ready(&self, provider: &str) -> McpResult<()> {
        match self.unready.get(provider) {
            Some(reason) => Err(McpError::ProviderStart {
                provider: provider.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn close(&self) -> McpResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector handing out one shared [`ScriptedStreamManager`].
pub struct ScriptedConnector {
    pub manager: Arc<ScriptedStreamManager>,
    failing: HashSet<TransportKind>,
    pub connects: Mutex<Vec<TransportSpec>>,
}

impl ScriptedConnector {
    pub fn new(manager: ScriptedStreamManager) -> Self {
        Self {
            manager: Arc::new(manager),
            failing: HashSet::new(),
            connects: Mutex::new(Vec::new()),
        }
    }

    /// Every group of this transport kind fails to connect.
    pub fn failing(mut self, kind: TransportKind) -> Self {
        self.failing.insert(kind);
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }
}

#[async_trait]
impl TransportConnector for ScriptedConnector {
    async fn connect(&self, spec: &TransportSpec) -> McpResult<Arc<dyn StreamManager>> {
        self.connects.lock().push(spec.clone());
        if self.failing.contains(&spec.kind()) {
            return Err(McpError::ConnectionFailed(format!(
                "{} group unavailable",
                spec.kind()
            )));
        }
        let manager: Arc<dyn StreamManager> = self.manager.clone();
        Ok(manager)
    }
}

pub fn config(yaml: &str) -> RuntimeConfig {
    RuntimeConfig::from_yaml_str(yaml).expect("test config parses")
}

/// Manager over a fresh registry; returns the connector for inspection.
pub fn proxy_manager(
    yaml: &str,
    providers: ScriptedStreamManager,
) -> (ProxyManager, Arc<ScriptedConnector>) {
    proxy_manager_with(yaml, Arc::new(ToolRegistry::new()), ScriptedConnector::new(providers))
}

pub fn proxy_manager_with(
    yaml: &str,
    registry: Arc<ToolRegistry>,
    connector: ScriptedConnector,
) -> (ProxyManager, Arc<ScriptedConnector>) {
    init_test_logging();
    let connector = Arc::new(connector);
    let manager = ProxyManager::new(config(yaml), "/srv/project", registry, connector.clone())
        .expect("valid proxy config");
    (manager, connector)
}
