//! rmcp-backed stream manager for stdio and SSE side-car providers.
//!
//! [`RmcpConnector`] turns a [`TransportSpec`] into one [`RmcpStreamManager`]
//! holding a client per provider. Providers connect concurrently; a provider
//! that fails to connect is recorded and reported through `ready`, leaving
//! its siblings usable.

use std::{borrow::Cow, collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use dashmap::DashMap;
use futures::{stream, StreamExt};
use rmcp::{
    model::{CallToolRequestParam, CallToolResult},
    service::RunningService,
    transport::{
        sse_client::SseClientConfig, ConfigureCommandExt, SseClientTransport, TokioChildProcess,
    },
    RoleClient, ServiceExt,
};
use serde_json::Value;
use tracing::{error, info, warn};

use super::transport::{
    CallEnvelope, RemoteToolMeta, SseProviderSpec, StdioProviderSpec, StreamManager,
    TransportConnector, TransportSpec,
};
use crate::{
    error::{McpError, McpResult},
    inventory::ToolArgs,
};

type McpClient = RunningService<RoleClient, ()>;

/// Upper bound on providers connecting at the same time.
const CONNECT_CONCURRENCY: usize = 8;

/// Connector launching stdio providers as child processes and attaching to
/// SSE providers over HTTP.
#[derive(Debug, Clone)]
pub struct RmcpConnector {
    connect_timeout: Duration,
    sse_retry_window: Duration,
}

impl Default for RmcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            sse_retry_window: Duration::from_secs(30),
        }
    }
}

impl RmcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total time spent retrying an SSE provider before giving up.
    #[must_use]
    pub fn with_sse_retry_window(mut self, window: Duration) -> Self {
        self.sse_retry_window = window;
        self
    }

    async fn connect_stdio(name: &str, spec: &StdioProviderSpec) -> McpResult<McpClient> {
        info!("Starting stdio provider '{}' ({})", name, spec.command);
        let transport = TokioChildProcess::new(
            tokio::process::Command::new(&spec.command).configure(|cmd| {
                cmd.args(&spec.args).stderr(std::process::Stdio::inherit());
                if let Some(cwd) = &spec.cwd {
                    cmd.current_dir(cwd);
                }
            }),
        )
        .map_err(|e| McpError::Transport(format!("create stdio transport: {}", e)))?;

        let client = ().serve(transport).await.map_err(|e| {
            McpError::ConnectionFailed(format!("initialize stdio client: {}", e))
        })?;
        info!("Connected to stdio provider '{}'", name);
        Ok(client)
    }

    async fn connect_sse_once(&self, spec: &SseProviderSpec) -> McpResult<McpClient> {
        let mut builder = reqwest::Client::builder().connect_timeout(self.connect_timeout);
        if let Some(key) = &spec.api_key {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", key)
                    .parse()
                    .map_err(|e| McpError::Config(format!("api_key for '{}': {}", spec.name, e)))?,
            );
            builder = builder.default_headers(headers);
        }
        let http = builder
            .build()
            .map_err(|e| McpError::Transport(format!("build HTTP client: {}", e)))?;

        let cfg = SseClientConfig {
            sse_endpoint: spec.url.clone().into(),
            ..Default::default()
        };
        let transport = SseClientTransport::start_with_client(http, cfg)
            .await
            .map_err(|e| McpError::ConnectionFailed(format!("open SSE stream: {}", e)))?;

        let client = ().serve(transport).await.map_err(|e| {
            McpError::ConnectionFailed(format!("initialize SSE client: {}", e))
        })?;
        info!("Connected to SSE provider '{}' at {}", spec.name, spec.url);
        Ok(client)
    }

    async fn connect_sse(&self, spec: &SseProviderSpec) -> McpResult<McpClient> {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(10))
            .with_max_elapsed_time(Some(self.sse_retry_window))
            .build();

        backoff::future::retry(backoff, || async {
            match self.connect_sse_once(spec).await {
                Ok(client) => Ok(client),
                Err(e) if is_permanent_error(&e) => {
                    error!("Permanent error connecting to '{}': {} - not retrying", spec.name, e);
                    Err(backoff::Error::permanent(e))
                }
                Err(e) => {
                    warn!("Failed to connect to '{}', retrying: {}", spec.name, e);
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
    }
}

fn is_permanent_error(error: &McpError) -> bool {
    match error {
        McpError::Config(_) | McpError::Transport(_) => true,
        McpError::ConnectionFailed(msg) => {
            msg.contains("initialize") || msg.contains("invalid URL") || msg.contains("not found")
        }
        _ => false,
    }
}

#[async_trait]
impl TransportConnector for RmcpConnector {
    async fn connect(&self, spec: &TransportSpec) -> McpResult<Arc<dyn StreamManager>> {
        let results: Vec<(String, McpResult<McpClient>)> = match spec {
            TransportSpec::Stdio(providers) => {
                let owned: Vec<(String, StdioProviderSpec)> = providers
                    .iter()
                    .map(|(name, provider)| (name.clone(), provider.clone()))
                    .collect();
                stream::iter(owned)
                    .map(|(name, provider)| async move {
                        let result = Self::connect_stdio(&name, &provider).await;
                        (name, result)
                    })
                    .buffer_unordered(CONNECT_CONCURRENCY)
                    .collect()
                    .await
            }
            TransportSpec::Sse(providers) => {
                let owned: Vec<SseProviderSpec> = providers.clone();
                stream::iter(owned)
                    .map(|provider| async move {
                        let result = self.connect_sse(&provider).await;
                        (provider.name, result)
                    })
                    .buffer_unordered(CONNECT_CONCURRENCY)
                    .collect()
                    .await
            }
        };

        let manager = RmcpStreamManager::default();
        for (name, result) in results {
            match result {
                Ok(client) => {
                    manager.clients.insert(name, Arc::new(client));
                }
                Err(e) => {
                    error!("Provider '{}' failed to start: {}", name, e);
                    manager.failures.insert(name, e.to_string());
                }
            }
        }

        if manager.clients.is_empty() && !spec.is_empty() {
            warn!("No {} provider could be started", spec.kind());
        }
        Ok(Arc::new(manager))
    }
}

/// One rmcp client per provider behind the [`StreamManager`] interface.
#[derive(Default)]
pub struct RmcpStreamManager {
    clients: DashMap<String, Arc<McpClient>>,
    failures: DashMap<String, String>,
}

impl RmcpStreamManager {
    fn client(&self, provider: &str) -> McpResult<Arc<McpClient>> {
        self.clients
            .get(provider)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| McpError::Transport(format!("provider '{}' is not connected", provider)))
    }
}

/// Text of every `text` content item, joined by newlines.
fn content_text(content: &Value) -> Option<String> {
    let texts: Vec<&str> = content
        .as_array()?
        .iter()
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .collect();
    (!texts.is_empty()).then(|| texts.join("\n"))
}

fn envelope_from_result(result: CallToolResult) -> CallEnvelope {
    let content = serde_json::to_value(&result.content).unwrap_or_else(|e| {
        warn!("Failed to serialize tool result content: {}", e);
        Value::Array(Vec::new())
    });
    if result.is_error.unwrap_or(false) {
        CallEnvelope::err(content_text(&content).unwrap_or_else(|| content.to_string()))
    } else {
        CallEnvelope::ok(content)
    }
}

#[async_trait]
impl StreamManager for RmcpStreamManager {
    async fn list_tools(&self, provider: &str) -> McpResult<Vec<RemoteToolMeta>> {
        let client = self.client(provider)?;
        let tools = client
            .peer()
            .list_all_tools()
            .await
            .map_err(|e| McpError::Transport(format!("list tools on '{}': {}", provider, e)))?;

        Ok(tools
            .into_iter()
            .map(|tool| RemoteToolMeta {
                name: tool.name.to_string(),
                description: tool.description.map(|d| d.to_string()),
                input_schema: Value::Object((*tool.input_schema).clone()),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        tool: &str,
        args: ToolArgs,
        provider: &str,
    ) -> McpResult<CallEnvelope> {
        let client = self.client(provider)?;
        let request = CallToolRequestParam {
            name: Cow::Owned(tool.to_string()),
            arguments: Some(args),
        };
        match client.call_tool(request).await {
            Ok(result) => Ok(envelope_from_result(result)),
            // Protocol-level failures still travel as an error envelope.
            Err(e) => Ok(CallEnvelope::err(e.to_string())),
        }
    }

    async fn ready(&self, provider: &str) -> McpResult<()> {
        if self.clients.contains_key(provider) {
            return Ok(());
        }
        let reason = self
            .failures
            .get(provider)
            .map(|r| r.value().clone())
            .unwrap_or_else(|| "provider not part of this transport group".to_string());
        Err(McpError::ProviderStart {
            provider: provider.to_string(),
            reason,
        })
    }

    async fn close(&self) -> McpResult<()> {
        let names: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        let mut errors: HashMap<String, String> = HashMap::new();
        for name in names {
            let Some((_, client)) = self.clients.remove(&name) else {
                continue;
            };
            match Arc::try_unwrap(client) {
                Ok(client) => {
                    if let Err(e) = client.cancel().await {
                        warn!("Error disconnecting provider '{}': {}", name, e);
                        errors.insert(name, e.to_string());
                    }
                }
                Err(_) => {
                    warn!("Could not shut down provider '{}': client still in use", name);
                }
            }
        }
        self.failures.clear();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(McpError::Transport(format!(
                "errors while closing providers: {:?}",
                errors
            )))
        }
    }
}
