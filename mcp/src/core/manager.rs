//! Proxy manager: side-car provider lifecycle and tool publication.
//!
//! Starting the proxy layer connects every enabled provider, lists its tools,
//! registers one dotted forwarding wrapper per remote tool
//! (`<root>.<provider>.<tool>`) and, in OpenAI-compatible mode, a flat alias
//! (`<root>_<provider>_<tool>`). A pruning pass then drops stale or
//! policy-excluded names under the root. Stopping drains in-flight calls,
//! closes every transport and removes everything the manager registered.
//!
//! Provider failures are logged and reported in [`StartReport`]; they never
//! fail `start_servers` or `stop_servers`.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use futures::{future::join_all, stream, StreamExt};
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{
    config::{McpServerEntry, ProxySettings, RuntimeConfig, TransportKind},
    session::{ProviderSession, ProviderState},
    transport::{
        CallEnvelope, SseProviderSpec, StdioProviderSpec, StreamManager, TrackedStreamManager,
        TransportConnector, TransportSpec,
    },
};
use crate::{
    error::{McpError, McpResult},
    inventory::{to_flat_name, ToolArgs, ToolEntry, ToolOrigin, ToolRegistry},
    transform::{create_proxy_tool, OpenAiToolsAdapter},
};

/// Remote tool invoked by [`ProxyManager::process_text`].
pub const TEXT_TOOL: &str = "process_text";

const DEFAULT_DISCOVERY_CONCURRENCY: usize = 8;
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one `start_servers` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartReport {
    /// Providers that reached `Running`.
    pub running: Vec<String>,
    /// Providers that failed to start, with the reason.
    pub failed: Vec<(String, String)>,
    /// Dotted wrappers registered.
    pub tools: usize,
    /// Flat aliases registered.
    pub aliases: usize,
    /// Registry names removed by pruning.
    pub pruned: Vec<String>,
}

#[derive(Default)]
struct ProxyState {
    sessions: BTreeMap<String, ProviderSession>,
    handles: Vec<Arc<TrackedStreamManager>>,
    transports: Vec<TransportSpec>,
    /// Dotted wrapper names in discovery order.
    dotted: Vec<String>,
    /// Flat alias -> dotted wrapper name.
    flat: BTreeMap<String, String>,
    /// Every registry name this manager registered.
    created: HashSet<String>,
}

impl ProxyState {
    fn is_active(&self) -> bool {
        !self.handles.is_empty() || !self.created.is_empty() || !self.transports.is_empty()
    }
}

pub struct ProxyManager {
    config: RuntimeConfig,
    project_root: PathBuf,
    registry: Arc<ToolRegistry>,
    adapter: OpenAiToolsAdapter,
    connector: Arc<dyn TransportConnector>,
    drain_timeout: Duration,
    discovery_concurrency: usize,
    /// Serializes start and stop.
    lifecycle: Mutex<()>,
    state: RwLock<ProxyState>,
}

impl ProxyManager {
    /// Validate `config` and prepare a manager publishing into `registry`.
    ///
    /// Nothing is started until [`start_servers`](Self::start_servers).
    pub fn new(
        mut config: RuntimeConfig,
        project_root: impl Into<PathBuf>,
        registry: Arc<ToolRegistry>,
        connector: Arc<dyn TransportConnector>,
    ) -> McpResult<Self> {
        config.validate()?;
        config.proxy = config.proxy.normalized();
        debug!(
            "Proxy init: enabled={} namespace={} openai={} only_openai={} keep_root={}",
            config.proxy.enabled,
            config.proxy.namespace,
            config.proxy.openai_compatible,
            config.proxy.only_openai_tools,
            config.proxy.keep_root_aliases
        );

        Ok(Self {
            adapter: OpenAiToolsAdapter::new(Arc::clone(&registry)),
            config,
            project_root: project_root.into(),
            registry,
            connector,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            discovery_concurrency: DEFAULT_DISCOVERY_CONCURRENCY,
            lifecycle: Mutex::new(()),
            state: RwLock::new(ProxyState::default()),
        })
    }

    /// How long `stop_servers` waits for in-flight calls before cancelling.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Maximum providers listed concurrently during discovery.
    #[must_use]
    pub fn with_discovery_concurrency(mut self, limit: usize) -> Self {
        self.discovery_concurrency = limit.max(1);
        self
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.config.proxy
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn adapter(&self) -> &OpenAiToolsAdapter {
        &self.adapter
    }

    pub fn provider_state(&self, provider: &str) -> Option<ProviderState> {
        self.state
            .read()
            .sessions
            .get(provider)
            .map(|s| s.state().clone())
    }

    /// Names of providers currently running.
    pub fn running_providers(&self) -> Vec<String> {
        self.state
            .read()
            .sessions
            .values()
            .filter(|s| s.is_running())
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Transport descriptors of the current start cycle.
    pub fn transport_specs(&self) -> Vec<TransportSpec> {
        self.state.read().transports.clone()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start every enabled provider and publish its tools.
    ///
    /// Calling this again restarts the proxy layer from scratch.
    pub async fn start_servers(&self) -> StartReport {
        let _lifecycle = self.lifecycle.lock().await;

        if !self.config.proxy.enabled {
            info!("Proxy layer disabled");
            return StartReport::default();
        }
        let enabled: Vec<(&String, &McpServerEntry)> = self.config.enabled_servers().collect();
        if enabled.is_empty() {
            warn!("Proxy layer enabled but no MCP servers configured");
            return StartReport::default();
        }
        if self.state.read().is_active() {
            info!("Restarting proxy layer");
            self.stop_locked().await;
        }

        let root = self.config.proxy.namespace.clone();
        let mut sessions = BTreeMap::new();
        let mut stdio = BTreeMap::new();
        let mut sse = Vec::new();
        for (name, entry) in enabled {
            let mut session = ProviderSession::new(name.clone(), entry.kind, &root);
            if let Err(e) = session.begin_start() {
                warn!("{}", e);
            }
            match entry.kind {
                TransportKind::Stdio => {
                    stdio.insert(
                        name.clone(),
                        StdioProviderSpec {
                            command: entry.command.clone(),
                            args: entry.args.clone(),
                            cwd: entry.working_dir(&self.project_root),
                        },
                    );
                }
                TransportKind::Sse => sse.push(SseProviderSpec {
                    name: name.clone(),
                    url: entry.url.clone().unwrap_or_default(),
                    api_key: entry.api_key.clone(),
                }),
            }
            sessions.insert(name.clone(), session);
        }
        let transports: Vec<TransportSpec> = [TransportSpec::Stdio(stdio), TransportSpec::Sse(sse)]
            .into_iter()
            .filter(|spec| !spec.is_empty())
            .collect();

        let handles = self.connect_all(&transports, &mut sessions).await;
        let (wrappers, owners) = self.discover(&sessions).await;

        let dotted: Vec<String> = wrappers.iter().map(|e| e.name().to_string()).collect();
        for (fq, provider) in &owners {
            if let Some(session) = sessions.get_mut(provider) {
                session.record_tool(fq.clone());
            }
        }
        self.registry.insert_many(wrappers);
        self.registry.metrics().record_remote_tools(dotted.len());

        let mut flat = BTreeMap::new();
        if self.config.proxy.openai_compatible {
            for outcome in self
                .adapter
                .register_flat_aliases_for(dotted.iter().map(String::as_str))
            {
                match outcome.result {
                    Ok(alias) if outcome.created => {
                        if let Some(session) = owners
                            .get(&outcome.original)
                            .and_then(|p| sessions.get_mut(p))
                        {
                            session.record_tool(alias.clone());
                        }
                        flat.insert(alias, outcome.original);
                    }
                    Ok(alias) => warn!(
                        "Flat name '{}' already registered; '{}' gets no alias",
                        alias, outcome.original
                    ),
                    // Already logged by the adapter.
                    Err(_) => {}
                }
            }
        }

        let mut created: HashSet<String> = dotted.iter().cloned().collect();
        created.extend(flat.keys().cloned());
        let pruned = self.prune(&root, &created);
        self.adapter.refresh();

        let report = StartReport {
            running: sessions
                .values()
                .filter(|s| s.is_running())
                .map(|s| s.name().to_string())
                .collect(),
            failed: sessions
                .values()
                .filter_map(|s| match s.state() {
                    ProviderState::Failed(reason) => Some((s.name().to_string(), reason.clone())),
                    _ => None,
                })
                .collect(),
            tools: dotted.len(),
            aliases: flat.len(),
            pruned,
        };

        info!(
            "Proxy layer started: {} running, {} failed, {} tools, {} aliases",
            report.running.len(),
            report.failed.len(),
            report.tools,
            report.aliases
        );

        *self.state.write() = ProxyState {
            sessions,
            handles,
            transports,
            dotted,
            flat,
            created,
        };
        report
    }

    async fn connect_all(
        &self,
        transports: &[TransportSpec],
        sessions: &mut BTreeMap<String, ProviderSession>,
    ) -> Vec<Arc<TrackedStreamManager>> {
        let metrics = self.registry.metrics();
        let mut handles = Vec::new();
        for spec in transports {
            let providers = spec.provider_names();
            let inner = match self.connector.connect(spec).await {
                Ok(inner) => inner,
                Err(e) => {
                    error!("Failed to start {} providers: {}", spec.kind(), e);
                    for provider in &providers {
                        if let Some(session) = sessions.get_mut(provider) {
                            if let Err(e) = session.mark_failed(e.to_string()) {
                                warn!("{}", e);
                            }
                        }
                        metrics.record_provider_failure();
                    }
                    continue;
                }
            };

            let tracked = Arc::new(
                TrackedStreamManager::new(inner).with_drain_timeout(self.drain_timeout),
            );
            for provider in &providers {
                let Some(session) = sessions.get_mut(provider) else {
                    continue;
                };
                let transition = match tracked.ready(provider).await {
                    Ok(()) => {
                        info!("Provider '{}' running ({})", provider, spec.kind());
                        metrics.record_provider_started();
                        let handle: Arc<dyn StreamManager> = tracked.clone();
                        session.mark_running(handle)
                    }
                    Err(e) => {
                        error!("Provider '{}' failed to start: {}", provider, e);
                        metrics.record_provider_failure();
                        session.mark_failed(e.to_string())
                    }
                };
                if let Err(e) = transition {
                    warn!("{}", e);
                }
            }
            handles.push(tracked);
        }
        handles
    }

    /// List tools of every running provider and build their wrappers.
    ///
    /// Returns wrappers in provider order, each provider's tools in the
    /// order it reported them, plus the owning provider of each wrapper.
    async fn discover(
        &self,
        sessions: &BTreeMap<String, ProviderSession>,
    ) -> (Vec<ToolEntry>, HashMap<String, String>) {
        let running: Vec<(String, String, Arc<dyn StreamManager>)> = sessions
            .values()
            .filter(|s| s.is_running())
            .filter_map(|s| {
                s.handle().map(|h| {
                    (
                        s.name().to_string(),
                        s.namespace().to_string(),
                        Arc::clone(h),
                    )
                })
            })
            .collect();

        let listed: Vec<_> = stream::iter(running)
            .map(|(provider, namespace, handle)| async move {
                let tools = handle.list_tools(&provider).await;
                (provider, namespace, handle, tools)
            })
            .buffered(self.discovery_concurrency)
            .collect()
            .await;

        let mut wrappers = Vec::new();
        let mut owners = HashMap::new();
        for (provider, namespace, handle, tools) in listed {
            let tools = match tools {
                Ok(tools) => tools,
                Err(e) => {
                    error!("Tool discovery failed for provider '{}': {}", provider, e);
                    continue;
                }
            };
            debug!("Provider '{}' reported {} tool(s)", provider, tools.len());
            for meta in tools {
                if meta.name.is_empty() {
                    warn!("Provider '{}' reported a tool without a name", provider);
                    continue;
                }
                let entry = create_proxy_tool(&namespace, &meta.name, Arc::clone(&handle), &meta);
                if owners
                    .insert(entry.name().to_string(), provider.clone())
                    .is_some()
                {
                    warn!("Provider '{}' reported '{}' twice", provider, meta.name);
                    continue;
                }
                wrappers.push(entry);
            }
        }
        (wrappers, owners)
    }

    /// Drop stale names under the root, and dotted names entirely in
    /// flat-only mode, unless `keep_root_aliases` is set.
    fn prune(&self, root: &str, created: &HashSet<String>) -> Vec<String> {
        let settings = &self.config.proxy;
        if settings.keep_root_aliases {
            return Vec::new();
        }
        let dotted_prefix = format!("{root}.");
        let flat_prefix = format!("{}_", to_flat_name(root));

        let mut pruned = self.registry.remove_where(|entry| {
            let name = entry.name();
            if created.contains(name) {
                return false;
            }
            name.starts_with(&dotted_prefix)
                || (entry.origin == ToolOrigin::Alias && name.starts_with(&flat_prefix))
        });
        if !pruned.is_empty() {
            info!("Pruned {} stale tool name(s) under '{}'", pruned.len(), root);
        }

        if settings.only_openai_tools {
            let dotted = self
                .registry
                .remove_where(|entry| entry.name().starts_with(&dotted_prefix));
            debug!("Removed {} dotted name(s) in flat-only mode", dotted.len());
            pruned.extend(dotted);
        }
        pruned
    }

    /// Close every provider and remove all registry entries this manager
    /// created. A no-op when nothing is running.
    pub async fn stop_servers(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_locked().await;
    }

    async fn stop_locked(&self) {
        let (handles, created) = {
            let mut state = self.state.write();
            if !state.is_active() {
                debug!("Proxy layer not running; nothing to stop");
                return;
            }
            for session in state.sessions.values_mut() {
                session.stop();
            }
            state.transports.clear();
            state.dotted.clear();
            state.flat.clear();
            (
                std::mem::take(&mut state.handles),
                std::mem::take(&mut state.created),
            )
        };

        // Unpublish first so new lookups fail fast while calls drain.
        let removed = self
            .registry
            .remove_many(created.iter().map(String::as_str));
        self.adapter.refresh();

        for handle in handles {
            if let Err(e) = handle.shutdown().await {
                warn!("Error closing provider transport: {}", e);
            }
        }
        info!("Proxy layer stopped; removed {} tool entries", removed);
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Publicly visible proxy tools under the current naming policy.
    pub fn get_all_tools(&self) -> BTreeMap<String, Arc<ToolEntry>> {
        let state = self.state.read();
        let mut tools = BTreeMap::new();
        for alias in state.flat.keys() {
            if let Some(entry) = self.registry.get(alias) {
                tools.insert(alias.clone(), entry);
            }
        }
        if self.config.proxy.exposes_dotted() {
            for name in &state.dotted {
                if let Some(entry) = self.registry.get(name) {
                    tools.insert(name.clone(), entry);
                }
            }
        }
        tools
    }

    /// Registry name of the proxy tool `name` refers to, under any naming
    /// convention. Resolution is the registry's own; only names this manager
    /// created are accepted.
    pub fn resolve_name(&self, name: &str) -> Option<String> {
        let resolved = self.registry.resolve(name);
        let owned = self.state.read().created.contains(&resolved);
        (owned && self.registry.contains(&resolved)).then_some(resolved)
    }

    /// Call a proxy tool by dotted, flat or shortened name.
    pub async fn call_tool(&self, name: &str, args: ToolArgs) -> McpResult<Value> {
        let target = self
            .resolve_name(name)
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;
        debug!("Proxy call '{}' -> '{}'", name, target);
        self.registry.execute(&target, args).await
    }

    /// Send free text to every running provider exposing a
    /// [`TEXT_TOOL`] tool.
    ///
    /// Returns one item per provider: `{"server", "content"}` on success or
    /// `{"server", "error"}` on failure.
    pub async fn process_text(&self, text: &str) -> Vec<Value> {
        let targets: Vec<(String, Arc<dyn StreamManager>)> = {
            let state = self.state.read();
            state
                .sessions
                .values()
                .filter(|s| {
                    s.is_running()
                        && s
                            .wrapped_tools()
                            .contains(&format!("{}.{}", s.namespace(), TEXT_TOOL))
                })
                .filter_map(|s| s.handle().map(|h| (s.name().to_string(), Arc::clone(h))))
                .collect()
        };
        if targets.is_empty() {
            debug!("No running provider exposes '{}'", TEXT_TOOL);
            return Vec::new();
        }

        let mut args = ToolArgs::new();
        args.insert("text".to_string(), Value::String(text.to_string()));

        join_all(targets.into_iter().map(|(provider, handle)| {
            let args = args.clone();
            async move {
                let reply = handle
                    .call_tool(TEXT_TOOL, args, &provider)
                    .await
                    .and_then(CallEnvelope::into_result);
                match reply {
                    Ok(content) => json!({"server": provider, "content": content}),
                    Err(e) => {
                        warn!("process_text failed on provider '{}': {}", provider, e);
                        json!({"server": provider, "error": e.to_string()})
                    }
                }
            }
        }))
        .await
    }
}

impl std::fmt::Debug for ProxyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ProxyManager")
            .field("settings", &self.config.proxy)
            .field("providers", &state.sessions.keys().collect::<Vec<_>>())
            .field("tools", &state.created.len())
            .finish()
    }
}
