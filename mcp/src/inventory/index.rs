//! Tool registry with synchronous naming index maintenance.
//!
//! The registry is the single owner of all tool entries. Every mutation
//! (insert, replace, remove) and the matching [`NamingIndex`] rebuild happen
//! inside one write-lock critical section, so a resolver never observes an
//! index built before the latest change. The lock is never held across an
//! await point.

use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::{
    stream::{self, BoxStream},
    StreamExt,
};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{
    args::ToolArgs,
    descriptor::ToolSpec,
    naming::NamingIndex,
    types::{ExecutionKind, ToolEntry, ToolHandler},
};
use crate::{
    core::metrics::{CallOutcome, McpMetrics},
    error::{McpError, McpResult},
};

#[derive(Default)]
struct RegistryState {
    entries: HashMap<String, Arc<ToolEntry>>,
    /// Canonical names in first-registration order.
    order: Vec<String>,
    naming: Arc<NamingIndex>,
}

impl RegistryState {
    fn rebuild_index(&mut self) {
        let entries = &self.entries;
        // Aliases stand in for originals that were pruned away.
        let orphaned = self.order.iter().filter_map(|name| {
            let original = entries.get(name)?.alias_of.as_deref()?;
            (!entries.contains_key(original)).then_some((original, name.as_str()))
        });
        let naming =
            NamingIndex::build_with_aliases(self.order.iter().map(String::as_str), orphaned);
        self.naming = Arc::new(naming);
    }

    fn put(&mut self, entry: ToolEntry) -> Option<Arc<ToolEntry>> {
        let name = entry.name().to_string();
        let previous = self.entries.insert(name.clone(), Arc::new(entry));
        if previous.is_some() {
            warn!("Tool '{}' already registered, replacing previous entry", name);
        } else {
            self.order.push(name);
        }
        previous
    }
}

pub struct ToolRegistry {
    state: RwLock<RegistryState>,
    default_timeout: Option<Duration>,
    metrics: Arc<McpMetrics>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            default_timeout: None,
            metrics: Arc::new(McpMetrics::new()),
        }
    }

    /// Deadline applied to entries that carry no timeout of their own.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<McpMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<McpMetrics> {
        &self.metrics
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    // ========================================================================
    // Mutation
    // ========================================================================

    /// Register a local tool and return its canonical name.
    ///
    /// An existing entry with the same name is replaced.
    pub fn register(&self, spec: ToolSpec, handler: ToolHandler) -> McpResult<String> {
        let (descriptor, timeout) = spec.build()?;
        let name = descriptor.name().to_string();
        self.insert(ToolEntry::new(descriptor, handler).with_timeout(timeout));
        Ok(name)
    }

    /// Insert an entry, replacing any entry with the same name.
    pub fn insert(&self, entry: ToolEntry) -> Option<Arc<ToolEntry>> {
        let mut state = self.state.write();
        let previous = state.put(entry);
        state.rebuild_index();
        previous
    }

    /// Insert several entries with a single index rebuild.
    pub fn insert_many<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = ToolEntry>,
    {
        let mut state = self.state.write();
        let mut count = 0;
        for entry in entries {
            state.put(entry);
            count += 1;
        }
        if count > 0 {
            state.rebuild_index();
        }
        count
    }

    pub fn remove(&self, name: &str) -> Option<Arc<ToolEntry>> {
        let mut state = self.state.write();
        let removed = state.entries.remove(name)?;
        state.order.retain(|n| n != name);
        state.rebuild_index();
        Some(removed)
    }

    /// Remove the named entries; returns how many existed.
    pub fn remove_many<'a, I>(&self, names: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut state = self.state.write();
        let mut removed = 0;
        for name in names {
            if state.entries.remove(name).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            let RegistryState { entries, order, .. } = &mut *state;
            order.retain(|n| entries.contains_key(n));
            state.rebuild_index();
        }
        removed
    }

    /// Remove every entry matching `pred`; returns the removed names.
    pub fn remove_where<F>(&self, pred: F) -> Vec<String>
    where
        F: Fn(&ToolEntry) -> bool,
    {
        let mut state = self.state.write();
        let doomed: Vec<String> = state
            .order
            .iter()
            .filter(|name| state.entries.get(*name).is_some_and(|e| pred(e.as_ref())))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return doomed;
        }
        for name in &doomed {
            state.entries.remove(name);
        }
        let RegistryState { entries, order, .. } = &mut *state;
        order.retain(|n| entries.contains_key(n));
        state.rebuild_index();
        debug!("Removed {} tool entries", doomed.len());
        doomed
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Resolve any naming convention to a canonical name, or return the
    /// candidate unchanged.
    pub fn resolve(&self, candidate: &str) -> String {
        let state = self.state.read();
        state
            .naming
            .resolve(candidate, |name| state.entries.contains_key(name))
    }

    /// Exact-name lookup.
    pub fn get(&self, name: &str) -> Option<Arc<ToolEntry>> {
        self.state.read().entries.get(name).cloned()
    }

    /// Resolve then look up.
    pub fn lookup(&self, candidate: &str) -> Option<Arc<ToolEntry>> {
        let state = self.state.read();
        let resolved = state
            .naming
            .resolve(candidate, |name| state.entries.contains_key(name));
        state.entries.get(&resolved).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().entries.contains_key(name)
    }

    /// Canonical names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.state.read().order.clone()
    }

    /// Entries in registration order.
    pub fn entries(&self) -> Vec<Arc<ToolEntry>> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|name| state.entries.get(name).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Snapshot of the naming index matching the current key set.
    pub fn naming_index(&self) -> Arc<NamingIndex> {
        Arc::clone(&self.state.read().naming)
    }

    /// MCP `tools/list` payload for every entry.
    pub fn list_tools(&self) -> Vec<Value> {
        self.entries()
            .iter()
            .map(|entry| entry.descriptor.to_mcp_tool())
            .collect()
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Resolve `name`, then run the entry under its deadline.
    pub async fn execute(&self, name: &str, args: ToolArgs) -> McpResult<Value> {
        let entry = self
            .lookup(name)
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;
        let tool = entry.name();
        debug!("Executing tool '{}' ({:?})", tool, entry.kind());

        self.metrics.record_call_start(tool);
        let started = Instant::now();
        let result = match (entry.kind(), entry.timeout.or(self.default_timeout)) {
            // Stream deadlines apply per chunk, same as `execute_stream`.
            (ExecutionKind::Stream, Some(limit)) => {
                let chunks = entry.invoke_stream(args);
                collect_chunks(with_chunk_deadline(chunks, tool.to_string(), limit)).await
            }
            (_, Some(limit)) => tokio::time::timeout(limit, entry.invoke(args))
                .await
                .unwrap_or_else(|_| {
                    Err(McpError::ToolTimeout {
                        tool: tool.to_string(),
                        timeout: limit,
                    })
                }),
            (_, None) => entry.invoke(args).await,
        };

        let outcome = match &result {
            Ok(_) => CallOutcome::Success,
            Err(McpError::ToolTimeout { .. }) => CallOutcome::Timeout,
            Err(_) => CallOutcome::Failure,
        };
        self.metrics
            .record_call_end(tool, outcome, started.elapsed().as_millis() as u64);
        result
    }

    /// Resolve `name` and run the entry as a stream of chunks.
    ///
    /// The deadline applies to each chunk separately: a stalled producer is
    /// reported at the next chunk boundary, after which the stream ends and
    /// the producer is dropped. Dropping the returned stream also drops the
    /// producer.
    pub fn execute_stream(
        &self,
        name: &str,
        args: ToolArgs,
    ) -> McpResult<BoxStream<'static, McpResult<Value>>> {
        let entry = self
            .lookup(name)
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;
        let chunks = entry.invoke_stream(args);
        Ok(match entry.timeout.or(self.default_timeout) {
            Some(limit) => with_chunk_deadline(chunks, entry.name().to_string(), limit),
            None => chunks,
        })
    }
}

/// Drain a chunk stream into a JSON array, stopping at the first error.
async fn collect_chunks(mut chunks: BoxStream<'static, McpResult<Value>>) -> McpResult<Value> {
    let mut collected = Vec::new();
    while let Some(chunk) = chunks.next().await {
        collected.push(chunk?);
    }
    Ok(Value::Array(collected))
}

fn with_chunk_deadline(
    chunks: BoxStream<'static, McpResult<Value>>,
    tool: String,
    limit: Duration,
) -> BoxStream<'static, McpResult<Value>> {
    stream::unfold(Some(chunks), move |state| {
        let tool = tool.clone();
        async move {
            let mut chunks = state?;
            match tokio::time::timeout(limit, chunks.next()).await {
                Ok(Some(item)) => Some((item, Some(chunks))),
                Ok(None) => None,
                Err(_) => Some((
                    Err(McpError::ToolTimeout {
                        tool,
                        timeout: limit,
                    }),
                    None,
                )),
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::inventory::{args::into_args, types::ToolOrigin};

    fn echo_spec(name: &str) -> ToolSpec {
        ToolSpec::new(name).description("Echo").param::<String>("text")
    }

    fn echo_handler(tag: &'static str) -> ToolHandler {
        ToolHandler::from_fn(move |args| Ok(json!({"tag": tag, "args": args})))
    }

    #[test]
    fn test_register_and_get() {
        let registry = ToolRegistry::new();
        let name = registry.register(echo_spec("echo"), echo_handler("a")).unwrap();
        assert_eq!(name, "echo");
        assert!(registry.contains("echo"));
        assert_eq!(registry.get("echo").unwrap().origin, ToolOrigin::Local);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_rejects_bad_schema() {
        let registry = ToolRegistry::new();
        let spec = ToolSpec::new("dup").param::<i64>("x").param::<i64>("x");
        assert!(matches!(
            registry.register(spec, echo_handler("a")),
            Err(McpError::Schema(_))
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let registry = ToolRegistry::new();
        registry.register(echo_spec("wiki.search"), echo_handler("first")).unwrap();
        registry.register(echo_spec("wiki.search"), echo_handler("second")).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), vec!["wiki.search"]);
        for name in ["wiki.search", "wiki_search", "search"] {
            let out = registry
                .execute(name, into_args(json!({"text": "hi"})).unwrap())
                .await
                .unwrap();
            assert_eq!(out["tag"], "second");
        }
    }

    #[test]
    fn test_index_rebuilt_on_every_mutation() {
        let registry = ToolRegistry::new();
        registry.register(echo_spec("wikipedia.search"), echo_handler("a")).unwrap();
        assert_eq!(registry.resolve("wikipedia_search"), "wikipedia.search");

        registry.remove("wikipedia.search");
        assert_eq!(registry.resolve("wikipedia_search"), "wikipedia_search");
        assert!(registry.naming_index().canonical_for_flat("wikipedia_search").is_none());
    }

    #[test]
    fn test_remove_many_and_where() {
        let registry = ToolRegistry::new();
        for name in ["a.one", "a.two", "b.one"] {
            registry.register(echo_spec(name), echo_handler("x")).unwrap();
        }
        assert_eq!(registry.remove_many(["a.one", "missing"]), 1);
        let removed = registry.remove_where(|e| e.name().starts_with("a."));
        assert_eq!(removed, vec!["a.two"]);
        assert_eq!(registry.names(), vec!["b.one"]);
        assert_eq!(registry.resolve("one"), "b.one");
    }

    #[tokio::test]
    async fn test_execute_not_found() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("nonexistent.tool", ToolArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ToolNotFound(ref n) if n == "nonexistent.tool"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_async_timeout() {
        let registry = ToolRegistry::new();
        registry
            .register(
                ToolSpec::new("slow").timeout(Duration::from_millis(20)),
                ToolHandler::from_async(|_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, anyhow::Error>(Value::Null)
                }),
            )
            .unwrap();

        let err = registry.execute("slow", ToolArgs::new()).await.unwrap_err();
        assert!(matches!(err, McpError::ToolTimeout { ref tool, .. } if tool == "slow"));
        assert_eq!(registry.metrics().snapshot().timed_out_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timeout_applies() {
        let registry = ToolRegistry::new().with_default_timeout(Duration::from_millis(20));
        registry
            .register(
                ToolSpec::new("slow"),
                ToolHandler::from_async(|_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, anyhow::Error>(Value::Null)
                }),
            )
            .unwrap();
        assert!(matches!(
            registry.execute("slow", ToolArgs::new()).await,
            Err(McpError::ToolTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_blocking_error_wrapped() {
        let registry = ToolRegistry::new();
        registry
            .register(
                ToolSpec::new("calc.divide").param::<i64>("a").param::<i64>("b"),
                ToolHandler::from_fn(|args| {
                    let b: i64 = crate::inventory::args::arg(&args, "b")?;
                    if b == 0 {
                        anyhow::bail!("division by zero");
                    }
                    Ok(json!(crate::inventory::args::arg::<i64>(&args, "a")? / b))
                }),
            )
            .unwrap();

        let ok = registry
            .execute("calc_divide", into_args(json!({"a": 9, "b": 3})).unwrap())
            .await
            .unwrap();
        assert_eq!(ok, json!(3));

        let err = registry
            .execute("calc.divide", into_args(json!({"a": 1, "b": 0})).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ToolExecution { .. }));
        assert!(err.to_string().contains("division by zero"));

        let snapshot = registry.metrics().snapshot();
        assert_eq!(snapshot.successful_calls, 1);
        assert_eq!(snapshot.failed_calls, 1);
    }

    #[tokio::test]
    async fn test_stream_chunks_and_collect() {
        let registry = ToolRegistry::new();
        registry
            .register(
                ToolSpec::new("count").param::<i64>("n"),
                ToolHandler::from_stream(|args| {
                    let n = args.get("n").and_then(Value::as_i64).unwrap_or(0);
                    stream::iter((0..n).map(|i| Ok::<_, anyhow::Error>(json!(i))))
                }),
            )
            .unwrap();

        let chunks: Vec<Value> = registry
            .execute_stream("count", into_args(json!({"n": 3})).unwrap())
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec![json!(0), json!(1), json!(2)]);

        let collected = registry
            .execute("count", into_args(json!({"n": 2})).unwrap())
            .await
            .unwrap();
        assert_eq!(collected, json!([0, 1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_deadline_per_chunk() {
        let registry = ToolRegistry::new();
        registry
            .register(
                ToolSpec::new("ticker").timeout(Duration::from_millis(80)),
                ToolHandler::from_stream(|_| {
                    stream::iter(0..3).then(|i| async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, anyhow::Error>(json!(i))
                    })
                }),
            )
            .unwrap();
        registry
            .register(
                ToolSpec::new("stalled").timeout(Duration::from_millis(30)),
                ToolHandler::from_stream(|_| {
                    stream::iter(0..3).then(|i| async move {
                        if i == 1 {
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                        Ok::<_, anyhow::Error>(json!(i))
                    })
                }),
            )
            .unwrap();

        // Whole call exceeds the deadline, each chunk does not.
        let ticks: Vec<McpResult<Value>> = registry
            .execute_stream("ticker", ToolArgs::new())
            .unwrap()
            .collect()
            .await;
        assert_eq!(ticks.len(), 3);
        assert!(ticks.iter().all(Result::is_ok));

        let stalled: Vec<McpResult<Value>> = registry
            .execute_stream("stalled", ToolArgs::new())
            .unwrap()
            .collect()
            .await;
        assert_eq!(stalled.len(), 2);
        assert_eq!(stalled[0].as_ref().unwrap(), &json!(0));
        assert!(matches!(stalled[1], Err(McpError::ToolTimeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_applies_stream_deadline_per_chunk() {
        let registry = ToolRegistry::new();
        registry
            .register(
                ToolSpec::new("ticker").timeout(Duration::from_millis(80)),
                ToolHandler::from_stream(|_| {
                    stream::iter(0..3).then(|i| async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, anyhow::Error>(json!(i))
                    })
                }),
            )
            .unwrap();
        registry
            .register(
                ToolSpec::new("stalled").timeout(Duration::from_millis(30)),
                ToolHandler::from_stream(|_| {
                    stream::iter(0..3).then(|i| async move {
                        if i == 1 {
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                        Ok::<_, anyhow::Error>(json!(i))
                    })
                }),
            )
            .unwrap();

        let ticks = registry.execute("ticker", ToolArgs::new()).await.unwrap();
        assert_eq!(ticks, json!([0, 1, 2]));

        let err = registry
            .execute("stalled", ToolArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ToolTimeout { ref tool, .. } if tool == "stalled"));

        let snapshot = registry.metrics().snapshot();
        assert_eq!(snapshot.successful_calls, 1);
        assert_eq!(snapshot.timed_out_calls, 1);
    }

    #[test]
    fn test_orphaned_alias_reachable_by_original_suffix() {
        let registry = ToolRegistry::new();
        let (descriptor, _) = echo_spec("proxy.bing.search").build().unwrap();
        let original = ToolEntry::new(descriptor, echo_handler("remote"));
        let alias = original.alias("proxy_bing_search");
        registry.insert_many([original, alias]);

        // Original still present: shortened names reach it.
        assert_eq!(registry.resolve("bing.search"), "proxy.bing.search");

        registry.remove("proxy.bing.search");
        for candidate in ["proxy.bing.search", "bing.search", "bing_search", "search"] {
            assert_eq!(registry.resolve(candidate), "proxy_bing_search", "{candidate}");
        }
    }

    #[tokio::test]
    async fn test_dropping_stream_closes_producer() {
        let closed = Arc::new(AtomicBool::new(false));
        let registry = ToolRegistry::new();
        let flag = Arc::clone(&closed);
        registry
            .register(
                ToolSpec::new("feed"),
                ToolHandler::from_stream(move |_| {
                    let (tx, rx) = mpsc::channel::<anyhow::Result<Value>>(1);
                    let flag = Arc::clone(&flag);
                    tokio::spawn(async move {
                        let mut i = 0;
                        while tx.send(Ok(json!(i))).await.is_ok() {
                            i += 1;
                        }
                        flag.store(true, Ordering::SeqCst);
                    });
                    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|v| (v, rx)) })
                }),
            )
            .unwrap();

        let mut chunks = registry.execute_stream("feed", ToolArgs::new()).unwrap();
        assert_eq!(chunks.next().await.unwrap().unwrap(), json!(0));
        drop(chunks);

        for _ in 0..100 {
            if closed.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let registry = Arc::new(ToolRegistry::new());
        let mut handles = vec![];

        for i in 0..10 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let name = format!("svc{i}.echo");
                registry.register(echo_spec(&name), echo_handler("c")).unwrap();
                assert_eq!(registry.resolve(&format!("svc{i}_echo")), name);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.len(), 10);
        assert_eq!(registry.list_tools().len(), 10);
    }
}
