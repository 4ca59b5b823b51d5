//! Execution and provider counters for the tool registry and proxy layer.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// How a tool call finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    Timeout,
}

/// Metrics for tool execution and provider lifecycle.
#[derive(Default)]
pub struct McpMetrics {
    // Call metrics
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    timed_out_calls: AtomicU64,
    active_executions: AtomicU64,

    // Provider metrics
    providers_started: AtomicU64,
    provider_failures: AtomicU64,
    remote_tools_registered: AtomicU64,

    // Per-tool latency, keyed by canonical name
    tool_latencies: DashMap<String, ToolLatency>,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

impl McpMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call_start(&self, _tool: &str) {
        bump(&self.total_calls);
        bump(&self.active_executions);
    }

    /// Close out a call started with [`record_call_start`](Self::record_call_start).
    pub fn record_call_end(&self, tool: &str, outcome: CallOutcome, duration_ms: u64) {
        self.active_executions.fetch_sub(1, Ordering::Relaxed);
        bump(match outcome {
            CallOutcome::Success => &self.successful_calls,
            CallOutcome::Failure => &self.failed_calls,
            CallOutcome::Timeout => &self.timed_out_calls,
        });

        // Fast path avoids allocating the key for tools already seen.
        match self.tool_latencies.get(tool) {
            Some(latency) => latency.observe(duration_ms),
            None => self
                .tool_latencies
                .entry(tool.to_string())
                .or_default()
                .observe(duration_ms),
        }
    }

    pub fn record_provider_started(&self) {
        bump(&self.providers_started);
    }

    pub fn record_provider_failure(&self) {
        bump(&self.provider_failures);
    }

    /// Count remote tools published by one discovery pass.
    pub fn record_remote_tools(&self, count: usize) {
        self.remote_tools_registered
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_calls: read(&self.total_calls),
            successful_calls: read(&self.successful_calls),
            failed_calls: read(&self.failed_calls),
            timed_out_calls: read(&self.timed_out_calls),
            active_executions: read(&self.active_executions),
            providers_started: read(&self.providers_started),
            provider_failures: read(&self.provider_failures),
            remote_tools_registered: read(&self.remote_tools_registered),
        }
    }

    pub fn tool_latency(&self, tool: &str) -> Option<LatencySnapshot> {
        self.tool_latencies.get(tool).map(|l| l.summarize())
    }

    /// Latency summaries of every tool called so far, sorted by name.
    pub fn all_tool_latencies(&self) -> Vec<(String, LatencySnapshot)> {
        let mut all: Vec<_> = self
            .tool_latencies
            .iter()
            .map(|e| (e.key().clone(), e.value().summarize()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

/// Running latency aggregate of one tool.
pub struct ToolLatency {
    calls: AtomicU64,
    sum_ms: AtomicU64,
    fastest_ms: AtomicU64,
    slowest_ms: AtomicU64,
}

impl Default for ToolLatency {
    fn default() -> Self {
        Self {
            calls: AtomicU64::new(0),
            sum_ms: AtomicU64::new(0),
            fastest_ms: AtomicU64::new(u64::MAX),
            slowest_ms: AtomicU64::new(0),
        }
    }
}

impl ToolLatency {
    fn observe(&self, ms: u64) {
        bump(&self.calls);
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.fastest_ms.fetch_min(ms, Ordering::Relaxed);
        self.slowest_ms.fetch_max(ms, Ordering::Relaxed);
    }

    fn summarize(&self) -> LatencySnapshot {
        let count = read(&self.calls);
        let fastest = read(&self.fastest_ms);
        LatencySnapshot {
            count,
            avg_ms: read(&self.sum_ms).checked_div(count).unwrap_or(0),
            min_ms: if count == 0 { 0 } else { fastest },
            max_ms: read(&self.slowest_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub timed_out_calls: u64,
    pub active_executions: u64,
    pub providers_started: u64,
    pub provider_failures: u64,
    pub remote_tools_registered: u64,
}

impl MetricsSnapshot {
    /// Percentage of finished calls that succeeded.
    pub fn success_rate(&self) -> f64 {
        match self.successful_calls + self.failed_calls + self.timed_out_calls {
            0 => 100.0,
            finished => self.successful_calls as f64 * 100.0 / finished as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencySnapshot {
    pub count: u64,
    pub avg_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}
