use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use mcp_proxy::{ProxyManager, RmcpConnector, RuntimeConfig, ToolRegistry};
use tracing::{info, warn};

mod logging;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Runtime configuration (YAML)
    #[arg(short, long, env = "MCP_RUNTIME_CONFIG")]
    config: PathBuf,

    /// Base directory for relative provider `location`s (defaults to the
    /// config file's directory)
    #[arg(long)]
    project_root: Option<PathBuf>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Per-call timeout for tools without their own, in seconds
    #[arg(long, env = "MCP_TOOL_TIMEOUT_SECS")]
    tool_timeout_secs: Option<u64>,
}

impl Cli {
    fn project_root(&self) -> PathBuf {
        self.project_root.clone().unwrap_or_else(|| {
            self.config
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_json)?;

    let config = RuntimeConfig::from_file(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?
        .with_env_overrides();

    let mut registry = ToolRegistry::new();
    if let Some(secs) = cli.tool_timeout_secs {
        registry = registry.with_default_timeout(Duration::from_secs(secs));
    }
    let registry = Arc::new(registry);

    let manager = ProxyManager::new(
        config,
        cli.project_root(),
        Arc::clone(&registry),
        Arc::new(RmcpConnector::new()),
    )?;

    let report = manager.start_servers().await;
    for (provider, reason) in &report.failed {
        warn!("Provider '{}' unavailable: {}", provider, reason);
    }
    let exposed = manager.get_all_tools();
    info!("Exposing {} tool(s)", exposed.len());
    for (name, entry) in &exposed {
        info!("  {} - {}", name, entry.descriptor.description());
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutting down");

    manager.stop_servers().await;
    let stats = registry.metrics().snapshot();
    info!(
        "Served {} call(s), {:.1}% successful",
        stats.total_calls,
        stats.success_rate()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_root_defaults_to_config_dir() {
        let cli = Cli::parse_from(["mcp-runtime", "--config", "/etc/mcp/runtime.yaml"]);
        assert_eq!(cli.project_root(), PathBuf::from("/etc/mcp"));
        assert_eq!(cli.log_level, "info");

        let cli = Cli::parse_from(["mcp-runtime", "-c", "runtime.yaml", "--log-json"]);
        assert_eq!(cli.project_root(), PathBuf::from("."));
        assert!(cli.log_json);

        let cli = Cli::parse_from([
            "mcp-runtime",
            "--config",
            "runtime.yaml",
            "--project-root",
            "/srv/app",
        ]);
        assert_eq!(cli.project_root(), PathBuf::from("/srv/app"));
    }
}
