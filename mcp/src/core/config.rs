//! Proxy configuration types and loading.
//!
//! Mirrors the `proxy` and `mcp_servers` sections of the runtime YAML file:
//!
//! ```yaml
//! proxy:
//!   enabled: true
//!   namespace: proxy
//!   openai_compatible: true
//! mcp_servers:
//!   time:
//!     type: stdio
//!     command: uvx
//!     args: ["mcp-server-time"]
//!   search:
//!     type: sse
//!     url: http://localhost:8020/sse
//!     api_key: secret
//! ```

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::McpResult;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Side-car providers keyed by provider name.
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, McpServerEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxySettings {
    #[serde(default)]
    pub enabled: bool,

    /// Root prefix of dotted proxy names.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Keep dotted names under the root even when they would be pruned.
    #[serde(default)]
    pub keep_root_aliases: bool,

    /// Also register flat-named aliases.
    #[serde(default)]
    pub openai_compatible: bool,

    /// Expose only flat aliases. Implies `openai_compatible`.
    #[serde(default)]
    pub only_openai_tools: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            namespace: default_namespace(),
            keep_root_aliases: false,
            openai_compatible: false,
            only_openai_tools: false,
        }
    }
}

impl ProxySettings {
    /// Settings with `only_openai_tools` forcing `openai_compatible` on.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.only_openai_tools {
            self.openai_compatible = true;
        }
        self
    }

    /// Whether dotted names stay visible through `get_all_tools`.
    pub fn exposes_dotted(&self) -> bool {
        !self.only_openai_tools || self.keep_root_aliases
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Sse,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => f.write_str("stdio"),
            TransportKind::Sse => f.write_str("sse"),
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct McpServerEntry {
    #[serde(rename = "type", default)]
    pub kind: TransportKind,

    /// Executable for stdio providers.
    #[serde(default = "default_command")]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for stdio providers, relative to the project root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Endpoint for SSE providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Bearer token for SSE providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for McpServerEntry {
    fn default() -> Self {
        Self {
            kind: TransportKind::Stdio,
            command: default_command(),
            args: Vec::new(),
            location: None,
            url: None,
            api_key: None,
            enabled: true,
        }
    }
}

impl fmt::Debug for McpServerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpServerEntry")
            .field("kind", &self.kind)
            .field("command", &self.command)
            .field("args", &self.args)
            .field("location", &self.location)
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "****"))
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl McpServerEntry {
    /// Working directory for a stdio provider.
    pub fn working_dir(&self, project_root: &Path) -> Option<PathBuf> {
        self.location
            .as_deref()
            .filter(|loc| !loc.is_empty())
            .map(|loc| project_root.join(loc))
    }
}

fn default_namespace() -> String {
    "proxy".to_string()
}

fn default_command() -> String {
    "python".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("proxy namespace must not be empty")]
    EmptyNamespace,

    #[error("proxy namespace '{0}' contains invalid characters")]
    InvalidNamespace(String),

    #[error("provider name '{0}' is invalid: must be non-empty and contain no '.'")]
    InvalidServerName(String),

    #[error("provider '{server}' is missing required field '{field}'")]
    MissingField { server: String, field: &'static str },
}

impl RuntimeConfig {
    /// Load configuration from a YAML file.
    pub async fn from_file(path: impl AsRef<Path>) -> McpResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> McpResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Apply `MCP_PROXY_ENABLED` and `MCP_PROXY_NAMESPACE` when set.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var("MCP_PROXY_ENABLED") {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.proxy.enabled = true,
                "0" | "false" | "no" | "off" => self.proxy.enabled = false,
                _ => tracing::warn!("Ignoring invalid MCP_PROXY_ENABLED value '{}'", value),
            }
        }
        if let Ok(namespace) = std::env::var("MCP_PROXY_NAMESPACE") {
            if !namespace.trim().is_empty() {
                self.proxy.namespace = namespace.trim().to_string();
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let ns = &self.proxy.namespace;
        if ns.is_empty() {
            return Err(ConfigValidationError::EmptyNamespace);
        }
        let valid_ns = ns
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !ns.starts_with('.')
            && !ns.ends_with('.');
        if !valid_ns {
            return Err(ConfigValidationError::InvalidNamespace(ns.clone()));
        }

        for (name, server) in &self.mcp_servers {
            if name.is_empty() || name.contains('.') {
                return Err(ConfigValidationError::InvalidServerName(name.clone()));
            }
            match server.kind {
                TransportKind::Stdio if server.command.trim().is_empty() => {
                    return Err(ConfigValidationError::MissingField {
                        server: name.clone(),
                        field: "command",
                    });
                }
                TransportKind::Sse if !server.url.as_deref().is_some_and(|u| !u.trim().is_empty()) => {
                    return Err(ConfigValidationError::MissingField {
                        server: name.clone(),
                        field: "url",
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Enabled providers in name order.
    pub fn enabled_servers(&self) -> impl Iterator<Item = (&String, &McpServerEntry)> {
        self.mcp_servers.iter().filter(|(_, s)| s.enabled)
    }
}
