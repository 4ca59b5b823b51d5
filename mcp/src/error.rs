//! MCP proxy error types.
//!
//! Defines error variants for configuration, provider startup, tool lookup,
//! execution, and schema handling.

use std::time::Duration;

use thiserror::Error;

use crate::core::config::ConfigValidationError;

pub type McpResult<T> = Result<T, McpError>;

/// Boxed error carried by [`McpError::ToolExecution`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider '{provider}' failed to start: {reason}")]
    ProviderStart { provider: String, reason: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool '{tool}' timed out after {timeout:?}")]
    ToolTimeout { tool: String, timeout: Duration },

    #[error("Remote tool error: {0}")]
    RemoteTool(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Tool '{tool}' execution failed: {source}")]
    ToolExecution {
        tool: String,
        #[source]
        source: BoxError,
    },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Call cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl From<ConfigValidationError> for McpError {
    fn from(err: ConfigValidationError) -> Self {
        McpError::Config(err.to_string())
    }
}

impl McpError {
    /// Wrap a handler failure, passing through errors that already carry a
    /// proxy error (remote replies, nested lookups, timeouts).
    pub fn from_handler(tool: &str, err: anyhow::Error) -> Self {
        match err.downcast::<McpError>() {
            Ok(mcp) => mcp,
            Err(other) => McpError::ToolExecution {
                tool: tool.to_string(),
                source: other.into(),
            },
        }
    }

    /// True for errors that the dispatch layer should report as "unknown tool".
    pub fn is_not_found(&self) -> bool {
        matches!(self, McpError::ToolNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_from_handler_passes_through_mcp_errors() {
        let err = anyhow::Error::new(McpError::RemoteTool("boom".to_string()));
        let mapped = McpError::from_handler("proxy.bing.search", err);
        assert!(matches!(mapped, McpError::RemoteTool(ref m) if m == "boom"));
    }

    #[test]
    fn test_from_handler_wraps_foreign_errors() {
        let err = anyhow::anyhow!("division by zero");
        let mapped = McpError::from_handler("calc.divide", err);
        match &mapped {
            McpError::ToolExecution { tool, .. } => assert_eq!(tool, "calc.divide"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(mapped.to_string().contains("division by zero"));
        assert!(mapped.source().is_some());
    }

    #[test]
    fn test_timeout_display() {
        let err = McpError::ToolTimeout {
            tool: "slow".to_string(),
            timeout: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "Tool 'slow' timed out after 250ms");
    }
}
