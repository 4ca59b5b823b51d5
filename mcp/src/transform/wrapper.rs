//! Forwarding wrappers for remote provider tools.

use std::sync::Arc;

use tracing::debug;

use crate::{
    core::transport::{RemoteToolMeta, StreamManager},
    inventory::{ToolDescriptor, ToolEntry, ToolHandler, ToolOrigin},
};

/// Immutable identity a wrapper forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    pub namespace: String,
    pub tool: String,
    pub provider: String,
}

impl ProxyTarget {
    pub fn new(namespace: &str, tool: &str) -> Self {
        let provider = namespace.rsplit('.').next().unwrap_or(namespace);
        Self {
            namespace: namespace.to_string(),
            tool: tool.to_string(),
            provider: provider.to_string(),
        }
    }

    /// `<namespace>.<tool>`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.tool)
    }
}

/// Build the registry entry for `<namespace>.<tool_name>` forwarding every
/// call to `stream_manager`.
///
/// The provider name is the last segment of `namespace`. Arguments reach
/// the provider unchanged; an error envelope surfaces as
/// [`McpError::RemoteTool`](crate::error::McpError::RemoteTool).
pub fn create_proxy_tool(
    namespace: &str,
    tool_name: &str,
    stream_manager: Arc<dyn StreamManager>,
    remote: &RemoteToolMeta,
) -> ToolEntry {
    let target = Arc::new(ProxyTarget::new(namespace, tool_name));
    let fq_name = target.qualified_name();
    let description = remote
        .description
        .clone()
        .unwrap_or_else(|| format!("Proxied tool: {fq_name}"));
    let descriptor =
        ToolDescriptor::from_input_schema(fq_name, description, remote.input_schema.clone());

    let handler = ToolHandler::from_async(move |args| {
        let target = Arc::clone(&target);
        let stream_manager = Arc::clone(&stream_manager);
        async move {
            debug!(
                "Calling remote {}.{} with {} argument(s)",
                target.provider,
                target.tool,
                args.len()
            );
            let envelope = stream_manager
                .call_tool(&target.tool, args, &target.provider)
                .await?;
            Ok(envelope.into_result()?)
        }
    });

    ToolEntry::new(descriptor, handler)
        .with_origin(ToolOrigin::Proxy)
        .passthrough_arguments()
}
