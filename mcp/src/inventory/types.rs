//! Core types for the tool registry.

use std::{fmt, sync::Arc, time::Duration};

use futures::{
    future::BoxFuture,
    stream::{self, BoxStream},
    FutureExt, Stream, StreamExt,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{args::ToolArgs, descriptor::ToolDescriptor};
use crate::error::{McpError, McpResult};

pub type BlockingFn = dyn Fn(ToolArgs) -> anyhow::Result<Value> + Send + Sync;
pub type AsyncFn = dyn Fn(ToolArgs) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync;
pub type StreamFn = dyn Fn(ToolArgs) -> BoxStream<'static, anyhow::Result<Value>> + Send + Sync;

/// How a tool body executes. Chosen once when the handler is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionKind {
    /// Synchronous body, run on the blocking thread pool.
    Blocking,
    /// Future-returning body, awaited on the runtime.
    Async,
    /// Body producing a sequence of partial results.
    Stream,
}

/// Where a registry entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ToolOrigin {
    #[default]
    Local,
    /// Forwarding wrapper for a remote provider tool.
    Proxy,
    /// Flat-named alias delegating to another entry's body.
    Alias,
}

/// Tool body. Every variant takes keyword-style arguments.
#[derive(Clone)]
pub enum ToolHandler {
    Blocking(Arc<BlockingFn>),
    Async(Arc<AsyncFn>),
    Stream(Arc<StreamFn>),
}

impl ToolHandler {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(ToolArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        ToolHandler::Blocking(Arc::new(f))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        ToolHandler::Async(Arc::new(move |args| f(args).boxed()))
    }

    pub fn from_stream<F, S>(f: F) -> Self
    where
        F: Fn(ToolArgs) -> S + Send + Sync + 'static,
        S: Stream<Item = anyhow::Result<Value>> + Send + 'static,
    {
        ToolHandler::Stream(Arc::new(move |args| f(args).boxed()))
    }

    pub fn kind(&self) -> ExecutionKind {
        match self {
            ToolHandler::Blocking(_) => ExecutionKind::Blocking,
            ToolHandler::Async(_) => ExecutionKind::Async,
            ToolHandler::Stream(_) => ExecutionKind::Stream,
        }
    }
}

impl fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ToolHandler::{:?}", self.kind())
    }
}

/// Registry entry: descriptor plus the owned callable.
#[derive(Debug, Clone)]
pub struct ToolEntry {
    pub descriptor: ToolDescriptor,
    pub handler: ToolHandler,
    pub timeout: Option<Duration>,
    pub origin: ToolOrigin,
    /// For an alias, the name of the entry it was cut from.
    pub alias_of: Option<String>,
    /// Fill declared defaults and check required arguments before invoking.
    pub bind_arguments: bool,
}

impl ToolEntry {
    /// Local tool entry. Arguments are bound against the descriptor.
    pub fn new(descriptor: ToolDescriptor, handler: ToolHandler) -> Self {
        Self {
            descriptor,
            handler,
            timeout: None,
            origin: ToolOrigin::Local,
            alias_of: None,
            bind_arguments: true,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: ToolOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Pass arguments to the body exactly as received.
    #[must_use]
    pub fn passthrough_arguments(mut self) -> Self {
        self.bind_arguments = false;
        self
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn kind(&self) -> ExecutionKind {
        self.handler.kind()
    }

    /// Alias of this entry under `name` sharing the same body.
    pub fn alias(&self, name: impl Into<String>) -> Self {
        Self {
            descriptor: self.descriptor.renamed(name),
            handler: self.handler.clone(),
            timeout: self.timeout,
            origin: ToolOrigin::Alias,
            alias_of: Some(self.name().to_string()),
            bind_arguments: self.bind_arguments,
        }
    }

    pub(crate) fn bind(&self, mut args: ToolArgs) -> McpResult<ToolArgs> {
        if !self.bind_arguments {
            return Ok(args);
        }
        for param in self.descriptor.parameters() {
            if args.contains_key(&param.name) {
                continue;
            }
            if let Some(default) = &param.default {
                args.insert(param.name.clone(), default.clone());
            } else if param.required {
                return Err(McpError::InvalidArguments(format!(
                    "missing required argument '{}' for tool '{}'",
                    param.name,
                    self.name()
                )));
            }
        }
        Ok(args)
    }

    /// Run the body once and produce a single value.
    ///
    /// Stream bodies are drained into a JSON array. No deadline is applied
    /// here; the registry adds the entry's timeout.
    pub async fn invoke(&self, args: ToolArgs) -> McpResult<Value> {
        let args = self.bind(args)?;
        let tool = self.name();
        match &self.handler {
            ToolHandler::Blocking(f) => {
                let f = Arc::clone(f);
                let joined = tokio::task::spawn_blocking(move || f(args)).await;
                match joined {
                    Ok(result) => result.map_err(|e| McpError::from_handler(tool, e)),
                    Err(join_err) => Err(McpError::ToolExecution {
                        tool: tool.to_string(),
                        source: Box::new(join_err),
                    }),
                }
            }
            ToolHandler::Async(f) => f(args)
                .await
                .map_err(|e| McpError::from_handler(tool, e)),
            ToolHandler::Stream(f) => {
                let mut chunks = f(args);
                let mut collected = Vec::new();
                while let Some(chunk) = chunks.next().await {
                    collected.push(chunk.map_err(|e| McpError::from_handler(tool, e))?);
                }
                Ok(Value::Array(collected))
            }
        }
    }

    /// Run the body as a stream of chunks.
    ///
    /// Blocking and async bodies yield exactly one item. Dropping the
    /// returned stream drops the producer.
    pub fn invoke_stream(&self, args: ToolArgs) -> BoxStream<'static, McpResult<Value>> {
        let args = match self.bind(args) {
            Ok(args) => args,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };
        let tool = self.name().to_string();
        match &self.handler {
            ToolHandler::Stream(f) => f(args)
                .map(move |chunk| chunk.map_err(|e| McpError::from_handler(&tool, e)))
                .boxed(),
            _ => {
                let entry = self.clone();
                stream::once(async move { entry.invoke(args).await }).boxed()
            }
        }
    }
}
