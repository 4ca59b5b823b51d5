//! Turning remote tool metadata into registry entries.
//!
//! - [`create_proxy_tool`] builds the dotted forwarding wrapper for one
//!   remote tool.
//! - [`OpenAiToolsAdapter`] publishes flat-named aliases of dotted entries.

mod openai;
mod wrapper;

pub use openai::{AliasOutcome, OpenAiToolsAdapter};
pub use wrapper::{create_proxy_tool, ProxyTarget};
