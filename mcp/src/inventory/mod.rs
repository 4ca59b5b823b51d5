//! Tool registry and naming.
//!
//! This module provides tool storage and lookup with support for:
//! - Schema-described descriptors built from typed parameter lists
//! - Blocking, async and streaming tool bodies
//! - Dotted, flat and shortened-suffix tool names

pub mod args;
pub mod descriptor;
pub mod index;
pub mod naming;
pub mod types;

pub use args::{arg, into_args, opt_arg, ToolArgs};
pub use descriptor::{JsonType, ParamSpec, ParamType, ToolDescriptor, ToolSpec};
pub use index::ToolRegistry;
pub use naming::{to_dotted_name, to_flat_name, NamingCounts, NamingIndex};
pub use types::{ExecutionKind, ToolEntry, ToolHandler, ToolOrigin};
