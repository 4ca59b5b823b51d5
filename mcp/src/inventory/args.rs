//! Keyword-style tool arguments and typed accessors for handlers.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{McpError, McpResult};

/// Arguments a tool is invoked with: a JSON object keyed by parameter name.
pub type ToolArgs = Map<String, Value>;

/// Decode a required argument.
pub fn arg<T: DeserializeOwned>(args: &ToolArgs, name: &str) -> McpResult<T> {
    let value = args
        .get(name)
        .ok_or_else(|| McpError::InvalidArguments(format!("missing argument '{name}'")))?;
    decode(name, value)
}

/// Decode an optional argument. JSON `null` counts as absent.
pub fn opt_arg<T: DeserializeOwned>(args: &ToolArgs, name: &str) -> McpResult<Option<T>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => decode(name, value).map(Some),
    }
}

/// Convert a JSON value into [`ToolArgs`]. `null` becomes an empty map.
pub fn into_args(value: Value) -> McpResult<ToolArgs> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(McpError::InvalidArguments(format!(
            "tool arguments must be a JSON object, got {other}"
        ))),
    }
}

fn decode<T: DeserializeOwned>(name: &str, value: &Value) -> McpResult<T> {
    T::deserialize(value)
        .map_err(|e| McpError::InvalidArguments(format!("argument '{name}': {e}")))
}
