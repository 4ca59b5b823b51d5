//! Tool descriptors and parameter schema building.
//!
//! A [`ToolDescriptor`] carries the name, description and ordered parameter
//! list of a tool together with the JSON schema advertised to clients.
//! Local tools build descriptors through [`ToolSpec`]; proxied tools carry the
//! remote `inputSchema` verbatim and derive parameters from it.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{McpError, McpResult};

/// JSON schema primitive a parameter maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    Integer,
    Number,
    String,
    Boolean,
    Object,
    Array,
    /// Unannotated or unsupported type; emitted without a `type` keyword.
    Any,
}

impl JsonType {
    /// Schema `type` keyword, `None` for [`JsonType::Any`].
    pub fn schema_type(self) -> Option<&'static str> {
        match self {
            JsonType::Integer => Some("integer"),
            JsonType::Number => Some("number"),
            JsonType::String => Some("string"),
            JsonType::Boolean => Some("boolean"),
            JsonType::Object => Some("object"),
            JsonType::Array => Some("array"),
            JsonType::Any => None,
        }
    }

    /// Parse a schema `type` keyword. Unknown keywords map to `Any`.
    pub fn from_schema_type(value: &str) -> Self {
        match value {
            "integer" => JsonType::Integer,
            "number" => JsonType::Number,
            "string" => JsonType::String,
            "boolean" => JsonType::Boolean,
            "object" => JsonType::Object,
            "array" => JsonType::Array,
            _ => JsonType::Any,
        }
    }
}

/// Maps a Rust parameter type to its schema primitive.
pub trait ParamType {
    const JSON_TYPE: JsonType;
}

macro_rules! impl_param_type {
    ($json:expr => $($ty:ty),+ $(,)?) => {
        $(impl ParamType for $ty {
            const JSON_TYPE: JsonType = $json;
        })+
    };
}

impl_param_type!(JsonType::Integer => i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);
impl_param_type!(JsonType::Number => f32, f64);
impl_param_type!(JsonType::String => String, &str, char);
impl_param_type!(JsonType::Boolean => bool);
impl_param_type!(JsonType::Any => Value);
impl_param_type!(JsonType::Object => Map<String, Value>);

impl<T> ParamType for Vec<T> {
    const JSON_TYPE: JsonType = JsonType::Array;
}

impl<T, const N: usize> ParamType for [T; N] {
    const JSON_TYPE: JsonType = JsonType::Array;
}

impl<K, V> ParamType for HashMap<K, V> {
    const JSON_TYPE: JsonType = JsonType::Object;
}

impl<K, V> ParamType for BTreeMap<K, V> {
    const JSON_TYPE: JsonType = JsonType::Object;
}

impl<T: ParamType> ParamType for Option<T> {
    const JSON_TYPE: JsonType = T::JSON_TYPE;
}

/// One declared tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub json_type: JsonType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, json_type: JsonType) -> Self {
        Self {
            name: name.into(),
            json_type,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, json_type: JsonType) -> Self {
        Self {
            name: name.into(),
            json_type,
            required: false,
            default: None,
        }
    }

    pub fn with_default(name: impl Into<String>, json_type: JsonType, default: Value) -> Self {
        Self {
            name: name.into(),
            json_type,
            required: false,
            default: Some(default),
        }
    }

    fn to_property(&self) -> Value {
        let mut prop = Map::new();
        if let Some(ty) = self.json_type.schema_type() {
            prop.insert("type".to_string(), Value::String(ty.to_string()));
        }
        if let Some(default) = &self.default {
            prop.insert("default".to_string(), default.clone());
        }
        Value::Object(prop)
    }
}

/// Name, description, ordered parameters and advertised input schema of a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    name: String,
    description: String,
    parameters: Vec<ParamSpec>,
    input_schema: Value,
}

impl ToolDescriptor {
    /// Build a descriptor from an explicit parameter list.
    ///
    /// Fails with [`McpError::Schema`] when parameter names repeat or a
    /// required parameter carries a default.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Vec<ParamSpec>,
    ) -> McpResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(McpError::Schema("tool name must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for param in &parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(McpError::Schema(format!(
                    "duplicate parameter '{}' in tool '{}'",
                    param.name, name
                )));
            }
            if param.required && param.default.is_some() {
                return Err(McpError::Schema(format!(
                    "required parameter '{}' in tool '{}' cannot have a default",
                    param.name, name
                )));
            }
        }

        let input_schema = build_input_schema(&parameters);
        Ok(Self {
            name,
            description: description.into(),
            parameters,
            input_schema,
        })
    }

    /// Wrap a remote `inputSchema` verbatim.
    ///
    /// Parameters are derived leniently: malformed properties are skipped
    /// rather than rejected, so an odd remote schema never blocks
    /// registration of the tool itself.
    pub fn from_input_schema(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        let parameters = lenient_parameters(&input_schema);
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            input_schema,
        }
    }

    /// Strictly parse the parameter list of a JSON schema.
    ///
    /// The schema must be an object; `properties`, when present, must be an
    /// object of objects; `required`, when present, must be an array of
    /// strings naming declared properties.
    pub fn parse_parameters(schema: &Value) -> McpResult<Vec<ParamSpec>> {
        let obj = schema
            .as_object()
            .ok_or_else(|| McpError::Schema("input schema must be a JSON object".to_string()))?;

        if let Some(ty) = obj.get("type") {
            if ty.as_str() != Some("object") {
                return Err(McpError::Schema(format!(
                    "input schema type must be 'object', got {ty}"
                )));
            }
        }

        let required: Vec<&str> = match obj.get("required") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().ok_or_else(|| {
                        McpError::Schema("'required' must contain only strings".to_string())
                    })
                })
                .collect::<McpResult<_>>()?,
            Some(_) => {
                return Err(McpError::Schema("'required' must be an array".to_string()));
            }
        };

        let properties = match obj.get("properties") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(props)) => props.clone(),
            Some(_) => {
                return Err(McpError::Schema(
                    "'properties' must be an object".to_string(),
                ));
            }
        };

        if let Some(missing) = required.iter().find(|r| !properties.contains_key(**r)) {
            return Err(McpError::Schema(format!(
                "required parameter '{missing}' is not declared in properties"
            )));
        }

        let mut params = Vec::with_capacity(properties.len());
        for (name, prop) in &properties {
            let prop = prop.as_object().ok_or_else(|| {
                McpError::Schema(format!("property '{name}' must be an object"))
            })?;
            params.push(param_from_property(name, prop, required.contains(&name.as_str())));
        }
        Ok(params)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &[ParamSpec] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    /// Same descriptor published under another name.
    #[must_use]
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// MCP `tools/list` entry.
    pub fn to_mcp_tool(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

fn build_input_schema(parameters: &[ParamSpec]) -> Value {
    let properties: Map<String, Value> = parameters
        .iter()
        .map(|p| (p.name.clone(), p.to_property()))
        .collect();
    let required: Vec<Value> = parameters
        .iter()
        .filter(|p| p.required)
        .map(|p| Value::String(p.name.clone()))
        .collect();

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn param_from_property(name: &str, prop: &Map<String, Value>, required: bool) -> ParamSpec {
    let json_type = prop
        .get("type")
        .and_then(Value::as_str)
        .map(JsonType::from_schema_type)
        .unwrap_or(JsonType::Any);
    let default = if required {
        None
    } else {
        prop.get("default").cloned()
    };
    ParamSpec {
        name: name.to_string(),
        json_type,
        required,
        default,
    }
}

fn lenient_parameters(schema: &Value) -> Vec<ParamSpec> {
    let Some(obj) = schema.as_object() else {
        return Vec::new();
    };
    let required: Vec<&str> = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    obj.get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .filter_map(|(name, prop)| {
                    prop.as_object()
                        .map(|p| param_from_property(name, p, required.contains(&name.as_str())))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Builder for local tool descriptors.
///
/// ```ignore
/// let spec = ToolSpec::new("math.scale")
///     .description("Scale a value")
///     .param::<i64>("x")
///     .param_with_default::<String>("unit", "m")
///     .timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct ToolSpec {
    name: String,
    description: Option<String>,
    parameters: Vec<ParamSpec>,
    timeout: Option<Duration>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: Vec::new(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Required parameter of Rust type `T`.
    #[must_use]
    pub fn param<T: ParamType>(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(ParamSpec::required(name, T::JSON_TYPE));
        self
    }

    /// Optional parameter of Rust type `T` with no default.
    #[must_use]
    pub fn optional<T: ParamType>(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(ParamSpec::optional(name, T::JSON_TYPE));
        self
    }

    /// Optional parameter of Rust type `T` defaulting to `default`.
    #[must_use]
    pub fn param_with_default<T: ParamType>(
        mut self,
        name: impl Into<String>,
        default: impl Into<Value>,
    ) -> Self {
        self.parameters
            .push(ParamSpec::with_default(name, T::JSON_TYPE, default.into()));
        self
    }

    /// Parameter with an explicit spec.
    #[must_use]
    pub fn param_spec(mut self, spec: ParamSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout_value(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn build(self) -> McpResult<(ToolDescriptor, Option<Duration>)> {
        let descriptor = ToolDescriptor::new(
            self.name,
            self.description.unwrap_or_default(),
            self.parameters,
        )?;
        Ok((descriptor, self.timeout))
    }
}
