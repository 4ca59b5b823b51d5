//! Flat-named aliases for clients that reject dotted tool names.
//!
//! OpenAI-style function calling only accepts `[A-Za-z0-9_-]` names, so every
//! dotted registry entry (`proxy.bing.search`) gets a flat twin
//! (`proxy_bing_search`). The alias advertises the original descriptor's
//! parameter list and forwards arguments untouched.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    error::{McpError, McpResult},
    inventory::{
        to_dotted_name, to_flat_name, ToolArgs, ToolDescriptor, ToolEntry, ToolOrigin, ToolRegistry,
    },
};

#[derive(Debug, Default)]
struct AliasMaps {
    original_to_flat: HashMap<String, String>,
    flat_to_original: HashMap<String, String>,
}

impl AliasMaps {
    fn record(&mut self, original: &str, flat: &str) {
        self.original_to_flat
            .insert(original.to_string(), flat.to_string());
        self.flat_to_original
            .insert(flat.to_string(), original.to_string());
    }
}

/// Result of aliasing one dotted entry.
#[derive(Debug)]
pub struct AliasOutcome {
    pub original: String,
    /// Flat name now serving `original`, or why none could be built.
    pub result: McpResult<String>,
    /// False when the flat name already existed.
    pub created: bool,
}

pub struct OpenAiToolsAdapter {
    registry: Arc<ToolRegistry>,
    maps: RwLock<AliasMaps>,
}

impl OpenAiToolsAdapter {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        let adapter = Self {
            registry,
            maps: RwLock::new(AliasMaps::default()),
        };
        adapter.refresh();
        adapter
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Re-derive the name maps from the registry.
    ///
    /// Aliases keep their pair even after the dotted original was pruned.
    pub fn refresh(&self) {
        let mut maps = AliasMaps::default();
        for entry in self.registry.entries() {
            let name = entry.name();
            match (entry.origin, entry.alias_of.as_deref()) {
                (ToolOrigin::Alias, Some(original)) => maps.record(original, name),
                (ToolOrigin::Alias, None) => {}
                _ if name.contains('.') => {
                    let flat = to_flat_name(name);
                    if self.registry.contains(&flat) {
                        maps.record(name, &flat);
                    }
                }
                _ => {}
            }
        }
        *self.maps.write() = maps;
    }

    /// Alias every dotted entry that has no flat counterpart yet.
    ///
    /// Returns how many aliases were created. Entries whose schema cannot be
    /// turned into a parameter list are skipped.
    pub fn register_flat_aliases(&self) -> usize {
        let dotted: Vec<String> = self
            .registry
            .entries()
            .iter()
            .filter(|e| e.name().contains('.') && e.origin != ToolOrigin::Alias)
            .map(|e| e.name().to_string())
            .collect();
        let outcomes = self.register_flat_aliases_for(dotted.iter().map(String::as_str));
        let created = outcomes.iter().filter(|o| o.created).count();
        info!("Registered {} flat tool alias(es)", created);
        created
    }

    /// Alias the named dotted entries with one registry rebuild.
    ///
    /// An entry that already has a flat counterpart reports the existing
    /// name without building a new alias.
    pub fn register_flat_aliases_for<'a, I>(&self, names: I) -> Vec<AliasOutcome>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut outcomes = Vec::new();
        let mut aliases = Vec::new();
        for original in names {
            let mut created = false;
            let result = self.build_alias(original).map(|built| match built {
                Some(alias) => {
                    created = true;
                    let flat = alias.name().to_string();
                    aliases.push(alias);
                    flat
                }
                None => to_flat_name(original),
            });
            if let Err(e) = &result {
                warn!("Skipping flat alias for '{}': {}", original, e);
            }
            outcomes.push(AliasOutcome {
                original: original.to_string(),
                result,
                created,
            });
        }

        if !aliases.is_empty() {
            self.registry.insert_many(aliases);
        }
        let mut maps = self.maps.write();
        for outcome in &outcomes {
            if let Ok(flat) = &outcome.result {
                maps.record(&outcome.original, flat);
            }
        }
        outcomes
    }

    /// Alias a single dotted entry and return the flat name.
    pub fn register_flat_alias(&self, original: &str) -> McpResult<String> {
        self.register_flat_aliases_for([original])
            .pop()
            .map(|o| o.result)
            .unwrap_or_else(|| Err(McpError::ToolNotFound(original.to_string())))
    }

    fn build_alias(&self, original: &str) -> McpResult<Option<ToolEntry>> {
        let entry = self
            .registry
            .get(original)
            .ok_or_else(|| McpError::ToolNotFound(original.to_string()))?;
        let flat = to_flat_name(original);
        if flat == original || self.registry.contains(&flat) {
            return Ok(None);
        }
        // Clients build call signatures from the schema, so it must parse.
        ToolDescriptor::parse_parameters(entry.descriptor.input_schema())?;
        debug!("Flat alias {} -> {}", flat, original);
        Ok(Some(entry.alias(flat)))
    }

    /// Map between dotted and flat forms.
    ///
    /// Known aliases are used first; otherwise the name is transformed
    /// textually.
    pub fn translate_name(&self, name: &str, to_flat: bool) -> String {
        let maps = self.maps.read();
        let mapped = if to_flat {
            maps.original_to_flat.get(name)
        } else {
            maps.flat_to_original.get(name)
        };
        match mapped {
            Some(mapped) => mapped.clone(),
            None if to_flat => to_flat_name(name),
            None => to_dotted_name(name),
        }
    }

    /// Execute by flat or dotted name.
    pub async fn execute_tool(&self, name: &str, args: ToolArgs) -> McpResult<Value> {
        let target = self.target_for(name)?;
        self.registry.execute(&target, args).await
    }

    fn target_for(&self, name: &str) -> McpResult<String> {
        {
            let maps = self.maps.read();
            for mapped in [
                maps.flat_to_original.get(name),
                maps.original_to_flat.get(name),
            ]
            .into_iter()
            .flatten()
            {
                if self.registry.contains(mapped) {
                    return Ok(mapped.clone());
                }
            }
        }
        let resolved = self.registry.resolve(name);
        if self.registry.contains(&resolved) {
            Ok(resolved)
        } else {
            Err(McpError::ToolNotFound(name.to_string()))
        }
    }

    /// Flat names currently known to the adapter, in registry order.
    pub fn flat_names(&self) -> Vec<String> {
        let maps = self.maps.read();
        self.registry
            .names()
            .into_iter()
            .filter(|name| maps.flat_to_original.contains_key(name))
            .collect()
    }

    /// Function-calling definitions for every flat alias.
    pub fn tools_definition(&self) -> Vec<Value> {
        self.flat_names()
            .iter()
            .filter_map(|name| self.registry.get(name))
            .map(|entry| {
                json!({
                    "type": "function",
                    "function": {
                        "name": entry.name(),
                        "description": entry.descriptor.description(),
                        "parameters": entry.descriptor.input_schema(),
                    }
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for OpenAiToolsAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiToolsAdapter")
            .field("aliases", &self.maps.read().flat_to_original.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{ToolHandler, ToolSpec};

    fn echo_entry(name: &str, schema: Value) -> ToolEntry {
        let descriptor = ToolDescriptor::from_input_schema(name, "echo", schema);
        ToolEntry::new(
            descriptor,
            ToolHandler::from_async(|args| async move {
                Ok::<_, anyhow::Error>(Value::Object(args))
            }),
        )
        .with_origin(ToolOrigin::Proxy)
        .passthrough_arguments()
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "count": {"type": "integer", "default": 10}
            },
            "required": ["query"]
        })
    }

    #[test]
    fn test_register_flat_aliases() {
        let registry = Arc::new(ToolRegistry::new());
        registry.insert(echo_entry("proxy.bing.search", schema()));
        registry
            .register(
                ToolSpec::new("local_tool"),
                ToolHandler::from_fn(|_| Ok(Value::Null)),
            )
            .unwrap();
        let adapter = OpenAiToolsAdapter::new(Arc::clone(&registry));

        assert_eq!(adapter.register_flat_aliases(), 1);
        let alias = registry.get("proxy_bing_search").unwrap();
        assert_eq!(alias.origin, ToolOrigin::Alias);
        assert_eq!(alias.descriptor.input_schema(), &schema());
        let params: Vec<(&str, bool)> = alias
            .descriptor
            .parameters()
            .iter()
            .map(|p| (p.name.as_str(), p.required))
            .collect();
        assert_eq!(params, vec![("query", true), ("count", false)]);
        assert_eq!(
            alias.descriptor.parameter("count").unwrap().default,
            Some(json!(10))
        );

        // Second pass finds nothing left to alias.
        assert_eq!(adapter.register_flat_aliases(), 0);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_invalid_schema_skipped() {
        let registry = Arc::new(ToolRegistry::new());
        registry.insert(echo_entry(
            "proxy.bad.tool",
            json!({"type": "object", "properties": ["not", "an", "object"]}),
        ));
        let adapter = OpenAiToolsAdapter::new(Arc::clone(&registry));

        let err = adapter.register_flat_alias("proxy.bad.tool").unwrap_err();
        assert!(matches!(err, McpError::Schema(_)));
        assert!(!registry.contains("proxy_bad_tool"));
        assert!(matches!(
            adapter.register_flat_alias("proxy.missing.tool"),
            Err(McpError::ToolNotFound(_))
        ));
    }

    #[test]
    fn test_translate_name() {
        let registry = Arc::new(ToolRegistry::new());
        registry.insert(echo_entry("proxy.bing.search", schema()));
        let adapter = OpenAiToolsAdapter::new(Arc::clone(&registry));
        adapter.register_flat_aliases();

        assert_eq!(
            adapter.translate_name("proxy.bing.search", true),
            "proxy_bing_search"
        );
        assert_eq!(
            adapter.translate_name("proxy_bing_search", false),
            "proxy.bing.search"
        );
        // Unknown names fall back to the textual transform.
        assert_eq!(adapter.translate_name("a.b", true), "a_b");
        assert_eq!(adapter.translate_name("a_b", false), "a.b");
    }

    #[tokio::test]
    async fn test_alias_forwards_unchanged() {
        let registry = Arc::new(ToolRegistry::new());
        registry.insert(echo_entry("proxy.bing.search", schema()));
        let adapter = OpenAiToolsAdapter::new(Arc::clone(&registry));
        adapter.register_flat_aliases();

        let mut args = ToolArgs::new();
        args.insert("query".to_string(), json!("rust"));
        let via_alias = adapter
            .execute_tool("proxy_bing_search", args.clone())
            .await
            .unwrap();
        let direct = registry.execute("proxy.bing.search", args).await.unwrap();
        assert_eq!(via_alias, direct);
        assert_eq!(via_alias, json!({"query": "rust"}));

        let err = adapter
            .execute_tool("nothing_here", ToolArgs::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_tools_definition() {
        let registry = Arc::new(ToolRegistry::new());
        registry.insert(echo_entry("proxy.bing.search", schema()));
        let adapter = OpenAiToolsAdapter::new(Arc::clone(&registry));
        adapter.register_flat_aliases();

        let defs = adapter.tools_definition();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0]["type"], "function");
        assert_eq!(defs[0]["function"]["name"], "proxy_bing_search");
        assert_eq!(defs[0]["function"]["parameters"], schema());
    }

    #[test]
    fn test_refresh_keeps_alias_after_original_removed() {
        let registry = Arc::new(ToolRegistry::new());
        registry.insert(echo_entry("proxy.bing.search", schema()));
        let adapter = OpenAiToolsAdapter::new(Arc::clone(&registry));
        adapter.register_flat_aliases();

        registry.remove("proxy.bing.search");
        adapter.refresh();

        assert_eq!(adapter.flat_names(), vec!["proxy_bing_search".to_string()]);
        assert_eq!(
            adapter.translate_name("proxy_bing_search", false),
            "proxy.bing.search"
        );
        assert_eq!(adapter.tools_definition().len(), 1);
    }

    #[test]
    fn test_refresh_picks_up_existing_pairs() {
        let registry = Arc::new(ToolRegistry::new());
        registry.insert(echo_entry("ns.tool", schema()));
        registry.insert(echo_entry("ns_tool", schema()));
        let adapter = OpenAiToolsAdapter::new(Arc::clone(&registry));
        assert_eq!(adapter.translate_name("ns.tool", true), "ns_tool");
        assert_eq!(adapter.flat_names(), vec!["ns_tool".to_string()]);
    }
}
