use super::error::RegistryError;
use super::interface::{ProviderTransport, ToolDescriptor, ToolDispatch, ToolInfo};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Parameter key under which the tenant identifier is injected for
/// providers that require one.
const TENANT_FIELD: &str = "tenantId";

/// Process-wide values the registry injects into calls, threaded in at
/// construction so tests can pin deterministic values.
#[derive(Debug, Clone, Default)]
pub struct RegistrySettings {
    pub tenant_id: Option<String>,
}

struct ProviderEntry {
    config: ProviderConfig,
    transport: Arc<dyn ProviderTransport>,
    /// Catalog from the most recent successful connect. Sticky across a
    /// dropped connection so a call can still resolve to its provider and
    /// fail with a precise error.
    catalog: Vec<ToolInfo>,
    connected: bool,
}

/// Owns every provider session and resolves tool names to their provider.
/// Safe for concurrent `call_tool` from independent runs; the provider map
/// is only locked for short lookups, never across an await.
pub struct ProviderRegistry {
    settings: RegistrySettings,
    providers: Mutex<HashMap<String, Arc<ProviderEntry>>>,
}

impl ProviderRegistry {
    pub fn new(settings: RegistrySettings) -> Self {
        Self {
            settings,
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a provider. Idempotent by name: re-registering replaces the
    /// previous entry, dropping any catalog it had.
    pub fn register(&self, config: ProviderConfig, transport: Arc<dyn ProviderTransport>) {
        let mut providers = self.providers.lock().expect("provider registry lock");
        let name = config.name.clone();
        let replaced = providers
            .insert(
                name.clone(),
                Arc::new(ProviderEntry {
                    config,
                    transport,
                    catalog: Vec::new(),
                    connected: false,
                }),
            )
            .is_some();
        if replaced {
            info!(provider = name.as_str(), "Provider re-registered");
        } else {
            debug!(provider = name.as_str(), "Provider registered");
        }
    }

    /// Connects every registered, enabled provider concurrently. A provider
    /// that fails to connect is logged and left out of the catalog; the
    /// call itself never fails.
    pub async fn connect_all(&self) {
        let targets: Vec<(String, Arc<dyn ProviderTransport>)> = {
            let providers = self.providers.lock().expect("provider registry lock");
            providers
                .values()
                .filter(|entry| entry.config.enabled)
                .map(|entry| (entry.config.name.clone(), entry.transport.clone()))
                .collect()
        };

        let attempts = targets.into_iter().map(|(name, transport)| async move {
            let result = transport.connect().await;
            (name, result)
        });

        for (name, result) in join_all(attempts).await {
            match result {
                Ok(tools) => {
                    info!(
                        provider = name.as_str(),
                        tools = tools.len(),
                        "Provider connected"
                    );
                    self.update_entry(&name, |entry| {
                        entry.catalog = tools.clone();
                        entry.connected = true;
                    });
                }
                Err(err) => {
                    warn!(
                        provider = name.as_str(),
                        %err,
                        "Provider failed to connect; its tools will be unavailable"
                    );
                }
            }
        }
    }

    /// Union of tool descriptors across connected providers.
    pub fn list_all_tools(&self) -> Vec<ToolDescriptor> {
        let providers = self.providers.lock().expect("provider registry lock");
        let mut descriptors: Vec<ToolDescriptor> = providers
            .values()
            .filter(|entry| entry.connected)
            .flat_map(|entry| {
                entry.catalog.iter().map(|tool| ToolDescriptor {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    provider: entry.config.name.clone(),
                    input_schema: tool.input_schema.clone(),
                })
            })
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Resolves the tool to its owning provider and dispatches the call,
    /// injecting the tenant identifier where the provider requires one.
    pub async fn call_tool(&self, tool: &str, params: Value) -> Result<Value, RegistryError> {
        let (entry, canonical) = {
            let providers = self.providers.lock().expect("provider registry lock");
            let resolved = providers.values().find_map(|entry| {
                entry
                    .catalog
                    .iter()
                    .find(|info| info.name.eq_ignore_ascii_case(tool))
                    .map(|info| (entry.clone(), info.name.clone()))
            });
            resolved.ok_or_else(|| RegistryError::ToolNotFound(tool.to_string()))?
        };

        if !entry.connected {
            return Err(RegistryError::ProviderNotConnected(
                entry.config.name.clone(),
            ));
        }

        let mut arguments = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        if entry.config.needs_tenant && !arguments.contains_key(TENANT_FIELD) {
            match &self.settings.tenant_id {
                Some(tenant) => {
                    debug!(
                        provider = entry.config.name.as_str(),
                        tool = canonical.as_str(),
                        "Injecting tenant identifier into tool call"
                    );
                    arguments.insert(TENANT_FIELD.to_string(), json!(tenant));
                }
                None => {
                    warn!(
                        provider = entry.config.name.as_str(),
                        tool = canonical.as_str(),
                        "No tenant identifier configured; dispatching call without one"
                    );
                }
            }
        }

        debug!(
            provider = entry.config.name.as_str(),
            tool = canonical.as_str(),
            "Dispatching tool call"
        );
        entry
            .transport
            .call(&canonical, Value::Object(arguments))
            .await
            .map_err(|source| RegistryError::Call {
                provider: entry.config.name.clone(),
                tool: canonical,
                source,
            })
    }

    /// Tears down every provider session; individual failures are logged
    /// and tolerated.
    pub async fn disconnect_all(&self) {
        let targets: Vec<(String, Arc<dyn ProviderTransport>)> = {
            let providers = self.providers.lock().expect("provider registry lock");
            providers
                .values()
                .filter(|entry| entry.connected)
                .map(|entry| (entry.config.name.clone(), entry.transport.clone()))
                .collect()
        };

        let attempts = targets.into_iter().map(|(name, transport)| async move {
            let result = transport.disconnect().await;
            (name, result)
        });

        for (name, result) in join_all(attempts).await {
            if let Err(err) = result {
                warn!(provider = name.as_str(), %err, "Provider disconnect failed");
            }
            self.update_entry(&name, |entry| entry.connected = false);
        }
        info!("All providers disconnected");
    }

    fn update_entry(&self, name: &str, mutate: impl FnOnce(&mut ProviderEntry)) {
        let mut providers = self.providers.lock().expect("provider registry lock");
        if let Some(entry) = providers.get_mut(name) {
            // Entries are shared out as Arcs for lock-free dispatch; updates
            // swap in a modified copy.
            let mut updated = ProviderEntry {
                config: entry.config.clone(),
                transport: entry.transport.clone(),
                catalog: entry.catalog.clone(),
                connected: entry.connected,
            };
            mutate(&mut updated);
            *entry = Arc::new(updated);
        }
    }
}

#[async_trait]
impl ToolDispatch for ProviderRegistry {
    async fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.list_all_tools()
    }

    async fn call_tool(&self, tool: &str, params: Value) -> Result<Value, RegistryError> {
        ProviderRegistry::call_tool(self, tool, params).await
    }
}
