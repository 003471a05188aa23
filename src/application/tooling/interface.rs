use super::error::{RegistryError, TransportError};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// A tool as reported by its provider during connection.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
}

/// A tool in the registry catalog, annotated with its owning provider.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// Session with one tool provider. Connecting yields the provider's tool
/// catalog; everything else about the wire protocol stays behind this seam.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn connect(&self) -> Result<Vec<ToolInfo>, TransportError>;

    async fn call(&self, tool: &str, arguments: Value) -> Result<Value, TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// What the agent loop needs from the registry: a catalog and a dispatch.
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    async fn list_tools(&self) -> Vec<ToolDescriptor>;

    async fn call_tool(&self, tool: &str, params: Value) -> Result<Value, RegistryError>;
}
