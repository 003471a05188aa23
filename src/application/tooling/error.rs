use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn provider '{provider}': {source}")]
    Spawn {
        provider: String,
        #[source]
        source: std::io::Error,
    },
    #[error("provider '{provider}' transport error: {message}")]
    Transport { provider: String, message: String },
    #[error("provider '{provider}' returned invalid JSON: {source}")]
    InvalidJson {
        provider: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("provider '{provider}' returned JSON-RPC error {code}: {message}")]
    Rpc {
        provider: String,
        code: i64,
        message: String,
    },
    #[error("provider '{provider}' terminated unexpectedly")]
    Terminated { provider: String },
    #[error("request to provider '{provider}' was cancelled")]
    Cancelled { provider: String },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool '{0}' is not exposed by any connected provider")]
    ToolNotFound(String),
    #[error("provider '{0}' is not connected")]
    ProviderNotConnected(String),
    #[error("failed to call tool '{tool}' on provider '{provider}': {source}")]
    Call {
        provider: String,
        tool: String,
        #[source]
        source: TransportError,
    },
}

impl RegistryError {
    pub fn user_message(&self) -> String {
        match self {
            RegistryError::ToolNotFound(name) => {
                format!("The tool \"{name}\" is not available right now.")
            }
            RegistryError::ProviderNotConnected(provider) => {
                format!("The \"{provider}\" service is not reachable at the moment.")
            }
            RegistryError::Call { tool, .. } => {
                format!("Calling the tool \"{tool}\" failed.")
            }
        }
    }
}
