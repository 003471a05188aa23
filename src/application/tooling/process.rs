use super::error::TransportError;
use super::interface::{ProviderTransport, ToolInfo};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::{debug, warn};

const PROTOCOL_VERSION: &str = "2025-06-18";

/// Stdio session with one MCP tool server: the provider process is spawned
/// on `connect`, spoken to over line-delimited JSON-RPC, and killed on
/// `disconnect`.
pub struct StdioTransport {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: ProviderConfig,
    child: AsyncMutex<Option<Child>>,
    writer: AsyncMutex<Option<BufWriter<ChildStdin>>>,
    pending: AsyncMutex<HashMap<u64, oneshot::Sender<Result<Value, TransportError>>>>,
    next_id: AtomicU64,
}

impl StdioTransport {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config,
                child: AsyncMutex::new(None),
                writer: AsyncMutex::new(None),
                pending: AsyncMutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }
}

#[async_trait]
impl ProviderTransport for StdioTransport {
    async fn connect(&self) -> Result<Vec<ToolInfo>, TransportError> {
        self.inner.spawn().await?;
        match self.inner.handshake().await {
            Ok(tools) => Ok(tools),
            Err(err) => {
                self.inner.shutdown().await;
                Err(err)
            }
        }
    }

    async fn call(&self, tool: &str, arguments: Value) -> Result<Value, TransportError> {
        let params = json!({
            "name": tool,
            "arguments": match arguments {
                Value::Null => Value::Object(Default::default()),
                other => other,
            }
        });
        self.inner.request("tools/call", params).await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.shutdown().await;
        Ok(())
    }
}

impl SessionInner {
    async fn spawn(self: &Arc<Self>) -> Result<(), TransportError> {
        {
            let child = self.child.lock().await;
            if child.is_some() {
                return Ok(());
            }
        }

        let mut command = Command::new(&self.config.command);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if !self.config.args.is_empty() {
            command.args(&self.config.args);
        }
        if let Some(dir) = &self.config.workdir {
            command.current_dir(dir);
        }
        for (key, value) in &self.config.env {
            command.env(key, value);
        }

        let mut process = command.spawn().map_err(|source| TransportError::Spawn {
            provider: self.config.name.clone(),
            source,
        })?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| self.transport_error("failed to capture provider stdin"))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| self.transport_error("failed to capture provider stdout"))?;

        *self.writer.lock().await = Some(BufWriter::new(stdin));
        *self.child.lock().await = Some(process);

        let reader = Arc::clone(self);
        tokio::spawn(async move {
            reader.read_loop(stdout).await;
        });

        Ok(())
    }

    async fn handshake(self: &Arc<Self>) -> Result<Vec<ToolInfo>, TransportError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {}
        });
        self.request("initialize", params).await?;
        self.notify("notifications/initialized", json!({})).await?;

        let listing = self.request("tools/list", json!({})).await?;
        Ok(parse_tool_listing(&listing))
    }

    async fn read_loop(self: Arc<Self>, stdout: ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(raw)) = lines.next_line().await {
            if raw.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&raw) {
                Ok(message) => self.route_inbound(message).await,
                Err(source) => {
                    warn!(
                        provider = self.config.name.as_str(),
                        line = raw.as_str(),
                        %source,
                        "Provider emitted invalid JSON"
                    );
                }
            }
        }
        // Stream closed: the provider exited or the pipe broke.
        self.shutdown().await;
    }

    async fn route_inbound(&self, message: Value) {
        let id = message.get("id").and_then(Value::as_u64);
        let is_request = message.get("method").is_some();

        match (id, is_request) {
            (Some(id), false) => self.resolve_response(id, message).await,
            (Some(id), true) => self.answer_server_request(id, &message).await,
            (None, true) => {
                let method = message
                    .get("method")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                debug!(
                    provider = self.config.name.as_str(),
                    method, "Provider notification ignored"
                );
            }
            (None, false) => {}
        }
    }

    async fn resolve_response(&self, id: u64, message: Value) {
        let responder = self.pending.lock().await.remove(&id);
        let Some(sender) = responder else {
            debug!(
                provider = self.config.name.as_str(),
                response_id = id,
                "Response for unknown request"
            );
            return;
        };

        let outcome = if let Some(error) = message.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
            let text = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            Err(TransportError::Rpc {
                provider: self.config.name.clone(),
                code,
                message: text,
            })
        } else {
            Ok(message.get("result").cloned().unwrap_or(Value::Null))
        };
        let _ = sender.send(outcome);
    }

    async fn answer_server_request(&self, id: u64, message: &Value) {
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let reply = if method == "ping" {
            json!({ "jsonrpc": "2.0", "id": id, "result": {} })
        } else {
            warn!(
                provider = self.config.name.as_str(),
                method, "Provider sent unsupported request"
            );
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": -32601,
                    "message": format!("client does not implement method '{method}'"),
                }
            })
        };
        if let Err(err) = self.write_message(&reply).await {
            warn!(provider = self.config.name.as_str(), %err, "Failed to answer provider request");
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        if let Err(err) = self.write_message(&payload).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::Cancelled {
                provider: self.config.name.clone(),
            }),
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.write_message(&payload).await
    }

    async fn write_message(&self, message: &Value) -> Result<(), TransportError> {
        let encoded =
            serde_json::to_string(message).map_err(|source| TransportError::InvalidJson {
                provider: self.config.name.clone(),
                source,
            })?;

        let mut writer = self.writer.lock().await;
        let stream = writer
            .as_mut()
            .ok_or_else(|| self.transport_error("session is not open"))?;
        for chunk in [encoded.as_bytes(), b"\n"] {
            stream
                .write_all(chunk)
                .await
                .map_err(|source| self.transport_error(source.to_string()))?;
        }
        stream
            .flush()
            .await
            .map_err(|source| self.transport_error(source.to_string()))
    }

    async fn shutdown(&self) {
        *self.writer.lock().await = None;

        if let Some(mut process) = self.child.lock().await.take() {
            if let Err(err) = process.kill().await {
                debug!(
                    provider = self.config.name.as_str(),
                    %err,
                    "Failed to kill provider process (it may have already exited)"
                );
            }
            let _ = process.wait().await;
        }

        let mut pending = self.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(TransportError::Terminated {
                provider: self.config.name.clone(),
            }));
        }
    }

    fn transport_error(&self, message: impl Into<String>) -> TransportError {
        TransportError::Transport {
            provider: self.config.name.clone(),
            message: message.into(),
        }
    }
}

fn parse_tool_listing(listing: &Value) -> Vec<ToolInfo> {
    let Some(tools) = listing.get("tools").and_then(Value::as_array) else {
        return Vec::new();
    };
    tools
        .iter()
        .filter_map(|tool| {
            let name = tool.get("name").and_then(Value::as_str)?;
            Some(ToolInfo {
                name: name.to_string(),
                description: tool
                    .get("description")
                    .and_then(Value::as_str)
                    .map(String::from),
                input_schema: tool.get("inputSchema").cloned(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_listing_parses_names_and_schemas() {
        let listing = json!({
            "tools": [
                {"name": "search_issues", "description": "Search tracked issues", "inputSchema": {"type": "object"}},
                {"name": "run_query"},
                {"description": "nameless entries are skipped"}
            ]
        });
        let tools = parse_tool_listing(&listing);
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "search_issues");
        assert!(tools[0].input_schema.is_some());
        assert!(tools[1].description.is_none());
    }

    #[test]
    fn empty_listing_yields_no_tools() {
        assert!(parse_tool_listing(&json!({})).is_empty());
    }
}
