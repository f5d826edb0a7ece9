//! MCP server lifecycle for the Library Management System.
//!
//! 1. **Initialisation**: Capability negotiation and version agreement
//! 2. **Operation**: `tools/list`, `tools/call` and `ping`
//! 3. **Shutdown**: On end of input or a termination signal
//!
//! One connection is one session. Each `tools/call` runs as its own task and
//! its response is written when it completes, so calls within a session may
//! overlap. When the connection ends, the session's cached credentials are
//! dropped.

use std::future::Future;
use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use crate::auth::SessionId;
use crate::mcp::protocol::{
    parse_message, IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, OutgoingMessage, RequestId, MCP_PROTOCOL_VERSION, SERVER_NAME,
};
use crate::mcp::tools::{ToolCallParams, ToolRouter};
use crate::mcp::transport::{StdioTransport, Transport};

/// Server state in the MCP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for initialize request.
    AwaitingInit,
    /// Initialize received, waiting for initialized notification.
    Initialising,
    /// Ready for normal operation.
    Running,
    /// Shutdown in progress.
    ShuttingDown,
}

/// Server capabilities advertised during initialisation.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    pub tools: ToolCapabilities,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: ToolCapabilities { list_changed: false },
        }
    }
}

/// Tool-specific capabilities.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change during the session.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Server information for initialisation response.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    pub protocol_version: String,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Value,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// The MCP server for one client connection.
pub struct McpServer {
    /// Current server state.
    state: ServerState,
    /// Negotiated protocol version (set after initialisation).
    protocol_version: Option<String>,
    /// Tool registry shared with in-flight calls.
    router: Arc<ToolRouter>,
    /// The session this connection represents.
    session: SessionId,
}

impl McpServer {
    /// Creates a server with a freshly generated session identifier.
    #[must_use]
    pub fn new(router: Arc<ToolRouter>) -> Self {
        Self {
            state: ServerState::AwaitingInit,
            protocol_version: None,
            router,
            session: SessionId::generate(),
        }
    }

    /// Returns the current server state.
    #[must_use]
    pub const fn state(&self) -> ServerState {
        self.state
    }

    /// Returns the session identifier.
    #[must_use]
    pub const fn session(&self) -> &SessionId {
        &self.session
    }

    /// Returns the negotiated protocol version.
    #[must_use]
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// Serves stdin/stdout until EOF, SIGINT or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if signal handlers cannot be installed or transport
    /// I/O fails.
    pub async fn run(&mut self) -> io::Result<()> {
        let shutdown = shutdown_signal()?;
        self.serve(StdioTransport::stdio(), shutdown).await
    }

    /// Serves one connection until the input closes or `shutdown` resolves.
    ///
    /// On end of input, in-flight tool calls are finished and answered
    /// first; on shutdown they are abandoned. Either way the session is
    /// ended before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn serve<R, W, S>(&mut self, mut transport: Transport<R, W>, shutdown: S) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        S: Future<Output = ()>,
    {
        info!(session = %self.session, "Session started");
        let mut tasks: JoinSet<OutgoingMessage> = JoinSet::new();
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!(pending = tasks.len(), "Shutting down, abandoning in-flight tool calls");
                    tasks.shutdown().await;
                    break Ok(());
                }

                Some(joined) = tasks.join_next() => {
                    if let Err(e) = Self::write_joined(&mut transport, joined).await {
                        break Err(e);
                    }
                }

                line = transport.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if let Err(e) = self.handle_line(&line, &mut transport, &mut tasks).await {
                                break Err(e);
                            }
                        }
                        Ok(None) => {
                            debug!(pending = tasks.len(), "Input closed, finishing in-flight tool calls");
                            break Self::drain(&mut transport, &mut tasks).await;
                        }
                        Err(e) => break Err(e),
                    }
                }
            }
        };

        self.state = ServerState::ShuttingDown;
        self.router.end_session(&self.session).await;
        info!(session = %self.session, "Session ended");
        result
    }

    /// Writes the outcome of a finished tool call task.
    async fn write_joined<R, W>(
        transport: &mut Transport<R, W>,
        joined: Result<OutgoingMessage, JoinError>,
    ) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        match joined {
            Ok(message) => transport.write_message(&message).await,
            Err(e) => {
                error!(error = %e, "Tool call task failed");
                Ok(())
            }
        }
    }

    /// Waits for every in-flight tool call and writes its response.
    async fn drain<R, W>(
        transport: &mut Transport<R, W>,
        tasks: &mut JoinSet<OutgoingMessage>,
    ) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        while let Some(joined) = tasks.join_next().await {
            Self::write_joined(transport, joined).await?;
        }
        Ok(())
    }

    /// Handles a single line of input.
    async fn handle_line<R, W>(
        &mut self,
        line: &str,
        transport: &mut Transport<R, W>,
        tasks: &mut JoinSet<OutgoingMessage>,
    ) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if line.trim().is_empty() {
            return Ok(());
        }

        match parse_message(line) {
            Err(error) => transport.write_message(&OutgoingMessage::Error(error)).await,
            Ok(IncomingMessage::Notification(notif)) => {
                self.handle_notification(&notif);
                Ok(())
            }
            Ok(IncomingMessage::Request(req)) if req.method == "tools/call" => {
                match self.start_tool_call(&req, tasks) {
                    Ok(()) => Ok(()),
                    Err(error) => transport.write_message(&OutgoingMessage::Error(error)).await,
                }
            }
            Ok(IncomingMessage::Request(req)) => {
                let response = self.handle_request(&req);
                transport.write_message(&response.into()).await
            }
        }
    }

    /// Handles requests answered inline.
    fn handle_request(&mut self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        match req.method.as_str() {
            "initialize" => self.handle_initialize(req),
            "tools/list" => self.handle_tools_list(req),
            "ping" => Ok(JsonRpcResponse::success(req.id.clone(), json!({}))),
            _ => Err(JsonRpcError::method_not_found(req.id.clone(), &req.method)),
        }
    }

    /// Handles an incoming notification.
    fn handle_notification(&mut self, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" if self.state == ServerState::Initialising => {
                self.state = ServerState::Running;
                debug!("Client initialised");
            }
            other => debug!(method = other, "Ignoring notification"),
        }
    }

    /// Handles the initialize request.
    fn handle_initialize(&mut self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        if self.state != ServerState::AwaitingInit {
            return Err(JsonRpcError::rejected(
                req.id.clone(),
                "Server already initialised",
            ));
        }

        let params: InitializeParams = req.parse_params("initialize")?;
        if let Some(client) = &params.client_info {
            info!(
                client = %client.name,
                client_version = client.version.as_deref().unwrap_or("unknown"),
                requested_version = %params.protocol_version,
                "Client connected"
            );
        }

        let negotiated_version = MCP_PROTOCOL_VERSION.to_string();
        self.protocol_version = Some(negotiated_version.clone());
        self.state = ServerState::Initialising;

        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({
                "protocolVersion": negotiated_version,
                "capabilities": ServerCapabilities::default(),
                "serverInfo": ServerInfo::default(),
            }),
        ))
    }

    /// Handles the tools/list request.
    fn handle_tools_list(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;
        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({ "tools": ToolRouter::definitions() }),
        ))
    }

    /// Spawns a tools/call request; its response is written on completion.
    fn start_tool_call(
        &self,
        req: &JsonRpcRequest,
        tasks: &mut JoinSet<OutgoingMessage>,
    ) -> Result<(), JsonRpcError> {
        self.require_running(&req.id)?;
        let params: ToolCallParams = req.parse_params("tool call")?;

        let router = Arc::clone(&self.router);
        let session = self.session.clone();
        let id = req.id.clone();
        debug!(tool = %params.name, id = %id, "Dispatching tool call");

        tasks.spawn(async move {
            let result = router.call(&session, &params.name, &params.arguments).await;
            match serde_json::to_value(&result) {
                Ok(value) => OutgoingMessage::Response(JsonRpcResponse::success(id, value)),
                Err(e) => {
                    error!(error = %e, "Failed to serialise tool call result");
                    OutgoingMessage::Error(JsonRpcError::internal_error(
                        id,
                        "Internal error: failed to serialise result",
                    ))
                }
            }
        });
        Ok(())
    }

    /// Ensures the server is in the Running state.
    fn require_running(&self, id: &RequestId) -> Result<(), JsonRpcError> {
        if self.state != ServerState::Running {
            return Err(JsonRpcError::rejected(id.clone(), "Server not initialised"));
        }
        Ok(())
    }
}

/// Resolves on the first SIGINT or SIGTERM.
#[cfg(unix)]
fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
            _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
        }
    })
}

/// Resolves on Ctrl+C.
#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)] // matches the unix signature
fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    })
}
