//! `AnalyzerClient`: one analyzer process, one session, one lifecycle.
//!
//! Every operation checks the lifecycle first, so misuse surfaces as
//! [`ClientError::InvalidState`] or [`ClientError::Closed`] instead of a hang.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::ClientError;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::process::{self, ExitOutcome, LaunchSpec, ProcessHandle};
use crate::protocol::{self, InitializationOptions, InitializeResult};
use crate::rpc::{Connection, InboundHandler, LoggingHandler};
use crate::search::{RULE_ENTRY_COMMAND, SAMPLE_COMMAND, SymbolSearch};
use crate::transport::DuplexTransport;
use crate::types::SymbolInformation;

/// Deadlines for each phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// The `initialize` call.
    pub initialize: Duration,
    /// Default for every other call, including `workspace/executeCommand`.
    pub request: Duration,
    /// Pause after `initialized` while the analyzer imports the workspace.
    pub settle: Duration,
    /// Deadline for the `shutdown` request plus the `exit` notification.
    pub shutdown_request: Duration,
    /// How long the process gets to exit on its own before it is killed.
    pub exit_grace: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            initialize: Duration::from_secs(120),
            request: Duration::from_secs(300),
            settle: Duration::from_secs(5),
            shutdown_request: Duration::from_secs(3),
            exit_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Directory announced as `rootUri`. Relative paths are made absolute.
    pub workspace_root: PathBuf,
    pub initialization: InitializationOptions,
    pub timeouts: SessionTimeouts,
}

/// How a call to [`AnalyzerClient::shutdown`] finished.
#[derive(Debug)]
pub enum ShutdownOutcome {
    /// `start` never succeeded; there was nothing to tear down.
    NeverStarted,
    /// An earlier shutdown already ran.
    AlreadyClosed,
    /// The process exited on its own. `None` when the status was unavailable.
    Exited(Option<std::process::ExitStatus>),
    /// The process outlived the exit grace period and was killed.
    Terminated(Option<std::process::ExitStatus>),
}

impl ShutdownOutcome {
    /// Whether the process (if any) went away without being killed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !matches!(self, Self::Terminated(_))
    }
}

pub struct AnalyzerClient {
    launch: LaunchSpec,
    options: ClientOptions,
    handler: Arc<dyn InboundHandler>,
    lifecycle: Lifecycle,
    process: Option<ProcessHandle>,
    connection: Option<Connection>,
}

impl AnalyzerClient {
    pub fn new(launch: LaunchSpec, options: ClientOptions) -> Self {
        Self {
            launch,
            options,
            handler: Arc::new(LoggingHandler),
            lifecycle: Lifecycle::new(),
            process: None,
            connection: None,
        }
    }

    /// Replace the handler for peer-initiated requests and notifications.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn InboundHandler>) -> Self {
        self.handler = handler;
        self
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(ProcessHandle::pid)
    }

    /// The live session, for issuing raw calls alongside the typed helpers.
    #[must_use]
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// Spawn the analyzer and open the session. Must run inside a Tokio runtime.
    ///
    /// On failure the client stays `NotStarted`.
    pub fn start(&mut self) -> Result<(), ClientError> {
        self.lifecycle
            .require("start", &[LifecycleState::NotStarted])?;

        let spawned = process::spawn(&self.launch)?;
        let transport = DuplexTransport::new(spawned.stdout, spawned.stdin);
        let connection = Connection::new(
            transport,
            Arc::clone(&self.handler),
            self.options.timeouts.request,
        );
        tracing::info!(pid = spawned.handle.pid(), "Connection established");

        self.process = Some(spawned.handle);
        self.connection = Some(connection);
        self.lifecycle.advance(LifecycleState::Started);
        Ok(())
    }

    /// Run the `initialize` / `initialized` handshake, then wait the settle
    /// interval.
    ///
    /// On failure the client stays `Started`; call [`shutdown`](Self::shutdown)
    /// to release the process.
    pub async fn initialize(&mut self) -> Result<InitializeResult, ClientError> {
        self.lifecycle
            .require("initialize", &[LifecycleState::Started])?;
        let connection = self.connection.as_ref().ok_or(ClientError::Closed)?;

        let root = std::path::absolute(&self.options.workspace_root)
            .unwrap_or_else(|_| self.options.workspace_root.clone());
        let root_uri = protocol::path_to_file_uri(&root)?;
        let params = protocol::initialize_params(root_uri.as_str(), &self.options.initialization);

        let timeouts = self.options.timeouts;
        let raw = connection
            .call_with_timeout("initialize", Some(params), timeouts.initialize)
            .await
            .map_err(ClientError::Initialize)?;
        let result = decode_initialize(raw)?;

        connection
            .notify("initialized", Some(serde_json::json!({})))
            .await
            .map_err(ClientError::Initialize)?;

        if let Some(info) = &result.server_info {
            tracing::info!(
                server = %info.name,
                version = info.version.as_deref().unwrap_or("unknown"),
                "Analyzer initialized"
            );
        } else {
            tracing::info!("Analyzer initialized");
        }

        if !timeouts.settle.is_zero() {
            tracing::info!(settle = ?timeouts.settle, "Waiting for workspace import to settle");
            tokio::time::sleep(timeouts.settle).await;
        }

        self.lifecycle.advance(LifecycleState::Ready);
        Ok(result)
    }

    /// Issue `workspace/executeCommand` and return the raw result.
    ///
    /// Each argument is serialized on its own; the first that fails is
    /// reported by index.
    pub async fn execute_command<A: Serialize>(
        &self,
        command: &str,
        arguments: &[A],
    ) -> Result<Value, ClientError> {
        let connection = self.ready_connection("execute a command")?;
        let arguments = marshal_arguments(arguments)?;
        tracing::debug!(command, "Executing command");
        let params = protocol::execute_command_params(command, arguments);
        Ok(connection
            .call("workspace/executeCommand", Some(params))
            .await?)
    }

    /// Run the bundle's rule-entry search. A `null` result is an empty list.
    pub async fn search_symbols(
        &self,
        search: &SymbolSearch,
    ) -> Result<Vec<SymbolInformation>, ClientError> {
        let raw = self
            .execute_command(RULE_ENTRY_COMMAND, std::slice::from_ref(search))
            .await?;
        let symbols = decode_symbols(raw)?;
        tracing::debug!(
            query = %search.query,
            location = %search.location,
            found = symbols.len(),
            "Symbol search finished"
        );
        Ok(symbols)
    }

    /// Call the bundle's sample command; a live bundle answers with a greeting.
    pub async fn ping(&self) -> Result<String, ClientError> {
        let raw = self.execute_command::<Value>(SAMPLE_COMMAND, &[]).await?;
        match raw {
            Value::String(text) => Ok(text),
            Value::Null => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }

    /// Tear the session down. Never fails and never blocks past the
    /// configured deadlines; safe to call in any state, any number of times.
    pub async fn shutdown(&mut self) -> ShutdownOutcome {
        match self.lifecycle.state() {
            LifecycleState::Closed => return ShutdownOutcome::AlreadyClosed,
            LifecycleState::ShuttingDown => {}
            _ => self.lifecycle.advance(LifecycleState::ShuttingDown),
        }

        let timeouts = self.options.timeouts;
        let outcome = match self.connection.take() {
            None => match self.process.take() {
                None => {
                    tracing::debug!("Shutdown requested before the analyzer was started");
                    ShutdownOutcome::NeverStarted
                }
                Some(process) => reap(process, Duration::ZERO).await,
            },
            Some(connection) => {
                tracing::info!("Shutting down analyzer");
                let deadline = Instant::now() + timeouts.shutdown_request;

                if let Err(e) = connection
                    .call_with_timeout("shutdown", None, timeouts.shutdown_request)
                    .await
                {
                    tracing::warn!("Shutdown request failed: {e}");
                }

                let remaining = deadline.saturating_duration_since(Instant::now());
                match tokio::time::timeout(remaining, connection.notify("exit", None)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!("Exit notification failed: {e}"),
                    Err(_) => tracing::warn!("Exit notification timed out"),
                }

                connection.close().await;
                connection.cancel();

                match self.process.take() {
                    Some(process) => reap(process, timeouts.exit_grace).await,
                    None => ShutdownOutcome::Exited(None),
                }
            }
        };

        self.lifecycle.advance(LifecycleState::Closed);
        outcome
    }

    /// Alias for [`shutdown`](Self::shutdown).
    pub async fn close(&mut self) -> ShutdownOutcome {
        self.shutdown().await
    }

    fn ready_connection(&self, operation: &'static str) -> Result<&Connection, ClientError> {
        self.lifecycle.require(operation, &[LifecycleState::Ready])?;
        self.connection.as_ref().ok_or(ClientError::Closed)
    }
}

async fn reap(process: ProcessHandle, grace: Duration) -> ShutdownOutcome {
    let pid = process.pid();
    match process.reap(grace).await {
        ExitOutcome::Exited(status) => {
            if status.success() {
                tracing::info!(pid, "Analyzer shut down cleanly");
            } else {
                tracing::info!(pid, %status, "Analyzer exited");
            }
            ShutdownOutcome::Exited(Some(status))
        }
        ExitOutcome::Terminated(status) => {
            tracing::info!(pid, "Analyzer terminated");
            ShutdownOutcome::Terminated(status)
        }
        ExitOutcome::Unknown(e) => {
            tracing::warn!(pid, "Analyzer exit status unavailable: {e}");
            ShutdownOutcome::Exited(None)
        }
    }
}

fn marshal_arguments<A: Serialize>(arguments: &[A]) -> Result<Vec<Value>, ClientError> {
    arguments
        .iter()
        .enumerate()
        .map(|(index, argument)| {
            serde_json::to_value(argument)
                .map_err(|source| ClientError::ArgumentMarshal { index, source })
        })
        .collect()
}

/// A null `initialize` result carries no capabilities but is not a failure.
fn decode_initialize(raw: Value) -> Result<InitializeResult, ClientError> {
    if raw.is_null() {
        return Ok(InitializeResult::default());
    }
    serde_json::from_value(raw).map_err(ClientError::ResultDecode)
}

fn decode_symbols(raw: Value) -> Result<Vec<SymbolInformation>, ClientError> {
    if raw.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(raw).map_err(ClientError::ResultDecode)
}
