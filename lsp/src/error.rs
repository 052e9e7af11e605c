//! Error types surfaced by the session and the client.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleState;
use crate::protocol::{PathToUriError, ResponseError};

/// The analyzer process could not be started.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("{program} not found in PATH: {source}")]
    NotFound {
        program: String,
        #[source]
        source: which::Error,
    },
    #[error("executable {} does not exist", .0.display())]
    MissingExecutable(PathBuf),
    #[error("cannot prepare working directory {}: {source}", path.display())]
    WorkDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot open stderr log {}: {source}", path.display())]
    StderrLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("spawning {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no {0} pipe from child")]
    MissingPipe(&'static str),
}

/// A single call or notification failed. The connection may still be usable.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("{method} timed out after {after:?}")]
    Timeout { method: String, after: Duration },
    #[error("{method} was cancelled")]
    Cancelled { method: String },
    #[error("connection is closed")]
    Closed,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("{method} failed: {error}")]
    Response {
        method: String,
        error: ResponseError,
    },
    #[error("serializing {method}: {source}")]
    Serialize {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RpcError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to start analyzer: {0}")]
    Start(#[from] SpawnError),
    #[error("initialize handshake failed: {0}")]
    Initialize(#[source] RpcError),
    #[error("workspace root is not a valid file URI: {0}")]
    WorkspaceUri(#[from] PathToUriError),
    #[error("cannot {operation} while the client is {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
    #[error("client is closed")]
    Closed,
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("argument {index} could not be serialized: {source}")]
    ArgumentMarshal {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("result did not match the expected shape: {0}")]
    ResultDecode(#[source] serde_json::Error),
}
