//! Drive a Java analyzer language server over JSON-RPC on its stdio.
//!
//! Layers, bottom up: [`codec`] frames messages, [`transport`] wraps the
//! child's pipes, [`process`] owns the child, [`rpc`] correlates calls, and
//! [`AnalyzerClient`] enforces the lifecycle on top.

pub mod codec;
pub mod process;
pub mod rpc;
pub mod search;
pub mod transport;
pub mod types;

mod client;
mod error;
mod lifecycle;
pub(crate) mod protocol;

pub use client::{AnalyzerClient, ClientOptions, SessionTimeouts, ShutdownOutcome};
pub use error::{ClientError, RpcError, SpawnError};
pub use lifecycle::LifecycleState;
pub use process::{LaunchSpec, StderrSink};
pub use protocol::{
    INTERNAL_ERROR, InitializationOptions, InitializeResult, METHOD_NOT_FOUND, PathToUriError,
    ResponseError, ServerInfo, path_to_file_uri,
};
pub use rpc::{Connection, HandlerOutcome, InboundHandler, InboundMessage, LoggingHandler};
pub use search::{
    AnalysisMode, AnnotationElement, AnnotationQuery, LocationKind, RULE_ENTRY_COMMAND,
    SAMPLE_COMMAND, SymbolSearch,
};
pub use types::{SymbolInformation, SymbolKind};
