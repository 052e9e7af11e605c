//! JSON-RPC message serde types and the parameter builders for the methods
//! this client sends.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// JSON-RPC `Method not found`.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC `Internal error`.
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, thiserror::Error)]
#[error("{} is not an absolute path usable as a file URI", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Our answer to a request the peer sent us.
#[derive(Debug, Serialize)]
pub(crate) struct Response {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: serde_json::Value, error: ResponseError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ResponseError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Options the analyzer bundle reads from `initializationOptions`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitializationOptions {
    /// Absolute locations of the bundle jars the server should load.
    pub bundles: Vec<String>,
    /// Workspace folder URIs. Empty means "the root URI only".
    pub workspace_folders: Vec<String>,
}

pub(crate) fn initialize_params(
    root_uri: &str,
    options: &InitializationOptions,
) -> serde_json::Value {
    let workspace_folders = if options.workspace_folders.is_empty() {
        vec![root_uri.to_string()]
    } else {
        options.workspace_folders.clone()
    };

    serde_json::json!({
        "processId": null,
        "rootUri": root_uri,
        "capabilities": {
            "workspace": {
                "workspaceFolders": true,
                "configuration": true
            },
            "textDocument": {
                "synchronization": {
                    "didSave": true
                }
            }
        },
        "initializationOptions": {
            "bundles": options.bundles,
            "workspaceFolders": workspace_folders
        }
    })
}

pub(crate) fn execute_command_params(
    command: &str,
    arguments: Vec<serde_json::Value>,
) -> serde_json::Value {
    serde_json::json!({
        "command": command,
        "arguments": arguments
    })
}

/// What the server reports back from `initialize`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl InitializeResult {
    /// Commands advertised under `executeCommandProvider.commands`.
    #[must_use]
    pub fn commands(&self) -> Vec<&str> {
        self.capabilities["executeCommandProvider"]["commands"]
            .as_array()
            .map(|cmds| cmds.iter().filter_map(serde_json::Value::as_str).collect())
            .unwrap_or_default()
    }
}

pub fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}
