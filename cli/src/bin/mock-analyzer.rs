//! Scripted stand-in for a JDT.LS analyzer, speaking the same framing on
//! stdio. Drives the end-to-end suite.
//!
//! Commands beyond the bundle's own:
//! - `mock/echo`: returns its arguments
//! - `mock/delay`: `[{"ms": N, "tag": T}]`, answers `{"tag": T}` after N ms
//! - `mock/hang`: never answers
//! - `mock/garbage`: writes a malformed frame, then answers `"survived"`
//! - `mock/fail`: answers with a JSON-RPC error

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use probe_lsp::codec::{FrameReader, FrameWriter};
use probe_lsp::{METHOD_NOT_FOUND, RULE_ENTRY_COMMAND, SAMPLE_COMMAND};

#[derive(Parser)]
#[command(name = "mock-analyzer")]
struct Args {
    /// Keep running after `exit` and after stdin closes, like a wedged server.
    #[arg(long)]
    ignore_exit: bool,

    /// Answer `initialize` with a null result instead of capabilities.
    #[arg(long)]
    null_initialize: bool,
}

enum Outbound {
    Frame(Value),
    Raw(&'static [u8]),
}

struct Peer {
    out: mpsc::Sender<Outbound>,
    shutdown_requested: bool,
    ignore_exit: bool,
    null_initialize: bool,
}

/// What the main loop should do after a message.
enum Flow {
    Continue,
    Exit(ExitCode),
}

impl Peer {
    async fn send(&self, message: Value) {
        let _ = self.out.send(Outbound::Frame(message)).await;
    }

    async fn reply(&self, id: &Value, result: Value) {
        self.send(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
            .await;
    }

    async fn reply_error(&self, id: &Value, code: i64, message: &str) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message }
        }))
        .await;
    }

    async fn handle(&mut self, message: Value) -> Flow {
        let method = message["method"].as_str().map(str::to_owned);
        let id = message.get("id").cloned();

        match (method, id) {
            (Some(method), Some(id)) => {
                self.handle_request(&method, id, &message["params"]).await;
                Flow::Continue
            }
            (Some(method), None) => self.handle_notification(&method).await,
            (None, Some(id)) => {
                tracing::debug!(%id, response = %message, "Client answered our request");
                Flow::Continue
            }
            (None, None) => {
                tracing::warn!(%message, "Unrecognized message");
                Flow::Continue
            }
        }
    }

    async fn handle_request(&mut self, method: &str, id: Value, params: &Value) {
        match method {
            "initialize" if self.null_initialize => self.reply(&id, Value::Null).await,
            "initialize" => {
                self.reply(
                    &id,
                    json!({
                        "capabilities": {
                            "executeCommandProvider": {
                                "commands": [
                                    RULE_ENTRY_COMMAND,
                                    SAMPLE_COMMAND,
                                    "mock/echo",
                                    "mock/delay",
                                    "mock/hang",
                                    "mock/garbage",
                                    "mock/fail"
                                ]
                            },
                            "workspaceSymbolProvider": true
                        },
                        "serverInfo": {
                            "name": "mock-analyzer",
                            "version": env!("CARGO_PKG_VERSION")
                        }
                    }),
                )
                .await;
            }
            "shutdown" => {
                self.shutdown_requested = true;
                self.reply(&id, Value::Null).await;
            }
            "workspace/executeCommand" => {
                let command = params["command"].as_str().unwrap_or_default();
                let arguments = params["arguments"].clone();
                self.execute(command, id, arguments).await;
            }
            other => {
                self.reply_error(&id, METHOD_NOT_FOUND, &format!("Unhandled method {other}"))
                    .await;
            }
        }
    }

    async fn execute(&self, command: &str, id: Value, arguments: Value) {
        match command {
            RULE_ENTRY_COMMAND => {
                let query = arguments[0]["query"].as_str().unwrap_or_default();
                self.reply(&id, rule_entry(query)).await;
            }
            SAMPLE_COMMAND => self.reply(&id, json!("Hello World")).await,
            "mock/echo" => self.reply(&id, arguments).await,
            "mock/delay" => {
                let ms = arguments[0]["ms"].as_u64().unwrap_or(0);
                let tag = arguments[0]["tag"].clone();
                let out = self.out.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    let reply = json!({ "jsonrpc": "2.0", "id": id, "result": { "tag": tag } });
                    let _ = out.send(Outbound::Frame(reply)).await;
                });
            }
            "mock/hang" => tracing::debug!(%id, "Leaving request unanswered"),
            "mock/garbage" => {
                let _ = self.out.send(Outbound::Raw(b"{\"jsonrpc\": \"2.0\", \"id\": ")).await;
                self.reply(&id, json!("survived")).await;
            }
            "mock/fail" => self.reply_error(&id, -32000, "mock failure").await,
            other => {
                self.reply_error(
                    &id,
                    METHOD_NOT_FOUND,
                    &format!("No delegateCommandHandler for {other}"),
                )
                .await;
            }
        }
    }

    async fn handle_notification(&mut self, method: &str) -> Flow {
        match method {
            "initialized" => {
                self.send(json!({
                    "jsonrpc": "2.0",
                    "id": "mock-1",
                    "method": "workspace/configuration",
                    "params": { "items": [{ "section": "java" }] }
                }))
                .await;
                self.send(json!({
                    "jsonrpc": "2.0",
                    "method": "window/logMessage",
                    "params": { "type": 3, "message": "mock-analyzer ready" }
                }))
                .await;
                Flow::Continue
            }
            "exit" if self.ignore_exit => {
                tracing::info!("Ignoring exit notification");
                Flow::Continue
            }
            "exit" => Flow::Exit(if self.shutdown_requested {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }),
            other => {
                tracing::debug!(method = other, "Notification ignored");
                Flow::Continue
            }
        }
    }
}

/// Five `java.io.File` usages for that exact query; `null` otherwise.
fn rule_entry(query: &str) -> Value {
    if query != "java.io.File" {
        return Value::Null;
    }
    let files = [
        ("FileUtils", "util/FileUtils.java", 12),
        ("FileUtils", "util/FileUtils.java", 27),
        ("SampleApplication", "SampleApplication.java", 40),
        ("PackageUsageExample", "PackageUsageExample.java", 3),
        ("DataService", "service/DataService.java", 58),
    ];
    Value::Array(
        files
            .iter()
            .map(|(container, path, line)| {
                json!({
                    "name": "File",
                    "kind": 5,
                    "containerName": container,
                    "location": {
                        "uri": format!("file:///projects/test-project/src/main/java/io/konveyor/demo/{path}"),
                        "range": {
                            "start": { "line": line, "character": 8 },
                            "end": { "line": line, "character": 12 }
                        }
                    }
                })
            })
            .collect(),
    )
}

async fn write_loop(mut writer: FrameWriter<tokio::io::Stdout>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(outbound) = rx.recv().await {
        let result = match outbound {
            Outbound::Frame(message) => writer.write_frame(&message).await,
            Outbound::Raw(body) => writer.write_raw(body).await,
        };
        if let Err(e) = result {
            tracing::warn!("Write failed: {e}");
            break;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let args = Args::parse();
    let (tx, rx) = mpsc::channel(64);
    let writer = tokio::spawn(write_loop(FrameWriter::new(tokio::io::stdout()), rx));
    let mut reader = FrameReader::new(tokio::io::stdin());
    let mut peer = Peer {
        out: tx,
        shutdown_requested: false,
        ignore_exit: args.ignore_exit,
        null_initialize: args.null_initialize,
    };

    let code = loop {
        match reader.read_frame().await {
            Ok(Some(message)) => {
                if let Flow::Exit(code) = peer.handle(message).await {
                    break code;
                }
            }
            Ok(None) => {
                if peer.ignore_exit {
                    tracing::info!("Input closed, staying up");
                    std::future::pending::<()>().await;
                }
                break ExitCode::FAILURE;
            }
            Err(e) if e.is_recoverable() => tracing::warn!("Skipping frame: {e}"),
            Err(e) => return Err(e).context("reading from client"),
        }
    };

    drop(peer);
    let _ = writer.await;
    Ok(code)
}
