//! Shared test utilities and fixtures

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use probe_lsp::{
    AnalyzerClient, ClientOptions, InboundHandler, InitializationOptions, LaunchSpec,
    SessionTimeouts, StderrSink,
};
use tempfile::TempDir;

/// Path of the scripted analyzer built alongside the tests.
pub const MOCK_ANALYZER: &str = env!("CARGO_BIN_EXE_mock-analyzer");

/// Timeouts that keep the suite fast: no settle pause, short deadlines.
pub fn fast_timeouts() -> SessionTimeouts {
    SessionTimeouts {
        initialize: Duration::from_secs(10),
        request: Duration::from_secs(10),
        settle: Duration::ZERO,
        shutdown_request: Duration::from_secs(2),
        exit_grace: Duration::from_secs(5),
    }
}

/// A client wired to `mock-analyzer` plus the workspace it runs in.
pub struct MockSession {
    pub client: AnalyzerClient,
    pub workspace: TempDir,
}

pub fn mock_client(extra_args: &[&str], timeouts: SessionTimeouts) -> MockSession {
    let workspace = tempfile::tempdir().expect("create workspace");
    let launch = LaunchSpec::new(MOCK_ANALYZER)
        .args(extra_args)
        .work_dir(workspace.path().join("data"))
        .stderr(StderrSink::Discard);
    let options = ClientOptions {
        workspace_root: workspace.path().to_path_buf(),
        initialization: InitializationOptions {
            bundles: vec!["/jdtls/plugins/java-analyzer-bundle.core-1.0.0-SNAPSHOT.jar".into()],
            workspace_folders: Vec::new(),
        },
        timeouts,
    };
    MockSession {
        client: AnalyzerClient::new(launch, options),
        workspace,
    }
}

/// Start and initialize a mock-backed client.
pub async fn ready_session(extra_args: &[&str]) -> MockSession {
    ready_session_with(extra_args, fast_timeouts(), None).await
}

pub async fn ready_session_with(
    extra_args: &[&str],
    timeouts: SessionTimeouts,
    handler: Option<Arc<dyn InboundHandler>>,
) -> MockSession {
    let MockSession { client, workspace } = mock_client(extra_args, timeouts);
    let mut client = match handler {
        Some(handler) => client.with_handler(handler),
        None => client,
    };
    client.start().expect("start mock analyzer");
    client.initialize().await.expect("initialize mock analyzer");
    MockSession { client, workspace }
}
