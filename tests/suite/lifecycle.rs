//! Start, initialize, and shutdown against a real child process.

use std::time::{Duration, Instant};

use probe_lsp::{
    AnalysisMode, ClientError, LifecycleState, LocationKind, RpcError, ShutdownOutcome,
    SymbolSearch,
};

use crate::common::{fast_timeouts, mock_client, ready_session, ready_session_with};

fn file_search() -> SymbolSearch {
    SymbolSearch::new(
        "p",
        "java.io.File",
        LocationKind::Default,
        AnalysisMode::SourceOnly,
    )
}

#[tokio::test]
async fn full_lifecycle_finds_five_file_usages() {
    let mut session = ready_session(&[]).await;
    let client = &mut session.client;
    assert_eq!(client.state(), LifecycleState::Ready);
    assert!(client.pid().is_some());

    let symbols = client.search_symbols(&file_search()).await.unwrap();
    assert_eq!(symbols.len(), 5);
    assert!(symbols.iter().all(|s| s.name == "File"));

    let outcome = client.shutdown().await;
    assert!(
        matches!(outcome, ShutdownOutcome::Exited(Some(status)) if status.success()),
        "{outcome:?}"
    );
    assert_eq!(client.state(), LifecycleState::Closed);
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let mut session = ready_session(&[]).await;
    let first = session.client.shutdown().await;
    assert!(first.is_clean(), "{first:?}");
    assert!(matches!(
        session.client.shutdown().await,
        ShutdownOutcome::AlreadyClosed
    ));
    assert!(matches!(
        session.client.close().await,
        ShutdownOutcome::AlreadyClosed
    ));
}

#[tokio::test]
async fn calls_after_close_fail_fast() {
    let mut session = ready_session(&[]).await;
    session.client.shutdown().await;

    let started = Instant::now();
    let err = session.client.search_symbols(&file_search()).await.unwrap_err();
    assert!(matches!(err, ClientError::Closed), "{err}");
    assert!(matches!(session.client.ping().await, Err(ClientError::Closed)));
    assert!(session.client.connection().is_none());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn wedged_analyzer_is_killed_after_grace() {
    let timeouts = probe_lsp::SessionTimeouts {
        exit_grace: Duration::from_millis(300),
        ..fast_timeouts()
    };
    let mut session = ready_session_with(&["--ignore-exit"], timeouts, None).await;

    let started = Instant::now();
    let outcome = session.client.shutdown().await;
    assert!(
        matches!(outcome, ShutdownOutcome::Terminated(_)),
        "{outcome:?}"
    );
    assert!(!outcome.is_clean());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(session.client.state(), LifecycleState::Closed);
}

#[tokio::test]
async fn missing_executable_fails_start_and_shutdown_still_works() {
    let dir = tempfile::tempdir().unwrap();
    let launch = probe_lsp::LaunchSpec::new(dir.path().join("bin").join("jdtls"));
    let mut client = probe_lsp::AnalyzerClient::new(launch, probe_lsp::ClientOptions::default());

    let err = client.start().unwrap_err();
    assert!(matches!(err, ClientError::Start(_)), "{err}");
    assert_eq!(client.state(), LifecycleState::NotStarted);

    assert!(matches!(
        client.shutdown().await,
        ShutdownOutcome::NeverStarted
    ));
    assert_eq!(client.state(), LifecycleState::Closed);
}

#[tokio::test]
async fn failed_initialize_leaves_client_started() {
    let timeouts = probe_lsp::SessionTimeouts {
        initialize: Duration::from_nanos(1),
        ..fast_timeouts()
    };
    let mut session = mock_client(&[], timeouts);
    session.client.start().unwrap();

    let err = session.client.initialize().await.unwrap_err();
    assert!(
        matches!(err, ClientError::Initialize(RpcError::Timeout { .. })),
        "{err}"
    );
    assert_eq!(session.client.state(), LifecycleState::Started);

    let outcome = session.client.shutdown().await;
    assert!(outcome.is_clean(), "{outcome:?}");
    assert_eq!(session.client.state(), LifecycleState::Closed);
}

#[tokio::test]
async fn null_initialize_result_still_reaches_ready() {
    let mut session = mock_client(&["--null-initialize"], fast_timeouts());
    session.client.start().unwrap();

    let result = session.client.initialize().await.unwrap();
    assert!(result.commands().is_empty());
    assert!(result.server_info.is_none());
    assert_eq!(session.client.state(), LifecycleState::Ready);
    assert_eq!(session.client.ping().await.unwrap(), "Hello World");

    let outcome = session.client.shutdown().await;
    assert!(outcome.is_clean(), "{outcome:?}");
}

#[tokio::test]
async fn repeated_transitions_are_rejected() {
    let mut session = ready_session(&[]).await;

    let err = session.client.start().unwrap_err();
    assert!(
        matches!(
            err,
            ClientError::InvalidState {
                state: LifecycleState::Ready,
                ..
            }
        ),
        "{err}"
    );
    let err = session.client.initialize().await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidState { .. }), "{err}");

    session.client.shutdown().await;
}

#[tokio::test]
async fn workspace_directory_is_created_before_spawn() {
    let mut session = mock_client(&[], fast_timeouts());
    let data_dir = session.workspace.path().join("data");
    assert!(!data_dir.exists());

    session.client.start().unwrap();
    assert!(data_dir.is_dir());
    session.client.shutdown().await;
}
