//! Raw session behavior against the child: correlation, timeouts, and
//! peer-initiated traffic.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use probe_lsp::{HandlerOutcome, InboundHandler, InboundMessage, RpcError};
use serde_json::json;

use crate::common::{fast_timeouts, ready_session, ready_session_with};

#[tokio::test]
async fn concurrent_calls_get_their_own_results() {
    let mut session = ready_session(&[]).await;
    let client = &session.client;

    let delayed = |ms: u64, tag: &str| {
        let args = [json!({ "ms": ms, "tag": tag })];
        async move { client.execute_command("mock/delay", &args).await }
    };

    let (slow, medium, fast) =
        tokio::join!(delayed(200, "slow"), delayed(100, "medium"), delayed(0, "fast"));

    assert_eq!(slow.unwrap(), json!({ "tag": "slow" }));
    assert_eq!(medium.unwrap(), json!({ "tag": "medium" }));
    assert_eq!(fast.unwrap(), json!({ "tag": "fast" }));
    session.client.shutdown().await;
}

#[tokio::test]
async fn timed_out_call_leaves_no_pending_entry() {
    let mut session = ready_session(&[]).await;
    let connection = session.client.connection().unwrap();

    let params = json!({ "command": "mock/hang", "arguments": [] });
    let err = connection
        .call_with_timeout(
            "workspace/executeCommand",
            Some(params),
            Duration::from_millis(1),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout { .. }), "{err}");
    assert!(err.is_timeout());
    assert_eq!(connection.pending_len(), 0);

    assert_eq!(session.client.ping().await.unwrap(), "Hello World");
    session.client.shutdown().await;
}

#[tokio::test]
async fn cancelled_calls_fail_with_cancelled() {
    let mut session = ready_session(&[]).await;
    let connection = session.client.connection().unwrap();

    let params = json!({ "command": "mock/hang", "arguments": [] });
    let hung = connection.call("workspace/executeCommand", Some(params));
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        connection.cancel();
    };
    let (result, ()) = tokio::join!(hung, cancel);

    let err = result.unwrap_err();
    assert!(err.is_cancelled(), "{err}");
    assert_eq!(connection.pending_len(), 0);
    session.client.shutdown().await;
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, bool)>>,
}

impl InboundHandler for Recorder {
    fn handle(&self, message: &InboundMessage) -> HandlerOutcome {
        self.seen
            .lock()
            .unwrap()
            .push((message.method.clone(), message.is_request()));
        if message.method == "workspace/configuration" {
            HandlerOutcome::Handled(json!([null]))
        } else {
            HandlerOutcome::NotHandled
        }
    }
}

#[tokio::test]
async fn peer_traffic_reaches_the_handler() {
    let recorder = Arc::new(Recorder::default());
    let mut session = ready_session_with(&[], fast_timeouts(), Some(recorder.clone())).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let seen = recorder.seen.lock().unwrap().clone();
        if seen.len() >= 2 {
            assert!(seen.contains(&("workspace/configuration".to_string(), true)));
            assert!(seen.contains(&("window/logMessage".to_string(), false)));
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "handler saw only {seen:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    session.client.shutdown().await;
}
