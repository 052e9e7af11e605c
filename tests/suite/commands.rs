//! `workspace/executeCommand` through the client helpers.

use probe_lsp::{
    AnalysisMode, AnnotationQuery, ClientError, LocationKind, METHOD_NOT_FOUND, RpcError,
    SymbolSearch,
};
use serde_json::json;

use crate::common::ready_session;

#[tokio::test]
async fn null_result_is_an_empty_list() {
    let mut session = ready_session(&[]).await;
    let search = SymbolSearch::new(
        "java",
        "com.example.DoesNotExist",
        LocationKind::Type,
        AnalysisMode::Full,
    );
    let symbols = session.client.search_symbols(&search).await.unwrap();
    assert!(symbols.is_empty());
    session.client.shutdown().await;
}

#[tokio::test]
async fn sample_command_answers_hello_world() {
    let mut session = ready_session(&[]).await;
    assert_eq!(session.client.ping().await.unwrap(), "Hello World");
    session.client.shutdown().await;
}

#[tokio::test]
async fn arguments_round_trip_through_the_peer() {
    let mut session = ready_session(&[]).await;
    let search = SymbolSearch::new(
        "java",
        "javax.ejb.Stateless",
        LocationKind::Annotation,
        AnalysisMode::SourceOnly,
    )
    .included_paths(["src/main/java/io/konveyor/demo/ejb"])
    .annotation(AnnotationQuery::new("javax.ejb.Stateless").element("name", "OrderService"));

    let echoed = session
        .client
        .execute_command("mock/echo", std::slice::from_ref(&search))
        .await
        .unwrap();

    assert_eq!(echoed[0]["location"], "4");
    assert_eq!(echoed[0]["annotationQuery"]["elements"][0]["value"], "OrderService");

    let decoded: Vec<SymbolSearch> = serde_json::from_value(echoed).unwrap();
    assert_eq!(decoded, vec![search.clone()]);
    let back = &decoded[0];
    assert_eq!(back.location, LocationKind::Annotation);
    assert_eq!(back.analysis_mode, AnalysisMode::SourceOnly);
    assert_eq!(
        back.included_paths.as_deref(),
        Some(&["src/main/java/io/konveyor/demo/ejb".to_string()][..])
    );
    let annotation = back.annotation_query.as_ref().unwrap();
    assert_eq!(annotation.pattern, "javax.ejb.Stateless");
    assert_eq!(annotation.elements[0].name, "name");
    assert!(back.include_open_source_libraries.is_none());
    session.client.shutdown().await;
}

#[tokio::test]
async fn mixed_arguments_keep_their_order() {
    let mut session = ready_session(&[]).await;
    let args = [json!("first"), json!({ "n": 2 }), json!([3])];
    let echoed = session
        .client
        .execute_command("mock/echo", &args)
        .await
        .unwrap();
    assert_eq!(echoed, json!(["first", { "n": 2 }, [3]]));
    session.client.shutdown().await;
}

#[tokio::test]
async fn peer_error_is_surfaced_and_session_survives() {
    let mut session = ready_session(&[]).await;

    let err = session
        .client
        .execute_command::<serde_json::Value>("mock/fail", &[])
        .await
        .unwrap_err();
    match err {
        ClientError::Rpc(RpcError::Response { method, error }) => {
            assert_eq!(method, "workspace/executeCommand");
            assert_eq!(error.code, -32000);
            assert_eq!(error.message, "mock failure");
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(session.client.ping().await.unwrap(), "Hello World");
    session.client.shutdown().await;
}

#[tokio::test]
async fn unknown_command_is_method_not_found() {
    let mut session = ready_session(&[]).await;
    let err = session
        .client
        .execute_command::<serde_json::Value>("io.konveyor.tackle.nope", &[])
        .await
        .unwrap_err();
    assert!(
        matches!(
            &err,
            ClientError::Rpc(RpcError::Response { error, .. }) if error.code == METHOD_NOT_FOUND
        ),
        "{err}"
    );
    session.client.shutdown().await;
}

#[tokio::test]
async fn malformed_frame_does_not_end_the_session() {
    let mut session = ready_session(&[]).await;
    let reply = session
        .client
        .execute_command::<serde_json::Value>("mock/garbage", &[])
        .await
        .unwrap();
    assert_eq!(reply, "survived");

    let symbols = session
        .client
        .search_symbols(&SymbolSearch::new(
            "java",
            "java.io.File",
            LocationKind::Default,
            AnalysisMode::SourceOnly,
        ))
        .await
        .unwrap();
    assert_eq!(symbols.len(), 5);
    session.client.shutdown().await;
}
