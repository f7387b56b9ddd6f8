use std::str::FromStr;

use lspmux_core::error::codes;
use lspmux_core::session::{SessionState, SyncKind, initialize_params};
use lspmux_core::{CancellationToken, LspSession, SessionConfig};
use lsp_types::{
    DocumentSymbolParams, DocumentSymbolResponse, HoverParams, Position, Range,
    TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentItem,
    TextDocumentPositionParams, Uri,
};
use rstest::rstest;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::common::mock_lsp::ScriptedServer;
use crate::common::test_utils::connected_session;

#[allow(clippy::unwrap_used)]
fn test_uri() -> Uri {
    Uri::from_str("file:///workspace/src/main.rs").unwrap()
}

/// Run `initialize` + `initialized` against the scripted server.
#[allow(clippy::unwrap_used)]
async fn handshake(session: &LspSession, server: &ScriptedServer, capabilities: Value) {
    let params = initialize_params(&SessionConfig::default().client).unwrap();
    let (result, _) = tokio::join!(
        session.initialize(params),
        server.accept_initialize(capabilities)
    );
    result.unwrap();

    session.initialized().unwrap();
    server.expect_notification("initialized").await;
}

#[allow(clippy::unwrap_used)]
async fn open_document(session: &LspSession, server: &ScriptedServer) -> Uri {
    let uri = test_uri();
    session
        .did_open(TextDocumentItem {
            uri: uri.clone(),
            language_id: "rust".to_string(),
            version: 1,
            text: "fn main() {}\n".to_string(),
        })
        .unwrap();
    server.expect_notification("textDocument/didOpen").await;
    uri
}

#[rstest]
#[case::bare_incremental(json!({"textDocumentSync": 2}), SyncKind::Incremental)]
#[case::bare_none(json!({"textDocumentSync": 0}), SyncKind::None)]
#[case::options_full(json!({"textDocumentSync": {"change": 1}}), SyncKind::Full)]
#[case::options_incremental(json!({"textDocumentSync": {"openClose": true, "change": 2}}), SyncKind::Incremental)]
#[case::absent(json!({}), SyncKind::Full)]
#[tokio::test]
async fn test_initialize_derives_sync_kind(#[case] capabilities: Value, #[case] expected: SyncKind) {
    let (session, server) = connected_session().await;
    assert_eq!(session.state(), SessionState::Uninitialized);

    handshake(&session, &server, capabilities).await;

    assert_eq!(session.sync_kind(), expected);
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_initialize_keeps_capabilities_verbatim() {
    let (session, server) = connected_session().await;
    let capabilities = json!({
        "hoverProvider": true,
        "textDocumentSync": 1,
        "experimental": {"inlayHints": {"resolve": true}}
    });

    let params = initialize_params(&SessionConfig::default().client).unwrap();
    let (result, request) = tokio::join!(
        session.initialize(params),
        server.accept_initialize(capabilities.clone())
    );
    let negotiated = result.unwrap();

    assert_eq!(request["params"]["clientInfo"]["name"], "lspmux");
    assert_eq!(Value::Object(negotiated.raw().clone()), capabilities);
    assert!(negotiated.supports("hoverProvider"));
    assert_eq!(session.server_info().unwrap().name, "scripted-server");
    assert_eq!(session.state(), SessionState::Initializing);
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_initialize_error_leaves_session_uninitialized() {
    let (session, server) = connected_session().await;
    let params = initialize_params(&SessionConfig::default().client).unwrap();

    let (result, ()) = tokio::join!(session.initialize(params), async {
        let request = server.expect_request("initialize").await;
        server.respond_error(&request["id"], codes::INTERNAL_ERROR, "boom");
    });

    assert_eq!(result.unwrap_err().rpc_error().unwrap().message, "boom");
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert!(session.capabilities().is_none());
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_shutdown_sends_exit_after_error() {
    let (session, server) = connected_session().await;
    handshake(&session, &server, json!({})).await;

    let (result, ()) = tokio::join!(session.shutdown(), async {
        let request = server.expect_request("shutdown").await;
        server.respond_error(&request["id"], codes::INTERNAL_ERROR, "cannot shut down");
    });

    let error = result.unwrap_err();
    assert_eq!(error.rpc_error().unwrap().code, codes::INTERNAL_ERROR);
    assert_eq!(server.expect_notification("exit").await, Value::Null);
    assert_eq!(session.state(), SessionState::Shutdown);
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_shutdown_then_exit() {
    let (session, server) = connected_session().await;
    handshake(&session, &server, json!({})).await;

    let (result, request) = tokio::join!(session.shutdown(), server.answer("shutdown", Value::Null));
    result.unwrap();
    assert!(request.get("params").is_none());
    server.expect_notification("exit").await;
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_full_sync_sends_whole_text() {
    let (session, server) = connected_session().await;
    handshake(&session, &server, json!({"textDocumentSync": 1})).await;
    let uri = open_document(&session, &server).await;

    let edit = TextDocumentContentChangeEvent {
        range: Some(Range::new(Position::new(0, 3), Position::new(0, 7))),
        range_length: None,
        text: "start".to_string(),
    };
    let version = session
        .did_change(&uri, "fn start() {}\n", vec![edit])
        .unwrap();
    assert_eq!(version, Some(2));

    let params = server.expect_notification("textDocument/didChange").await;
    assert_eq!(params["textDocument"]["version"], 2);
    assert_eq!(
        params["contentChanges"],
        json!([{"text": "fn start() {}\n"}])
    );
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_incremental_sync_sends_edits() {
    let (session, server) = connected_session().await;
    handshake(&session, &server, json!({"textDocumentSync": 2})).await;
    let uri = open_document(&session, &server).await;

    let edit = TextDocumentContentChangeEvent {
        range: Some(Range::new(Position::new(0, 3), Position::new(0, 7))),
        range_length: None,
        text: "start".to_string(),
    };
    session
        .did_change(&uri, "fn start() {}\n", vec![edit])
        .unwrap();
    let params = server.expect_notification("textDocument/didChange").await;
    assert_eq!(
        params["contentChanges"],
        json!([{
            "range": {"start": {"line": 0, "character": 3}, "end": {"line": 0, "character": 7}},
            "text": "start"
        }])
    );

    // Without edits the whole text is sent.
    assert_eq!(session.did_change(&uri, "", Vec::new()).unwrap(), Some(3));
    let params = server.expect_notification("textDocument/didChange").await;
    assert_eq!(params["textDocument"]["version"], 3);
    assert_eq!(params["contentChanges"], json!([{"text": ""}]));
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_no_sync_sends_nothing() {
    let (session, server) = connected_session().await;
    handshake(&session, &server, json!({"textDocumentSync": 0})).await;
    let uri = open_document(&session, &server).await;

    assert_eq!(session.did_change(&uri, "changed", Vec::new()).unwrap(), None);
    assert_eq!(session.document(&uri).unwrap().version, 1);

    session.did_close(&uri).unwrap();
    server.expect_notification("textDocument/didClose").await;
    assert!(session.document(&uri).is_none());
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_failed_send_keeps_document_state() {
    let (session, server) = connected_session().await;
    handshake(&session, &server, json!({"textDocumentSync": 1})).await;
    let uri = open_document(&session, &server).await;

    session.disconnect().await;

    assert!(session.did_change(&uri, "fn lost() {}\n", Vec::new()).is_err());
    assert_eq!(session.document(&uri).unwrap().version, 1);

    assert!(session.did_close(&uri).is_err());
    assert!(session.document(&uri).is_some());
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_change_for_unopened_document_starts_at_one() {
    let (session, server) = connected_session().await;
    handshake(&session, &server, json!({"textDocumentSync": 1})).await;
    let uri = test_uri();

    assert_eq!(session.did_change(&uri, "fn a() {}\n", Vec::new()).unwrap(), Some(1));
    let params = server.expect_notification("textDocument/didChange").await;
    assert_eq!(params["textDocument"]["version"], 1);
    assert_eq!(session.document(&uri).unwrap().language_id, "rust");

    assert_eq!(session.did_change(&uri, "fn b() {}\n", Vec::new()).unwrap(), Some(2));
    server.expect_notification("textDocument/didChange").await;
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_did_save_includes_text_only_when_asked() {
    let (session, server) = connected_session().await;
    handshake(
        &session,
        &server,
        json!({"textDocumentSync": {"change": 1, "save": {"includeText": true}}}),
    )
    .await;
    let uri = open_document(&session, &server).await;

    session.did_save(&uri, Some("saved text")).unwrap();
    let params = server.expect_notification("textDocument/didSave").await;
    assert_eq!(params["text"], "saved text");

    let (plain, plain_server) = connected_session().await;
    handshake(&plain, &plain_server, json!({"textDocumentSync": 1})).await;
    plain.did_save(&uri, Some("saved text")).unwrap();
    let params = plain_server
        .expect_notification("textDocument/didSave")
        .await;
    assert!(params.get("text").is_none());
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_typed_feature_request() {
    let (session, server) = connected_session().await;
    handshake(&session, &server, json!({"documentSymbolProvider": true})).await;
    let uri = open_document(&session, &server).await;

    let call = session.document_symbol(
        DocumentSymbolParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        },
        None,
    );
    let request = server.expect_request("textDocument/documentSymbol").await;
    assert_eq!(request["params"]["textDocument"]["uri"], uri.as_str());
    server.respond(
        &request["id"],
        json!([{
            "name": "main",
            "kind": 12,
            "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 12}},
            "selectionRange": {"start": {"line": 0, "character": 3}, "end": {"line": 0, "character": 7}}
        }]),
    );

    match call.await.unwrap() {
        Some(DocumentSymbolResponse::Nested(symbols)) => assert_eq!(symbols[0].name, "main"),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_feature_request_cancellation() {
    let (session, server) = connected_session().await;
    handshake(&session, &server, json!({"hoverProvider": true})).await;

    let token = CancellationToken::new();
    let call = session.hover(
        HoverParams {
            text_document_position_params: TextDocumentPositionParams {
                text_document: TextDocumentIdentifier { uri: test_uri() },
                position: Position::new(0, 4),
            },
            work_done_progress_params: Default::default(),
        },
        Some(token.clone()),
    );
    let id = call.id();
    server.expect_request("textDocument/hover").await;

    token.cancel();
    assert!(call.await.unwrap_err().is_cancelled());
    assert_eq!(
        server.expect_notification("$/cancelRequest").await,
        json!({"id": id})
    );
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_request_before_initialized_is_still_sent() {
    let (session, server) = connected_session().await;

    let call = session.hover(
        HoverParams {
            text_document_position_params: TextDocumentPositionParams {
                text_document: TextDocumentIdentifier { uri: test_uri() },
                position: Position::new(0, 0),
            },
            work_done_progress_params: Default::default(),
        },
        None,
    );
    server.answer("textDocument/hover", Value::Null).await;
    assert_eq!(call.await.unwrap(), None);
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_publish_diagnostics_subscription() {
    let (session, server) = connected_session().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = session.on_publish_diagnostics(move |params| {
        let _ = tx.send(params);
    });

    server.notify(
        "textDocument/publishDiagnostics",
        json!({"uri": "file:///workspace/src/main.rs", "diagnostics": "not a list"}),
    );
    server.notify(
        "textDocument/publishDiagnostics",
        json!({
            "uri": "file:///workspace/src/main.rs",
            "version": 4,
            "diagnostics": [{
                "range": {"start": {"line": 1, "character": 0}, "end": {"line": 1, "character": 5}},
                "severity": 1,
                "message": "unresolved import"
            }]
        }),
    );

    let params = rx.recv().await.unwrap();
    assert_eq!(params.uri, test_uri());
    assert_eq!(params.version, Some(4));
    assert_eq!(params.diagnostics[0].message, "unresolved import");

    subscription.unsubscribe();
    server.notify(
        "window/logMessage",
        json!({"type": 3, "message": "indexing finished"}),
    );
}
