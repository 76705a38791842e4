use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mathnote_common::change::{ChangeRequest, NotebookChange};
use mathnote_common::model::{Style, StyleData, StyleProps, StyleRole, StyleSource, ToolInfo};
use mathnote_common::protocol::ws::{
    decode_server_message, encode_message, ChangeOptions, ClientMessage, ServerMessage,
};
use mathnote_server::config::ServerConfig;
use mathnote_server::runtime::{start, start_with_state, ServerHandle};
use mathnote_server::sync::ServerState;
use mathnote_server::tools::{ToolContext, ToolError, ToolHandler, ToolRegistry};
use serde_json::json;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

type ClientSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_server(max_changes_per_message: usize) -> ServerHandle {
    let config = ServerConfig {
        listen_addr: "127.0.0.1:0".into(),
        max_changes_per_message,
        ..Default::default()
    };
    start(config).await.expect("server should start")
}

async fn connect(server: &ServerHandle) -> ClientSocket {
    let (socket, _) = connect_async(server.notebook_url()).await.expect("client should connect");
    socket
}

async fn send(socket: &mut ClientSocket, message: &ClientMessage) {
    let text = encode_message(message).expect("client message should encode");
    socket.send(WsMessage::Text(text.into())).await.expect("client should send message");
}

async fn recv(socket: &mut ClientSocket) -> ServerMessage {
    loop {
        let frame = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("server message should arrive before timeout")
            .expect("socket should stay open")
            .expect("frame should be readable");
        match frame {
            WsMessage::Text(text) => {
                return decode_server_message(text.as_str().as_bytes()).expect("server message should decode");
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn open(socket: &mut ClientSocket, path: &str) {
    send(socket, &ClientMessage::OpenNotebook { notebook_path: path.into() }).await;
    assert!(matches!(recv(socket).await, ServerMessage::NotebookOpened { .. }));
}

fn formula(parent: u64, latex: &str) -> ChangeRequest {
    ChangeRequest::insert_style(StyleProps::new(
        parent,
        StyleRole::Formula,
        StyleSource::User,
        StyleData::Latex(latex.into()),
    ))
}

#[tokio::test]
async fn split_tracked_batch_reaches_originator_with_tracker_and_others_without() {
    let server = start_server(1).await;
    let mut alice = connect(&server).await;
    let mut bob = connect(&server).await;
    open(&mut alice, "/calculus").await;
    open(&mut bob, "/calculus").await;

    send(
        &mut alice,
        &ClientMessage::ChangeNotebook {
            notebook_path: "/calculus".into(),
            change_requests: vec![ChangeRequest::InsertThought { position: None }, formula(1, "\\int x\\,dx")],
            options: ChangeOptions { tracker: Some(11), want_undo: true },
        },
    )
    .await;

    let first = recv(&mut alice).await;
    let second = recv(&mut alice).await;
    let ServerMessage::NotebookChanged { changes, tracker, complete, undo_change_requests, .. } = first else {
        panic!("expected notebookChanged");
    };
    assert_eq!(tracker, Some(11));
    assert!(!complete);
    assert!(undo_change_requests.is_empty());
    assert!(matches!(changes.as_slice(), [NotebookChange::ThoughtInserted { .. }]));

    let ServerMessage::NotebookChanged { changes, tracker, complete, undo_change_requests, .. } = second else {
        panic!("expected notebookChanged");
    };
    assert_eq!(tracker, Some(11));
    assert!(complete);
    assert!(matches!(changes.as_slice(), [NotebookChange::StyleInserted { .. }]));
    assert_eq!(undo_change_requests, vec![ChangeRequest::DeleteThought { thought_id: 1 }]);

    for _ in 0..2 {
        let ServerMessage::NotebookChanged { tracker, undo_change_requests, .. } = recv(&mut bob).await else {
            panic!("expected notebookChanged");
        };
        assert_eq!(tracker, None);
        assert!(undo_change_requests.is_empty());
    }

    server.shutdown();
}

#[tokio::test]
async fn late_subscriber_gets_snapshot_of_earlier_changes() {
    let server = start_server(64).await;
    let mut writer = connect(&server).await;
    open(&mut writer, "/geometry").await;

    send(
        &mut writer,
        &ClientMessage::ChangeNotebook {
            notebook_path: "/geometry".into(),
            change_requests: vec![ChangeRequest::InsertThought { position: None }, formula(1, "a^2+b^2=c^2")],
            options: ChangeOptions::default(),
        },
    )
    .await;
    assert!(matches!(recv(&mut writer).await, ServerMessage::NotebookChanged { complete: true, .. }));

    let mut reader = connect(&server).await;
    send(&mut reader, &ClientMessage::OpenNotebook { notebook_path: "/geometry".into() }).await;
    let ServerMessage::NotebookOpened { snapshot, .. } = recv(&mut reader).await else {
        panic!("expected notebookOpened");
    };
    assert_eq!(snapshot.thoughts.len(), 1);
    assert_eq!(snapshot.styles.len(), 1);
    assert_eq!(snapshot.styles[0].data, StyleData::Latex("a^2+b^2=c^2".into()));

    server.shutdown();
}

#[tokio::test]
async fn rejected_batch_reports_to_caller_and_connection_survives_garbage() {
    let server = start_server(64).await;
    let mut socket = connect(&server).await;
    open(&mut socket, "/n").await;

    socket.send(WsMessage::Text("{not json".into())).await.expect("send garbage");
    let ServerMessage::Error { code, .. } = recv(&mut socket).await else {
        panic!("expected error");
    };
    assert_eq!(code, "MALFORMED_MESSAGE");

    send(
        &mut socket,
        &ClientMessage::ChangeNotebook {
            notebook_path: "/n".into(),
            change_requests: vec![formula(77, "x")],
            options: ChangeOptions { tracker: Some(4), want_undo: false },
        },
    )
    .await;
    let ServerMessage::ChangeFailed { tracker, code, .. } = recv(&mut socket).await else {
        panic!("expected changeFailed");
    };
    assert_eq!(tracker, Some(4));
    assert_eq!(code, "UNKNOWN_STYLABLE");

    server.shutdown();
}

#[tokio::test]
async fn use_tool_envelope_runs_builtin_tool() {
    let server = start_server(64).await;
    let mut socket = connect(&server).await;
    open(&mut socket, "/tools").await;

    send(
        &mut socket,
        &ClientMessage::ChangeNotebook {
            notebook_path: "/tools".into(),
            change_requests: vec![
                ChangeRequest::InsertThought { position: None },
                ChangeRequest::insert_style(StyleProps::new(
                    1,
                    StyleRole::Tool,
                    StyleSource::Mathematica,
                    StyleData::ToolInfo(ToolInfo {
                        name: "insert-formula".into(),
                        html: Some("<button>Expand</button>".into()),
                        payload: json!("x^2+2x+1"),
                    }),
                )),
            ],
            options: ChangeOptions::default(),
        },
    )
    .await;
    recv(&mut socket).await;

    send(&mut socket, &ClientMessage::UseTool { notebook_path: "/tools".into(), style_id: 2, tracker: Some(21) })
        .await;
    let ServerMessage::NotebookChanged { changes, tracker, complete, .. } = recv(&mut socket).await else {
        panic!("expected notebookChanged");
    };
    assert_eq!(tracker, Some(21));
    assert!(complete);
    let kinds: Vec<&str> = changes.iter().map(NotebookChange::kind).collect();
    assert_eq!(kinds, vec!["thoughtInserted", "styleInserted", "relationshipInserted"]);

    server.shutdown();
}

/// Attaches a HINT style with the tool's payload text to the tool's own stylable.
struct HintTool;

impl ToolHandler for HintTool {
    fn run(&self, tool: &Style, info: &ToolInfo, cx: &mut ToolContext<'_>) -> Result<(), ToolError> {
        let text = info.payload.as_str().unwrap_or("try factoring").to_owned();
        cx.insert_style(StyleProps::new(tool.stylable_id, StyleRole::Hint, StyleSource::System, StyleData::Text(text)))?;
        Ok(())
    }
}

#[tokio::test]
async fn registered_tools_run_over_the_wire() {
    let mut tools = ToolRegistry::with_builtin_tools();
    tools.register("hint", HintTool);
    let state = ServerState::default().with_tools(tools);
    let server = start_with_state("127.0.0.1:0", state).await.expect("server should start");
    let mut socket = connect(&server).await;
    open(&mut socket, "/hints").await;

    send(
        &mut socket,
        &ClientMessage::ChangeNotebook {
            notebook_path: "/hints".into(),
            change_requests: vec![
                ChangeRequest::InsertThought { position: None },
                ChangeRequest::insert_style(StyleProps::new(
                    1,
                    StyleRole::Tool,
                    StyleSource::System,
                    StyleData::ToolInfo(ToolInfo { name: "hint".into(), html: None, payload: json!("complete the square") }),
                )),
                ChangeRequest::UseTool { style_id: 2 },
            ],
            options: ChangeOptions { tracker: Some(4), want_undo: true },
        },
    )
    .await;

    let ServerMessage::NotebookChanged { changes, undo_change_requests, .. } = recv(&mut socket).await else {
        panic!("expected notebookChanged");
    };
    let Some(NotebookChange::StyleInserted { style }) = changes.last() else {
        panic!("expected the hint style last, got {changes:?}");
    };
    assert_eq!((style.stylable_id, style.role), (1, StyleRole::Hint));
    assert_eq!(style.data, StyleData::Text("complete the square".into()));
    assert_eq!(undo_change_requests, vec![ChangeRequest::DeleteThought { thought_id: 1 }]);

    server.shutdown();
}
