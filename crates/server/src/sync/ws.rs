use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use mathnote_common::protocol::ws::{encode_message, SUPPORTED_PROTOCOL_VERSIONS};
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc},
};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::sync::connection::Connection;
use crate::sync::state::ServerState;
use crate::sync::trace::trace_id_from_headers;

pub const NOTEBOOK_WS_PATH: &str = "/notebooks";

pub fn router(state: ServerState) -> Router {
    Router::new().route(NOTEBOOK_WS_PATH, get(notebook_ws_route)).with_state(state)
}

pub async fn serve_until_shutdown(
    listener: TcpListener,
    state: ServerState,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .context("notebook websocket server failed")
}

async fn notebook_ws_route(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    let trace_id = trace_id_from_headers(&headers);
    ws.protocols(SUPPORTED_PROTOCOL_VERSIONS.iter().copied())
        .on_upgrade(move |socket| handle_socket(socket, state, trace_id))
}

async fn handle_socket(mut socket: WebSocket, state: ServerState, trace_id: String) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let mut connection = Connection::new(state, outbound_tx);
    let span = info_span!("notebook_connection", connection_id = %connection.id(), %trace_id);

    async move {
        info!("connection accepted");
        loop {
            tokio::select! {
                incoming = socket.recv() => {
                    let Some(Ok(message)) = incoming else {
                        break;
                    };

                    match message {
                        WsMessage::Text(payload) => connection.handle_raw(payload.as_str().as_bytes()).await,
                        WsMessage::Binary(payload) => connection.handle_raw(payload.as_ref()).await,
                        WsMessage::Close(_) => break,
                        WsMessage::Ping(payload) => {
                            if socket.send(WsMessage::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        WsMessage::Pong(_) => {}
                    }
                }
                Some(outbound) = outbound_rx.recv() => {
                    let text = match encode_message(&outbound) {
                        Ok(text) => text,
                        Err(error) => {
                            warn!(%error, "failed to encode outbound message");
                            continue;
                        }
                    };
                    if socket.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
            }
        }

        debug!(open_notebooks = connection.open_paths().len(), "releasing subscriptions");
        connection.shutdown().await;
        info!("connection closed");
    }
    .instrument(span)
    .await
}
