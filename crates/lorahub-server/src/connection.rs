//! Per-connection WebSocket transport: handshake, reader/writer split and
//! teardown.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use lorahub_core::{ConnectionId, OutboundMessage, Role};

use crate::registry::{ConnectionRegistry, Payload};
use crate::router::Router;

/// Drive one accepted WebSocket until either side goes away, then remove it
/// from the registry.
pub async fn handle_ws_connection(
    socket: WebSocket,
    remote_addr: Option<String>,
    as_observer: bool,
    registry: Arc<ConnectionRegistry>,
    router: Arc<Router>,
    ping_interval: Duration,
) {
    let (connection_id, rx) = registry.register(remote_addr.clone());
    tracing::info!(
        connection_id = %connection_id,
        remote_addr = remote_addr.as_deref().unwrap_or("unknown"),
        total = registry.len(),
        "websocket connection opened"
    );

    // The handshake is queued before the role is set, so it is always the
    // first frame this peer sees.
    match serde_json::to_string(&OutboundMessage::connection_established(connection_id.clone())) {
        Ok(json) => {
            if let Err(e) = registry.send_to(&connection_id, Arc::new(json)) {
                tracing::warn!(connection_id = %connection_id, error = %e, "failed to queue handshake");
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to serialize handshake"),
    }
    if as_observer {
        registry.update_role(&connection_id, Role::Observer, None);
    }

    let (ws_tx, ws_rx) = socket.split();

    let writer = tokio::spawn(write_loop(ws_tx, rx, connection_id.clone(), ping_interval));
    let reader = tokio::spawn(read_loop(
        ws_rx,
        connection_id.clone(),
        Arc::clone(&registry),
        router,
    ));

    let writer_abort = writer.abort_handle();
    let reader_abort = reader.abort_handle();
    tokio::select! {
        _ = writer => reader_abort.abort(),
        _ = reader => writer_abort.abort(),
    }

    let role = registry.get(&connection_id).map(|r| r.role).unwrap_or_default();
    registry.remove(&connection_id);
    tracing::info!(
        connection_id = %connection_id,
        role = %role,
        remaining = registry.len(),
        "websocket connection closed"
    );
}

/// Forward queued payloads to the socket and ping on a fixed interval.
async fn write_loop(
    mut ws_tx: futures::stream::SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<Payload>,
    connection_id: ConnectionId,
    ping_interval: Duration,
) {
    let mut ping = tokio::time::interval(ping_interval);
    ping.tick().await; // consume first immediate tick

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(payload) = msg else { break };
                if ws_tx.send(WsMessage::Text(payload.as_str().into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                tracing::trace!(connection_id = %connection_id, "sent ping");
            }
        }
    }
    let _ = ws_tx.close().await;
}

/// Route inbound text frames in receipt order; pongs count as liveness.
async fn read_loop(
    mut ws_rx: futures::stream::SplitStream<WebSocket>,
    connection_id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    router: Arc<Router>,
) {
    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                router.handle(&connection_id, text.as_str());
            }
            Ok(WsMessage::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    router.handle(&connection_id, text);
                }
                Err(_) => {
                    tracing::debug!(connection_id = %connection_id, len = bytes.len(), "ignoring non-utf8 binary frame");
                }
            },
            Ok(WsMessage::Pong(_)) => {
                registry.touch_heartbeat(&connection_id);
            }
            Ok(WsMessage::Ping(_)) => {} // axum answers pings itself
            Ok(WsMessage::Close(_)) => break,
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "websocket read error");
                break;
            }
        }
    }
}
