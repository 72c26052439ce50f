//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::EngineHandle;
use crate::util::rate_limit::PlayerRateLimiter;
use crate::ws::connection::{self, Connection, Outbound};
use crate::ws::protocol::{self, ClientMsg, Envelope};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let socket_id = Uuid::new_v4();
    info!(socket_id = %socket_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let (out_tx, out_rx) = connection::channel(state.config.game.outbound_buffer);

    // Writer task: engine snapshots -> WebSocket
    let writer_handle = tokio::spawn(run_writer(socket_id, ws_sink, out_rx));

    let bound = run_reader(socket_id, ws_stream, &out_tx, &state.engine).await;
    notify_closed(socket_id, bound, &state.engine).await;

    // Writer ends once every sender is gone
    drop(out_tx);
    let _ = writer_handle.await;

    info!(socket_id = %socket_id, "WebSocket connection closed");
}

/// Reader loop: WebSocket -> engine. Returns the client ID bound to this socket.
async fn run_reader(
    socket_id: Uuid,
    mut ws_stream: SplitStream<WebSocket>,
    out_tx: &mpsc::Sender<Outbound>,
    engine: &EngineHandle,
) -> Option<Uuid> {
    let mut rate_limiter = PlayerRateLimiter::new();
    let mut bound: Option<Uuid> = None;

    while let Some(result) = ws_stream.next().await {
        let raw = match result {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                info!(socket_id = %socket_id, "Client initiated close");
                break;
            }
            Err(e) => {
                warn!(socket_id = %socket_id, error = %e, "WebSocket error");
                break;
            }
        };

        let envelope = match protocol::decode(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(socket_id = %socket_id, error = %e, "Discarding inbound message");
                continue;
            }
        };

        if !rate_limiter.check_message(&envelope.msg) {
            debug!(socket_id = %socket_id, msg = ?envelope.msg, "Inbound message filtered");
            continue;
        }

        if dispatch(socket_id, envelope, &mut bound, out_tx, engine)
            .await
            .is_err()
        {
            error!(socket_id = %socket_id, "Game engine unavailable");
            break;
        }
    }

    bound
}

/// Forward one decoded message to the engine
async fn dispatch(
    socket_id: Uuid,
    envelope: Envelope,
    bound: &mut Option<Uuid>,
    out_tx: &mpsc::Sender<Outbound>,
    engine: &EngineHandle,
) -> Result<(), crate::game::engine::EngineError> {
    match envelope.msg {
        ClientMsg::Connect => {
            // A socket speaks for one client at a time
            if let Some(previous) = bound.filter(|id| *id != envelope.client) {
                engine.disconnect(previous, socket_id).await?;
            }

            let conn = Connection::new(envelope.client, socket_id, out_tx.clone());
            engine.connect(conn).await?;
            *bound = Some(envelope.client);
        }
        ClientMsg::Input { key, pressed } => {
            engine.input(envelope.client, key, pressed).await?;
        }
    }

    Ok(())
}

/// Close notification: the engine removes the session and drops its sender
async fn notify_closed(socket_id: Uuid, bound: Option<Uuid>, engine: &EngineHandle) {
    let Some(client_id) = bound else {
        return;
    };
    if engine.disconnect(client_id, socket_id).await.is_err() {
        debug!(socket_id = %socket_id, "Engine stopped before disconnect");
    }
}

/// Writer loop: outbound channel -> WebSocket
async fn run_writer(
    socket_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Outbound>,
) {
    while let Some(frame) = out_rx.recv().await {
        match frame {
            Outbound::Snapshot(json) => {
                if let Err(e) = ws_sink.send(Message::Text(json.to_string())).await {
                    debug!(socket_id = %socket_id, error = %e, "WebSocket send failed");
                    break;
                }
            }
            Outbound::Close(ack) => {
                let _ = ws_sink.send(Message::Close(None)).await;
                let _ = ack.send(());
                break;
            }
        }
    }

    let _ = ws_sink.close().await;
}
