use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::Response,
    Json,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use utoipa::ToSchema;

use crate::{
    error::AppError,
    middleware::auth::resolve_session,
    realtime::{
        hub::RoomInfo,
        protocol::{dispatch_binary, dispatch_text, Dispatch, ServerFrame, CLOSE_GOING_AWAY},
        ConnectionHub, ConnectionId, ConnectionUser,
    },
    state::AppState,
};

type CloseReason = (u16, &'static str);

/// Upgrades to the realtime protocol. A valid session cookie attaches the
/// user; without one the connection is anonymous.
pub async fn upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let user = resolve_session(&state, &headers)
        .await?
        .map(|context| ConnectionUser::from(&context.user));
    let hub = state.hub.clone();
    let buffer = state.config.ws_outbound_buffer.max(1);
    Ok(ws.on_upgrade(move |socket| run_connection(socket, hub, user, buffer)))
}

async fn run_connection(
    socket: WebSocket,
    hub: Arc<ConnectionHub>,
    user: Option<ConnectionUser>,
    buffer: usize,
) {
    let (sink, mut stream) = socket.split();
    let (outbound, frames) = mpsc::channel(buffer);
    let role = user.as_ref().map(|user| user.role);
    let authenticated = user.is_some();
    let id = hub.connect(outbound, user);
    let (close_tx, close_rx) = oneshot::channel();
    let mut writer = tokio::spawn(write_frames(sink, frames, close_rx));

    hub.send_to(
        id,
        ServerFrame::welcome(id, authenticated, &hub.joinable_rooms(role)),
    );
    tracing::info!(connection_id = %id, authenticated, "Realtime connection opened");

    let mut close: Option<CloseReason> = None;
    let mut writer_done = false;
    loop {
        tokio::select! {
            incoming = stream.next() => {
                let Some(Ok(message)) = incoming else { break };
                match handle_message(&hub, id, message) {
                    Some(Dispatch::Reply(frame)) => {
                        hub.send_to(id, frame);
                    }
                    Some(Dispatch::Silent) | None => {}
                    Some(Dispatch::Close { code, reason }) => {
                        close = Some((code, reason));
                        break;
                    }
                }
            }
            _ = &mut writer => {
                writer_done = true;
                break;
            }
        }
    }

    if let Some(reason) = close {
        let _ = close_tx.send(reason);
    }
    // Dropping the hub's sender lets the writer drain and close.
    hub.disconnect(id);
    if !writer_done {
        let _ = writer.await;
    }
    tracing::info!(connection_id = %id, "Realtime connection closed");
}

/// `None` for control frames the socket layer answers itself. A client close
/// ends the read loop through the stream.
fn handle_message(hub: &ConnectionHub, id: ConnectionId, message: Message) -> Option<Dispatch> {
    match message {
        Message::Text(text) => Some(dispatch_text(hub, id, text.as_str())),
        Message::Binary(_) => Some(dispatch_binary()),
        Message::Close(_) | Message::Ping(_) | Message::Pong(_) => None,
    }
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<ServerFrame>,
    mut close_rx: oneshot::Receiver<CloseReason>,
) {
    while let Some(frame) = frames.recv().await {
        if sink.send(Message::Text(frame.to_text().into())).await.is_err() {
            return;
        }
    }
    let (code, reason) = close_rx
        .try_recv()
        .unwrap_or((CLOSE_GOING_AWAY, "server closing connection"));
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
    #[schema(value_type = Vec<Object>)]
    pub rooms: Vec<RoomInfo>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.hub.connection_count(),
        rooms: state.hub.rooms(),
    })
}
