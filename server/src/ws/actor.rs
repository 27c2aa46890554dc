use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::chat::dispatcher::DispatcherHandle;
use crate::chat::session::{ConnectionId, Frame, Session};
use crate::chat::{RoomId, UserId};
use crate::error::ChatError;
use crate::state::AppState;
use crate::ws::protocol;

/// Ping interval: server sends WebSocket ping every 30 seconds.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the write pump gets to flush its close frame after the read side ends.
const WRITER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Unregisters the session when the read pump returns, however it returns.
struct UnregisterGuard {
    dispatcher: DispatcherHandle,
    user_id: UserId,
    connection_id: ConnectionId,
}

impl Drop for UnregisterGuard {
    fn drop(&mut self) {
        self.dispatcher.unregister(self.user_id, self.connection_id);
    }
}

/// Run one admitted WebSocket connection.
///
/// Splits the socket into:
/// - Write pump: owns the sink, drains the session's outbound queue and a
///   control channel for pings, pongs and close frames
/// - Read pump (this task): decodes client frames and routes them through
///   the dispatcher
/// - Keepalive task: pings on an interval and closes on a missed pong
///
/// The dispatcher holds the only sender of the outbound queue. Unregistering
/// drops it, which makes the write pump send a close frame and exit.
pub async fn run_connection(
    socket: WebSocket,
    state: AppState,
    user_id: UserId,
    room_id: Option<RoomId>,
) {
    let (mut ws_sender, ws_receiver) = socket.split();
    let (session, outbound) =
        Session::new(user_id, room_id.clone(), state.chat.send_queue_capacity);
    let connection_id = session.connection_id;

    if let Err(e) = state.dispatcher.register(session).await {
        tracing::warn!(user_id, error = %e, "Session registration failed");
        let _ = ws_sender
            .send(protocol::close_message(
                protocol::CLOSE_ROOM_UNAVAILABLE,
                &e.to_string(),
            ))
            .await;
        return;
    }
    let guard = UnregisterGuard {
        dispatcher: state.dispatcher.clone(),
        user_id,
        connection_id,
    };

    tracing::info!(user_id, connection_id, "WebSocket actor started");

    let (control_tx, control_rx) = mpsc::unbounded_channel::<Message>();
    let mut writer = tokio::spawn(write_pump(ws_sender, outbound, control_rx));

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let keepalive_handle = tokio::spawn(keepalive(control_tx.clone(), pong_rx));

    let writer_finished = read_pump(
        ws_receiver,
        &mut writer,
        &state,
        user_id,
        connection_id,
        room_id.as_ref(),
        &control_tx,
        &pong_tx,
    )
    .await;

    keepalive_handle.abort();
    drop(guard);
    drop(control_tx);

    if !writer_finished && timeout(WRITER_SHUTDOWN_GRACE, &mut writer).await.is_err() {
        tracing::debug!(user_id, connection_id, "Write pump did not finish, aborting");
        writer.abort();
    }

    tracing::info!(user_id, connection_id, "WebSocket actor stopped");
}

/// Process client frames until the client goes away or the write pump exits.
/// Returns true when it stopped because the write pump had already finished.
async fn read_pump(
    mut ws_receiver: SplitStream<WebSocket>,
    writer: &mut tokio::task::JoinHandle<()>,
    state: &AppState,
    user_id: UserId,
    connection_id: ConnectionId,
    room_id: Option<&RoomId>,
    control_tx: &mpsc::UnboundedSender<Message>,
    pong_tx: &mpsc::UnboundedSender<()>,
) -> bool {
    loop {
        tokio::select! {
            _ = &mut *writer => {
                tracing::debug!(user_id, "Write pump exited, stopping reader");
                return true;
            }
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_text(state, user_id, connection_id, room_id, text.as_str()).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(user_id, len = data.len(), "Ignoring binary frame");
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = control_tx.send(Message::Pong(data));
                }
                Some(Ok(Message::Pong(_))) => {
                    let _ = pong_tx.send(());
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(user_id, reason = ?frame, "Client initiated close");
                    return false;
                }
                Some(Err(e)) => {
                    let err = ChatError::Transport(e.to_string());
                    tracing::warn!(user_id, error = %err, "WebSocket receive error");
                    return false;
                }
                None => {
                    tracing::info!(user_id, "WebSocket stream ended");
                    return false;
                }
            }
        }
    }
}

async fn handle_text(
    state: &AppState,
    user_id: UserId,
    connection_id: ConnectionId,
    room_id: Option<&RoomId>,
    text: &str,
) {
    let frame = match protocol::decode_inbound(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(
                user_id,
                error = %e,
                "Failed to decode chat frame: {}",
                text.chars().take(100).collect::<String>()
            );
            return;
        }
    };

    let message = protocol::stamp(frame, user_id, room_id, &state.profiles, Utc::now());
    state.dispatcher.route(message, connection_id).await;
}

/// Write pump: forwards queued frames and control messages to the WebSocket sink.
/// Exits on the first write error, after sending a close frame, or when the
/// outbound queue is closed.
async fn write_pump(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Frame>,
    mut control: mpsc::UnboundedReceiver<Message>,
) {
    loop {
        let msg = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => Message::Text(frame),
                None => protocol::close_message(protocol::CLOSE_NORMAL, "session closed"),
            },
            Some(msg) = control.recv() => msg,
        };

        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = ws_sender.send(msg).await {
            let err = ChatError::Transport(e.to_string());
            tracing::debug!(error = %err, "WebSocket write failed, stopping writer");
            break;
        }
        if closing {
            break;
        }
    }
}

/// Ping the client every PING_INTERVAL; ask the write pump to close the
/// connection if no pong arrives within PONG_TIMEOUT.
async fn keepalive(
    control_tx: mpsc::UnboundedSender<Message>,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
) {
    let mut ping_timer = interval(PING_INTERVAL);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // only a pong for this ping counts
        while pong_rx.try_recv().is_ok() {}

        if control_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            break;
        }

        match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!("Pong timeout, closing connection");
                let _ = control_tx.send(protocol::close_message(
                    protocol::CLOSE_GOING_AWAY,
                    "Pong timeout",
                ));
                break;
            }
        }
    }
}
