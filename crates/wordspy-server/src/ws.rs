use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use wordspy_core::net::messages::{ClientMessage, ServerMessage, SpyGameErrorMsg};
use wordspy_core::net::protocol::{
    MAX_MESSAGE_SIZE, PROTOCOL_VERSION, decode_client_message, decode_message_type,
    encode_server_message,
};

use crate::directory::{SessionHandle, create_session};
use crate::error::GameError;
use crate::game_loop::GameCommand;
use crate::state::{AppState, ConnectionGuard};

pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<axum::response::Response, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state))
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // First message must be CreateSpyGame or JoinSpyGame.
    let first_msg = match ws_receiver.next().await {
        Some(Ok(Message::Binary(data))) => data,
        _ => return,
    };
    let Ok(client_msg) = decode_client_message(&first_msg) else {
        return;
    };

    let (user_id, display_name, protocol_version, target) = match client_msg {
        ClientMessage::CreateSpyGame(c) => (
            c.user_id,
            c.display_name,
            c.protocol_version,
            Target::Create {
                max_players: c.max_players,
            },
        ),
        ClientMessage::JoinSpyGame(j) => (
            j.user_id,
            j.display_name,
            j.protocol_version,
            Target::Join {
                room_code: j.room_code,
            },
        ),
        _ => return,
    };

    if protocol_version != 0 && protocol_version != PROTOCOL_VERSION {
        send_join_error(
            &mut ws_sender,
            "protocol_mismatch",
            &format!(
                "Protocol version mismatch: client={protocol_version}, server={PROTOCOL_VERSION}"
            ),
        )
        .await;
        return;
    }

    let display_name = display_name.trim().to_string();
    if user_id.is_empty()
        || user_id.len() > 64
        || display_name.is_empty()
        || display_name.len() > 32
        || display_name.chars().any(|c| c.is_control())
    {
        send_join_error(&mut ws_sender, "invalid_name", "Invalid user id or name").await;
        return;
    }

    let handle = match resolve_target(&state, target).await {
        Ok(h) => h,
        Err(e) => {
            send_join_error(&mut ws_sender, e.code(), &e.to_string()).await;
            return;
        },
    };

    let connection_id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel::<Bytes>(state.config.limits.player_message_buffer);

    // Subscribe before Join so nothing the session emits during the
    // join is lost; on failure the subscription is torn down again
    // before any game event could leak to a non-member.
    handle.relay.subscribe(&user_id, &connection_id, tx);

    let (reply_tx, reply_rx) = oneshot::channel();
    let joined = handle
        .cmd_tx
        .send(GameCommand::Join {
            user_id: user_id.clone(),
            display_name,
            connection_id: connection_id.clone(),
            reply: reply_tx,
        })
        .is_ok();
    let result = if joined {
        reply_rx.await.unwrap_or(Err(GameError::RoomNotFound))
    } else {
        // Session task already gone; treat like an unknown room.
        Err(GameError::RoomNotFound)
    };
    if let Err(e) = result {
        handle.relay.unsubscribe(&user_id, &connection_id);
        send_join_error(&mut ws_sender, e.code(), &e.to_string()).await;
        return;
    }

    spawn_writer(ws_sender, rx);

    read_loop(&mut ws_receiver, &state, &handle, &user_id).await;

    // Socket closed: mark the player disconnected and drop the relay
    // entry for this connection (a newer connection's entry survives).
    let _ = handle.cmd_tx.send(GameCommand::Disconnected {
        user_id: user_id.clone(),
        connection_id: connection_id.clone(),
    });
    handle.relay.unsubscribe(&user_id, &connection_id);
    tracing::info!(user_id, room = %handle.room_code, "WS connection closed");
}

enum Target {
    Create { max_players: u8 },
    Join { room_code: String },
}

async fn resolve_target(state: &AppState, target: Target) -> Result<Arc<SessionHandle>, GameError> {
    match target {
        Target::Create { max_players } => {
            create_session(&state.sessions, state.config.game.clone(), max_players, None).await
        },
        Target::Join { room_code } => {
            let dir = state.sessions.read().await;
            dir.resolve(&room_code).ok_or(GameError::RoomNotFound)
        },
    }
}

async fn send_join_error(
    ws_sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    code: &str,
    message: &str,
) {
    let msg = ServerMessage::SpyGameJoinError(SpyGameErrorMsg {
        code: code.to_string(),
        message: message.to_string(),
    });
    if let Ok(encoded) = encode_server_message(&msg)
        && let Err(e) = ws_sender.send(Message::Binary(encoded.into())).await
    {
        tracing::warn!(error = %e, "Failed to send join error response");
    }
}

fn spawn_writer(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Bytes>,
) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if ws_sender
                .send(Message::Binary(data.to_vec().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });
}

/// Per-connection rate limiter (token bucket).
struct RateLimiter {
    tokens: f64,
    last_refill: tokio::time::Instant,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
}

impl RateLimiter {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: tokio::time::Instant::now(),
            max_tokens,
            refill_rate,
        }
    }

    /// Returns true if the message is allowed; false if rate-limited.
    fn allow(&mut self) -> bool {
        let now = tokio::time::Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

async fn read_loop(
    ws_receiver: &mut futures::stream::SplitStream<WebSocket>,
    state: &AppState,
    handle: &SessionHandle,
    user_id: &str,
) {
    let rate = state.config.limits.ws_rate_limit_per_sec;
    let mut rate_limiter = RateLimiter::new(rate, rate);
    let max_chat_len = state.config.limits.max_chat_len;
    let room_code = handle.room_code.as_str();

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let data = match msg {
            Message::Binary(d) => d.to_vec(),
            Message::Close(_) => break,
            _ => continue,
        };

        if !rate_limiter.allow() {
            tracing::warn!(user_id, room_code, "Rate limited");
            continue;
        }

        if data.is_empty() || data.len() > MAX_MESSAGE_SIZE {
            continue;
        }

        // Reject server-range type bytes before attempting a decode.
        let Ok(msg_type) = decode_message_type(&data) else {
            continue;
        };
        if msg_type as u8 >= 0x10 {
            tracing::warn!(
                user_id,
                room_code,
                ?msg_type,
                "Rejected server-only message from client"
            );
            continue;
        }

        let Ok(client_msg) = decode_client_message(&data) else {
            continue;
        };

        // Identity comes from the connection, never from the payload:
        // every command below carries the joined user_id.
        let cmd = match client_msg {
            // A second create/join on an established connection is a
            // protocol violation; ignore it.
            ClientMessage::CreateSpyGame(_) | ClientMessage::JoinSpyGame(_) => continue,
            ClientMessage::StartSpyGame => GameCommand::Start {
                user_id: user_id.to_string(),
            },
            ClientMessage::SubmitCategoryVote(v) => GameCommand::SubmitCategoryVote {
                user_id: user_id.to_string(),
                category_id: v.category_id,
            },
            ClientMessage::SubmitDescription(d) => {
                if d.description.len() > max_chat_len
                    || d.description.chars().any(|c| c.is_control() && c != '\n')
                {
                    continue;
                }
                GameCommand::SubmitDescription {
                    user_id: user_id.to_string(),
                    description: d.description,
                }
            },
            ClientMessage::SubmitVote(v) => GameCommand::SubmitVote {
                user_id: user_id.to_string(),
                voted_for_id: v.voted_for_id,
            },
            ClientMessage::SendChatMessage(cm) => {
                if cm.message.is_empty()
                    || cm.message.len() > max_chat_len
                    || cm.message.chars().any(|c| c.is_control() && c != '\n')
                {
                    tracing::debug!(user_id, room_code, "Dropped invalid chat message");
                    continue;
                }
                GameCommand::Chat {
                    user_id: user_id.to_string(),
                    message: cm.message,
                    client_msg_id: cm.client_msg_id,
                }
            },
            ClientMessage::Typing => GameCommand::Typing {
                user_id: user_id.to_string(),
                typing: true,
            },
            ClientMessage::StopTyping => GameCommand::Typing {
                user_id: user_id.to_string(),
                typing: false,
            },
        };

        if handle.cmd_tx.send(cmd).is_err() {
            // Session task is gone; nothing more to do on this socket.
            break;
        }
    }
}
