use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use wordspy_core::net::messages::ServerMessage;
use wordspy_core::net::protocol::encode_server_message;
use wordspy_core::player::UserId;

/// Per-player sender for outbound WebSocket binary messages.
/// Bounded to prevent memory exhaustion from slow clients.
/// Uses `Bytes` for zero-copy cloning when broadcasting.
pub type PlayerSender = mpsc::Sender<Bytes>;

struct Subscriber {
    connection_id: String,
    sender: PlayerSender,
}

/// Fan-out of events to every socket subscribed to one session.
///
/// A relay instance only ever holds one session's subscribers, so there
/// is no cross-session leakage by construction. Sends are `try_send`:
/// a slow or closed subscriber is skipped, never blocking the mutating
/// path.
#[derive(Clone, Default)]
pub struct EventRelay {
    subscribers: Arc<Mutex<HashMap<UserId, Subscriber>>>,
}

impl EventRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the outbound channel for a user. A
    /// reconnecting user's fresh socket replaces the stale one.
    pub fn subscribe(&self, user_id: &str, connection_id: &str, sender: PlayerSender) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.insert(
            user_id.to_string(),
            Subscriber {
                connection_id: connection_id.to_string(),
                sender,
            },
        );
    }

    /// Remove a user's channel, but only if it still belongs to the
    /// given connection. A disconnect racing a reconnect must not tear
    /// down the replacement socket.
    pub fn unsubscribe(&self, user_id: &str, connection_id: &str) {
        let mut subs = self.subscribers.lock().unwrap();
        if let Some(sub) = subs.get(user_id)
            && sub.connection_id == connection_id
        {
            subs.remove(user_id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Send one message to a single subscriber.
    pub fn send_to(&self, user_id: &str, msg: &ServerMessage) {
        let Ok(data) = encode_server_message(msg) else {
            tracing::error!(user_id, "Failed to encode server message");
            return;
        };
        let subs = self.subscribers.lock().unwrap();
        if let Some(sub) = subs.get(user_id)
            && let Err(e) = sub.sender.try_send(Bytes::from(data))
        {
            tracing::debug!(user_id, error = %e, "Failed to send to player (slow or disconnected)");
        }
    }

    /// Broadcast one message to every subscriber of this session.
    pub fn broadcast(&self, msg: &ServerMessage) {
        let Ok(data) = encode_server_message(msg) else {
            tracing::error!("Failed to encode server message for broadcast");
            return;
        };
        let bytes = Bytes::from(data);
        let subs = self.subscribers.lock().unwrap();
        for (user_id, sub) in subs.iter() {
            if let Err(e) = sub.sender.try_send(bytes.clone()) {
                tracing::debug!(user_id, error = %e, "Skipping broadcast to slow client");
            }
        }
    }
}
