use serde::{Deserialize, Serialize};

/// External identity of a user. Issued by the surrounding platform;
/// the session server treats it as opaque.
pub type UserId = String;

/// A player seated in a game session.
///
/// Once seated, a player is never removed from the roster; a dropped
/// connection only clears `connection_id`. This keeps `position` (and
/// with it turn order and role assignment) stable across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub user_id: UserId,
    pub display_name: String,
    pub is_host: bool,
    /// Present while the player has a live socket; `None` while disconnected.
    pub connection_id: Option<String>,
    /// Seat index, fixed for the session's lifetime.
    pub position: usize,
}

impl Player {
    pub fn is_connected(&self) -> bool {
        self.connection_id.is_some()
    }
}
