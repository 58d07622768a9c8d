use serde::{Deserialize, Serialize};

use crate::player::{Player, UserId};

/// Phase of a game session. Transitions are monotonic; `Reveal` is
/// terminal and exposes no further gameplay transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GamePhase {
    Lobby,
    CategoryVote,
    Describing,
    Voting,
    Reveal,
}

impl GamePhase {
    /// Whether `self → next` is a legal transition. There is no path
    /// back to `Lobby` once a game has started.
    pub fn can_transition(self, next: GamePhase) -> bool {
        matches!(
            (self, next),
            (GamePhase::Lobby, GamePhase::CategoryVote)
                | (GamePhase::Lobby, GamePhase::Describing)
                | (GamePhase::CategoryVote, GamePhase::Describing)
                | (GamePhase::Describing, GamePhase::Voting)
                | (GamePhase::Voting, GamePhase::Reveal)
        )
    }
}

/// Which side won the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Villagers,
    Spy,
}

/// Classification of a chat log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Chat,
    Description,
    System,
}

/// An entry in the session's bounded chat log tail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub author_id: UserId,
    pub author_name: String,
    pub body: String,
    pub created_at_ms: u64,
    pub kind: ChatKind,
}

/// Public view of a session, safe to broadcast to every member: it
/// never carries the word assignment or the spy's identity.
///
/// Reconnecting clients receive this snapshot instead of the event
/// stream they missed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub id: String,
    pub room_code: String,
    pub host_id: UserId,
    pub max_players: u8,
    pub phase: GamePhase,
    pub players: Vec<Player>,
    pub current_turn: Option<usize>,
    /// Absolute deadline of the armed phase timer, epoch milliseconds.
    pub turn_deadline_ms: Option<u64>,
    /// Who may transmit on the voice side channel right now.
    pub audio_grant: Option<UserId>,
    pub chat_tail: Vec<ChatMessage>,
    pub created_at_ms: u64,
}

/// The voice capability is a pure function of session state: only the
/// current turn holder during the description phase may transmit.
/// Clients derive `canTransmitAudio = grant == my_id && mic_requested`.
pub fn audio_grant(phase: GamePhase, players: &[Player], current_turn: Option<usize>) -> Option<UserId> {
    if phase != GamePhase::Describing {
        return None;
    }
    let idx = current_turn?;
    players.get(idx).map(|p| p.user_id.clone())
}
