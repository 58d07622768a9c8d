use wordspy_core::net::messages::{ServerMessage, SpyGameErrorMsg};

/// Command-level failures. Reported synchronously to the calling client
/// only, never broadcast; none of them mutate session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    RoomNotFound,
    RoomFull,
    AlreadyStarted,
    NotHost,
    NotEnoughPlayers { have: usize },
    NotYourTurn,
    InvalidVoteTarget,
    NotAPlayer,
    InvalidMaxPlayers(u8),
    CodeExhausted,
    WrongPhase,
    ConnectionLost,
}

impl GameError {
    /// Stable machine-readable code carried on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RoomNotFound => "room_not_found",
            Self::RoomFull => "room_full",
            Self::AlreadyStarted => "already_started",
            Self::NotHost => "not_host",
            Self::NotEnoughPlayers { .. } => "not_enough_players",
            Self::NotYourTurn => "not_your_turn",
            Self::InvalidVoteTarget => "invalid_vote_target",
            Self::NotAPlayer => "not_a_player",
            Self::InvalidMaxPlayers(_) => "invalid_max_players",
            Self::CodeExhausted => "code_exhausted",
            Self::WrongPhase => "wrong_phase",
            Self::ConnectionLost => "connection_lost",
        }
    }

    /// Whether this failure belongs on the join error channel rather
    /// than the general command error channel.
    pub fn is_join_error(&self) -> bool {
        matches!(
            self,
            Self::RoomNotFound | Self::RoomFull | Self::AlreadyStarted | Self::CodeExhausted
        )
    }

    pub fn to_wire(&self) -> ServerMessage {
        let msg = SpyGameErrorMsg {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        if self.is_join_error() {
            ServerMessage::SpyGameJoinError(msg)
        } else {
            ServerMessage::SpyGameError(msg)
        }
    }
}

impl std::fmt::Display for GameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoomNotFound => write!(f, "room not found"),
            Self::RoomFull => write!(f, "room is full"),
            Self::AlreadyStarted => write!(f, "game already started"),
            Self::NotHost => write!(f, "only the host can do that"),
            Self::NotEnoughPlayers { have } => {
                write!(f, "need at least 2 players to start, have {have}")
            },
            Self::NotYourTurn => write!(f, "it is not your turn"),
            Self::InvalidVoteTarget => write!(f, "vote target is not a player in this game"),
            Self::NotAPlayer => write!(f, "you are not a player in this game"),
            Self::InvalidMaxPlayers(n) => write!(f, "max players must be 6 or 8, got {n}"),
            Self::CodeExhausted => write!(f, "no room codes available"),
            Self::WrongPhase => write!(f, "that action is not allowed in the current phase"),
            Self::ConnectionLost => write!(f, "connection lost"),
        }
    }
}

impl std::error::Error for GameError {}
