use serde::{Deserialize, Serialize};

use crate::player::{Player, UserId};
use crate::session::{ChatMessage, GameSnapshot, Winner};
use crate::words::CategoryOption;

/// Network message type discriminator (1-byte wire prefix).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Client -> Server
    CreateSpyGame = 0x01,
    JoinSpyGame = 0x02,
    StartSpyGame = 0x03,
    SubmitCategoryVote = 0x04,
    SubmitDescription = 0x05,
    SubmitVote = 0x06,
    SendChatMessage = 0x07,
    Typing = 0x08,
    StopTyping = 0x09,

    // Server -> Client
    SpyGameCreated = 0x10,
    SpyGameJoined = 0x11,
    SpyGameError = 0x12,
    SpyGameJoinError = 0x13,
    PlayerList = 0x14,
    CategoryVoteStarted = 0x15,
    CategoryVoteSubmitted = 0x16,
    CategoryVoteResult = 0x17,
    WordAssigned = 0x18,
    DescriptionPhaseStarted = 0x19,
    DescriptionSubmitted = 0x1A,
    VotingStarted = 0x1B,
    VoteSubmitted = 0x1C,
    SpyGameEnded = 0x1D,
    ChatMessageReceived = 0x1E,
    TypingNotice = 0x1F,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x01 => Self::CreateSpyGame,
            0x02 => Self::JoinSpyGame,
            0x03 => Self::StartSpyGame,
            0x04 => Self::SubmitCategoryVote,
            0x05 => Self::SubmitDescription,
            0x06 => Self::SubmitVote,
            0x07 => Self::SendChatMessage,
            0x08 => Self::Typing,
            0x09 => Self::StopTyping,
            0x10 => Self::SpyGameCreated,
            0x11 => Self::SpyGameJoined,
            0x12 => Self::SpyGameError,
            0x13 => Self::SpyGameJoinError,
            0x14 => Self::PlayerList,
            0x15 => Self::CategoryVoteStarted,
            0x16 => Self::CategoryVoteSubmitted,
            0x17 => Self::CategoryVoteResult,
            0x18 => Self::WordAssigned,
            0x19 => Self::DescriptionPhaseStarted,
            0x1A => Self::DescriptionSubmitted,
            0x1B => Self::VotingStarted,
            0x1C => Self::VoteSubmitted,
            0x1D => Self::SpyGameEnded,
            0x1E => Self::ChatMessageReceived,
            0x1F => Self::TypingNotice,
            _ => return None,
        })
    }
}

// ---------------------------------------------------------------------
// Client -> Server payloads
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSpyGameMsg {
    pub user_id: UserId,
    pub display_name: String,
    pub max_players: u8,
    pub protocol_version: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpyGameMsg {
    pub user_id: UserId,
    pub display_name: String,
    pub room_code: String,
    pub protocol_version: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitCategoryVoteMsg {
    pub category_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitDescriptionMsg {
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitVoteMsg {
    pub voted_for_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendChatMessageMsg {
    pub message: String,
    /// Client-generated correlation id. Echoed back in
    /// `ChatMessageReceived` so optimistic local entries can be
    /// replaced by the authoritative echo.
    pub client_msg_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    CreateSpyGame(CreateSpyGameMsg),
    JoinSpyGame(JoinSpyGameMsg),
    StartSpyGame,
    SubmitCategoryVote(SubmitCategoryVoteMsg),
    SubmitDescription(SubmitDescriptionMsg),
    SubmitVote(SubmitVoteMsg),
    SendChatMessage(SendChatMessageMsg),
    Typing,
    StopTyping,
}

impl ClientMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::CreateSpyGame(_) => MessageType::CreateSpyGame,
            Self::JoinSpyGame(_) => MessageType::JoinSpyGame,
            Self::StartSpyGame => MessageType::StartSpyGame,
            Self::SubmitCategoryVote(_) => MessageType::SubmitCategoryVote,
            Self::SubmitDescription(_) => MessageType::SubmitDescription,
            Self::SubmitVote(_) => MessageType::SubmitVote,
            Self::SendChatMessage(_) => MessageType::SendChatMessage,
            Self::Typing => MessageType::Typing,
            Self::StopTyping => MessageType::StopTyping,
        }
    }
}

// ---------------------------------------------------------------------
// Server -> Client payloads
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpyGameCreatedMsg {
    pub game_id: String,
    pub room_code: String,
    pub game: GameSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpyGameJoinedMsg {
    pub game_id: String,
    pub game: GameSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpyGameErrorMsg {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerListMsg {
    pub players: Vec<Player>,
    pub host_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryVoteStartedMsg {
    pub categories: Vec<CategoryOption>,
    pub timeout_secs: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryVoteSubmittedMsg {
    pub user_id: UserId,
    pub category_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryVoteResultMsg {
    pub category_id: String,
    pub category_name: String,
}

/// Sent privately to each player when the description phase starts and
/// again on reconnect. Never broadcast; carries only the recipient's
/// own word, not their role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordAssignedMsg {
    pub word: String,
}

/// Broadcast once per turn: whose turn it is and when it expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionPhaseStartedMsg {
    pub current_turn: usize,
    pub player_id: UserId,
    pub deadline_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionSubmittedMsg {
    pub player_id: UserId,
    pub description: String,
    /// True when the turn expired or the player was disconnected and
    /// the server advanced with a synthetic empty description.
    pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingStartedMsg {
    pub timeout_secs: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteSubmittedMsg {
    pub voter_id: UserId,
    pub voted_for_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteEntry {
    pub voter_id: UserId,
    pub voted_for_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordEntry {
    pub player_id: UserId,
    pub word: String,
    pub was_spy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpyGameEndedMsg {
    pub winner: Winner,
    pub spy_id: UserId,
    /// Who was voted out; `None` when the vote timed out empty.
    pub ejected_id: Option<UserId>,
    pub votes: Vec<VoteEntry>,
    pub words: Vec<WordEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageReceivedMsg {
    pub message: ChatMessage,
    /// Correlation id from the sender's `SendChatMessage`, if any.
    pub client_msg_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingNoticeMsg {
    pub user_id: UserId,
    pub user_name: String,
    pub typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    SpyGameCreated(Box<SpyGameCreatedMsg>),
    SpyGameJoined(Box<SpyGameJoinedMsg>),
    SpyGameError(SpyGameErrorMsg),
    SpyGameJoinError(SpyGameErrorMsg),
    PlayerList(PlayerListMsg),
    CategoryVoteStarted(CategoryVoteStartedMsg),
    CategoryVoteSubmitted(CategoryVoteSubmittedMsg),
    CategoryVoteResult(CategoryVoteResultMsg),
    WordAssigned(WordAssignedMsg),
    DescriptionPhaseStarted(DescriptionPhaseStartedMsg),
    DescriptionSubmitted(DescriptionSubmittedMsg),
    VotingStarted(VotingStartedMsg),
    VoteSubmitted(VoteSubmittedMsg),
    SpyGameEnded(Box<SpyGameEndedMsg>),
    ChatMessageReceived(ChatMessageReceivedMsg),
    TypingNotice(TypingNoticeMsg),
}
