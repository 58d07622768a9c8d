use serde::{Deserialize, Serialize};

use super::messages::{
    CategoryVoteResultMsg, CategoryVoteStartedMsg, CategoryVoteSubmittedMsg,
    ChatMessageReceivedMsg, ClientMessage, CreateSpyGameMsg, DescriptionPhaseStartedMsg,
    DescriptionSubmittedMsg, JoinSpyGameMsg, MessageType, PlayerListMsg, SendChatMessageMsg,
    ServerMessage, SpyGameCreatedMsg, SpyGameEndedMsg, SpyGameErrorMsg, SpyGameJoinedMsg,
    SubmitCategoryVoteMsg, SubmitDescriptionMsg, SubmitVoteMsg, TypingNoticeMsg, VoteSubmittedMsg,
    VotingStartedMsg, WordAssignedMsg,
};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum message payload size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024; // 16 KiB

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    UnknownMessageType(u8),
    PayloadTooLarge(usize),
    SerializeError(String),
    DeserializeError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::UnknownMessageType(b) => write!(f, "unknown message type: 0x{b:02x}"),
            Self::PayloadTooLarge(size) => {
                write!(f, "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})")
            },
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Encode a serializable payload with a 1-byte type prefix.
pub fn encode_message<T: Serialize>(
    msg_type: MessageType,
    payload: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let payload_bytes =
        rmp_serde::to_vec(payload).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    let total = 1 + payload_bytes.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(total));
    }
    let mut buf = Vec::with_capacity(total);
    buf.push(msg_type as u8);
    buf.extend_from_slice(&payload_bytes);
    Ok(buf)
}

/// Encode a `ClientMessage` to wire format.
pub fn encode_client_message(msg: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        ClientMessage::CreateSpyGame(m) => encode_message(MessageType::CreateSpyGame, m),
        ClientMessage::JoinSpyGame(m) => encode_message(MessageType::JoinSpyGame, m),
        ClientMessage::StartSpyGame => encode_message(MessageType::StartSpyGame, &()),
        ClientMessage::SubmitCategoryVote(m) => encode_message(MessageType::SubmitCategoryVote, m),
        ClientMessage::SubmitDescription(m) => encode_message(MessageType::SubmitDescription, m),
        ClientMessage::SubmitVote(m) => encode_message(MessageType::SubmitVote, m),
        ClientMessage::SendChatMessage(m) => encode_message(MessageType::SendChatMessage, m),
        ClientMessage::Typing => encode_message(MessageType::Typing, &()),
        ClientMessage::StopTyping => encode_message(MessageType::StopTyping, &()),
    }
}

/// Encode a `ServerMessage` to wire format.
pub fn encode_server_message(msg: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        ServerMessage::SpyGameCreated(m) => encode_message(MessageType::SpyGameCreated, m),
        ServerMessage::SpyGameJoined(m) => encode_message(MessageType::SpyGameJoined, m),
        ServerMessage::SpyGameError(m) => encode_message(MessageType::SpyGameError, m),
        ServerMessage::SpyGameJoinError(m) => encode_message(MessageType::SpyGameJoinError, m),
        ServerMessage::PlayerList(m) => encode_message(MessageType::PlayerList, m),
        ServerMessage::CategoryVoteStarted(m) => encode_message(MessageType::CategoryVoteStarted, m),
        ServerMessage::CategoryVoteSubmitted(m) => {
            encode_message(MessageType::CategoryVoteSubmitted, m)
        },
        ServerMessage::CategoryVoteResult(m) => encode_message(MessageType::CategoryVoteResult, m),
        ServerMessage::WordAssigned(m) => encode_message(MessageType::WordAssigned, m),
        ServerMessage::DescriptionPhaseStarted(m) => {
            encode_message(MessageType::DescriptionPhaseStarted, m)
        },
        ServerMessage::DescriptionSubmitted(m) => {
            encode_message(MessageType::DescriptionSubmitted, m)
        },
        ServerMessage::VotingStarted(m) => encode_message(MessageType::VotingStarted, m),
        ServerMessage::VoteSubmitted(m) => encode_message(MessageType::VoteSubmitted, m),
        ServerMessage::SpyGameEnded(m) => encode_message(MessageType::SpyGameEnded, m),
        ServerMessage::ChatMessageReceived(m) => {
            encode_message(MessageType::ChatMessageReceived, m)
        },
        ServerMessage::TypingNotice(m) => encode_message(MessageType::TypingNotice, m),
    }
}

/// Extract the message type byte from raw wire data.
pub fn decode_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    MessageType::from_byte(data[0]).ok_or(ProtocolError::UnknownMessageType(data[0]))
}

/// Decode a MessagePack payload (bytes after the type prefix).
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    rmp_serde::from_slice(&data[1..]).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Decode raw wire data into a `ClientMessage`.
pub fn decode_client_message(data: &[u8]) -> Result<ClientMessage, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::CreateSpyGame => Ok(ClientMessage::CreateSpyGame(decode_payload::<
            CreateSpyGameMsg,
        >(data)?)),
        MessageType::JoinSpyGame => Ok(ClientMessage::JoinSpyGame(
            decode_payload::<JoinSpyGameMsg>(data)?,
        )),
        MessageType::StartSpyGame => Ok(ClientMessage::StartSpyGame),
        MessageType::SubmitCategoryVote => Ok(ClientMessage::SubmitCategoryVote(decode_payload::<
            SubmitCategoryVoteMsg,
        >(data)?)),
        MessageType::SubmitDescription => Ok(ClientMessage::SubmitDescription(decode_payload::<
            SubmitDescriptionMsg,
        >(data)?)),
        MessageType::SubmitVote => Ok(ClientMessage::SubmitVote(decode_payload::<SubmitVoteMsg>(
            data,
        )?)),
        MessageType::SendChatMessage => Ok(ClientMessage::SendChatMessage(decode_payload::<
            SendChatMessageMsg,
        >(data)?)),
        MessageType::Typing => Ok(ClientMessage::Typing),
        MessageType::StopTyping => Ok(ClientMessage::StopTyping),
        _ => Err(ProtocolError::UnknownMessageType(data[0])),
    }
}

/// Decode raw wire data into a `ServerMessage`.
pub fn decode_server_message(data: &[u8]) -> Result<ServerMessage, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::SpyGameCreated => Ok(ServerMessage::SpyGameCreated(Box::new(
            decode_payload::<SpyGameCreatedMsg>(data)?,
        ))),
        MessageType::SpyGameJoined => Ok(ServerMessage::SpyGameJoined(Box::new(decode_payload::<
            SpyGameJoinedMsg,
        >(data)?))),
        MessageType::SpyGameError => Ok(ServerMessage::SpyGameError(
            decode_payload::<SpyGameErrorMsg>(data)?,
        )),
        MessageType::SpyGameJoinError => Ok(ServerMessage::SpyGameJoinError(decode_payload::<
            SpyGameErrorMsg,
        >(data)?)),
        MessageType::PlayerList => Ok(ServerMessage::PlayerList(decode_payload::<PlayerListMsg>(
            data,
        )?)),
        MessageType::CategoryVoteStarted => Ok(ServerMessage::CategoryVoteStarted(
            decode_payload::<CategoryVoteStartedMsg>(data)?,
        )),
        MessageType::CategoryVoteSubmitted => Ok(ServerMessage::CategoryVoteSubmitted(
            decode_payload::<CategoryVoteSubmittedMsg>(data)?,
        )),
        MessageType::CategoryVoteResult => Ok(ServerMessage::CategoryVoteResult(decode_payload::<
            CategoryVoteResultMsg,
        >(data)?)),
        MessageType::WordAssigned => Ok(ServerMessage::WordAssigned(
            decode_payload::<WordAssignedMsg>(data)?,
        )),
        MessageType::DescriptionPhaseStarted => Ok(ServerMessage::DescriptionPhaseStarted(
            decode_payload::<DescriptionPhaseStartedMsg>(data)?,
        )),
        MessageType::DescriptionSubmitted => Ok(ServerMessage::DescriptionSubmitted(
            decode_payload::<DescriptionSubmittedMsg>(data)?,
        )),
        MessageType::VotingStarted => Ok(ServerMessage::VotingStarted(decode_payload::<
            VotingStartedMsg,
        >(data)?)),
        MessageType::VoteSubmitted => Ok(ServerMessage::VoteSubmitted(decode_payload::<
            VoteSubmittedMsg,
        >(data)?)),
        MessageType::SpyGameEnded => Ok(ServerMessage::SpyGameEnded(Box::new(decode_payload::<
            SpyGameEndedMsg,
        >(data)?))),
        MessageType::ChatMessageReceived => Ok(ServerMessage::ChatMessageReceived(
            decode_payload::<ChatMessageReceivedMsg>(data)?,
        )),
        MessageType::TypingNotice => Ok(ServerMessage::TypingNotice(
            decode_payload::<TypingNoticeMsg>(data)?,
        )),
        _ => Err(ProtocolError::UnknownMessageType(data[0])),
    }
}
