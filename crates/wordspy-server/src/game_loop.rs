use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand::seq::IndexedRandom;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use wordspy_core::ballot::BallotBox;
use wordspy_core::net::messages::{
    CategoryVoteResultMsg, CategoryVoteStartedMsg, CategoryVoteSubmittedMsg,
    ChatMessageReceivedMsg, DescriptionPhaseStartedMsg, DescriptionSubmittedMsg, PlayerListMsg,
    ServerMessage, SpyGameCreatedMsg, SpyGameEndedMsg, SpyGameJoinedMsg, TypingNoticeMsg,
    VoteEntry, VoteSubmittedMsg, VotingStartedMsg, WordAssignedMsg, WordEntry,
};
use wordspy_core::player::{Player, UserId};
use wordspy_core::session::{
    ChatKind, ChatMessage, GamePhase, GameSnapshot, Winner, audio_grant,
};
use wordspy_core::time::epoch_ms;
use wordspy_core::words::{self, CategoryOption, RANDOM_CATEGORY_ID, WordPair};

use crate::config::GameTimingConfig;
use crate::error::GameError;
use crate::relay::EventRelay;

/// Commands sent from WebSocket handlers to a session task. Everything
/// that mutates a session, including timer expiry, runs on that task,
/// so commands against one session are fully serialized.
#[derive(Debug)]
pub enum GameCommand {
    Join {
        user_id: UserId,
        display_name: String,
        connection_id: String,
        reply: oneshot::Sender<Result<(), GameError>>,
    },
    Start {
        user_id: UserId,
    },
    SubmitCategoryVote {
        user_id: UserId,
        category_id: String,
    },
    SubmitDescription {
        user_id: UserId,
        description: String,
    },
    SubmitVote {
        user_id: UserId,
        voted_for_id: UserId,
    },
    Chat {
        user_id: UserId,
        message: String,
        client_msg_id: Option<String>,
    },
    Typing {
        user_id: UserId,
        typing: bool,
    },
    Disconnected {
        user_id: UserId,
        connection_id: String,
    },
    Stop,
}

/// Which phase clock is armed. Only one timer exists per session;
/// arming a new one replaces any previous deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    CategoryVote,
    Turn,
    Voting,
}

struct Session {
    id: String,
    room_code: String,
    host_id: UserId,
    max_players: u8,
    phase: GamePhase,
    players: Vec<Player>,
    current_turn: Option<usize>,
    turns_taken: usize,
    words: HashMap<UserId, String>,
    spy_id: Option<UserId>,
    votes: BallotBox<UserId>,
    category_votes: BallotBox<String>,
    chat: VecDeque<ChatMessage>,
    created_at_ms: u64,
    relay: EventRelay,
    rules: GameTimingConfig,
    timer: Option<(TimerKind, Instant)>,
    timer_epoch_ms: Option<u64>,
    empty_since: Option<Instant>,
    revealed_at: Option<Instant>,
    rng: StdRng,
}

/// Spawn a session task. Returns (session_id, command sender, task handle).
/// The caller owns room-code allocation; the task owns everything else.
pub fn spawn_session(
    rules: GameTimingConfig,
    room_code: String,
    max_players: u8,
    relay: EventRelay,
    seed: Option<u64>,
) -> (String, mpsc::UnboundedSender<GameCommand>, JoinHandle<()>) {
    let session_id = Uuid::new_v4().to_string();
    let session = Session {
        id: session_id.clone(),
        room_code,
        host_id: String::new(),
        max_players,
        phase: GamePhase::Lobby,
        players: Vec::new(),
        current_turn: None,
        turns_taken: 0,
        words: HashMap::new(),
        spy_id: None,
        votes: BallotBox::new(),
        category_votes: BallotBox::new(),
        chat: VecDeque::new(),
        created_at_ms: epoch_ms(),
        relay,
        rules,
        timer: None,
        timer_epoch_ms: None,
        // Counts as empty until the host's Join lands, so an abandoned
        // create still gets evicted.
        empty_since: Some(Instant::now()),
        revealed_at: None,
        rng: seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64),
    };
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_session(session, cmd_rx));
    (session_id, cmd_tx, handle)
}

async fn run_session(mut s: Session, mut cmd_rx: mpsc::UnboundedReceiver<GameCommand>) {
    let mut housekeeping = tokio::time::interval(Duration::from_millis(500));
    housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let deadline = s.timer.as_ref().map(|&(_, at)| at);
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(GameCommand::Join { user_id, display_name, connection_id, reply }) => {
                        let result = s.handle_join(user_id, display_name, connection_id);
                        let _ = reply.send(result);
                    },
                    Some(GameCommand::Start { user_id }) => s.handle_start(&user_id),
                    Some(GameCommand::SubmitCategoryVote { user_id, category_id }) => {
                        s.handle_category_vote(&user_id, category_id);
                    },
                    Some(GameCommand::SubmitDescription { user_id, description }) => {
                        s.handle_description(&user_id, description);
                    },
                    Some(GameCommand::SubmitVote { user_id, voted_for_id }) => {
                        s.handle_vote(&user_id, voted_for_id);
                    },
                    Some(GameCommand::Chat { user_id, message, client_msg_id }) => {
                        s.handle_chat(&user_id, message, client_msg_id);
                    },
                    Some(GameCommand::Typing { user_id, typing }) => {
                        s.handle_typing(&user_id, typing);
                    },
                    Some(GameCommand::Disconnected { user_id, connection_id }) => {
                        s.handle_disconnected(&user_id, &connection_id);
                    },
                    Some(GameCommand::Stop) | None => break,
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some((kind, _)) = s.timer.take() {
                    s.timer_epoch_ms = None;
                    s.on_timer(kind);
                }
            }
            _ = housekeeping.tick() => {
                if s.should_evict() {
                    tracing::info!(room = %s.room_code, phase = ?s.phase, "Session evicted");
                    break;
                }
            }
        }
    }

    tracing::info!(room = %s.room_code, session_id = %s.id, "Session task ended");
}

impl Session {
    fn player(&self, user_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.user_id == user_id)
    }

    fn connected_ids(&self) -> impl Iterator<Item = &UserId> {
        self.players
            .iter()
            .filter(|p| p.is_connected())
            .map(|p| &p.user_id)
    }

    fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            id: self.id.clone(),
            room_code: self.room_code.clone(),
            host_id: self.host_id.clone(),
            max_players: self.max_players,
            phase: self.phase,
            players: self.players.clone(),
            current_turn: self.current_turn,
            turn_deadline_ms: if self.phase == GamePhase::Describing {
                self.timer_epoch_ms
            } else {
                None
            },
            audio_grant: audio_grant(self.phase, &self.players, self.current_turn),
            chat_tail: self.chat.iter().cloned().collect(),
            created_at_ms: self.created_at_ms,
        }
    }

    /// Report a command failure to the offending client only.
    fn fail(&self, user_id: &str, err: GameError) {
        tracing::debug!(room = %self.room_code, user_id, error = %err, "Command rejected");
        self.relay.send_to(user_id, &err.to_wire());
    }

    fn set_phase(&mut self, next: GamePhase) {
        if !self.phase.can_transition(next) {
            // Unreachable through the public command surface; log and
            // refuse rather than corrupt the session.
            tracing::warn!(room = %self.room_code, from = ?self.phase, to = ?next,
                "Invalid phase transition");
            return;
        }
        self.disarm();
        self.phase = next;
    }

    fn arm(&mut self, kind: TimerKind, duration: Duration) {
        self.timer = Some((kind, Instant::now() + duration));
        self.timer_epoch_ms = Some(epoch_ms() + duration.as_millis() as u64);
    }

    fn disarm(&mut self) {
        self.timer = None;
        self.timer_epoch_ms = None;
    }

    fn broadcast_roster(&self) {
        self.relay.broadcast(&ServerMessage::PlayerList(PlayerListMsg {
            players: self.players.clone(),
            host_id: self.host_id.clone(),
        }));
    }

    fn push_chat(&mut self, author_id: &str, author_name: &str, body: String, kind: ChatKind) -> ChatMessage {
        let entry = ChatMessage {
            id: Uuid::new_v4().to_string(),
            author_id: author_id.to_string(),
            author_name: author_name.to_string(),
            body,
            created_at_ms: epoch_ms(),
            kind,
        };
        self.chat.push_back(entry.clone());
        while self.chat.len() > self.rules.chat_log_tail {
            self.chat.pop_front();
        }
        entry
    }

    // ---------------------------------------------------------------
    // Lobby
    // ---------------------------------------------------------------

    fn handle_join(
        &mut self,
        user_id: UserId,
        display_name: String,
        connection_id: String,
    ) -> Result<(), GameError> {
        if let Some(pos) = self.players.iter().position(|p| p.user_id == user_id) {
            // Known userId at any phase is a reconnect: the slot and
            // position are preserved, and the client gets a full
            // snapshot instead of the event stream it missed.
            self.players[pos].connection_id = Some(connection_id);
            self.empty_since = None;
            tracing::info!(room = %self.room_code, user_id, "Player reconnected");
            self.relay.send_to(
                &user_id,
                &ServerMessage::SpyGameJoined(Box::new(SpyGameJoinedMsg {
                    game_id: self.id.clone(),
                    game: self.snapshot(),
                })),
            );
            if let Some(word) = self.words.get(&user_id) {
                self.relay.send_to(
                    &user_id,
                    &ServerMessage::WordAssigned(WordAssignedMsg { word: word.clone() }),
                );
            }
            self.broadcast_roster();
            return Ok(());
        }

        if self.phase != GamePhase::Lobby {
            return Err(GameError::AlreadyStarted);
        }
        if self.players.len() >= self.max_players as usize {
            return Err(GameError::RoomFull);
        }

        let is_host = self.players.is_empty();
        let position = self.players.len();
        if is_host {
            self.host_id = user_id.clone();
        }
        self.players.push(Player {
            user_id: user_id.clone(),
            display_name,
            is_host,
            connection_id: Some(connection_id),
            position,
        });
        self.empty_since = None;

        let response = if is_host {
            ServerMessage::SpyGameCreated(Box::new(SpyGameCreatedMsg {
                game_id: self.id.clone(),
                room_code: self.room_code.clone(),
                game: self.snapshot(),
            }))
        } else {
            ServerMessage::SpyGameJoined(Box::new(SpyGameJoinedMsg {
                game_id: self.id.clone(),
                game: self.snapshot(),
            }))
        };
        self.relay.send_to(&user_id, &response);
        self.broadcast_roster();
        tracing::info!(room = %self.room_code, user_id, position, "Player joined");
        Ok(())
    }

    fn handle_start(&mut self, user_id: &str) {
        if self.player(user_id).is_none() {
            return self.fail(user_id, GameError::NotAPlayer);
        }
        if user_id != self.host_id {
            return self.fail(user_id, GameError::NotHost);
        }
        if self.phase != GamePhase::Lobby {
            return self.fail(user_id, GameError::AlreadyStarted);
        }
        if self.players.len() < 2 {
            return self.fail(
                user_id,
                GameError::NotEnoughPlayers {
                    have: self.players.len(),
                },
            );
        }

        if self.rules.category_vote_enabled {
            self.set_phase(GamePhase::CategoryVote);
            self.category_votes.clear();
            self.relay
                .broadcast(&ServerMessage::CategoryVoteStarted(CategoryVoteStartedMsg {
                    categories: words::vote_options(),
                    timeout_secs: self.rules.category_vote_timeout_secs as u16,
                }));
            self.arm(TimerKind::CategoryVote, self.rules.category_vote_timeout());
        } else {
            let category = words::default_category();
            self.begin_round(category);
        }
    }

    // ---------------------------------------------------------------
    // Category vote
    // ---------------------------------------------------------------

    fn handle_category_vote(&mut self, user_id: &str, category_id: String) {
        if self.player(user_id).is_none() {
            return self.fail(user_id, GameError::NotAPlayer);
        }
        if self.phase != GamePhase::CategoryVote {
            return self.fail(user_id, GameError::WrongPhase);
        }
        if category_id != RANDOM_CATEGORY_ID && words::find_category(&category_id).is_none() {
            return self.fail(user_id, GameError::InvalidVoteTarget);
        }

        self.category_votes.cast(user_id.to_string(), category_id.clone());
        self.relay
            .broadcast(&ServerMessage::CategoryVoteSubmitted(CategoryVoteSubmittedMsg {
                user_id: user_id.to_string(),
                category_id,
            }));

        if self.category_votes.is_complete(self.connected_ids()) {
            self.disarm();
            self.resolve_category_votes();
        }
    }

    fn resolve_category_votes(&mut self) {
        let pick = self.category_votes.resolve(&mut self.rng);
        let category = match pick.as_deref() {
            // Zero ballots or an explicit "random" win both fall back
            // to a uniform draw over the real catalog.
            None | Some(RANDOM_CATEGORY_ID) => words::random_category(&mut self.rng),
            Some(id) => {
                words::find_category(id).unwrap_or_else(|| words::random_category(&mut self.rng))
            },
        };
        self.relay
            .broadcast(&ServerMessage::CategoryVoteResult(CategoryVoteResultMsg {
                category_id: category.id.clone(),
                category_name: category.name.clone(),
            }));
        self.begin_round(category);
    }

    // ---------------------------------------------------------------
    // Description phase
    // ---------------------------------------------------------------

    fn begin_round(&mut self, category: CategoryOption) {
        let Some(WordPair { majority, spy }) = words::draw_pair(&category.id, &mut self.rng)
        else {
            tracing::error!(room = %self.room_code, category = %category.id, "Empty word category");
            return;
        };
        let Some(spy_player) = self.players.choose(&mut self.rng) else {
            return;
        };
        let spy_id = spy_player.user_id.clone();

        self.words.clear();
        for p in &self.players {
            let word = if p.user_id == spy_id { &spy } else { &majority };
            self.words.insert(p.user_id.clone(), word.clone());
        }
        self.spy_id = Some(spy_id);

        self.set_phase(GamePhase::Describing);
        self.turns_taken = 0;
        self.push_chat(
            "",
            "",
            format!("Category: {}", category.name),
            ChatKind::System,
        );

        // Words are delivered privately; the broadcast snapshot never
        // carries the assignment or the spy's identity.
        for p in &self.players {
            if let Some(word) = self.words.get(&p.user_id) {
                self.relay.send_to(
                    &p.user_id,
                    &ServerMessage::WordAssigned(WordAssignedMsg { word: word.clone() }),
                );
            }
        }

        tracing::info!(room = %self.room_code, players = self.players.len(), "Description phase started");
        self.arm_turn_or_skip(0);
    }

    /// Arm the turn timer for the player at `idx`, skipping disconnected
    /// players immediately so the room never stalls on them. Moves to
    /// voting once every player has had exactly one turn.
    fn arm_turn_or_skip(&mut self, mut idx: usize) {
        loop {
            if self.turns_taken >= self.players.len() {
                return self.start_voting();
            }
            if self.players[idx].is_connected() {
                self.current_turn = Some(idx);
                self.arm(TimerKind::Turn, self.rules.turn());
                let deadline_ms = self.timer_epoch_ms.unwrap_or_default();
                self.relay.broadcast(&ServerMessage::DescriptionPhaseStarted(
                    DescriptionPhaseStartedMsg {
                        current_turn: idx,
                        player_id: self.players[idx].user_id.clone(),
                        deadline_ms,
                    },
                ));
                return;
            }
            self.current_turn = Some(idx);
            self.record_skip(idx, "is away");
            idx = (idx + 1) % self.players.len();
        }
    }

    /// Synthetic empty description for a skipped turn.
    fn record_skip(&mut self, idx: usize, reason: &str) {
        let (user_id, name) = {
            let p = &self.players[idx];
            (p.user_id.clone(), p.display_name.clone())
        };
        self.push_chat("", "", format!("{name} {reason}"), ChatKind::System);
        self.relay
            .broadcast(&ServerMessage::DescriptionSubmitted(DescriptionSubmittedMsg {
                player_id: user_id,
                description: String::new(),
                skipped: true,
            }));
        self.turns_taken += 1;
    }

    fn handle_description(&mut self, user_id: &str, description: String) {
        if self.player(user_id).is_none() {
            return self.fail(user_id, GameError::NotAPlayer);
        }
        if self.phase != GamePhase::Describing {
            return self.fail(user_id, GameError::NotYourTurn);
        }
        let Some(idx) = self.current_turn else {
            return self.fail(user_id, GameError::NotYourTurn);
        };
        if self.players[idx].user_id != user_id {
            return self.fail(user_id, GameError::NotYourTurn);
        }

        self.disarm();
        let name = self.players[idx].display_name.clone();
        self.push_chat(user_id, &name, description.clone(), ChatKind::Description);
        self.relay
            .broadcast(&ServerMessage::DescriptionSubmitted(DescriptionSubmittedMsg {
                player_id: user_id.to_string(),
                description,
                skipped: false,
            }));
        self.turns_taken += 1;
        self.advance_turn(idx);
    }

    fn advance_turn(&mut self, from: usize) {
        if self.turns_taken >= self.players.len() {
            self.start_voting();
        } else {
            self.arm_turn_or_skip((from + 1) % self.players.len());
        }
    }

    // ---------------------------------------------------------------
    // Voting and reveal
    // ---------------------------------------------------------------

    fn start_voting(&mut self) {
        self.set_phase(GamePhase::Voting);
        self.current_turn = None;
        self.votes.clear();
        self.relay
            .broadcast(&ServerMessage::VotingStarted(VotingStartedMsg {
                timeout_secs: self.rules.vote_timeout_secs as u16,
            }));
        self.arm(TimerKind::Voting, self.rules.vote_timeout());
    }

    fn handle_vote(&mut self, user_id: &str, voted_for_id: UserId) {
        if self.player(user_id).is_none() {
            return self.fail(user_id, GameError::NotAPlayer);
        }
        if self.phase != GamePhase::Voting {
            return self.fail(user_id, GameError::WrongPhase);
        }
        if self.player(&voted_for_id).is_none() {
            return self.fail(user_id, GameError::InvalidVoteTarget);
        }

        self.votes.cast(user_id.to_string(), voted_for_id.clone());
        self.relay
            .broadcast(&ServerMessage::VoteSubmitted(VoteSubmittedMsg {
                voter_id: user_id.to_string(),
                voted_for_id,
            }));

        // Resolve early once every connected player has a ballot.
        if self.votes.is_complete(self.connected_ids()) {
            self.disarm();
            self.resolve_votes();
        }
    }

    fn resolve_votes(&mut self) {
        let ejected = self.votes.resolve(&mut self.rng);
        let spy_id = self.spy_id.clone().unwrap_or_default();
        // A timed-out vote with no ejection means the spy survives.
        let winner = match &ejected {
            Some(target) if *target == spy_id => Winner::Villagers,
            _ => Winner::Spy,
        };

        self.set_phase(GamePhase::Reveal);
        self.revealed_at = Some(Instant::now());

        let mut votes: Vec<VoteEntry> = self
            .votes
            .ballots()
            .iter()
            .map(|(voter, target)| VoteEntry {
                voter_id: voter.clone(),
                voted_for_id: target.clone(),
            })
            .collect();
        votes.sort_by(|a, b| a.voter_id.cmp(&b.voter_id));

        let words: Vec<WordEntry> = self
            .players
            .iter()
            .map(|p| WordEntry {
                player_id: p.user_id.clone(),
                word: self.words.get(&p.user_id).cloned().unwrap_or_default(),
                was_spy: p.user_id == spy_id,
            })
            .collect();

        tracing::info!(room = %self.room_code, winner = ?winner, "Game ended");
        self.relay
            .broadcast(&ServerMessage::SpyGameEnded(Box::new(SpyGameEndedMsg {
                winner,
                spy_id,
                ejected_id: ejected,
                votes,
                words,
            })));
    }

    // ---------------------------------------------------------------
    // Chat, typing, presence
    // ---------------------------------------------------------------

    fn handle_chat(&mut self, user_id: &str, message: String, client_msg_id: Option<String>) {
        let Some(player) = self.player(user_id) else {
            return self.fail(user_id, GameError::NotAPlayer);
        };
        let name = player.display_name.clone();
        let entry = self.push_chat(user_id, &name, message, ChatKind::Chat);
        self.relay
            .broadcast(&ServerMessage::ChatMessageReceived(ChatMessageReceivedMsg {
                message: entry,
                client_msg_id,
            }));
    }

    fn handle_typing(&mut self, user_id: &str, typing: bool) {
        let Some(player) = self.player(user_id) else {
            return;
        };
        self.relay
            .broadcast(&ServerMessage::TypingNotice(TypingNoticeMsg {
                user_id: user_id.to_string(),
                user_name: player.display_name.clone(),
                typing,
            }));
    }

    fn handle_disconnected(&mut self, user_id: &str, connection_id: &str) {
        let Some(pos) = self.players.iter().position(|p| p.user_id == user_id) else {
            return;
        };
        // Ignore a stale disconnect that raced a reconnect.
        if self.players[pos].connection_id.as_deref() != Some(connection_id) {
            return;
        }
        self.players[pos].connection_id = None;
        tracing::info!(room = %self.room_code, user_id, "Player disconnected");
        self.broadcast_roster();

        if self.players.iter().all(|p| !p.is_connected()) {
            self.empty_since = Some(Instant::now());
        }

        match self.phase {
            // Don't make the room wait out a dead player's clock.
            GamePhase::Describing if self.current_turn == Some(pos) => {
                self.disarm();
                self.record_skip(pos, "disconnected");
                self.advance_turn(pos);
            },
            GamePhase::CategoryVote => {
                if !self.category_votes.is_empty()
                    && self.category_votes.is_complete(self.connected_ids())
                {
                    self.disarm();
                    self.resolve_category_votes();
                }
            },
            GamePhase::Voting => {
                if !self.votes.is_empty() && self.votes.is_complete(self.connected_ids()) {
                    self.disarm();
                    self.resolve_votes();
                }
            },
            _ => {},
        }
    }

    // ---------------------------------------------------------------
    // Timers and lifecycle
    // ---------------------------------------------------------------

    fn on_timer(&mut self, kind: TimerKind) {
        match (kind, self.phase) {
            (TimerKind::CategoryVote, GamePhase::CategoryVote) => self.resolve_category_votes(),
            (TimerKind::Turn, GamePhase::Describing) => {
                if let Some(idx) = self.current_turn {
                    self.record_skip(idx, "ran out of time");
                    self.advance_turn(idx);
                }
            },
            (TimerKind::Voting, GamePhase::Voting) => self.resolve_votes(),
            (kind, phase) => {
                tracing::warn!(room = %self.room_code, ?kind, ?phase, "Stale timer ignored");
            },
        }
    }

    fn should_evict(&self) -> bool {
        if let Some(since) = self.empty_since
            && since.elapsed() >= self.rules.empty_grace()
        {
            return true;
        }
        if let Some(at) = self.revealed_at
            && at.elapsed() >= self.rules.reveal_ttl()
        {
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use wordspy_core::net::protocol::decode_server_message;

    fn test_rules() -> GameTimingConfig {
        GameTimingConfig {
            turn_secs: 60,
            vote_timeout_secs: 60,
            category_vote_timeout_secs: 60,
            category_vote_enabled: false,
            reveal_ttl_secs: 60,
            empty_grace_secs: 60,
            chat_log_tail: 50,
        }
    }

    struct Harness {
        cmd_tx: mpsc::UnboundedSender<GameCommand>,
        relay: EventRelay,
        rxs: HashMap<String, mpsc::Receiver<Bytes>>,
        handle: JoinHandle<()>,
    }

    impl Harness {
        fn spawn(rules: GameTimingConfig, seed: u64) -> Self {
            let relay = EventRelay::new();
            let (_, cmd_tx, handle) = spawn_session(
                rules,
                "AB2CD3".to_string(),
                6,
                relay.clone(),
                Some(seed),
            );
            Self {
                cmd_tx,
                relay,
                rxs: HashMap::new(),
                handle,
            }
        }

        async fn join(&mut self, user: &str) -> Result<(), GameError> {
            let (tx, rx) = mpsc::channel(64);
            self.relay.subscribe(user, &format!("conn-{user}"), tx);
            self.rxs.insert(user.to_string(), rx);
            let (reply_tx, reply_rx) = oneshot::channel();
            self.cmd_tx
                .send(GameCommand::Join {
                    user_id: user.to_string(),
                    display_name: user.to_uppercase(),
                    connection_id: format!("conn-{user}"),
                    reply: reply_tx,
                })
                .unwrap();
            reply_rx.await.unwrap()
        }

        /// Read messages for `user` until one matches, failing on timeout.
        async fn expect<T>(
            &mut self,
            user: &str,
            mut pick: impl FnMut(ServerMessage) -> Option<T>,
        ) -> T {
            let rx = self.rxs.get_mut(user).expect("unknown user");
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    let data = rx.recv().await.expect("relay channel closed");
                    let msg = decode_server_message(&data).expect("bad wire data");
                    if let Some(out) = pick(msg) {
                        return out;
                    }
                }
            })
            .await
            .expect("timed out waiting for message")
        }

        fn send(&self, cmd: GameCommand) {
            self.cmd_tx.send(cmd).unwrap();
        }
    }

    async fn start_three_player_game(seed: u64) -> Harness {
        let mut h = Harness::spawn(test_rules(), seed);
        for user in ["u1", "u2", "u3"] {
            h.join(user).await.unwrap();
        }
        h.send(GameCommand::Start {
            user_id: "u1".to_string(),
        });
        h
    }

    #[tokio::test]
    async fn host_gets_created_then_joiner_gets_roster() {
        let mut h = Harness::spawn(test_rules(), 1);
        h.join("u1").await.unwrap();
        let created = h
            .expect("u1", |m| match m {
                ServerMessage::SpyGameCreated(c) => Some(c),
                _ => None,
            })
            .await;
        assert_eq!(created.room_code, "AB2CD3");
        assert_eq!(created.game.players.len(), 1);
        assert!(created.game.players[0].is_host);

        h.join("u2").await.unwrap();
        let joined = h
            .expect("u2", |m| match m {
                ServerMessage::SpyGameJoined(j) => Some(j),
                _ => None,
            })
            .await;
        assert_eq!(joined.game.players.len(), 2);
        assert_eq!(joined.game.players[1].position, 1);
        assert_eq!(joined.game.host_id, "u1");

        // Exactly one host on the roster
        assert_eq!(joined.game.players.iter().filter(|p| p.is_host).count(), 1);
    }

    #[tokio::test]
    async fn join_after_start_rejected() {
        let mut h = start_three_player_game(2).await;
        // Wait until the game has actually started for u1
        h.expect("u1", |m| match m {
            ServerMessage::DescriptionPhaseStarted(_) => Some(()),
            _ => None,
        })
        .await;
        let err = h.join("u9").await.unwrap_err();
        assert_eq!(err, GameError::AlreadyStarted);
    }

    #[tokio::test]
    async fn start_requires_host_and_two_players() {
        let mut h = Harness::spawn(test_rules(), 3);
        h.join("u1").await.unwrap();
        h.join("u2").await.unwrap();

        h.send(GameCommand::Start {
            user_id: "u2".to_string(),
        });
        let err = h
            .expect("u2", |m| match m {
                ServerMessage::SpyGameError(e) => Some(e),
                _ => None,
            })
            .await;
        assert_eq!(err.code, "not_host");

        // Two players is the minimum, so the host can start.
        h.send(GameCommand::Start {
            user_id: "u1".to_string(),
        });
        let turn = h
            .expect("u1", |m| match m {
                ServerMessage::DescriptionPhaseStarted(t) => Some(t),
                _ => None,
            })
            .await;
        assert_eq!(turn.current_turn, 0);
        assert_eq!(turn.player_id, "u1");
    }

    #[tokio::test]
    async fn start_with_one_player_rejected() {
        let mut h = Harness::spawn(test_rules(), 4);
        h.join("u1").await.unwrap();
        h.send(GameCommand::Start {
            user_id: "u1".to_string(),
        });
        let err = h
            .expect("u1", |m| match m {
                ServerMessage::SpyGameError(e) => Some(e),
                _ => None,
            })
            .await;
        assert_eq!(err.code, "not_enough_players");
    }

    #[tokio::test]
    async fn words_assigned_with_exactly_one_spy() {
        let mut h = start_three_player_game(5).await;
        let mut words = Vec::new();
        for user in ["u1", "u2", "u3"] {
            let w = h
                .expect(user, |m| match m {
                    ServerMessage::WordAssigned(w) => Some(w.word),
                    _ => None,
                })
                .await;
            words.push(w);
        }
        let distinct: std::collections::HashSet<_> = words.iter().collect();
        assert_eq!(distinct.len(), 2, "two distinct words: {words:?}");
        let minority = words
            .iter()
            .filter(|w| words.iter().filter(|x| x == w).count() == 1)
            .count();
        assert_eq!(minority, 1, "exactly one spy word: {words:?}");
    }

    #[tokio::test]
    async fn turn_order_follows_join_order_then_voting() {
        let mut h = start_three_player_game(6).await;
        for (i, user) in ["u1", "u2", "u3"].iter().enumerate() {
            let turn = h
                .expect("u1", |m| match m {
                    ServerMessage::DescriptionPhaseStarted(t) => Some(t),
                    _ => None,
                })
                .await;
            assert_eq!(turn.current_turn, i);
            assert_eq!(turn.player_id, *user);
            assert!(turn.deadline_ms > 0);
            h.send(GameCommand::SubmitDescription {
                user_id: user.to_string(),
                description: format!("description from {user}"),
            });
            let desc = h
                .expect("u1", |m| match m {
                    ServerMessage::DescriptionSubmitted(d) => Some(d),
                    _ => None,
                })
                .await;
            assert_eq!(desc.player_id, *user);
            assert!(!desc.skipped);
        }
        h.expect("u1", |m| match m {
            ServerMessage::VotingStarted(_) => Some(()),
            _ => None,
        })
        .await;
    }

    #[tokio::test]
    async fn out_of_turn_description_rejected() {
        let mut h = start_three_player_game(7).await;
        h.expect("u2", |m| match m {
            ServerMessage::DescriptionPhaseStarted(_) => Some(()),
            _ => None,
        })
        .await;
        // Turn 0 belongs to u1; u2 may not submit.
        h.send(GameCommand::SubmitDescription {
            user_id: "u2".to_string(),
            description: "too eager".to_string(),
        });
        let err = h
            .expect("u2", |m| match m {
                ServerMessage::SpyGameError(e) => Some(e),
                _ => None,
            })
            .await;
        assert_eq!(err.code, "not_your_turn");
    }

    #[tokio::test]
    async fn expired_turn_auto_advances_with_skip() {
        let rules = GameTimingConfig {
            turn_secs: 1,
            ..test_rules()
        };
        let mut h = Harness::spawn(rules, 8);
        h.join("u1").await.unwrap();
        h.join("u2").await.unwrap();
        h.send(GameCommand::Start {
            user_id: "u1".to_string(),
        });

        // u1 never submits; the turn must advance on its own.
        let skipped = h
            .expect("u2", |m| match m {
                ServerMessage::DescriptionSubmitted(d) => Some(d),
                _ => None,
            })
            .await;
        assert_eq!(skipped.player_id, "u1");
        assert!(skipped.skipped);
        assert!(skipped.description.is_empty());

        let turn = h
            .expect("u2", |m| match m {
                ServerMessage::DescriptionPhaseStarted(t) => Some(t),
                _ => None,
            })
            .await;
        assert_eq!(turn.player_id, "u2");
    }

    #[tokio::test]
    async fn disconnected_player_turn_skipped_immediately() {
        let mut h = start_three_player_game(9).await;
        h.expect("u2", |m| match m {
            ServerMessage::DescriptionPhaseStarted(_) => Some(()),
            _ => None,
        })
        .await;

        // u1 holds the turn and drops; no timeout wait, straight to u2.
        h.send(GameCommand::Disconnected {
            user_id: "u1".to_string(),
            connection_id: "conn-u1".to_string(),
        });
        let skipped = h
            .expect("u2", |m| match m {
                ServerMessage::DescriptionSubmitted(d) => Some(d),
                _ => None,
            })
            .await;
        assert_eq!(skipped.player_id, "u1");
        assert!(skipped.skipped);
        let turn = h
            .expect("u2", |m| match m {
                ServerMessage::DescriptionPhaseStarted(t) => Some(t),
                _ => None,
            })
            .await;
        assert_eq!(turn.player_id, "u2");
    }

    async fn play_through_descriptions(h: &mut Harness, users: &[&str]) {
        for user in users {
            h.expect(users[0], |m| match m {
                ServerMessage::DescriptionPhaseStarted(t) if t.player_id == *user => Some(()),
                _ => None,
            })
            .await;
            h.send(GameCommand::SubmitDescription {
                user_id: user.to_string(),
                description: "a word".to_string(),
            });
        }
        h.expect(users[0], |m| match m {
            ServerMessage::VotingStarted(_) => Some(()),
            _ => None,
        })
        .await;
    }

    #[tokio::test]
    async fn unanimous_vote_ends_game_before_timeout() {
        let mut h = start_three_player_game(10).await;
        play_through_descriptions(&mut h, &["u1", "u2", "u3"]).await;

        for voter in ["u1", "u2", "u3"] {
            h.send(GameCommand::SubmitVote {
                user_id: voter.to_string(),
                voted_for_id: "u3".to_string(),
            });
        }
        // vote_timeout is 60s; arrival of the result proves early resolution.
        let ended = h
            .expect("u1", |m| match m {
                ServerMessage::SpyGameEnded(e) => Some(e),
                _ => None,
            })
            .await;
        assert_eq!(ended.ejected_id.as_deref(), Some("u3"));
        assert_eq!(ended.votes.len(), 3);
        let expected = if ended.spy_id == "u3" {
            Winner::Villagers
        } else {
            Winner::Spy
        };
        assert_eq!(ended.winner, expected);
        assert_eq!(ended.words.len(), 3);
        assert_eq!(ended.words.iter().filter(|w| w.was_spy).count(), 1);
    }

    #[tokio::test]
    async fn revote_replaces_previous_ballot() {
        let mut h = Harness::spawn(test_rules(), 11);
        h.join("u1").await.unwrap();
        h.join("u2").await.unwrap();
        h.send(GameCommand::Start {
            user_id: "u1".to_string(),
        });
        play_through_descriptions(&mut h, &["u1", "u2"]).await;

        // u1 votes u1, then changes to u2; u2 votes u2. Result: u2 ejected 2-0.
        h.send(GameCommand::SubmitVote {
            user_id: "u1".to_string(),
            voted_for_id: "u1".to_string(),
        });
        h.send(GameCommand::SubmitVote {
            user_id: "u1".to_string(),
            voted_for_id: "u2".to_string(),
        });
        h.send(GameCommand::SubmitVote {
            user_id: "u2".to_string(),
            voted_for_id: "u2".to_string(),
        });
        let ended = h
            .expect("u1", |m| match m {
                ServerMessage::SpyGameEnded(e) => Some(e),
                _ => None,
            })
            .await;
        assert_eq!(ended.ejected_id.as_deref(), Some("u2"));
        assert_eq!(ended.votes.len(), 2);
        assert!(ended.votes.iter().all(|v| v.voted_for_id == "u2"));
    }

    #[tokio::test]
    async fn vote_timeout_with_no_ballots_means_spy_survives() {
        let rules = GameTimingConfig {
            vote_timeout_secs: 1,
            ..test_rules()
        };
        let mut h = Harness::spawn(rules, 12);
        h.join("u1").await.unwrap();
        h.join("u2").await.unwrap();
        h.send(GameCommand::Start {
            user_id: "u1".to_string(),
        });
        play_through_descriptions(&mut h, &["u1", "u2"]).await;

        // Nobody votes; after the window the spy wins by default.
        let ended = h
            .expect("u1", |m| match m {
                ServerMessage::SpyGameEnded(e) => Some(e),
                _ => None,
            })
            .await;
        assert_eq!(ended.winner, Winner::Spy);
        assert_eq!(ended.ejected_id, None);
        assert!(ended.votes.is_empty());
    }

    #[tokio::test]
    async fn invalid_vote_target_rejected() {
        let mut h = start_three_player_game(13).await;
        play_through_descriptions(&mut h, &["u1", "u2", "u3"]).await;
        h.send(GameCommand::SubmitVote {
            user_id: "u1".to_string(),
            voted_for_id: "ghost".to_string(),
        });
        let err = h
            .expect("u1", |m| match m {
                ServerMessage::SpyGameError(e) => Some(e),
                _ => None,
            })
            .await;
        assert_eq!(err.code, "invalid_vote_target");
    }

    #[tokio::test]
    async fn category_vote_majority_picks_category() {
        let rules = GameTimingConfig {
            category_vote_enabled: true,
            ..test_rules()
        };
        let mut h = Harness::spawn(rules, 14);
        h.join("u1").await.unwrap();
        h.join("u2").await.unwrap();
        h.join("u3").await.unwrap();
        h.send(GameCommand::Start {
            user_id: "u1".to_string(),
        });

        let started = h
            .expect("u1", |m| match m {
                ServerMessage::CategoryVoteStarted(c) => Some(c),
                _ => None,
            })
            .await;
        assert_eq!(started.categories.last().unwrap().id, RANDOM_CATEGORY_ID);

        for voter in ["u1", "u2"] {
            h.send(GameCommand::SubmitCategoryVote {
                user_id: voter.to_string(),
                category_id: "animals".to_string(),
            });
        }
        h.send(GameCommand::SubmitCategoryVote {
            user_id: "u3".to_string(),
            category_id: "food".to_string(),
        });

        let result = h
            .expect("u1", |m| match m {
                ServerMessage::CategoryVoteResult(r) => Some(r),
                _ => None,
            })
            .await;
        assert_eq!(result.category_id, "animals");

        // Category resolution flows straight into the description phase.
        h.expect("u1", |m| match m {
            ServerMessage::DescriptionPhaseStarted(_) => Some(()),
            _ => None,
        })
        .await;
    }

    #[tokio::test]
    async fn category_vote_timeout_falls_back_to_random_pick() {
        let rules = GameTimingConfig {
            category_vote_enabled: true,
            category_vote_timeout_secs: 1,
            ..test_rules()
        };
        let mut h = Harness::spawn(rules, 15);
        h.join("u1").await.unwrap();
        h.join("u2").await.unwrap();
        h.send(GameCommand::Start {
            user_id: "u1".to_string(),
        });

        let result = h
            .expect("u1", |m| match m {
                ServerMessage::CategoryVoteResult(r) => Some(r),
                _ => None,
            })
            .await;
        assert!(words::find_category(&result.category_id).is_some());
    }

    #[tokio::test]
    async fn category_vote_resolves_when_last_holdout_disconnects() {
        let rules = GameTimingConfig {
            category_vote_enabled: true,
            ..test_rules()
        };
        let mut h = Harness::spawn(rules, 19);
        h.join("u1").await.unwrap();
        h.join("u2").await.unwrap();
        h.join("u3").await.unwrap();
        h.send(GameCommand::Start {
            user_id: "u1".to_string(),
        });

        for voter in ["u1", "u2"] {
            h.send(GameCommand::SubmitCategoryVote {
                user_id: voter.to_string(),
                category_id: "places".to_string(),
            });
        }
        // u3 never votes; once they drop, every connected player has a
        // ballot and the vote must resolve without waiting out the window.
        h.send(GameCommand::Disconnected {
            user_id: "u3".to_string(),
            connection_id: "conn-u3".to_string(),
        });

        let result = h
            .expect("u1", |m| match m {
                ServerMessage::CategoryVoteResult(r) => Some(r),
                _ => None,
            })
            .await;
        assert_eq!(result.category_id, "places");
    }

    #[tokio::test]
    async fn chat_echo_carries_correlation_id() {
        let mut h = Harness::spawn(test_rules(), 16);
        h.join("u1").await.unwrap();
        h.join("u2").await.unwrap();

        h.send(GameCommand::Chat {
            user_id: "u1".to_string(),
            message: "hello room".to_string(),
            client_msg_id: Some("local-7".to_string()),
        });
        for user in ["u1", "u2"] {
            let received = h
                .expect(user, |m| match m {
                    ServerMessage::ChatMessageReceived(c) => Some(c),
                    _ => None,
                })
                .await;
            assert_eq!(received.message.body, "hello room");
            assert_eq!(received.message.kind, ChatKind::Chat);
            assert_eq!(received.client_msg_id.as_deref(), Some("local-7"));
        }
    }

    #[tokio::test]
    async fn reconnect_gets_snapshot_and_word() {
        let mut h = start_three_player_game(17).await;
        h.expect("u1", |m| match m {
            ServerMessage::DescriptionPhaseStarted(_) => Some(()),
            _ => None,
        })
        .await;

        h.send(GameCommand::Disconnected {
            user_id: "u2".to_string(),
            connection_id: "conn-u2".to_string(),
        });
        // Rejoin mid-game with the same userId
        h.join("u2").await.unwrap();
        let joined = h
            .expect("u2", |m| match m {
                ServerMessage::SpyGameJoined(j) => Some(j),
                _ => None,
            })
            .await;
        assert_eq!(joined.game.phase, GamePhase::Describing);
        assert_eq!(joined.game.players.len(), 3);
        let me = joined.game.players.iter().find(|p| p.user_id == "u2").unwrap();
        assert_eq!(me.position, 1);
        assert!(me.is_connected());
        // Snapshot carries the armed deadline but never the words
        assert!(joined.game.turn_deadline_ms.is_some());
        assert_eq!(joined.game.audio_grant.as_deref(), Some("u1"));

        h.expect("u2", |m| match m {
            ServerMessage::WordAssigned(_) => Some(()),
            _ => None,
        })
        .await;
    }

    #[tokio::test]
    async fn reveal_session_evicted_after_ttl() {
        let rules = GameTimingConfig {
            reveal_ttl_secs: 1,
            vote_timeout_secs: 1,
            ..test_rules()
        };
        let mut h = Harness::spawn(rules, 18);
        h.join("u1").await.unwrap();
        h.join("u2").await.unwrap();
        h.send(GameCommand::Start {
            user_id: "u1".to_string(),
        });
        play_through_descriptions(&mut h, &["u1", "u2"]).await;
        h.expect("u1", |m| match m {
            ServerMessage::SpyGameEnded(_) => Some(()),
            _ => None,
        })
        .await;

        // The task must exit on its own shortly after the TTL.
        tokio::time::timeout(Duration::from_secs(5), h.handle)
            .await
            .expect("session task did not exit after reveal TTL")
            .unwrap();
    }
}
