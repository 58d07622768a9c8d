use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use wordspy_core::room_code::{generate_room_code, is_valid_room_code, normalize_room_code};

use crate::config::GameTimingConfig;
use crate::error::GameError;
use crate::game_loop::{GameCommand, spawn_session};
use crate::relay::EventRelay;
use crate::state::SharedDirectory;

/// Retries for drawing an unclaimed room code before giving up. The
/// code space holds ~880M combinations, so hitting this limit means
/// something is very wrong.
const MAX_CODE_ATTEMPTS: usize = 32;

/// Directory entry for a live session: the address of its task plus its
/// private event relay. Cheap to clone out from under the directory
/// lock; all interaction goes through `cmd_tx`.
pub struct SessionHandle {
    pub session_id: String,
    pub room_code: String,
    pub cmd_tx: mpsc::UnboundedSender<GameCommand>,
    pub relay: EventRelay,
}

/// Maps room codes and session ids to live sessions. A code stays
/// claimed for a session's whole lifetime and is released only when its
/// task exits.
#[derive(Default)]
pub struct SessionDirectory {
    by_code: HashMap<String, Arc<SessionHandle>>,
    by_id: HashMap<String, Arc<SessionHandle>>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a session by user-supplied room code. Input is
    /// normalized (trimmed, uppercased) before the lookup.
    pub fn resolve(&self, raw_code: &str) -> Option<Arc<SessionHandle>> {
        let code = normalize_room_code(raw_code);
        if !is_valid_room_code(&code) {
            return None;
        }
        self.by_code.get(&code).map(Arc::clone)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.by_id.get(session_id).map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    fn insert(&mut self, handle: Arc<SessionHandle>) {
        self.by_code
            .insert(handle.room_code.clone(), Arc::clone(&handle));
        self.by_id.insert(handle.session_id.clone(), handle);
    }

    fn remove(&mut self, session_id: &str) {
        if let Some(handle) = self.by_id.remove(session_id) {
            self.by_code.remove(&handle.room_code);
        }
    }
}

/// Create a new session: claim a unique room code, spawn the session
/// task, and register it. A watcher task removes the directory entry
/// (releasing the code) when the session task exits for any reason.
pub async fn create_session(
    dir: &SharedDirectory,
    rules: GameTimingConfig,
    max_players: u8,
    seed: Option<u64>,
) -> Result<Arc<SessionHandle>, GameError> {
    if max_players != 6 && max_players != 8 {
        return Err(GameError::InvalidMaxPlayers(max_players));
    }

    let mut guard = dir.write().await;
    let mut room_code = None;
    for _ in 0..MAX_CODE_ATTEMPTS {
        let candidate = generate_room_code();
        if !guard.by_code.contains_key(&candidate) {
            room_code = Some(candidate);
            break;
        }
    }
    let Some(room_code) = room_code else {
        tracing::error!(
            active = guard.len(),
            "Could not draw an unclaimed room code"
        );
        return Err(GameError::CodeExhausted);
    };

    let relay = EventRelay::new();
    let (session_id, cmd_tx, task) =
        spawn_session(rules, room_code.clone(), max_players, relay.clone(), seed);
    let handle = Arc::new(SessionHandle {
        session_id: session_id.clone(),
        room_code: room_code.clone(),
        cmd_tx,
        relay,
    });
    guard.insert(Arc::clone(&handle));
    let active = guard.len();
    drop(guard);

    tracing::info!(room = %room_code, session_id, active, "Session created");

    let dir = Arc::clone(dir);
    tokio::spawn(async move {
        let _ = task.await;
        dir.write().await.remove(&session_id);
        tracing::debug!(session_id, "Directory entry removed");
    });

    Ok(handle)
}
