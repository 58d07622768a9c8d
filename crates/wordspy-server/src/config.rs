use std::time::Duration;

use serde::Deserialize;

/// Top-level server configuration, loaded from `wordspy.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub game: GameTimingConfig,
    pub limits: LimitsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            game: GameTimingConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// Gameplay clocks and lifecycle windows, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameTimingConfig {
    /// Length of one description turn.
    pub turn_secs: u64,
    /// Voting window before the tally resolves on whatever ballots exist.
    pub vote_timeout_secs: u64,
    /// Pre-game category vote window.
    pub category_vote_timeout_secs: u64,
    /// Whether `start` runs a category vote before the description phase.
    pub category_vote_enabled: bool,
    /// How long a finished (Reveal) session lingers before eviction.
    pub reveal_ttl_secs: u64,
    /// How long a session with zero connected players survives.
    pub empty_grace_secs: u64,
    /// Bounded chat log tail kept for reconnect snapshots.
    pub chat_log_tail: usize,
}

impl Default for GameTimingConfig {
    fn default() -> Self {
        Self {
            turn_secs: 20,
            vote_timeout_secs: 30,
            category_vote_timeout_secs: 15,
            category_vote_enabled: true,
            reveal_ttl_secs: 60,
            empty_grace_secs: 120,
            chat_log_tail: 100,
        }
    }
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    pub player_message_buffer: usize,
    pub ws_rate_limit_per_sec: f64,
    pub max_chat_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 500,
            player_message_buffer: 256,
            ws_rate_limit_per_sec: 20.0,
            max_chat_len: 1024,
        }
    }
}

impl GameTimingConfig {
    pub fn turn(&self) -> Duration {
        Duration::from_secs(self.turn_secs)
    }

    pub fn vote_timeout(&self) -> Duration {
        Duration::from_secs(self.vote_timeout_secs)
    }

    pub fn category_vote_timeout(&self) -> Duration {
        Duration::from_secs(self.category_vote_timeout_secs)
    }

    pub fn reveal_ttl(&self) -> Duration {
        Duration::from_secs(self.reveal_ttl_secs)
    }

    pub fn empty_grace(&self) -> Duration {
        Duration::from_secs(self.empty_grace_secs)
    }
}

impl ServerConfig {
    /// Validate configuration, exiting on fatal problems.
    pub fn validate(&self) {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            tracing::error!(
                addr = %self.listen_addr,
                "listen_addr is not a valid socket address"
            );
            std::process::exit(1);
        }
        if self.game.turn_secs == 0 {
            tracing::error!("game.turn_secs must be > 0");
            std::process::exit(1);
        }
        if self.game.vote_timeout_secs == 0 {
            tracing::error!("game.vote_timeout_secs must be > 0");
            std::process::exit(1);
        }
        if self.game.category_vote_timeout_secs == 0 {
            tracing::error!("game.category_vote_timeout_secs must be > 0");
            std::process::exit(1);
        }
        if self.game.chat_log_tail == 0 {
            tracing::error!("game.chat_log_tail must be > 0");
            std::process::exit(1);
        }
        if self.limits.max_ws_connections == 0 {
            tracing::error!("limits.max_ws_connections must be > 0");
            std::process::exit(1);
        }
        if self.limits.player_message_buffer == 0 {
            tracing::error!("limits.player_message_buffer must be > 0");
            std::process::exit(1);
        }
        if self.limits.ws_rate_limit_per_sec <= 0.0 {
            tracing::error!("limits.ws_rate_limit_per_sec must be > 0");
            std::process::exit(1);
        }
    }

    /// Load config from `wordspy.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("wordspy.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from wordspy.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse wordspy.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No wordspy.toml found, using defaults");
                ServerConfig::default()
            },
        };

        if let Ok(addr) = std::env::var("WORDSPY_LISTEN_ADDR")
            && !addr.is_empty()
        {
            config.listen_addr = addr;
        }
        if let Ok(val) = std::env::var("WORDSPY_TURN_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.game.turn_secs = n;
        }
        if let Ok(val) = std::env::var("WORDSPY_VOTE_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.game.vote_timeout_secs = n;
        }
        if let Ok(val) = std::env::var("WORDSPY_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.limits.max_ws_connections = n;
        }

        config
    }
}
