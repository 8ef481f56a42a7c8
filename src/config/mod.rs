//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::game::clues::CLUES;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (empty = any origin)
    pub client_origins: Vec<String>,
    /// Directory holding the browser client. The client must speak the
    /// `{"event", "data"}` JSON framing of `/ws`, not Socket.IO.
    pub static_dir: PathBuf,
    /// Max inbound WebSocket messages per second per connection
    pub input_rate_limit: u32,
    /// Match tuning
    pub match_settings: MatchSettings,
}

/// Tunables for a single match. Defaults are the shipped game rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchSettings {
    pub min_players: usize,
    pub max_players: usize,
    pub countdown_secs: u32,
    pub elimination_cooldown: Duration,
    pub return_to_lobby_delay: Duration,
    /// Distinct clues a single spy must solve to win
    pub clues_to_win: usize,
    pub max_name_len: usize,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            min_players: 3,
            max_players: 7,
            countdown_secs: 10,
            elimination_cooldown: Duration::from_millis(60_000),
            return_to_lobby_delay: Duration::from_millis(3_000),
            clues_to_win: 3,
            max_name_len: 32,
        }
    }
}

impl MatchSettings {
    /// Load match tuning, falling back to the defaults for unset variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let settings = Self {
            min_players: read_env("MIN_PLAYERS", defaults.min_players)?,
            max_players: read_env("MAX_PLAYERS", defaults.max_players)?,
            countdown_secs: read_env("COUNTDOWN_SECS", defaults.countdown_secs)?,
            elimination_cooldown: Duration::from_millis(read_env(
                "ELIMINATION_COOLDOWN_MS",
                defaults.elimination_cooldown.as_millis() as u64,
            )?),
            return_to_lobby_delay: Duration::from_millis(read_env(
                "RETURN_TO_LOBBY_DELAY_MS",
                defaults.return_to_lobby_delay.as_millis() as u64,
            )?),
            clues_to_win: read_env("CLUES_TO_WIN", defaults.clues_to_win)?,
            max_name_len: read_env("MAX_NAME_LEN", defaults.max_name_len)?,
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_players < 2 {
            return Err(ConfigError::InvalidMatchSettings(
                "MIN_PLAYERS must be at least 2 (one killer, one spy)".to_string(),
            ));
        }
        if self.max_players < self.min_players {
            return Err(ConfigError::InvalidMatchSettings(format!(
                "MAX_PLAYERS ({}) is below MIN_PLAYERS ({})",
                self.max_players, self.min_players
            )));
        }
        if self.clues_to_win == 0 || self.clues_to_win > CLUES.len() {
            return Err(ConfigError::InvalidMatchSettings(format!(
                "CLUES_TO_WIN must be between 1 and {}",
                CLUES.len()
            )));
        }
        if self.max_name_len == 0 {
            return Err(ConfigError::InvalidMatchSettings(
                "MAX_NAME_LEN must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        };

        let client_origins = env::var("CLIENT_ORIGIN")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            client_origins,

            static_dir: env::var("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("public")),

            input_rate_limit: read_env("INPUT_RATE_LIMIT", 60)?,

            match_settings: MatchSettings::from_env()?,
        })
    }
}

#[cfg(test)]
impl Config {
    /// Loopback config with default match rules, independent of the environment
    pub fn for_tests() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_level: "debug".to_string(),
            client_origins: Vec::new(),
            static_dir: PathBuf::from("public"),
            input_rate_limit: 60,
            match_settings: MatchSettings::default(),
        }
    }
}

fn read_env<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Environment variable {0} is not a valid number")]
    InvalidNumber(&'static str),

    #[error("Invalid match settings: {0}")]
    InvalidMatchSettings(String),
}
