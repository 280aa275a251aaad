//! Command-line configuration for the server and the session it hosts.

use crate::victory::VictoryCondition;
use clap::Parser;
use shared::{
    Vec2, DEFAULT_FIRE_COOLDOWN_MS, DEFAULT_HIT_DAMAGE, DEFAULT_LOBBY_CAPACITY,
    DEFAULT_LOBBY_COUNTDOWN_SECS, DEFAULT_MATCH_DURATION_SECS, DEFAULT_MAX_KILLS,
    DEFAULT_MIN_PARTICIPANTS, DEFAULT_SPAWN_COOLDOWN_SECS, DEFAULT_TICK_RATE,
};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("lobby capacity must be at least 1")]
    ZeroCapacity,
    #[error("minimum participants ({min}) must be between 1 and the lobby capacity ({capacity})")]
    InvalidMinimum { min: usize, capacity: usize },
    #[error("{0} countdown must be at least one second")]
    ZeroCountdown(&'static str),
    #[error("at least one spawn point is required")]
    NoSpawnPoints,
    #[error("tick rate must be between 1 and 1000 Hz")]
    InvalidTickRate,
    #[error("invalid spawn point '{0}', expected 'x,y'")]
    InvalidSpawnPoint(String),
}

/// Rules for a single session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub lobby_capacity: usize,
    pub min_participants: usize,
    pub lobby_countdown_secs: u32,
    pub match_duration_secs: u32,
    pub victory_conditions: Vec<VictoryCondition>,
    pub spawn_points: Vec<Vec2>,
    pub spawn_cooldown: Duration,
    pub fire_cooldown: Duration,
    pub hit_damage: u32,
    pub rng_seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lobby_capacity: DEFAULT_LOBBY_CAPACITY,
            min_participants: DEFAULT_MIN_PARTICIPANTS,
            lobby_countdown_secs: DEFAULT_LOBBY_COUNTDOWN_SECS,
            match_duration_secs: DEFAULT_MATCH_DURATION_SECS,
            victory_conditions: vec![
                VictoryCondition::CountdownZero,
                VictoryCondition::MaxKills(DEFAULT_MAX_KILLS),
            ],
            spawn_points: default_spawn_points(),
            spawn_cooldown: Duration::from_secs(DEFAULT_SPAWN_COOLDOWN_SECS),
            fire_cooldown: Duration::from_millis(DEFAULT_FIRE_COOLDOWN_MS),
            hit_damage: DEFAULT_HIT_DAMAGE,
            rng_seed: None,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lobby_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.min_participants == 0 || self.min_participants > self.lobby_capacity {
            return Err(ConfigError::InvalidMinimum {
                min: self.min_participants,
                capacity: self.lobby_capacity,
            });
        }
        if self.lobby_countdown_secs == 0 {
            return Err(ConfigError::ZeroCountdown("lobby"));
        }
        if self.match_duration_secs == 0 {
            return Err(ConfigError::ZeroCountdown("match"));
        }
        if self.spawn_points.is_empty() {
            return Err(ConfigError::NoSpawnPoints);
        }
        Ok(())
    }
}

/// Six points spread across the default arena floor and ledges.
pub fn default_spawn_points() -> Vec<Vec2> {
    vec![
        Vec2::new(-12.0, 0.0),
        Vec2::new(-6.0, 4.0),
        Vec2::new(0.0, 0.0),
        Vec2::new(6.0, 4.0),
        Vec2::new(12.0, 0.0),
        Vec2::new(0.0, 8.0),
    ]
}

fn parse_spawn_point(raw: &str) -> Result<Vec2, ConfigError> {
    let invalid = || ConfigError::InvalidSpawnPoint(raw.to_string());
    let (x, y) = raw.split_once(',').ok_or_else(invalid)?;
    let x = x.trim().parse::<f32>().map_err(|_| invalid())?;
    let y = y.trim().parse::<f32>().map_err(|_| invalid())?;
    Ok(Vec2::new(x, y))
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Authoritative arena session server", long_about = None)]
pub struct ServerArgs {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value_t = DEFAULT_TICK_RATE)]
    pub tick_rate: u32,

    /// Maximum participants in the lobby
    #[arg(long, default_value_t = DEFAULT_LOBBY_CAPACITY)]
    pub capacity: usize,

    /// Participants required before the lobby countdown starts
    #[arg(long, default_value_t = DEFAULT_MIN_PARTICIPANTS)]
    pub min_players: usize,

    /// Lobby countdown in seconds
    #[arg(long, default_value_t = DEFAULT_LOBBY_COUNTDOWN_SECS)]
    pub lobby_countdown: u32,

    /// Match duration in seconds
    #[arg(long, default_value_t = DEFAULT_MATCH_DURATION_SECS)]
    pub match_duration: u32,

    /// Kills that end the match (0 disables the kill limit)
    #[arg(long, default_value_t = DEFAULT_MAX_KILLS)]
    pub max_kills: u32,

    /// Seconds a spawn point stays blocked after use
    #[arg(long, default_value_t = DEFAULT_SPAWN_COOLDOWN_SECS)]
    pub spawn_cooldown: u64,

    /// Spawn point as "x,y"; repeat for several (defaults to the built-in arena)
    #[arg(long = "spawn-point", value_name = "X,Y", allow_hyphen_values = true)]
    pub spawn_points: Vec<String>,

    /// Seed for spawn selection
    #[arg(long)]
    pub seed: Option<u64>,

    /// Seconds of silence before a client is dropped
    #[arg(long, default_value_t = 5)]
    pub client_timeout: u64,
}

impl ServerArgs {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_duration(&self) -> Result<Duration, ConfigError> {
        if self.tick_rate == 0 || self.tick_rate > 1000 {
            return Err(ConfigError::InvalidTickRate);
        }
        Ok(Duration::from_secs_f64(1.0 / self.tick_rate as f64))
    }

    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let spawn_points = if self.spawn_points.is_empty() {
            default_spawn_points()
        } else {
            self.spawn_points
                .iter()
                .map(|raw| parse_spawn_point(raw))
                .collect::<Result<Vec<_>, _>>()?
        };

        let mut victory_conditions = vec![VictoryCondition::CountdownZero];
        if self.max_kills > 0 {
            victory_conditions.push(VictoryCondition::MaxKills(self.max_kills));
        }

        let config = SessionConfig {
            lobby_capacity: self.capacity,
            min_participants: self.min_players,
            lobby_countdown_secs: self.lobby_countdown,
            match_duration_secs: self.match_duration,
            victory_conditions,
            spawn_points,
            spawn_cooldown: Duration::from_secs(self.spawn_cooldown),
            rng_seed: self.seed,
            ..SessionConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}
