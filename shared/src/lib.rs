//! Types shared by the authoritative server and its observers.
//!
//! Holds the wire protocol, the participant and statistics records that travel
//! inside it, the [`replicated::Replicated`] value both sides build their state
//! from, and the default tuning constants for a session.

pub mod protocol;
pub mod replicated;

use serde::{Deserialize, Serialize};

pub use protocol::{
    AvatarState, Broadcast, Delta, EndReason, Intent, MatchPhase, Packet, Posture, Replica,
    ReplicaKey, PROTOCOL_VERSION,
};
pub use replicated::{Change, Replicated, ReplicationError, Role};

pub const DEFAULT_LOBBY_CAPACITY: usize = 5;
pub const DEFAULT_MIN_PARTICIPANTS: usize = 2;
pub const DEFAULT_LOBBY_COUNTDOWN_SECS: u32 = 10;
pub const DEFAULT_MATCH_DURATION_SECS: u32 = 180;
pub const DEFAULT_MAX_KILLS: u32 = 10;
pub const DEFAULT_SPAWN_COOLDOWN_SECS: u64 = 3;
pub const DEFAULT_FIRE_COOLDOWN_MS: u64 = 1000;
pub const DEFAULT_HIT_DAMAGE: u32 = 1;
pub const DEFAULT_TICK_RATE: u32 = 30;

/// Names longer than this (in UTF-8 bytes) are truncated on a char boundary.
pub const MAX_NAME_BYTES: usize = 32;
/// Jumps available before touching the ground again.
pub const MAX_JUMPS: u8 = 2;

pub type ParticipantId = u32;

/// Simple 2D vector used for spawn positions and aim directions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Unit vector in the same direction, or zero for a zero vector.
    pub fn normalized(&self) -> Vec2 {
        let len = self.length();
        if len > 0.0 {
            Vec2::new(self.x / len, self.y / len)
        } else {
            Vec2::ZERO
        }
    }

    pub fn dot(&self, other: Vec2) -> f32 {
        self.x * other.x + self.y * other.y
    }

    pub fn scale(&self, factor: f32) -> Vec2 {
        Vec2::new(self.x * factor, self.y * factor)
    }

    pub fn add(&self, other: Vec2) -> Vec2 {
        Vec2::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(&self, other: Vec2) -> Vec2 {
        Vec2::new(self.x - other.x, self.y - other.y)
    }
}

/// Playable class picked in the lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ParticipantClass {
    #[default]
    Agile,
    Heavy,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassStats {
    pub max_health: u32,
    pub movement_speed: f32,
    pub bullet_speed: f32,
}

impl ParticipantClass {
    pub fn stats(&self) -> ClassStats {
        match self {
            ParticipantClass::Agile => ClassStats {
                max_health: 6,
                movement_speed: 3.4,
                bullet_speed: 3.0,
            },
            ParticipantClass::Heavy => ClassStats {
                max_health: 9,
                movement_speed: 2.6,
                bullet_speed: 2.4,
            },
        }
    }
}

impl std::str::FromStr for ParticipantClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agile" => Ok(ParticipantClass::Agile),
            "heavy" => Ok(ParticipantClass::Heavy),
            other => Err(format!("unknown class '{}'", other)),
        }
    }
}

/// One connected session as listed in the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub class: ParticipantClass,
}

impl Participant {
    /// Creates a participant with the placeholder name and the default class.
    pub fn new(id: ParticipantId) -> Self {
        Self {
            id,
            name: format!("Player {}", id),
            class: ParticipantClass::default(),
        }
    }
}

/// Trims a requested display name and bounds it to [`MAX_NAME_BYTES`].
///
/// Returns `None` when nothing printable is left.
pub fn sanitize_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut end = trimmed.len().min(MAX_NAME_BYTES);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    Some(trimmed[..end].trim_end().to_string())
}

/// Kill/death/ping counters for one participant in a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsRow {
    pub participant_id: ParticipantId,
    pub name: String,
    pub kills: u32,
    pub deaths: u32,
    pub ping_ms: u32,
}

impl StatisticsRow {
    pub fn new(participant_id: ParticipantId, name: impl Into<String>) -> Self {
        Self {
            participant_id,
            name: name.into(),
            kills: 0,
            deaths: 0,
            ping_ms: 0,
        }
    }

    /// Kills per death; with no deaths the kill count itself.
    pub fn kd_ratio(&self) -> f32 {
        if self.deaths == 0 {
            self.kills as f32
        } else {
            self.kills as f32 / self.deaths as f32
        }
    }
}

/// Orders rows by kills, highest first. Ties keep their incoming order.
pub fn rank_standings(rows: &[StatisticsRow]) -> Vec<StatisticsRow> {
    let mut ranked = rows.to_vec();
    ranked.sort_by(|a, b| b.kills.cmp(&a.kills));
    ranked
}

/// Formats a number of seconds as `m:ss`.
pub fn format_clock(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
