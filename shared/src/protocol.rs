use crate::{Participant, ParticipantClass, ParticipantId, StatisticsRow, Vec2};
use bincode::{deserialize, serialize};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Intent {
        sequence: u32,
        intent: Intent,
    },
    Pong {
        nonce: u64,
    },
    Disconnect,

    Connected {
        participant_id: ParticipantId,
    },
    Rejected {
        reason: String,
    },
    Ping {
        nonce: u64,
    },
    Broadcast(Broadcast),
    Disconnected {
        reason: String,
    },
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Packet, bincode::Error> {
        deserialize(bytes)
    }
}

/// Client-originated request; the authority decides whether it applies.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Intent {
    Rename(String),
    SetClass(ParticipantClass),
    Move(Vec2),
    Jump,
    Fire(Vec2),
    Hook(Vec2),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPhase {
    #[default]
    Lobby,
    Active,
    Ended,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum Posture {
    #[default]
    Grounded,
    Jumping,
    Hooked,
}

/// Per-avatar state replicated while a match is running.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct AvatarState {
    pub health: u32,
    pub max_health: u32,
    pub posture: Posture,
}

impl AvatarState {
    pub fn full(max_health: u32) -> Self {
        Self {
            health: max_health,
            max_health,
            posture: Posture::Grounded,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    CountdownElapsed,
    KillLimitReached { leader: ParticipantId },
    Abandoned,
}

/// Current value of one replicated field.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Replica {
    Phase(MatchPhase),
    LobbyCountdown(Option<u32>),
    MatchCountdown(Option<u32>),
    Roster(Vec<Participant>),
    Statistics(Vec<StatisticsRow>),
    Avatar {
        participant_id: ParticipantId,
        state: AvatarState,
    },
}

/// Identifies the value a [`Replica`] belongs to; revisions are tracked per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicaKey {
    Phase,
    LobbyCountdown,
    MatchCountdown,
    Roster,
    Statistics,
    Avatar(ParticipantId),
}

impl Replica {
    pub fn key(&self) -> ReplicaKey {
        match self {
            Replica::Phase(_) => ReplicaKey::Phase,
            Replica::LobbyCountdown(_) => ReplicaKey::LobbyCountdown,
            Replica::MatchCountdown(_) => ReplicaKey::MatchCountdown,
            Replica::Roster(_) => ReplicaKey::Roster,
            Replica::Statistics(_) => ReplicaKey::Statistics,
            Replica::Avatar { participant_id, .. } => ReplicaKey::Avatar(*participant_id),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Delta {
    pub revision: u64,
    pub replica: Replica,
}

/// Everything the authority pushes to all observers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Broadcast {
    Delta(Delta),
    MatchEnded {
        reason: EndReason,
        standings: Vec<StatisticsRow>,
    },
}

impl Broadcast {
    pub fn delta(revision: u64, replica: Replica) -> Self {
        Broadcast::Delta(Delta { revision, replica })
    }
}
