//! Errors raised by session operations.
//!
//! None of these end a session: the tick loop logs them at the severity their
//! kind implies and keeps running.

use shared::{ParticipantId, ReplicationError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("lobby is full ({capacity} participants)")]
    CapacityExceeded { capacity: usize },

    #[error("participant {0} not found")]
    NotFound(ParticipantId),

    #[error("mutation attempted by a non-authority")]
    UnauthorizedMutation,

    #[error("no spawn point available")]
    SpawnUnavailable,

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("lobby is closed")]
    LobbyClosed,

    #[error("name is empty")]
    InvalidName,
}

impl From<ReplicationError> for SessionError {
    fn from(err: ReplicationError) -> Self {
        match err {
            ReplicationError::Unauthorized { .. } => SessionError::UnauthorizedMutation,
        }
    }
}
