//! Server-owned values mirrored to observers.
//!
//! A [`Replicated`] value lives on both sides of the connection. The authority
//! holds the canonical copy and is the only side allowed to [`Replicated::set`]
//! it; observers keep a mirror that is advanced with
//! [`Replicated::apply_remote`] as deltas arrive. Every committed change bumps
//! the value's revision and is reported to subscribers exactly once, in commit
//! order.
//!
//! Revisions start at 1 on the authority and at 0 on observers, so the first
//! delta an observer sees (live or replayed) always applies.

use std::fmt;
use thiserror::Error;

/// Which side of the session a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Authority,
    Observer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Authority => write!(f, "authority"),
            Role::Observer => write!(f, "observer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    #[error("{role} may not perform this mutation")]
    Unauthorized { role: Role },
}

/// A committed change as seen by subscribers.
#[derive(Debug)]
pub struct Change<'a, T> {
    pub revision: u64,
    pub previous: &'a T,
    pub current: &'a T,
}

type Subscriber<T> = Box<dyn FnMut(&Change<'_, T>) + Send>;

pub struct Replicated<T> {
    role: Role,
    value: T,
    revision: u64,
    subscribers: Vec<Subscriber<T>>,
}

impl<T: Clone> Replicated<T> {
    /// Canonical copy owned by the authority.
    pub fn authority(initial: T) -> Self {
        Self {
            role: Role::Authority,
            value: initial,
            revision: 1,
            subscribers: Vec::new(),
        }
    }

    /// Mirror that follows the authority through [`Self::apply_remote`].
    pub fn observer(initial: T) -> Self {
        Self {
            role: Role::Observer,
            value: initial,
            revision: 0,
            subscribers: Vec::new(),
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Registers a callback run after every committed change.
    ///
    /// Callbacks registered on the authority fire for its own writes too.
    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: FnMut(&Change<'_, T>) + Send + 'static,
    {
        self.subscribers.push(Box::new(callback));
    }

    /// Replaces the canonical value and notifies subscribers once.
    pub fn set(&mut self, value: T) -> Result<(), ReplicationError> {
        if self.role != Role::Authority {
            return Err(ReplicationError::Unauthorized { role: self.role });
        }
        self.commit(self.revision + 1, value);
        Ok(())
    }

    /// Edits a copy of the value and commits it as a single change.
    ///
    /// Used where several fields must become visible together.
    pub fn modify<F>(&mut self, edit: F) -> Result<(), ReplicationError>
    where
        F: FnOnce(&mut T),
    {
        if self.role != Role::Authority {
            return Err(ReplicationError::Unauthorized { role: self.role });
        }
        let mut next = self.value.clone();
        edit(&mut next);
        self.commit(self.revision + 1, next);
        Ok(())
    }

    /// Applies a delta received from the authority.
    ///
    /// Returns `Ok(false)` for a revision that is not newer than the mirror,
    /// which covers both duplicates and datagrams that arrived out of order.
    pub fn apply_remote(&mut self, revision: u64, value: T) -> Result<bool, ReplicationError> {
        if self.role != Role::Observer {
            return Err(ReplicationError::Unauthorized { role: self.role });
        }
        if revision <= self.revision {
            return Ok(false);
        }
        self.commit(revision, value);
        Ok(true)
    }

    fn commit(&mut self, revision: u64, value: T) {
        let previous = std::mem::replace(&mut self.value, value);
        self.revision = revision;

        let change = Change {
            revision,
            previous: &previous,
            current: &self.value,
        };
        for subscriber in self.subscribers.iter_mut() {
            subscriber(&change);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Replicated<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replicated")
            .field("role", &self.role)
            .field("value", &self.value)
            .field("revision", &self.revision)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
