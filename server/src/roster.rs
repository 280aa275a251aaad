//! Lobby roster: who is connected, in join order.
//!
//! The roster is the authoritative list of participants in a session. It
//! enforces the lobby capacity, hands out placeholder names, and applies the
//! name and class changes players request before the match starts. Every
//! change is committed through a [`Replicated`] list so observers receive one
//! roster delta per change.

use crate::error::SessionError;
use shared::{sanitize_name, Change, Participant, ParticipantClass, ParticipantId, Replicated};

pub struct Roster {
    capacity: usize,
    participants: Replicated<Vec<Participant>>,
}

impl Roster {
    /// Creates an empty roster that admits at most `capacity` participants.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            participants: Replicated::authority(Vec::new()),
        }
    }

    /// Registers a callback for every roster change.
    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: FnMut(&Change<'_, Vec<Participant>>) + Send + 'static,
    {
        self.participants.subscribe(callback);
    }

    /// Admits a newly connected participant.
    ///
    /// Capacity is checked before anything else, so a full lobby rejects the
    /// connection without touching the roster. On success the participant is
    /// appended with a placeholder name and the default class.
    pub fn join(&mut self, id: ParticipantId) -> Result<Participant, SessionError> {
        if self.participants.get().len() >= self.capacity {
            return Err(SessionError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        if self.contains(id) {
            return Err(SessionError::InvariantViolation(format!(
                "participant {} joined twice",
                id
            )));
        }

        let participant = Participant::new(id);
        let added = participant.clone();
        self.participants.modify(|list| list.push(added))?;
        Ok(participant)
    }

    /// Removes a participant; unknown ids are reported, not ignored.
    pub fn leave(&mut self, id: ParticipantId) -> Result<Participant, SessionError> {
        let index = self.index_of(id).ok_or(SessionError::NotFound(id))?;
        let removed = self.participants.get()[index].clone();
        self.participants.modify(|list| {
            list.remove(index);
        })?;
        Ok(removed)
    }

    pub fn rename(&mut self, id: ParticipantId, requested: &str) -> Result<(), SessionError> {
        let index = self.index_of(id).ok_or(SessionError::NotFound(id))?;
        let name = sanitize_name(requested).ok_or(SessionError::InvalidName)?;
        self.participants.modify(|list| list[index].name = name)?;
        Ok(())
    }

    pub fn set_class(
        &mut self,
        id: ParticipantId,
        class: ParticipantClass,
    ) -> Result<(), SessionError> {
        let index = self.index_of(id).ok_or(SessionError::NotFound(id))?;
        self.participants.modify(|list| list[index].class = class)?;
        Ok(())
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get().iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.index_of(id).is_some()
    }

    /// Read-only copy in join order.
    pub fn snapshot(&self) -> Vec<Participant> {
        self.participants.get().clone()
    }

    pub fn revision(&self) -> u64 {
        self.participants.revision()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.participants.get().len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.get().is_empty()
    }

    fn index_of(&self, id: ParticipantId) -> Option<usize> {
        self.participants.get().iter().position(|p| p.id == id)
    }
}
