//! Per-match kill, death and ping counters.

use crate::error::SessionError;
use shared::{rank_standings, Change, ParticipantId, Replicated, StatisticsRow};

/// Statistics for every participant registered in the current match.
///
/// Rows are kept in registration order and committed through a
/// [`Replicated`] list. A kill touches two rows in one commit, so no reader
/// or observer ever sees the killer's increment without the victim's.
pub struct StatisticsLedger {
    rows: Replicated<Vec<StatisticsRow>>,
}

impl Default for StatisticsLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsLedger {
    pub fn new() -> Self {
        Self {
            rows: Replicated::authority(Vec::new()),
        }
    }

    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: FnMut(&Change<'_, Vec<StatisticsRow>>) + Send + 'static,
    {
        self.rows.subscribe(callback);
    }

    pub fn register_participant(
        &mut self,
        id: ParticipantId,
        name: &str,
    ) -> Result<(), SessionError> {
        if self.index_of(id).is_some() {
            return Err(SessionError::InvariantViolation(format!(
                "statistics for participant {} registered twice",
                id
            )));
        }
        let row = StatisticsRow::new(id, name);
        self.rows.modify(|rows| rows.push(row))?;
        Ok(())
    }

    /// Credits `killer` with a kill and `victim` with a death in one commit.
    ///
    /// Both ids are checked first; if either is unknown nothing changes.
    pub fn record_kill(
        &mut self,
        killer: ParticipantId,
        victim: ParticipantId,
    ) -> Result<(), SessionError> {
        let killer_index = self.index_of(killer).ok_or(SessionError::NotFound(killer))?;
        let victim_index = self.index_of(victim).ok_or(SessionError::NotFound(victim))?;

        self.rows.modify(|rows| {
            rows[killer_index].kills += 1;
            rows[victim_index].deaths += 1;
        })?;
        Ok(())
    }

    pub fn update_ping(&mut self, id: ParticipantId, ping_ms: u32) -> Result<(), SessionError> {
        let index = self.index_of(id).ok_or(SessionError::NotFound(id))?;
        if self.rows.get()[index].ping_ms == ping_ms {
            return Ok(());
        }
        self.rows.modify(|rows| rows[index].ping_ms = ping_ms)?;
        Ok(())
    }

    pub fn get(&self, id: ParticipantId) -> Option<&StatisticsRow> {
        self.rows.get().iter().find(|row| row.participant_id == id)
    }

    /// Rows in registration order.
    pub fn rows(&self) -> &[StatisticsRow] {
        self.rows.get()
    }

    /// Rows ordered by kills, highest first; ties keep registration order.
    pub fn ranked_snapshot(&self) -> Vec<StatisticsRow> {
        rank_standings(self.rows.get())
    }

    pub fn revision(&self) -> u64 {
        self.rows.revision()
    }

    pub fn len(&self) -> usize {
        self.rows.get().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.get().is_empty()
    }

    fn index_of(&self, id: ParticipantId) -> Option<usize> {
        self.rows.get().iter().position(|row| row.participant_id == id)
    }
}
