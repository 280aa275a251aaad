//! Observer-side mirror of the session's replicated values.
//!
//! Each value is an observer [`Replicated`] that only advances on a newer
//! revision, so duplicated or reordered datagrams are dropped here. Mirrors
//! report their changes through subscriptions into a queue that
//! [`ObserverState::present`] drains into a [`Presenter`].
//!
//! Match countdown deltas that arrive while the mirror still believes it is
//! in the lobby are held back until the `Active` phase has been seen, so the
//! clock never shows before the match has visibly started.

use crate::presentation::Presenter;
use shared::{
    rank_standings, AvatarState, Broadcast, Delta, EndReason, MatchPhase, Participant,
    ParticipantId, Replica, Replicated, ReplicationError, StatisticsRow,
};
use std::collections::HashMap;
use std::sync::mpsc;

/// A change the presenter should reflect.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    Phase(MatchPhase),
    LobbyCountdown(Option<u32>),
    MatchCountdown(Option<u32>),
    Roster(Vec<Participant>),
    Statistics(Vec<StatisticsRow>),
    Avatar {
        participant_id: ParticipantId,
        state: AvatarState,
    },
    MatchEnded {
        reason: EndReason,
        standings: Vec<StatisticsRow>,
    },
}

pub struct ObserverState {
    phase: Replicated<MatchPhase>,
    lobby_countdown: Replicated<Option<u32>>,
    match_countdown: Replicated<Option<u32>>,
    roster: Replicated<Vec<Participant>>,
    statistics: Replicated<Vec<StatisticsRow>>,
    avatars: HashMap<ParticipantId, Replicated<AvatarState>>,
    held_match_countdown: Option<(u64, Option<u32>)>,
    outcome: Option<(EndReason, Vec<StatisticsRow>)>,
    events_tx: mpsc::Sender<ViewEvent>,
    events_rx: mpsc::Receiver<ViewEvent>,
}

impl Default for ObserverState {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverState {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel();

        let mut phase = Replicated::observer(MatchPhase::Lobby);
        let tx = events_tx.clone();
        phase.subscribe(move |change| {
            let _ = tx.send(ViewEvent::Phase(*change.current));
        });

        let mut lobby_countdown = Replicated::observer(None);
        let tx = events_tx.clone();
        lobby_countdown.subscribe(move |change| {
            let _ = tx.send(ViewEvent::LobbyCountdown(*change.current));
        });

        let mut match_countdown = Replicated::observer(None);
        let tx = events_tx.clone();
        match_countdown.subscribe(move |change| {
            let _ = tx.send(ViewEvent::MatchCountdown(*change.current));
        });

        let mut roster = Replicated::observer(Vec::new());
        let tx = events_tx.clone();
        roster.subscribe(move |change| {
            let _ = tx.send(ViewEvent::Roster(change.current.clone()));
        });

        let mut statistics = Replicated::observer(Vec::new());
        let tx = events_tx.clone();
        statistics.subscribe(move |change| {
            let _ = tx.send(ViewEvent::Statistics(change.current.clone()));
        });

        Self {
            phase,
            lobby_countdown,
            match_countdown,
            roster,
            statistics,
            avatars: HashMap::new(),
            held_match_countdown: None,
            outcome: None,
            events_tx,
            events_rx,
        }
    }

    /// Applies one broadcast. Returns whether anything changed.
    pub fn apply(&mut self, broadcast: Broadcast) -> Result<bool, ReplicationError> {
        match broadcast {
            Broadcast::Delta(Delta { revision, replica }) => self.apply_delta(revision, replica),
            Broadcast::MatchEnded { reason, standings } => {
                if self.outcome.is_some() {
                    return Ok(false);
                }
                self.outcome = Some((reason, standings.clone()));
                let _ = self
                    .events_tx
                    .send(ViewEvent::MatchEnded { reason, standings });
                Ok(true)
            }
        }
    }

    fn apply_delta(&mut self, revision: u64, replica: Replica) -> Result<bool, ReplicationError> {
        match replica {
            Replica::Phase(phase) => {
                let applied = self.phase.apply_remote(revision, phase)?;
                if applied && phase != MatchPhase::Lobby {
                    if let Some((held_revision, value)) = self.held_match_countdown.take() {
                        self.match_countdown.apply_remote(held_revision, value)?;
                    }
                }
                Ok(applied)
            }
            Replica::MatchCountdown(value) => {
                if self.phase() == MatchPhase::Lobby {
                    let newer = self
                        .held_match_countdown
                        .map_or(true, |(held, _)| revision > held);
                    if newer {
                        self.held_match_countdown = Some((revision, value));
                    }
                    return Ok(false);
                }
                self.match_countdown.apply_remote(revision, value)
            }
            Replica::LobbyCountdown(value) => self.lobby_countdown.apply_remote(revision, value),
            Replica::Roster(participants) => {
                let applied = self.roster.apply_remote(revision, participants)?;
                if applied {
                    let roster = self.roster.get();
                    self.avatars
                        .retain(|id, _| roster.iter().any(|p| p.id == *id));
                }
                Ok(applied)
            }
            Replica::Statistics(rows) => self.statistics.apply_remote(revision, rows),
            Replica::Avatar {
                participant_id,
                state,
            } => {
                let events = self.events_tx.clone();
                let mirror = self.avatars.entry(participant_id).or_insert_with(|| {
                    let mut mirror = Replicated::observer(state);
                    mirror.subscribe(move |change| {
                        let _ = events.send(ViewEvent::Avatar {
                            participant_id,
                            state: *change.current,
                        });
                    });
                    mirror
                });
                mirror.apply_remote(revision, state)
            }
        }
    }

    /// Drains pending changes into the presenter, oldest first.
    pub fn present(&mut self, presenter: &mut dyn Presenter) -> usize {
        let mut shown = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            shown += 1;
            match event {
                ViewEvent::Phase(MatchPhase::Active) => presenter.show_hud(),
                ViewEvent::Phase(_) => {}
                ViewEvent::LobbyCountdown(seconds) => presenter.show_lobby_countdown(seconds),
                ViewEvent::MatchCountdown(Some(seconds)) => presenter.show_match_countdown(seconds),
                ViewEvent::MatchCountdown(None) => {}
                ViewEvent::Roster(participants) => presenter.show_roster(&participants),
                ViewEvent::Statistics(rows) => {
                    presenter.show_ranked_statistics(&rank_standings(&rows))
                }
                ViewEvent::Avatar {
                    participant_id,
                    state,
                } => presenter.show_avatar(participant_id, &state),
                ViewEvent::MatchEnded { reason, standings } => {
                    presenter.show_ranked_statistics(&standings);
                    presenter.show_end_screen(&reason);
                }
            }
        }
        shown
    }

    /// Pending changes without a presenter, mainly for tests and tooling.
    pub fn drain_events(&mut self) -> Vec<ViewEvent> {
        self.events_rx.try_iter().collect()
    }

    pub fn phase(&self) -> MatchPhase {
        *self.phase.get()
    }

    pub fn lobby_countdown(&self) -> Option<u32> {
        *self.lobby_countdown.get()
    }

    pub fn match_countdown(&self) -> Option<u32> {
        *self.match_countdown.get()
    }

    pub fn roster(&self) -> &[Participant] {
        self.roster.get()
    }

    pub fn statistics(&self) -> &[StatisticsRow] {
        self.statistics.get()
    }

    pub fn avatar(&self, id: ParticipantId) -> Option<AvatarState> {
        self.avatars.get(&id).map(|mirror| *mirror.get())
    }

    pub fn outcome(&self) -> Option<&(EndReason, Vec<StatisticsRow>)> {
        self.outcome.as_ref()
    }
}
