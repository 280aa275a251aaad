//! Match-ending conditions, checked in a fixed order every tick of an active match.

use shared::StatisticsRow;

/// What a victory condition gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct MatchView<'a> {
    pub seconds_remaining: u32,
    pub standings: &'a [StatisticsRow],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VictoryCondition {
    /// The match clock has run out.
    CountdownZero,
    /// Somebody reached this many kills.
    MaxKills(u32),
}

impl VictoryCondition {
    pub fn is_met(&self, view: &MatchView<'_>) -> bool {
        match self {
            VictoryCondition::CountdownZero => view.seconds_remaining == 0,
            VictoryCondition::MaxKills(limit) => {
                view.standings.iter().any(|row| row.kills >= *limit)
            }
        }
    }
}

/// Ordered list of conditions; the first one met ends the match.
#[derive(Debug, Clone, Default)]
pub struct VictoryPolicy {
    conditions: Vec<VictoryCondition>,
}

impl VictoryPolicy {
    pub fn new(conditions: Vec<VictoryCondition>) -> Self {
        Self { conditions }
    }

    pub fn conditions(&self) -> &[VictoryCondition] {
        &self.conditions
    }

    pub fn evaluate(&self, view: &MatchView<'_>) -> Option<VictoryCondition> {
        self.conditions
            .iter()
            .copied()
            .find(|condition| condition.is_met(view))
    }
}
