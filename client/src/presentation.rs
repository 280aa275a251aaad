//! What the observer shows, kept behind a trait so the mirror does not care
//! whether it feeds a terminal, a window or a test recorder.

use shared::{
    format_clock, rank_standings, AvatarState, EndReason, Participant, ParticipantId, Posture,
    StatisticsRow,
};

pub trait Presenter {
    /// `None` hides the lobby countdown.
    fn show_lobby_countdown(&mut self, seconds: Option<u32>);
    fn show_match_countdown(&mut self, seconds: u32);
    /// Rows arrive ranked, highest kills first.
    fn show_ranked_statistics(&mut self, rows: &[StatisticsRow]);
    /// Switches from the lobby view to the in-match HUD.
    fn show_hud(&mut self);
    fn show_end_screen(&mut self, reason: &EndReason);

    /// Called once the server has assigned our id.
    fn set_local_participant(&mut self, _id: ParticipantId) {}

    fn show_roster(&mut self, _participants: &[Participant]) {}

    fn show_avatar(&mut self, _participant_id: ParticipantId, _state: &AvatarState) {}
}

/// Prints to stdout.
#[derive(Debug, Default)]
pub struct ConsolePresenter {
    local_id: Option<ParticipantId>,
}

impl ConsolePresenter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Presenter for ConsolePresenter {
    fn set_local_participant(&mut self, id: ParticipantId) {
        self.local_id = Some(id);
    }

    fn show_lobby_countdown(&mut self, seconds: Option<u32>) {
        match seconds {
            Some(seconds) => println!("Match starts in {}", seconds),
            None => println!("Waiting for more players..."),
        }
    }

    fn show_match_countdown(&mut self, seconds: u32) {
        println!("[{}]", format_clock(seconds));
    }

    fn show_ranked_statistics(&mut self, rows: &[StatisticsRow]) {
        for line in standings_lines(rows, self.local_id) {
            println!("{}", line);
        }
    }

    fn show_hud(&mut self) {
        println!("=== Match started ===");
    }

    fn show_end_screen(&mut self, reason: &EndReason) {
        println!("=== {} ===", end_banner(reason));
    }

    fn show_roster(&mut self, participants: &[Participant]) {
        let names: Vec<String> = participants
            .iter()
            .map(|p| {
                if Some(p.id) == self.local_id {
                    format!("{} ({:?}, you)", p.name, p.class)
                } else {
                    format!("{} ({:?})", p.name, p.class)
                }
            })
            .collect();
        println!("Lobby: {}", names.join(", "));
    }

    fn show_avatar(&mut self, participant_id: ParticipantId, state: &AvatarState) {
        if Some(participant_id) != self.local_id {
            return;
        }
        let posture = match state.posture {
            Posture::Grounded => "",
            Posture::Jumping => " airborne",
            Posture::Hooked => " hooked",
        };
        println!("HP {}/{}{}", state.health, state.max_health, posture);
    }
}

/// One line per row: rank, name, kills, deaths, K/D and ping.
pub fn standings_lines(rows: &[StatisticsRow], local_id: Option<ParticipantId>) -> Vec<String> {
    rank_standings(rows)
        .iter()
        .enumerate()
        .map(|(rank, row)| {
            let marker = if Some(row.participant_id) == local_id { "*" } else { " " };
            format!(
                "{}{}. {:<16} {:>3} K {:>3} D  {:>5.2}  {}ms",
                marker,
                rank + 1,
                row.name,
                row.kills,
                row.deaths,
                row.kd_ratio(),
                row.ping_ms
            )
        })
        .collect()
}

pub fn end_banner(reason: &EndReason) -> String {
    match reason {
        EndReason::CountdownElapsed => "Time is up".to_string(),
        EndReason::KillLimitReached { leader } => {
            format!("Kill limit reached by player {}", leader)
        }
        EndReason::Abandoned => "Match abandoned".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: ParticipantId, name: &str, kills: u32, deaths: u32) -> StatisticsRow {
        StatisticsRow {
            participant_id: id,
            name: name.to_string(),
            kills,
            deaths,
            ping_ms: 20,
        }
    }

    #[test]
    fn test_standings_lines_are_ranked() {
        let rows = vec![row(1, "Ana", 1, 2), row(2, "Bo", 4, 0)];
        let lines = standings_lines(&rows, Some(1));

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(" 1. Bo"));
        assert!(lines[0].contains("4.00"));
        assert!(lines[1].starts_with("*2. Ana"));
        assert!(lines[1].contains("0.50"));
    }

    #[test]
    fn test_end_banner() {
        assert_eq!(end_banner(&EndReason::CountdownElapsed), "Time is up");
        assert_eq!(
            end_banner(&EndReason::KillLimitReached { leader: 3 }),
            "Kill limit reached by player 3"
        );
    }
}
