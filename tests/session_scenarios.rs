//! End-to-end match scenarios: a real session over the kinematic world, with
//! every broadcast fed through the client's observer mirror.

use client::mirror::ObserverState;
use server::config::SessionConfig;
use server::error::SessionError;
use server::session::{Session, SessionCommand, SessionNotice};
use server::victory::VictoryCondition;
use server::world::KinematicWorld;
use shared::{
    Broadcast, EndReason, Intent, MatchPhase, ParticipantClass, ParticipantId, Vec2,
};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

struct Match {
    session: Session,
    broadcasts: mpsc::UnboundedReceiver<Broadcast>,
    observer: ObserverState,
    end_broadcasts: usize,
    now: Instant,
}

impl Match {
    fn new(config: SessionConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(config, Box::new(KinematicWorld::new()), tx).unwrap();
        Self {
            session,
            broadcasts: rx,
            observer: ObserverState::new(),
            end_broadcasts: 0,
            now: Instant::now(),
        }
    }

    fn frame(&mut self, commands: Vec<SessionCommand>) -> Vec<SessionNotice> {
        self.now += Duration::from_millis(33);
        let notices = self.session.tick(self.now, commands);
        self.sync();
        notices
    }

    fn seconds(&mut self, seconds: u32) {
        self.now = self.session.advance_seconds(self.now, seconds);
        self.sync();
    }

    fn intent(&mut self, participant_id: ParticipantId, intent: Intent) {
        self.frame(vec![SessionCommand::Intent {
            participant_id,
            intent,
        }]);
    }

    fn sync(&mut self) {
        while let Ok(broadcast) = self.broadcasts.try_recv() {
            if matches!(broadcast, Broadcast::MatchEnded { .. }) {
                self.end_broadcasts += 1;
            }
            self.observer.apply(broadcast).unwrap();
        }
    }
}

fn duel_config() -> SessionConfig {
    SessionConfig {
        lobby_capacity: 2,
        min_participants: 2,
        lobby_countdown_secs: 5,
        match_duration_secs: 30,
        victory_conditions: vec![VictoryCondition::CountdownZero, VictoryCondition::MaxKills(1)],
        spawn_points: vec![Vec2::new(-3.0, 0.0), Vec2::new(3.0, 0.0)],
        fire_cooldown: Duration::ZERO,
        hit_damage: 6,
        rng_seed: Some(7),
        ..SessionConfig::default()
    }
}

#[test]
fn test_default_lobby_starts_after_full_countdown() {
    let mut game = Match::new(SessionConfig {
        rng_seed: Some(2),
        ..SessionConfig::default()
    });

    game.frame(vec![SessionCommand::Join(1)]);
    assert!(!game.session.lobby_countdown().is_running());
    assert_eq!(game.observer.lobby_countdown(), None);

    game.frame(vec![SessionCommand::Join(2)]);
    assert_eq!(game.observer.lobby_countdown(), Some(10));

    game.seconds(9);
    assert_eq!(game.observer.lobby_countdown(), Some(1));
    assert_eq!(game.session.phase(), MatchPhase::Lobby);

    game.seconds(1);
    assert_eq!(game.session.phase(), MatchPhase::Active);
    let rows = game.session.ledger().rows();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.kills == 0 && row.deaths == 0));
}

#[test]
fn test_kill_limit_never_reached_clock_ends_once() {
    let mut game = Match::new(SessionConfig {
        match_duration_secs: 60,
        rng_seed: Some(4),
        ..SessionConfig::default()
    });
    assert_eq!(
        game.session.config().victory_conditions,
        vec![VictoryCondition::CountdownZero, VictoryCondition::MaxKills(10)]
    );

    game.frame(vec![SessionCommand::Join(1), SessionCommand::Join(2)]);
    game.seconds(10);
    assert_eq!(game.session.phase(), MatchPhase::Active);

    game.seconds(59);
    assert_eq!(game.session.phase(), MatchPhase::Active);
    assert_eq!(game.end_broadcasts, 0);

    game.seconds(1);
    assert_eq!(game.session.phase(), MatchPhase::Ended);
    game.seconds(5);
    game.frame(vec![SessionCommand::Leave(1)]);
    assert_eq!(game.end_broadcasts, 1);
}

#[test]
fn test_lobby_setup_is_mirrored() {
    let mut game = Match::new(duel_config());

    game.frame(vec![SessionCommand::Join(1)]);
    game.intent(1, Intent::Rename("  Ana  ".to_string()));
    game.intent(1, Intent::SetClass(ParticipantClass::Heavy));

    let roster = game.observer.roster();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].name, "Ana");
    assert_eq!(roster[0].class, ParticipantClass::Heavy);
    assert_eq!(game.observer.lobby_countdown(), None);
    assert_eq!(game.observer.phase(), MatchPhase::Lobby);
}

#[test]
fn test_lobby_countdown_restarts_from_full_after_cancel() {
    let mut game = Match::new(duel_config());

    game.frame(vec![SessionCommand::Join(1), SessionCommand::Join(2)]);
    assert_eq!(game.observer.lobby_countdown(), Some(5));

    game.seconds(3);
    assert_eq!(game.observer.lobby_countdown(), Some(2));

    game.frame(vec![SessionCommand::Leave(2)]);
    assert_eq!(game.observer.lobby_countdown(), None);

    // Fresh id, ids are never reused
    game.frame(vec![SessionCommand::Join(3)]);
    assert_eq!(game.observer.lobby_countdown(), Some(5));

    game.seconds(4);
    assert_eq!(game.session.phase(), MatchPhase::Lobby);
    game.seconds(1);
    assert_eq!(game.session.phase(), MatchPhase::Active);
    assert_eq!(game.observer.phase(), MatchPhase::Active);
}

#[test]
fn test_match_runs_to_countdown_end() {
    let mut game = Match::new(SessionConfig {
        victory_conditions: vec![VictoryCondition::CountdownZero],
        ..duel_config()
    });

    game.frame(vec![SessionCommand::Join(1), SessionCommand::Join(2)]);
    game.seconds(5);
    assert_eq!(game.observer.match_countdown(), Some(30));
    assert_eq!(game.observer.lobby_countdown(), None);
    assert_eq!(game.observer.avatar(1).map(|a| a.health), Some(6));

    game.seconds(29);
    assert_eq!(game.observer.match_countdown(), Some(1));
    assert!(!game.session.is_ended());

    game.seconds(1);
    assert_eq!(game.session.end_reason(), Some(EndReason::CountdownElapsed));
    assert_eq!(game.observer.phase(), MatchPhase::Ended);

    let (reason, standings) = game.observer.outcome().cloned().unwrap();
    assert_eq!(reason, EndReason::CountdownElapsed);
    assert_eq!(standings.len(), 2);

    // Nothing moves once the match is over
    game.seconds(3);
    assert_eq!(game.observer.phase(), MatchPhase::Ended);
}

#[test]
fn test_kill_limit_ends_duel() {
    let mut game = Match::new(duel_config());

    game.frame(vec![SessionCommand::Join(1), SessionCommand::Join(2)]);
    game.seconds(5);
    assert!(game.session.is_spawned(1));
    assert!(game.session.is_spawned(2));

    // The spawn side is seeded, so shoot both ways; only one shot can land
    game.frame(vec![
        SessionCommand::Intent {
            participant_id: 1,
            intent: Intent::Fire(Vec2::new(1.0, 0.0)),
        },
        SessionCommand::Intent {
            participant_id: 1,
            intent: Intent::Fire(Vec2::new(-1.0, 0.0)),
        },
    ]);

    assert_eq!(
        game.session.end_reason(),
        Some(EndReason::KillLimitReached { leader: 1 })
    );

    let shooter = game.session.ledger().get(1).unwrap();
    let victim = game.session.ledger().get(2).unwrap();
    assert_eq!((shooter.kills, shooter.deaths), (1, 0));
    assert_eq!((victim.kills, victim.deaths), (0, 1));

    // Both points are still cooling down, so the victim waits for one
    assert!(!game.session.is_spawned(2));
    assert_eq!(game.session.pending_spawns(), 1);
    assert_eq!(game.observer.avatar(2).map(|a| a.health), Some(6));

    let (_, standings) = game.observer.outcome().cloned().unwrap();
    assert_eq!(standings[0].participant_id, 1);
    assert_eq!(game.observer.statistics().len(), 2);
}

#[test]
fn test_late_join_refused_and_abandon() {
    let mut game = Match::new(SessionConfig {
        lobby_capacity: 3,
        ..duel_config()
    });

    game.frame(vec![SessionCommand::Join(1), SessionCommand::Join(2)]);
    game.seconds(5);

    let notices = game.frame(vec![SessionCommand::Join(3)]);
    assert_eq!(
        notices,
        vec![SessionNotice::Rejected {
            participant_id: 3,
            error: SessionError::LobbyClosed,
        }]
    );

    game.frame(vec![SessionCommand::Leave(1), SessionCommand::Leave(2)]);
    assert_eq!(game.session.end_reason(), Some(EndReason::Abandoned));
    assert_eq!(
        game.observer.outcome().map(|(reason, _)| *reason),
        Some(EndReason::Abandoned)
    );
}

#[test]
fn test_late_observer_catches_up_from_replay() {
    let mut game = Match::new(duel_config());
    game.frame(vec![SessionCommand::Join(1), SessionCommand::Join(2)]);
    game.seconds(7);

    let mut late = ObserverState::new();
    for broadcast in game.session.replay() {
        late.apply(broadcast).unwrap();
    }

    assert_eq!(late.phase(), MatchPhase::Active);
    assert_eq!(late.match_countdown(), Some(28));
    assert_eq!(late.roster().len(), 2);
    assert_eq!(late.statistics().len(), 2);
    assert!(late.avatar(1).is_some());
    assert!(late.avatar(2).is_some());
}

#[test]
fn test_movement_lands_after_jump() {
    let mut game = Match::new(duel_config());
    game.frame(vec![SessionCommand::Join(1), SessionCommand::Join(2)]);
    game.seconds(5);

    game.intent(1, Intent::Jump);
    assert_eq!(
        game.observer.avatar(1).map(|a| a.posture),
        Some(shared::Posture::Jumping)
    );

    // Jump speed 6 under gravity 9.81 is back on the floor well within 2s
    for _ in 0..60 {
        game.frame(Vec::new());
    }
    assert_eq!(
        game.observer.avatar(1).map(|a| a.posture),
        Some(shared::Posture::Grounded)
    );
}
