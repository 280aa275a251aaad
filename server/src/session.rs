//! The authoritative match: lobby, active play and the final standings.
//!
//! A [`Session`] owns every replicated value of one match and mutates them
//! only from [`Session::tick`], which the server loop calls once per frame
//! with the commands that arrived since the previous frame. The session never
//! touches a socket. Each committed change is pushed as a [`Broadcast`] onto
//! a single unbounded channel, so the transport sends them in commit order.
//!
//! Lifecycle: `Lobby` until enough participants are present for a full lobby
//! countdown, `Active` until a victory condition holds or the match clock
//! runs out, then `Ended` for good.

use crate::config::{ConfigError, SessionConfig};
use crate::countdown::{Countdown, CountdownEvent, IntervalTicker, TimerKind};
use crate::error::SessionError;
use crate::ledger::StatisticsLedger;
use crate::roster::Roster;
use crate::spawn::SpawnAllocator;
use crate::victory::{MatchView, VictoryCondition, VictoryPolicy};
use crate::world::{EntityHandle, World};
use log::{debug, error, info, warn};
use shared::{
    AvatarState, Broadcast, EndReason, Intent, MatchPhase, Participant, ParticipantId, Posture,
    Replica, Replicated, MAX_JUMPS,
};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Longest world step taken in one tick.
const MAX_STEP: Duration = Duration::from_millis(50);

/// Input to the session, queued by the transport and the countdown tasks.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Join(ParticipantId),
    Leave(ParticipantId),
    Intent {
        participant_id: ParticipantId,
        intent: Intent,
    },
    PingSample {
        participant_id: ParticipantId,
        ping_ms: u32,
    },
    TimerTick {
        timer: TimerKind,
        generation: u64,
    },
}

/// Outcome of a join, reported back to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    Admitted(Participant),
    Rejected {
        participant_id: ParticipantId,
        error: SessionError,
    },
}

struct Avatar {
    entity: Option<EntityHandle>,
    state: Replicated<AvatarState>,
    jumps_left: u8,
    last_fire: Option<Instant>,
}

impl Avatar {
    fn posture(&self) -> Posture {
        self.state.get().posture
    }

    fn set_posture(&mut self, posture: Posture) -> Result<(), SessionError> {
        if self.posture() != posture {
            self.state.modify(|state| state.posture = posture)?;
        }
        Ok(())
    }
}

pub struct Session {
    config: SessionConfig,
    phase: Replicated<MatchPhase>,
    roster: Roster,
    ledger: StatisticsLedger,
    lobby_countdown: Countdown,
    match_countdown: Countdown,
    victory: VictoryPolicy,
    spawns: SpawnAllocator,
    world: Box<dyn World>,
    avatars: HashMap<ParticipantId, Avatar>,
    pending_spawns: VecDeque<ParticipantId>,
    broadcasts: mpsc::UnboundedSender<Broadcast>,
    end_reason: Option<EndReason>,
    last_tick: Option<Instant>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        world: Box<dyn World>,
        broadcasts: mpsc::UnboundedSender<Broadcast>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut phase = Replicated::authority(MatchPhase::Lobby);
        let tx = broadcasts.clone();
        phase.subscribe(move |change| {
            let _ = tx.send(Broadcast::delta(change.revision, Replica::Phase(*change.current)));
        });

        let mut roster = Roster::new(config.lobby_capacity);
        let tx = broadcasts.clone();
        roster.subscribe(move |change| {
            let _ = tx.send(Broadcast::delta(
                change.revision,
                Replica::Roster(change.current.clone()),
            ));
        });

        let mut ledger = StatisticsLedger::new();
        let tx = broadcasts.clone();
        ledger.subscribe(move |change| {
            let _ = tx.send(Broadcast::delta(
                change.revision,
                Replica::Statistics(change.current.clone()),
            ));
        });

        let mut lobby_countdown = Countdown::new(TimerKind::Lobby);
        let tx = broadcasts.clone();
        lobby_countdown.subscribe(move |change| {
            let _ = tx.send(Broadcast::delta(
                change.revision,
                Replica::LobbyCountdown(*change.current),
            ));
        });

        let mut match_countdown = Countdown::new(TimerKind::Match);
        let tx = broadcasts.clone();
        match_countdown.subscribe(move |change| {
            let _ = tx.send(Broadcast::delta(
                change.revision,
                Replica::MatchCountdown(*change.current),
            ));
        });

        let spawns = SpawnAllocator::new(
            &config.spawn_points,
            config.spawn_cooldown,
            config.rng_seed,
        );
        let victory = VictoryPolicy::new(config.victory_conditions.clone());

        Ok(Self {
            config,
            phase,
            roster,
            ledger,
            lobby_countdown,
            match_countdown,
            victory,
            spawns,
            world,
            avatars: HashMap::new(),
            pending_spawns: VecDeque::new(),
            broadcasts,
            end_reason: None,
            last_tick: None,
        })
    }

    /// Drives both countdowns from one-second tokio tasks that post
    /// [`SessionCommand::TimerTick`] into `commands`.
    pub fn attach_ticker(&mut self, commands: mpsc::UnboundedSender<SessionCommand>) {
        self.lobby_countdown
            .set_source(Box::new(IntervalTicker::new(commands.clone())));
        self.match_countdown
            .set_source(Box::new(IntervalTicker::new(commands)));
    }

    /// Applies `commands` in order, then advances the match by one frame.
    pub fn tick<I>(&mut self, now: Instant, commands: I) -> Vec<SessionNotice>
    where
        I: IntoIterator<Item = SessionCommand>,
    {
        let mut notices = Vec::new();
        for command in commands {
            self.apply(now, command, &mut notices);
        }

        if self.phase() == MatchPhase::Active {
            self.retry_pending_spawns(now);

            let dt = self
                .last_tick
                .map(|last| now.saturating_duration_since(last).min(MAX_STEP))
                .unwrap_or_default();
            self.world.step(dt.as_secs_f32());
            self.settle_postures();
            self.check_victory();
        }

        self.last_tick = Some(now);
        notices
    }

    /// Simulates `seconds` one-second ticks of every running countdown,
    /// starting after `start`. Returns the instant of the last simulated tick.
    pub fn advance_seconds(&mut self, start: Instant, seconds: u32) -> Instant {
        let mut now = start;
        for _ in 0..seconds {
            now += Duration::from_secs(1);
            let mut ticks = Vec::new();
            for countdown in [&self.lobby_countdown, &self.match_countdown] {
                if countdown.is_running() {
                    ticks.push(SessionCommand::TimerTick {
                        timer: countdown.kind(),
                        generation: countdown.generation(),
                    });
                }
            }
            self.tick(now, ticks);
        }
        now
    }

    /// Every replicated value at its current revision, for a newly admitted
    /// observer. The phase comes first.
    pub fn replay(&self) -> Vec<Broadcast> {
        let mut replay = vec![
            Broadcast::delta(self.phase.revision(), Replica::Phase(*self.phase.get())),
            Broadcast::delta(self.roster.revision(), Replica::Roster(self.roster.snapshot())),
            Broadcast::delta(
                self.lobby_countdown.revision(),
                Replica::LobbyCountdown(self.lobby_countdown.remaining()),
            ),
            Broadcast::delta(
                self.match_countdown.revision(),
                Replica::MatchCountdown(self.match_countdown.remaining()),
            ),
            Broadcast::delta(
                self.ledger.revision(),
                Replica::Statistics(self.ledger.rows().to_vec()),
            ),
        ];

        let mut ids: Vec<_> = self.avatars.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(avatar) = self.avatars.get(&id) {
                replay.push(Broadcast::delta(
                    avatar.state.revision(),
                    Replica::Avatar {
                        participant_id: id,
                        state: *avatar.state.get(),
                    },
                ));
            }
        }

        if let Some(reason) = self.end_reason {
            replay.push(Broadcast::MatchEnded {
                reason,
                standings: self.ledger.ranked_snapshot(),
            });
        }
        replay
    }

    pub fn phase(&self) -> MatchPhase {
        *self.phase.get()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn ledger(&self) -> &StatisticsLedger {
        &self.ledger
    }

    pub fn lobby_countdown(&self) -> &Countdown {
        &self.lobby_countdown
    }

    pub fn match_countdown(&self) -> &Countdown {
        &self.match_countdown
    }

    pub fn avatar_state(&self, id: ParticipantId) -> Option<AvatarState> {
        self.avatars.get(&id).map(|avatar| *avatar.state.get())
    }

    /// Whether the participant currently has a body in the world.
    pub fn is_spawned(&self, id: ParticipantId) -> bool {
        self.avatars
            .get(&id)
            .map_or(false, |avatar| avatar.entity.is_some())
    }

    pub fn pending_spawns(&self) -> usize {
        self.pending_spawns.len()
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    pub fn is_ended(&self) -> bool {
        self.end_reason.is_some()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn apply(&mut self, now: Instant, command: SessionCommand, notices: &mut Vec<SessionNotice>) {
        match command {
            SessionCommand::Join(id) => notices.push(self.handle_join(id)),
            SessionCommand::Leave(id) => {
                if let Err(err) = self.handle_leave(id) {
                    report(&format!("leave of participant {}", id), &err);
                }
            }
            SessionCommand::Intent {
                participant_id,
                intent,
            } => {
                if let Err(err) = self.handle_intent(now, participant_id, intent) {
                    report(&format!("intent from participant {}", participant_id), &err);
                }
            }
            SessionCommand::PingSample {
                participant_id,
                ping_ms,
            } => {
                if self.phase() != MatchPhase::Active {
                    return;
                }
                if let Err(err) = self.ledger.update_ping(participant_id, ping_ms) {
                    report("ping sample", &err);
                }
            }
            SessionCommand::TimerTick { timer, generation } => {
                if let Err(err) = self.handle_timer(now, timer, generation) {
                    report(&format!("{} tick", timer), &err);
                }
            }
        }
    }

    fn handle_join(&mut self, id: ParticipantId) -> SessionNotice {
        if self.phase() != MatchPhase::Lobby {
            info!("Participant {} refused: match already started", id);
            return SessionNotice::Rejected {
                participant_id: id,
                error: SessionError::LobbyClosed,
            };
        }

        match self.roster.join(id) {
            Ok(participant) => {
                info!(
                    "{} joined the lobby ({}/{})",
                    participant.name,
                    self.roster.len(),
                    self.roster.capacity()
                );
                if let Err(err) = self.sync_lobby_countdown() {
                    report("lobby countdown", &err);
                }
                SessionNotice::Admitted(participant)
            }
            Err(err) => {
                report(&format!("join of participant {}", id), &err);
                SessionNotice::Rejected {
                    participant_id: id,
                    error: err,
                }
            }
        }
    }

    fn handle_leave(&mut self, id: ParticipantId) -> Result<(), SessionError> {
        let participant = match self.roster.leave(id) {
            Ok(participant) => participant,
            Err(SessionError::NotFound(_)) => {
                return Err(SessionError::InvariantViolation(format!(
                    "participant {} left without having joined",
                    id
                )))
            }
            Err(err) => return Err(err),
        };
        info!("{} left ({} remaining)", participant.name, self.roster.len());

        match self.phase() {
            MatchPhase::Lobby => self.sync_lobby_countdown(),
            MatchPhase::Active => {
                if let Some(avatar) = self.avatars.remove(&id) {
                    if let Some(entity) = avatar.entity {
                        self.world.despawn(entity);
                    }
                }
                self.pending_spawns.retain(|pending| *pending != id);

                if self.roster.is_empty() {
                    self.end(EndReason::Abandoned)?;
                }
                Ok(())
            }
            MatchPhase::Ended => Ok(()),
        }
    }

    fn handle_intent(
        &mut self,
        now: Instant,
        id: ParticipantId,
        intent: Intent,
    ) -> Result<(), SessionError> {
        match (self.phase(), intent) {
            (MatchPhase::Lobby, Intent::Rename(name)) => self.roster.rename(id, &name),
            (MatchPhase::Lobby, Intent::SetClass(class)) => self.roster.set_class(id, class),
            (_, Intent::Rename(_)) | (_, Intent::SetClass(_)) => Err(SessionError::LobbyClosed),
            (MatchPhase::Active, intent) => self.apply_gameplay(now, id, intent),
            (phase, intent) => {
                debug!(
                    "Ignoring {:?} from participant {} during {:?}",
                    intent, id, phase
                );
                Ok(())
            }
        }
    }

    fn handle_timer(
        &mut self,
        now: Instant,
        timer: TimerKind,
        generation: u64,
    ) -> Result<(), SessionError> {
        match timer {
            TimerKind::Lobby => {
                if self.phase() != MatchPhase::Lobby {
                    return Ok(());
                }
                if let Some(CountdownEvent::Expired) = self.lobby_countdown.tick(generation)? {
                    if self.roster.len() >= self.config.min_participants {
                        self.enter_active(now)?;
                    } else {
                        debug!("Lobby countdown expired below the minimum, staying in lobby");
                    }
                }
            }
            TimerKind::Match => {
                if self.phase() != MatchPhase::Active {
                    return Ok(());
                }
                if let Some(CountdownEvent::Expired) = self.match_countdown.tick(generation)? {
                    self.end(EndReason::CountdownElapsed)?;
                }
            }
        }
        Ok(())
    }

    /// Starts the lobby countdown once the minimum is reached and cancels it
    /// when the roster drops below it again.
    fn sync_lobby_countdown(&mut self) -> Result<(), SessionError> {
        let ready = self.roster.len() >= self.config.min_participants;
        if ready && !self.lobby_countdown.is_running() {
            info!(
                "Minimum of {} participants reached, match starts in {}s",
                self.config.min_participants, self.config.lobby_countdown_secs
            );
            self.lobby_countdown.start(self.config.lobby_countdown_secs)?;
        } else if !ready && self.lobby_countdown.is_running() {
            info!("Below the minimum again, lobby countdown cancelled");
            self.lobby_countdown.stop()?;
        }
        Ok(())
    }

    fn enter_active(&mut self, now: Instant) -> Result<(), SessionError> {
        self.phase.set(MatchPhase::Active)?;
        self.lobby_countdown.stop()?;

        let participants = self.roster.snapshot();
        for participant in &participants {
            self.ledger
                .register_participant(participant.id, &participant.name)?;
        }
        for participant in &participants {
            self.create_avatar(participant);
            self.place_avatar(participant.id, now);
        }

        self.match_countdown.start(self.config.match_duration_secs)?;
        info!("Match started with {} participants", participants.len());
        Ok(())
    }

    fn create_avatar(&mut self, participant: &Participant) {
        let id = participant.id;
        let mut state = Replicated::authority(AvatarState::full(participant.class.stats().max_health));
        let tx = self.broadcasts.clone();
        state.subscribe(move |change| {
            let _ = tx.send(Broadcast::delta(
                change.revision,
                Replica::Avatar {
                    participant_id: id,
                    state: *change.current,
                },
            ));
        });
        let _ = self.broadcasts.send(Broadcast::delta(
            state.revision(),
            Replica::Avatar {
                participant_id: id,
                state: *state.get(),
            },
        ));

        self.avatars.insert(
            id,
            Avatar {
                entity: None,
                state,
                jumps_left: MAX_JUMPS,
                last_fire: None,
            },
        );
    }

    /// Puts an avatar into the world, or queues it until a spawn point frees up.
    fn place_avatar(&mut self, id: ParticipantId, now: Instant) {
        let class = match self.roster.get(id) {
            Some(participant) => participant.class,
            None => return,
        };
        match self.spawns.allocate(now) {
            Ok(position) => {
                let entity = self.world.spawn_avatar(id, position, class.stats());
                if let Some(avatar) = self.avatars.get_mut(&id) {
                    avatar.entity = Some(entity);
                }
                debug!(
                    "Spawned participant {} at ({:.1}, {:.1})",
                    id, position.x, position.y
                );
            }
            Err(err) => {
                report(&format!("spawn of participant {}", id), &err);
                self.pending_spawns.push_back(id);
            }
        }
    }

    fn retry_pending_spawns(&mut self, now: Instant) {
        while let Some(id) = self.pending_spawns.front().copied() {
            if self.spawns.available_count(now) == 0 {
                break;
            }
            self.pending_spawns.pop_front();
            if self.avatars.contains_key(&id) {
                self.place_avatar(id, now);
            }
        }
    }

    fn apply_gameplay(
        &mut self,
        now: Instant,
        id: ParticipantId,
        intent: Intent,
    ) -> Result<(), SessionError> {
        let fire_cooldown = self.config.fire_cooldown;
        let avatar = self.avatars.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        let entity = match avatar.entity {
            Some(entity) => entity,
            None => {
                debug!("Participant {} is waiting for a spawn point", id);
                return Ok(());
            }
        };

        let target = match intent {
            Intent::Move(input) => {
                if avatar.posture() != Posture::Hooked {
                    self.world.drive(entity, input);
                }
                None
            }
            Intent::Jump => {
                // The rope drops even when the jump itself is refused
                self.world.release_hook(entity);
                if self.world.is_grounded(entity) {
                    avatar.jumps_left = MAX_JUMPS;
                }
                if avatar.jumps_left == 0 {
                    debug!("Participant {} has no jumps left", id);
                    if avatar.posture() == Posture::Hooked {
                        avatar.set_posture(Posture::Jumping)?;
                    }
                    return Ok(());
                }
                avatar.jumps_left -= 1;
                self.world.jump(entity);
                avatar.set_posture(Posture::Jumping)?;
                None
            }
            Intent::Hook(direction) => {
                if self.world.cast_hook(entity, direction) {
                    avatar.set_posture(Posture::Hooked)?;
                }
                None
            }
            Intent::Fire(direction) => {
                if let Some(last) = avatar.last_fire {
                    if now.saturating_duration_since(last) < fire_cooldown {
                        debug!("Participant {} fired during cooldown", id);
                        return Ok(());
                    }
                }
                avatar.last_fire = Some(now);
                self.world.hit_test(entity, direction)
            }
            Intent::Rename(_) | Intent::SetClass(_) => None,
        };

        match target {
            Some(victim) if victim != id => self.apply_hit(now, id, victim),
            _ => Ok(()),
        }
    }

    fn apply_hit(
        &mut self,
        now: Instant,
        shooter: ParticipantId,
        victim: ParticipantId,
    ) -> Result<(), SessionError> {
        let damage = self.config.hit_damage;
        let avatar = self
            .avatars
            .get_mut(&victim)
            .ok_or(SessionError::NotFound(victim))?;
        if avatar.entity.is_none() {
            return Ok(());
        }

        let health = avatar.state.get().health.saturating_sub(damage);
        avatar.state.modify(|state| state.health = health)?;
        if health > 0 {
            return Ok(());
        }

        info!("Participant {} eliminated participant {}", shooter, victim);
        if let Err(err) = self.ledger.record_kill(shooter, victim) {
            report("kill", &err);
        }
        self.respawn(victim, now)
    }

    fn respawn(&mut self, id: ParticipantId, now: Instant) -> Result<(), SessionError> {
        let avatar = self.avatars.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        avatar.state.modify(|state| {
            state.health = state.max_health;
            state.posture = Posture::Grounded;
        })?;
        avatar.jumps_left = MAX_JUMPS;
        if let Some(entity) = avatar.entity.take() {
            self.world.despawn(entity);
        }
        self.place_avatar(id, now);
        Ok(())
    }

    fn settle_postures(&mut self) {
        for (id, avatar) in self.avatars.iter_mut() {
            let entity = match avatar.entity {
                Some(entity) => entity,
                None => continue,
            };
            if !self.world.is_grounded(entity) {
                continue;
            }
            match avatar.posture() {
                Posture::Jumping => {
                    avatar.jumps_left = MAX_JUMPS;
                    if let Err(err) = avatar.set_posture(Posture::Grounded) {
                        report(&format!("landing of participant {}", id), &err);
                    }
                }
                // Still on the rope, but a jump from here is a ground jump
                Posture::Hooked => avatar.jumps_left = MAX_JUMPS,
                Posture::Grounded => {}
            }
        }
    }

    fn check_victory(&mut self) {
        let view = MatchView {
            seconds_remaining: self
                .match_countdown
                .remaining()
                .unwrap_or(self.config.match_duration_secs),
            standings: self.ledger.rows(),
        };
        let reason = match self.victory.evaluate(&view) {
            Some(VictoryCondition::CountdownZero) => EndReason::CountdownElapsed,
            Some(VictoryCondition::MaxKills(_)) => match self.ledger.ranked_snapshot().first() {
                Some(leader) => EndReason::KillLimitReached {
                    leader: leader.participant_id,
                },
                None => return,
            },
            None => return,
        };
        if let Err(err) = self.end(reason) {
            report("match end", &err);
        }
    }

    fn end(&mut self, reason: EndReason) -> Result<(), SessionError> {
        if self.end_reason.is_some() {
            return Ok(());
        }
        self.end_reason = Some(reason);
        self.phase.set(MatchPhase::Ended)?;
        if self.match_countdown.is_running() {
            self.match_countdown.stop()?;
        }
        if self.lobby_countdown.is_running() {
            self.lobby_countdown.stop()?;
        }

        let standings = self.ledger.ranked_snapshot();
        info!("Match ended: {:?}", reason);
        for (rank, row) in standings.iter().enumerate() {
            info!(
                "  {}. {} - {} kills / {} deaths",
                rank + 1,
                row.name,
                row.kills,
                row.deaths
            );
        }
        let _ = self
            .broadcasts
            .send(Broadcast::MatchEnded { reason, standings });
        Ok(())
    }
}

/// Logs a handled session error at the severity its kind calls for.
fn report(context: &str, err: &SessionError) {
    match err {
        SessionError::InvariantViolation(_) | SessionError::UnauthorizedMutation => {
            error!("{}: {}", context, err)
        }
        SessionError::NotFound(_)
        | SessionError::SpawnUnavailable
        | SessionError::CapacityExceeded { .. }
        | SessionError::InvalidName => warn!("{}: {}", context, err),
        SessionError::LobbyClosed => debug!("{}: {}", context, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{ClassStats, ParticipantClass, Vec2};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Script {
        target: Option<ParticipantId>,
        grounded: bool,
        anchor: bool,
        spawned: Vec<(ParticipantId, Vec2)>,
        despawned: usize,
    }

    /// World whose answers are set by the test.
    struct ScriptedWorld {
        script: Arc<Mutex<Script>>,
        next: u32,
    }

    impl World for ScriptedWorld {
        fn spawn_avatar(&mut self, owner: ParticipantId, position: Vec2, _: ClassStats) -> EntityHandle {
            self.next += 1;
            self.script.lock().unwrap().spawned.push((owner, position));
            EntityHandle(self.next)
        }
        fn despawn(&mut self, _: EntityHandle) {
            self.script.lock().unwrap().despawned += 1;
        }
        fn teleport(&mut self, _: EntityHandle, _: Vec2) {}
        fn drive(&mut self, _: EntityHandle, _: Vec2) {}
        fn jump(&mut self, _: EntityHandle) {
            self.script.lock().unwrap().grounded = false;
        }
        fn is_grounded(&self, _: EntityHandle) -> bool {
            self.script.lock().unwrap().grounded
        }
        fn cast_hook(&mut self, _: EntityHandle, _: Vec2) -> bool {
            self.script.lock().unwrap().anchor
        }
        fn release_hook(&mut self, _: EntityHandle) {}
        fn hit_test(&self, _: EntityHandle, _: Vec2) -> Option<ParticipantId> {
            self.script.lock().unwrap().target
        }
        fn step(&mut self, _: f32) {}
        fn position(&self, _: EntityHandle) -> Option<Vec2> {
            None
        }
    }

    struct Harness {
        session: Session,
        script: Arc<Mutex<Script>>,
        broadcasts: mpsc::UnboundedReceiver<Broadcast>,
        now: Instant,
    }

    impl Harness {
        fn new(config: SessionConfig) -> Self {
            let script = Arc::new(Mutex::new(Script {
                grounded: true,
                ..Script::default()
            }));
            let world = ScriptedWorld {
                script: script.clone(),
                next: 0,
            };
            let (tx, rx) = mpsc::unbounded_channel();
            let session = Session::new(config, Box::new(world), tx).unwrap();
            Self {
                session,
                script,
                broadcasts: rx,
                now: Instant::now(),
            }
        }

        fn run(&mut self, commands: Vec<SessionCommand>) -> Vec<SessionNotice> {
            self.now += Duration::from_millis(33);
            self.session.tick(self.now, commands)
        }

        fn advance(&mut self, seconds: u32) {
            self.now = self.session.advance_seconds(self.now, seconds);
        }

        fn intent(&mut self, id: ParticipantId, intent: Intent) {
            self.run(vec![SessionCommand::Intent {
                participant_id: id,
                intent,
            }]);
        }

        fn drain(&mut self) -> Vec<Broadcast> {
            let mut out = Vec::new();
            while let Ok(broadcast) = self.broadcasts.try_recv() {
                out.push(broadcast);
            }
            out
        }

        fn start_match(&mut self, ids: &[ParticipantId]) {
            let joins = ids.iter().map(|id| SessionCommand::Join(*id)).collect();
            self.run(joins);
            let countdown = self.session.config().lobby_countdown_secs;
            self.advance(countdown);
            assert_eq!(self.session.phase(), MatchPhase::Active);
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            lobby_countdown_secs: 3,
            match_duration_secs: 20,
            rng_seed: Some(1),
            ..SessionConfig::default()
        }
    }

    fn replica_kinds(broadcasts: &[Broadcast]) -> Vec<&'static str> {
        broadcasts
            .iter()
            .map(|broadcast| match broadcast {
                Broadcast::Delta(delta) => match &delta.replica {
                    Replica::Phase(_) => "phase",
                    Replica::LobbyCountdown(_) => "lobby",
                    Replica::MatchCountdown(_) => "match",
                    Replica::Roster(_) => "roster",
                    Replica::Statistics(_) => "statistics",
                    Replica::Avatar { .. } => "avatar",
                },
                Broadcast::MatchEnded { .. } => "ended",
            })
            .collect()
    }

    #[test]
    fn test_lobby_countdown_follows_minimum() {
        let mut h = Harness::new(config());

        h.run(vec![SessionCommand::Join(1)]);
        assert!(!h.session.lobby_countdown().is_running());

        h.run(vec![SessionCommand::Join(2)]);
        assert!(h.session.lobby_countdown().is_running());
        assert_eq!(h.session.lobby_countdown().remaining(), Some(3));

        h.advance(1);
        h.run(vec![SessionCommand::Leave(2)]);
        assert!(!h.session.lobby_countdown().is_running());
        assert_eq!(h.session.lobby_countdown().remaining(), None);

        // Stays in the lobby however long we wait
        h.advance(10);
        assert_eq!(h.session.phase(), MatchPhase::Lobby);

        // Rejoining starts a fresh full countdown
        h.run(vec![SessionCommand::Join(3)]);
        assert_eq!(h.session.lobby_countdown().remaining(), Some(3));
    }

    #[test]
    fn test_stale_tick_after_cancel_is_ignored() {
        let mut h = Harness::new(config());
        h.run(vec![SessionCommand::Join(1), SessionCommand::Join(2)]);
        let queued = h.session.lobby_countdown().generation();

        h.run(vec![
            SessionCommand::Leave(2),
            SessionCommand::TimerTick {
                timer: TimerKind::Lobby,
                generation: queued,
            },
        ]);
        assert_eq!(h.session.lobby_countdown().remaining(), None);
        assert_eq!(h.session.phase(), MatchPhase::Lobby);
    }

    #[test]
    fn test_capacity_rejection_is_reported() {
        let mut h = Harness::new(SessionConfig {
            lobby_capacity: 2,
            ..config()
        });
        let notices = h.run(vec![
            SessionCommand::Join(1),
            SessionCommand::Join(2),
            SessionCommand::Join(3),
        ]);

        assert_eq!(notices.len(), 3);
        assert!(matches!(notices[0], SessionNotice::Admitted(_)));
        assert_eq!(
            notices[2],
            SessionNotice::Rejected {
                participant_id: 3,
                error: SessionError::CapacityExceeded { capacity: 2 },
            }
        );
        assert_eq!(h.session.roster().len(), 2);
    }

    #[test]
    fn test_match_start_orders_phase_before_clock() {
        let mut h = Harness::new(config());
        h.start_match(&[1, 2]);

        let kinds = replica_kinds(&h.drain());
        let phase = kinds.iter().rposition(|k| *k == "phase").unwrap();
        let clock = kinds.iter().position(|k| *k == "match").unwrap();
        assert!(phase < clock);

        assert_eq!(h.session.ledger().len(), 2);
        assert!(h.session.is_spawned(1));
        assert!(h.session.is_spawned(2));
        assert_eq!(h.session.match_countdown().remaining(), Some(20));
        assert_eq!(h.session.avatar_state(1), Some(AvatarState::full(6)));
    }

    #[test]
    fn test_lobby_closed_after_start() {
        let mut h = Harness::new(config());
        h.start_match(&[1, 2]);

        let notices = h.run(vec![SessionCommand::Join(3)]);
        assert_eq!(
            notices,
            vec![SessionNotice::Rejected {
                participant_id: 3,
                error: SessionError::LobbyClosed,
            }]
        );

        h.intent(1, Intent::Rename("Late".to_string()));
        h.intent(1, Intent::SetClass(ParticipantClass::Heavy));
        let participant = h.session.roster().get(1).unwrap();
        assert_eq!(participant.name, "Player 1");
        assert_eq!(participant.class, ParticipantClass::Agile);
    }

    #[test]
    fn test_class_choice_sets_health() {
        let mut h = Harness::new(config());
        h.run(vec![SessionCommand::Join(1), SessionCommand::Join(2)]);
        h.intent(2, Intent::SetClass(ParticipantClass::Heavy));
        h.advance(3);

        assert_eq!(h.session.avatar_state(2).unwrap().max_health, 9);
        assert_eq!(h.session.avatar_state(1).unwrap().max_health, 6);
    }

    #[test]
    fn test_countdown_expiry_ends_match_once() {
        let mut h = Harness::new(config());
        h.start_match(&[1, 2]);
        h.drain();

        h.advance(20);
        assert_eq!(h.session.phase(), MatchPhase::Ended);
        assert_eq!(h.session.end_reason(), Some(EndReason::CountdownElapsed));
        assert_eq!(h.session.match_countdown().remaining(), Some(0));

        h.advance(5);
        h.intent(1, Intent::Fire(Vec2::new(1.0, 0.0)));
        let ended = h
            .drain()
            .into_iter()
            .filter(|b| matches!(b, Broadcast::MatchEnded { .. }))
            .count();
        assert_eq!(ended, 1);
    }

    #[test]
    fn test_kill_limit_ends_match_with_leader() {
        let mut h = Harness::new(SessionConfig {
            victory_conditions: vec![
                VictoryCondition::CountdownZero,
                VictoryCondition::MaxKills(1),
            ],
            hit_damage: 6,
            ..config()
        });
        h.start_match(&[1, 2]);

        h.script.lock().unwrap().target = Some(2);
        h.intent(1, Intent::Fire(Vec2::new(1.0, 0.0)));

        assert_eq!(
            h.session.end_reason(),
            Some(EndReason::KillLimitReached { leader: 1 })
        );
        let row = h.session.ledger().get(2).unwrap();
        assert_eq!(row.deaths, 1);
        assert_eq!(h.session.ledger().get(1).unwrap().kills, 1);

        let last = h.drain().pop().unwrap();
        match last {
            Broadcast::MatchEnded { reason, standings } => {
                assert_eq!(reason, EndReason::KillLimitReached { leader: 1 });
                assert_eq!(standings[0].participant_id, 1);
            }
            other => panic!("expected the final standings, got {:?}", other),
        }
    }

    #[test]
    fn test_kill_respawns_victim_at_full_health() {
        let mut h = Harness::new(SessionConfig {
            hit_damage: 3,
            fire_cooldown: Duration::ZERO,
            ..config()
        });
        h.start_match(&[1, 2]);
        h.script.lock().unwrap().target = Some(2);

        h.intent(1, Intent::Fire(Vec2::new(1.0, 0.0)));
        assert_eq!(h.session.avatar_state(2).unwrap().health, 3);

        h.intent(1, Intent::Fire(Vec2::new(1.0, 0.0)));
        assert_eq!(h.session.avatar_state(2).unwrap().health, 6);
        assert_eq!(h.session.ledger().get(1).unwrap().kills, 1);
        assert_eq!(h.script.lock().unwrap().despawned, 1);
        assert_eq!(h.script.lock().unwrap().spawned.len(), 3);
        assert!(h.session.is_spawned(2));
    }

    #[test]
    fn test_fire_cooldown_limits_hits() {
        let mut h = Harness::new(config());
        h.start_match(&[1, 2]);
        h.script.lock().unwrap().target = Some(2);

        h.intent(1, Intent::Fire(Vec2::new(1.0, 0.0)));
        h.intent(1, Intent::Fire(Vec2::new(1.0, 0.0)));
        assert_eq!(h.session.avatar_state(2).unwrap().health, 5);

        h.now += Duration::from_secs(1);
        h.intent(1, Intent::Fire(Vec2::new(1.0, 0.0)));
        assert_eq!(h.session.avatar_state(2).unwrap().health, 4);
    }

    #[test]
    fn test_double_jump_then_land() {
        let mut h = Harness::new(config());
        h.start_match(&[1, 2]);

        h.intent(1, Intent::Jump);
        assert_eq!(h.session.avatar_state(1).unwrap().posture, Posture::Jumping);
        h.intent(1, Intent::Jump);
        h.drain();
        h.intent(1, Intent::Jump);
        // Third jump in the air is refused, nothing committed
        assert!(h.drain().is_empty());

        h.script.lock().unwrap().grounded = true;
        h.run(vec![]);
        assert_eq!(h.session.avatar_state(1).unwrap().posture, Posture::Grounded);

        h.intent(1, Intent::Jump);
        assert_eq!(h.session.avatar_state(1).unwrap().posture, Posture::Jumping);
    }

    #[test]
    fn test_hook_sets_posture_when_anchored() {
        let mut h = Harness::new(config());
        h.start_match(&[1, 2]);

        h.intent(1, Intent::Hook(Vec2::new(0.0, 1.0)));
        assert_eq!(h.session.avatar_state(1).unwrap().posture, Posture::Grounded);

        h.script.lock().unwrap().anchor = true;
        h.intent(1, Intent::Hook(Vec2::new(0.0, 1.0)));
        assert_eq!(h.session.avatar_state(1).unwrap().posture, Posture::Hooked);

        h.intent(1, Intent::Jump);
        assert_eq!(h.session.avatar_state(1).unwrap().posture, Posture::Jumping);
    }

    #[test]
    fn test_refused_jump_still_drops_hook() {
        let mut h = Harness::new(config());
        h.start_match(&[1, 2]);

        h.intent(1, Intent::Jump);
        h.intent(1, Intent::Jump);
        h.script.lock().unwrap().anchor = true;
        h.intent(1, Intent::Hook(Vec2::new(0.0, 1.0)));
        assert_eq!(h.session.avatar_state(1).unwrap().posture, Posture::Hooked);

        // No jumps left in the air, yet the avatar must come off the rope
        h.intent(1, Intent::Jump);
        assert_eq!(h.session.avatar_state(1).unwrap().posture, Posture::Jumping);

        h.script.lock().unwrap().grounded = true;
        h.run(vec![]);
        assert_eq!(h.session.avatar_state(1).unwrap().posture, Posture::Grounded);
    }

    #[test]
    fn test_missed_recast_keeps_hook() {
        let mut h = Harness::new(config());
        h.start_match(&[1, 2]);

        h.script.lock().unwrap().anchor = true;
        h.intent(1, Intent::Hook(Vec2::new(0.0, 1.0)));
        h.script.lock().unwrap().anchor = false;
        h.drain();
        h.intent(1, Intent::Hook(Vec2::new(-1.0, 0.0)));

        assert_eq!(h.session.avatar_state(1).unwrap().posture, Posture::Hooked);
        assert!(h.drain().is_empty());
    }

    #[test]
    fn test_spawn_deferred_until_point_frees() {
        let mut h = Harness::new(SessionConfig {
            spawn_points: vec![Vec2::new(0.0, 0.0)],
            ..config()
        });
        h.start_match(&[1, 2]);

        assert!(h.session.is_spawned(1));
        assert!(!h.session.is_spawned(2));
        assert_eq!(h.session.pending_spawns(), 1);

        h.advance(3);
        assert!(h.session.is_spawned(2));
        assert_eq!(h.session.pending_spawns(), 0);
    }

    #[test]
    fn test_everyone_leaving_abandons_match() {
        let mut h = Harness::new(config());
        h.start_match(&[1, 2]);

        h.run(vec![SessionCommand::Leave(1), SessionCommand::Leave(2)]);
        assert_eq!(h.session.end_reason(), Some(EndReason::Abandoned));
        assert_eq!(h.script.lock().unwrap().despawned, 2);
    }

    #[test]
    fn test_unknown_leave_is_harmless() {
        let mut h = Harness::new(config());
        h.run(vec![SessionCommand::Join(1)]);
        h.drain();

        h.run(vec![SessionCommand::Leave(42)]);
        assert_eq!(h.session.roster().len(), 1);
        assert!(h.drain().is_empty());
    }

    #[test]
    fn test_ping_samples_reach_ledger() {
        let mut h = Harness::new(config());
        h.start_match(&[1, 2]);

        h.run(vec![SessionCommand::PingSample {
            participant_id: 2,
            ping_ms: 48,
        }]);
        assert_eq!(h.session.ledger().get(2).unwrap().ping_ms, 48);
    }

    #[test]
    fn test_replay_reflects_current_state() {
        let mut h = Harness::new(config());
        h.start_match(&[1, 2]);

        let replay = h.session.replay();
        let kinds = replica_kinds(&replay);
        assert_eq!(
            kinds,
            vec!["phase", "roster", "lobby", "match", "statistics", "avatar", "avatar"]
        );
        match &replay[0] {
            Broadcast::Delta(delta) => {
                assert_eq!(delta.replica, Replica::Phase(MatchPhase::Active))
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
