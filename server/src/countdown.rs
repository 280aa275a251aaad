//! Second-granularity countdowns for the lobby and the match clock.
//!
//! A [`Countdown`] never sleeps itself. Ticks come from a [`TickSource`]
//! (normally an [`IntervalTicker`] task) as [`SessionCommand::TimerTick`]
//! commands carrying the generation the countdown had when it was armed.
//! Every `start` and `stop` bumps the generation, so a tick that was already
//! queued when the countdown was restarted or cancelled is recognised as
//! stale and dropped.

use crate::error::SessionError;
use crate::session::SessionCommand;
use log::debug;
use shared::{Change, Replicated};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Lobby,
    Match,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKind::Lobby => write!(f, "lobby"),
            TimerKind::Match => write!(f, "match"),
        }
    }
}

/// Something that delivers one tick per second for an armed countdown.
pub trait TickSource: Send {
    fn arm(&mut self, timer: TimerKind, generation: u64);
    fn disarm(&mut self);
}

/// Tokio interval task feeding ticks into the session's command channel.
pub struct IntervalTicker {
    commands: mpsc::UnboundedSender<SessionCommand>,
    period: Duration,
    task: Option<JoinHandle<()>>,
}

impl IntervalTicker {
    pub fn new(commands: mpsc::UnboundedSender<SessionCommand>) -> Self {
        Self::with_period(commands, Duration::from_secs(1))
    }

    pub fn with_period(commands: mpsc::UnboundedSender<SessionCommand>, period: Duration) -> Self {
        Self {
            commands,
            period,
            task: None,
        }
    }
}

impl TickSource for IntervalTicker {
    fn arm(&mut self, timer: TimerKind, generation: u64) {
        self.disarm();

        let commands = self.commands.clone();
        let period = self.period;
        self.task = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;
                if commands
                    .send(SessionCommand::TimerTick { timer, generation })
                    .is_err()
                {
                    break;
                }
            }
        }));
    }

    fn disarm(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for IntervalTicker {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CountdownState {
    Stopped,
    Running { remaining: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownEvent {
    Ticked(u32),
    Expired,
}

pub struct Countdown {
    kind: TimerKind,
    state: CountdownState,
    generation: u64,
    remaining: Replicated<Option<u32>>,
    source: Option<Box<dyn TickSource>>,
}

impl Countdown {
    pub fn new(kind: TimerKind) -> Self {
        Self {
            kind,
            state: CountdownState::Stopped,
            generation: 0,
            remaining: Replicated::authority(None),
            source: None,
        }
    }

    pub fn set_source(&mut self, source: Box<dyn TickSource>) {
        self.source = Some(source);
    }

    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: FnMut(&Change<'_, Option<u32>>) + Send + 'static,
    {
        self.remaining.subscribe(callback);
    }

    /// Starts from `seconds`, replacing any run in progress.
    pub fn start(&mut self, seconds: u32) -> Result<(), SessionError> {
        self.generation += 1;
        self.state = CountdownState::Running { remaining: seconds };
        self.remaining.set(Some(seconds))?;
        if let Some(source) = self.source.as_mut() {
            source.arm(self.kind, self.generation);
        }
        debug!("{} countdown started at {}s", self.kind, seconds);
        Ok(())
    }

    /// Cancels the run and hides the displayed value.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        self.generation += 1;
        if let Some(source) = self.source.as_mut() {
            source.disarm();
        }
        if self.state != CountdownState::Stopped {
            self.state = CountdownState::Stopped;
            debug!("{} countdown stopped", self.kind);
        }
        if self.remaining.get().is_some() {
            self.remaining.set(None)?;
        }
        Ok(())
    }

    /// Applies one tick. Ticks from an older generation are ignored.
    ///
    /// The new remaining value is committed before expiry is reported, so
    /// observers always see the final `0`.
    pub fn tick(&mut self, generation: u64) -> Result<Option<CountdownEvent>, SessionError> {
        if generation != self.generation {
            debug!(
                "Dropping stale {} tick (generation {} != {})",
                self.kind, generation, self.generation
            );
            return Ok(None);
        }
        let remaining = match self.state {
            CountdownState::Running { remaining } => remaining.saturating_sub(1),
            CountdownState::Stopped => return Ok(None),
        };

        self.remaining.set(Some(remaining))?;
        if remaining == 0 {
            self.state = CountdownState::Stopped;
            if let Some(source) = self.source.as_mut() {
                source.disarm();
            }
            return Ok(Some(CountdownEvent::Expired));
        }
        self.state = CountdownState::Running { remaining };
        Ok(Some(CountdownEvent::Ticked(remaining)))
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, CountdownState::Running { .. })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    /// Seconds left as shown to observers.
    pub fn remaining(&self) -> Option<u32> {
        *self.remaining.get()
    }

    pub fn revision(&self) -> u64 {
        self.remaining.revision()
    }
}
