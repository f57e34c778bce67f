//! DriverActor - drives a unit and injects failures
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → Unit::tick → FailureInjector::on_tick → events
//!     ↑
//!     └─── StopSignal
//! ```

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand::rngs::StdRng;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, instrument, trace};

use crate::config::FailureMode;
use crate::events::{EventEmitter, EventKind};
use crate::signal::StopSignal;
use crate::unit::Unit;

use super::messages::DriverStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectorStep {
    Idle,
    Injected,
    /// The unit is healthy again and a new countdown was drawn
    EpisodeClosed,
}

/// Schedules failures on a countdown of driving ticks
///
/// The countdown is drawn once per episode from `range`. It only runs while no
/// failure episode is open; an episode closes when the unit is healthy again.
#[derive(Debug)]
pub struct FailureInjector {
    range: RangeInclusive<u32>,
    mode: FailureMode,
    remaining: u32,
    in_episode: bool,
}

impl FailureInjector {
    pub fn new<R: Rng + ?Sized>(range: RangeInclusive<u32>, mode: FailureMode, rng: &mut R) -> Self {
        let remaining = rng.gen_range(range.clone());
        Self {
            range,
            mode,
            remaining,
            in_episode: false,
        }
    }

    /// Ticks left before the next failure, 0 during an episode
    pub fn remaining(&self) -> u32 {
        if self.in_episode { 0 } else { self.remaining }
    }

    pub fn in_episode(&self) -> bool {
        self.in_episode
    }

    pub fn on_tick<R: Rng + ?Sized>(&mut self, unit: &Unit, rng: &mut R) -> InjectorStep {
        if self.in_episode {
            if !unit.is_healthy() {
                return InjectorStep::Idle;
            }
            self.in_episode = false;
            self.remaining = rng.gen_range(self.range.clone());
            return InjectorStep::EpisodeClosed;
        }

        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining > 0 {
            return InjectorStep::Idle;
        }

        let injected = match self.mode {
            FailureMode::Disconnected => unit.inject_failure(),
            FailureMode::Silent => unit.inject_silent_failure(),
        };

        if injected {
            self.in_episode = true;
            InjectorStep::Injected
        } else {
            // not healthy right now, try again next tick
            InjectorStep::Idle
        }
    }
}

pub struct DriverActor {
    /// Unit being driven
    unit: Arc<Unit>,

    /// Decides on which tick the next failure happens
    injector: FailureInjector,

    /// Source for produced item counts and failure countdowns
    rng: StdRng,

    /// Time between two production ticks
    tick_interval: Duration,

    /// Scenario-wide stop
    stop: StopSignal,

    /// Produced, silence and failure events
    events: EventEmitter,

    /// Counters returned when the actor stops
    stats: DriverStats,
}

impl DriverActor {
    pub fn new(
        unit: Arc<Unit>,
        injector: FailureInjector,
        rng: StdRng,
        tick_interval: Duration,
        stop: StopSignal,
        events: EventEmitter,
    ) -> Self {
        Self {
            unit,
            injector,
            rng,
            tick_interval,
            stop,
            events,
            stats: DriverStats::default(),
        }
    }

    /// Spawn the actor; the task resolves to its statistics
    pub fn spawn(self) -> JoinHandle<DriverStats> {
        tokio::spawn(self.run())
    }

    #[instrument(skip(self), fields(unit = %self.unit.name()))]
    pub async fn run(mut self) -> DriverStats {
        debug!("starting driver actor");

        let mut ticker = interval_at(Instant::now() + self.tick_interval, self.tick_interval);

        loop {
            tokio::select! {
                biased;

                _ = self.stop.stopped() => {
                    debug!("stop requested");
                    break;
                }

                _ = ticker.tick() => self.on_tick(),
            }
        }

        self.events.emit(EventKind::ActorStopped);
        debug!("driver actor stopped");
        self.stats
    }

    fn on_tick(&mut self) {
        self.stats.ticks += 1;

        // produce before injecting, so the last commit is the failure instant
        let items = self.unit.tick(&mut self.rng);
        if items > 0 {
            self.stats.productive_ticks += 1;
            self.events.emit(EventKind::Produced {
                items,
                total: self.unit.total_work_items(),
            });
        } else {
            let age = self.unit.metrics().offset_age(Instant::now());
            self.events.emit(EventKind::Silence {
                offset_age_ms: crate::util::millis(age),
            });
        }

        match self.injector.on_tick(&self.unit, &mut self.rng) {
            InjectorStep::Injected => {
                self.stats.failures_injected += 1;
                self.events.emit(EventKind::FailureInjected {
                    silent: self.injector.mode == FailureMode::Silent,
                });
            }
            InjectorStep::EpisodeClosed => {
                trace!("next failure in {} ticks", self.injector.remaining());
            }
            InjectorStep::Idle => {}
        }
    }
}
