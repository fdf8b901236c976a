//! Per-source circuit breaker.
//!
//! State machine:
//! - Closed: requests allowed. `consecutive_failures >= threshold` opens it.
//! - Open: requests rejected until `circuit_open_until`.
//! - Half-open: once the cooldown has elapsed, exactly one probe is admitted.
//!   A successful probe closes the circuit; a failed probe reopens it with
//!   the cooldown multiplied by `backoff_multiplier` (capped at `max_cooldown`).
//!
//! Each source owns its own lock. Every update is a single critical section, so
//! concurrent failures are counted exactly once each.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::measurement::Source;

#[derive(Clone, Debug)]
pub struct HealthConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// First cooldown after opening.
    pub cooldown: Duration,
    /// Applied to the cooldown on every failed probe.
    pub backoff_multiplier: f64,
    pub max_cooldown: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_cooldown: Duration::from_secs(600),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Answer to [`HealthTracker::try_acquire`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The caller is the single half-open probe and must report its outcome.
    Probe,
    Rejected { retry_in: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Rejected { .. })
    }
}

/// Circuit transitions reported back to the caller for logging and counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Opened { cooldown: Duration },
    Reopened { cooldown: Duration },
    Closed,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub source: Source,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Remaining cooldown while open.
    pub open_for_ms: Option<u64>,
    pub last_success_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct SourceHealth {
    consecutive_failures: u32,
    circuit_open_until: Option<Instant>,
    last_success_at: Option<DateTime<Utc>>,
    current_cooldown: Duration,
    /// Set while a half-open probe is outstanding.
    probe_started: Option<Instant>,
}

impl SourceHealth {
    fn new(cooldown: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            circuit_open_until: None,
            last_success_at: None,
            current_cooldown: cooldown,
            probe_started: None,
        }
    }

    fn state(&self, now: Instant) -> CircuitState {
        match self.circuit_open_until {
            None => CircuitState::Closed,
            Some(until) if now < until => CircuitState::Open,
            Some(_) => CircuitState::HalfOpen,
        }
    }
}

pub struct HealthTracker {
    cfg: HealthConfig,
    live: Mutex<SourceHealth>,
    replica: Mutex<SourceHealth>,
}

impl HealthTracker {
    pub fn new(cfg: HealthConfig) -> Self {
        let cfg = HealthConfig {
            failure_threshold: cfg.failure_threshold.max(1),
            backoff_multiplier: cfg.backoff_multiplier.max(1.0),
            max_cooldown: cfg.max_cooldown.max(cfg.cooldown),
            ..cfg
        };

        Self {
            live: Mutex::new(SourceHealth::new(cfg.cooldown)),
            replica: Mutex::new(SourceHealth::new(cfg.cooldown)),
            cfg,
        }
    }

    fn slot(&self, source: Source) -> &Mutex<SourceHealth> {
        match source {
            Source::Live => &self.live,
            Source::Replica => &self.replica,
        }
    }

    /// Decides whether a request to `source` may go ahead right now.
    ///
    /// In half-open state only the first caller gets [`Admission::Probe`]. A
    /// probe that never reports back (its future was dropped) stops blocking
    /// new probes after one cooldown.
    pub fn try_acquire(&self, source: Source) -> Admission {
        let now = Instant::now();
        let mut h = self.slot(source).lock();

        match h.state(now) {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => Admission::Rejected {
                retry_in: h
                    .circuit_open_until
                    .map(|until| until.saturating_duration_since(now))
                    .unwrap_or_default(),
            },
            CircuitState::HalfOpen => {
                if let Some(started) = h.probe_started {
                    let stale_at = started + h.current_cooldown;
                    if now < stale_at {
                        return Admission::Rejected {
                            retry_in: stale_at.saturating_duration_since(now),
                        };
                    }
                    warn!(target: "health", %source, "abandoning stale half-open probe");
                }

                h.probe_started = Some(now);
                info!(target: "health", %source, "circuit half-open; admitting probe");
                Admission::Probe
            }
        }
    }

    /// Resets the failure count and closes the circuit.
    pub fn record_success(&self, source: Source) -> Option<Transition> {
        let mut h = self.slot(source).lock();

        let was_open = h.circuit_open_until.is_some();
        h.consecutive_failures = 0;
        h.circuit_open_until = None;
        h.probe_started = None;
        h.current_cooldown = self.cfg.cooldown;
        h.last_success_at = Some(Utc::now());

        if was_open {
            info!(target: "health", %source, "circuit closed");
            Some(Transition::Closed)
        } else {
            None
        }
    }

    /// Counts one failure and opens (or reopens) the circuit when due.
    pub fn record_failure(&self, source: Source) -> Option<Transition> {
        let now = Instant::now();
        let mut h = self.slot(source).lock();

        h.consecutive_failures = h.consecutive_failures.saturating_add(1);

        match h.state(now) {
            CircuitState::Closed if h.consecutive_failures >= self.cfg.failure_threshold => {
                let cooldown = h.current_cooldown;
                h.circuit_open_until = Some(now + cooldown);
                h.probe_started = None;

                warn!(
                    target: "health",
                    %source,
                    failures = h.consecutive_failures,
                    cooldown_ms = cooldown.as_millis() as u64,
                    "circuit opened"
                );
                Some(Transition::Opened { cooldown })
            }
            CircuitState::HalfOpen => {
                let cooldown = self.next_cooldown(h.current_cooldown);
                h.current_cooldown = cooldown;
                h.circuit_open_until = Some(now + cooldown);
                h.probe_started = None;

                warn!(
                    target: "health",
                    %source,
                    failures = h.consecutive_failures,
                    cooldown_ms = cooldown.as_millis() as u64,
                    "probe failed; circuit reopened"
                );
                Some(Transition::Reopened { cooldown })
            }
            // Below threshold, or a straggler admitted before the circuit opened.
            _ => None,
        }
    }

    fn next_cooldown(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.cfg.backoff_multiplier)
            .min(self.cfg.max_cooldown)
    }

    pub fn state(&self, source: Source) -> CircuitState {
        self.slot(source).lock().state(Instant::now())
    }

    pub fn snapshot(&self, source: Source) -> HealthSnapshot {
        let now = Instant::now();
        let h = self.slot(source).lock();
        let state = h.state(now);

        HealthSnapshot {
            source,
            state,
            consecutive_failures: h.consecutive_failures,
            open_for_ms: match (state, h.circuit_open_until) {
                (CircuitState::Open, Some(until)) => {
                    Some(until.saturating_duration_since(now).as_millis() as u64)
                }
                _ => None,
            },
            last_success_at: h.last_success_at,
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}
