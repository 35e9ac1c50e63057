//! Mock Hardware Implementations
//!
//! Provides simulated PWM lines for testing without a Raspberry Pi.
//! Nothing here sleeps: holds are recorded instead of waited out, so a full jib
//! sweep runs in microseconds.
//!
//! # Available Mocks
//!
//! - `MockBus` - hands out lines, enforces one owner per line, injects faults
//! - `MockLine` - records every start/stop into the bus event log
//! - `MockDelay` - records hold durations into the same log
//!
//! Because lines and delays share one log, tests can assert the exact
//! energise -> hold -> stop ordering of a move.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{JibError, JibResult};
use crate::hardware::{Delay, DutyCycle, LineId, PwmBus, PwmLine};

// =============================================================================
// Event log
// =============================================================================

/// Something that happened on the mock bus.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    /// A line started emitting PWM.
    Start {
        /// Line started.
        line: LineId,
        /// PWM frequency requested.
        frequency_hz: f64,
        /// Duty cycle requested.
        duty: DutyCycle,
    },
    /// A delay was requested while holding a signal.
    Hold(Duration),
    /// A line was stopped.
    Stop {
        /// Line stopped.
        line: LineId,
    },
}

#[derive(Debug, Default)]
struct FaultPlan {
    /// Successful starts allowed before every further start fails.
    starts_before_failure: Option<usize>,
    fail_stop: bool,
}

#[derive(Debug, Default)]
struct BusState {
    claimed: HashSet<LineId>,
    energized: HashSet<LineId>,
    starts: HashMap<LineId, usize>,
    faults: HashMap<LineId, FaultPlan>,
    unavailable: bool,
    events: Vec<LineEvent>,
}

// =============================================================================
// MockBus
// =============================================================================

/// In-memory PWM bus.
///
/// Cloning the bus shares the same state, so a test can keep a handle for
/// inspection after moving lines into servos.
///
/// # Example
///
/// ```rust
/// use jib::hardware::mock::MockBus;
/// use jib::hardware::{LineId, PwmBus};
///
/// let mut bus = MockBus::new();
/// let line = bus.claim(LineId(8)).unwrap();
/// assert!(bus.claim(LineId(8)).is_err());
/// drop(line);
/// assert!(bus.claim(LineId(8)).is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockBus {
    state: Arc<Mutex<BusState>>,
}

impl MockBus {
    /// Create an empty bus with every line free.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay that records holds into this bus's event log.
    pub fn delay(&self) -> MockDelay {
        MockDelay {
            state: Arc::clone(&self.state),
        }
    }

    /// Make every further claim fail as if the GPIO device could not be opened.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Let `line` start successfully `successes` more times, then fail every start.
    pub fn fail_start_after(&self, line: LineId, successes: usize) {
        let mut state = self.state.lock();
        let already = state.starts.get(&line).copied().unwrap_or(0);
        state.faults.entry(line).or_default().starts_before_failure = Some(already + successes);
    }

    /// Make every start on `line` fail.
    pub fn fail_start(&self, line: LineId) {
        self.fail_start_after(line, 0);
    }

    /// Make every stop on `line` fail (the line still ends up de-energised).
    pub fn fail_stop(&self, line: LineId) {
        self.state.lock().faults.entry(line).or_default().fail_stop = true;
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        let mut state = self.state.lock();
        state.faults.clear();
        state.unavailable = false;
    }

    /// Full event log in order.
    pub fn events(&self) -> Vec<LineEvent> {
        self.state.lock().events.clone()
    }

    /// Forget recorded events.
    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// Duty cycles started on `line`, in order.
    pub fn duties(&self, line: LineId) -> Vec<DutyCycle> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                LineEvent::Start { line: l, duty, .. } if *l == line => Some(*duty),
                _ => None,
            })
            .collect()
    }

    /// Hold durations, in order.
    pub fn holds(&self) -> Vec<Duration> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                LineEvent::Hold(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    /// Whether `line` is currently emitting PWM.
    pub fn is_energized(&self, line: LineId) -> bool {
        self.state.lock().energized.contains(&line)
    }

    /// Whether `line` is currently owned by someone.
    pub fn is_claimed(&self, line: LineId) -> bool {
        self.state.lock().claimed.contains(&line)
    }
}

impl PwmBus for MockBus {
    type Line = MockLine;

    fn claim(&mut self, line: LineId) -> JibResult<MockLine> {
        let mut state = self.state.lock();
        if state.unavailable {
            return Err(JibError::hardware(line, "GPIO device unavailable"));
        }
        if !state.claimed.insert(line) {
            return Err(JibError::LineBusy(line));
        }
        debug!(%line, "MockBus: line claimed");
        Ok(MockLine {
            id: line,
            state: Arc::clone(&self.state),
        })
    }
}

// =============================================================================
// MockLine
// =============================================================================

/// Line handed out by [`MockBus`]. Releases its claim on drop.
#[derive(Debug)]
pub struct MockLine {
    id: LineId,
    state: Arc<Mutex<BusState>>,
}

impl PwmLine for MockLine {
    fn id(&self) -> LineId {
        self.id
    }

    fn start(&mut self, frequency_hz: f64, duty: DutyCycle) -> JibResult<()> {
        let mut state = self.state.lock();
        let started = state.starts.get(&self.id).copied().unwrap_or(0);
        let limit = state
            .faults
            .get(&self.id)
            .and_then(|plan| plan.starts_before_failure);
        if limit.is_some_and(|limit| started >= limit) {
            return Err(JibError::hardware(self.id, "injected start failure"));
        }

        state.starts.insert(self.id, started + 1);
        state.energized.insert(self.id);
        state.events.push(LineEvent::Start {
            line: self.id,
            frequency_hz,
            duty,
        });
        Ok(())
    }

    fn stop(&mut self) -> JibResult<()> {
        let mut state = self.state.lock();
        state.energized.remove(&self.id);
        state.events.push(LineEvent::Stop { line: self.id });
        if state
            .faults
            .get(&self.id)
            .is_some_and(|plan| plan.fail_stop)
        {
            return Err(JibError::hardware(self.id, "injected stop failure"));
        }
        Ok(())
    }
}

impl Drop for MockLine {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.energized.remove(&self.id);
        state.claimed.remove(&self.id);
    }
}

// =============================================================================
// MockDelay
// =============================================================================

/// Delay that records instead of sleeping.
#[derive(Debug, Clone, Default)]
pub struct MockDelay {
    state: Arc<Mutex<BusState>>,
}

impl MockDelay {
    /// Delay with its own private log, for channels built without a [`MockBus`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all recorded holds.
    pub fn total(&self) -> Duration {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                LineEvent::Hold(d) => Some(*d),
                _ => None,
            })
            .sum()
    }
}

impl Delay for MockDelay {
    fn delay(&mut self, duration: Duration) {
        self.state.lock().events.push(LineEvent::Hold(duration));
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
