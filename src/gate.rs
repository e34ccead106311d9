//! Gate relay state machine.
//!
//! The gate is driven open-loop: nothing reports its real position. A single
//! relay pulse simulates a button press and the gate is assumed to be moving
//! for a fixed window measured from that press. Only the end of that window
//! returns the controller to [`GateState::Stopped`], and a pending reset is
//! never cancelled or extended.

use std::time::Duration;

use log::{debug, error, info};
use tokio::time::Instant;

use crate::actuator::{ActuatorError, OutputPin};

const RELEASE_RETRY: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    Stopped,
    Moving,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Started,
    /// Already moving; the request was discarded.
    Dropped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateTransition {
    PulseReleased,
    Stopped,
}

#[derive(Clone, Copy, Debug)]
pub struct GateTiming {
    pub pulse: Duration,
    pub movement: Duration,
}

impl Default for GateTiming {
    fn default() -> Self {
        GateTiming {
            pulse: Duration::from_millis(1000),
            movement: Duration::from_millis(3000),
        }
    }
}

pub struct GateController<P> {
    relay: P,
    timing: GateTiming,
    state: GateState,
    pulse_release_at: Option<Instant>,
    reset_at: Option<Instant>,
}

impl<P: OutputPin> GateController<P> {
    pub fn new(relay: P, timing: GateTiming) -> Self {
        GateController {
            relay,
            timing,
            state: GateState::Stopped,
            pulse_release_at: None,
            reset_at: None,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Presses the gate button unless the gate is already moving.
    ///
    /// The movement window opens even when asserting the relay fails, so a
    /// burst of retries from the same beacon cannot hammer a faulty output.
    pub fn activate(&mut self, now: Instant) -> Result<Activation, ActuatorError> {
        if self.state == GateState::Moving {
            debug!("Gate already moving, ignoring activation");
            return Ok(Activation::Dropped);
        }

        self.state = GateState::Moving;
        self.pulse_release_at = Some(now + self.timing.pulse);
        self.reset_at = Some(now + self.timing.movement);
        info!("Gate state {:?}", self.state);

        self.relay.write(true)?;
        Ok(Activation::Started)
    }

    /// Earliest pending timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.pulse_release_at, self.reset_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fires every timer due at `now`.
    pub fn poll_timers(&mut self, now: Instant) -> Vec<GateTransition> {
        let mut transitions = Vec::new();

        if let Some(at) = self.pulse_release_at {
            if at <= now {
                match self.relay.write(false) {
                    Ok(()) => {
                        self.pulse_release_at = None;
                        transitions.push(GateTransition::PulseReleased);
                    }
                    Err(err) => {
                        error!("Failed to release gate relay, retrying: {}", err);
                        self.pulse_release_at = Some(now + RELEASE_RETRY);
                    }
                }
            }
        }

        if let Some(at) = self.reset_at {
            if at <= now {
                self.reset_at = None;
                self.state = GateState::Stopped;
                info!("Gate state {:?}", self.state);
                transitions.push(GateTransition::Stopped);
            }
        }

        transitions
    }
}
