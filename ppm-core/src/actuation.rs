//! Relay and polarizing-coil actuation sequence.
//!
//! The sequence is open loop: it applies each step, waits the step's hold
//! time, and moves on regardless of what the acquisition side observes.
//!
//! Timeline with the default timings:
//! 1. Lead-in (t1 = 20 ms).
//! 2. Energize the relay, let the contacts settle (t2 = 200 ms).
//! 3. Energize the polarizer and hold while current flows through the coil
//!    (t3 = 6 s).
//! 4. De-energize the polarizer, settle (t4 = 20 ms).
//! 5. De-energize the relay, cool down before sampling (t5 = 10 ms).

use core::time::Duration;

use crate::config::{COOL_DOWN, LEAD_IN, POLARIZE_HOLD, POLARIZE_RELEASE, RELAY_SETTLE};
use crate::delay::MillisDelay;

/// Outputs driven by the sequencer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ActuatorId {
    Relay,
    Polarizer,
}

/// Action applied to an output.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ActuatorAction {
    Energize,
    DeEnergize,
}

/// Abstraction over the physical actuator outputs.
pub trait ActuatorDriver {
    /// Applies the requested action to the output.
    fn apply(&mut self, output: ActuatorId, action: ActuatorAction);

    /// De-energizes every output.
    fn release_all(&mut self);
}

/// Actuator driver that performs no hardware interaction.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopActuatorDriver;

impl ActuatorDriver for NoopActuatorDriver {
    fn apply(&mut self, _: ActuatorId, _: ActuatorAction) {}

    fn release_all(&mut self) {}
}

impl<T: ActuatorDriver + ?Sized> ActuatorDriver for &mut T {
    fn apply(&mut self, output: ActuatorId, action: ActuatorAction) {
        (**self).apply(output, action);
    }

    fn release_all(&mut self) {
        (**self).release_all();
    }
}

/// Ordered operation applied to an output, followed by a hold.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ActuationStep {
    pub output: ActuatorId,
    pub action: ActuatorAction,
    pub hold: Duration,
}

impl ActuationStep {
    #[must_use]
    pub const fn new(output: ActuatorId, action: ActuatorAction, hold: Duration) -> Self {
        Self {
            output,
            action,
            hold,
        }
    }
}

/// The five stage delays of the sequence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ActuationTimings {
    /// t1: wait before the relay closes.
    pub lead_in: Duration,
    /// t2: relay closed, polarizer off.
    pub relay_settle: Duration,
    /// t3: polarizer on.
    pub polarize_hold: Duration,
    /// t4: polarizer off, relay still closed.
    pub polarize_release: Duration,
    /// t5: everything off before sampling.
    pub cool_down: Duration,
}

impl ActuationTimings {
    #[must_use]
    pub const fn new(
        lead_in: Duration,
        relay_settle: Duration,
        polarize_hold: Duration,
        polarize_release: Duration,
        cool_down: Duration,
    ) -> Self {
        Self {
            lead_in,
            relay_settle,
            polarize_hold,
            polarize_release,
            cool_down,
        }
    }

    /// Ordered steps that follow the lead-in.
    #[must_use]
    pub const fn steps(&self) -> [ActuationStep; 4] {
        [
            ActuationStep::new(ActuatorId::Relay, ActuatorAction::Energize, self.relay_settle),
            ActuationStep::new(ActuatorId::Polarizer, ActuatorAction::Energize, self.polarize_hold),
            ActuationStep::new(
                ActuatorId::Polarizer,
                ActuatorAction::DeEnergize,
                self.polarize_release,
            ),
            ActuationStep::new(ActuatorId::Relay, ActuatorAction::DeEnergize, self.cool_down),
        ]
    }

    /// Total wall time the sequence blocks for.
    #[must_use]
    pub const fn total(&self) -> Duration {
        self.lead_in
            .saturating_add(self.relay_settle)
            .saturating_add(self.polarize_hold)
            .saturating_add(self.polarize_release)
            .saturating_add(self.cool_down)
    }
}

impl Default for ActuationTimings {
    fn default() -> Self {
        DEFAULT_TIMINGS
    }
}

/// Timings the hardware was tuned with.
pub const DEFAULT_TIMINGS: ActuationTimings = ActuationTimings::new(
    LEAD_IN,
    RELAY_SETTLE,
    POLARIZE_HOLD,
    POLARIZE_RELEASE,
    COOL_DOWN,
);

/// Runs the full sequence, blocking until the cool-down has elapsed.
pub fn run_sequence<A, M>(driver: &mut A, delay: &mut M, timings: &ActuationTimings)
where
    A: ActuatorDriver,
    M: MillisDelay,
{
    delay.delay_ms(whole_millis(timings.lead_in));
    for step in timings.steps() {
        driver.apply(step.output, step.action);
        delay.delay_ms(whole_millis(step.hold));
    }
}

/// Millisecond count handed to the delay provider. Sub-millisecond remainders
/// are dropped and holds beyond `u32::MAX` ms saturate.
#[must_use]
pub fn whole_millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timings_match_tuned_values() {
        let timings = ActuationTimings::default();
        assert_eq!(timings.lead_in, Duration::from_millis(20));
        assert_eq!(timings.relay_settle, Duration::from_millis(200));
        assert_eq!(timings.polarize_hold, Duration::from_secs(6));
        assert_eq!(timings.polarize_release, Duration::from_millis(20));
        assert_eq!(timings.cool_down, Duration::from_millis(10));
        assert_eq!(timings.total(), Duration::from_millis(6_250));
    }

    #[test]
    fn steps_close_relay_around_polarizer() {
        let steps = DEFAULT_TIMINGS.steps();

        assert_eq!(steps[0].output, ActuatorId::Relay);
        assert_eq!(steps[0].action, ActuatorAction::Energize);
        assert_eq!(steps[1].output, ActuatorId::Polarizer);
        assert_eq!(steps[1].action, ActuatorAction::Energize);
        assert_eq!(steps[1].hold, POLARIZE_HOLD);
        assert_eq!(steps[2].output, ActuatorId::Polarizer);
        assert_eq!(steps[2].action, ActuatorAction::DeEnergize);
        assert_eq!(steps[3].output, ActuatorId::Relay);
        assert_eq!(steps[3].action, ActuatorAction::DeEnergize);
        assert_eq!(steps[3].hold, COOL_DOWN);
    }

    #[test]
    fn holds_convert_to_whole_milliseconds() {
        assert_eq!(whole_millis(POLARIZE_HOLD), 6_000);
        assert_eq!(whole_millis(Duration::from_micros(1_999)), 1);
        assert_eq!(whole_millis(Duration::ZERO), 0);
        assert_eq!(whole_millis(Duration::from_secs(u64::MAX)), u32::MAX);
    }
}
