//! One measurement cycle: actuation followed by a capture burst.

use crate::acquisition::{
    AcquisitionError, CaptureStats, ConversionTrigger, SharedCapture, acquire,
};
use crate::actuation::{ActuationTimings, ActuatorDriver, run_sequence};
use crate::config::PACKED_GROUP_LEN;
use crate::delay::MillisDelay;

/// Source of packed sample bursts for the control loop.
pub trait Measurement {
    /// Runs a full cycle and blocks until the capture buffer is complete.
    ///
    /// # Errors
    ///
    /// Fails when the capture stalls.
    fn measure(&mut self) -> Result<CaptureStats, AcquisitionError>;

    /// Number of packed groups produced by the last cycle.
    ///
    /// # Errors
    ///
    /// Fails while no finished cycle is available.
    fn group_count(&self) -> Result<usize, AcquisitionError>;

    /// Reads one packed group produced by the last cycle.
    ///
    /// # Errors
    ///
    /// Fails while no finished cycle is available or when `index` is past the
    /// last group.
    fn packed_group(&self, index: usize) -> Result<[u8; PACKED_GROUP_LEN], AcquisitionError>;
}

/// Relay/polarizer sequence followed by a timer-triggered capture.
pub struct PpmMeasurement<'c, A, T, M, const N: usize> {
    actuators: A,
    trigger: T,
    delay: M,
    capture: &'c SharedCapture<N>,
    timings: ActuationTimings,
    stall_timeout_ms: Option<u32>,
}

impl<'c, A, T, M, const N: usize> PpmMeasurement<'c, A, T, M, N>
where
    A: ActuatorDriver,
    T: ConversionTrigger,
    M: MillisDelay,
{
    /// Builds the cycle and de-energizes both outputs.
    #[must_use]
    pub fn new(
        mut actuators: A,
        trigger: T,
        delay: M,
        capture: &'c SharedCapture<N>,
        timings: ActuationTimings,
        stall_timeout_ms: Option<u32>,
    ) -> Self {
        actuators.release_all();
        Self {
            actuators,
            trigger,
            delay,
            capture,
            timings,
            stall_timeout_ms,
        }
    }
}

impl<A, T, M, const N: usize> Measurement for PpmMeasurement<'_, A, T, M, N>
where
    A: ActuatorDriver,
    T: ConversionTrigger,
    M: MillisDelay,
{
    fn measure(&mut self) -> Result<CaptureStats, AcquisitionError> {
        run_sequence(&mut self.actuators, &mut self.delay, &self.timings);
        acquire(
            self.capture,
            &mut self.trigger,
            &mut self.delay,
            self.stall_timeout_ms,
        )
    }

    fn group_count(&self) -> Result<usize, AcquisitionError> {
        self.capture.group_count()
    }

    fn packed_group(&self, index: usize) -> Result<[u8; PACKED_GROUP_LEN], AcquisitionError> {
        self.capture.packed_group(index)
    }
}
