//! Interrupt-driven sample capture and 12-bit packing.
//!
//! A hardware timer fires conversions at a fixed rate and the conversion
//! complete interrupt hands each result to [`SharedCapture::on_conversion`].
//! Results alternate between channel A (even events) and channel B (odd
//! events); every odd event packs the latched A value and the new B value into
//! three bytes.
//!
//! Ownership of the packed buffer is split in time. While a cycle is armed only
//! the interrupt handler writes it; the foreground loop only watches the
//! atomic event counter. Packed groups become readable once the cycle has been
//! disarmed and the event target was reached, so the drain step can never see
//! a half-written pair.

use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::PACKED_GROUP_LEN;
use crate::delay::MillisDelay;

/// Conversion results are 12 bits wide.
pub const SAMPLE_MASK: u16 = 0x0fff;

/// Packs two 12-bit samples into three bytes, A first.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn pack_pair(a: u16, b: u16) -> [u8; PACKED_GROUP_LEN] {
    let a = a & SAMPLE_MASK;
    let b = b & SAMPLE_MASK;
    [
        (a >> 4) as u8,
        (((a & 0x0f) << 4) | ((b >> 8) & 0x0f)) as u8,
        (b & 0xff) as u8,
    ]
}

/// Recovers the two samples stored in a packed group.
#[must_use]
pub const fn unpack_group(group: [u8; PACKED_GROUP_LEN]) -> (u16, u16) {
    let a = ((group[0] as u16) << 4) | ((group[1] as u16) >> 4);
    let b = (((group[1] as u16) & 0x0f) << 8) | group[2] as u16;
    (a, b)
}

/// Expands a packed stream back into samples in capture order.
///
/// A trailing partial group is ignored.
pub fn unpack_samples(packed: &[u8]) -> impl Iterator<Item = u16> + '_ {
    packed
        .chunks_exact(PACKED_GROUP_LEN)
        .flat_map(|chunk| {
            let (a, b) = unpack_group([chunk[0], chunk[1], chunk[2]]);
            [a, b]
        })
}

/// What the handler did with a conversion result.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConversionOutcome {
    /// Even event: stored as channel A.
    Latched,
    /// Odd event: a full pair was written to the buffer.
    Packed,
    /// The cycle is not armed or already complete.
    Ignored,
}

/// Counters describing a capture cycle.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CaptureStats {
    pub events: u32,
    pub bytes_written: usize,
    pub overruns: u32,
}

/// Packed buffer plus the per-cycle state the handler mutates.
pub struct CaptureBuffer<const N: usize> {
    bytes: [u8; N],
    latched_a: u16,
    events: u32,
    written: usize,
    overruns: u32,
}

impl<const N: usize> CaptureBuffer<N> {
    /// Conversion events needed to fill the buffer exactly.
    #[allow(clippy::cast_possible_truncation)]
    pub const TARGET_EVENTS: u32 = (N / PACKED_GROUP_LEN * 2) as u32;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: [0; N],
            latched_a: 0,
            events: 0,
            written: 0,
            overruns: 0,
        }
    }

    /// Clears the counters for a new cycle. Stale bytes are overwritten as the
    /// cycle progresses.
    pub fn reset(&mut self) {
        self.latched_a = 0;
        self.events = 0;
        self.written = 0;
        self.overruns = 0;
    }

    /// Classifies and stores one conversion result.
    pub fn record(&mut self, raw: u16) -> ConversionOutcome {
        if self.is_complete() {
            self.overruns = self.overruns.saturating_add(1);
            return ConversionOutcome::Ignored;
        }

        let sample = raw & SAMPLE_MASK;
        let outcome = if self.events.is_multiple_of(2) {
            self.latched_a = sample;
            ConversionOutcome::Latched
        } else {
            let end = self.written + PACKED_GROUP_LEN;
            self.bytes[self.written..end].copy_from_slice(&pack_pair(self.latched_a, sample));
            self.written = end;
            ConversionOutcome::Packed
        };
        self.events += 1;
        outcome
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.events >= Self::TARGET_EVENTS
    }

    #[must_use]
    pub fn events(&self) -> u32 {
        self.events
    }

    #[must_use]
    pub fn bytes_written(&self) -> usize {
        self.written
    }

    /// Bytes packed so far.
    #[must_use]
    pub fn packed(&self) -> &[u8] {
        &self.bytes[..self.written]
    }

    #[must_use]
    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            events: self.events,
            bytes_written: self.written,
            overruns: self.overruns,
        }
    }
}

impl<const N: usize> Default for CaptureBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors surfaced by the acquisition pipeline.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AcquisitionError {
    /// No conversion arrived within the stall timeout.
    Stalled { events: u32 },
    /// The buffer was accessed while a cycle was armed or incomplete.
    Busy,
    /// Group index past the packed data.
    OutOfRange,
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionError::Stalled { events } => {
                write!(f, "conversion trigger stalled after {events} events")
            }
            AcquisitionError::Busy => f.write_str("capture buffer still owned by the handler"),
            AcquisitionError::OutOfRange => f.write_str("packed group index out of range"),
        }
    }
}

/// Capture state shared between the conversion interrupt and the foreground.
pub struct SharedCapture<const N: usize> {
    armed: AtomicBool,
    events: AtomicU32,
    state: Mutex<RefCell<CaptureBuffer<N>>>,
}

impl<const N: usize> SharedCapture<N> {
    pub const TARGET_EVENTS: u32 = CaptureBuffer::<N>::TARGET_EVENTS;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
            events: AtomicU32::new(0),
            state: Mutex::new(RefCell::new(CaptureBuffer::new())),
        }
    }

    /// Conversion-complete handler. Runs in interrupt context.
    pub fn on_conversion(&self, raw: u16) -> ConversionOutcome {
        if !self.armed.load(Ordering::Acquire) {
            return ConversionOutcome::Ignored;
        }

        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let outcome = state.record(raw);
            self.events.store(state.events(), Ordering::Release);
            outcome
        })
    }

    /// Resets the counters and hands the buffer to the handler.
    pub fn begin_cycle(&self) {
        critical_section::with(|cs| {
            self.state.borrow_ref_mut(cs).reset();
            self.events.store(0, Ordering::Release);
            self.armed.store(true, Ordering::Release);
        });
    }

    /// Takes the buffer back from the handler.
    pub fn end_cycle(&self) {
        self.armed.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Conversion events recorded in the current cycle.
    #[must_use]
    pub fn events(&self) -> u32 {
        self.events.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.events() >= Self::TARGET_EVENTS
    }

    #[must_use]
    pub fn stats(&self) -> CaptureStats {
        critical_section::with(|cs| self.state.borrow_ref(cs).stats())
    }

    /// Number of packed groups available to the drain step.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError::Busy`] while the cycle is armed or short of
    /// its event target.
    pub fn group_count(&self) -> Result<usize, AcquisitionError> {
        self.ensure_drainable()?;
        Ok(critical_section::with(|cs| {
            self.state.borrow_ref(cs).bytes_written() / PACKED_GROUP_LEN
        }))
    }

    /// Copies one packed group out of a finished cycle.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError::Busy`] while the cycle is armed or
    /// incomplete and [`AcquisitionError::OutOfRange`] past the last group.
    pub fn packed_group(&self, index: usize) -> Result<[u8; PACKED_GROUP_LEN], AcquisitionError> {
        self.ensure_drainable()?;
        critical_section::with(|cs| -> Result<[u8; PACKED_GROUP_LEN], AcquisitionError> {
            let state = self.state.borrow_ref(cs);
            let start = index
                .checked_mul(PACKED_GROUP_LEN)
                .ok_or(AcquisitionError::OutOfRange)?;
            let group = state
                .packed()
                .get(start..start + PACKED_GROUP_LEN)
                .ok_or(AcquisitionError::OutOfRange)?;
            Ok([group[0], group[1], group[2]])
        })
    }

    fn ensure_drainable(&self) -> Result<(), AcquisitionError> {
        if self.is_armed() || !self.is_complete() {
            Err(AcquisitionError::Busy)
        } else {
            Ok(())
        }
    }
}

impl<const N: usize> Default for SharedCapture<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Hardware conversion trigger (timer edge feeding the ADC).
pub trait ConversionTrigger {
    /// Starts periodic conversions.
    fn arm(&mut self);

    /// Stops periodic conversions.
    fn disarm(&mut self);
}

impl<T: ConversionTrigger + ?Sized> ConversionTrigger for &mut T {
    fn arm(&mut self) {
        (**self).arm();
    }

    fn disarm(&mut self) {
        (**self).disarm();
    }
}

/// Runs one capture cycle: arm, wait for the event target, disarm.
///
/// With `stall_timeout_ms == None` the wait spins until the target is reached,
/// however long that takes. With a timeout, the wait polls once per
/// millisecond and gives up when no new conversion arrives for that long.
///
/// # Errors
///
/// Returns [`AcquisitionError::Stalled`] when the timeout elapses with no new
/// conversion. The trigger is disarmed either way.
pub fn acquire<T, M, const N: usize>(
    capture: &SharedCapture<N>,
    trigger: &mut T,
    delay: &mut M,
    stall_timeout_ms: Option<u32>,
) -> Result<CaptureStats, AcquisitionError>
where
    T: ConversionTrigger,
    M: MillisDelay,
{
    capture.begin_cycle();
    trigger.arm();
    let waited = wait_for_completion(capture, delay, stall_timeout_ms);
    trigger.disarm();
    capture.end_cycle();
    waited.map(|()| capture.stats())
}

fn wait_for_completion<M, const N: usize>(
    capture: &SharedCapture<N>,
    delay: &mut M,
    stall_timeout_ms: Option<u32>,
) -> Result<(), AcquisitionError>
where
    M: MillisDelay,
{
    let Some(timeout) = stall_timeout_ms else {
        while !capture.is_complete() {
            core::hint::spin_loop();
        }
        return Ok(());
    };

    let mut last_seen = capture.events();
    let mut idle_ms = 0u32;
    while !capture.is_complete() {
        if idle_ms >= timeout {
            return Err(AcquisitionError::Stalled { events: last_seen });
        }
        delay.delay_ms(1);
        let current = capture.events();
        if current == last_seen {
            idle_ms += 1;
        } else {
            last_seen = current;
            idle_ms = 0;
        }
    }
    Ok(())
}
