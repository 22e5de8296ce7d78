//! Compile-time configuration shared by firmware and host targets.
//!
//! The measurement geometry (sample count, packed size, conversion rate) is
//! fixed for the lifetime of a build; the receiver relies on the same values to
//! decode the transmitted stream, so they are not negotiated at runtime.

use core::time::Duration;

/// Conversion events captured per measurement cycle.
pub const SAMPLE_COUNT: u32 = 20_000;

/// Bytes written per packed channel pair (two 12-bit values).
pub const PACKED_GROUP_LEN: usize = 3;

/// Characters emitted per packed group once text encoded.
pub const ENCODED_GROUP_LEN: usize = 4;

/// Size of the packed sample buffer for one cycle.
pub const PACKED_BUFFER_LEN: usize = SAMPLE_COUNT as usize / 2 * PACKED_GROUP_LEN;

/// Hardware conversion trigger rate.
pub const SAMPLE_RATE_HZ: u32 = 5_000;

/// Capacity of the inbound command line buffer. Extra bytes are discarded.
pub const COMMAND_LINE_CAPACITY: usize = 15;

/// Milliseconds without a new conversion before the completion wait gives up.
pub const ACQUISITION_STALL_TIMEOUT_MS: u32 = 100;

/// Serial link speed expected by the host tooling.
pub const SERIAL_BAUD: u32 = 115_200;

/// Lead-in before the relay is energized (t1).
pub const LEAD_IN: Duration = Duration::from_millis(20);
/// Settle time between relay closure and polarizer turn-on (t2).
pub const RELAY_SETTLE: Duration = Duration::from_millis(200);
/// Polarizing current hold (t3).
pub const POLARIZE_HOLD: Duration = Duration::from_millis(6_000);
/// Settle time between polarizer turn-off and relay release (t4).
pub const POLARIZE_RELEASE: Duration = Duration::from_millis(20);
/// Cool-down after the relay opens, before sampling starts (t5).
pub const COOL_DOWN: Duration = Duration::from_millis(10);
