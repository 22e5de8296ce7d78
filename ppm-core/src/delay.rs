//! Blocking delay capabilities.
//!
//! Both traits describe busy-wait contracts: the call returns only after at
//! least the requested time has elapsed. Protocol code depends on these
//! traits instead of a concrete timer so the same logic runs against hardware
//! timers on the MCU and simulated clocks on the host.

/// Microsecond-resolution blocking delay used for one-wire slot timing.
///
/// Implementations own their timer exclusively; the one-wire engine takes the
/// delay by value so no other consumer can reprogram the timer mid-slot.
pub trait MicrosDelay {
    /// Blocks for at least `us` microseconds.
    fn delay_us(&mut self, us: u32);
}

/// Millisecond blocking delay used by the actuation sequencer and the
/// acquisition completion wait.
pub trait MillisDelay {
    /// Blocks for at least `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32);
}

impl<T: MicrosDelay + ?Sized> MicrosDelay for &mut T {
    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us);
    }
}

impl<T: MillisDelay + ?Sized> MillisDelay for &mut T {
    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms);
    }
}
