//! Bit-banged one-wire bus engine.
//!
//! The engine drives a single open-drain line through direction switching:
//! the master pulls the line low in output mode and lets the external pull-up
//! raise it by switching to input. Every slot is timed with a blocking
//! [`MicrosDelay`], so the engine owns both the line and the delay for the
//! duration of a transaction.
//!
//! Timing follows the DS18B20 datasheet with the narrow read-sample margin the
//! hardware was validated with (sample 9 µs after the slot opens, limit 15 µs).

mod crc;

use core::fmt;

pub use crc::crc8;

use crate::delay::MicrosDelay;

/// Skip ROM: address the single device on the bus without its 64-bit ROM code.
pub const SKIP_ROM_CMD: u8 = 0xcc;

/// Settle time with the line driven high before a slot opens.
pub const SETTLE_US: u32 = 3;
/// Reset pulse length; the datasheet minimum is 480 µs.
pub const RESET_PULSE_US: u32 = 500;
/// Delay between releasing the reset pulse and sampling for presence.
pub const PRESENCE_SAMPLE_US: u32 = 30;
/// Remainder of the reset slot after the presence sample.
pub const RESET_RECOVERY_US: u32 = 500;
/// Low time that opens a read or write slot.
pub const SLOT_START_US: u32 = 3;
/// Time the written bit level is held; covers the device sampling window.
pub const WRITE_HOLD_US: u32 = 50;
/// Recovery time with the line high after a write slot.
pub const WRITE_RECOVERY_US: u32 = 3;
/// Delay between releasing the line and sampling a read slot.
pub const READ_SAMPLE_US: u32 = 6;
/// Remainder of a read slot after sampling.
pub const READ_SLOT_TAIL_US: u32 = 50;

/// Logic level on the bus line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// Level that transmits `bit` during a write slot.
    #[must_use]
    pub const fn from_bit(bit: bool) -> Self {
        if bit { Level::High } else { Level::Low }
    }

    #[must_use]
    pub const fn is_high(self) -> bool {
        matches!(self, Level::High)
    }
}

/// Direction of the physical pin.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LineMode {
    /// The master drives the line to the last requested level.
    Output,
    /// High impedance; the pull-up or a device sets the level.
    Input,
}

/// Raw pin operations required by [`BusLine`].
///
/// Implementors only translate calls to hardware; the mode bookkeeping that
/// keeps reads and writes apart lives in [`BusLine`].
pub trait OpenDrainPin {
    /// Switches the pin to output and drives `level`.
    fn drive(&mut self, level: Level);

    /// Switches the pin to high-impedance input.
    fn release(&mut self);

    /// Reads the pin. Only called while the pin is in input mode.
    fn read(&mut self) -> Level;
}

impl<T: OpenDrainPin + ?Sized> OpenDrainPin for &mut T {
    fn drive(&mut self, level: Level) {
        (**self).drive(level);
    }

    fn release(&mut self) {
        (**self).release();
    }

    fn read(&mut self) -> Level {
        (**self).read()
    }
}

/// Owner of the physical bus line.
///
/// Sampling is only reachable through [`Listening`], which is created by
/// switching the line to input and borrows the line mutably, so no code path
/// can read while the master is still driving.
pub struct BusLine<P> {
    pin: P,
    mode: LineMode,
}

impl<P: OpenDrainPin> BusLine<P> {
    /// Takes ownership of the pin and leaves it released.
    #[must_use]
    pub fn new(mut pin: P) -> Self {
        pin.release();
        Self {
            pin,
            mode: LineMode::Input,
        }
    }

    /// Drives the line to `level`, switching to output if needed.
    pub fn drive(&mut self, level: Level) {
        self.pin.drive(level);
        self.mode = LineMode::Output;
    }

    /// Releases the line to the pull-up and returns the sampling guard.
    pub fn listen(&mut self) -> Listening<'_, P> {
        self.pin.release();
        self.mode = LineMode::Input;
        Listening { line: self }
    }

    /// Current pin direction.
    #[must_use]
    pub fn mode(&self) -> LineMode {
        self.mode
    }
}

/// Borrow of a [`BusLine`] that is known to be in input mode.
pub struct Listening<'a, P> {
    line: &'a mut BusLine<P>,
}

impl<P: OpenDrainPin> Listening<'_, P> {
    /// Samples the line level.
    pub fn sample(&mut self) -> Level {
        debug_assert_eq!(self.line.mode, LineMode::Input);
        self.line.pin.read()
    }
}

/// Errors reported by the bus engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OneWireError {
    /// Nothing answered the reset pulse.
    NoDevicePresent,
}

impl fmt::Display for OneWireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OneWireError::NoDevicePresent => f.write_str("no device answered the reset pulse"),
        }
    }
}

/// Byte-level transport used by device sessions.
///
/// Splitting the transport from [`OneWireBus`] lets device logic run against
/// scripted transports in tests.
pub trait OneWire {
    /// Issues a reset pulse and fails when no presence pulse is seen.
    ///
    /// # Errors
    ///
    /// Returns [`OneWireError::NoDevicePresent`] on a silent bus.
    fn reset(&mut self) -> Result<(), OneWireError>;

    /// Writes one byte, least-significant bit first.
    fn write_byte(&mut self, byte: u8);

    /// Reads one byte, least-significant bit first.
    fn read_byte(&mut self) -> u8;

    /// Blocks for at least `us` microseconds using the bus timer.
    fn wait_us(&mut self, us: u32);

    /// Writes every byte in `bytes` in order.
    fn write_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.write_byte(byte);
        }
    }

    /// Fills `buffer` with consecutive reads.
    fn read_bytes(&mut self, buffer: &mut [u8]) {
        for slot in buffer {
            *slot = self.read_byte();
        }
    }
}

impl<T: OneWire + ?Sized> OneWire for &mut T {
    fn reset(&mut self) -> Result<(), OneWireError> {
        (**self).reset()
    }

    fn write_byte(&mut self, byte: u8) {
        (**self).write_byte(byte);
    }

    fn read_byte(&mut self) -> u8 {
        (**self).read_byte()
    }

    fn wait_us(&mut self, us: u32) {
        (**self).wait_us(us);
    }
}

/// Open-loop one-wire master built from a line and a microsecond delay.
pub struct OneWireBus<P, D> {
    line: BusLine<P>,
    delay: D,
}

impl<P, D> OneWireBus<P, D>
where
    P: OpenDrainPin,
    D: MicrosDelay,
{
    /// Creates the engine, taking exclusive ownership of the pin and timer.
    #[must_use]
    pub fn new(pin: P, delay: D) -> Self {
        Self {
            line: BusLine::new(pin),
            delay,
        }
    }

    /// Issues a reset pulse and reports whether a device answered.
    pub fn reset_presence(&mut self) -> bool {
        self.line.drive(Level::High);
        self.delay.delay_us(SETTLE_US);
        self.line.drive(Level::Low);
        self.delay.delay_us(RESET_PULSE_US);
        self.line.drive(Level::High);

        let mut listening = self.line.listen();
        self.delay.delay_us(PRESENCE_SAMPLE_US);
        let presence = listening.sample() == Level::Low;
        self.delay.delay_us(RESET_RECOVERY_US);
        presence
    }

    /// Transmits a single bit in one write slot.
    pub fn write_bit(&mut self, bit: bool) {
        self.open_slot();
        self.line.drive(Level::from_bit(bit));
        self.delay.delay_us(WRITE_HOLD_US);
        self.line.drive(Level::High);
        self.delay.delay_us(WRITE_RECOVERY_US);
    }

    /// Receives a single bit in one read slot.
    pub fn read_bit(&mut self) -> bool {
        self.open_slot();
        self.line.drive(Level::High);

        let mut listening = self.line.listen();
        self.delay.delay_us(READ_SAMPLE_US);
        let bit = listening.sample().is_high();
        self.delay.delay_us(READ_SLOT_TAIL_US);
        bit
    }

    /// Line direction left behind by the last slot.
    #[must_use]
    pub fn line_mode(&self) -> LineMode {
        self.line.mode()
    }

    fn open_slot(&mut self) {
        self.line.drive(Level::High);
        self.delay.delay_us(SETTLE_US);
        self.line.drive(Level::Low);
        self.delay.delay_us(SLOT_START_US);
    }
}

impl<P, D> OneWire for OneWireBus<P, D>
where
    P: OpenDrainPin,
    D: MicrosDelay,
{
    fn reset(&mut self) -> Result<(), OneWireError> {
        if self.reset_presence() {
            Ok(())
        } else {
            Err(OneWireError::NoDevicePresent)
        }
    }

    fn write_byte(&mut self, byte: u8) {
        let mut remaining = byte;
        for _ in 0..8 {
            self.write_bit(remaining & 0x01 != 0);
            remaining >>= 1;
        }
    }

    fn read_byte(&mut self) -> u8 {
        let mut byte = 0u8;
        for _ in 0..8 {
            byte >>= 1;
            if self.read_bit() {
                byte |= 0x80;
            }
        }
        byte
    }

    fn wait_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum PinEvent {
        Drive(Level),
        Release,
        Read,
        Wait(u32),
    }

    struct Recorder {
        events: heapless::Vec<PinEvent, 64>,
        level: Level,
    }

    impl Recorder {
        fn new(level: Level) -> Self {
            Self {
                events: heapless::Vec::new(),
                level,
            }
        }
    }

    struct RecordingPin<'a>(&'a core::cell::RefCell<Recorder>);

    impl OpenDrainPin for RecordingPin<'_> {
        fn drive(&mut self, level: Level) {
            let _ = self.0.borrow_mut().events.push(PinEvent::Drive(level));
        }

        fn release(&mut self) {
            let _ = self.0.borrow_mut().events.push(PinEvent::Release);
        }

        fn read(&mut self) -> Level {
            let mut recorder = self.0.borrow_mut();
            let _ = recorder.events.push(PinEvent::Read);
            recorder.level
        }
    }

    struct RecordingDelay<'a>(&'a core::cell::RefCell<Recorder>);

    impl MicrosDelay for RecordingDelay<'_> {
        fn delay_us(&mut self, us: u32) {
            let _ = self.0.borrow_mut().events.push(PinEvent::Wait(us));
        }
    }

    #[test]
    fn reset_samples_only_after_release() {
        let recorder = core::cell::RefCell::new(Recorder::new(Level::Low));
        let mut bus = OneWireBus::new(RecordingPin(&recorder), RecordingDelay(&recorder));
        recorder.borrow_mut().events.clear();

        assert!(bus.reset_presence());
        assert_eq!(
            recorder.borrow().events.as_slice(),
            &[
                PinEvent::Drive(Level::High),
                PinEvent::Wait(SETTLE_US),
                PinEvent::Drive(Level::Low),
                PinEvent::Wait(RESET_PULSE_US),
                PinEvent::Drive(Level::High),
                PinEvent::Release,
                PinEvent::Wait(PRESENCE_SAMPLE_US),
                PinEvent::Read,
                PinEvent::Wait(RESET_RECOVERY_US),
            ]
        );
        assert_eq!(bus.line_mode(), LineMode::Input);
    }

    #[test]
    fn reset_without_presence_pulse_reports_absence() {
        let recorder = core::cell::RefCell::new(Recorder::new(Level::High));
        let mut bus = OneWireBus::new(RecordingPin(&recorder), RecordingDelay(&recorder));

        assert!(!bus.reset_presence());
        assert_eq!(bus.reset(), Err(OneWireError::NoDevicePresent));
    }

    #[test]
    fn write_slot_holds_bit_level() {
        let recorder = core::cell::RefCell::new(Recorder::new(Level::High));
        let mut bus = OneWireBus::new(RecordingPin(&recorder), RecordingDelay(&recorder));
        recorder.borrow_mut().events.clear();

        bus.write_bit(false);
        assert_eq!(
            recorder.borrow().events.as_slice(),
            &[
                PinEvent::Drive(Level::High),
                PinEvent::Wait(SETTLE_US),
                PinEvent::Drive(Level::Low),
                PinEvent::Wait(SLOT_START_US),
                PinEvent::Drive(Level::Low),
                PinEvent::Wait(WRITE_HOLD_US),
                PinEvent::Drive(Level::High),
                PinEvent::Wait(WRITE_RECOVERY_US),
            ]
        );
        assert_eq!(bus.line_mode(), LineMode::Output);
    }

    #[test]
    fn read_byte_assembles_lsb_first() {
        let recorder = core::cell::RefCell::new(Recorder::new(Level::High));
        let mut bus = OneWireBus::new(RecordingPin(&recorder), RecordingDelay(&recorder));

        assert_eq!(bus.read_byte(), 0xff);
        recorder.borrow_mut().level = Level::Low;
        assert_eq!(bus.read_byte(), 0x00);
    }
}
