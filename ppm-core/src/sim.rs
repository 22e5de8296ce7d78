//! Simulated peripherals for host tooling and tests.
//!
//! [`Wire`] models one open-drain bus line on a virtual microsecond clock.
//! [`SimPin`] and [`SimDelay`] are two handles onto the same wire, so the bus
//! engine can own them separately exactly as it owns a real pin and timer.
//! Time only moves inside [`SimDelay`], which keeps every run deterministic.
//!
//! Devices react to edges the way slave hardware does: a long low pulse is a
//! reset, any other falling edge opens a slot, and the device decides from its
//! own protocol state whether it samples the slot or drives a bit into it.

use core::cell::RefCell;

use heapless::Deque;

use crate::acquisition::{ConversionTrigger, SAMPLE_MASK, SharedCapture};
use crate::delay::{MicrosDelay, MillisDelay};
use crate::onewire::{Level, LineMode, OpenDrainPin, SKIP_ROM_CMD, crc8};
use crate::thermometer::{CONVERT_T_CMD, READ_SCRATCHPAD_CMD, SCRATCHPAD_LEN, WRITE_SCRATCHPAD_CMD};

/// Minimum low time a slave treats as a reset pulse.
pub const RESET_DETECT_US: u64 = 480;
/// Wait between the end of reset and the presence pulse.
pub const PRESENCE_DELAY_US: u64 = 15;
/// Presence pulse length.
pub const PRESENCE_PULSE_US: u64 = 120;
/// Offset into a slot where the slave samples a written bit.
pub const SLAVE_SAMPLE_US: u64 = 30;
/// How long the slave holds the line low to transmit a zero.
pub const SLAVE_HOLD_US: u64 = 30;

/// Slave side of the simulated bus.
pub trait SimDevice {
    /// Reset pulse seen. Returns `true` to answer with a presence pulse.
    fn on_reset(&mut self) -> bool;

    /// A slot opened. `Some(bit)` means the device transmits `bit` in it.
    /// `None` means the device samples the slot as a write.
    fn on_slot(&mut self) -> Option<bool>;

    /// Bit sampled from a write slot.
    fn on_write_bit(&mut self, bit: bool);
}

/// Empty bus.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoDevice;

impl SimDevice for NoDevice {
    fn on_reset(&mut self) -> bool {
        false
    }

    fn on_slot(&mut self) -> Option<bool> {
        None
    }

    fn on_write_bit(&mut self, _bit: bool) {}
}

/// Device that answers every received byte by sending it back.
///
/// After eight write slots the device switches to transmitting and replays the
/// byte over the next eight slots.
#[derive(Clone, Debug, Default)]
pub struct EchoDevice {
    received: u8,
    received_bits: u8,
    outgoing: Deque<bool, 8>,
}

impl SimDevice for EchoDevice {
    fn on_reset(&mut self) -> bool {
        self.received = 0;
        self.received_bits = 0;
        self.outgoing.clear();
        true
    }

    fn on_slot(&mut self) -> Option<bool> {
        self.outgoing.pop_front()
    }

    fn on_write_bit(&mut self, bit: bool) {
        self.received >>= 1;
        if bit {
            self.received |= 0x80;
        }
        self.received_bits += 1;
        if self.received_bits == 8 {
            for shift in 0..8 {
                // Capacity is eight and the queue is empty here.
                let _ = self.outgoing.push_back((self.received >> shift) & 1 != 0);
            }
            self.received = 0;
            self.received_bits = 0;
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    Idle,
    RomCommand,
    FunctionCommand,
    WriteScratchpad { index: usize },
    SendScratchpad { bit: usize },
}

/// Power-on scratchpad: +85 °C, TH/TL from EEPROM, 12-bit config.
const POWER_ON_SCRATCHPAD: [u8; SCRATCHPAD_LEN - 1] =
    [0x50, 0x05, 0x4b, 0x46, 0x7f, 0xff, 0x0c, 0x10];

/// Single DS18B20 addressed with Skip ROM.
///
/// Supports Convert T, Write Scratchpad and Read Scratchpad. Conversions
/// complete instantly and latch the value set with
/// [`Ds18b20Device::set_temperature_raw`].
#[derive(Clone, Debug)]
pub struct Ds18b20Device {
    present: bool,
    temperature_raw: i16,
    scratchpad: [u8; SCRATCHPAD_LEN],
    phase: Phase,
    received: u8,
    received_bits: u8,
    conversions: u32,
}

impl Ds18b20Device {
    #[must_use]
    pub fn new(temperature_raw: i16) -> Self {
        let mut scratchpad = [0u8; SCRATCHPAD_LEN];
        scratchpad[..SCRATCHPAD_LEN - 1].copy_from_slice(&POWER_ON_SCRATCHPAD);
        let mut device = Self {
            present: true,
            temperature_raw,
            scratchpad,
            phase: Phase::Idle,
            received: 0,
            received_bits: 0,
            conversions: 0,
        };
        device.refresh_crc();
        device
    }

    /// Value latched by the next conversion, in 1/16 °C.
    pub fn set_temperature_raw(&mut self, raw: i16) {
        self.temperature_raw = raw;
    }

    /// Disconnects or reconnects the probe.
    pub fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    #[must_use]
    pub fn scratchpad(&self) -> &[u8; SCRATCHPAD_LEN] {
        &self.scratchpad
    }

    #[must_use]
    pub fn conversions(&self) -> u32 {
        self.conversions
    }

    fn refresh_crc(&mut self) {
        self.scratchpad[SCRATCHPAD_LEN - 1] = crc8(&self.scratchpad[..SCRATCHPAD_LEN - 1]);
    }

    fn on_byte(&mut self, byte: u8) {
        self.phase = match self.phase {
            Phase::RomCommand if byte == SKIP_ROM_CMD => Phase::FunctionCommand,
            Phase::FunctionCommand => match byte {
                CONVERT_T_CMD => {
                    let [lsb, msb] = self.temperature_raw.to_le_bytes();
                    self.scratchpad[0] = lsb;
                    self.scratchpad[1] = msb;
                    self.refresh_crc();
                    self.conversions += 1;
                    Phase::Idle
                }
                WRITE_SCRATCHPAD_CMD => Phase::WriteScratchpad { index: 0 },
                READ_SCRATCHPAD_CMD => Phase::SendScratchpad { bit: 0 },
                _ => Phase::Idle,
            },
            Phase::WriteScratchpad { index } => {
                self.scratchpad[2 + index] = byte;
                self.refresh_crc();
                if index + 1 < 3 {
                    Phase::WriteScratchpad { index: index + 1 }
                } else {
                    Phase::Idle
                }
            }
            _ => Phase::Idle,
        };
    }
}

impl Default for Ds18b20Device {
    fn default() -> Self {
        Self::new(0x0550)
    }
}

impl SimDevice for Ds18b20Device {
    fn on_reset(&mut self) -> bool {
        self.received = 0;
        self.received_bits = 0;
        self.phase = Phase::RomCommand;
        self.present
    }

    fn on_slot(&mut self) -> Option<bool> {
        if !self.present {
            return None;
        }
        match self.phase {
            Phase::SendScratchpad { bit } if bit < SCRATCHPAD_LEN * 8 => {
                self.phase = Phase::SendScratchpad { bit: bit + 1 };
                Some((self.scratchpad[bit / 8] >> (bit % 8)) & 1 != 0)
            }
            // Past the last byte only the pull-up answers.
            Phase::SendScratchpad { .. } => Some(true),
            _ => None,
        }
    }

    fn on_write_bit(&mut self, bit: bool) {
        if !self.present || matches!(self.phase, Phase::Idle | Phase::SendScratchpad { .. }) {
            return;
        }
        self.received >>= 1;
        if bit {
            self.received |= 0x80;
        }
        self.received_bits += 1;
        if self.received_bits == 8 {
            let byte = self.received;
            self.received = 0;
            self.received_bits = 0;
            self.on_byte(byte);
        }
    }
}

/// Counters collected by a [`Wire`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct WireStats {
    pub resets: u32,
    pub presence_pulses: u32,
    pub slots: u32,
    pub bits_written: u32,
}

/// Shared state of one simulated bus line.
pub struct Wire<D> {
    device: D,
    now_us: u64,
    mode: LineMode,
    driven: Level,
    low_since: Option<u64>,
    hold: Option<(u64, u64)>,
    pending_sample: Option<u64>,
    slot_sampled: bool,
    stats: WireStats,
}

impl<D: SimDevice> Wire<D> {
    #[must_use]
    pub fn new(device: D) -> Self {
        Self {
            device,
            now_us: 0,
            mode: LineMode::Input,
            driven: Level::High,
            low_since: None,
            hold: None,
            pending_sample: None,
            slot_sampled: false,
            stats: WireStats::default(),
        }
    }

    /// Virtual time in microseconds.
    #[must_use]
    pub fn now_us(&self) -> u64 {
        self.now_us
    }

    #[must_use]
    pub fn stats(&self) -> WireStats {
        self.stats
    }

    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Level currently seen on the line.
    #[must_use]
    pub fn level(&self) -> Level {
        if self.master_low() || self.device_holding(self.now_us) {
            Level::Low
        } else {
            Level::High
        }
    }

    fn master_low(&self) -> bool {
        self.mode == LineMode::Output && self.driven == Level::Low
    }

    fn device_holding(&self, at: u64) -> bool {
        self.hold.is_some_and(|(start, end)| start <= at && at < end)
    }

    fn advance(&mut self, us: u64) {
        let until = self.now_us + us;
        if self.pending_sample.is_some_and(|sample_at| sample_at <= until) {
            // The line cannot change during a delay, so the level now is the
            // level at the sampling instant.
            self.resolve_sample();
        }
        self.now_us = until;
    }

    fn resolve_sample(&mut self) {
        self.pending_sample = None;
        self.slot_sampled = true;
        let bit = !self.master_low();
        self.stats.bits_written += 1;
        self.device.on_write_bit(bit);
    }

    fn set_master(&mut self, mode: LineMode, driven: Level) {
        let was_low = self.master_low();
        self.mode = mode;
        self.driven = driven;
        let is_low = self.master_low();

        if !was_low && is_low {
            self.falling_edge();
        } else if was_low && !is_low {
            self.rising_edge();
        }
    }

    fn falling_edge(&mut self) {
        if self.pending_sample.is_some() {
            self.resolve_sample();
        }
        self.low_since = Some(self.now_us);
        self.slot_sampled = false;
        self.stats.slots += 1;
        match self.device.on_slot() {
            Some(false) => self.hold = Some((self.now_us, self.now_us + SLAVE_HOLD_US)),
            Some(true) => {}
            None => self.pending_sample = Some(self.now_us + SLAVE_SAMPLE_US),
        }
    }

    fn rising_edge(&mut self) {
        let Some(since) = self.low_since.take() else {
            return;
        };
        if self.now_us - since < RESET_DETECT_US {
            return;
        }

        // A reset aborts whatever the slot was doing.
        self.pending_sample = None;
        self.hold = None;
        self.stats.slots = self.stats.slots.saturating_sub(1);
        if self.slot_sampled {
            self.stats.bits_written = self.stats.bits_written.saturating_sub(1);
        }
        self.stats.resets += 1;
        if self.device.on_reset() {
            self.stats.presence_pulses += 1;
            let start = self.now_us + PRESENCE_DELAY_US;
            self.hold = Some((start, start + PRESENCE_PULSE_US));
        }
    }
}

/// Pin handle onto a [`Wire`].
pub struct SimPin<'a, D> {
    wire: &'a RefCell<Wire<D>>,
}

impl<'a, D> SimPin<'a, D> {
    #[must_use]
    pub fn new(wire: &'a RefCell<Wire<D>>) -> Self {
        Self { wire }
    }
}

impl<D: SimDevice> OpenDrainPin for SimPin<'_, D> {
    fn drive(&mut self, level: Level) {
        self.wire.borrow_mut().set_master(LineMode::Output, level);
    }

    fn release(&mut self) {
        self.wire.borrow_mut().set_master(LineMode::Input, Level::High);
    }

    fn read(&mut self) -> Level {
        self.wire.borrow().level()
    }
}

/// Delay handle onto a [`Wire`]; advances the virtual clock.
pub struct SimDelay<'a, D> {
    wire: &'a RefCell<Wire<D>>,
}

impl<'a, D> SimDelay<'a, D> {
    #[must_use]
    pub fn new(wire: &'a RefCell<Wire<D>>) -> Self {
        Self { wire }
    }
}

impl<D: SimDevice> MicrosDelay for SimDelay<'_, D> {
    fn delay_us(&mut self, us: u32) {
        self.wire.borrow_mut().advance(u64::from(us));
    }
}

/// Millisecond clock that only counts.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct VirtualClock {
    now_us: u64,
}

impl VirtualClock {
    #[must_use]
    pub const fn new() -> Self {
        Self { now_us: 0 }
    }

    #[must_use]
    pub fn now_us(&self) -> u64 {
        self.now_us
    }

    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.now_us / 1_000
    }
}

impl MillisDelay for VirtualClock {
    fn delay_ms(&mut self, ms: u32) {
        self.now_us += u64::from(ms) * 1_000;
    }
}

impl MicrosDelay for VirtualClock {
    fn delay_us(&mut self, us: u32) {
        self.now_us += u64::from(us);
    }
}

/// Trigger that replays a waveform into a capture the moment it is armed.
///
/// Each conversion event `n` receives `source(n)`, masked to twelve bits, the
/// same way the conversion interrupt would deliver it.
pub struct WaveformTrigger<'c, F, const N: usize> {
    capture: &'c SharedCapture<N>,
    source: F,
    armed: bool,
    delivered: u32,
}

impl<'c, F, const N: usize> WaveformTrigger<'c, F, N>
where
    F: FnMut(u32) -> u16,
{
    #[must_use]
    pub fn new(capture: &'c SharedCapture<N>, source: F) -> Self {
        Self {
            capture,
            source,
            armed: false,
            delivered: 0,
        }
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Conversions delivered across all cycles.
    #[must_use]
    pub fn delivered(&self) -> u32 {
        self.delivered
    }
}

impl<F, const N: usize> ConversionTrigger for WaveformTrigger<'_, F, N>
where
    F: FnMut(u32) -> u16,
{
    fn arm(&mut self) {
        self.armed = true;
        let mut event = 0;
        while !self.capture.is_complete() {
            let raw = (self.source)(event) & SAMPLE_MASK;
            self.capture.on_conversion(raw);
            event += 1;
            self.delivered += 1;
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onewire::{OneWire, OneWireBus};

    #[test]
    fn empty_wire_reports_no_presence() {
        let wire = RefCell::new(Wire::new(NoDevice));
        let mut bus = OneWireBus::new(SimPin::new(&wire), SimDelay::new(&wire));
        assert!(!bus.reset_presence());
        assert_eq!(wire.borrow().stats().resets, 1);
        assert_eq!(wire.borrow().stats().presence_pulses, 0);
    }

    #[test]
    fn echo_device_returns_written_byte() {
        let wire = RefCell::new(Wire::new(EchoDevice::default()));
        let mut bus = OneWireBus::new(SimPin::new(&wire), SimDelay::new(&wire));
        assert_eq!(bus.reset(), Ok(()));
        bus.write_byte(0xa5);
        assert_eq!(bus.read_byte(), 0xa5);
        assert_eq!(wire.borrow().stats().bits_written, 8);
    }

    #[test]
    fn line_idles_high_once_released() {
        let wire = RefCell::new(Wire::new(NoDevice));
        let mut pin = SimPin::new(&wire);
        pin.drive(Level::Low);
        assert_eq!(pin.read(), Level::Low);
        pin.release();
        assert_eq!(pin.read(), Level::High);
    }

    #[test]
    fn waveform_trigger_fills_the_capture_on_arm() {
        let capture: SharedCapture<6> = SharedCapture::new();
        let mut trigger = WaveformTrigger::new(&capture, |n| 0xf000 | n as u16);
        capture.begin_cycle();
        trigger.arm();
        assert!(capture.is_complete());
        trigger.disarm();
        capture.end_cycle();
        assert_eq!(trigger.delivered(), 4);
        assert_eq!(capture.packed_group(0), Ok([0x00, 0x00, 0x01]));
    }
}
