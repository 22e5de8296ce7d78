//! Board adapters that implement the `ppm-core` capability traits.
//!
//! Pin map:
//! - PA8: one-wire data, open drain through direction switching, external
//!   4.7 kΩ pull-up.
//! - PB4: relay driver, PB5: polarizer driver (active high).
//! - PA0 / PA1: ADC channels A / B.
//! - PB0 / PB1: USART5 TX / RX to the host.

pub mod adc;

use embassy_stm32::gpio::{Flex, Level as PinLevel, Output, Pull, Speed};
use embassy_stm32::pac;
use embassy_stm32::pac::timer::vals::Urs;
use embassy_stm32::peripherals::TIM2;
use embassy_stm32::timer::low_level::Timer;
use embassy_stm32::usart::BufferedUart;
use embassy_time::{Duration, block_for};
use embedded_io::{Read, ReadReady, Write};

use ppm_core::actuation::{ActuatorAction, ActuatorDriver, ActuatorId};
use ppm_core::control::SerialLink;
use ppm_core::delay::{MicrosDelay, MillisDelay};
use ppm_core::onewire::{Level, OpenDrainPin};

/// GPIOB pin numbers of the actuator outputs.
const RELAY_PIN: usize = 4;
const POLARIZER_PIN: usize = 5;

/// One-wire data pin.
///
/// Output mode drives push-pull; input mode leaves the line to the pull-up and
/// the probe.
pub struct FlexLine<'d> {
    pin: Flex<'d>,
}

impl<'d> FlexLine<'d> {
    pub fn new(pin: Flex<'d>) -> Self {
        Self { pin }
    }
}

impl OpenDrainPin for FlexLine<'_> {
    fn drive(&mut self, level: Level) {
        match level {
            Level::High => self.pin.set_high(),
            Level::Low => self.pin.set_low(),
        }
        self.pin.set_as_output(Speed::VeryHigh);
    }

    fn release(&mut self) {
        self.pin.set_as_input(Pull::None);
    }

    fn read(&mut self) -> Level {
        if self.pin.is_high() {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Microsecond delay on TIM2 in one-pulse mode.
///
/// Each call reloads the counter, starts it, and spins on the update flag.
/// The one-wire engine takes this by value, so nothing else reprograms TIM2.
pub struct OneShotTimer<'d> {
    timer: Timer<'d, TIM2>,
    ticks_per_us: u32,
}

impl<'d> OneShotTimer<'d> {
    pub fn new(timer: Timer<'d, TIM2>) -> Self {
        timer.stop();
        let ticks_per_us = (timer.get_clock_frequency().0 / 1_000_000).max(1);
        let regs = timer.regs_gp32();
        regs.psc().write_value(0);
        regs.cr1().modify(|w| {
            w.set_opm(true);
            w.set_urs(Urs::COUNTER_ONLY);
        });
        Self {
            timer,
            ticks_per_us,
        }
    }
}

impl MicrosDelay for OneShotTimer<'_> {
    fn delay_us(&mut self, us: u32) {
        if us == 0 {
            return;
        }
        let regs = self.timer.regs_gp32();
        regs.arr().write_value(us.saturating_mul(self.ticks_per_us));
        regs.egr().write(|w| w.set_ug(true));
        regs.sr().modify(|w| w.set_uif(false));
        regs.cr1().modify(|w| w.set_cen(true));
        while !regs.sr().read().uif() {}
        regs.sr().modify(|w| w.set_uif(false));
    }
}

/// Millisecond busy-wait on the embassy time driver.
///
/// The control loop is the only foreground context, so spinning here blocks
/// nothing but the conversion interrupt, which preempts it.
#[derive(Copy, Clone, Default)]
pub struct BusyDelay;

impl MillisDelay for BusyDelay {
    fn delay_ms(&mut self, ms: u32) {
        block_for(Duration::from_millis(u64::from(ms)));
    }
}

/// Relay and polarizer outputs.
pub struct CoilOutputs<'d> {
    relay: Output<'d>,
    polarizer: Output<'d>,
}

impl<'d> CoilOutputs<'d> {
    pub fn new(relay: Output<'d>, polarizer: Output<'d>) -> Self {
        Self { relay, polarizer }
    }

    fn output_mut(&mut self, output: ActuatorId) -> &mut Output<'d> {
        match output {
            ActuatorId::Relay => &mut self.relay,
            ActuatorId::Polarizer => &mut self.polarizer,
        }
    }
}

impl ActuatorDriver for CoilOutputs<'_> {
    fn apply(&mut self, output: ActuatorId, action: ActuatorAction) {
        let pin = self.output_mut(output);
        match action {
            ActuatorAction::Energize => pin.set_level(PinLevel::High),
            ActuatorAction::DeEnergize => pin.set_level(PinLevel::Low),
        }
        defmt::debug!("actuation: {} {}", output_label(output), action_label(action));
    }

    fn release_all(&mut self) {
        self.polarizer.set_low();
        self.relay.set_low();
    }
}

/// Drops both coil outputs straight through the port registers.
///
/// Usable from the panic handler, where the owning [`CoilOutputs`] is out of
/// reach.
pub fn force_outputs_off() {
    pac::GPIOB.bsrr().write(|w| {
        w.set_br(POLARIZER_PIN, true);
        w.set_br(RELAY_PIN, true);
    });
}

/// Host serial link over the buffered USART.
pub struct UartLink {
    uart: BufferedUart<'static>,
}

impl UartLink {
    pub fn new(uart: BufferedUart<'static>) -> Self {
        Self { uart }
    }
}

/// Error type of [`UartLink`].
pub type UartError = embassy_stm32::usart::Error;

impl SerialLink for UartLink {
    type Error = UartError;

    fn read_ready(&mut self) -> bool {
        self.uart.read_ready().unwrap_or(false)
    }

    fn read_byte(&mut self) -> Result<u8, UartError> {
        let mut byte = [0u8; 1];
        self.uart.read_exact(&mut byte).map_err(|error| match error {
            embedded_io::ReadExactError::Other(error) => error,
            embedded_io::ReadExactError::UnexpectedEof => UartError::Framing,
        })?;
        Ok(byte[0])
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), UartError> {
        Write::write_all(&mut self.uart, bytes)
    }
}

fn output_label(output: ActuatorId) -> &'static str {
    match output {
        ActuatorId::Relay => "relay",
        ActuatorId::Polarizer => "polarizer",
    }
}

fn action_label(action: ActuatorAction) -> &'static str {
    match action {
        ActuatorAction::Energize => "energize",
        ActuatorAction::DeEnergize => "de-energize",
    }
}
