//! Foreground command/control loop.
//!
//! The loop is single threaded and polled. Each [`ControlLoop::poll`] first
//! runs any command queued by the previous poll to completion, then drains the
//! serial receiver into the line buffer and queues the next command. Because a
//! command always finishes before serial input is looked at again, the two
//! concerns never interleave.

pub mod command;
pub mod encoder;
pub mod measurement;

use core::fmt::{self, Write as _};

use heapless::String;

use crate::acquisition::{AcquisitionError, CaptureStats};
use crate::thermometer::{SensorError, Temperature, TemperatureProbe};

pub use command::{Command, LineBuffer, parse_command};
pub use encoder::{Base64Encoder, EncodeError, GroupEncoder};
pub use measurement::{Measurement, PpmMeasurement};

/// Reply sent for a temperature request when the probe does not answer.
pub const ABSENT_PROBE_REPLY: &[u8] = b"nan";

/// Byte-oriented serial port.
pub trait SerialLink {
    type Error;

    /// Returns `true` when a received byte can be read without blocking.
    fn read_ready(&mut self) -> bool;

    /// Reads one received byte.
    ///
    /// # Errors
    ///
    /// Propagates receiver faults (framing, overrun, noise).
    fn read_byte(&mut self) -> Result<u8, Self::Error>;

    /// Transmits every byte in `bytes`.
    ///
    /// # Errors
    ///
    /// Propagates transmitter faults.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;
}

/// Errors surfaced by [`ControlLoop::poll`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControlError<E> {
    Serial(E),
    Encode(EncodeError),
    Acquisition(AcquisitionError),
}

impl<E> From<EncodeError> for ControlError<E> {
    fn from(error: EncodeError) -> Self {
        Self::Encode(error)
    }
}

impl<E> From<AcquisitionError> for ControlError<E> {
    fn from(error: AcquisitionError) -> Self {
        Self::Acquisition(error)
    }
}

impl<E: fmt::Debug> fmt::Display for ControlError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::Serial(error) => write!(f, "serial link error: {error:?}"),
            ControlError::Encode(error) => write!(f, "{error}"),
            ControlError::Acquisition(error) => write!(f, "{error}"),
        }
    }
}

/// Work completed by a queued command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Completed {
    /// A capture burst was streamed; `groups` encoded groups were sent.
    Measurement { stats: CaptureStats, groups: usize },
    /// A temperature request was answered.
    Temperature(Result<Temperature, SensorError>),
}

/// Summary of one [`ControlLoop::poll`] iteration.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PollReport {
    pub completed: Option<Completed>,
    pub queued: Option<Command>,
    pub discarded_bytes: usize,
}

/// Polled command loop tying serial input to measurements.
pub struct ControlLoop<S, E, M, P> {
    serial: S,
    encoder: E,
    measurement: M,
    probe: P,
    line: LineBuffer,
    pending: Option<Command>,
}

impl<S, E, M, P> ControlLoop<S, E, M, P>
where
    S: SerialLink,
    E: GroupEncoder,
    M: Measurement,
    P: TemperatureProbe,
{
    #[must_use]
    pub fn new(serial: S, encoder: E, measurement: M, probe: P) -> Self {
        Self {
            serial,
            encoder,
            measurement,
            probe,
            line: LineBuffer::new(),
            pending: None,
        }
    }

    /// Runs one iteration of the loop.
    ///
    /// # Errors
    ///
    /// Serial faults, encoder failures and stalled captures abort the
    /// iteration. The pending command is consumed regardless.
    pub fn poll(&mut self) -> Result<PollReport, ControlError<S::Error>> {
        let mut report = PollReport::default();

        if let Some(command) = self.pending.take() {
            report.completed = Some(self.execute(command)?);
        }

        if self.serial.read_ready() {
            while self.serial.read_ready() {
                let byte = self.serial.read_byte().map_err(ControlError::Serial)?;
                self.line.push(byte);
            }

            report.queued = parse_command(self.line.as_slice());
            report.discarded_bytes = self.line.discarded();
            self.pending = report.queued;
            self.line.clear();
        }

        Ok(report)
    }

    /// Command waiting for the next poll, if any.
    #[must_use]
    pub fn pending(&self) -> Option<Command> {
        self.pending
    }

    #[must_use]
    pub fn serial(&self) -> &S {
        &self.serial
    }

    pub fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }

    #[must_use]
    pub fn measurement(&self) -> &M {
        &self.measurement
    }

    pub fn probe_mut(&mut self) -> &mut P {
        &mut self.probe
    }

    fn execute(&mut self, command: Command) -> Result<Completed, ControlError<S::Error>> {
        match command {
            Command::StartMeasurement => {
                let stats = self.measurement.measure()?;
                let groups = self.drain()?;
                Ok(Completed::Measurement { stats, groups })
            }
            Command::ReadTemperature => {
                let reading = self.probe.read_temperature();
                self.report_temperature(reading)?;
                Ok(Completed::Temperature(reading))
            }
        }
    }

    fn drain(&mut self) -> Result<usize, ControlError<S::Error>> {
        let groups = self.measurement.group_count()?;
        for index in 0..groups {
            let group = self.measurement.packed_group(index)?;
            let text = self.encoder.encode_group(group)?;
            self.serial.write_all(&text).map_err(ControlError::Serial)?;
        }
        Ok(groups)
    }

    fn report_temperature(
        &mut self,
        reading: Result<Temperature, SensorError>,
    ) -> Result<(), ControlError<S::Error>> {
        match reading {
            Ok(temperature) => {
                let mut reply: String<8> = String::new();
                write!(reply, "{}", temperature.raw()).map_err(|_| EncodeError)?;
                self.serial
                    .write_all(reply.as_bytes())
                    .map_err(ControlError::Serial)
            }
            Err(SensorError::NotPresent) => self
                .serial
                .write_all(ABSENT_PROBE_REPLY)
                .map_err(ControlError::Serial),
        }
    }
}
