//! DS18B20 temperature probe session.
//!
//! The probe is the only device on its bus, so every transaction addresses it
//! with Skip ROM. Conversion completion is not polled: the session waits the
//! worst-case conversion time for the configured resolution.

use core::fmt;

use crate::onewire::{OneWire, OneWireError, SKIP_ROM_CMD, crc8};

/// Initiates a temperature conversion.
pub const CONVERT_T_CMD: u8 = 0x44;
/// Writes TH, TL and the configuration register.
pub const WRITE_SCRATCHPAD_CMD: u8 = 0x4e;
/// Reads the scratchpad starting at byte 0.
pub const READ_SCRATCHPAD_CMD: u8 = 0xbe;

/// Alarm-high placeholder written during initialization.
pub const ALARM_HIGH_PLACEHOLDER: u8 = 0x20;
/// Alarm-low placeholder written during initialization.
pub const ALARM_LOW_PLACEHOLDER: u8 = 0x00;

/// Number of bytes in the scratchpad image, CRC included.
pub const SCRATCHPAD_LEN: usize = 9;

/// Conversion resolution stored in the configuration register.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Resolution {
    Nine,
    Ten,
    Eleven,
    #[default]
    Twelve,
}

impl Resolution {
    /// Configuration register value (reserved bits set).
    #[must_use]
    pub const fn config_byte(self) -> u8 {
        match self {
            Resolution::Nine => 0x1f,
            Resolution::Ten => 0x3f,
            Resolution::Eleven => 0x5f,
            Resolution::Twelve => 0x7f,
        }
    }

    /// Worst-case conversion time from the datasheet.
    #[must_use]
    pub const fn conversion_time_us(self) -> u32 {
        match self {
            Resolution::Nine => 93_750,
            Resolution::Ten => 187_500,
            Resolution::Eleven => 375_000,
            Resolution::Twelve => 750_000,
        }
    }
}

/// Temperature in sixteenths of a degree Celsius.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Temperature(i16);

impl Temperature {
    /// Wraps a raw fixed-point value.
    #[must_use]
    pub const fn from_raw(raw: i16) -> Self {
        Self(raw)
    }

    /// Raw value, degrees Celsius × 16.
    #[must_use]
    pub const fn raw(self) -> i16 {
        self.0
    }

    /// Whole degrees, truncated toward negative infinity.
    #[must_use]
    pub const fn whole_degrees(self) -> i16 {
        self.0 >> 4
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = i32::from(self.0);
        let sign = if raw < 0 { "-" } else { "" };
        let magnitude = raw.unsigned_abs();
        let whole = magnitude >> 4;
        let fraction = (magnitude & 0x0f) * 625;
        write!(f, "{sign}{whole}.{fraction:04} C")
    }
}

/// Decodes the temperature bytes of a scratchpad image.
#[must_use]
pub const fn decode_temperature(lsb: u8, msb: u8) -> Temperature {
    Temperature(i16::from_le_bytes([lsb, msb]))
}

/// Full scratchpad image as read from the probe.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Scratchpad(pub [u8; SCRATCHPAD_LEN]);

impl Scratchpad {
    #[must_use]
    pub const fn temperature(&self) -> Temperature {
        decode_temperature(self.0[0], self.0[1])
    }

    #[must_use]
    pub const fn alarm_high(&self) -> u8 {
        self.0[2]
    }

    #[must_use]
    pub const fn alarm_low(&self) -> u8 {
        self.0[3]
    }

    #[must_use]
    pub const fn config(&self) -> u8 {
        self.0[4]
    }

    /// Returns `true` when the trailing CRC byte matches the first eight bytes.
    #[must_use]
    pub fn crc_valid(&self) -> bool {
        crc8(&self.0) == 0
    }
}

/// Errors surfaced by the probe session.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SensorError {
    /// The reset pulse went unanswered; the transaction was abandoned.
    NotPresent,
}

impl From<OneWireError> for SensorError {
    fn from(error: OneWireError) -> Self {
        match error {
            OneWireError::NoDevicePresent => SensorError::NotPresent,
        }
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::NotPresent => f.write_str("temperature probe not present"),
        }
    }
}

/// Anything able to produce a temperature reading on demand.
pub trait TemperatureProbe {
    /// # Errors
    ///
    /// Returns [`SensorError::NotPresent`] when the probe does not answer.
    fn read_temperature(&mut self) -> Result<Temperature, SensorError>;
}

/// Session driving a single DS18B20 over a [`OneWire`] transport.
pub struct Thermometer<B> {
    bus: B,
    resolution: Resolution,
}

impl<B: OneWire> Thermometer<B> {
    /// Wraps the bus; call [`Thermometer::initialize`] before reading.
    #[must_use]
    pub fn new(bus: B, resolution: Resolution) -> Self {
        Self { bus, resolution }
    }

    /// Writes the alarm placeholders and resolution into the scratchpad.
    ///
    /// The trailing reset terminates the write.
    ///
    /// # Errors
    ///
    /// Returns [`SensorError::NotPresent`] when either reset sees no presence
    /// pulse.
    pub fn initialize(&mut self) -> Result<(), SensorError> {
        self.address()?;
        self.bus.write_bytes(&[
            WRITE_SCRATCHPAD_CMD,
            ALARM_HIGH_PLACEHOLDER,
            ALARM_LOW_PLACEHOLDER,
            self.resolution.config_byte(),
        ]);
        self.bus.reset()?;
        Ok(())
    }

    /// Starts a conversion and blocks for the worst-case conversion time.
    ///
    /// # Errors
    ///
    /// Returns [`SensorError::NotPresent`] when the probe does not answer.
    pub fn convert(&mut self) -> Result<(), SensorError> {
        self.address()?;
        self.bus.write_byte(CONVERT_T_CMD);
        self.bus.wait_us(self.resolution.conversion_time_us());
        Ok(())
    }

    /// Converts and reads back the temperature bytes only.
    ///
    /// # Errors
    ///
    /// Returns [`SensorError::NotPresent`] when the probe drops off the bus
    /// before or after the conversion.
    pub fn convert_and_read(&mut self) -> Result<Temperature, SensorError> {
        self.convert()?;
        self.address()?;
        self.bus.write_byte(READ_SCRATCHPAD_CMD);
        let lsb = self.bus.read_byte();
        let msb = self.bus.read_byte();
        Ok(decode_temperature(lsb, msb))
    }

    /// Reads the whole scratchpad without converting first.
    ///
    /// # Errors
    ///
    /// Returns [`SensorError::NotPresent`] when the probe does not answer.
    pub fn read_scratchpad(&mut self) -> Result<Scratchpad, SensorError> {
        self.address()?;
        self.bus.write_byte(READ_SCRATCHPAD_CMD);
        let mut image = [0u8; SCRATCHPAD_LEN];
        self.bus.read_bytes(&mut image);
        Ok(Scratchpad(image))
    }

    #[must_use]
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn address(&mut self) -> Result<(), SensorError> {
        self.bus.reset()?;
        self.bus.write_byte(SKIP_ROM_CMD);
        Ok(())
    }
}

impl<B: OneWire> TemperatureProbe for Thermometer<B> {
    fn read_temperature(&mut self) -> Result<Temperature, SensorError> {
        self.convert_and_read()
    }
}
