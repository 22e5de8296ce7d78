//! Inbound command recognition.
//!
//! The host sends short lines; only the first byte carries meaning. Bytes past
//! the line buffer capacity are dropped without notice.

use heapless::Vec;
use winnow::combinator::alt;
use winnow::error::ModalResult;
use winnow::prelude::*;
use winnow::token::one_of;

use crate::config::COMMAND_LINE_CAPACITY;

/// Commands understood by the control loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// `S`: actuate, capture, and stream the packed samples.
    StartMeasurement,
    /// `T`: convert and report the probe temperature.
    ReadTemperature,
}

fn leading_command(input: &mut &[u8]) -> ModalResult<Command> {
    alt((
        one_of(b'S').value(Command::StartMeasurement),
        one_of(b'T').value(Command::ReadTemperature),
    ))
    .parse_next(input)
}

/// Returns the command selected by the first byte of `line`, if any.
#[must_use]
pub fn parse_command(line: &[u8]) -> Option<Command> {
    let mut input = line;
    leading_command(&mut input).ok()
}

/// Fixed-capacity accumulator for one inbound line.
#[derive(Clone, Debug, Default)]
pub struct LineBuffer {
    bytes: Vec<u8, COMMAND_LINE_CAPACITY>,
    discarded: usize,
}

impl LineBuffer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: Vec::new(),
            discarded: 0,
        }
    }

    /// Appends a byte, dropping it when the buffer is full.
    pub fn push(&mut self, byte: u8) {
        if self.bytes.push(byte).is_err() {
            self.discarded = self.discarded.saturating_add(1);
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes dropped since the last [`LineBuffer::clear`].
    #[must_use]
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Zeroes the stored bytes and resets the count.
    pub fn clear(&mut self) {
        self.bytes.iter_mut().for_each(|byte| *byte = 0);
        self.bytes.clear();
        self.discarded = 0;
    }
}
