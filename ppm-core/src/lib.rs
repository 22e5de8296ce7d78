#![no_std]

// Shared logic for the PPM controller.
//
// Everything here stays portable across the MCU firmware and host tooling: the
// hardware-facing pieces are expressed as traits that the firmware implements
// on real peripherals and the emulator/tests implement on simulated ones.

pub mod acquisition;
pub mod actuation;
pub mod config;
pub mod control;
pub mod delay;
pub mod onewire;
pub mod sim;
pub mod thermometer;
