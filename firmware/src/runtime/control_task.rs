use embassy_futures::yield_now;

use crate::hw::adc::TimerTrigger;
use crate::hw::{BusyDelay, CoilOutputs, FlexLine, OneShotTimer, UartLink};
use ppm_core::control::{Base64Encoder, Completed, ControlError, ControlLoop, PpmMeasurement};
use ppm_core::onewire::OneWireBus;
use ppm_core::thermometer::Thermometer;

pub type FirmwareMeasurement = PpmMeasurement<
    'static,
    CoilOutputs<'static>,
    TimerTrigger<'static>,
    BusyDelay,
    { ppm_core::config::PACKED_BUFFER_LEN },
>;

pub type FirmwareControl = ControlLoop<
    UartLink,
    Base64Encoder,
    FirmwareMeasurement,
    Thermometer<OneWireBus<FlexLine<'static>, OneShotTimer<'static>>>,
>;

#[embassy_executor::task]
pub async fn run(mut control: FirmwareControl) -> ! {
    loop {
        match control.poll() {
            Ok(report) => {
                if let Some(command) = report.queued {
                    defmt::info!("control: queued {}", defmt::Debug2Format(&command));
                }
                if report.discarded_bytes > 0 {
                    defmt::debug!("control: dropped {} overflow bytes", report.discarded_bytes);
                }
                match report.completed {
                    Some(Completed::Measurement { stats, groups }) => defmt::info!(
                        "control: streamed {} groups (events={} bytes={} overruns={})",
                        groups,
                        stats.events,
                        stats.bytes_written,
                        stats.overruns
                    ),
                    Some(Completed::Temperature(Ok(temperature))) => defmt::info!(
                        "control: temperature {}",
                        defmt::Display2Format(&temperature)
                    ),
                    Some(Completed::Temperature(Err(error))) => {
                        defmt::warn!("control: {}", defmt::Display2Format(&error));
                    }
                    None => {}
                }
            }
            Err(ControlError::Serial(error)) => {
                defmt::warn!("control: serial error {}", defmt::Debug2Format(&error));
            }
            Err(error) => defmt::error!("control: {}", defmt::Display2Format(&error)),
        }
        yield_now().await;
    }
}
