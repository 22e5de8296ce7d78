use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::Adc;
use embassy_stm32::gpio::{Flex, Level, Output, Speed};
use embassy_stm32::timer::low_level::Timer;
use embassy_stm32::usart::{BufferedUart, Config as UartConfig, DataBits, Parity, StopBits};
use static_cell::StaticCell;

use crate::hw::adc::{CAPTURE, TimerTrigger};
use crate::hw::{BusyDelay, CoilOutputs, FlexLine, OneShotTimer, UartLink};
use ppm_core::actuation::DEFAULT_TIMINGS;
use ppm_core::config::{ACQUISITION_STALL_TIMEOUT_MS, SERIAL_BAUD};
use ppm_core::control::{Base64Encoder, ControlLoop, PpmMeasurement};
use ppm_core::onewire::OneWireBus;
use ppm_core::thermometer::{Resolution, Thermometer};

mod control_task;

use control_task::FirmwareControl;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

const UART_TX_BUFFER_SIZE: usize = 256;
const UART_RX_BUFFER_SIZE: usize = 32;

static UART_TX_BUFFER: StaticCell<[u8; UART_TX_BUFFER_SIZE]> = StaticCell::new();
static UART_RX_BUFFER: StaticCell<[u8; UART_RX_BUFFER_SIZE]> = StaticCell::new();

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART5>;
});

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA8,
        PB0,
        PB1,
        PB4,
        PB5,
        ADC1,
        TIM2,
        TIM3,
        USART5,
        ..
    } = hal::init(config);

    // Both coils off before anything else runs.
    let coils = CoilOutputs::new(
        Output::new(PB4, Level::Low, Speed::Low),
        Output::new(PB5, Level::Low, Speed::Low),
    );

    let bus = OneWireBus::new(FlexLine::new(Flex::new(PA8)), OneShotTimer::new(Timer::new(TIM2)));
    let mut thermometer = Thermometer::new(bus, Resolution::Twelve);
    match thermometer.initialize() {
        Ok(()) => defmt::info!("probe: configured for 12-bit conversions"),
        Err(error) => defmt::warn!("probe: {}", defmt::Display2Format(&error)),
    }

    // Analog inputs stay in their reset (analog) mode; only the ADC owns them.
    let _ = (PA0, PA1);
    let trigger = TimerTrigger::new(Adc::new(ADC1), Timer::new(TIM3));

    let mut uart_config = UartConfig::default();
    uart_config.baudrate = SERIAL_BAUD;
    uart_config.data_bits = DataBits::DataBits8;
    uart_config.stop_bits = StopBits::STOP1;
    uart_config.parity = Parity::ParityNone;

    let uart = BufferedUart::new(
        USART5,
        PB1,
        PB0,
        UART_TX_BUFFER.init([0; UART_TX_BUFFER_SIZE]),
        UART_RX_BUFFER.init([0; UART_RX_BUFFER_SIZE]),
        UartIrqs,
        uart_config,
    )
    .expect("failed to initialize host UART");

    let measurement = PpmMeasurement::new(
        coils,
        trigger,
        BusyDelay,
        &CAPTURE,
        DEFAULT_TIMINGS,
        Some(ACQUISITION_STALL_TIMEOUT_MS),
    );
    let control: FirmwareControl =
        ControlLoop::new(UartLink::new(uart), Base64Encoder, measurement, thermometer);

    defmt::info!("ppm: ready, waiting for commands at {} baud", SERIAL_BAUD);

    spawner
        .spawn(control_task::run(control))
        .expect("failed to spawn control task");

    core::future::pending::<()>().await;
}
