use core::panic::PanicInfo;
use defmt::error;

use crate::hw;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    // The polarizer must never stay energized past a fault.
    hw::force_outputs_off();
    hw::adc::halt_conversions();
    error!("PANIC: {}", defmt::Display2Format(info));
    cortex_m::asm::udf();
}
