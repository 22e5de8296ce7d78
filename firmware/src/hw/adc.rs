//! Timer-paced ADC capture.
//!
//! TIM3 emits a TRGO pulse on every update at [`SAMPLE_RATE_HZ`]. ADC1 runs in
//! discontinuous mode over channels 0 and 1, so each trigger converts exactly
//! one channel and the results alternate A, B, A, B. The end-of-conversion
//! interrupt forwards every result to [`CAPTURE`].

use embassy_stm32::adc::{Adc, SampleTime};
use embassy_stm32::interrupt::{self, InterruptExt};
use embassy_stm32::pac;
use embassy_stm32::pac::adc::vals::Exten;
use embassy_stm32::pac::timer::vals::Mms;
use embassy_stm32::peripherals::{ADC1, TIM3};
use embassy_stm32::time::Hertz;
use embassy_stm32::timer::low_level::Timer;

use ppm_core::acquisition::{ConversionTrigger, SharedCapture};
use ppm_core::config::{PACKED_BUFFER_LEN, SAMPLE_RATE_HZ};

/// Capture state shared with the conversion interrupt.
pub static CAPTURE: SharedCapture<PACKED_BUFFER_LEN> = SharedCapture::new();

/// EXTSEL code for TIM3_TRGO on STM32G0.
const EXTSEL_TIM3_TRGO: u8 = 3;

/// Channel A and channel B inputs (PA0, PA1).
const CHANNEL_A: usize = 0;
const CHANNEL_B: usize = 1;

/// Timer and ADC pair that produce one conversion per trigger.
pub struct TimerTrigger<'d> {
    timer: Timer<'d, TIM3>,
    _adc: Adc<'d, ADC1>,
}

impl<'d> TimerTrigger<'d> {
    /// Powers and calibrates the ADC, then routes TIM3 to its trigger input.
    pub fn new(mut adc: Adc<'d, ADC1>, timer: Timer<'d, TIM3>) -> Self {
        adc.set_sample_time(SampleTime::CYCLES12_5);

        timer.stop();
        timer.set_frequency(Hertz(SAMPLE_RATE_HZ));
        timer.regs_gp16().cr2().modify(|w| w.set_mms(Mms::UPDATE));

        let regs = pac::ADC1;
        regs.cfgr1().modify(|w| {
            w.set_discen(true);
            w.set_cont(false);
            w.set_scandir(false);
            w.set_extsel(EXTSEL_TIM3_TRGO);
            w.set_exten(Exten::RISING_EDGE);
        });
        regs.chselr().write(|w| {
            w.set_chsel(CHANNEL_A, true);
            w.set_chsel(CHANNEL_B, true);
        });
        regs.ier().write(|w| w.set_eocie(true));

        interrupt::ADC1_COMP.unpend();
        // SAFETY: the handler only touches `CAPTURE`, which is interrupt safe.
        unsafe { interrupt::ADC1_COMP.enable() };

        Self { timer, _adc: adc }
    }
}

impl ConversionTrigger for TimerTrigger<'_> {
    fn arm(&mut self) {
        let regs = pac::ADC1;
        // Clear stale flags so the first result is channel A.
        regs.isr().write(|w| {
            w.set_eoc(true);
            w.set_eos(true);
            w.set_ovr(true);
        });
        regs.cr().modify(|w| w.set_adstart(true));
        self.timer.reset();
        self.timer.start();
        defmt::info!("adc: armed at {} Hz", SAMPLE_RATE_HZ);
    }

    fn disarm(&mut self) {
        self.timer.stop();
        halt_conversions();
        defmt::info!("adc: disarmed after {} events", CAPTURE.events());
    }
}

/// Stops the running conversion sequence and waits for the ADC to go idle.
pub fn halt_conversions() {
    let regs = pac::ADC1;
    if regs.cr().read().adstart() {
        regs.cr().modify(|w| w.set_adstp(true));
        while regs.cr().read().adstp() {}
    }
}

#[interrupt]
fn ADC1_COMP() {
    let regs = pac::ADC1;
    let flags = regs.isr().read();
    if flags.ovr() {
        regs.isr().write(|w| w.set_ovr(true));
    }
    if flags.eoc() {
        // Reading DR clears EOC.
        let raw = regs.dr().read().data();
        CAPTURE.on_conversion(raw);
    }
    if flags.eos() {
        regs.isr().write(|w| w.set_eos(true));
    }
}
