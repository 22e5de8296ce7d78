use ppm_core::acquisition::{
    AcquisitionError, CaptureStats, ConversionTrigger, SharedCapture, acquire, unpack_samples,
};
use ppm_core::config::{PACKED_BUFFER_LEN, PACKED_GROUP_LEN, SAMPLE_COUNT};
use ppm_core::sim::{VirtualClock, WaveformTrigger};

/// Trigger that plays the interrupt handler for a fixed number of events.
struct BurstTrigger<'c, const N: usize> {
    capture: &'c SharedCapture<N>,
    burst: u32,
    arms: u32,
}

impl<const N: usize> ConversionTrigger for BurstTrigger<'_, N> {
    fn arm(&mut self) {
        self.arms += 1;
        for event in 0..self.burst {
            self.capture.on_conversion((event % 4096) as u16);
        }
    }

    fn disarm(&mut self) {}
}

#[test]
fn full_cycle_fills_the_packed_buffer() {
    static CAPTURE: SharedCapture<PACKED_BUFFER_LEN> = SharedCapture::new();
    let mut trigger = WaveformTrigger::new(&CAPTURE, |event| (event * 3) as u16);
    let mut clock = VirtualClock::new();

    let stats = acquire(&CAPTURE, &mut trigger, &mut clock, Some(100)).expect("capture completes");

    assert_eq!(
        stats,
        CaptureStats {
            events: SAMPLE_COUNT,
            bytes_written: PACKED_BUFFER_LEN,
            overruns: 0,
        }
    );
    assert!(!CAPTURE.is_armed());
    assert!(!trigger.is_armed());
    assert_eq!(CAPTURE.group_count(), Ok(PACKED_BUFFER_LEN / PACKED_GROUP_LEN));

    let mut packed = Vec::with_capacity(PACKED_BUFFER_LEN);
    for index in 0..CAPTURE.group_count().unwrap() {
        packed.extend_from_slice(&CAPTURE.packed_group(index).unwrap());
    }
    let samples: Vec<u16> = unpack_samples(&packed).collect();
    assert_eq!(samples.len(), SAMPLE_COUNT as usize);
    for (event, sample) in samples.iter().enumerate() {
        assert_eq!(*sample, ((event as u32 * 3) & 0x0fff) as u16);
    }
}

#[test]
fn late_conversions_are_counted_as_overruns() {
    static CAPTURE: SharedCapture<PACKED_BUFFER_LEN> = SharedCapture::new();
    let mut trigger = BurstTrigger {
        capture: &CAPTURE,
        burst: SAMPLE_COUNT + 5,
        arms: 0,
    };
    let mut clock = VirtualClock::new();

    let stats = acquire(&CAPTURE, &mut trigger, &mut clock, None).expect("capture completes");

    assert_eq!(stats.events, SAMPLE_COUNT);
    assert_eq!(stats.bytes_written, PACKED_BUFFER_LEN);
    assert_eq!(stats.overruns, 5);
    assert_eq!(trigger.arms, 1);
}

#[test]
fn stalled_trigger_times_out() {
    static CAPTURE: SharedCapture<PACKED_BUFFER_LEN> = SharedCapture::new();
    let mut trigger = BurstTrigger {
        capture: &CAPTURE,
        burst: 1_001,
        arms: 0,
    };
    let mut clock = VirtualClock::new();

    let result = acquire(&CAPTURE, &mut trigger, &mut clock, Some(100));

    assert_eq!(result, Err(AcquisitionError::Stalled { events: 1_001 }));
    assert_eq!(clock.now_ms(), 100);
    assert!(!CAPTURE.is_armed());
    assert_eq!(CAPTURE.group_count(), Err(AcquisitionError::Busy));
}

#[test]
fn conversions_outside_a_cycle_are_ignored() {
    static CAPTURE: SharedCapture<PACKED_BUFFER_LEN> = SharedCapture::new();
    let mut trigger = BurstTrigger {
        capture: &CAPTURE,
        burst: SAMPLE_COUNT,
        arms: 0,
    };
    let mut clock = VirtualClock::new();
    acquire(&CAPTURE, &mut trigger, &mut clock, None).expect("capture completes");
    let first = CAPTURE.packed_group(0).unwrap();

    for raw in 0..10 {
        CAPTURE.on_conversion(0x0fff - raw);
    }

    assert_eq!(CAPTURE.events(), SAMPLE_COUNT);
    assert_eq!(CAPTURE.stats().overruns, 0);
    assert_eq!(CAPTURE.packed_group(0), Ok(first));
}

#[test]
fn each_cycle_starts_from_an_empty_buffer() {
    static CAPTURE: SharedCapture<PACKED_BUFFER_LEN> = SharedCapture::new();
    let mut clock = VirtualClock::new();

    let mut low = WaveformTrigger::new(&CAPTURE, |_| 0x001);
    acquire(&CAPTURE, &mut low, &mut clock, None).expect("capture completes");
    assert_eq!(CAPTURE.packed_group(0), Ok([0x00, 0x10, 0x01]));

    let mut high = WaveformTrigger::new(&CAPTURE, |_| 0xffe);
    let stats = acquire(&CAPTURE, &mut high, &mut clock, None).expect("capture completes");
    assert_eq!(stats.events, SAMPLE_COUNT);
    assert_eq!(CAPTURE.packed_group(0), Ok([0xff, 0xef, 0xfe]));
    assert_eq!(high.delivered(), SAMPLE_COUNT);
}
