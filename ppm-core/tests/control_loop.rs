use std::collections::VecDeque;
use std::convert::Infallible;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use ppm_core::acquisition::{AcquisitionError, CaptureStats, SharedCapture, unpack_samples};
use ppm_core::actuation::{DEFAULT_TIMINGS, NoopActuatorDriver};
use ppm_core::config::{PACKED_BUFFER_LEN, PACKED_GROUP_LEN, SAMPLE_COUNT};
use ppm_core::control::{
    Base64Encoder, Command, Completed, ControlLoop, Measurement, PpmMeasurement, SerialLink,
};
use ppm_core::sim::{VirtualClock, WaveformTrigger};
use ppm_core::thermometer::{SensorError, Temperature, TemperatureProbe};

#[derive(Default)]
struct ScriptedSerial {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

impl ScriptedSerial {
    fn receive(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }
}

impl SerialLink for ScriptedSerial {
    type Error = Infallible;

    fn read_ready(&mut self) -> bool {
        !self.rx.is_empty()
    }

    fn read_byte(&mut self) -> Result<u8, Infallible> {
        Ok(self.rx.pop_front().unwrap_or(0))
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Infallible> {
        self.tx.extend_from_slice(bytes);
        Ok(())
    }
}

/// Measurement that hands back two fixed groups.
#[derive(Default)]
struct CountingMeasurement {
    runs: u32,
}

const FIXED_GROUPS: [[u8; PACKED_GROUP_LEN]; 2] = [[0xab, 0xc1, 0x23], [0x00, 0x0f, 0xff]];

impl Measurement for CountingMeasurement {
    fn measure(&mut self) -> Result<CaptureStats, AcquisitionError> {
        self.runs += 1;
        Ok(CaptureStats {
            events: 4,
            bytes_written: 6,
            overruns: 0,
        })
    }

    fn group_count(&self) -> Result<usize, AcquisitionError> {
        Ok(FIXED_GROUPS.len())
    }

    fn packed_group(&self, index: usize) -> Result<[u8; PACKED_GROUP_LEN], AcquisitionError> {
        FIXED_GROUPS
            .get(index)
            .copied()
            .ok_or(AcquisitionError::OutOfRange)
    }
}

struct FixedProbe(Result<Temperature, SensorError>);

impl TemperatureProbe for FixedProbe {
    fn read_temperature(&mut self) -> Result<Temperature, SensorError> {
        self.0
    }
}

fn counting_loop(
    probe: Result<Temperature, SensorError>,
) -> ControlLoop<ScriptedSerial, Base64Encoder, CountingMeasurement, FixedProbe> {
    ControlLoop::new(
        ScriptedSerial::default(),
        Base64Encoder,
        CountingMeasurement::default(),
        FixedProbe(probe),
    )
}

#[test]
fn start_byte_runs_exactly_one_measurement() {
    let mut control = counting_loop(Ok(Temperature::from_raw(0)));
    control.serial_mut().receive(b"S\r\n");

    let report = control.poll().unwrap();
    assert_eq!(report.queued, Some(Command::StartMeasurement));
    assert_eq!(report.completed, None);
    assert_eq!(control.measurement().runs, 0);

    let report = control.poll().unwrap();
    assert!(matches!(
        report.completed,
        Some(Completed::Measurement { groups: 2, .. })
    ));
    assert_eq!(control.measurement().runs, 1);
    assert_eq!(control.serial().tx, b"q8EjAA//");

    let report = control.poll().unwrap();
    assert_eq!(report.completed, None);
    assert_eq!(control.measurement().runs, 1);
}

#[test]
fn other_lines_are_ignored() {
    let mut control = counting_loop(Ok(Temperature::from_raw(0)));
    control.serial_mut().receive(b"XS\n");

    let report = control.poll().unwrap();
    assert_eq!(report.queued, None);
    control.poll().unwrap();

    assert_eq!(control.measurement().runs, 0);
    assert!(control.serial().tx.is_empty());
    assert_eq!(control.pending(), None);
}

#[test]
fn overlong_lines_still_start_a_cycle() {
    let mut control = counting_loop(Ok(Temperature::from_raw(0)));
    control.serial_mut().receive(b"Sxxxxxxxxxxxxxxxxxxx");

    let report = control.poll().unwrap();
    assert_eq!(report.queued, Some(Command::StartMeasurement));
    assert_eq!(report.discarded_bytes, 5);

    control.poll().unwrap();
    assert_eq!(control.measurement().runs, 1);
}

#[test]
fn input_waits_until_the_running_command_finishes() {
    let mut control = counting_loop(Ok(Temperature::from_raw(0)));
    control.serial_mut().receive(b"S");
    control.poll().unwrap();

    control.serial_mut().receive(b"S");
    let report = control.poll().unwrap();
    assert!(report.completed.is_some());
    assert_eq!(report.queued, Some(Command::StartMeasurement));
    assert_eq!(control.measurement().runs, 1);

    control.poll().unwrap();
    assert_eq!(control.measurement().runs, 2);
}

#[test]
fn temperature_request_replies_with_the_raw_value() {
    let mut control = counting_loop(Ok(Temperature::from_raw(401)));
    control.serial_mut().receive(b"T");
    control.poll().unwrap();

    let report = control.poll().unwrap();
    assert_eq!(
        report.completed,
        Some(Completed::Temperature(Ok(Temperature::from_raw(401))))
    );
    assert_eq!(control.serial().tx, b"401");
    assert_eq!(control.measurement().runs, 0);
}

#[test]
fn temperature_request_without_probe_replies_nan() {
    let mut control = counting_loop(Err(SensorError::NotPresent));
    control.serial_mut().receive(b"T\n");
    control.poll().unwrap();
    control.poll().unwrap();

    assert_eq!(control.serial().tx, b"nan");
}

#[test]
fn full_cycle_streams_every_sample() {
    static CAPTURE: SharedCapture<PACKED_BUFFER_LEN> = SharedCapture::new();
    let waveform = |event: u32| ((event * 7 + 100) % 4096) as u16;

    let measurement = PpmMeasurement::new(
        NoopActuatorDriver,
        WaveformTrigger::new(&CAPTURE, waveform),
        VirtualClock::new(),
        &CAPTURE,
        DEFAULT_TIMINGS,
        Some(100),
    );
    let mut control = ControlLoop::new(
        ScriptedSerial::default(),
        Base64Encoder,
        measurement,
        FixedProbe(Err(SensorError::NotPresent)),
    );

    control.serial_mut().receive(b"S\n");
    control.poll().unwrap();
    let report = control.poll().unwrap();

    let Some(Completed::Measurement { stats, groups }) = report.completed else {
        panic!("measurement did not run: {report:?}");
    };
    assert_eq!(stats.events, SAMPLE_COUNT);
    assert_eq!(groups, PACKED_BUFFER_LEN / PACKED_GROUP_LEN);

    let text = &control.serial().tx;
    assert_eq!(text.len(), groups * 4);

    let mut packed = vec![0u8; PACKED_BUFFER_LEN];
    let written = STANDARD.decode_slice(text, &mut packed).unwrap();
    assert_eq!(written, PACKED_BUFFER_LEN);

    let samples: Vec<u16> = unpack_samples(&packed).collect();
    assert_eq!(samples.len(), SAMPLE_COUNT as usize);
    for (event, sample) in samples.into_iter().enumerate() {
        assert_eq!(sample, waveform(event as u32));
    }
}
