use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant as HostInstant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use static_cell::StaticCell;

use ppm_core::acquisition::{SharedCapture, unpack_samples};
use ppm_core::actuation::{ActuatorAction, ActuatorDriver, ActuatorId, DEFAULT_TIMINGS};
use ppm_core::config::{ACQUISITION_STALL_TIMEOUT_MS, PACKED_BUFFER_LEN, SAMPLE_RATE_HZ};
use ppm_core::control::{
    Base64Encoder, Completed, ControlLoop, PollReport, PpmMeasurement, SerialLink,
};
use ppm_core::delay::MillisDelay;
use ppm_core::onewire::OneWireBus;
use ppm_core::sim::{Ds18b20Device, SimDelay, SimPin, WaveformTrigger, Wire};
use ppm_core::thermometer::{Resolution, SensorError, Temperature, Thermometer};

static CAPTURE: SharedCapture<PACKED_BUFFER_LEN> = SharedCapture::new();
static WIRE: StaticCell<RefCell<Wire<Ds18b20Device>>> = StaticCell::new();

/// Characters of the encoded stream echoed back after a measurement.
const PREVIEW_CHARS: usize = 48;

/// Larmor frequency of the synthesized precession signal.
const SIGNAL_HZ: f64 = 800.0;
/// Initial signal amplitude in ADC counts.
const SIGNAL_AMPLITUDE: f64 = 1_500.0;
/// Transverse relaxation time of the synthesized signal.
const SIGNAL_DECAY_S: f64 = 1.5;
/// ADC mid-scale the signal is centered on.
const MID_SCALE: f64 = 2_048.0;
/// Field per hertz of proton precession (2π / γp), in nanotesla.
const NT_PER_HZ: f64 = 23.496_241;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("S", "S        - polarize, capture, and stream one measurement"),
    ("T", "T        - convert and report the probe temperature"),
    ("probe", "probe <c> - set the simulated probe temperature in degrees C"),
    ("help", "help     - show this list"),
    ("exit", "exit     - close the session"),
];

/// Options taken from the command line.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub temperature_raw: i16,
    pub probe_present: bool,
    pub dump_stream: bool,
    pub transcript: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            temperature_raw: 21 * 16,
            probe_present: true,
            dump_stream: false,
            transcript: None,
        }
    }
}

/// Serial port backed by in-memory queues.
#[derive(Default)]
pub struct HostSerial {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

impl HostSerial {
    fn receive(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tx)
    }
}

impl SerialLink for HostSerial {
    type Error = Infallible;

    fn read_ready(&mut self) -> bool {
        !self.rx.is_empty()
    }

    fn read_byte(&mut self) -> Result<u8, Infallible> {
        Ok(self.rx.pop_front().unwrap_or_default())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Infallible> {
        self.tx.extend_from_slice(bytes);
        Ok(())
    }
}

/// Millisecond clock shared between the sequencer and the actuator trace.
#[derive(Clone, Default)]
pub struct HostClock(Rc<Cell<u64>>);

impl HostClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

impl MillisDelay for HostClock {
    fn delay_ms(&mut self, ms: u32) {
        self.0.set(self.0.get() + u64::from(ms));
    }
}

/// Actuator outputs that record every transition with its virtual time.
pub struct TracingActuators {
    clock: HostClock,
    trace: Rc<RefCell<Vec<String>>>,
}

impl ActuatorDriver for TracingActuators {
    fn apply(&mut self, output: ActuatorId, action: ActuatorAction) {
        let line = format!(
            "  +{}ms {} {}",
            self.clock.now_ms(),
            output_label(output),
            action_label(action)
        );
        self.trace.borrow_mut().push(line);
    }

    fn release_all(&mut self) {
        let line = format!("  +{}ms all outputs released", self.clock.now_ms());
        self.trace.borrow_mut().push(line);
    }
}

type SimBus = OneWireBus<SimPin<'static, Ds18b20Device>, SimDelay<'static, Ds18b20Device>>;
type Waveform = fn(u32) -> u16;
type HostMeasurement = PpmMeasurement<
    'static,
    TracingActuators,
    WaveformTrigger<'static, Waveform, PACKED_BUFFER_LEN>,
    HostClock,
    PACKED_BUFFER_LEN,
>;
type HostControl = ControlLoop<HostSerial, Base64Encoder, HostMeasurement, Thermometer<SimBus>>;

pub struct Session {
    control: HostControl,
    wire: &'static RefCell<Wire<Ds18b20Device>>,
    clock: HostClock,
    trace: Rc<RefCell<Vec<String>>>,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
    dump_stream: bool,
}

impl Session {
    pub fn new(options: &SessionOptions) -> io::Result<Self> {
        let mut device = Ds18b20Device::new(options.temperature_raw);
        device.set_present(options.probe_present);
        let wire: &'static RefCell<Wire<Ds18b20Device>> = WIRE
            .try_init(RefCell::new(Wire::new(device)))
            .ok_or_else(|| io::Error::other("a session is already running"))?;

        let bus = OneWireBus::new(SimPin::new(wire), SimDelay::new(wire));
        let thermometer = Thermometer::new(bus, Resolution::Twelve);

        let clock = HostClock::default();
        let trace = Rc::new(RefCell::new(Vec::new()));
        let actuators = TracingActuators {
            clock: clock.clone(),
            trace: Rc::clone(&trace),
        };
        let trigger = WaveformTrigger::new(&CAPTURE, free_induction_decay as Waveform);
        let measurement = PpmMeasurement::new(
            actuators,
            trigger,
            clock.clone(),
            &CAPTURE,
            DEFAULT_TIMINGS,
            Some(ACQUISITION_STALL_TIMEOUT_MS),
        );

        let control = ControlLoop::new(HostSerial::default(), Base64Encoder, measurement, thermometer);
        let transcript = options
            .transcript
            .as_deref()
            .map(TranscriptLogger::create)
            .transpose()?;

        Ok(Self {
            control,
            wire,
            clock,
            trace,
            transcript,
            started_at: HostInstant::now(),
            dump_stream: options.dump_stream,
        })
    }

    /// Configures the probe the way the firmware does at boot.
    pub fn initialize_probe(&mut self) -> io::Result<Vec<String>> {
        let probe = self.control.probe_mut();
        let resolution = probe.resolution();
        let line = match probe.initialize() {
            Ok(()) => format!(
                "probe ready (resolution {resolution:?}, bus time {}us)",
                self.wire.borrow().now_us()
            ),
            Err(error) => format!("probe init failed: {error}"),
        };
        let lines = vec![line];
        self.record(TranscriptRole::Emulator, &lines)?;
        Ok(lines)
    }

    /// Feeds one host line to the serial receiver and runs the loop until idle.
    pub fn handle_line(&mut self, line: &str) -> io::Result<Vec<String>> {
        self.record(TranscriptRole::Host, &[line.to_string()])?;

        if line.eq_ignore_ascii_case("help") {
            let lines = HELP_TOPICS.iter().map(|(_, text)| (*text).to_string()).collect();
            return Ok(lines);
        }

        if let Some(value) = line.strip_prefix("probe ") {
            let lines = vec![self.set_probe_temperature(value.trim())];
            self.record(TranscriptRole::Emulator, &lines)?;
            return Ok(lines);
        }

        self.control.serial_mut().receive(line.as_bytes());
        self.control.serial_mut().receive(b"\n");

        let mut lines = Vec::new();
        let report = self.poll()?;
        if report.discarded_bytes > 0 {
            lines.push(format!("line overflow: {} bytes dropped", report.discarded_bytes));
        }
        if report.queued.is_none() {
            lines.push("ignored".to_string());
        }

        while self.control.pending().is_some() {
            let report = self.poll()?;
            if let Some(completed) = report.completed {
                let output = self.control.serial_mut().take_output();
                lines.extend(self.describe(completed, &output));
            }
        }

        self.record(TranscriptRole::Emulator, &lines)?;
        Ok(lines)
    }

    /// Changes the value the simulated probe latches on its next conversion.
    fn set_probe_temperature(&mut self, value: &str) -> String {
        match crate::parse_celsius(value) {
            Ok(raw) => {
                self.wire.borrow_mut().device_mut().set_temperature_raw(raw);
                format!("probe set to {}", Temperature::from_raw(raw))
            }
            Err(error) => error,
        }
    }

    fn poll(&mut self) -> io::Result<PollReport> {
        self.control
            .poll()
            .map_err(|error| io::Error::other(error.to_string()))
    }

    fn describe(&mut self, completed: Completed, output: &[u8]) -> Vec<String> {
        match completed {
            Completed::Measurement { stats, groups } => {
                let mut lines = vec!["actuation:".to_string()];
                lines.append(&mut self.trace.borrow_mut());
                lines.push(format!(
                    "capture: events={} bytes={} overruns={} (virtual time {}ms)",
                    stats.events,
                    stats.bytes_written,
                    stats.overruns,
                    self.clock.now_ms()
                ));
                lines.push(format!("stream: {groups} groups, {} chars", output.len()));
                if self.dump_stream {
                    lines.push(String::from_utf8_lossy(output).into_owned());
                } else {
                    let preview = &output[..output.len().min(PREVIEW_CHARS)];
                    lines.push(format!("  {}...", String::from_utf8_lossy(preview)));
                }
                lines.extend(analyze_stream(output));
                lines
            }
            Completed::Temperature(reading) => {
                let reply = String::from_utf8_lossy(output).into_owned();
                let meaning = match reading {
                    Ok(temperature) => describe_temperature(temperature),
                    Err(SensorError::NotPresent) => "probe absent".to_string(),
                };
                vec![format!("reply: {reply} ({meaning})")]
            }
        }
    }

    fn record(&mut self, role: TranscriptRole, lines: &[String]) -> io::Result<()> {
        let elapsed = self.started_at.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            for line in lines {
                transcript.append_line(elapsed, role, line)?;
            }
        }
        Ok(())
    }
}

/// Decodes the stream the way the receiving tool does and summarizes it.
fn analyze_stream(encoded: &[u8]) -> Vec<String> {
    let packed = match STANDARD.decode(encoded) {
        Ok(packed) => packed,
        Err(error) => return vec![format!("decode failed: {error}")],
    };

    let samples: Vec<u16> = unpack_samples(&packed).collect();
    let channel_a: Vec<u16> = samples.iter().step_by(2).copied().collect();
    let channel_b: Vec<u16> = samples.iter().skip(1).step_by(2).copied().collect();

    let mut lines = vec![format!("decoded: {} samples", samples.len())];
    lines.push(describe_channel("A", &channel_a));
    lines.push(describe_channel("B", &channel_b));
    if let Some(hz) = estimate_frequency(&channel_a) {
        lines.push(format!("channel A frequency estimate: {hz:.1} Hz"));
        lines.push(format!("field estimate: {:.1} nT", field_strength_nt(hz)));
    }
    lines
}

fn describe_channel(name: &str, samples: &[u16]) -> String {
    let min = samples.iter().min().copied().unwrap_or_default();
    let max = samples.iter().max().copied().unwrap_or_default();
    format!(
        "channel {name}: {} samples, min={min} max={max} mean={:.1}",
        samples.len(),
        mean(samples)
    )
}

#[allow(clippy::cast_precision_loss)]
fn mean(samples: &[u16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|&sample| f64::from(sample)).sum::<f64>() / samples.len() as f64
}

/// Zero-crossing estimate over one channel sampled at half the trigger rate.
#[allow(clippy::cast_precision_loss)]
fn estimate_frequency(samples: &[u16]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let center = mean(samples);
    let crossings = samples
        .windows(2)
        .filter(|pair| (f64::from(pair[0]) - center).signum() != (f64::from(pair[1]) - center).signum())
        .count();
    let duration_s = samples.len() as f64 / (f64::from(SAMPLE_RATE_HZ) / 2.0);
    Some(crossings as f64 / 2.0 / duration_s)
}

/// Magnetic field that makes protons precess at `hz`.
fn field_strength_nt(hz: f64) -> f64 {
    NT_PER_HZ * hz
}

/// Synthetic precession signal on channel A and a flat reference on channel B.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn free_induction_decay(event: u32) -> u16 {
    if event % 2 == 1 {
        return MID_SCALE as u16;
    }
    let t = f64::from(event / 2) / (f64::from(SAMPLE_RATE_HZ) / 2.0);
    let envelope = SIGNAL_AMPLITUDE * (-t / SIGNAL_DECAY_S).exp();
    let value = MID_SCALE + envelope * (2.0 * std::f64::consts::PI * SIGNAL_HZ * t).sin();
    value.round().clamp(0.0, 4_095.0) as u16
}

fn describe_temperature(temperature: Temperature) -> String {
    temperature.to_string()
}

fn output_label(output: ActuatorId) -> &'static str {
    match output {
        ActuatorId::Relay => "relay",
        ActuatorId::Polarizer => "polarizer",
    }
}

fn action_label(action: ActuatorAction) -> &'static str {
    match action {
        ActuatorAction::Energize => "energize",
        ActuatorAction::DeEnergize => "de-energize",
    }
}

#[derive(Copy, Clone)]
enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

struct TranscriptLogger {
    writer: BufWriter<File>,
}

impl TranscriptLogger {
    fn create(path: &str) -> io::Result<Self> {
        let path = Path::new(path);
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "PPM emulator transcript")?;
        Ok(Self { writer })
    }

    fn append_line(&mut self, elapsed: Duration, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[{:>8.3}s] {} {}",
            elapsed.as_secs_f64(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_signal_stays_in_adc_range() {
        for event in 0..20_000 {
            assert!(free_induction_decay(event) <= 0x0fff);
        }
        assert_eq!(free_induction_decay(1), 2_048);
    }

    #[test]
    fn frequency_estimate_recovers_the_synthesized_tone() {
        let channel_a: Vec<u16> = (0..20_000)
            .step_by(2)
            .map(free_induction_decay)
            .collect();
        let hz = estimate_frequency(&channel_a).expect("enough samples");
        assert!((hz - SIGNAL_HZ).abs() < 5.0, "estimated {hz} Hz");
    }

    #[test]
    fn field_estimate_scales_with_precession_frequency() {
        assert!((field_strength_nt(2_000.0) - 46_992.482).abs() < 1e-6);
        assert!((field_strength_nt(SIGNAL_HZ) - 18_796.992_8).abs() < 1e-6);
    }

    #[test]
    fn analysis_reports_the_field_of_the_synthesized_tone() {
        let mut packed = Vec::new();
        for event in (0..20_000).step_by(2) {
            packed.extend_from_slice(&ppm_core::acquisition::pack_pair(
                free_induction_decay(event),
                free_induction_decay(event + 1),
            ));
        }
        let lines = analyze_stream(STANDARD.encode(&packed).as_bytes());

        let field = lines
            .iter()
            .find_map(|line| line.strip_prefix("field estimate: "))
            .and_then(|rest| rest.strip_suffix(" nT"))
            .and_then(|value| value.parse::<f64>().ok())
            .expect("field line present");
        assert!((field - field_strength_nt(SIGNAL_HZ)).abs() < 5.0 * NT_PER_HZ);
    }

    #[test]
    fn temperature_override_changes_the_next_reading() {
        let mut session = Session::new(&SessionOptions::default()).unwrap();
        session.initialize_probe().unwrap();

        let lines = session.handle_line("probe 25.0625").unwrap();
        assert_eq!(lines, vec!["probe set to 25.0625 C".to_string()]);
        let lines = session.handle_line("probe 300").unwrap();
        assert!(lines[0].contains("outside the probe range"));

        let lines = session.handle_line("T").unwrap();
        assert_eq!(lines, vec!["reply: 401 (25.0625 C)".to_string()]);
    }

    #[test]
    fn analysis_rejects_garbage() {
        let lines = analyze_stream(b"not base64!");
        assert!(lines[0].starts_with("decode failed"));
    }
}
