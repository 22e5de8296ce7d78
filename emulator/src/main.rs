mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use session::{Session, SessionOptions};

const USAGE: &str =
    "Usage: ppm-emulator [--temperature <celsius>] [--absent] [--dump] [--transcript <path>]";

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(&options)?;
    let mut line = String::new();

    writeln!(
        writer,
        "PPM Magnetometer Emulator ready. Type `help` for commands or `exit` to quit."
    )?;
    for response in session.initialize_probe()? {
        writeln!(writer, "{response}")?;
    }

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for response in session.handle_line(trimmed)? {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options(mut args: impl Iterator<Item = String>) -> Result<SessionOptions, String> {
    let mut options = SessionOptions::default();
    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--temperature=") {
            options.temperature_raw = parse_celsius(value)?;
        } else if arg == "--temperature" {
            let value = args
                .next()
                .ok_or_else(|| "Expected value after --temperature".to_string())?;
            options.temperature_raw = parse_celsius(&value)?;
        } else if arg == "--absent" {
            options.probe_present = false;
        } else if arg == "--dump" {
            options.dump_stream = true;
        } else if let Some(value) = arg.strip_prefix("--transcript=") {
            options.transcript = Some(value.to_string());
        } else if arg == "--transcript" {
            let value = args
                .next()
                .ok_or_else(|| "Expected path after --transcript".to_string())?;
            options.transcript = Some(value);
        } else {
            return Err(format!("Unknown argument `{arg}`"));
        }
    }
    Ok(options)
}

/// Converts degrees Celsius to the probe's 1/16 °C fixed point.
#[allow(clippy::cast_possible_truncation)]
fn parse_celsius(value: &str) -> Result<i16, String> {
    let celsius: f64 = value
        .parse()
        .map_err(|_| format!("Invalid temperature `{value}`"))?;
    if !(-55.0..=125.0).contains(&celsius) {
        return Err(format!("Temperature {celsius} outside the probe range -55..125"));
    }
    Ok((celsius * 16.0).round() as i16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|arg| (*arg).to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn temperature_flag_converts_to_fixed_point() {
        let options = parse_options(args(&["--temperature", "25.0625"])).unwrap();
        assert_eq!(options.temperature_raw, 401);
        let options = parse_options(args(&["--temperature=-10.125"])).unwrap();
        assert_eq!(options.temperature_raw, -162);
    }

    #[test]
    fn absent_flag_disconnects_the_probe() {
        let options = parse_options(args(&["--absent", "--dump"])).unwrap();
        assert!(!options.probe_present);
        assert!(options.dump_stream);
    }

    #[test]
    fn out_of_range_and_unknown_arguments_are_rejected() {
        assert!(parse_options(args(&["--temperature", "200"])).is_err());
        assert!(parse_options(args(&["--temperature"])).is_err());
        assert!(parse_options(args(&["--verbose"])).is_err());
    }
}
