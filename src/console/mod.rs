use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::LauncherError;
use crate::i18n::I18n;

pub const CONSOLE_BAUD_RATES: [u32; 2] = [115_200, 921_600];
const READ_TIMEOUT: Duration = Duration::from_millis(100);
const TONE_COMMAND: &[u8] = b"tone\n";

/// Plain line passthrough between the terminal and a serial port.
///
/// Runs until stdin reaches EOF.
pub fn run(port_name: &str, baud: u32, send_tone: bool, i18n: I18n) -> Result<(), LauncherError> {
    println!("{}", i18n.connecting());
    let mut port = serialport::new(port_name, baud)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|err| LauncherError::Usage(i18n.port_open_failed(&err.to_string())))?;
    info!("console: opened {port_name} at {baud} baud");

    if send_tone && let Err(err) = port.write_all(TONE_COMMAND) {
        debug!("console: tone command not sent ({err})");
    }

    let reader_port = port.try_clone()?;
    let stop = Arc::new(AtomicBool::new(false));
    let reader_stop = stop.clone();
    let reader = thread::spawn(move || {
        let stdout = io::stdout();
        pump_lines(reader_port, &reader_stop, |line| {
            let mut out = stdout.lock();
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        });
    });

    println!("{}", i18n.console_opened(port_name, baud));
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let Some(command) = outgoing_command(&line) else {
            continue;
        };
        if let Err(err) = port.write_all(command.as_bytes()) {
            warn!("console: write failed ({err})");
            eprintln!("{}", i18n.send_failed());
        }
    }

    stop.store(true, Ordering::SeqCst);
    let _ = reader.join();
    println!("{}", i18n.console_closed());
    Ok(())
}

/// Command text as written to the device, newline-terminated; `None` for
/// empty input.
fn outgoing_command(input: &str) -> Option<String> {
    if input.is_empty() {
        return None;
    }
    let mut command = input.to_owned();
    if !command.ends_with('\n') {
        command.push('\n');
    }
    Some(command)
}

/// Read lines until `stop` is raised or the stream fails, handing every
/// non-empty line (without CR/LF) to `emit`. Read timeouts just poll again.
fn pump_lines<R, F>(stream: R, stop: &AtomicBool, mut emit: F)
where
    R: Read,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::new();
    while !stop.load(Ordering::SeqCst) {
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) => break,
            Ok(_) => {
                if buffer.ends_with(b"\n") {
                    emit_line(&buffer, &mut emit);
                    buffer.clear();
                }
            }
            Err(err) if err.kind() == io::ErrorKind::TimedOut => continue,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!("console: read loop stopped ({err})");
                break;
            }
        }
    }
    if !buffer.is_empty() {
        emit_line(&buffer, &mut emit);
    }
}

fn emit_line<F: FnMut(&str)>(raw: &[u8], emit: &mut F) {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_end_matches(['\r', '\n']);
    if !text.is_empty() {
        emit(text);
    }
}
