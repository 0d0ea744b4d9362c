use std::io::{self, BufRead, BufReader, Read};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::env;
use crate::error::ToolError;
use crate::storage::ChipType;

/// Exit status reported when the tool never started.
pub const SPAWN_FAILED_CODE: i32 = -1;
/// Exit status reported when the tool ended without a code or a signal.
pub const NO_STATUS_CODE: i32 = -2;
/// Baud rate used for every flashing tool invocation.
pub const FLASH_BAUD: u32 = 921_600;

/// Tool sub-commands and their fixed positional arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subcommand {
    EraseFlash,
    /// Always written at offset zero.
    WriteFlash { path: String },
    ReadFlash { offset: u64, size: u64, path: String },
    FlashId,
}

impl Subcommand {
    pub fn args(&self) -> Vec<String> {
        match self {
            Subcommand::EraseFlash => vec!["erase_flash".into()],
            Subcommand::WriteFlash { path } => {
                vec!["write_flash".into(), "0x0".into(), path.clone()]
            }
            Subcommand::ReadFlash { offset, size, path } => vec![
                "read-flash".into(),
                format!("{offset:#x}"),
                size.to_string(),
                path.clone(),
            ],
            Subcommand::FlashId => vec!["flash_id".into()],
        }
    }
}

/// Something that can run flashing tool sub-commands against a port.
#[async_trait]
pub trait FlashTool: Send + Sync {
    /// Run `command`, handing every output line to `on_line`, and return the
    /// tool's exit code.
    async fn run(
        &self,
        port: &str,
        command: &Subcommand,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> Result<i32, ToolError>;

    /// Human-readable command line for logs.
    fn command_line(&self, port: &str, command: &Subcommand) -> String;
}

/// Runs `esptool` as a Python module.
#[derive(Clone, Debug)]
pub struct EspTool {
    program: String,
    chip: ChipType,
    baud: u32,
}

impl EspTool {
    pub fn new(chip: ChipType) -> Self {
        Self::with_program(env::python_command(), chip)
    }

    pub fn with_program(program: impl Into<String>, chip: ChipType) -> Self {
        Self {
            program: program.into(),
            chip,
            baud: FLASH_BAUD,
        }
    }

    pub fn argv(&self, port: &str, command: &Subcommand) -> Vec<String> {
        let mut argv = vec![
            self.program.clone(),
            "-m".into(),
            "esptool".into(),
            "--chip".into(),
            self.chip.as_str().into(),
            "--port".into(),
            port.into(),
            "--baud".into(),
            self.baud.to_string(),
        ];
        argv.extend(command.args());
        argv
    }
}

#[async_trait]
impl FlashTool for EspTool {
    async fn run(
        &self,
        port: &str,
        command: &Subcommand,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> Result<i32, ToolError> {
        let argv = self.argv(port, command);
        debug!("esptool: spawning {}", argv.join(" "));
        let spawn_failed = |source: io::Error| {
            warn!("esptool: failed to start {}: {source}", self.program);
            ToolError::Spawn {
                program: self.program.clone(),
                source,
            }
        };

        // stdout and stderr share one pipe so lines keep the order the tool wrote them.
        let (reader, writer) = io::pipe().map_err(spawn_failed)?;
        let stderr = writer.try_clone().map_err(spawn_failed)?;
        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(spawn_failed)?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let pump = tokio::task::spawn_blocking(move || forward_lines(reader, tx));
        while let Some(line) = rx.recv().await {
            on_line(&line);
        }
        if let Err(err) = pump.await {
            debug!("esptool: output reader ended abnormally ({err})");
        }

        let status = child.wait().await.map_err(|source| ToolError::Wait {
            program: self.program.clone(),
            source,
        })?;
        let code = exit_code(status);
        info!("esptool: {:?} finished with code {code}", command);
        Ok(code)
    }

    fn command_line(&self, port: &str, command: &Subcommand) -> String {
        self.argv(port, command).join(" ")
    }
}

/// The tool's exit code. A signal death maps to 128 + signal, as shells report it.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            warn!("esptool: terminated by signal {signal}");
            return 128 + signal;
        }
    }
    warn!("esptool: exited without a status code");
    NO_STATUS_CODE
}

/// Split the child's output into lines. Carriage returns count as line breaks
/// so in-place progress updates still come through one at a time.
fn forward_lines<R: Read>(stream: R, tx: mpsc::UnboundedSender<String>) {
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) => break,
            Ok(_) => {
                for line in split_output(&buffer) {
                    if tx.send(line).is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                debug!("esptool: output stream closed ({err})");
                break;
            }
        }
    }
}

fn split_output(raw: &[u8]) -> Vec<String> {
    let decoded = String::from_utf8_lossy(raw);
    let mut text: &str = &decoded;
    text = text.strip_suffix('\n').unwrap_or(text);
    text = text.strip_suffix('\r').unwrap_or(text);
    text.split('\r').map(str::to_owned).collect()
}
