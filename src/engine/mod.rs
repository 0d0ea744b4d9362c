use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, info, warn};

use crate::error::{ParseError, ToolError};
use crate::i18n::{I18n, Language};
use crate::process::{FlashTool, Subcommand};
use crate::util::MIB;

use self::models::{BackupJob, FlashJob, RestoreJob};
use self::sink::ProgressSink;
use self::state::JobState;

pub mod models;
pub mod sink;
pub mod state;

/// Size read when the probe cannot tell us the real flash size.
pub const DEFAULT_FLASH_SIZE: u64 = 16 * MIB;

/// Extract the flash size in bytes from `flash_id` output.
///
/// Looks for `Detected flash size: <N>MB`; any other unit is not recognised.
pub fn parse_flash_size(output: &str) -> Result<u64, ParseError> {
    for line in output.lines() {
        let line = line.trim();
        if !line.contains("Detected flash size") {
            continue;
        }
        let Some((_, size_part)) = line.split_once(':') else {
            continue;
        };
        let size_part = size_part.trim().to_uppercase();
        if let Some(megabytes) = size_part.strip_suffix("MB") {
            let bad_size = || ParseError::BadSize(size_part.clone());
            let megabytes = megabytes.trim().parse::<u64>().map_err(|_| bad_size())?;
            if megabytes == 0 {
                return Err(bad_size());
            }
            return megabytes.checked_mul(MIB).ok_or_else(bad_size);
        }
    }
    Err(ParseError::NoMatch)
}

/// Sequences flashing tool invocations for flash, backup and restore jobs.
pub struct Orchestrator<T> {
    tool: T,
    i18n: I18n,
    busy_ports: Arc<Mutex<HashSet<String>>>,
}

/// Marks a port as in use until dropped.
struct PortGuard {
    port: String,
    busy_ports: Arc<Mutex<HashSet<String>>>,
}

impl Drop for PortGuard {
    fn drop(&mut self) {
        self.busy_ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.port);
    }
}

impl<T: FlashTool> Orchestrator<T> {
    pub fn new(tool: T, language: Language) -> Self {
        Self {
            tool,
            i18n: I18n::new(language),
            busy_ports: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn claim_port(&self, port: &str) -> Result<PortGuard, ToolError> {
        let mut busy = self
            .busy_ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !busy.insert(port.to_owned()) {
            return Err(ToolError::PortBusy(port.to_owned()));
        }
        Ok(PortGuard {
            port: port.to_owned(),
            busy_ports: self.busy_ports.clone(),
        })
    }

    fn enter(&self, port: &str, state: JobState) {
        if state.is_terminal() {
            debug!("job on {port}: finished as {state:?}");
        } else {
            debug!("job on {port}: -> {state:?}");
        }
    }

    fn claim_and_start(
        &self,
        port: &str,
        sink: &dyn ProgressSink,
    ) -> Result<PortGuard, JobState> {
        match self.claim_port(port) {
            Ok(guard) => {
                self.enter(port, JobState::Idle);
                Ok(guard)
            }
            Err(err) => {
                let text = self.i18n.port_busy(port);
                Err(self.finish_failed(port, sink, &text, err.code()))
            }
        }
    }

    fn finish_failed(
        &self,
        port: &str,
        sink: &dyn ProgressSink,
        text: &str,
        code: i32,
    ) -> JobState {
        error!("job on {port} failed: {text}");
        sink.failed(text, code);
        let state = JobState::Failed { code };
        self.enter(port, state.clone());
        state
    }

    fn finish_succeeded(&self, port: &str, sink: &dyn ProgressSink, text: &str) -> JobState {
        info!("job on {port} succeeded");
        sink.succeeded(text);
        self.enter(port, JobState::Succeeded);
        JobState::Succeeded
    }

    fn failed_to_start(&self, port: &str, sink: &dyn ProgressSink, err: &ToolError) -> JobState {
        let text = self.i18n.tool_start_failed(&err.to_string());
        self.finish_failed(port, sink, &text, err.code())
    }

    /// Echo the command line, then run it with output streamed to the sink.
    /// A nonzero exit comes back as `ToolError::Exit`.
    async fn run_step(
        &self,
        port: &str,
        command: &Subcommand,
        sink: &dyn ProgressSink,
    ) -> Result<(), ToolError> {
        sink.line(&self.tool.command_line(port, command));
        let code = self
            .tool
            .run(port, command, &mut |line: &str| sink.line(line))
            .await?;
        match code {
            0 => Ok(()),
            code => Err(ToolError::Exit { code }),
        }
    }

    /// Erase (if asked) then write new firmware at offset zero. The downloaded
    /// image is deleted after a successful write.
    pub async fn flash(&self, job: &FlashJob, sink: &dyn ProgressSink) -> JobState {
        let port = job.port.as_str();
        let _guard = match self.claim_and_start(port, sink) {
            Ok(guard) => guard,
            Err(state) => return state,
        };
        info!(
            "flash: {} -> {port} (erase={})",
            job.firmware.display(),
            job.erase
        );
        sink.message(&self.i18n.starting_flash(port, job.erase));

        if job.erase {
            self.enter(port, JobState::Erasing);
            sink.message(self.i18n.erasing_flash());
            match self.run_step(port, &Subcommand::EraseFlash, sink).await {
                Ok(()) => {}
                Err(ToolError::Exit { code }) => {
                    let text = self.i18n.erase_failed_cancelled();
                    return self.finish_failed(port, sink, text, code);
                }
                Err(err) => return self.failed_to_start(port, sink, &err),
            }
        }

        self.enter(port, JobState::Writing);
        sink.message(self.i18n.writing_firmware());
        let write = Subcommand::WriteFlash {
            path: job.firmware.to_string_lossy().into_owned(),
        };
        match self.run_step(port, &write, sink).await {
            Ok(()) => {
                remove_firmware(&job.firmware);
                self.finish_succeeded(port, sink, self.i18n.flash_succeeded())
            }
            Err(ToolError::Exit { code }) => {
                self.finish_failed(port, sink, &self.i18n.flash_failed(code), code)
            }
            Err(err) => self.failed_to_start(port, sink, &err),
        }
    }

    /// Probe the chip for its flash size. `None` when the probe fails or its
    /// output has no usable size line.
    pub async fn detect_flash_size(&self, port: &str) -> Option<u64> {
        let mut output = String::new();
        let probe = self
            .tool
            .run(port, &Subcommand::FlashId, &mut |line: &str| {
                debug!("flash_id: {line}");
                output.push_str(line);
                output.push('\n');
            })
            .await;

        match probe {
            Ok(0) => match parse_flash_size(&output) {
                Ok(size) => {
                    info!("backup: detected flash size {size} bytes");
                    Some(size)
                }
                Err(err) => {
                    warn!("backup: {err}");
                    None
                }
            },
            Ok(code) => {
                warn!("backup: flash_id exited with {code}");
                None
            }
            Err(err) => {
                warn!("backup: flash_id failed ({err})");
                None
            }
        }
    }

    /// Read the whole flash into the job's destination file.
    pub async fn backup(&self, job: &BackupJob, sink: &dyn ProgressSink) -> JobState {
        let port = job.port.as_str();
        let _guard = match self.claim_and_start(port, sink) {
            Ok(guard) => guard,
            Err(state) => return state,
        };

        let size = match job.size {
            Some(size) => size,
            None => {
                self.enter(port, JobState::DetectingSize);
                sink.message(self.i18n.detecting_flash_size());
                self.detect_flash_size(port).await.unwrap_or_else(|| {
                    sink.line(&self.i18n.flash_size_fallback(DEFAULT_FLASH_SIZE));
                    DEFAULT_FLASH_SIZE
                })
            }
        };

        sink.message(&self.i18n.creating_backup(port, size));
        self.enter(port, JobState::Reading);
        sink.message(self.i18n.reading_flash());
        let read = Subcommand::ReadFlash {
            offset: job.offset,
            size,
            path: job.destination.to_string_lossy().into_owned(),
        };
        match self.run_step(port, &read, sink).await {
            Ok(()) => self.finish_succeeded(port, sink, self.i18n.backup_succeeded()),
            Err(ToolError::Exit { code }) => {
                self.finish_failed(port, sink, &self.i18n.backup_failed(code), code)
            }
            Err(err) => self.failed_to_start(port, sink, &err),
        }
    }

    /// Write a backup image back at offset zero. Confirmation is the caller's job.
    pub async fn restore(&self, job: &RestoreJob, sink: &dyn ProgressSink) -> JobState {
        let port = job.port.as_str();
        let _guard = match self.claim_and_start(port, sink) {
            Ok(guard) => guard,
            Err(state) => return state,
        };

        if let Err(err) = check_image(&job.image) {
            return self.finish_failed(port, sink, &err.to_string(), err.code());
        }

        sink.message(&self.i18n.restoring_backup(port));
        self.enter(port, JobState::Writing);
        let write = Subcommand::WriteFlash {
            path: job.image.to_string_lossy().into_owned(),
        };
        match self.run_step(port, &write, sink).await {
            Ok(()) => self.finish_succeeded(port, sink, self.i18n.restore_succeeded()),
            Err(ToolError::Exit { code }) => {
                self.finish_failed(port, sink, &self.i18n.restore_failed(code), code)
            }
            Err(err) => self.failed_to_start(port, sink, &err),
        }
    }
}

fn check_image(path: &Path) -> Result<(), ToolError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(ToolError::MissingImage {
            path: path.to_path_buf(),
            reason: "not a regular file".into(),
        }),
        Err(err) => Err(ToolError::MissingImage {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }),
    }
}

// Cleanup only; a leftover image never fails the job.
fn remove_firmware(path: &Path) {
    if path.is_file()
        && let Err(err) = fs::remove_file(path)
    {
        warn!("flash: could not remove {} ({err})", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sink::JobEvent;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    /// One scripted tool invocation: output lines and the exit result.
    struct Step {
        lines: Vec<&'static str>,
        result: Result<i32, ()>,
    }

    fn exits(code: i32) -> Step {
        Step {
            lines: vec!["esptool.py v4.7.0"],
            result: Ok(code),
        }
    }

    fn prints(lines: Vec<&'static str>) -> Step {
        Step {
            lines,
            result: Ok(0),
        }
    }

    fn cannot_spawn() -> Step {
        Step {
            lines: Vec::new(),
            result: Err(()),
        }
    }

    struct ScriptedTool {
        steps: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<Subcommand>>,
    }

    impl ScriptedTool {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl FlashTool for ScriptedTool {
        async fn run(
            &self,
            _port: &str,
            command: &Subcommand,
            on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
        ) -> Result<i32, ToolError> {
            self.calls.lock().unwrap().push(command.clone());
            let step = self
                .steps
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected tool invocation");
            for line in step.lines {
                on_line(line);
            }
            step.result.map_err(|_| ToolError::Spawn {
                program: "python3".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            })
        }

        fn command_line(&self, port: &str, command: &Subcommand) -> String {
            format!("esptool --port {port} {}", command.args().join(" "))
        }
    }

    fn orchestrator(steps: Vec<Step>) -> Orchestrator<ScriptedTool> {
        Orchestrator::new(ScriptedTool::new(steps), Language::English)
    }

    fn calls(orch: &Orchestrator<ScriptedTool>) -> Vec<Subcommand> {
        orch.tool.calls.lock().unwrap().clone()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn firmware_file() -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        fs::write(&path, [0u8; 32]).unwrap();
        (dir, path)
    }

    #[test]
    fn parses_detected_flash_size() {
        assert_eq!(
            parse_flash_size("Detected flash size: 16MB"),
            Ok(16 * 1024 * 1024)
        );
        assert_eq!(
            parse_flash_size("Manufacturer: c8\n  Detected flash size: 4mb  \nHard resetting"),
            Ok(4 * 1024 * 1024)
        );
    }

    #[test]
    fn rejects_unrecognised_flash_sizes() {
        assert_eq!(parse_flash_size("Chip is ESP32-D0WD"), Err(ParseError::NoMatch));
        assert_eq!(
            parse_flash_size("Detected flash size: 16GB"),
            Err(ParseError::NoMatch)
        );
        assert_eq!(
            parse_flash_size("Detected flash size: 16"),
            Err(ParseError::NoMatch)
        );
        assert_eq!(
            parse_flash_size("Detected flash size: xxMB"),
            Err(ParseError::BadSize("XXMB".into()))
        );
    }

    #[test]
    fn rejects_zero_and_overflowing_flash_sizes() {
        assert_eq!(
            parse_flash_size("Detected flash size: 0MB"),
            Err(ParseError::BadSize("0MB".into()))
        );
        assert_eq!(
            parse_flash_size("Detected flash size: 99999999999999MB"),
            Err(ParseError::BadSize("99999999999999MB".into()))
        );
    }

    #[tokio::test]
    async fn failed_erase_never_writes() {
        let (_dir, firmware) = firmware_file();
        let orch = orchestrator(vec![exits(1)]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = FlashJob {
            port: "/dev/ttyUSB0".into(),
            firmware: firmware.clone(),
            erase: true,
        };

        let state = orch.flash(&job, &tx).await;

        assert_eq!(state, JobState::Failed { code: 1 });
        assert_eq!(calls(&orch), vec![Subcommand::EraseFlash]);
        assert!(firmware.exists());
        let events = drain(&mut rx);
        assert_eq!(
            events.last(),
            Some(&JobEvent::Failed {
                text: "Flash erase finished with error, flashing cancelled.".into(),
                code: 1
            })
        );
    }

    #[tokio::test]
    async fn plain_write_runs_once_and_removes_image() {
        let (_dir, firmware) = firmware_file();
        let orch = orchestrator(vec![exits(0)]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = FlashJob {
            port: "COM3".into(),
            firmware: firmware.clone(),
            erase: false,
        };

        assert_eq!(orch.flash(&job, &tx).await, JobState::Succeeded);
        assert_eq!(
            calls(&orch),
            vec![Subcommand::WriteFlash {
                path: firmware.to_string_lossy().into_owned()
            }]
        );
        assert!(!firmware.exists());
        let events = drain(&mut rx);
        assert!(events.contains(&JobEvent::Line("esptool.py v4.7.0".into())));
        assert_eq!(
            events.last(),
            Some(&JobEvent::Succeeded("Flashing completed successfully.".into()))
        );
    }

    #[tokio::test]
    async fn erase_then_write_in_order() {
        let (_dir, firmware) = firmware_file();
        let orch = orchestrator(vec![exits(0), exits(0)]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let job = FlashJob {
            port: "COM3".into(),
            firmware: firmware.clone(),
            erase: true,
        };

        assert_eq!(orch.flash(&job, &tx).await, JobState::Succeeded);
        let seen = calls(&orch);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], Subcommand::EraseFlash);
        assert!(matches!(seen[1], Subcommand::WriteFlash { .. }));
    }

    #[tokio::test]
    async fn failed_write_keeps_image() {
        let (_dir, firmware) = firmware_file();
        let orch = orchestrator(vec![exits(2)]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = FlashJob {
            port: "COM3".into(),
            firmware: firmware.clone(),
            erase: false,
        };

        assert_eq!(orch.flash(&job, &tx).await, JobState::Failed { code: 2 });
        assert!(firmware.exists());
        assert!(drain(&mut rx).last().is_some_and(JobEvent::is_terminal));
    }

    #[tokio::test]
    async fn spawn_failure_aborts_with_sentinel() {
        let (_dir, firmware) = firmware_file();
        let orch = orchestrator(vec![cannot_spawn()]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = FlashJob {
            port: "COM3".into(),
            firmware,
            erase: true,
        };

        let state = orch.flash(&job, &tx).await;
        assert_eq!(
            state,
            JobState::Failed {
                code: crate::process::SPAWN_FAILED_CODE
            }
        );
        assert_eq!(calls(&orch).len(), 1);
        match drain(&mut rx).last() {
            Some(JobEvent::Failed { text, .. }) => {
                assert!(text.starts_with("Error starting esptool"))
            }
            other => panic!("unexpected final event {other:?}"),
        }
    }

    #[tokio::test]
    async fn backup_reads_detected_size() {
        let orch = orchestrator(vec![
            prints(vec!["Manufacturer: 20", "Detected flash size: 8MB"]),
            exits(0),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = BackupJob {
            port: "/dev/ttyACM0".into(),
            size: None,
            destination: PathBuf::from("/tmp/bruce_backup.bin"),
            offset: 0,
        };

        assert_eq!(orch.backup(&job, &tx).await, JobState::Succeeded);
        assert_eq!(
            calls(&orch),
            vec![
                Subcommand::FlashId,
                Subcommand::ReadFlash {
                    offset: 0,
                    size: 8 * MIB,
                    path: "/tmp/bruce_backup.bin".into()
                }
            ]
        );
        let events = drain(&mut rx);
        assert!(!events.contains(&JobEvent::Line("Detected flash size: 8MB".into())));
    }

    #[tokio::test]
    async fn backup_falls_back_when_probe_fails() {
        for probe in [
            exits(2),
            cannot_spawn(),
            prints(vec!["Detected flash size: 16GB"]),
            prints(vec!["Detected flash size: 0MB"]),
            prints(vec!["Detected flash size: 99999999999999MB"]),
        ] {
            let orch = orchestrator(vec![probe, exits(0)]);
            let (tx, _rx) = mpsc::unbounded_channel();
            let job = BackupJob {
                port: "COM4".into(),
                size: None,
                destination: PathBuf::from("backup.bin"),
                offset: 0,
            };
            assert_eq!(orch.backup(&job, &tx).await, JobState::Succeeded);
            assert!(matches!(
                calls(&orch)[1],
                Subcommand::ReadFlash {
                    size: DEFAULT_FLASH_SIZE,
                    ..
                }
            ));
        }
    }

    #[tokio::test]
    async fn backup_with_known_size_skips_probe_and_reports_failure() {
        let orch = orchestrator(vec![exits(5)]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = BackupJob {
            port: "COM4".into(),
            size: Some(4 * MIB),
            destination: PathBuf::from("backup.bin"),
            offset: 0,
        };

        assert_eq!(orch.backup(&job, &tx).await, JobState::Failed { code: 5 });
        assert_eq!(calls(&orch).len(), 1);
        assert_eq!(
            drain(&mut rx).last(),
            Some(&JobEvent::Failed {
                text: "Backup error, code 5".into(),
                code: 5
            })
        );
    }

    #[tokio::test]
    async fn restore_writes_image_at_zero() {
        let (_dir, image) = firmware_file();
        let orch = orchestrator(vec![exits(0)]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let job = RestoreJob {
            port: "COM4".into(),
            image: image.clone(),
        };

        assert_eq!(orch.restore(&job, &tx).await, JobState::Succeeded);
        assert_eq!(
            calls(&orch),
            vec![Subcommand::WriteFlash {
                path: image.to_string_lossy().into_owned()
            }]
        );
        assert!(image.exists());
    }

    #[tokio::test]
    async fn restore_of_missing_image_never_invokes_tool() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(Vec::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let job = RestoreJob {
            port: "COM4".into(),
            image: dir.path().join("nope.bin"),
        };

        assert!(matches!(
            orch.restore(&job, &tx).await,
            JobState::Failed { .. }
        ));
        assert!(calls(&orch).is_empty());
    }

    #[tokio::test]
    async fn busy_port_is_rejected() {
        let (_dir, firmware) = firmware_file();
        let orch = orchestrator(Vec::new());
        let held = orch.claim_port("COM7").unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let job = FlashJob {
            port: "COM7".into(),
            firmware,
            erase: false,
        };

        assert!(matches!(orch.flash(&job, &tx).await, JobState::Failed { .. }));
        assert!(calls(&orch).is_empty());

        drop(held);
        assert!(orch.claim_port("COM7").is_ok());
    }
}
