use std::fs;
use std::future::Future;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;

use crate::console;
use crate::engine::Orchestrator;
use crate::engine::models::{Asset, BackupJob, FlashJob, Release, RestoreJob};
use crate::engine::sink::JobEvent;
use crate::engine::state::{JobState, ReleaseKind};
use crate::error::{LauncherError, NetworkError, SelectionError};
use crate::i18n::I18n;
use crate::networking::NetworkClient;
use crate::ports;
use crate::process::{EspTool, SPAWN_FAILED_CODE};
use crate::releases::{self, ReleaseCatalog};
use crate::storage::{Settings, SettingsStore};
use crate::util::{format_size, progress_percent};
use crate::{Command, ConfigCommand, FlashArgs};

const DEFAULT_BACKUP_NAME: &str = "bruce_backup.bin";
const SPINNER_TICK: Duration = Duration::from_millis(100);
/// Plain-mode downloads print a line every this many percent.
const PLAIN_PROGRESS_STEP: f32 = 10.0;

/// Entry point for every subcommand. Failures are printed here.
pub fn run(command: Command) -> ExitCode {
    let app = LauncherApp::new();
    match app.dispatch(command) {
        Ok(code) => code,
        Err(err) => {
            error!("launcher: {err}");
            eprintln!("{}", render_error(app.i18n, &err));
            ExitCode::FAILURE
        }
    }
}

fn render_error(i18n: I18n, err: &LauncherError) -> String {
    match err {
        LauncherError::Usage(text) => text.clone(),
        LauncherError::Selection(inner) => format!("{} ({inner})", i18n.invalid_choice()),
        other => i18n.error_text(&other.to_string()),
    }
}

fn build_runtime() -> Runtime {
    match Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            warn!(
                "ui: failed to create multithreaded runtime ({}); trying single-threaded runtime",
                err
            );
            match Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(fallback_err) => {
                    error!(
                        "ui: failed to create any Tokio runtime ({}); terminating launcher",
                        fallback_err
                    );
                    std::process::exit(1);
                }
            }
        }
    }
}

struct LauncherApp {
    rt: Runtime,
    store: SettingsStore,
    settings: Settings,
    i18n: I18n,
    orchestrator: Arc<Orchestrator<EspTool>>,
}

impl LauncherApp {
    fn new() -> Self {
        let store = SettingsStore::new();
        let settings = store.load();
        let i18n = I18n::new(settings.language);
        let orchestrator = Arc::new(Orchestrator::new(
            EspTool::new(settings.chip_type),
            settings.language,
        ));
        Self {
            rt: build_runtime(),
            store,
            settings,
            i18n,
            orchestrator,
        }
    }

    fn dispatch(&self, command: Command) -> Result<ExitCode, LauncherError> {
        match command {
            Command::Releases => self.list_releases(),
            Command::Flash(args) => self.flash(args),
            Command::Backup {
                port,
                output,
                no_open,
            } => self.backup(port, output, no_open),
            Command::Restore { file, port, yes } => self.restore(file, port, yes),
            Command::Ports => {
                self.list_ports();
                Ok(ExitCode::SUCCESS)
            }
            Command::Console { port, baud } => {
                let port = {
                    let mut prompter = Prompter::stdio(self.i18n);
                    self.resolve_port(port, &mut prompter)?
                };
                console::run(&port, baud, self.settings.send_tone_on_connect, self.i18n)?;
                Ok(ExitCode::SUCCESS)
            }
            Command::Config(command) => {
                self.configure(command)?;
                Ok(ExitCode::SUCCESS)
            }
        }
    }

    fn fetch_releases(&self) -> Result<Vec<Release>, LauncherError> {
        println!("{}", self.i18n.releases_loading());
        let releases = self
            .rt
            .block_on(ReleaseCatalog::new().fetch())
            .map_err(|err| {
                LauncherError::Usage(self.i18n.releases_fetch_failed(&err.to_string()))
            })?;
        println!("{}", self.i18n.releases_loaded(releases.len()));
        Ok(releases)
    }

    fn list_releases(&self) -> Result<ExitCode, LauncherError> {
        let releases = self.fetch_releases()?;
        for (index, release) in releases.iter().enumerate() {
            println!(
                "[{index}] {} ({}) - {}",
                release.name,
                release.tag,
                self.i18n.release_label(release.prerelease)
            );
        }
        Ok(ExitCode::SUCCESS)
    }

    fn list_ports(&self) {
        let found = ports::list();
        if found.is_empty() {
            println!("{}", self.i18n.no_ports());
        }
        for port in found {
            println!("{}", port.label());
        }
    }

    fn flash(&self, args: FlashArgs) -> Result<ExitCode, LauncherError> {
        let releases = self.fetch_releases()?;
        if releases.is_empty() {
            return Err(LauncherError::Usage(self.i18n.release_list_empty().to_owned()));
        }
        let kind = requested_release(args.beta, args.select, args.tag.as_deref(), &releases)?;
        let Some(release) = releases::pick(&releases, kind)? else {
            let text = match kind {
                ReleaseKind::Beta => self.i18n.no_beta_found(),
                _ => self.i18n.release_list_empty(),
            };
            return Err(LauncherError::Usage(text.to_owned()));
        };
        info!(
            "flash: chose {} ({}) prerelease={}",
            release.tag, release.name, release.prerelease
        );
        println!(
            "{}",
            self.i18n
                .release_chosen(&release.tag, &release.name, release.prerelease)
        );

        let mut prompter = Prompter::stdio(self.i18n);
        let asset = choose_asset(self.i18n, release, args.asset.as_deref(), &mut prompter)?;
        let destination = match args.output {
            Some(path) => path,
            None => {
                let default = self.settings.firmware_dir.join(&asset.name);
                if self.settings.ask_firmware_path_each_time {
                    prompter.path(self.i18n.where_to_save_firmware(), &default)?
                } else {
                    default
                }
            }
        };
        ensure_parent_dir(&destination)?;
        self.download(asset, &release.tag, &destination)?;
        println!(
            "{}",
            self.i18n
                .firmware_saved(&destination.display().to_string())
        );

        let port = self.resolve_port(args.port, &mut prompter)?;
        let question = self.i18n.confirm_flash(&release.tag, &port, args.erase);
        if !args.yes && !prompter.confirm(&question)? {
            println!("{}", self.i18n.aborted());
            return Ok(ExitCode::SUCCESS);
        }
        drop(prompter);

        let job = FlashJob {
            port,
            firmware: destination,
            erase: args.erase,
        };
        let state = self.run_job(move |orchestrator, sink| async move {
            orchestrator.flash(&job, &sink).await
        });
        Ok(exit_code(&state))
    }

    fn download(
        &self,
        asset: &Asset,
        tag: &str,
        destination: &Path,
    ) -> Result<u64, LauncherError> {
        let failed = |err: NetworkError| {
            LauncherError::Usage(self.i18n.download_failed(&err.to_string()))
        };
        if asset.download_url.is_empty() {
            return Err(failed(NetworkError::MissingUrl(asset.name.clone())));
        }
        println!("{}", self.i18n.downloading_firmware(tag, &asset.name));

        let bar = self.settings.graphic_progress.then(download_bar);
        let mut next_report = 0.0f32;
        let client = NetworkClient::new();
        let result = self.rt.block_on(client.download_to_path(
            &asset.download_url,
            destination,
            |downloaded: u64, total: Option<u64>, speed: &str| match &bar {
                Some(bar) => {
                    if let Some(total) = total {
                        bar.set_length(total);
                    }
                    bar.set_position(downloaded);
                    bar.set_message(speed.to_owned());
                }
                None => {
                    let percent = progress_percent(downloaded, total);
                    if percent >= next_report {
                        println!("{percent:.0}% ({}) {speed}", format_size(downloaded));
                        next_report = percent + PLAIN_PROGRESS_STEP;
                    }
                }
            },
        ));
        if let Some(bar) = &bar {
            bar.finish_and_clear();
        }
        result.map_err(failed)
    }

    fn backup(
        &self,
        port: Option<String>,
        output: Option<PathBuf>,
        no_open: bool,
    ) -> Result<ExitCode, LauncherError> {
        let mut prompter = Prompter::stdio(self.i18n);
        let port = self.resolve_port(port, &mut prompter)?;
        let destination = match output {
            Some(path) => path,
            None => {
                let default = self.settings.backup_dir.join(DEFAULT_BACKUP_NAME);
                if self.settings.ask_backup_path_each_time {
                    prompter.path(self.i18n.where_to_save_backup(), &default)?
                } else {
                    default
                }
            }
        };
        drop(prompter);
        ensure_parent_dir(&destination)?;

        let job = BackupJob {
            port,
            size: None,
            destination: destination.clone(),
            offset: 0,
        };
        let state = self.run_job(move |orchestrator, sink| async move {
            orchestrator.backup(&job, &sink).await
        });
        if state == JobState::Succeeded && !no_open {
            open_folder(&destination);
        }
        Ok(exit_code(&state))
    }

    fn restore(
        &self,
        image: PathBuf,
        port: Option<String>,
        yes: bool,
    ) -> Result<ExitCode, LauncherError> {
        let mut prompter = Prompter::stdio(self.i18n);
        let port = self.resolve_port(port, &mut prompter)?;
        if !yes && !prompter.confirm(&self.i18n.confirm_restore(&port))? {
            println!("{}", self.i18n.aborted());
            return Ok(ExitCode::SUCCESS);
        }
        drop(prompter);

        let job = RestoreJob { port, image };
        let state = self.run_job(move |orchestrator, sink| async move {
            orchestrator.restore(&job, &sink).await
        });
        Ok(exit_code(&state))
    }

    fn configure(&self, command: ConfigCommand) -> Result<(), LauncherError> {
        let path = self.store.path().display().to_string();
        match command {
            ConfigCommand::Show => {
                println!("{}", self.i18n.settings_file(&path));
                for (key, value) in self.settings.describe() {
                    println!("{key} = {value}");
                }
            }
            ConfigCommand::Set { key, value } => {
                let mut settings = self.settings.clone();
                settings.apply(&key, &value)?;
                self.store.save(&settings);
                println!("{}", self.i18n.settings_saved());
                println!("{}", self.i18n.settings_file(&path));
            }
            ConfigCommand::Reset => {
                self.store.reset();
                println!("{}", self.i18n.settings_saved());
                println!("{}", self.i18n.settings_file(&path));
            }
        }
        Ok(())
    }

    /// `--port` wins; otherwise the only port, or a numbered prompt.
    fn resolve_port<R: BufRead, W: Write>(
        &self,
        requested: Option<String>,
        prompter: &mut Prompter<R, W>,
    ) -> Result<String, LauncherError> {
        if let Some(port) = requested {
            return Ok(port);
        }
        let found = ports::list();
        if found.is_empty() {
            return Err(LauncherError::Usage(self.i18n.device_not_found().to_owned()));
        }
        let labels: Vec<String> = found.iter().map(|port| port.label()).collect();
        let index = prompter.choose(self.i18n.select_port_prompt(), &labels)?;
        Ok(found[index].device.clone())
    }

    /// Spawn a job onto the runtime and render its events until it finishes.
    fn run_job<F, Fut>(&self, start: F) -> JobState
    where
        F: FnOnce(Arc<Orchestrator<EspTool>>, mpsc::UnboundedSender<JobEvent>) -> Fut,
        Fut: Future<Output = JobState> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = self.rt.spawn(start(self.orchestrator.clone(), tx));
        let view = JobView::new(self.settings.graphic_progress);

        self.rt.block_on(async move {
            while let Some(event) = rx.recv().await {
                view.show(&event);
            }
            match handle.await {
                Ok(state) => state,
                Err(err) => {
                    error!("ui: job task ended abnormally ({err})");
                    view.clear();
                    JobState::Failed {
                        code: SPAWN_FAILED_CODE,
                    }
                }
            }
        })
    }
}

fn exit_code(state: &JobState) -> ExitCode {
    match state {
        JobState::Succeeded => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}

/// Map the release flags onto a catalog choice. A tag becomes its feed index.
fn requested_release(
    beta: bool,
    select: Option<usize>,
    tag: Option<&str>,
    releases: &[Release],
) -> Result<ReleaseKind, SelectionError> {
    if let Some(tag) = tag {
        return releases::index_of_tag(releases, tag).map(ReleaseKind::Selected);
    }
    if let Some(index) = select {
        return Ok(ReleaseKind::Selected(index));
    }
    Ok(if beta {
        ReleaseKind::Beta
    } else {
        ReleaseKind::Latest
    })
}

fn choose_asset<'r, R: BufRead, W: Write>(
    i18n: I18n,
    release: &'r Release,
    requested: Option<&str>,
    prompter: &mut Prompter<R, W>,
) -> Result<&'r Asset, LauncherError> {
    if release.assets.is_empty() {
        return Err(LauncherError::Usage(i18n.no_firmware_files().to_owned()));
    }
    let candidates = releases::firmware_assets(release);
    if candidates.is_empty() {
        return Err(LauncherError::Usage(i18n.no_bin_files().to_owned()));
    }
    if let Some(name) = requested {
        return candidates
            .into_iter()
            .find(|asset| asset.name == name)
            .ok_or_else(|| LauncherError::Usage(i18n.asset_not_found(name)));
    }
    let labels: Vec<String> = candidates.iter().map(|asset| asset.name.clone()).collect();
    let index = prompter.choose(i18n.select_asset_prompt(), &labels)?;
    Ok(candidates[index])
}

fn ensure_parent_dir(path: &Path) -> Result<(), LauncherError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

// Best effort; a headless machine simply has nothing to open.
fn open_folder(file: &Path) {
    let folder = file
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    if let Err(err) = open::that(folder) {
        warn!("backup: could not open {} ({err})", folder.display());
    }
}

fn download_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("[{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

/// Renders job events on the terminal, with a spinner in graphic mode.
struct JobView {
    spinner: Option<ProgressBar>,
}

impl JobView {
    fn new(graphic: bool) -> Self {
        let spinner = graphic.then(|| {
            let spinner = ProgressBar::new_spinner();
            let style = ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.enable_steady_tick(SPINNER_TICK);
            spinner
        });
        Self { spinner }
    }

    fn show(&self, event: &JobEvent) {
        if event.is_terminal() {
            self.clear();
        }
        match (event, &self.spinner) {
            (JobEvent::Message(text), Some(spinner)) => spinner.set_message(text.clone()),
            (JobEvent::Line(text), Some(spinner)) => spinner.println(text),
            (JobEvent::Message(text) | JobEvent::Line(text), None) => println!("{text}"),
            (JobEvent::Succeeded(text), _) => println!("{text}"),
            (JobEvent::Failed { text, .. }, _) => eprintln!("{text}"),
        }
    }

    fn clear(&self) {
        if let Some(spinner) = &self.spinner {
            spinner.finish_and_clear();
        }
    }
}

/// Line-based questions on a terminal (or any reader/writer pair).
struct Prompter<R, W> {
    input: R,
    output: W,
    i18n: I18n,
}

impl Prompter<io::StdinLock<'static>, io::Stdout> {
    fn stdio(i18n: I18n) -> Self {
        Prompter::new(io::stdin().lock(), io::stdout(), i18n)
    }
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    fn new(input: R, output: W, i18n: I18n) -> Self {
        Self {
            input,
            output,
            i18n,
        }
    }

    /// `None` at end of input.
    fn read_answer(&mut self) -> io::Result<Option<String>> {
        self.output.flush()?;
        let mut answer = String::new();
        if self.input.read_line(&mut answer)? == 0 {
            return Ok(None);
        }
        Ok(Some(answer.trim().to_owned()))
    }

    /// Pick one of `items` by its printed index. A single item is taken as is.
    fn choose(&mut self, title: &str, items: &[String]) -> Result<usize, LauncherError> {
        if items.len() == 1 {
            return Ok(0);
        }
        writeln!(self.output, "{title}")?;
        for (index, item) in items.iter().enumerate() {
            writeln!(self.output, "  [{index}] {item}")?;
        }
        loop {
            write!(self.output, "> ")?;
            let Some(answer) = self.read_answer()? else {
                return Err(LauncherError::Usage(self.i18n.aborted().to_owned()));
            };
            match answer.parse::<usize>() {
                Ok(index) if index < items.len() => return Ok(index),
                _ => writeln!(self.output, "{}", self.i18n.invalid_choice())?,
            }
        }
    }

    /// Ask for a path; an empty answer keeps `default`.
    fn path(&mut self, title: &str, default: &Path) -> io::Result<PathBuf> {
        write!(self.output, "{title} [{}]: ", default.display())?;
        Ok(match self.read_answer()? {
            Some(answer) if !answer.is_empty() => PathBuf::from(answer),
            _ => default.to_path_buf(),
        })
    }

    /// Anything but an explicit yes (including end of input) is a no.
    fn confirm(&mut self, question: &str) -> io::Result<bool> {
        write!(self.output, "{question} {} ", self.i18n.yes_no_suffix())?;
        Ok(self
            .read_answer()?
            .is_some_and(|answer| self.i18n.is_yes(&answer)))
    }
}
