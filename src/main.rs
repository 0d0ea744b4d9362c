use std::path::PathBuf;
use std::process::ExitCode;

use clap::builder::PossibleValuesParser;
use clap::{ArgGroup, Args, Parser, Subcommand};
use env_logger::Env;

mod console;
mod engine;
mod env;
mod error;
mod i18n;
mod networking;
mod ports;
mod process;
mod releases;
mod storage;
mod ui;
mod util;

#[derive(Parser, Debug)]
#[command(
    name = "bruce-launcher",
    author,
    version,
    about = "Download, flash, back up and restore Bruce firmware on ESP32 devices"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List firmware releases in feed order.
    Releases,
    /// Download a release and flash it.
    Flash(FlashArgs),
    /// Read the full flash of a device into a file.
    Backup {
        #[arg(long)]
        port: Option<String>,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Do not open the backup folder afterwards.
        #[arg(long)]
        no_open: bool,
    },
    /// Write a backup image back to a device.
    Restore {
        file: PathBuf,
        #[arg(long)]
        port: Option<String>,
        #[arg(long, short)]
        yes: bool,
    },
    /// List serial ports.
    Ports,
    /// Line-based serial terminal.
    Console {
        #[arg(long)]
        port: Option<String>,
        #[arg(long, default_value_t = console::CONSOLE_BAUD_RATES[0], value_parser = parse_console_baud)]
        baud: u32,
    },
    /// Show or change launcher settings.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("release").args(["latest", "beta", "select", "tag"])))]
pub struct FlashArgs {
    /// Newest stable release (default).
    #[arg(long)]
    pub latest: bool,
    /// Newest beta release.
    #[arg(long)]
    pub beta: bool,
    /// Release by index as printed by `releases`.
    #[arg(long, value_name = "INDEX")]
    pub select: Option<usize>,
    #[arg(long)]
    pub tag: Option<String>,
    /// Firmware file name inside the release.
    #[arg(long)]
    pub asset: Option<String>,
    #[arg(long)]
    pub port: Option<String>,
    #[arg(long)]
    pub output: Option<PathBuf>,
    /// Erase the whole flash before writing.
    #[arg(long)]
    pub erase: bool,
    #[arg(long, short)]
    pub yes: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    Show,
    Set {
        #[arg(value_parser = PossibleValuesParser::new(storage::SETTING_KEYS))]
        key: String,
        value: String,
    },
    Reset,
}

fn parse_console_baud(raw: &str) -> Result<u32, String> {
    let baud: u32 = raw.parse().map_err(|_| format!("`{raw}` is not a number"))?;
    if console::CONSOLE_BAUD_RATES.contains(&baud) {
        Ok(baud)
    } else {
        Err(format!(
            "supported rates are {:?}",
            console::CONSOLE_BAUD_RATES
        ))
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    ui::run(cli.command)
}
