use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures talking to the release feed or streaming an asset.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("malformed release list: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("stream error: {0}")]
    Stream(#[source] reqwest::Error),
    #[error("asset {0} has no download URL")]
    MissingUrl(String),
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("download incomplete: received {received} of {expected} bytes")]
    Incomplete { received: u64, expected: u64 },
}

/// Settings persistence and settings-update validation problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("settings document is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown setting `{0}`")]
    UnknownKey(String),
    #[error("invalid value `{value}` for `{key}`")]
    InvalidValue { key: String, value: String },
}

/// External flashing tool failures.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("lost track of {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("tool exited with code {code}")]
    Exit { code: i32 },
    #[error("serial port {0} is already in use by another job")]
    PortBusy(String),
    #[error("backup file {} is not readable: {reason}", .path.display())]
    MissingImage { path: PathBuf, reason: String },
}

impl ToolError {
    /// Exit-code style value reported to progress sinks.
    pub fn code(&self) -> i32 {
        match self {
            ToolError::Exit { code } => *code,
            _ => crate::process::SPAWN_FAILED_CODE,
        }
    }
}

/// Flash-size probe output did not contain a usable size line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("no `Detected flash size` line in probe output")]
    NoMatch,
    #[error("unrecognised flash size `{0}`")]
    BadSize(String),
}

/// Caller asked for a release that is not in the catalog.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("release index {index} is out of range (catalog has {len})")]
    OutOfRange { index: usize, len: usize },
    #[error("no release tagged `{0}`")]
    UnknownTag(String),
}

/// Everything the command-line front-end can end up reporting.
#[derive(Debug, Error)]
pub enum LauncherError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error("{0}")]
    Usage(String),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
