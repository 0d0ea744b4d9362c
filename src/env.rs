use std::env;
use std::fs;
use std::path::PathBuf;

const HOME_OVERRIDE_VAR: &str = "BRUCE_LAUNCHER_HOME";
const PYTHON_OVERRIDE_VAR: &str = "BRUCE_LAUNCHER_PYTHON";

/// Returns the root directory used by the launcher (`~/BruceLauncher` unless overridden).
pub fn default_app_dir() -> PathBuf {
    if let Some(dir) = env::var_os(HOME_OVERRIDE_VAR).filter(|value| !value.is_empty()) {
        return PathBuf::from(dir);
    }

    let home = match env::consts::OS {
        "windows" => env::var_os("USERPROFILE").or_else(|| env::var_os("HOME")),
        _ => env::var_os("HOME"),
    }
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."));

    home.join("BruceLauncher")
}

pub fn settings_path() -> PathBuf {
    default_app_dir().join("settings.json")
}

pub fn firmware_dir() -> PathBuf {
    default_app_dir().join("firmware")
}

pub fn backups_dir() -> PathBuf {
    default_app_dir().join("backups")
}

/// Interpreter used to run the flashing tool as a module.
///
/// A frozen launcher must not invoke itself, so the system interpreter is
/// used: `py` on Windows and `python3` elsewhere.
pub fn python_command() -> String {
    if let Some(cmd) = env::var(PYTHON_OVERRIDE_VAR)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
    {
        return cmd;
    }
    if cfg!(target_os = "windows") {
        "py".to_owned()
    } else {
        "python3".to_owned()
    }
}

/// Create the application root so the settings file has somewhere to live.
pub fn ensure_base_dirs() -> std::io::Result<()> {
    fs::create_dir_all(default_app_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_hangs_off_the_app_dir() {
        let root = default_app_dir();
        assert_eq!(settings_path(), root.join("settings.json"));
        assert_eq!(firmware_dir(), root.join("firmware"));
        assert_eq!(backups_dir(), root.join("backups"));
    }

    #[test]
    fn python_command_is_never_empty() {
        assert!(!python_command().is_empty());
    }
}
