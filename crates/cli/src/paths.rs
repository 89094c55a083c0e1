//! Central path resolution for control-room client files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `CONTROLROOM_DATA_DIR` env > `~/.controlroom`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::Context;

static DATA_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

pub const DATA_DIR_ENV: &str = "CONTROLROOM_DATA_DIR";

/// Priority: `explicit` arg > env value > `<home>/.controlroom`.
pub fn resolve_data_dir(
    explicit: Option<&Path>,
    env_value: Option<&str>,
    home: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(value) = env_value.filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(value));
    }
    home.map(|home| home.join(".controlroom"))
}

/// Initialize the global data directory. Returns the resolved path.
pub fn init_data_dir(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    let env_value = std::env::var(DATA_DIR_ENV).ok();
    let home = dirs::home_dir();
    let dir = resolve_data_dir(explicit, env_value.as_deref(), home.as_deref())
        .context("HOME directory not found; pass --data-dir")?;

    let mut guard = DATA_DIR.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = Some(dir.clone());
    Ok(dir)
}

/// Current data directory; `.controlroom` under the working directory
/// until `init_data_dir` has run.
pub fn data_dir() -> PathBuf {
    DATA_DIR
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
        .unwrap_or_else(|| PathBuf::from(".controlroom"))
}

pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Create all required subdirectories under the data dir.
pub fn ensure_dirs() -> io::Result<()> {
    std::fs::create_dir_all(log_dir())
}
