//! Registry locations.
//!
//! Both scope directories are explicit values passed into every component at
//! construction; there are no implicit process-wide defaults inside core
//! logic, so tests can point the whole tool at temporary directories.

use std::path::PathBuf;

/// Where the two registry scopes live on disk.
#[derive(Debug, Clone)]
pub struct Config {
    /// User-scope directory (default `~/.bcli`).
    pub home_dir: PathBuf,
    /// System-scope directory (default `/etc/bcli`).
    pub sys_dir: PathBuf,
}

impl Config {
    pub fn new(home_dir: PathBuf, sys_dir: PathBuf) -> Self {
        Self { home_dir, sys_dir }
    }

    /// Build a config from optional CLI/env overrides, falling back to the
    /// conventional locations.
    pub fn from_overrides(home_dir: Option<PathBuf>, sys_dir: Option<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.unwrap_or_else(default_home_dir),
            sys_dir: sys_dir.unwrap_or_else(|| PathBuf::from("/etc/bcli")),
        }
    }
}

fn default_home_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".bcli")
}
