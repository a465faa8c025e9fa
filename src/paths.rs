//! Application path management for portable and installed modes.
//!
//! ## Mode Detection
//!
//! - **Portable mode**: a `.portable` marker file next to the executable keeps
//!   config, preferences and logs in that directory.
//! - **Installed mode** (default): data lives in the platform data directory
//!   (`%APPDATA%\MIDI Thru`, `~/.local/share/MIDI Thru`, ...).

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Application name used for directories in installed mode
const APP_NAME: &str = "MIDI Thru";

/// Application paths for config, preference store and logs.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Path to the configuration file
    pub config: PathBuf,
    /// Path to the state directory (sled database)
    pub state_dir: PathBuf,
    /// Path to the logs directory
    pub logs_dir: PathBuf,
    /// Whether running in portable mode
    pub is_portable: bool,
}

impl AppPaths {
    /// Detect the appropriate paths based on environment.
    ///
    /// Called before logging is initialized, so diagnostics go to stderr.
    pub fn detect() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        // `cargo run` with a config.yaml in the working directory
        #[cfg(debug_assertions)]
        {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            if cwd.join("config.yaml").exists() {
                eprintln!("[paths] Running in DEV mode ({})", cwd.display());
                return Self::portable(&cwd);
            }
        }

        let paths = Self::resolve(&exe_dir, dirs::data_dir());
        #[cfg(debug_assertions)]
        eprintln!(
            "[paths] Running in {} mode ({})",
            if paths.is_portable { "PORTABLE" } else { "INSTALLED" },
            paths.base_dir().display()
        );
        paths
    }

    /// Pick portable or installed layout for an executable directory
    pub fn resolve(exe_dir: &Path, data_dir: Option<PathBuf>) -> Self {
        if exe_dir.join(".portable").exists() {
            return Self::portable(exe_dir);
        }

        let app_data = data_dir
            .unwrap_or_else(|| {
                eprintln!("[paths] WARNING: no platform data directory, falling back to exe dir");
                exe_dir.to_path_buf()
            })
            .join(APP_NAME);

        Self {
            config: app_data.join("config.yaml"),
            state_dir: app_data.join("state"),
            logs_dir: app_data.join("logs"),
            is_portable: false,
        }
    }

    fn portable(base: &Path) -> Self {
        Self {
            config: base.join("config.yaml"),
            state_dir: base.join(".state"),
            logs_dir: base.join("logs"),
            is_portable: true,
        }
    }

    /// Get the base directory (for displaying in logs)
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Ensure the state and logs directories exist
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for dir in [&self.state_dir, &self.logs_dir] {
            if !dir.exists() {
                debug!("Creating directory: {}", dir.display());
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
        }
        Ok(())
    }

    /// Get the preference database path (within state_dir)
    pub fn prefs_db_path(&self) -> PathBuf {
        self.state_dir.join("prefs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_installed_layout() {
        let exe = tempdir().unwrap();
        let data = tempdir().unwrap();

        let paths = AppPaths::resolve(exe.path(), Some(data.path().to_path_buf()));
        assert!(!paths.is_portable);
        assert_eq!(paths.base_dir(), data.path().join(APP_NAME));
        assert_eq!(paths.prefs_db_path(), data.path().join(APP_NAME).join("state").join("prefs"));
    }

    #[test]
    fn test_portable_marker() {
        let exe = tempdir().unwrap();
        std::fs::write(exe.path().join(".portable"), "").unwrap();

        let paths = AppPaths::resolve(exe.path(), None);
        assert!(paths.is_portable);
        assert_eq!(paths.config, exe.path().join("config.yaml"));
        assert_eq!(paths.state_dir, exe.path().join(".state"));
    }

    #[test]
    fn test_ensure_directories() {
        let base = tempdir().unwrap();
        let paths = AppPaths::resolve(base.path(), Some(base.path().to_path_buf()));

        paths.ensure_directories().unwrap();
        assert!(paths.state_dir.is_dir());
        assert!(paths.logs_dir.is_dir());
    }
}
