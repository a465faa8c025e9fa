//! Persisted port preferences
//!
//! Remembers the last input/output port the user picked, keyed independently
//! per direction, so the engine can reselect them after a restart or a
//! hot-plug. Absent keys mean "no preference".

use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::directory::Direction;

/// Key of the preferred input port id
pub const PREF_INPUT_KEY: &str = "pref_midi_in";

/// Key of the preferred output port id
pub const PREF_OUTPUT_KEY: &str = "pref_midi_out";

/// Preference key for a port direction
pub fn key_for(direction: Direction) -> &'static str {
    match direction {
        Direction::Input => PREF_INPUT_KEY,
        Direction::Output => PREF_OUTPUT_KEY,
    }
}

/// Passive key-value store for port preferences
pub trait PreferenceStore: Send + Sync {
    /// Preferred port id for a direction
    fn preferred(&self, direction: Direction) -> Option<String>;

    /// Store (Some) or forget (None) the preferred port id for a direction
    fn set_preferred(&self, direction: Direction, port_id: Option<&str>) -> Result<()>;
}

/// Preferences kept in a sled database
pub struct SledPreferences {
    db: sled::Db,
}

impl SledPreferences {
    /// Open (or create) the preference database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .with_context(|| format!("Failed to open preference database at: {}", path.display()))?;
        info!("Preferences opened at: {}", path.display());
        Ok(Self { db })
    }
}

impl PreferenceStore for SledPreferences {
    fn preferred(&self, direction: Direction) -> Option<String> {
        let key = key_for(direction);
        match self.db.get(key) {
            Ok(Some(value)) => String::from_utf8(value.to_vec()).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Failed to read preference '{}': {}", key, e);
                None
            },
        }
    }

    fn set_preferred(&self, direction: Direction, port_id: Option<&str>) -> Result<()> {
        let key = key_for(direction);
        match port_id {
            Some(id) => {
                self.db
                    .insert(key, id.as_bytes())
                    .with_context(|| format!("Failed to persist preference '{}'", key))?;
                debug!("Preference {} = {}", key, id);
            },
            None => {
                self.db
                    .remove(key)
                    .with_context(|| format!("Failed to remove preference '{}'", key))?;
                debug!("Preference {} cleared", key);
            },
        }
        self.db.flush().context("Failed to flush preferences")?;
        Ok(())
    }
}

/// Preferences held in memory only
#[derive(Default)]
pub struct MemoryPreferences {
    entries: RwLock<HashMap<&'static str, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a preference
    pub fn with(self, direction: Direction, port_id: &str) -> Self {
        self.entries
            .write()
            .insert(key_for(direction), port_id.to_string());
        self
    }
}

impl PreferenceStore for MemoryPreferences {
    fn preferred(&self, direction: Direction) -> Option<String> {
        self.entries.read().get(key_for(direction)).cloned()
    }

    fn set_preferred(&self, direction: Direction, port_id: Option<&str>) -> Result<()> {
        let mut entries = self.entries.write();
        match port_id {
            Some(id) => entries.insert(key_for(direction), id.to_string()),
            None => entries.remove(key_for(direction)),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_set_and_get_preference() {
        let temp = tempdir().unwrap();
        let prefs = SledPreferences::open(temp.path().join("prefs.sled")).unwrap();

        prefs.set_preferred(Direction::Input, Some("i1")).unwrap();
        assert_eq!(prefs.preferred(Direction::Input), Some("i1".to_string()));
        assert_eq!(prefs.preferred(Direction::Output), None);
    }

    #[test]
    fn test_persistence_across_restarts() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("prefs.sled");

        {
            let prefs = SledPreferences::open(&db_path).unwrap();
            prefs.set_preferred(Direction::Output, Some("o7")).unwrap();
        }

        {
            let prefs = SledPreferences::open(&db_path).unwrap();
            assert_eq!(prefs.preferred(Direction::Output), Some("o7".to_string()));
        }
    }

    #[test]
    fn test_clear_preference() {
        let temp = tempdir().unwrap();
        let prefs = SledPreferences::open(temp.path().join("prefs.sled")).unwrap();

        prefs.set_preferred(Direction::Input, Some("i1")).unwrap();
        prefs.set_preferred(Direction::Input, None).unwrap();
        assert_eq!(prefs.preferred(Direction::Input), None);
    }

    #[test]
    fn test_memory_preferences() {
        let prefs = MemoryPreferences::new().with(Direction::Input, "i2");
        assert_eq!(prefs.preferred(Direction::Input), Some("i2".to_string()));

        prefs.set_preferred(Direction::Input, None).unwrap();
        assert_eq!(prefs.preferred(Direction::Input), None);
    }
}
