//! MIDI Thru - route one MIDI input to one MIDI output
//!
//! Forwards every message from the selected input to the selected output,
//! filtered by per-channel mute/solo, and keeps the selection valid as
//! devices come and go.

pub mod config;
pub mod directory;
pub mod engine;
pub mod midi;
pub mod paths;
pub mod preferences;

pub use config::AppConfig;
pub use directory::{DirectoryError, MidirDirectory, Port, PortDirectory, VirtualDirectory};
pub use engine::{EngineOptions, EngineStatus, Routing, RoutingEngine};
pub use preferences::{MemoryPreferences, PreferenceStore, SledPreferences};
