//! Port directory - the platform MIDI access layer seen by the routing engine
//!
//! The directory owns the port collection and its lifecycle. The engine only
//! references ports by id, sends through the directory and attaches at most
//! one listener of its own per input.

pub mod midir_backend;
pub mod virtual_ports;

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

pub use midir_backend::MidirDirectory;
pub use virtual_ports::VirtualDirectory;

/// Callback invoked with the raw bytes of every inbound message
pub type MessageCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Callback invoked on port connect/disconnect
pub type TopologyCallback = Arc<dyn Fn(&TopologyEvent) + Send + Sync>;

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Physical transport of a port, guessed from its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Usb,
    Bluetooth,
    Unknown,
}

impl Transport {
    /// Infer the transport from a port name.
    ///
    /// Platforms rarely expose the transport directly, so this looks for
    /// `bluetooth`, `ble`/`bt` as whole words, or `usb` in the name.
    pub fn infer(name: &str) -> Self {
        let lower = name.to_lowercase();
        let mut words = lower.split(|c: char| !c.is_alphanumeric());

        if lower.contains("bluetooth") || words.any(|w| w == "ble" || w == "bt") {
            Transport::Bluetooth
        } else if lower.contains("usb") {
            Transport::Usb
        } else {
            Transport::Unknown
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Usb => write!(f, "usb"),
            Transport::Bluetooth => write!(f, "bluetooth"),
            Transport::Unknown => write!(f, "unknown"),
        }
    }
}

/// A MIDI endpoint exposed by the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    /// Opaque identifier, stable and unique within a session
    pub id: String,
    /// Human label, may be empty on some Bluetooth hardware
    pub name: String,
    pub direction: Direction,
    pub transport: Transport,
}

impl Port {
    /// Create a port, inferring its transport from the name
    pub fn new(id: impl Into<String>, name: impl Into<String>, direction: Direction) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            transport: Transport::infer(&name),
            name,
            direction,
        }
    }

    /// Name for display, with a fallback for unnamed ports
    pub fn display_name(&self) -> &str {
        if !self.name.trim().is_empty() {
            return &self.name;
        }
        match self.direction {
            Direction::Input => "Bluetooth Controller",
            Direction::Output => "MIDI Output",
        }
    }
}

/// Capability level of directory access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessLevel {
    /// Channel messages only
    Baseline,
    /// Baseline plus system-exclusive messages
    Extended,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::Baseline => write!(f, "baseline"),
            AccessLevel::Extended => write!(f, "extended (sysex)"),
        }
    }
}

/// Port connect/disconnect notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    Connected(Port),
    Disconnected(Port),
}

impl TopologyEvent {
    pub fn port(&self) -> &Port {
        match self {
            TopologyEvent::Connected(port) | TopologyEvent::Disconnected(port) => port,
        }
    }
}

/// Handle identifying one attached message listener
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    id: u64,
    input_id: String,
}

impl ListenerHandle {
    pub fn new(input_id: impl Into<String>) -> Self {
        Self {
            id: next_handle_id(),
            input_id: input_id.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Input port this listener is attached to
    pub fn input_id(&self) -> &str {
        &self.input_id
    }
}

/// Handle identifying one topology subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(next_handle_id())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

fn next_handle_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Errors raised at the directory boundary
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("MIDI access not supported: {0}")]
    Unsupported(String),

    #[error("MIDI access denied at {level} level: {reason}")]
    AccessDenied { level: AccessLevel, reason: String },

    #[error("MIDI access request timed out at {0} level")]
    Timeout(AccessLevel),

    #[error("MIDI {direction} port '{id}' not found")]
    PortNotFound { direction: Direction, id: String },

    #[error("MIDI send to '{id}' failed: {reason}")]
    Send { id: String, reason: String },

    #[error("MIDI backend error: {0}")]
    Backend(String),
}

impl From<midir::InitError> for DirectoryError {
    fn from(e: midir::InitError) -> Self {
        DirectoryError::Unsupported(e.to_string())
    }
}

impl From<midir::ConnectError<midir::MidiInput>> for DirectoryError {
    fn from(e: midir::ConnectError<midir::MidiInput>) -> Self {
        DirectoryError::Backend(e.to_string())
    }
}

impl From<midir::ConnectError<midir::MidiOutput>> for DirectoryError {
    fn from(e: midir::ConnectError<midir::MidiOutput>) -> Self {
        DirectoryError::Backend(e.to_string())
    }
}

/// The platform's MIDI access layer.
///
/// All methods take `&self`; implementations use interior mutability.
/// Implementations must not hold their own locks while invoking callbacks,
/// since callbacks call back into the directory.
#[async_trait]
pub trait PortDirectory: Send + Sync {
    /// Directory name for logs
    fn name(&self) -> &str;

    /// Request access at the given capability level
    async fn request_access(&self, level: AccessLevel) -> Result<(), DirectoryError>;

    /// Currently present input ports, in platform order
    fn inputs(&self) -> Vec<Port>;

    /// Currently present output ports, in platform order
    fn outputs(&self) -> Vec<Port>;

    /// Resolve an input port by id
    fn input_by_id(&self, id: &str) -> Option<Port> {
        self.inputs().into_iter().find(|p| p.id == id)
    }

    /// Resolve an output port by id
    fn output_by_id(&self, id: &str) -> Option<Port> {
        self.outputs().into_iter().find(|p| p.id == id)
    }

    /// Subscribe to connect/disconnect notifications
    fn subscribe_topology(&self, callback: TopologyCallback) -> SubscriptionId;

    /// Drop a topology subscription (unknown ids are ignored)
    fn unsubscribe_topology(&self, id: SubscriptionId);

    /// Send raw bytes to an output port
    fn send(&self, output_id: &str, data: &[u8]) -> Result<(), DirectoryError>;

    /// Attach a raw-message listener to an input port
    fn attach_listener(
        &self,
        input_id: &str,
        callback: MessageCallback,
    ) -> Result<ListenerHandle, DirectoryError>;

    /// Detach exactly the listener identified by `handle` (unknown handles are ignored)
    fn detach_listener(&self, handle: &ListenerHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_inference() {
        assert_eq!(Transport::infer("WIDI Bluetooth MIDI"), Transport::Bluetooth);
        assert_eq!(Transport::infer("CH-8 BLE"), Transport::Bluetooth);
        assert_eq!(Transport::infer("XPS-10 USB MIDI"), Transport::Usb);
        assert_eq!(Transport::infer("Roland XPS-10"), Transport::Unknown);
        // "ble" must be a whole word
        assert_eq!(Transport::infer("Tumbleweed Synth"), Transport::Unknown);
    }

    #[test]
    fn test_display_name_fallback() {
        let input = Port::new("i1", "", Direction::Input);
        let output = Port::new("o1", "  ", Direction::Output);
        let named = Port::new("o2", "SynthB", Direction::Output);

        assert_eq!(input.display_name(), "Bluetooth Controller");
        assert_eq!(output.display_name(), "MIDI Output");
        assert_eq!(named.display_name(), "SynthB");
    }

    #[test]
    fn test_listener_handles_are_unique() {
        let a = ListenerHandle::new("i1");
        let b = ListenerHandle::new("i1");
        assert_ne!(a, b);
        assert_eq!(a.input_id(), "i1");
    }

    #[test]
    fn test_access_level_order() {
        assert!(AccessLevel::Extended > AccessLevel::Baseline);
    }
}
