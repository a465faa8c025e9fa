//! Routing engine - MIDI THRU from one input to one output
//!
//! The engine owns:
//! - the active input/output pair (each optional)
//! - per-channel mute/solo state
//! - its own message listener on the active input and its own topology
//!   subscription on the directory
//!
//! It never creates or destroys ports. Every connect/disconnect re-resolves
//! the active pair (preference, then first available port) and re-attaches
//! the listener, so at most one engine listener exists at any time.

mod filter;
mod forward;
mod lifecycle;
mod resolve;
mod routing;

pub use filter::{ChannelFilter, ChannelSet};
pub use resolve::{resolve_exact, resolve_with_fallback};


use crate::directory::{AccessLevel, ListenerHandle, Port, PortDirectory, SubscriptionId, TopologyEvent};
use crate::preferences::PreferenceStore;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{info, warn};

/// Visual-feedback hook, called with the channel (1-16) of qualifying messages
pub type FeedbackHook = Arc<dyn Fn(u8) + Send + Sync>;

/// Called after the engine has re-resolved ports for a topology change
pub type TopologyHook = Arc<dyn Fn(&TopologyEvent) + Send + Sync>;

/// Lifecycle state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Uninitialized,
    Initializing,
    /// Directory access granted at the given level
    Ready(AccessLevel),
    /// Directory access could not be obtained at any level
    Unavailable,
}

impl EngineStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, EngineStatus::Ready(_))
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineStatus::Uninitialized => write!(f, "uninitialized"),
            EngineStatus::Initializing => write!(f, "initializing"),
            EngineStatus::Ready(level) => write!(f, "ready ({})", level),
            EngineStatus::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Snapshot of the active routing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Routing {
    pub input_id: Option<String>,
    pub output_id: Option<String>,
    pub input_name: Option<String>,
    pub output_name: Option<String>,
}

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Ask for extended (sysex) access before falling back to baseline
    pub request_extended: bool,
    /// Upper bound for a single access request
    pub access_timeout: Option<Duration>,
    /// Mute/solo state at construction
    pub initial_filter: ChannelFilter,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            request_extended: true,
            access_timeout: Some(Duration::from_millis(3000)),
            initial_filter: ChannelFilter::default(),
        }
    }
}

/// Currently active ports
#[derive(Debug, Default)]
pub(crate) struct ActivePorts {
    pub(crate) input: Option<Port>,
    pub(crate) output: Option<Port>,
}

/// Shared engine state. Callbacks handed to the directory hold a `Weak`
/// reference to it, never an `Arc`.
pub(crate) struct EngineInner {
    pub(crate) directory: Arc<dyn PortDirectory>,
    pub(crate) preferences: Arc<dyn PreferenceStore>,
    pub(crate) options: EngineOptions,
    pub(crate) status: RwLock<EngineStatus>,
    pub(crate) active: RwLock<ActivePorts>,
    pub(crate) filter: RwLock<ChannelFilter>,
    pub(crate) feedback: RwLock<Option<FeedbackHook>>,
    pub(crate) topology_hook: RwLock<Option<TopologyHook>>,
    /// The engine's own listener on the active input
    pub(crate) listener: Mutex<Option<ListenerHandle>>,
    /// The engine's own topology subscription
    pub(crate) subscription: Mutex<Option<SubscriptionId>>,
    /// Serializes port resolution and listener replacement
    pub(crate) resync_lock: Mutex<()>,
    pub(crate) self_ref: Weak<EngineInner>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Handle to a routing engine. Cheap to clone; clones share state.
///
/// Dropping the last handle tears the engine down. When that happens inside
/// a message callback, the teardown runs on a separate thread.
#[derive(Clone)]
pub struct RoutingEngine {
    inner: Arc<EngineInner>,
}

impl RoutingEngine {
    /// Create an engine over a directory and a preference store.
    ///
    /// Nothing happens until [`RoutingEngine::start`] is called.
    pub fn new(
        directory: Arc<dyn PortDirectory>,
        preferences: Arc<dyn PreferenceStore>,
        options: EngineOptions,
    ) -> Self {
        let filter = options.initial_filter;
        let inner = Arc::new_cyclic(|self_ref| EngineInner {
            directory,
            preferences,
            options,
            status: RwLock::new(EngineStatus::Uninitialized),
            active: RwLock::new(ActivePorts::default()),
            filter: RwLock::new(filter),
            feedback: RwLock::new(None),
            topology_hook: RwLock::new(None),
            listener: Mutex::new(None),
            subscription: Mutex::new(None),
            resync_lock: Mutex::new(()),
            self_ref: self_ref.clone(),
        });
        Self { inner }
    }

    /// Obtain directory access, subscribe to topology changes and resolve
    /// the active ports.
    ///
    /// Safe to call again at any time: a ready engine re-validates. Returns
    /// false only if no access level could be obtained.
    pub async fn start(&self) -> bool {
        self.inner.start().await
    }

    /// Drop the listener and topology subscription and clear the routing.
    /// Filter state is kept.
    pub fn shutdown(&self) {
        self.inner.teardown();
        *self.inner.status.write() = EngineStatus::Uninitialized;
        info!("Routing engine stopped");
    }

    pub fn status(&self) -> EngineStatus {
        *self.inner.status.read()
    }

    /// Active input/output ids and names
    pub fn routing(&self) -> Routing {
        let active = self.inner.active.read();
        Routing {
            input_id: active.input.as_ref().map(|p| p.id.clone()),
            output_id: active.output.as_ref().map(|p| p.id.clone()),
            input_name: active.input.as_ref().map(|p| p.display_name().to_string()),
            output_name: active.output.as_ref().map(|p| p.display_name().to_string()),
        }
    }

    /// Select the active input and output.
    ///
    /// `None` clears that side. Ids that don't resolve to a present port of
    /// the right direction also clear that side. The resulting selection is
    /// persisted.
    pub fn set_routing(&self, input_id: Option<&str>, output_id: Option<&str>) {
        self.inner.set_routing(input_id, output_id);
    }

    /// Send a Control Change on the active output (no-op without one).
    ///
    /// Channel is clamped to 1-16, controller and value to 0-127.
    pub fn send_control(&self, channel: u8, controller: u8, value: u8) {
        self.inner.send_control(channel, controller, value);
    }

    /// Toggle mute on a channel, returning whether it is now muted
    pub fn mute(&self, channel: u8) -> bool {
        if !ChannelSet::is_valid(channel) {
            warn!("Ignoring mute on invalid channel {}", channel);
            return false;
        }
        let muted = self.inner.filter.write().muted.toggle(channel);
        info!("Channel {} {}", channel, if muted { "muted" } else { "unmuted" });
        muted
    }

    /// Toggle solo on a channel, returning whether it is now soloed
    pub fn solo(&self, channel: u8) -> bool {
        if !ChannelSet::is_valid(channel) {
            warn!("Ignoring solo on invalid channel {}", channel);
            return false;
        }
        let soloed = self.inner.filter.write().soloed.toggle(channel);
        info!("Channel {} {}", channel, if soloed { "soloed" } else { "unsoloed" });
        soloed
    }

    /// All Notes Off and Reset All Controllers on every channel of every output
    pub fn panic(&self) {
        self.inner.panic();
    }

    pub fn filter(&self) -> ChannelFilter {
        *self.inner.filter.read()
    }

    pub fn muted_channels(&self) -> ChannelSet {
        self.inner.filter.read().muted
    }

    pub fn soloed_channels(&self) -> ChannelSet {
        self.inner.filter.read().soloed
    }

    /// Whether messages on `channel` currently pass through
    pub fn is_channel_active(&self, channel: u8) -> bool {
        self.inner.filter.read().is_channel_active(channel)
    }

    /// Register the visual-feedback hook (replaces any previous one)
    pub fn set_feedback_hook(&self, hook: FeedbackHook) {
        *self.inner.feedback.write() = Some(hook);
    }

    pub fn clear_feedback_hook(&self) {
        *self.inner.feedback.write() = None;
    }

    /// Register a hook run after each topology-driven resync
    pub fn set_topology_hook(&self, hook: TopologyHook) {
        *self.inner.topology_hook.write() = Some(hook);
    }

    /// Input ports currently present in the directory
    pub fn inputs(&self) -> Vec<Port> {
        self.inner.directory.inputs()
    }

    /// Output ports currently present in the directory
    pub fn outputs(&self) -> Vec<Port> {
        self.inner.directory.outputs()
    }
}
