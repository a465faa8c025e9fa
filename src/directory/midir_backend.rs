//! Port directory over the system MIDI stack (`midir`)
//!
//! `midir` has no hot-plug notifications, so a background task polls the port
//! lists and emits connect/disconnect events by diffing port ids.

use super::{
    AccessLevel, Direction, DirectoryError, ListenerHandle, MessageCallback, Port, PortDirectory,
    SubscriptionId, TopologyCallback, TopologyEvent,
};
use async_trait::async_trait;
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::midi::format_hex;

type Subscribers = Arc<RwLock<Vec<(SubscriptionId, TopologyCallback)>>>;

/// Open midir connections, keyed by listener id / output port id
#[derive(Default)]
struct Connections {
    inputs: Mutex<HashMap<u64, (ListenerHandle, MidiInputConnection<()>)>>,
    outputs: Mutex<HashMap<String, MidiOutputConnection>>,
}

// Connections are only touched behind the mutexes above; some midir backends
// don't mark their connection types Send/Sync.
unsafe impl Send for Connections {}
unsafe impl Sync for Connections {}

impl Connections {
    /// Close connections whose port disappeared
    fn prune(&self, event: &TopologyEvent) {
        if let TopologyEvent::Disconnected(port) = event {
            match port.direction {
                Direction::Output => {
                    if self.outputs.lock().remove(&port.id).is_some() {
                        debug!("Closed output connection to vanished port '{}'", port.id);
                    }
                },
                Direction::Input => {
                    self.inputs
                        .lock()
                        .retain(|_, (handle, _)| handle.input_id() != port.id);
                },
            }
        }
    }
}

/// Directory backed by the platform MIDI API
pub struct MidirDirectory {
    client_name: String,
    poll_interval: Duration,
    granted: RwLock<Option<AccessLevel>>,
    connections: Arc<Connections>,
    subscribers: Subscribers,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl MidirDirectory {
    /// Create a directory; nothing is opened until access is requested
    pub fn new(client_name: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            client_name: client_name.into(),
            poll_interval,
            granted: RwLock::new(None),
            connections: Arc::new(Connections::default()),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            poller: Mutex::new(None),
        }
    }

    /// Access level granted by the last successful request
    pub fn granted_level(&self) -> Option<AccessLevel> {
        *self.granted.read()
    }

    fn ignore_filter(&self) -> Ignore {
        match self.granted_level() {
            Some(AccessLevel::Extended) => Ignore::None,
            _ => Ignore::Sysex,
        }
    }

    /// Start the hot-plug poller if it isn't running yet
    fn ensure_poller(&self) {
        let mut poller = self.poller.lock();
        if poller.is_some() {
            return;
        }

        let client_name = self.client_name.clone();
        let connections = self.connections.clone();
        let subscribers = self.subscribers.clone();
        let interval = self.poll_interval;

        *poller = Some(tokio::spawn(async move {
            let mut known = {
                let client_name = client_name.clone();
                tokio::task::spawn_blocking(move || scan_all(&client_name))
                    .await
                    .unwrap_or_default()
            };
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                // Scans and connection closes block on the backend
                let client_name = client_name.clone();
                let connections = connections.clone();
                let subscribers = subscribers.clone();
                let previous = known.clone();
                let tick = tokio::task::spawn_blocking(move || {
                    poll_once(&client_name, &previous, &connections, &subscribers)
                });

                match tick.await {
                    Ok(current) => known = current,
                    Err(e) => warn!("Hot-plug poll failed: {}", e),
                }
            }
        }));

        debug!("Hot-plug poller started ({:?} interval)", interval);
    }
}

impl Drop for MidirDirectory {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.lock().take() {
            handle.abort();
        }
    }
}

/// List input ports with their ids
pub fn list_inputs(client_name: &str) -> Result<Vec<Port>, DirectoryError> {
    let midi_in = MidiInput::new(&format!("{}-scan", client_name))?;
    Ok(midi_in
        .ports()
        .iter()
        .map(|port| {
            let name = midi_in.port_name(port).unwrap_or_default();
            Port::new(port.id(), name, Direction::Input)
        })
        .collect())
}

/// List output ports with their ids
pub fn list_outputs(client_name: &str) -> Result<Vec<Port>, DirectoryError> {
    let midi_out = MidiOutput::new(&format!("{}-scan", client_name))?;
    Ok(midi_out
        .ports()
        .iter()
        .map(|port| {
            let name = midi_out.port_name(port).unwrap_or_default();
            Port::new(port.id(), name, Direction::Output)
        })
        .collect())
}

/// Rescan, emit the differences to subscribers and return the new snapshot
fn poll_once(
    client_name: &str,
    previous: &[Port],
    connections: &Connections,
    subscribers: &Subscribers,
) -> Vec<Port> {
    let current = scan_all(client_name);
    dispatch_events(&diff_ports(previous, &current), connections, subscribers);
    current
}

/// Prune dead connections and notify subscribers, outside the subscriber lock
fn dispatch_events(events: &[TopologyEvent], connections: &Connections, subscribers: &Subscribers) {
    if events.is_empty() {
        return;
    }

    let callbacks: Vec<TopologyCallback> = subscribers
        .read()
        .iter()
        .map(|(_, callback)| callback.clone())
        .collect();

    for event in events {
        info!(
            "MIDI {} {}: '{}' ({})",
            event.port().direction,
            match event {
                TopologyEvent::Connected(_) => "connected",
                TopologyEvent::Disconnected(_) => "disconnected",
            },
            event.port().display_name(),
            event.port().transport
        );
        connections.prune(event);
        for callback in &callbacks {
            callback(event);
        }
    }
}

fn scan_all(client_name: &str) -> Vec<Port> {
    let mut ports = list_inputs(client_name).unwrap_or_else(|e| {
        warn!("Input port scan failed: {}", e);
        Vec::new()
    });
    ports.extend(list_outputs(client_name).unwrap_or_else(|e| {
        warn!("Output port scan failed: {}", e);
        Vec::new()
    }));
    ports
}

/// Connect/disconnect events turning `previous` into `current`
pub(crate) fn diff_ports(previous: &[Port], current: &[Port]) -> Vec<TopologyEvent> {
    let same = |a: &Port, b: &Port| a.id == b.id && a.direction == b.direction;

    let gone = previous
        .iter()
        .filter(|old| !current.iter().any(|new| same(old, new)))
        .cloned()
        .map(TopologyEvent::Disconnected);
    let added = current
        .iter()
        .filter(|new| !previous.iter().any(|old| same(old, new)))
        .cloned()
        .map(TopologyEvent::Connected);

    gone.chain(added).collect()
}

#[async_trait]
impl PortDirectory for MidirDirectory {
    fn name(&self) -> &str {
        &self.client_name
    }

    /// Opening a client on each side is the access check. Runs on the
    /// blocking pool, so a caller-side timeout can abandon a stuck backend.
    async fn request_access(&self, level: AccessLevel) -> Result<(), DirectoryError> {
        let client_name = self.client_name.clone();
        tokio::task::spawn_blocking(move || -> Result<(), DirectoryError> {
            MidiInput::new(&format!("{}-access-in", client_name))?;
            MidiOutput::new(&format!("{}-access-out", client_name))?;
            Ok(())
        })
        .await
        .map_err(|e| DirectoryError::Backend(e.to_string()))??;

        *self.granted.write() = Some(level);
        self.ensure_poller();
        Ok(())
    }

    fn inputs(&self) -> Vec<Port> {
        list_inputs(&self.client_name).unwrap_or_else(|e| {
            warn!("Input port scan failed: {}", e);
            Vec::new()
        })
    }

    fn outputs(&self) -> Vec<Port> {
        list_outputs(&self.client_name).unwrap_or_else(|e| {
            warn!("Output port scan failed: {}", e);
            Vec::new()
        })
    }

    fn subscribe_topology(&self, callback: TopologyCallback) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.subscribers.write().push((id, callback));
        id
    }

    fn unsubscribe_topology(&self, id: SubscriptionId) {
        self.subscribers.write().retain(|(sub, _)| *sub != id);
    }

    fn send(&self, output_id: &str, data: &[u8]) -> Result<(), DirectoryError> {
        let mut outputs = self.connections.outputs.lock();

        if !outputs.contains_key(output_id) {
            let midi_out = MidiOutput::new(&format!("{}-out", self.client_name))?;
            let port = midi_out
                .ports()
                .into_iter()
                .find(|p| p.id() == output_id)
                .ok_or_else(|| DirectoryError::PortNotFound {
                    direction: Direction::Output,
                    id: output_id.to_string(),
                })?;
            let connection =
                midi_out.connect(&port, &format!("{}-{}", self.client_name, output_id))?;
            debug!("Output opened: '{}'", output_id);
            outputs.insert(output_id.to_string(), connection);
        }

        let Some(connection) = outputs.get_mut(output_id) else {
            return Err(DirectoryError::PortNotFound {
                direction: Direction::Output,
                id: output_id.to_string(),
            });
        };

        trace!("TX -> {}: {}", output_id, format_hex(data));
        if let Err(e) = connection.send(data) {
            // Close the broken connection; the next send reopens it
            outputs.remove(output_id);
            return Err(DirectoryError::Send {
                id: output_id.to_string(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    fn attach_listener(
        &self,
        input_id: &str,
        callback: MessageCallback,
    ) -> Result<ListenerHandle, DirectoryError> {
        let mut midi_in = MidiInput::new(&format!("{}-in", self.client_name))?;
        midi_in.ignore(self.ignore_filter());

        let port = midi_in
            .ports()
            .into_iter()
            .find(|p| p.id() == input_id)
            .ok_or_else(|| DirectoryError::PortNotFound {
                direction: Direction::Input,
                id: input_id.to_string(),
            })?;

        let connection = midi_in.connect(
            &port,
            &format!("{}-{}", self.client_name, input_id),
            move |_timestamp, data, _| callback(data),
            (),
        )?;

        let handle = ListenerHandle::new(input_id);
        self.connections
            .inputs
            .lock()
            .insert(handle.id(), (handle.clone(), connection));

        debug!("Input listener #{} attached to '{}'", handle.id(), input_id);
        Ok(handle)
    }

    fn detach_listener(&self, handle: &ListenerHandle) {
        let removed = self.connections.inputs.lock().remove(&handle.id());
        // Close outside the lock; closing may wait for the backend thread
        if let Some((_, connection)) = removed {
            connection.close();
            debug!(
                "Input listener #{} detached from '{}'",
                handle.id(),
                handle.input_id()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(id: &str) -> Port {
        Port::new(id, id, Direction::Input)
    }

    fn output(id: &str) -> Port {
        Port::new(id, id, Direction::Output)
    }

    #[test]
    fn test_diff_ports_detects_changes() {
        let previous = vec![input("a"), output("x")];
        let current = vec![input("a"), input("b")];

        let events = diff_ports(&previous, &current);
        assert_eq!(
            events,
            vec![
                TopologyEvent::Disconnected(output("x")),
                TopologyEvent::Connected(input("b")),
            ]
        );
    }

    #[test]
    fn test_diff_ports_same_id_different_direction() {
        // Some backends reuse ids across directions
        let previous = vec![input("p1")];
        let current = vec![input("p1"), output("p1")];

        let events = diff_ports(&previous, &current);
        assert_eq!(events, vec![TopologyEvent::Connected(output("p1"))]);
    }

    #[test]
    fn test_dispatch_notifies_subscribers_in_order() {
        let connections = Connections::default();
        let subscribers: Subscribers = Arc::new(RwLock::new(Vec::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        subscribers.write().push((
            SubscriptionId::new(),
            Arc::new(move |event: &TopologyEvent| seen_clone.lock().push(event.clone())),
        ));

        let events = vec![
            TopologyEvent::Disconnected(input("a")),
            TopologyEvent::Connected(output("x")),
        ];
        dispatch_events(&events, &connections, &subscribers);

        assert_eq!(*seen.lock(), events);
    }

    #[test]
    fn test_dispatch_callbacks_may_resubscribe() {
        // Callbacks run outside the subscriber lock
        let connections = Connections::default();
        let subscribers: Subscribers = Arc::new(RwLock::new(Vec::new()));
        let inner = subscribers.clone();
        subscribers.write().push((
            SubscriptionId::new(),
            Arc::new(move |_: &TopologyEvent| {
                inner
                    .write()
                    .push((SubscriptionId::new(), Arc::new(|_: &TopologyEvent| {})));
            }),
        ));

        dispatch_events(&[TopologyEvent::Connected(input("b"))], &connections, &subscribers);
        assert_eq!(subscribers.read().len(), 2);
    }

    #[tokio::test]
    async fn test_request_access_reports_outcome() {
        // Passes with or without a usable MIDI stack on the host
        let dir = MidirDirectory::new("midi-thru-test", Duration::from_secs(60));
        let result = dir.request_access(AccessLevel::Baseline).await;
        assert_eq!(result.is_ok(), dir.granted_level() == Some(AccessLevel::Baseline));
    }

    #[test]
    fn test_diff_ports_no_change() {
        let ports = vec![input("a"), output("x")];
        assert!(diff_ports(&ports, &ports).is_empty());
    }
}
