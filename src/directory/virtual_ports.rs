//! In-memory port directory
//!
//! Ports are added and removed by hand, inbound traffic is injected and every
//! sent message is recorded. Backs the test-suite and the `--virtual` mode.

use super::{
    AccessLevel, Direction, DirectoryError, ListenerHandle, MessageCallback, Port, PortDirectory,
    SubscriptionId, TopologyCallback, TopologyEvent,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, trace};

use crate::midi::format_hex;

#[derive(Default)]
struct VirtualState {
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    listeners: Vec<(ListenerHandle, MessageCallback)>,
    sent: Vec<(String, Vec<u8>)>,
    denied: HashSet<AccessLevel>,
    delays: HashMap<AccessLevel, Duration>,
    access_requests: Vec<AccessLevel>,
}

/// Scriptable in-memory directory
#[derive(Default)]
pub struct VirtualDirectory {
    state: Mutex<VirtualState>,
    topology: RwLock<Vec<(SubscriptionId, TopologyCallback)>>,
}

impl VirtualDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory pre-populated with `(id, name)` inputs and outputs
    pub fn with_ports(inputs: &[(&str, &str)], outputs: &[(&str, &str)]) -> Self {
        let directory = Self::new();
        {
            let mut state = directory.state.lock();
            state.inputs = inputs
                .iter()
                .map(|(id, name)| Port::new(*id, *name, Direction::Input))
                .collect();
            state.outputs = outputs
                .iter()
                .map(|(id, name)| Port::new(*id, *name, Direction::Output))
                .collect();
        }
        directory
    }

    /// Plug in an input port and notify subscribers
    pub fn add_input(&self, id: &str, name: &str) {
        let port = Port::new(id, name, Direction::Input);
        self.state.lock().inputs.push(port.clone());
        self.notify(TopologyEvent::Connected(port));
    }

    /// Plug in an output port and notify subscribers
    pub fn add_output(&self, id: &str, name: &str) {
        let port = Port::new(id, name, Direction::Output);
        self.state.lock().outputs.push(port.clone());
        self.notify(TopologyEvent::Connected(port));
    }

    /// Unplug an input port, dropping its listeners, and notify subscribers
    pub fn remove_input(&self, id: &str) {
        let removed = {
            let mut state = self.state.lock();
            let index = state.inputs.iter().position(|p| p.id == id);
            let removed = index.map(|i| state.inputs.remove(i));
            if removed.is_some() {
                state.listeners.retain(|(handle, _)| handle.input_id() != id);
            }
            removed
        };
        if let Some(port) = removed {
            self.notify(TopologyEvent::Disconnected(port));
        }
    }

    /// Unplug an output port and notify subscribers
    pub fn remove_output(&self, id: &str) {
        let removed = {
            let mut state = self.state.lock();
            let index = state.outputs.iter().position(|p| p.id == id);
            index.map(|i| state.outputs.remove(i))
        };
        if let Some(port) = removed {
            self.notify(TopologyEvent::Disconnected(port));
        }
    }

    /// Deliver an inbound message on an input port.
    ///
    /// Returns the number of listeners that received it.
    pub fn inject(&self, input_id: &str, data: &[u8]) -> usize {
        let callbacks: Vec<MessageCallback> = self
            .state
            .lock()
            .listeners
            .iter()
            .filter(|(handle, _)| handle.input_id() == input_id)
            .map(|(_, callback)| callback.clone())
            .collect();

        trace!("Virtual RX <- {}: {}", input_id, format_hex(data));
        for callback in &callbacks {
            callback(data);
        }
        callbacks.len()
    }

    /// Every message sent so far, as `(output_id, bytes)`
    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().sent.clone()
    }

    /// Messages sent to one output
    pub fn sent_to(&self, output_id: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|(id, _)| id == output_id)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// Number of listeners attached to an input
    pub fn listener_count(&self, input_id: &str) -> usize {
        self.state
            .lock()
            .listeners
            .iter()
            .filter(|(handle, _)| handle.input_id() == input_id)
            .count()
    }

    pub fn topology_subscriber_count(&self) -> usize {
        self.topology.read().len()
    }

    /// Refuse future access requests at `level`
    pub fn deny_access(&self, level: AccessLevel) {
        self.state.lock().denied.insert(level);
    }

    /// Grant future access requests at `level` again
    pub fn allow_access(&self, level: AccessLevel) {
        self.state.lock().denied.remove(&level);
    }

    /// Answer future access requests at `level` only after `delay`
    pub fn delay_access(&self, level: AccessLevel, delay: Duration) {
        self.state.lock().delays.insert(level, delay);
    }

    /// Access levels requested so far, in order
    pub fn access_requests(&self) -> Vec<AccessLevel> {
        self.state.lock().access_requests.clone()
    }

    fn notify(&self, event: TopologyEvent) {
        let callbacks: Vec<TopologyCallback> = self
            .topology
            .read()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        debug!("Virtual topology change: {:?}", event);
        for callback in &callbacks {
            callback(&event);
        }
    }
}

#[async_trait]
impl PortDirectory for VirtualDirectory {
    fn name(&self) -> &str {
        "virtual"
    }

    async fn request_access(&self, level: AccessLevel) -> Result<(), DirectoryError> {
        let delay = {
            let mut state = self.state.lock();
            state.access_requests.push(level);
            state.delays.get(&level).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock();
        if state.denied.contains(&level) {
            return Err(DirectoryError::AccessDenied {
                level,
                reason: "refused by virtual directory".to_string(),
            });
        }
        Ok(())
    }

    fn inputs(&self) -> Vec<Port> {
        self.state.lock().inputs.clone()
    }

    fn outputs(&self) -> Vec<Port> {
        self.state.lock().outputs.clone()
    }

    fn subscribe_topology(&self, callback: TopologyCallback) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.topology.write().push((id, callback));
        id
    }

    fn unsubscribe_topology(&self, id: SubscriptionId) {
        self.topology.write().retain(|(sub, _)| *sub != id);
    }

    fn send(&self, output_id: &str, data: &[u8]) -> Result<(), DirectoryError> {
        let mut state = self.state.lock();
        if !state.outputs.iter().any(|p| p.id == output_id) {
            return Err(DirectoryError::PortNotFound {
                direction: Direction::Output,
                id: output_id.to_string(),
            });
        }
        state.sent.push((output_id.to_string(), data.to_vec()));
        Ok(())
    }

    fn attach_listener(
        &self,
        input_id: &str,
        callback: MessageCallback,
    ) -> Result<ListenerHandle, DirectoryError> {
        let mut state = self.state.lock();
        if !state.inputs.iter().any(|p| p.id == input_id) {
            return Err(DirectoryError::PortNotFound {
                direction: Direction::Input,
                id: input_id.to_string(),
            });
        }
        let handle = ListenerHandle::new(input_id);
        state.listeners.push((handle.clone(), callback));
        Ok(handle)
    }

    fn detach_listener(&self, handle: &ListenerHandle) {
        self.state.lock().listeners.retain(|(h, _)| h != handle);
    }
}
