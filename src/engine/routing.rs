//! Port resolution, selection and listener replacement

use super::resolve::{resolve_exact, resolve_with_fallback};
use super::EngineInner;
use crate::directory::{Direction, MessageCallback, Port};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

impl EngineInner {
    /// Re-resolve both sides from preferences and re-attach the listener
    pub(crate) fn resync(&self) {
        let _guard = self.resync_lock.lock();

        let input = resolve_with_fallback(
            &self.directory.inputs(),
            self.preferences.preferred(Direction::Input).as_deref(),
        );
        let output = resolve_with_fallback(
            &self.directory.outputs(),
            self.preferences.preferred(Direction::Output).as_deref(),
        );

        self.apply(input, output);
    }

    pub(crate) fn set_routing(&self, input_id: Option<&str>, output_id: Option<&str>) {
        let _guard = self.resync_lock.lock();

        let input = resolve_exact(&self.directory.inputs(), input_id);
        let output = resolve_exact(&self.directory.outputs(), output_id);

        if let (Some(id), None) = (input_id, &input) {
            warn!("Input '{}' is not present, clearing input", id);
        }
        if let (Some(id), None) = (output_id, &output) {
            warn!("Output '{}' is not present, clearing output", id);
        }

        self.apply(input, output);

        let active = self.active.read();
        let input_id = active.input.as_ref().map(|p| p.id.as_str());
        let output_id = active.output.as_ref().map(|p| p.id.as_str());
        for (direction, id) in [(Direction::Input, input_id), (Direction::Output, output_id)] {
            if let Err(e) = self.preferences.set_preferred(direction, id) {
                warn!("Failed to save {} preference: {:#}", direction, e);
            }
        }

        info!(
            "Routing set: in={} out={}",
            input_id.unwrap_or("none"),
            output_id.unwrap_or("none")
        );
    }

    /// Drop the engine's listener if it is attached to `input_id`
    pub(crate) fn forget_listener_on(&self, input_id: &str) {
        let _guard = self.resync_lock.lock();
        let mut listener = self.listener.lock();
        if listener.as_ref().is_some_and(|h| h.input_id() == input_id) {
            if let Some(handle) = listener.take() {
                self.directory.detach_listener(&handle);
            }
        }
    }

    /// Install a new active pair. Caller holds `resync_lock`.
    fn apply(&self, input: Option<Port>, output: Option<Port>) {
        {
            let mut active = self.active.write();
            active.input = input.clone();
            active.output = output;
        }
        self.reattach_listener(input.as_ref());
    }

    /// Detach the engine's listener, then attach a new one to `input`.
    ///
    /// A listener already on `input` is kept, so the connection stays open
    /// across output changes and unrelated hot-plug.
    fn reattach_listener(&self, input: Option<&Port>) {
        let mut listener = self.listener.lock();
        if let (Some(handle), Some(port)) = (listener.as_ref(), input) {
            if handle.input_id() == port.id {
                trace!("Keeping listener #{} on '{}'", handle.id(), port.id);
                return;
            }
        }
        if let Some(handle) = listener.take() {
            self.directory.detach_listener(&handle);
        }

        let Some(port) = input else {
            return;
        };

        let engine = self.self_ref.clone();
        let input_id = port.id.clone();
        let callback: MessageCallback = Arc::new(move |data: &[u8]| {
            if let Some(engine) = engine.upgrade() {
                engine.forward(&input_id, data);
                // Teardown closes this listener's connection, which must not
                // happen on the backend thread delivering the message
                if let Some(last) = Arc::into_inner(engine) {
                    let spawned = std::thread::Builder::new()
                        .name("engine-teardown".to_string())
                        .spawn(move || drop(last));
                    if let Err(e) = spawned {
                        warn!("Failed to spawn engine teardown thread: {}", e);
                    }
                }
            }
        });

        match self.directory.attach_listener(&port.id, callback) {
            Ok(handle) => {
                debug!("Listening on '{}' (listener #{})", port.id, handle.id());
                *listener = Some(handle);
            },
            Err(e) => {
                // The port vanished between listing and attaching
                warn!("Failed to listen on '{}': {}", port.id, e);
                self.active.write().input = None;
            },
        }
    }
}
