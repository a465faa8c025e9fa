//! Start-up, access negotiation and teardown

use super::{EngineInner, EngineStatus};
use crate::directory::{AccessLevel, Direction, DirectoryError, TopologyEvent};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl EngineInner {
    pub(crate) async fn start(&self) -> bool {
        let was_ready = self.status.read().is_ready();
        if !was_ready {
            *self.status.write() = EngineStatus::Initializing;
        }
        info!(
            "{} routing engine on '{}' directory",
            if was_ready { "Re-validating" } else { "Starting" },
            self.directory.name()
        );

        let level = match self.acquire_access().await {
            Ok(level) => level,
            Err(e) => {
                error!("MIDI directory unavailable: {}", e);
                self.teardown();
                *self.status.write() = EngineStatus::Unavailable;
                return false;
            },
        };

        self.resubscribe_topology();
        self.resync();

        *self.status.write() = EngineStatus::Ready(level);

        let routing = self.active.read();
        info!(
            "Routing engine ready ({}): in={} out={}",
            level,
            routing.input.as_ref().map(|p| p.display_name()).unwrap_or("none"),
            routing.output.as_ref().map(|p| p.display_name()).unwrap_or("none"),
        );
        true
    }

    /// Try the highest configured access level first, then baseline.
    ///
    /// Returns the granted level, or the last refusal if none was granted.
    async fn acquire_access(&self) -> Result<AccessLevel, DirectoryError> {
        let levels: &[AccessLevel] = if self.options.request_extended {
            &[AccessLevel::Extended, AccessLevel::Baseline]
        } else {
            &[AccessLevel::Baseline]
        };

        let mut last_error = None;
        for &level in levels {
            match self.request_access(level).await {
                Ok(()) => {
                    if level < levels[0] {
                        warn!("{} access refused, continuing with {} access", levels[0], level);
                    } else {
                        debug!("MIDI access granted: {}", level);
                    }
                    return Ok(level);
                },
                Err(e) => {
                    warn!("MIDI access request failed: {}", e);
                    last_error = Some(e);
                },
            }
        }

        Err(last_error
            .unwrap_or_else(|| DirectoryError::Unsupported("no access level requested".to_string())))
    }

    async fn request_access(&self, level: AccessLevel) -> Result<(), DirectoryError> {
        let request = self.directory.request_access(level);
        match self.options.access_timeout {
            Some(timeout) => tokio::time::timeout(timeout, request)
                .await
                .map_err(|_| DirectoryError::Timeout(level))?,
            None => request.await,
        }
    }

    /// Replace the engine's topology subscription with a fresh one
    fn resubscribe_topology(&self) {
        let mut subscription = self.subscription.lock();
        if let Some(old) = subscription.take() {
            self.directory.unsubscribe_topology(old);
        }

        let engine = self.self_ref.clone();
        let id = self
            .directory
            .subscribe_topology(Arc::new(move |event: &TopologyEvent| {
                if let Some(engine) = engine.upgrade() {
                    engine.on_topology_change(event);
                }
            }));
        *subscription = Some(id);
    }

    fn on_topology_change(&self, event: &TopologyEvent) {
        debug!(
            "Topology change ({} '{}'), re-resolving ports",
            event.port().direction,
            event.port().id
        );
        if let TopologyEvent::Disconnected(port) = event {
            if port.direction == Direction::Input {
                self.forget_listener_on(&port.id);
            }
        }
        self.resync();

        let hook = self.topology_hook.read().clone();
        if let Some(hook) = hook {
            hook(event);
        }
    }

    /// Drop the listener and topology subscription and clear the routing
    pub(crate) fn teardown(&self) {
        if let Some(id) = self.subscription.lock().take() {
            self.directory.unsubscribe_topology(id);
        }

        let _guard = self.resync_lock.lock();
        if let Some(handle) = self.listener.lock().take() {
            self.directory.detach_listener(&handle);
        }
        let mut active = self.active.write();
        active.input = None;
        active.output = None;
    }
}
