//! THRU forwarding, visual feedback, control and panic output

use super::EngineInner;
use crate::midi::{self, cc, format_hex, StatusKind, CHANNEL_COUNT};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, trace, warn};

impl EngineInner {
    /// Handle one inbound message from `input_id`
    pub(crate) fn forward(&self, input_id: &str, data: &[u8]) {
        let output_id = {
            let active = self.active.read();
            if active.input.as_ref().map(|p| p.id.as_str()) != Some(input_id) {
                trace!("Ignoring message from inactive input '{}'", input_id);
                return;
            }
            active.output.as_ref().map(|p| p.id.clone())
        };

        // System and running-status messages have no channel and pass unfiltered
        if let (Some(channel), Some(&status)) = (midi::channel_of(data), data.first()) {
            if StatusKind::of(status).triggers_feedback() {
                self.emit_feedback(channel);
            }
            if !self.filter.read().is_channel_active(channel) {
                trace!("THRU drop (ch {} filtered): {}", channel, format_hex(data));
                return;
            }
        }

        let Some(output_id) = output_id else {
            return;
        };

        trace!("THRU {} -> {}: {}", input_id, output_id, format_hex(data));
        if let Err(e) = self.directory.send(&output_id, data) {
            debug!("THRU dropped: {}", e);
        }
    }

    fn emit_feedback(&self, channel: u8) {
        let hook = self.feedback.read().clone();
        if let Some(hook) = hook {
            if catch_unwind(AssertUnwindSafe(|| hook(channel))).is_err() {
                warn!("Feedback hook panicked on channel {}", channel);
            }
        }
    }

    pub(crate) fn send_control(&self, channel: u8, controller: u8, value: u8) {
        let output_id = self.active.read().output.as_ref().map(|p| p.id.clone());
        let Some(output_id) = output_id else {
            trace!("Control change skipped, no active output");
            return;
        };

        let message = midi::control_change(channel, controller, value);
        debug!("CC -> {}: {}", output_id, format_hex(&message));
        if let Err(e) = self.directory.send(&output_id, &message) {
            warn!("Control change not sent: {}", e);
        }
    }

    pub(crate) fn panic(&self) {
        let outputs = self.directory.outputs();
        warn!("Panic: resetting {} output(s)", outputs.len());

        for output in &outputs {
            for channel in 1..=CHANNEL_COUNT {
                for controller in [cc::ALL_NOTES_OFF, cc::RESET_ALL_CONTROLLERS] {
                    let message = midi::control_change(channel, controller, 0);
                    if let Err(e) = self.directory.send(&output.id, &message) {
                        debug!("Panic message to '{}' dropped: {}", output.id, e);
                    }
                }
            }
        }
    }
}
