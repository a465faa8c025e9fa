//! MIDI status helpers and Control Change encoding
//!
//! Forwarded bytes are never decoded beyond the status byte.

/// Number of MIDI channels
pub const CHANNEL_COUNT: u8 = 16;

/// Well-known Control Change controller numbers
pub mod cc {
    pub const VOLUME: u8 = 7;
    pub const PAN: u8 = 10;
    pub const RESONANCE: u8 = 71;
    pub const RELEASE: u8 = 72;
    pub const ATTACK: u8 = 73;
    pub const CUTOFF: u8 = 74;
    pub const RESET_ALL_CONTROLLERS: u8 = 121;
    pub const ALL_NOTES_OFF: u8 = 123;

    /// Resolve a controller alias (as typed in the REPL) to its number
    pub fn from_alias(alias: &str) -> Option<u8> {
        match alias.to_ascii_lowercase().as_str() {
            "volume" | "vol" => Some(VOLUME),
            "pan" => Some(PAN),
            "resonance" | "res" => Some(RESONANCE),
            "release" => Some(RELEASE),
            "attack" => Some(ATTACK),
            "cutoff" => Some(CUTOFF),
            _ => None,
        }
    }
}

/// Kind of a channel voice message, derived from the status nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    NoteOff,
    NoteOn,
    PolyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
    /// System common / realtime / sysex (0xF0..=0xFF)
    System,
    /// Data byte in status position (running status)
    Data,
}

impl StatusKind {
    /// Classify a status byte
    pub fn of(status: u8) -> Self {
        match status & 0xF0 {
            0x80 => StatusKind::NoteOff,
            0x90 => StatusKind::NoteOn,
            0xA0 => StatusKind::PolyPressure,
            0xB0 => StatusKind::ControlChange,
            0xC0 => StatusKind::ProgramChange,
            0xD0 => StatusKind::ChannelPressure,
            0xE0 => StatusKind::PitchBend,
            0xF0 => StatusKind::System,
            _ => StatusKind::Data,
        }
    }

    /// True for the message kinds that drive visual feedback
    pub fn triggers_feedback(self) -> bool {
        matches!(self, StatusKind::NoteOn | StatusKind::ControlChange)
    }
}

/// Channel (1-16) of a channel voice message, None for system messages,
/// running-status data and empty input
pub fn channel_of(data: &[u8]) -> Option<u8> {
    let status = *data.first()?;
    match StatusKind::of(status) {
        StatusKind::System | StatusKind::Data => None,
        _ => Some((status & 0x0F) + 1),
    }
}

/// Encode a Control Change message.
///
/// `channel` is 1-based and clamped to 1-16; `controller` and `value` are
/// clamped to 0-127.
pub fn control_change(channel: u8, controller: u8, value: u8) -> [u8; 3] {
    let channel = channel.clamp(1, CHANNEL_COUNT);
    [0xB0 | (channel - 1), controller.min(127), value.min(127)]
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_of_note_on() {
        assert_eq!(channel_of(&[0x90, 60, 100]), Some(1));
        assert_eq!(channel_of(&[0x9F, 60, 100]), Some(16));
    }

    #[test]
    fn test_channel_of_system_and_empty() {
        assert_eq!(channel_of(&[0xF8]), None);
        assert_eq!(channel_of(&[0xF0, 0x41, 0xF7]), None);
        assert_eq!(channel_of(&[0x40, 0x10]), None);
        assert_eq!(channel_of(&[]), None);
    }

    #[test]
    fn test_status_kind_feedback() {
        assert!(StatusKind::of(0x93).triggers_feedback());
        assert!(StatusKind::of(0xB0).triggers_feedback());
        assert!(!StatusKind::of(0x80).triggers_feedback());
        assert!(!StatusKind::of(0xE0).triggers_feedback());
        assert!(!StatusKind::of(0xFE).triggers_feedback());
    }

    #[test]
    fn test_control_change_encoding() {
        assert_eq!(control_change(1, cc::VOLUME, 100), [0xB0, 7, 100]);
        assert_eq!(control_change(16, cc::ALL_NOTES_OFF, 0), [0xBF, 123, 0]);
    }

    #[test]
    fn test_control_change_clamps() {
        assert_eq!(control_change(0, 200, 255), [0xB0, 127, 127]);
        assert_eq!(control_change(42, 1, 1), [0xBF, 1, 1]);
    }

    #[test]
    fn test_cc_alias() {
        assert_eq!(cc::from_alias("Cutoff"), Some(74));
        assert_eq!(cc::from_alias("vol"), Some(7));
        assert_eq!(cc::from_alias("wobble"), None);
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0xB0, 0x07, 0x64]), "B0 07 64");
    }
}
