//! Per-channel mute/solo state

use crate::midi::CHANNEL_COUNT;
use std::fmt;

/// Set of MIDI channels 1-16, stored as a bit mask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelSet(u16);

impl ChannelSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// True if `channel` is a valid 1-based MIDI channel
    pub fn is_valid(channel: u8) -> bool {
        (1..=CHANNEL_COUNT).contains(&channel)
    }

    fn bit(channel: u8) -> u16 {
        1 << (channel - 1)
    }

    pub fn contains(&self, channel: u8) -> bool {
        Self::is_valid(channel) && self.0 & Self::bit(channel) != 0
    }

    /// Add a channel; out-of-range channels are ignored
    pub fn insert(&mut self, channel: u8) {
        if Self::is_valid(channel) {
            self.0 |= Self::bit(channel);
        }
    }

    pub fn remove(&mut self, channel: u8) {
        if Self::is_valid(channel) {
            self.0 &= !Self::bit(channel);
        }
    }

    /// Flip membership, returning the new state (false for invalid channels)
    pub fn toggle(&mut self, channel: u8) -> bool {
        if !Self::is_valid(channel) {
            return false;
        }
        self.0 ^= Self::bit(channel);
        self.contains(channel)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Member channels in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (1..=CHANNEL_COUNT).filter(move |ch| self.contains(*ch))
    }
}

impl FromIterator<u8> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        let mut set = ChannelSet::empty();
        for channel in iter {
            set.insert(channel);
        }
        set
    }
}

impl fmt::Display for ChannelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "-");
        }
        let channels: Vec<String> = self.iter().map(|ch| ch.to_string()).collect();
        write!(f, "{}", channels.join(","))
    }
}

/// Mute and solo sets. Any solo overrides mute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelFilter {
    pub muted: ChannelSet,
    pub soloed: ChannelSet,
}

impl ChannelFilter {
    pub fn new(muted: ChannelSet, soloed: ChannelSet) -> Self {
        Self { muted, soloed }
    }

    /// Pass-through decision for one channel
    pub fn is_channel_active(&self, channel: u8) -> bool {
        if !self.soloed.is_empty() {
            return self.soloed.contains(channel);
        }
        !self.muted.contains(channel)
    }
}
