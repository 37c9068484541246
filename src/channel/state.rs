//! Channel lifecycle.

/// Channel state.
///
/// A channel starts `Open` once the upgrade completes. Sending CLOSE moves it
/// to `Closing`; receiving CLOSE or closing the transport moves it to
/// `Closed`. A failed transport write leaves it `Broken`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Ready for data transfer.
    Open,
    /// CLOSE sent, peer's CLOSE not yet seen.
    Closing,
    /// Fully closed.
    Closed,
    /// Transport failed mid-frame; the stream position is unknown.
    Broken,
}

impl ChannelState {
    /// Sending is allowed only while open.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ChannelState::Open)
    }

    /// Receiving is allowed while open or waiting for the peer's CLOSE.
    #[must_use]
    #[inline]
    pub const fn can_receive(&self) -> bool {
        matches!(self, ChannelState::Open | ChannelState::Closing)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
            ChannelState::Closed => "closed",
            ChannelState::Broken => "broken",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_send_in_each_state() {
        assert!(ChannelState::Open.can_send());
        assert!(!ChannelState::Closing.can_send());
        assert!(!ChannelState::Closed.can_send());
        assert!(!ChannelState::Broken.can_send());
    }

    #[test]
    fn test_can_receive_in_each_state() {
        assert!(ChannelState::Open.can_receive());
        assert!(ChannelState::Closing.can_receive());
        assert!(!ChannelState::Closed.can_receive());
        assert!(!ChannelState::Broken.can_receive());
    }
}
