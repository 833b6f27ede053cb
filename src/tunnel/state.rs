//! Tunnel lifecycle states

/// Lifecycle state of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Created; waiting for the remote client's first socket
    PendingFirstConnect,
    /// At least one client socket is connected
    Online,
    /// Every client socket has dropped; the offline grace is running
    Offline,
    /// Torn down; terminal
    Closed,
}

impl TunnelState {
    /// Whether this is the terminal state
    pub fn is_closed(&self) -> bool {
        matches!(self, TunnelState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_closed() {
        assert!(TunnelState::Closed.is_closed());
        assert!(!TunnelState::PendingFirstConnect.is_closed());
        assert!(!TunnelState::Online.is_closed());
        assert!(!TunnelState::Offline.is_closed());
    }
}
