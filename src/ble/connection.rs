//! Connection lifecycle states.
//!
//! One resync cycle walks the states in order:
//! `Idle -> Scanning -> Connecting -> Connected -> Disconnected`.
//! `Disconnected` is terminal for the cycle.

/// Connection state of a session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Waiting for the adapter to power on.
    #[default]
    Idle,
    /// Scanning for the target peripheral.
    Scanning,
    /// A matching peripheral was found and a connection was requested.
    Connecting,
    /// Connected; characteristics are being processed.
    Connected,
    /// The peripheral disconnected; the cycle is done.
    Disconnected,
}

impl ConnectionState {
    /// Name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Scanning => "Scanning",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
        }
    }

    /// Check if a link to the peripheral is up.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a connection completion would be accepted in this state.
    ///
    /// Completions can race the scan-stop, so `Scanning` accepts them too.
    pub fn awaits_connection(&self) -> bool {
        matches!(self, Self::Scanning | Self::Connecting)
    }

    /// Check if the cycle has finished.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}
