// src/controller/state.rs
//! Lifecycle state of the display controller.

/// Connectivity of the inter-process channel. Only tracked while the
/// controller is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    /// Connected to the peer process with this id.
    Connected { peer_id: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerState {
    #[default]
    Terminated,
    Initializing,
    Initialized { channel: ChannelState },
}

impl ControllerState {
    pub fn is_initialized(self) -> bool {
        matches!(self, ControllerState::Initialized { .. })
    }

    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ControllerState::Initialized {
                channel: ChannelState::Connected { .. }
            }
        )
    }

    /// The peer id while connected.
    pub fn peer_id(self) -> Option<u32> {
        match self {
            ControllerState::Initialized {
                channel: ChannelState::Connected { peer_id },
            } => Some(peer_id),
            _ => None,
        }
    }
}

/// Whether native display hardware is usable by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareState {
    Ready,
    Failed,
}

impl HardwareState {
    pub fn is_ready(self) -> bool {
        self == HardwareState::Ready
    }
}
