// src/channel/messages.rs
//! Messages exchanged between the device-side and host-side endpoints.
//!
//! Direction is fixed per variant except `WidgetState` and `Closed`, which
//! both sides send.

use crate::widget::{WidgetId, WidgetStateKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    /// Host → device: ask the device to announce itself.
    Establish,

    /// Device → host: the device side is ready. Repeated until acknowledged.
    Register {
        peer_id: u32,
        display_fd: Option<i32>,
    },

    /// Host → device: acknowledges `Register`.
    Established { peer_id: u32 },

    /// Host → device: a widget command to execute.
    /// Device → host: confirmation of the state the widget ended up in.
    WidgetState {
        widget: WidgetId,
        state: WidgetStateKind,
        width: u32,
        height: u32,
    },

    /// Device → host: the primary output changed size.
    OutputSizeChanged { width: u32, height: u32 },

    /// Either side is going away.
    Closed,
}

/// Result of a non-blocking receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Message(ChannelMessage),
    /// Nothing pending.
    Empty,
    /// The other end of the transport no longer exists.
    PeerGone,
}
