// src/channel/mod.rs
//! Inter-process channel between the browser and GPU roles.
//!
//! - `DeviceEndpoint`: GPU side, registers with the host and reports output
//!   geometry and widget confirmations
//! - `HostEndpoint`: browser side, proxies widget commands
//! - `ChannelTransport`: the ordered message link both endpoints sit on

pub mod device;
pub mod host;
pub mod messages;
pub mod transport;


pub use device::DeviceEndpoint;
pub use host::HostEndpoint;
pub use messages::{ChannelMessage, Received};
pub use transport::{
    ChannelConnector, ChannelTransport, MemoryTransport, NoChannel, OneShotConnector,
    StreamTransport,
};
