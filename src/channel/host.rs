// src/channel/host.rs
//! Host-side endpoint, referenced by the browser-role controller.
//!
//! The browser issues widget commands before the GPU process may exist.
//! Commands sent while the channel is down are queued and flushed in order
//! once the device registers.

use super::messages::{ChannelMessage, Received};
use super::transport::ChannelTransport;
use crate::widget::{WidgetId, WidgetStateKind};
use anyhow::{bail, Context, Result};
use log::{debug, info, trace, warn};
use std::collections::VecDeque;

pub struct HostEndpoint {
    transport: Box<dyn ChannelTransport>,
    peer_id: u32,
    connected: bool,
    establishing: bool,
    queue: VecDeque<ChannelMessage>,
    max_queued: usize,
}

impl HostEndpoint {
    pub fn new(transport: Box<dyn ChannelTransport>, max_queued: usize) -> Self {
        Self {
            transport,
            peer_id: std::process::id(),
            connected: false,
            establishing: false,
            queue: VecDeque::new(),
            max_queued: max_queued.max(1),
        }
    }

    /// Starts connection setup by asking the device side to register.
    pub fn establish_channel(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        if !self.establishing {
            info!("HostEndpoint: establishing channel");
        }
        self.establishing = true;
        self.transport
            .send(ChannelMessage::Establish)
            .context("Failed to ask the device side to register")
    }

    /// Proxies a widget command. Queued while the channel is down; once the
    /// queue is full further commands are refused and nothing queued is lost.
    pub fn send_widget_state(
        &mut self,
        widget: WidgetId,
        state: WidgetStateKind,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let message = ChannelMessage::WidgetState {
            widget,
            state,
            width,
            height,
        };
        if self.connected {
            trace!("HostEndpoint: send {:?}", message);
            return self
                .transport
                .send(message)
                .context("Failed to send widget state to the device");
        }

        if self.queue.len() >= self.max_queued {
            warn!(
                "HostEndpoint: queue full ({}), refusing {:?}",
                self.max_queued, message
            );
            bail!(
                "Channel queue full ({} messages), refusing {:?} for widget {}",
                self.max_queued,
                state,
                widget
            );
        }
        debug!("HostEndpoint: channel down, queueing {:?}", message);
        self.queue.push_back(message);
        Ok(())
    }

    /// The device registered: acknowledge it and flush queued commands.
    pub fn on_register(&mut self, device_peer: u32) -> Result<()> {
        self.transport
            .send(ChannelMessage::Established {
                peer_id: self.peer_id,
            })
            .context("Failed to acknowledge device registration")?;
        self.connected = true;
        self.establishing = false;
        info!(
            "HostEndpoint: device {} registered, flushing {} queued message(s)",
            device_peer,
            self.queue.len()
        );
        while let Some(message) = self.queue.pop_front() {
            if let Err(e) = self.transport.send(message.clone()) {
                self.queue.push_front(message);
                self.connected = false;
                return Err(e).context("Failed to flush queued widget state");
            }
        }
        Ok(())
    }

    /// Peer-initiated teardown. Later commands are queued until the device
    /// registers again.
    pub fn channel_closed(&mut self) {
        if self.connected {
            info!("HostEndpoint: channel closed by peer");
        }
        self.connected = false;
        self.establishing = false;
    }

    /// Best-effort goodbye before the endpoint is dropped.
    pub fn close(&mut self) {
        if !self.queue.is_empty() {
            warn!(
                "HostEndpoint: discarding {} undelivered message(s)",
                self.queue.len()
            );
        }
        if let Err(e) = self.transport.send(ChannelMessage::Closed) {
            debug!("HostEndpoint: peer already gone on close: {:#}", e);
        }
    }

    pub fn try_recv(&mut self) -> Result<Received> {
        self.transport.try_recv()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_establishing(&self) -> bool {
        self.establishing
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }
}
