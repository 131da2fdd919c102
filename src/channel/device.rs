// src/channel/device.rs
//! Device-side endpoint, owned by the GPU-role controller.

use super::messages::{ChannelMessage, Received};
use super::transport::ChannelTransport;
use crate::widget::{WidgetId, WidgetStateKind};
use anyhow::{Context, Result};
use log::{debug, info, trace};
use std::os::unix::io::RawFd;

pub struct DeviceEndpoint {
    transport: Box<dyn ChannelTransport>,
    peer_id: u32,
    display_fd: Option<RawFd>,
    acknowledged: bool,
    register_attempts: u32,
    pending_output: Option<(u32, u32)>,
}

impl DeviceEndpoint {
    /// `display_fd` is the native connection descriptor this endpoint
    /// serves; it is announced to the host on registration.
    pub fn new(transport: Box<dyn ChannelTransport>, display_fd: Option<RawFd>) -> Self {
        debug!("DeviceEndpoint created over display fd {:?}", display_fd);
        Self {
            transport,
            peer_id: std::process::id(),
            display_fd,
            acknowledged: false,
            register_attempts: 0,
            pending_output: None,
        }
    }

    /// Announces readiness to the host. Repeats the announcement on every
    /// call until the host acknowledges; afterwards it does nothing.
    pub fn register(&mut self) -> Result<()> {
        if self.acknowledged {
            return Ok(());
        }
        self.register_attempts += 1;
        debug!(
            "DeviceEndpoint: register attempt {} (peer {})",
            self.register_attempts, self.peer_id
        );
        self.transport
            .send(ChannelMessage::Register {
                peer_id: self.peer_id,
                display_fd: self.display_fd,
            })
            .context("Failed to send Register to the host")
    }

    pub fn send_widget_state(
        &mut self,
        widget: WidgetId,
        state: WidgetStateKind,
        width: u32,
        height: u32,
    ) -> Result<()> {
        trace!(
            "DeviceEndpoint: widget {} {:?} {}x{}",
            widget,
            state,
            width,
            height
        );
        self.transport
            .send(ChannelMessage::WidgetState {
                widget,
                state,
                width,
                height,
            })
            .context("Failed to send widget state to the host")
    }

    pub fn send_output_size(&mut self, width: u32, height: u32) -> Result<()> {
        debug!("DeviceEndpoint: output size {}x{}", width, height);
        self.transport
            .send(ChannelMessage::OutputSizeChanged { width, height })
            .context("Failed to send output size to the host")
    }

    /// Keeps the latest output size until the host acknowledges us.
    pub fn remember_output_size(&mut self, width: u32, height: u32) {
        debug!(
            "DeviceEndpoint: holding output size {}x{} until the channel is up",
            width, height
        );
        self.pending_output = Some((width, height));
    }

    /// The host acknowledged registration. Sends any held output size.
    pub fn on_established(&mut self) -> Result<()> {
        info!(
            "DeviceEndpoint: registered after {} attempt(s)",
            self.register_attempts
        );
        self.acknowledged = true;
        if let Some((width, height)) = self.pending_output.take() {
            self.send_output_size(width, height)?;
        }
        Ok(())
    }

    /// The channel went down; the next `register` announces again.
    pub fn on_closed(&mut self) {
        self.acknowledged = false;
    }

    /// Best-effort goodbye before the endpoint is dropped.
    pub fn close(&mut self) {
        if let Err(e) = self.transport.send(ChannelMessage::Closed) {
            debug!("DeviceEndpoint: peer already gone on close: {:#}", e);
        }
    }

    pub fn try_recv(&mut self) -> Result<Received> {
        self.transport.try_recv()
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    pub fn register_attempts(&self) -> u32 {
        self.register_attempts
    }

    /// Output size waiting for the channel to come up.
    pub fn pending_output(&self) -> Option<(u32, u32)> {
        self.pending_output
    }
}
