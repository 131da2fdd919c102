// src/controller/mod.rs
//! DisplayController - the process-wide display coordination state machine.
//!
//! One controller per process. It resolves which part of the split graphics
//! pipeline the process plays and wires up only what that role needs:
//!
//! | role          | native connection | dispatcher | channel endpoint | widgets |
//! |---------------|-------------------|------------|------------------|---------|
//! | SingleProcess | yes               | in-process | none             | local   |
//! | Browser       | no                | in-process | host             | proxied |
//! | Gpu           | yes               | fd-bound   | device           | local   |
//!
//! The controller is single-threaded and driven by `pump()`. The only
//! background thread is the GPU dispatcher's poll loop.

pub mod probe;
pub mod state;

#[cfg(test)]
mod tests;

pub use probe::{look_ahead_output_geometry, ProbeCancel};
pub use state::{ChannelState, ControllerState, HardwareState};

use crate::channel::{ChannelConnector, ChannelMessage, DeviceEndpoint, HostEndpoint, Received};
use crate::config::Config;
use crate::display::{
    DesktopScreen, Dispatcher, DisplayConnector, DisplaySpec, NativeDisplayConnection,
    OutputEvent, OutputId, RegistrationMode,
};
use crate::error::{ControllerError, ControllerResult, Unimplemented};
use crate::geometry::Rect;
use crate::role::{LaunchSwitches, ProcessRole};
use crate::widget::{
    ConfirmedState, LocalWidgetOwner, RemoteWidgetProxy, RenderHandle, Widget, WidgetId, WidgetIdAllocator,
    WidgetKind, WidgetRoute, WidgetStateKind, WidgetTarget,
};
use log::*;

pub struct DisplayController {
    config: Config,
    switches: LaunchSwitches,
    role: ProcessRole,
    state: ControllerState,
    hardware: Option<HardwareState>,

    display_connector: Box<dyn DisplayConnector>,
    channel_connector: Box<dyn ChannelConnector>,

    // Released by `terminate` in declaration order.
    display_spec: Option<DisplaySpec>,
    route: Option<WidgetRoute>,
    device: Option<DeviceEndpoint>,
    dispatcher: Option<Dispatcher>,
    desktop_screen: Option<DesktopScreen>,
    display: Option<Box<dyn NativeDisplayConnection>>,

    widget_ids: WidgetIdAllocator,
    probe_cancel: ProbeCancel,
}

impl DisplayController {
    /// Creates an uninitialized controller. Nothing is connected until
    /// `initialize_hardware` runs.
    pub fn new(
        config: Config,
        switches: LaunchSwitches,
        display_connector: Box<dyn DisplayConnector>,
        channel_connector: Box<dyn ChannelConnector>,
    ) -> Self {
        Self {
            config,
            switches,
            role: ProcessRole::Unresolved,
            state: ControllerState::Terminated,
            hardware: None,
            display_connector,
            channel_connector,
            display_spec: None,
            route: None,
            device: None,
            dispatcher: None,
            desktop_screen: None,
            display: None,
            widget_ids: WidgetIdAllocator::default(),
            probe_cancel: ProbeCancel::new(),
        }
    }

    fn resolve_role(&mut self) -> ProcessRole {
        if self.role == ProcessRole::Unresolved {
            self.role = ProcessRole::resolve(self.switches);
            info!("DisplayController: process role is {}", self.role);
        }
        self.role
    }

    /// Brings up the components this process's role needs. Calling it again
    /// while initialized returns the recorded readiness and does nothing else.
    pub fn initialize_hardware(&mut self) -> HardwareState {
        if self.state.is_initialized() {
            if let Some(hardware) = self.hardware {
                return hardware;
            }
        }
        self.state = ControllerState::Initializing;
        let role = self.resolve_role();
        let mut hardware = HardwareState::Ready;

        if role.owns_native_display() {
            match self.display_connector.connect(RegistrationMode::RegisterAsNeeded) {
                Ok(connection) => self.display = Some(connection),
                Err(e) => {
                    error!("Failed to connect to the display server: {:#}", e);
                    hardware = HardwareState::Failed;
                }
            }
        }

        if role.owns_display_spec() {
            self.dispatcher = Some(Dispatcher::in_process());
            self.display_spec = Some(DisplaySpec::new(
                self.config.display.spec_capacity,
                self.config.display.spec_scale,
            ));
        }

        // Widgets only get top-level surfaces when there is a display to put them on.
        let local_kind = if self.display.is_some() {
            WidgetKind::TopLevel
        } else {
            WidgetKind::Headless
        };
        match role {
            ProcessRole::SingleProcess => {
                self.route = Some(WidgetRoute::Local(LocalWidgetOwner::new(local_kind)));
            }
            ProcessRole::Gpu => {
                let fd = self.display.as_ref().and_then(|display| display.display_fd());
                let mut dispatcher = match fd {
                    Some(fd) => Dispatcher::with_fd(fd),
                    None => Dispatcher::in_process(),
                };
                if let Err(e) = dispatcher.post_poll_task(self.config.dispatcher.poll_timeout_ms) {
                    error!("Display events will be read on the controller thread: {:#}", e);
                }
                self.dispatcher = Some(dispatcher);

                match self.channel_connector.connect(role) {
                    Ok(transport) => self.device = Some(DeviceEndpoint::new(transport, fd)),
                    Err(e) => error!("GPU process has no channel to the browser: {:#}", e),
                }
                self.route = Some(WidgetRoute::Local(LocalWidgetOwner::new(local_kind)));
            }
            ProcessRole::Browser | ProcessRole::Unresolved => {
                hardware = HardwareState::Ready;
                self.route = Some(self.connect_host_route(role));
            }
        }

        // Seed the first geometry report from what the connection already knows.
        if let (Some(display), Some(dispatcher)) = (&self.display, &mut self.dispatcher) {
            if let (Some(output), Some(geometry)) = (display.primary_output(), display.primary_geometry()) {
                dispatcher.post(OutputEvent {
                    output,
                    width: geometry.width,
                    height: geometry.height,
                });
            }
        }

        if hardware == HardwareState::Failed {
            error!("DisplayController: {} role initialized without display hardware", role);
        } else {
            info!("DisplayController: {} role initialized", role);
        }
        self.hardware = Some(hardware);
        self.state = ControllerState::Initialized {
            channel: ChannelState::Disconnected,
        };
        hardware
    }

    fn connect_host_route(&mut self, role: ProcessRole) -> WidgetRoute {
        match self.channel_connector.connect(role) {
            Ok(transport) => {
                let host = HostEndpoint::new(transport, self.config.channel.max_queued_messages);
                WidgetRoute::Remote(RemoteWidgetProxy::new(host))
            }
            Err(e) => {
                error!("Browser has no channel to the GPU process, widgets stay headless: {:#}", e);
                WidgetRoute::Local(LocalWidgetOwner::new(WidgetKind::Headless))
            }
        }
    }

    /// Releases everything `initialize_hardware` built. Safe to call when
    /// not initialized and more than once.
    pub fn terminate(&mut self) {
        if self.state == ControllerState::Terminated && self.hardware.is_none() {
            return;
        }
        info!("DisplayController: terminating {} role", self.role);

        self.display_spec = None;

        if let Some(mut route) = self.route.take() {
            let destroyed = route.ops_mut().clear();
            debug!("DisplayController: destroyed {} widget(s)", destroyed);
            if let WidgetRoute::Remote(mut proxy) = route {
                proxy.host_mut().close();
            }
        }
        if let Some(mut device) = self.device.take() {
            device.close();
        }
        if let Some(mut dispatcher) = self.dispatcher.take() {
            dispatcher.stop();
        }
        self.desktop_screen = None;
        self.display = None;

        self.hardware = None;
        self.state = ControllerState::Terminated;
    }

    fn ensure_initialized(&mut self) -> &mut WidgetRoute {
        if !self.state.is_initialized() {
            self.initialize_hardware();
        }
        self.route
            .get_or_insert_with(|| WidgetRoute::Local(LocalWidgetOwner::new(WidgetKind::Headless)))
    }

    /// Allocates a fresh widget id and creates the widget, locally or in the
    /// peer process.
    pub fn acquire_widget(&mut self) -> ControllerResult<WidgetId> {
        self.ensure_initialized();
        let id = self
            .widget_ids
            .allocate()
            .ok_or(ControllerError::WidgetIdsExhausted)?;
        self.ensure_initialized().ops_mut().create(id)?;
        Ok(id)
    }

    /// Returns the widget's render handle, realizing it on first use.
    ///
    /// While a channel endpoint exists but is not connected this only nudges
    /// the connection along and returns `None`; callers poll again later.
    pub fn realize_widget(&mut self, id: WidgetId) -> ControllerResult<Option<RenderHandle>> {
        self.ensure_initialized();
        let connected = self.state.is_connected();

        if let Some(device) = &mut self.device {
            if !connected {
                device.register().map_err(ControllerError::Channel)?;
                return Ok(None);
            }
        }
        if let Some(proxy) = self.route.as_mut().and_then(WidgetRoute::remote_mut) {
            if !connected {
                proxy
                    .host_mut()
                    .establish_channel()
                    .map_err(ControllerError::Channel)?;
                return Ok(None);
            }
        }

        let display = self
            .display
            .as_mut()
            .map(|display| &mut **display as &mut dyn NativeDisplayConnection);
        self.route
            .get_or_insert_with(|| WidgetRoute::Local(LocalWidgetOwner::new(WidgetKind::Headless)))
            .ops_mut()
            .realize(id, display)
            .map(Some)
    }

    /// Resizes a widget named by id or by render handle.
    ///
    /// With a host endpoint the request is forwarded and `true` returned
    /// without waiting. Otherwise the widget's own answer is returned.
    pub fn attempt_resize(
        &mut self,
        target: impl Into<WidgetTarget>,
        bounds: Rect,
    ) -> ControllerResult<bool> {
        self.ensure_initialized().ops_mut().resize(target.into(), bounds)
    }

    /// Applies a widget state change, locally or through the peer.
    pub fn dispatch_widget_state(
        &mut self,
        id: WidgetId,
        kind: WidgetStateKind,
        width: u32,
        height: u32,
    ) -> ControllerResult<()> {
        self.ensure_initialized()
            .ops_mut()
            .apply_state(id, kind, width, height)
    }

    // --- Channel notifications ---

    pub fn on_channel_established(&mut self, peer_id: u32) {
        if !self.state.is_initialized() {
            warn!("Channel established with {} before initialization, ignoring", peer_id);
            return;
        }
        if let Some(proxy) = self.route.as_mut().and_then(WidgetRoute::remote_mut) {
            if !proxy.host().is_connected() {
                if let Err(e) = proxy.host_mut().on_register(peer_id) {
                    error!("Failed to complete channel setup with {}: {:#}", peer_id, e);
                    return;
                }
            }
        }
        if let Some(device) = &mut self.device {
            if let Err(e) = device.on_established() {
                error!("Failed to flush held output size to {}: {:#}", peer_id, e);
            }
        }
        info!("DisplayController: channel connected to peer {}", peer_id);
        self.state = ControllerState::Initialized {
            channel: ChannelState::Connected { peer_id },
        };
    }

    /// The peer closed the channel. Host-side sends queue until it is
    /// re-established.
    pub fn on_channel_closed(&mut self) {
        if !self.state.is_initialized() {
            return;
        }
        if let Some(proxy) = self.route.as_mut().and_then(WidgetRoute::remote_mut) {
            proxy.host_mut().channel_closed();
        }
        if let Some(device) = &mut self.device {
            device.on_closed();
        }
        info!("DisplayController: channel closed");
        self.state = ControllerState::Initialized {
            channel: ChannelState::Disconnected,
        };
    }

    /// The peer process is gone. The endpoint is dropped; a browser falls
    /// back to headless local widgets until `reconnect_channel` attaches a
    /// new one.
    pub fn on_channel_peer_destroyed(&mut self) {
        if !self.state.is_initialized() {
            return;
        }
        if self.route.as_ref().is_some_and(WidgetRoute::is_remote) {
            warn!("DisplayController: GPU process gone, widgets fall back to headless");
            self.route = Some(WidgetRoute::Local(LocalWidgetOwner::new(WidgetKind::Headless)));
        }
        if self.device.take().is_some() {
            warn!("DisplayController: browser process gone, channel endpoint dropped");
        }
        self.state = ControllerState::Initialized {
            channel: ChannelState::Disconnected,
        };
    }

    /// Attaches a fresh channel endpoint after the peer was destroyed.
    pub fn reconnect_channel(&mut self) -> ControllerResult<()> {
        if !self.state.is_initialized() {
            self.initialize_hardware();
            return Ok(());
        }
        match self.role {
            ProcessRole::Gpu if self.device.is_none() => {
                let transport = self
                    .channel_connector
                    .connect(self.role)
                    .map_err(ControllerError::Channel)?;
                let fd = self.display.as_ref().and_then(|display| display.display_fd());
                self.device = Some(DeviceEndpoint::new(transport, fd));
                info!("DisplayController: device endpoint reattached");
            }
            ProcessRole::Browser | ProcessRole::Unresolved
                if !self.route.as_ref().is_some_and(WidgetRoute::is_remote) =>
            {
                let transport = self
                    .channel_connector
                    .connect(self.role)
                    .map_err(ControllerError::Channel)?;
                let host = HostEndpoint::new(transport, self.config.channel.max_queued_messages);
                self.route = Some(WidgetRoute::Remote(RemoteWidgetProxy::new(host)));
                info!("DisplayController: host endpoint reattached");
            }
            _ => debug!("DisplayController: channel endpoint already attached"),
        }
        Ok(())
    }

    // --- Output geometry ---

    /// A display output changed size. Only the primary output is tracked.
    pub fn on_output_size_changed(
        &mut self,
        output: OutputId,
        width: u32,
        height: u32,
    ) -> ControllerResult<()> {
        if !self.state.is_initialized() {
            debug!("Output {:?} resized before initialization, ignoring", output);
            return Ok(());
        }
        let primary = self
            .display
            .as_ref()
            .and_then(|display| display.primary_output())
            .unwrap_or(OutputId::PRIMARY);
        if output != primary {
            warn!(
                "Output {:?} resized to {}x{}: only the primary output {:?} is supported",
                output, width, height, primary
            );
            return Err(ControllerError::NotImplemented(Unimplemented::MultipleOutputs));
        }

        match self.role {
            ProcessRole::Gpu => {
                let connected = self.state.is_connected();
                match &mut self.device {
                    Some(device) if connected => device
                        .send_output_size(width, height)
                        .map_err(ControllerError::Channel)?,
                    Some(device) => device.remember_output_size(width, height),
                    None => debug!("No browser to tell about {}x{}", width, height),
                }
            }
            _ => self.on_output_size_changed_local(width, height),
        }
        Ok(())
    }

    /// Applies a primary output size to the display spec and desktop screen.
    pub fn on_output_size_changed_local(&mut self, width: u32, height: u32) {
        if let Some(spec) = &mut self.display_spec {
            spec.update(width, height);
        }
        if let Some(screen) = &mut self.desktop_screen {
            screen.set_geometry(Rect::from_size(width, height));
        }
    }

    pub fn current_display_spec(&self) -> ControllerResult<&str> {
        self.display_spec
            .as_ref()
            .and_then(DisplaySpec::as_str)
            .ok_or(ControllerError::DisplaySpecUnknown)
    }

    /// The desktop screen, created on first request.
    ///
    /// When no geometry is known yet the first request runs the look-ahead
    /// probe. A probe failure is returned once; the screen exists regardless
    /// and later output reports keep updating it.
    pub fn desktop_screen(&mut self) -> ControllerResult<&DesktopScreen> {
        if self.desktop_screen.is_none() {
            let known = self
                .display
                .as_ref()
                .and_then(|display| display.primary_geometry())
                .filter(|geometry| !geometry.is_empty());
            let geometry = match known {
                Some(geometry) => Ok(geometry),
                None => {
                    let probed = look_ahead_output_geometry(
                        &*self.display_connector,
                        &self.config.probe,
                        &self.probe_cancel,
                    );
                    self.probe_cancel.reset();
                    probed
                }
            };

            let screen = self.desktop_screen.insert(DesktopScreen::new());
            match geometry {
                Ok(geometry) => screen.set_geometry(geometry),
                Err(e) => {
                    warn!("Desktop screen created without geometry: {}", e);
                    return Err(e);
                }
            }
        }
        let screen: &DesktopScreen = self.desktop_screen.get_or_insert_with(DesktopScreen::new);
        Ok(screen)
    }

    /// Handle for cancelling a look-ahead probe from another thread.
    pub fn probe_cancel_handle(&self) -> ProbeCancel {
        self.probe_cancel.clone()
    }

    // --- Event loop ---

    /// One step of the controller's event loop: handles pending output
    /// events, then every pending channel message.
    pub fn pump(&mut self) -> ControllerResult<()> {
        if !self.state.is_initialized() {
            return Ok(());
        }

        let events = match &mut self.dispatcher {
            Some(dispatcher) => {
                let display = self
                    .display
                    .as_mut()
                    .map(|display| &mut **display as &mut dyn NativeDisplayConnection);
                dispatcher.collect(display).map_err(ControllerError::Display)?
            }
            None => Vec::new(),
        };
        for event in events {
            match self.on_output_size_changed(event.output, event.width, event.height) {
                Err(e) if e.is_not_implemented() => continue,
                other => other?,
            }
        }

        loop {
            let received = if let Some(device) = &mut self.device {
                device.try_recv()
            } else if let Some(proxy) = self.route.as_mut().and_then(WidgetRoute::remote_mut) {
                proxy.host_mut().try_recv()
            } else {
                return Ok(());
            };

            match received.map_err(ControllerError::Channel)? {
                Received::Empty => return Ok(()),
                Received::PeerGone => {
                    self.on_channel_peer_destroyed();
                    return Ok(());
                }
                Received::Message(message) => {
                    trace!("DisplayController: received {:?}", message);
                    if self.device.is_some() {
                        self.handle_device_message(message)?;
                    } else {
                        self.handle_host_message(message);
                    }
                }
            }
        }
    }

    fn handle_device_message(&mut self, message: ChannelMessage) -> ControllerResult<()> {
        match message {
            ChannelMessage::Establish => {
                if let Some(device) = &mut self.device {
                    device.register().map_err(ControllerError::Channel)?;
                }
            }
            ChannelMessage::Established { peer_id } => self.on_channel_established(peer_id),
            ChannelMessage::WidgetState {
                widget,
                state,
                width,
                height,
            } => self.apply_remote_widget_state(widget, state, width, height)?,
            ChannelMessage::Closed => self.on_channel_closed(),
            other => warn!("GPU process ignoring unexpected {:?}", other),
        }
        Ok(())
    }

    /// Runs a browser command against the local widgets and reports back
    /// the state the widget ended up in.
    fn apply_remote_widget_state(
        &mut self,
        widget: WidgetId,
        state: WidgetStateKind,
        width: u32,
        height: u32,
    ) -> ControllerResult<()> {
        let route = self.ensure_initialized();
        if let Err(e) = route.ops_mut().apply_state(widget, state, width, height) {
            warn!("Browser command {:?} for widget {} failed: {}", state, widget, e);
            return Ok(());
        }

        let bounds = route
            .local()
            .and_then(|owner| owner.widget(widget))
            .map(Widget::bounds)
            .unwrap_or_default();
        if let Some(device) = &mut self.device {
            device
                .send_widget_state(widget, state, bounds.width, bounds.height)
                .map_err(ControllerError::Channel)?;
        }
        Ok(())
    }

    fn handle_host_message(&mut self, message: ChannelMessage) {
        match message {
            ChannelMessage::Register {
                peer_id,
                display_fd,
            } => {
                debug!("GPU process {} registered (display fd {:?})", peer_id, display_fd);
                self.on_channel_established(peer_id);
            }
            ChannelMessage::OutputSizeChanged { width, height } => {
                self.on_output_size_changed_local(width, height)
            }
            ChannelMessage::WidgetState {
                widget,
                state,
                width,
                height,
            } => {
                if let Some(proxy) = self.route.as_mut().and_then(WidgetRoute::remote_mut) {
                    proxy.record_confirmation(widget, state, width, height);
                }
            }
            ChannelMessage::Closed => self.on_channel_closed(),
            other => warn!("Browser process ignoring unexpected {:?}", other),
        }
    }

    /// The embedder's event loop is going away. Stops the poll thread and
    /// leaves everything else in place.
    pub fn on_event_loop_destroyed(&mut self) {
        if let Some(dispatcher) = &mut self.dispatcher {
            dispatcher.stop();
        }
    }

    // --- Accessors ---

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Readiness recorded by the last `initialize_hardware`.
    pub fn hardware_state(&self) -> Option<HardwareState> {
        self.hardware
    }

    /// The native display connection, when this role holds one.
    pub fn native_display(&self) -> Option<&dyn NativeDisplayConnection> {
        self.display.as_deref()
    }

    pub fn is_dispatcher_polling(&self) -> bool {
        self.dispatcher.as_ref().is_some_and(Dispatcher::is_polling)
    }

    /// A locally owned widget.
    pub fn widget(&self, id: WidgetId) -> Option<&Widget> {
        self.route.as_ref()?.local()?.widget(id)
    }

    pub fn local_widget_count(&self) -> usize {
        self.route
            .as_ref()
            .and_then(WidgetRoute::local)
            .map_or(0, |owner| owner.registry().len())
    }

    pub fn is_proxying_widgets(&self) -> bool {
        self.route.as_ref().is_some_and(WidgetRoute::is_remote)
    }

    /// Last state the GPU process confirmed for a proxied widget.
    pub fn confirmed_widget_state(&self, id: WidgetId) -> Option<ConfirmedState> {
        self.route.as_ref()?.remote()?.confirmed(id)
    }

    /// Host-side messages waiting for the channel.
    pub fn queued_channel_messages(&self) -> usize {
        self.route
            .as_ref()
            .and_then(WidgetRoute::remote)
            .map_or(0, |proxy| proxy.host().queued_len())
    }
}

impl Drop for DisplayController {
    fn drop(&mut self) {
        self.terminate();
    }
}
