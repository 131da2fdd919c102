//! Headless scripted display server and connection.
//!
//! `HeadlessServer` plays the display server: it owns the output list and
//! pushes output changes to every connection opened through its connector.
//! Each connection gets a real socket descriptor that becomes readable when
//! the server has something for it, so the dispatcher poll loop works
//! against it unchanged.

use crate::display::connection::{
    DisplayConnector, NativeDisplayConnection, OutputEvent, OutputId, RegistrationMode,
};
use crate::geometry::Rect;
use crate::widget::{RenderHandle, WidgetId};
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, trace, warn};
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Surface handles start here so they never look like widget ids in logs.
const SURFACE_HANDLE_BASE: u64 = 0x1000;

struct ClientLink {
    events: Sender<OutputEvent>,
    wake: UnixStream,
}

struct ServerState {
    outputs: BTreeMap<OutputId, Rect>,
    primary: OutputId,
    reachable: bool,
    announce_after: usize,
    clients: Vec<ClientLink>,
    connections_opened: usize,
    surfaces_created: u64,
}

/// Shared handle to the scripted server.
#[derive(Clone)]
pub struct HeadlessServer {
    state: Arc<Mutex<ServerState>>,
}

impl Default for HeadlessServer {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessServer {
    /// A reachable server with no outputs yet.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState {
                outputs: BTreeMap::new(),
                primary: OutputId::PRIMARY,
                reachable: true,
                announce_after: 1,
                clients: Vec::new(),
                connections_opened: 0,
                surfaces_created: 0,
            })),
        }
    }

    /// A server whose primary output has the given size.
    pub fn with_primary_output(width: u32, height: u32) -> Self {
        let server = Self::new();
        server.lock().outputs.insert(OutputId::PRIMARY, Rect::from_size(width, height));
        server
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connector(&self) -> HeadlessConnector {
        HeadlessConnector {
            server: self.clone(),
        }
    }

    /// Refuse new connections.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// How many round trips a new connection needs before outputs are
    /// announced to it. Models a slow server.
    pub fn announce_after_roundtrips(&self, roundtrips: usize) {
        self.lock().announce_after = roundtrips;
    }

    /// Adds a secondary output and returns its id.
    pub fn add_output(&self, width: u32, height: u32) -> OutputId {
        let mut state = self.lock();
        let id = OutputId(state.outputs.keys().next_back().map_or(0, |last| last.0 + 1));
        state.outputs.insert(id, Rect::from_size(width, height));
        id
    }

    /// Changes an output's size and notifies every live connection.
    pub fn set_output_size(&self, output: OutputId, width: u32, height: u32) {
        let mut state = self.lock();
        state.outputs.insert(output, Rect::from_size(width, height));
        let event = OutputEvent {
            output,
            width,
            height,
        };
        state.clients.retain_mut(|client| {
            if client.events.send(event).is_err() {
                return false;
            }
            match client.wake.write(&[1]) {
                Ok(_) => true,
                Err(e) if e.kind() == ErrorKind::WouldBlock => true,
                Err(e) => {
                    debug!("HeadlessServer: dropping client: {}", e);
                    false
                }
            }
        });
        info!(
            "HeadlessServer: output {:?} is now {}x{} ({} client(s) notified)",
            output,
            width,
            height,
            state.clients.len()
        );
    }

    pub fn connections_opened(&self) -> usize {
        self.lock().connections_opened
    }

    pub fn surfaces_created(&self) -> u64 {
        self.lock().surfaces_created
    }

    fn open(&self, mode: RegistrationMode) -> Result<HeadlessConnection> {
        let mut state = self.lock();
        if !state.reachable {
            bail!("headless display server is unreachable");
        }

        let (server_end, client_end) =
            UnixStream::pair().context("Failed to create headless display socket")?;
        server_end
            .set_nonblocking(true)
            .context("Failed to configure headless server socket")?;
        client_end
            .set_nonblocking(true)
            .context("Failed to configure headless client socket")?;

        let (events_tx, events_rx) = mpsc::channel();
        state.clients.push(ClientLink {
            events: events_tx,
            wake: server_end,
        });
        state.connections_opened += 1;
        debug!(
            "HeadlessServer: connection {} opened ({:?})",
            state.connections_opened, mode
        );

        Ok(HeadlessConnection {
            server: self.clone(),
            mode,
            socket: client_end,
            events: events_rx,
            outputs: BTreeMap::new(),
            primary: None,
            roundtrips: 0,
            announce_after: state.announce_after,
        })
    }
}

/// Opens connections to a `HeadlessServer`.
#[derive(Clone)]
pub struct HeadlessConnector {
    server: HeadlessServer,
}

impl DisplayConnector for HeadlessConnector {
    fn connect(&self, mode: RegistrationMode) -> Result<Box<dyn NativeDisplayConnection>> {
        let mut connection = self.server.open(mode)?;
        if mode == RegistrationMode::RegisterAsNeeded {
            // Full connections bind their globals before returning.
            connection.roundtrip()?;
        }
        Ok(Box::new(connection))
    }
}

pub struct HeadlessConnection {
    server: HeadlessServer,
    mode: RegistrationMode,
    socket: UnixStream,
    events: Receiver<OutputEvent>,
    outputs: BTreeMap<OutputId, Rect>,
    primary: Option<OutputId>,
    roundtrips: usize,
    announce_after: usize,
}

impl HeadlessConnection {
    fn drain_wakeups(&mut self) -> Result<()> {
        let mut buf = [0u8; 64];
        loop {
            match self.socket.read(&mut buf) {
                Ok(0) => return Err(anyhow!("headless display server went away")),
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("Failed to read headless display socket"),
            }
        }
    }

    fn drain_events(&mut self) -> Vec<OutputEvent> {
        let events: Vec<OutputEvent> = self.events.try_iter().collect();
        for event in &events {
            self.outputs
                .insert(event.output, Rect::from_size(event.width, event.height));
        }
        events
    }
}

impl NativeDisplayConnection for HeadlessConnection {
    fn primary_output(&self) -> Option<OutputId> {
        self.primary
    }

    fn output_geometry(&self, output: OutputId) -> Option<Rect> {
        self.outputs.get(&output).copied()
    }

    fn display_fd(&self) -> Option<RawFd> {
        Some(self.socket.as_raw_fd())
    }

    fn roundtrip(&mut self) -> Result<()> {
        self.roundtrips += 1;
        self.drain_wakeups()?;
        self.drain_events();
        if self.roundtrips >= self.announce_after {
            let state = self.server.lock();
            self.outputs = state.outputs.clone();
            if state.outputs.contains_key(&state.primary) {
                self.primary = Some(state.primary);
            }
        }
        trace!(
            "HeadlessConnection: roundtrip {} ({} output(s) known)",
            self.roundtrips,
            self.outputs.len()
        );
        Ok(())
    }

    fn dispatch_pending(&mut self) -> Result<Vec<OutputEvent>> {
        self.drain_wakeups()?;
        Ok(self.drain_events())
    }

    fn create_surface(&mut self, widget: WidgetId, bounds: Rect) -> Result<RenderHandle> {
        if self.mode == RegistrationMode::RegisterOutputOnly {
            bail!("output-only connection cannot create surfaces");
        }
        let mut state = self.server.lock();
        state.surfaces_created += 1;
        let handle = RenderHandle::new(SURFACE_HANDLE_BASE + state.surfaces_created)
            .ok_or_else(|| anyhow!("surface handle overflow"))?;
        debug!(
            "HeadlessConnection: surface {} for widget {} at {}",
            handle, widget, bounds
        );
        Ok(handle)
    }
}

impl Drop for HeadlessConnection {
    fn drop(&mut self) {
        if self.mode == RegistrationMode::RegisterOutputOnly && self.primary.is_none() {
            warn!("HeadlessConnection: output-only connection closed before outputs were known");
        }
        debug!(
            "HeadlessConnection ({:?}) closed after {} roundtrip(s)",
            self.mode, self.roundtrips
        );
    }
}
