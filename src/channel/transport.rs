// src/channel/transport.rs
//! Transports carrying `ChannelMessage`s between processes.
//!
//! Both transports are FIFO per direction and never block.
//! - `MemoryTransport`: an mpsc pair, for in-process peers and tests
//! - `StreamTransport`: newline-delimited JSON over a Unix stream socket.
//!   Bytes the socket cannot take yet stay in an outbox that every later
//!   `send` or `try_recv` keeps writing out.

use super::messages::{ChannelMessage, Received};
use crate::role::ProcessRole;
use anyhow::{anyhow, Context, Result};
use log::{debug, trace};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

/// A reliable, ordered, message-passing link to the peer process.
pub trait ChannelTransport: Send {
    /// Queues a message for the peer. Never waits for the peer to read it.
    fn send(&mut self, message: ChannelMessage) -> Result<()>;

    /// Returns the next pending message, if any.
    fn try_recv(&mut self) -> Result<Received>;
}

/// Hands the controller a transport each time it initializes a role that
/// needs one.
pub trait ChannelConnector {
    fn connect(&mut self, role: ProcessRole) -> Result<Box<dyn ChannelTransport>>;
}

impl<F> ChannelConnector for F
where
    F: FnMut(ProcessRole) -> Result<Box<dyn ChannelTransport>>,
{
    fn connect(&mut self, role: ProcessRole) -> Result<Box<dyn ChannelTransport>> {
        self(role)
    }
}

/// Connector holding a single, already connected transport.
pub struct OneShotConnector {
    transport: Option<Box<dyn ChannelTransport>>,
}

impl OneShotConnector {
    pub fn new(transport: impl ChannelTransport + 'static) -> Self {
        Self {
            transport: Some(Box::new(transport)),
        }
    }
}

impl ChannelConnector for OneShotConnector {
    fn connect(&mut self, role: ProcessRole) -> Result<Box<dyn ChannelTransport>> {
        debug!("OneShotConnector: handing transport to the {} role", role);
        self.transport
            .take()
            .ok_or_else(|| anyhow!("channel transport already handed out"))
    }
}

/// Connector for processes that never talk to a peer.
#[derive(Debug, Default)]
pub struct NoChannel;

impl ChannelConnector for NoChannel {
    fn connect(&mut self, role: ProcessRole) -> Result<Box<dyn ChannelTransport>> {
        Err(anyhow!("no channel transport configured for the {} role", role))
    }
}

// --- In-memory transport ---

pub struct MemoryTransport {
    tx: Sender<ChannelMessage>,
    rx: Receiver<ChannelMessage>,
}

impl MemoryTransport {
    /// Two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }
}

impl ChannelTransport for MemoryTransport {
    fn send(&mut self, message: ChannelMessage) -> Result<()> {
        trace!("MemoryTransport: send {:?}", message);
        self.tx
            .send(message)
            .map_err(|e| anyhow!("peer dropped before {:?} was sent", e.0))
    }

    fn try_recv(&mut self) -> Result<Received> {
        match self.rx.try_recv() {
            Ok(message) => Ok(Received::Message(message)),
            Err(TryRecvError::Empty) => Ok(Received::Empty),
            Err(TryRecvError::Disconnected) => Ok(Received::PeerGone),
        }
    }
}

// --- Unix stream transport ---

const READ_CHUNK_SIZE: usize = 4096;

pub struct StreamTransport {
    stream: UnixStream,
    inbox: Vec<u8>,
    outbox: Vec<u8>,
    peer_gone: bool,
}

impl StreamTransport {
    pub fn new(stream: UnixStream) -> Result<Self> {
        stream
            .set_nonblocking(true)
            .context("Failed to make channel socket non-blocking")?;
        Ok(Self {
            stream,
            inbox: Vec::with_capacity(READ_CHUNK_SIZE),
            outbox: Vec::new(),
            peer_gone: false,
        })
    }

    /// Two connected ends over a socket pair.
    pub fn pair() -> Result<(Self, Self)> {
        let (a, b) = UnixStream::pair().context("Failed to create channel socket pair")?;
        Ok((Self::new(a)?, Self::new(b)?))
    }

    fn take_line(&mut self) -> Result<Option<ChannelMessage>> {
        let Some(end) = self.inbox.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let line: Vec<u8> = self.inbox.drain(..=end).collect();
        let message = serde_json::from_slice(&line[..end])
            .with_context(|| format!("Malformed channel message: {}", String::from_utf8_lossy(&line)))?;
        Ok(Some(message))
    }

    /// Writes as much of the outbox as the socket accepts right now. A
    /// broken socket discards whatever is left.
    fn flush_outbox(&mut self) -> Result<()> {
        let mut written = 0;
        while written < self.outbox.len() {
            match self.stream.write(&self.outbox[written..]) {
                Ok(0) => {
                    self.outbox.clear();
                    return Err(anyhow!("channel socket closed while writing"));
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.outbox.clear();
                    return Err(e).context("Failed to write to channel socket");
                }
            }
        }
        self.outbox.drain(..written);
        if !self.outbox.is_empty() {
            trace!("StreamTransport: {} byte(s) wait for the peer to read", self.outbox.len());
        }
        Ok(())
    }

    /// Bytes queued for the peer that the socket has not taken yet.
    pub fn unsent_len(&self) -> usize {
        self.outbox.len()
    }
}

impl ChannelTransport for StreamTransport {
    fn send(&mut self, message: ChannelMessage) -> Result<()> {
        let mut line = serde_json::to_vec(&message).context("Failed to encode channel message")?;
        line.push(b'\n');
        trace!("StreamTransport: send {} bytes", line.len());
        self.outbox.extend_from_slice(&line);
        self.flush_outbox()
    }

    fn try_recv(&mut self) -> Result<Received> {
        // A peer that hung up is reported by the read below.
        if let Err(e) = self.flush_outbox() {
            debug!("StreamTransport: dropping unsent bytes: {:#}", e);
        }
        if let Some(message) = self.take_line()? {
            return Ok(Received::Message(message));
        }
        if self.peer_gone {
            return Ok(Received::PeerGone);
        }

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    debug!("StreamTransport: peer closed the socket");
                    self.peer_gone = true;
                    break;
                }
                Ok(n) => self.inbox.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                    debug!("StreamTransport: peer reset the socket");
                    self.peer_gone = true;
                    break;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("Failed to read from channel socket"),
            }
        }

        match self.take_line()? {
            Some(message) => Ok(Received::Message(message)),
            None if self.peer_gone => Ok(Received::PeerGone),
            None => Ok(Received::Empty),
        }
    }
}
