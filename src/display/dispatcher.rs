// src/display/dispatcher.rs

//! Dispatcher - turns display server traffic into output events for the
//! controller.
//!
//! Two modes:
//! - in-process: the controller's `pump()` reads the connection directly
//!   (single-process and browser roles)
//! - fd-bound: a background thread `poll(2)`s the display descriptor and
//!   signals readiness; the controller then reads the connection on its own
//!   thread (GPU role)
//!
//! The poll thread never touches the connection itself. After signalling
//! readiness it waits for the controller's acknowledgement, so a level
//! triggered descriptor does not make it spin.

use super::connection::{NativeDisplayConnection, OutputEvent};
use anyhow::{Context, Result};
use log::*;
use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Background poll loop bound to a display descriptor.
struct PollLoop {
    ready_rx: Receiver<()>,
    ack_tx: Option<Sender<()>>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

pub struct Dispatcher {
    fd: Option<RawFd>,
    queued: VecDeque<OutputEvent>,
    poll_loop: Option<PollLoop>,
}

impl Dispatcher {
    /// Dispatcher driven entirely by the controller's thread.
    pub fn in_process() -> Self {
        debug!("Dispatcher: in-process");
        Self {
            fd: None,
            queued: VecDeque::new(),
            poll_loop: None,
        }
    }

    /// Dispatcher bound to a display descriptor. Call `post_poll_task` to
    /// start watching it.
    pub fn with_fd(fd: RawFd) -> Self {
        debug!("Dispatcher: bound to fd {}", fd);
        Self {
            fd: Some(fd),
            queued: VecDeque::new(),
            poll_loop: None,
        }
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.fd
    }

    pub fn is_polling(&self) -> bool {
        self.poll_loop.is_some()
    }

    /// Schedules the poll loop on a background thread. No-op when already
    /// running or when the dispatcher has no descriptor.
    pub fn post_poll_task(&mut self, poll_timeout_ms: u32) -> Result<()> {
        let Some(fd) = self.fd else {
            debug!("Dispatcher: no descriptor, nothing to poll");
            return Ok(());
        };
        if self.poll_loop.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = mpsc::channel();
        let (ack_tx, ack_rx) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);

        let thread_handle = thread::Builder::new()
            .name("display-dispatcher".to_string())
            .spawn(move || {
                if let Err(e) =
                    Self::poll_thread_main(fd, poll_timeout_ms, thread_running, ready_tx, ack_rx)
                {
                    error!("Dispatcher poll thread error: {:#}", e);
                }
            })
            .context("Failed to spawn dispatcher poll thread")?;

        info!("Dispatcher: polling fd {} on a background thread", fd);
        self.poll_loop = Some(PollLoop {
            ready_rx,
            ack_tx: Some(ack_tx),
            running,
            thread_handle: Some(thread_handle),
        });
        Ok(())
    }

    fn poll_thread_main(
        fd: RawFd,
        poll_timeout_ms: u32,
        running: Arc<AtomicBool>,
        ready_tx: Sender<()>,
        ack_rx: Receiver<()>,
    ) -> Result<()> {
        let timeout = poll_timeout_ms.min(i32::MAX as u32) as libc::c_int;
        let ack_wait = Duration::from_millis(u64::from(poll_timeout_ms.max(1)));

        while running.load(Ordering::Acquire) {
            let mut pfd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };
            let ready = unsafe { libc::poll(&mut pfd, 1, timeout) };
            if ready == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err).with_context(|| format!("poll failed on display fd {}", fd));
            }
            if ready == 0 {
                continue;
            }

            let hung_up = pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0;
            trace!("Dispatcher: fd {} revents {:#x}", fd, pfd.revents);
            if ready_tx.send(()).is_err() {
                debug!("Dispatcher: controller gone, stopping poll loop");
                return Ok(());
            }
            if hung_up {
                warn!("Dispatcher: display fd {} hung up, stopping poll loop", fd);
                return Ok(());
            }

            // Wait until the controller has read the descriptor.
            loop {
                match ack_rx.recv_timeout(ack_wait) {
                    Ok(()) => break,
                    Err(RecvTimeoutError::Timeout) if running.load(Ordering::Acquire) => continue,
                    Err(_) => return Ok(()),
                }
            }
        }
        debug!("Dispatcher: poll loop stopped");
        Ok(())
    }

    /// Queues an output event reported by a collaborator.
    pub fn post(&mut self, event: OutputEvent) {
        self.queued.push_back(event);
    }

    /// Collects pending output events. Reads `display` when the poll thread
    /// signalled readiness, or on every call when no poll thread runs.
    pub fn collect(
        &mut self,
        display: Option<&mut dyn NativeDisplayConnection>,
    ) -> Result<Vec<OutputEvent>> {
        let mut events: Vec<OutputEvent> = self.queued.drain(..).collect();
        let Some(display) = display else {
            return Ok(events);
        };

        match &self.poll_loop {
            Some(poll_loop) => {
                let mut signalled = false;
                loop {
                    match poll_loop.ready_rx.try_recv() {
                        Ok(()) => signalled = true,
                        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                    }
                }
                if signalled {
                    // The poll thread waits for this ack whether or not the read worked.
                    let dispatched = display.dispatch_pending();
                    if let Some(ack_tx) = &poll_loop.ack_tx {
                        let _ = ack_tx.send(());
                    }
                    events.extend(dispatched?);
                }
            }
            None => events.extend(display.dispatch_pending()?),
        }
        Ok(events)
    }

    /// Stops and joins the poll thread. The dispatcher keeps working in
    /// in-process mode afterwards.
    pub fn stop(&mut self) {
        let Some(mut poll_loop) = self.poll_loop.take() else {
            return;
        };
        poll_loop.running.store(false, Ordering::Release);
        poll_loop.ack_tx = None;
        if let Some(handle) = poll_loop.thread_handle.take() {
            if handle.join().is_err() {
                error!("Dispatcher poll thread panicked");
            }
        }
        info!("Dispatcher: poll loop joined");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
