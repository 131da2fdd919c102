// src/controller/probe.rs
//! Look-ahead probe for primary output geometry.
//!
//! Layout code may ask for the desktop screen before the process's own
//! connection has reported any output. The probe opens a throwaway
//! output-only connection and round-trips it until the primary output has
//! a size, giving up after the configured timeout or when cancelled.

use crate::config::ProbeConfig;
use crate::display::{DisplayConnector, RegistrationMode};
use crate::error::{ControllerError, ControllerResult};
use crate::geometry::Rect;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Cancels a running probe from another thread.
#[derive(Debug, Clone, Default)]
pub struct ProbeCancel {
    flag: Arc<AtomicBool>,
}

impl ProbeCancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Re-arms the flag for the next probe.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Blocks until the primary output reports a non-empty geometry.
pub fn look_ahead_output_geometry(
    connector: &dyn DisplayConnector,
    config: &ProbeConfig,
    cancel: &ProbeCancel,
) -> ControllerResult<Rect> {
    let started = Instant::now();
    let deadline = started + config.timeout();

    let mut connection = connector
        .connect(RegistrationMode::RegisterOutputOnly)
        .map_err(ControllerError::Display)?;

    let mut roundtrips = 0u32;
    loop {
        if cancel.is_cancelled() {
            info!("Output geometry probe cancelled after {} roundtrip(s)", roundtrips);
            return Err(ControllerError::ProbeCancelled);
        }

        connection.roundtrip().map_err(ControllerError::Display)?;
        roundtrips += 1;

        if let Some(geometry) = connection.primary_geometry().filter(|g| !g.is_empty()) {
            debug!(
                "Output geometry probe: primary output {} after {} roundtrip(s) in {:?}",
                geometry,
                roundtrips,
                started.elapsed()
            );
            return Ok(geometry);
        }

        if Instant::now() >= deadline {
            warn!(
                "Output geometry probe gave up after {} roundtrip(s)",
                roundtrips
            );
            return Err(ControllerError::ProbeTimedOut(config.timeout()));
        }

        let interval = config.retry_interval();
        if interval.is_zero() {
            thread::yield_now();
        } else {
            thread::sleep(interval);
        }
    }
}
