// src/display/connection.rs
//! NativeDisplayConnection trait - the controller's view of a display server
//! client.
//!
//! ## Lifecycle
//! 1. `DisplayConnector::connect(mode)` - open the connection
//! 2. `roundtrip()` / `dispatch_pending()` - learn and track outputs
//! 3. `create_surface()` - realize widgets (full connections only)
//! 4. `Drop` - disconnect

use crate::geometry::Rect;
use crate::widget::{RenderHandle, WidgetId};
use anyhow::Result;
use std::os::unix::io::RawFd;

/// What a connection subscribes to when it binds server globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationMode {
    /// Everything the controller needs: outputs, surfaces, input.
    RegisterAsNeeded,
    /// Outputs only. Used by the look-ahead probe.
    RegisterOutputOnly,
}

/// Identifier of one output (monitor) as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub u32);

impl OutputId {
    /// Output assumed primary when no connection can say otherwise.
    pub const PRIMARY: OutputId = OutputId(0);
}

/// An output changed size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputEvent {
    pub output: OutputId,
    pub width: u32,
    pub height: u32,
}

/// A live connection to the display server.
pub trait NativeDisplayConnection {
    /// The output treated as canonical for geometry reporting, once known.
    fn primary_output(&self) -> Option<OutputId>;

    /// Geometry of `output`, if the server has announced it.
    fn output_geometry(&self, output: OutputId) -> Option<Rect>;

    fn primary_geometry(&self) -> Option<Rect> {
        self.primary_output()
            .and_then(|output| self.output_geometry(output))
    }

    /// Descriptor that becomes readable when the server sends events.
    fn display_fd(&self) -> Option<RawFd>;

    /// Blocks until the server has processed every request sent so far and
    /// the replies have been applied.
    fn roundtrip(&mut self) -> Result<()>;

    /// Reads whatever events are pending without blocking and returns the
    /// output changes among them.
    fn dispatch_pending(&mut self) -> Result<Vec<OutputEvent>>;

    /// Creates the rendering surface backing a realized widget.
    fn create_surface(&mut self, widget: WidgetId, bounds: Rect) -> Result<RenderHandle>;
}

/// Opens native connections. The controller opens one per initialization
/// plus a throwaway one for the look-ahead probe.
pub trait DisplayConnector {
    fn connect(&self, mode: RegistrationMode) -> Result<Box<dyn NativeDisplayConnection>>;
}
