// src/widget/mod.rs
//! On-screen widgets and the objects that own or proxy them.
//!
//! - `Widget`: one window, its bounds and visual state
//! - `WidgetRegistry`: owning id → widget map of the process that
//!   materializes windows
//! - `WidgetRoute`: local owner or remote proxy, chosen once per role

pub mod registry;
pub mod route;


pub use registry::WidgetRegistry;
pub use route::{ConfirmedState, LocalWidgetOwner, RemoteWidgetProxy, WidgetOps, WidgetRoute};

use crate::geometry::Rect;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;

/// Process-local widget identifier. Echoed verbatim across the channel so
/// the peer can correlate operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WidgetId(pub u32);

impl std::fmt::Display for WidgetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic id source. Never reset, so ids stay unique for the lifetime
/// of the process even across controller re-initialization. Ids are never
/// reused: once `u32::MAX` has been handed out, allocation fails.
#[derive(Debug, Default)]
pub struct WidgetIdAllocator {
    last: u32,
}

impl WidgetIdAllocator {
    pub fn allocate(&mut self) -> Option<WidgetId> {
        self.last = self.last.checked_add(1)?;
        Some(WidgetId(self.last))
    }

    #[cfg(test)]
    pub(crate) fn resuming_after(last: u32) -> Self {
        Self { last }
    }
}

/// Handle of a realized widget's rendering surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderHandle(NonZeroU64);

impl RenderHandle {
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for RenderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// What a resize request names: the allocated id, or the realized handle
/// some callers hold instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetTarget {
    Id(WidgetId),
    Handle(RenderHandle),
}

impl From<WidgetId> for WidgetTarget {
    fn from(id: WidgetId) -> Self {
        WidgetTarget::Id(id)
    }
}

impl From<RenderHandle> for WidgetTarget {
    fn from(handle: RenderHandle) -> Self {
        WidgetTarget::Handle(handle)
    }
}

/// Widget state change requests, local or proxied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WidgetStateKind {
    Create,
    Resize,
    Maximize,
    Minimize,
    Restore,
    FullScreen,
    Active,
    InActive,
    Show,
    Hide,
}

impl WidgetStateKind {
    /// Kinds with a handler. The rest are reported as not implemented.
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            WidgetStateKind::Create
                | WidgetStateKind::Resize
                | WidgetStateKind::Maximize
                | WidgetStateKind::Minimize
                | WidgetStateKind::Restore
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetKind {
    /// A top-level window on the native display.
    TopLevel,
    /// No native display behind it.
    Headless,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisualState {
    #[default]
    Normal,
    Maximized,
    Minimized,
}

/// One on-screen window.
#[derive(Debug)]
pub struct Widget {
    id: WidgetId,
    kind: WidgetKind,
    bounds: Rect,
    visual: VisualState,
    render_handle: Option<RenderHandle>,
}

impl Widget {
    pub fn new(id: WidgetId, kind: WidgetKind) -> Self {
        Self {
            id,
            kind,
            bounds: Rect::default(),
            visual: VisualState::Normal,
            render_handle: None,
        }
    }

    pub fn id(&self) -> WidgetId {
        self.id
    }

    pub fn kind(&self) -> WidgetKind {
        self.kind
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn visual_state(&self) -> VisualState {
        self.visual
    }

    pub fn render_handle(&self) -> Option<RenderHandle> {
        self.render_handle
    }

    /// Applies new bounds. Empty bounds are refused and leave the widget
    /// untouched.
    pub fn set_bounds(&mut self, bounds: Rect) -> bool {
        if bounds.is_empty() {
            warn!("Widget {}: refusing empty bounds {}", self.id, bounds);
            return false;
        }
        debug!("Widget {}: bounds {} -> {}", self.id, self.bounds, bounds);
        self.bounds = bounds;
        true
    }

    pub fn maximize(&mut self) {
        self.visual = VisualState::Maximized;
    }

    pub fn minimize(&mut self) {
        self.visual = VisualState::Minimized;
    }

    pub fn restore(&mut self) {
        self.visual = VisualState::Normal;
    }

    pub(crate) fn set_realized(&mut self, handle: RenderHandle) {
        debug!("Widget {} realized as {}", self.id, handle);
        self.render_handle = Some(handle);
    }
}
