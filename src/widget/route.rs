// src/widget/route.rs
//! Where widget operations go: to widgets owned by this process, or across
//! the channel to the process that owns them.

use super::registry::WidgetRegistry;
use super::{RenderHandle, Widget, WidgetId, WidgetKind, WidgetStateKind, WidgetTarget};
use crate::channel::HostEndpoint;
use crate::display::NativeDisplayConnection;
use crate::error::{ControllerError, ControllerResult, Unimplemented};
use crate::geometry::Rect;
use log::{debug, trace, warn};
use std::collections::HashMap;

/// Handles beyond this base belong to widgets realized without a display.
const HEADLESS_HANDLE_BASE: u64 = 0x8000_0000;

/// The widget operation contract shared by both routes.
pub trait WidgetOps {
    fn create(&mut self, id: WidgetId) -> ControllerResult<()>;

    /// Resizes the target. Returns whether the widget accepted the bounds.
    fn resize(&mut self, target: WidgetTarget, bounds: Rect) -> ControllerResult<bool>;

    fn apply_state(
        &mut self,
        id: WidgetId,
        kind: WidgetStateKind,
        width: u32,
        height: u32,
    ) -> ControllerResult<()>;

    fn realize(
        &mut self,
        id: WidgetId,
        display: Option<&mut dyn NativeDisplayConnection>,
    ) -> ControllerResult<RenderHandle>;

    /// Destroys every widget this route owns.
    fn clear(&mut self) -> usize;
}

/// Owns widgets in this process.
#[derive(Debug)]
pub struct LocalWidgetOwner {
    registry: WidgetRegistry,
    kind: WidgetKind,
    headless_handles: u64,
}

impl LocalWidgetOwner {
    /// `kind` is given to every widget this owner creates.
    pub fn new(kind: WidgetKind) -> Self {
        Self {
            registry: WidgetRegistry::new(),
            kind,
            headless_handles: 0,
        }
    }

    pub fn registry(&self) -> &WidgetRegistry {
        &self.registry
    }

    pub fn widget(&self, id: WidgetId) -> Option<&Widget> {
        self.registry.lookup(id)
    }

    fn widget_mut(&mut self, id: WidgetId) -> ControllerResult<&mut Widget> {
        self.registry
            .lookup_mut(id)
            .ok_or(ControllerError::UnknownWidget(id))
    }
}

impl WidgetOps for LocalWidgetOwner {
    fn create(&mut self, id: WidgetId) -> ControllerResult<()> {
        debug!("LocalWidgetOwner: creating {:?} widget {}", self.kind, id);
        self.registry.insert(Widget::new(id, self.kind));
        Ok(())
    }

    fn resize(&mut self, target: WidgetTarget, bounds: Rect) -> ControllerResult<bool> {
        let widget = match target {
            WidgetTarget::Id(id) => self
                .registry
                .lookup_mut(id)
                .ok_or(ControllerError::UnknownWidget(id))?,
            WidgetTarget::Handle(handle) => self
                .registry
                .find_by_handle_mut(handle)
                .ok_or(ControllerError::UnknownHandle(handle))?,
        };
        Ok(widget.set_bounds(bounds))
    }

    fn apply_state(
        &mut self,
        id: WidgetId,
        kind: WidgetStateKind,
        width: u32,
        height: u32,
    ) -> ControllerResult<()> {
        match kind {
            WidgetStateKind::Create => self.create(id),
            WidgetStateKind::Maximize => {
                self.widget_mut(id)?.maximize();
                Ok(())
            }
            WidgetStateKind::Minimize => {
                self.widget_mut(id)?.minimize();
                Ok(())
            }
            WidgetStateKind::Restore => {
                self.widget_mut(id)?.restore();
                Ok(())
            }
            WidgetStateKind::Resize => {
                if !self.resize(WidgetTarget::Id(id), Rect::from_size(width, height))? {
                    debug!("Widget {} rejected resize to {}x{}", id, width, height);
                }
                Ok(())
            }
            WidgetStateKind::FullScreen
            | WidgetStateKind::Active
            | WidgetStateKind::InActive
            | WidgetStateKind::Show
            | WidgetStateKind::Hide => {
                warn!("Widget state {:?} is not implemented (widget {})", kind, id);
                Err(ControllerError::NotImplemented(Unimplemented::WidgetState(
                    kind,
                )))
            }
        }
    }

    fn realize(
        &mut self,
        id: WidgetId,
        display: Option<&mut dyn NativeDisplayConnection>,
    ) -> ControllerResult<RenderHandle> {
        let widget = self
            .registry
            .lookup_mut(id)
            .ok_or(ControllerError::UnknownWidget(id))?;
        if let Some(handle) = widget.render_handle() {
            return Ok(handle);
        }

        let handle = match (widget.kind(), display) {
            (WidgetKind::TopLevel, Some(display)) => display
                .create_surface(id, widget.bounds())
                .map_err(ControllerError::Display)?,
            _ => {
                self.headless_handles += 1;
                RenderHandle::new(HEADLESS_HANDLE_BASE + self.headless_handles)
                    .ok_or(ControllerError::UnknownWidget(id))?
            }
        };
        widget.set_realized(handle);
        Ok(handle)
    }

    fn clear(&mut self) -> usize {
        self.registry.clear()
    }
}

/// Last state the owning process confirmed for a proxied widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmedState {
    pub state: WidgetStateKind,
    pub width: u32,
    pub height: u32,
}

/// Forwards widget operations to the process that owns the widgets. Holds
/// no widgets itself.
pub struct RemoteWidgetProxy {
    host: HostEndpoint,
    confirmed: HashMap<WidgetId, ConfirmedState>,
}

impl RemoteWidgetProxy {
    pub fn new(host: HostEndpoint) -> Self {
        Self {
            host,
            confirmed: HashMap::new(),
        }
    }

    pub fn host(&self) -> &HostEndpoint {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut HostEndpoint {
        &mut self.host
    }

    /// Records a confirmation sent back by the owning process.
    pub fn record_confirmation(
        &mut self,
        id: WidgetId,
        state: WidgetStateKind,
        width: u32,
        height: u32,
    ) {
        trace!(
            "RemoteWidgetProxy: peer confirmed {} {:?} {}x{}",
            id,
            state,
            width,
            height
        );
        self.confirmed.insert(
            id,
            ConfirmedState {
                state,
                width,
                height,
            },
        );
    }

    pub fn confirmed(&self, id: WidgetId) -> Option<ConfirmedState> {
        self.confirmed.get(&id).copied()
    }

    fn send(
        &mut self,
        id: WidgetId,
        kind: WidgetStateKind,
        width: u32,
        height: u32,
    ) -> ControllerResult<()> {
        self.host
            .send_widget_state(id, kind, width, height)
            .map_err(ControllerError::Channel)
    }
}

impl WidgetOps for RemoteWidgetProxy {
    fn create(&mut self, id: WidgetId) -> ControllerResult<()> {
        self.send(id, WidgetStateKind::Create, 0, 0)
    }

    fn resize(&mut self, target: WidgetTarget, bounds: Rect) -> ControllerResult<bool> {
        match target {
            WidgetTarget::Id(id) => {
                self.send(id, WidgetStateKind::Resize, bounds.width, bounds.height)?;
                Ok(true)
            }
            // Render handles are never handed out on this side of the channel.
            WidgetTarget::Handle(handle) => Err(ControllerError::UnknownHandle(handle)),
        }
    }

    fn apply_state(
        &mut self,
        id: WidgetId,
        kind: WidgetStateKind,
        width: u32,
        height: u32,
    ) -> ControllerResult<()> {
        if !kind.is_supported() {
            warn!("Widget state {:?} is not implemented (widget {})", kind, id);
            return Err(ControllerError::NotImplemented(
                Unimplemented::WidgetState(kind),
            ));
        }
        self.send(id, kind, width, height)
    }

    fn realize(
        &mut self,
        id: WidgetId,
        _display: Option<&mut dyn NativeDisplayConnection>,
    ) -> ControllerResult<RenderHandle> {
        Err(ControllerError::UnknownWidget(id))
    }

    fn clear(&mut self) -> usize {
        self.confirmed.clear();
        0
    }
}

/// The route chosen when the controller resolves its role.
pub enum WidgetRoute {
    Local(LocalWidgetOwner),
    Remote(RemoteWidgetProxy),
}

impl WidgetRoute {
    pub fn ops_mut(&mut self) -> &mut dyn WidgetOps {
        match self {
            WidgetRoute::Local(owner) => owner,
            WidgetRoute::Remote(proxy) => proxy,
        }
    }

    pub fn local(&self) -> Option<&LocalWidgetOwner> {
        match self {
            WidgetRoute::Local(owner) => Some(owner),
            WidgetRoute::Remote(_) => None,
        }
    }

    pub fn remote(&self) -> Option<&RemoteWidgetProxy> {
        match self {
            WidgetRoute::Remote(proxy) => Some(proxy),
            WidgetRoute::Local(_) => None,
        }
    }

    pub fn remote_mut(&mut self) -> Option<&mut RemoteWidgetProxy> {
        match self {
            WidgetRoute::Remote(proxy) => Some(proxy),
            WidgetRoute::Local(_) => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, WidgetRoute::Remote(_))
    }
}
