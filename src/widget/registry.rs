// src/widget/registry.rs
//! Owning map of the widgets materialized by this process.

use super::{RenderHandle, Widget, WidgetId};
use log::{debug, warn};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct WidgetRegistry {
    widgets: BTreeMap<WidgetId, Widget>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a widget. A widget already stored under the same id is replaced
    /// and returned.
    pub fn insert(&mut self, widget: Widget) -> Option<Widget> {
        let id = widget.id();
        let previous = self.widgets.insert(id, widget);
        if previous.is_some() {
            warn!("WidgetRegistry: widget {} created twice, replacing it", id);
        }
        previous
    }

    pub fn lookup(&self, id: WidgetId) -> Option<&Widget> {
        self.widgets.get(&id)
    }

    pub fn lookup_mut(&mut self, id: WidgetId) -> Option<&mut Widget> {
        self.widgets.get_mut(&id)
    }

    /// Linear scan for the widget realized with `handle`.
    pub fn find_by_handle_mut(&mut self, handle: RenderHandle) -> Option<&mut Widget> {
        self.widgets
            .values_mut()
            .find(|widget| widget.render_handle() == Some(handle))
    }

    /// Destroys every widget. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.widgets.len();
        self.widgets.clear();
        if count > 0 {
            debug!("WidgetRegistry: destroyed {} widget(s)", count);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.widgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = WidgetId> + '_ {
        self.widgets.keys().copied()
    }
}
