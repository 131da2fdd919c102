// src/display/screen.rs
//! Desktop screen: the layout-side consumer of primary output geometry.

use crate::geometry::Rect;
use log::info;

#[derive(Debug, Default)]
pub struct DesktopScreen {
    geometry: Rect,
}

impl DesktopScreen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_geometry(&mut self, geometry: Rect) {
        if geometry != self.geometry {
            info!("DesktopScreen: geometry {} -> {}", self.geometry, geometry);
        }
        self.geometry = geometry;
    }

    /// Empty until the primary output has been reported.
    pub fn geometry(&self) -> Rect {
        self.geometry
    }
}
