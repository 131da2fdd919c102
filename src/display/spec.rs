// src/display/spec.rs
//! Bounded `"<width>x<height>*<scale>"` description of the primary output.

use log::debug;

#[derive(Debug, Clone)]
pub struct DisplaySpec {
    text: String,
    capacity: usize,
    scale: u32,
}

impl DisplaySpec {
    /// Empty spec. `capacity` counts a terminator, as the consumers of this
    /// string expect a fixed-size C buffer.
    pub fn new(capacity: usize, scale: u32) -> Self {
        Self {
            text: String::with_capacity(capacity),
            capacity,
            scale,
        }
    }

    /// Rewrites the spec for a new primary output size. Output longer than
    /// the buffer is truncated.
    pub fn update(&mut self, width: u32, height: u32) {
        self.text = format!("{}x{}*{}", width, height, self.scale);
        self.text.truncate(self.capacity.saturating_sub(1));
        debug!("DisplaySpec: {}", self.text);
    }

    /// The spec, or `None` before the first update.
    pub fn as_str(&self) -> Option<&str> {
        (!self.text.is_empty()).then_some(self.text.as_str())
    }

    pub fn is_known(&self) -> bool {
        !self.text.is_empty()
    }
}
