//! Viewport definition for presenting the canvas.
//!
//! A [`Viewport`] is the host window area the canvas is shown in. It is defined by its
//! top-left corner `(x, y)` and its `width`/`height` in pixels.
//!
//! # Examples
//!
//! ```
//! use face_mosaic::render::Viewport;
//!
//! let mut vp = Viewport::new(0, 0, 800, 600);
//! vp.resize(1024, 768);
//! assert_eq!(vp.width, 1024);
//! assert_eq!(vp.height, 768);
//! ```

use serde::{Deserialize, Serialize};

/// Represents the viewport the canvas is presented in.
#[derive(Clone, Eq, PartialEq, Copy, Default, Serialize, Deserialize)]
pub struct Viewport {
    /// Horizontal offset in pixels from the origin.
    pub x: i32,

    /// Vertical offset in pixels from the origin.
    pub y: i32,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,
}

impl std::fmt::Debug for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Viewport {{ x: {}, y: {}, width: {}, height: {} }}",
            self.x, self.y, self.width, self.height
        )
    }
}

impl Viewport {
    /// Creates a new [`Viewport`] with the given position and size.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Resizes the viewport to the given width and height.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }
}
