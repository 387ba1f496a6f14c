//! Render list and display items.
//!
//! The compositor does not rasterize directly. A layout pass first turns the face set and
//! the composition parameters into a [`RenderList`]: one clear followed by one
//! [`DisplayItem::Stamp`] per face instance, each carrying its model transform and atlas
//! UV rectangle. A backend then executes the whole list with one shared draw routine.
//!
//! # Example
//!
//! ```rust
//! use face_mosaic::render::{Color, DisplayItem, RenderList};
//!
//! let mut list = RenderList::new();
//! list.add_command(DisplayItem::Clear { color: Color::from_u8(0, 0, 0, 255) });
//! assert_eq!(list.stamp_count(), 0);
//! ```

use kurbo::Affine;
use serde::{Deserialize, Serialize};

use crate::assets::UvRect;
use crate::engine::FaceId;

/// RGBA color used for drawing commands.
///
/// Channels are represented as `f32` in the range `0.0 ..= 1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    /// Red channel
    pub r: f32,
    /// Green channel
    pub g: f32,
    /// Blue channel
    pub b: f32,
    /// Alpha channel (opacity)
    pub a: f32,
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };

    pub const TRANSPARENT: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };

    /// Creates a new color from `f32` channel values in the range `0.0 ..= 1.0`.
    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Color {
        Color { r, g, b, a }
    }

    /// Creates a new color from `u8` channel values in the range `0 ..= 255`.
    pub fn from_u8(r: u8, g: u8, b: u8, a: u8) -> Color {
        Color {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
            a: a as f32 / 255.0,
        }
    }

    /// Returns the color as RGBA8, clamping out-of-range channels.
    pub fn to_rgba8(&self) -> [u8; 4] {
        [
            channel_u8(self.r),
            channel_u8(self.g),
            channel_u8(self.b),
            channel_u8(self.a),
        ]
    }
}

fn channel_u8(c: f32) -> u8 {
    if c.is_nan() {
        return 0;
    }
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// A single display item representing a drawing command.
#[derive(Clone, Debug, PartialEq)]
pub enum DisplayItem {
    /// Clear the entire surface with the given color.
    Clear {
        /// The color to clear the surface with.
        color: Color,
    },

    /// Draw one instance of a face from the atlas.
    Stamp {
        /// Face this instance belongs to
        face: FaceId,
        /// Maps square texture space `(0..side, 0..side)` into canvas pixels
        transform: Affine,
        /// Location of the face inside the atlas
        uv: UvRect,
        /// Side of the square face raster, in texels
        side: u32,
    },
}

/// A list of display items to be rendered.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderList {
    /// Sequence of drawing commands to execute.
    pub items: Vec<DisplayItem>,
}

impl RenderList {
    /// Creates a new, empty render list.
    pub fn new() -> Self {
        RenderList { items: Vec::new() }
    }

    /// Adds a new display item (drawing command) to the list.
    pub fn add_command(&mut self, command: DisplayItem) {
        self.items.push(command);
    }

    /// Clears all display items from the list.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Number of face instances in the list.
    pub fn stamp_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item, DisplayItem::Stamp { .. }))
            .count()
    }
}
