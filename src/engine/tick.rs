use bitflags::bitflags;

use crate::render::backend::{ExternalHandle, SurfaceSize};
use crate::render::Letterbox;

bitflags! {
    /// Dirty flags define what needs to be processed on the next draw tick.
    #[derive(Default)]
    pub struct DirtyFlags: u8 {
        /// Canvas raster must be reallocated at the current canvas size
        const CANVAS_REBUILD    = 0b0001;
        /// Per-face scale factors are stale
        const SCALE_RECALC      = 0b0010;
        /// The stamping pass must be redone
        const COMPOSITE         = 0b0100;
        /// The letterbox transform for the viewport is stale
        const VIEWPORT_RELAYOUT = 0b1000;
    }
}

impl DirtyFlags {
    /// Flags raised by a face-set membership or readiness change.
    pub const FACE_SET: DirtyFlags = DirtyFlags::from_bits_truncate(
        DirtyFlags::SCALE_RECALC.bits() | DirtyFlags::COMPOSITE.bits(),
    );

    /// Flags raised by a canvas size change.
    pub const CANVAS_SIZE: DirtyFlags = DirtyFlags::from_bits_truncate(
        DirtyFlags::CANVAS_REBUILD.bits() | DirtyFlags::SCALE_RECALC.bits(),
    );
}

impl std::fmt::Display for DirtyFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();

        if self.contains(DirtyFlags::CANVAS_REBUILD) {
            parts.push("canvas");
        }
        if self.contains(DirtyFlags::SCALE_RECALC) {
            parts.push("scale");
        }
        if self.contains(DirtyFlags::COMPOSITE) {
            parts.push("composite");
        }
        if self.contains(DirtyFlags::VIEWPORT_RELAYOUT) {
            parts.push("viewport");
        }

        if parts.is_empty() {
            write!(f, "clean")
        } else {
            write!(f, "{}", parts.join("+"))
        }
    }
}

/// Work counters, so hosts and tests can observe what a tick actually did.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositorStats {
    pub composites: u64,
    pub canvas_rebuilds: u64,
    pub scale_recalcs: u64,
    pub relayouts: u64,
}

/// What a single compositor tick actually did.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickResult {
    /// The canvas surface was reallocated
    pub canvas_rebuilt: bool,
    /// The presenter must recompute its letterbox
    pub needs_relayout: bool,
    /// Number of stamped instances, when the canvas was recomposited
    pub composited: Option<usize>,
}

/// Result of one draw tick: what the host should display and where.
#[derive(Debug, Clone)]
pub struct PresentedCanvas {
    /// Incremented every time the canvas was recomposited
    pub frame_id: u64,
    /// Pixel size of the canvas raster
    pub canvas_size: SurfaceSize,
    /// Where the canvas goes inside the current viewport
    pub letterbox: Letterbox,
    /// True when this tick recomposited the canvas
    pub composited: bool,
    /// Backend handle to the canvas pixels, if the backend exposes one
    pub handle: Option<ExternalHandle>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_flags_display() {
        assert_eq!(DirtyFlags::empty().to_string(), "clean");
        assert_eq!(DirtyFlags::FACE_SET.to_string(), "scale+composite");
        assert_eq!(DirtyFlags::all().to_string(), "canvas+scale+composite+viewport");
    }

    #[test]
    fn canvas_size_flags_do_not_touch_viewport() {
        let flags = DirtyFlags::CANVAS_SIZE;
        assert!(flags.contains(DirtyFlags::CANVAS_REBUILD));
        assert!(flags.contains(DirtyFlags::SCALE_RECALC));
        assert!(!flags.contains(DirtyFlags::VIEWPORT_RELAYOUT));
        assert!(!flags.contains(DirtyFlags::COMPOSITE));
    }
}
