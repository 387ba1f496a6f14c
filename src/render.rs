pub mod backend;

/// Rendering backends for the mosaic engine.
pub mod backends {
    /// Software rasterizer producing RGBA8 pixels
    pub mod cpu;
    pub mod null;
}

mod compositor;
pub mod export;
mod placement;
mod presenter;
mod render_list;
mod viewport;

pub use compositor::{
    face_scale_factor, instance_transform, layout_instances, CompositionParameters,
    MosaicCompositor,
};
pub use placement::{Placement, PlacementRng};
pub use presenter::{fit_canvas, CanvasPresenter, Letterbox};
pub use render_list::*;
pub use viewport::Viewport;
