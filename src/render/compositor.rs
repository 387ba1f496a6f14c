use std::f64::consts::TAU;

use kurbo::{Affine, Point};
use serde::{Deserialize, Serialize};

use crate::engine::{CompositorStats, DirtyFlags, FaceSet, TickResult};
use crate::render::backend::{ErasedSurface, RenderBackend, SurfaceSize};
use crate::render::placement::{Placement, PlacementRng};
use crate::render::{Color, DisplayItem, RenderList};

/// Everything that decides what the composite looks like, apart from the faces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionParameters {
    /// Number of full passes over the face set
    pub iterations: u32,
    /// Maximum rotation as a fraction of a full turn
    pub max_rotation: f32,
    /// Fraction of the canvas a face instance occupies along its constraining axis
    pub scale: f32,
    /// Canvas clear color
    pub background: Color,
    /// Canvas raster size in pixels
    pub canvas_size: SurfaceSize,
    /// Arbitrary seed bytes for the placement stream
    pub seed: Vec<u8>,
}

impl Default for CompositionParameters {
    fn default() -> Self {
        Self {
            iterations: 1,
            max_rotation: 0.0,
            scale: 0.5,
            background: Color::BLACK,
            canvas_size: SurfaceSize::new(640, 480),
            seed: b"Seed".to_vec(),
        }
    }
}

/// Scale factor that makes a `image_width x image_height` image occupy `scale` of the
/// canvas along whichever axis constrains it, preserving aspect ratio.
pub fn face_scale_factor(canvas: SurfaceSize, scale: f32, image_width: u32, image_height: u32) -> f64 {
    let scale = scale as f64;
    let fx = canvas.width as f64 * scale / image_width.max(1) as f64;
    let fy = canvas.height as f64 * scale / image_height.max(1) as f64;
    fx.min(fy)
}

/// Model transform of one instance: maps square texture space `(0..side, 0..side)` into
/// canvas pixels. Scale is applied about the face centre, then rotation, then translation.
///
/// Translation is in normalized device coordinates with y pointing up; positive turns
/// rotate counter-clockwise on screen.
pub fn instance_transform(canvas: SurfaceSize, placement: Placement, factor: f64, side: u32) -> Affine {
    let centre = Point::new(
        canvas.width as f64 / 2.0 * (1.0 + placement.tx as f64),
        canvas.height as f64 / 2.0 * (1.0 - placement.ty as f64),
    );
    let half = side as f64 / 2.0;

    Affine::translate(centre.to_vec2())
        * Affine::rotate(-TAU * placement.turns as f64)
        * Affine::scale(factor)
        * Affine::translate((-half, -half))
}

/// Layout pass: turn the ready faces into one clear plus one stamp per instance.
///
/// Only ready faces consume placement draws, in insertion order, `iterations` times over.
pub fn layout_instances(params: &CompositionParameters, faces: &FaceSet) -> RenderList {
    let mut list = RenderList::new();
    list.add_command(DisplayItem::Clear {
        color: params.background,
    });

    let ready: Vec<_> = faces
        .ready()
        .filter_map(|face| {
            let uv = face.uv?;
            let (w, h) = face.image_size?;
            let factor = face
                .scale_factor
                .unwrap_or_else(|| face_scale_factor(params.canvas_size, params.scale, w, h));
            Some((face.id, uv, face.texture_side, factor))
        })
        .collect();

    if ready.is_empty() {
        return list;
    }

    let mut rng = PlacementRng::from_seed_bytes(&params.seed);
    for _ in 0..params.iterations {
        for &(id, uv, side, factor) in &ready {
            let placement = rng.next_placement(params.max_rotation);
            list.add_command(DisplayItem::Stamp {
                face: id,
                transform: instance_transform(params.canvas_size, placement, factor, side),
                uv,
                side,
            });
        }
    }

    list
}

/// Owns the canvas surface and the composition state, and redoes only the work the dirty
/// flags ask for.
pub struct MosaicCompositor {
    params: CompositionParameters,
    dirty: DirtyFlags,
    stats: CompositorStats,
    surface: Option<Box<dyn ErasedSurface + Send>>,
    frame_id: u64,
}

impl MosaicCompositor {
    pub fn new(mut params: CompositionParameters) -> Self {
        params.canvas_size = clamp_canvas(params.canvas_size);
        Self {
            params,
            dirty: DirtyFlags::all(),
            stats: CompositorStats::default(),
            surface: None,
            frame_id: 0,
        }
    }

    pub fn params(&self) -> &CompositionParameters {
        &self.params
    }

    pub fn dirty(&self) -> DirtyFlags {
        self.dirty
    }

    pub fn stats(&self) -> CompositorStats {
        self.stats
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn mark(&mut self, flags: DirtyFlags) {
        self.dirty.insert(flags);
    }

    /// Each setter returns the flags it raised, empty when the value did not change.
    pub fn set_iterations(&mut self, iterations: u32) -> DirtyFlags {
        if self.params.iterations == iterations {
            return DirtyFlags::empty();
        }
        self.params.iterations = iterations;
        self.raise(DirtyFlags::COMPOSITE)
    }

    pub fn set_max_rotation(&mut self, fraction: f32) -> DirtyFlags {
        if !fraction.is_finite() {
            log::warn!("Compositor: ignoring non-finite max rotation {}", fraction);
            return DirtyFlags::empty();
        }
        if self.params.max_rotation == fraction {
            return DirtyFlags::empty();
        }
        self.params.max_rotation = fraction;
        self.raise(DirtyFlags::COMPOSITE)
    }

    pub fn set_scale(&mut self, fraction: f32) -> DirtyFlags {
        if !fraction.is_finite() {
            log::warn!("Compositor: ignoring non-finite scale {}", fraction);
            return DirtyFlags::empty();
        }
        if self.params.scale == fraction {
            return DirtyFlags::empty();
        }
        self.params.scale = fraction;
        self.raise(DirtyFlags::SCALE_RECALC | DirtyFlags::COMPOSITE)
    }

    pub fn set_background(&mut self, color: Color) -> DirtyFlags {
        if self.params.background == color {
            return DirtyFlags::empty();
        }
        self.params.background = color;
        self.raise(DirtyFlags::COMPOSITE)
    }

    pub fn set_canvas_size(&mut self, size: SurfaceSize) -> DirtyFlags {
        let size = clamp_canvas(size);
        if self.params.canvas_size == size {
            return DirtyFlags::empty();
        }
        self.params.canvas_size = size;
        self.raise(DirtyFlags::CANVAS_SIZE)
    }

    pub fn set_seed(&mut self, seed: Vec<u8>) -> DirtyFlags {
        if self.params.seed == seed {
            return DirtyFlags::empty();
        }
        self.params.seed = seed;
        self.raise(DirtyFlags::COMPOSITE)
    }

    fn raise(&mut self, flags: DirtyFlags) -> DirtyFlags {
        self.dirty.insert(flags);
        flags
    }

    /// Consume the dirty flags. Flags stay set when the backend fails, so the next tick
    /// retries the same work.
    pub fn tick(&mut self, backend: &mut dyn RenderBackend, faces: &mut FaceSet) -> anyhow::Result<TickResult> {
        let mut result = TickResult::default();

        if self.dirty.contains(DirtyFlags::CANVAS_REBUILD) || self.surface.is_none() {
            let size = self.params.canvas_size;
            self.surface = Some(backend.create_surface(size)?);
            self.dirty.remove(DirtyFlags::CANVAS_REBUILD);
            self.dirty.insert(DirtyFlags::COMPOSITE | DirtyFlags::VIEWPORT_RELAYOUT);
            self.stats.canvas_rebuilds += 1;
            result.canvas_rebuilt = true;
            log::debug!("Compositor: canvas rebuilt at {}", size);
        }

        if self.dirty.contains(DirtyFlags::VIEWPORT_RELAYOUT) {
            self.dirty.remove(DirtyFlags::VIEWPORT_RELAYOUT);
            self.stats.relayouts += 1;
            result.needs_relayout = true;
        }

        if self.dirty.contains(DirtyFlags::COMPOSITE) {
            if self.dirty.contains(DirtyFlags::SCALE_RECALC) {
                faces.recalc_scales(self.params.canvas_size, self.params.scale);
                self.dirty.remove(DirtyFlags::SCALE_RECALC);
                self.stats.scale_recalcs += 1;
            }

            let list = layout_instances(&self.params, faces);
            let surface = self
                .surface
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("canvas surface missing"))?;
            backend.render(&list, &mut **surface)?;

            self.dirty.remove(DirtyFlags::COMPOSITE);
            self.frame_id += 1;
            self.stats.composites += 1;
            result.composited = Some(list.stamp_count());
        }

        Ok(result)
    }

    pub fn surface_mut(&mut self) -> Option<&mut (dyn ErasedSurface + Send + 'static)> {
        self.surface.as_deref_mut()
    }
}

fn clamp_canvas(size: SurfaceSize) -> SurfaceSize {
    if size.width > 0 && size.height > 0 {
        return size;
    }
    log::warn!("Compositor: canvas size {} clamped to at least 1x1", size);
    SurfaceSize::new(size.width.max(1), size.height.max(1))
}
