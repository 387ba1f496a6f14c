use std::any::Any;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use kurbo::{Affine, Point, Rect};

use crate::assets::{PackedAtlas, UvRect};
use crate::render::backend::{
    AtlasAllocator, ErasedSurface, ExternalHandle, PixelBuffer, PixelFormat, RenderBackend,
    SurfaceSize,
};
use crate::render::{DisplayItem, RenderList};

const DEFAULT_MAX_DIMENSION: u32 = 16384;

/// Software backend. Stamps are sampled nearest-neighbour from the atlas and blended
/// source-over in straight alpha.
pub struct CpuBackend {
    max_dimension: u32,
    atlas: Option<Arc<PackedAtlas>>,
}

impl CpuBackend {
    pub fn new() -> Result<Self> {
        Ok(Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            atlas: None,
        })
    }

    /// Backend with a lower texture limit, mostly useful to exercise allocation failures.
    pub fn with_max_dimension(max_dimension: u32) -> Result<Self> {
        if max_dimension == 0 {
            bail!("texture limit must be greater than zero");
        }
        Ok(Self {
            max_dimension,
            atlas: None,
        })
    }
}

impl RenderBackend for CpuBackend {
    fn name(&self) -> &str {
        "CpuBackend"
    }

    fn max_texture_dimension(&self) -> u32 {
        self.max_dimension
    }

    fn create_surface(&self, size: SurfaceSize) -> Result<Box<dyn ErasedSurface + Send>> {
        if size.width > self.max_dimension || size.height > self.max_dimension {
            bail!(
                "canvas {} exceeds the texture limit of {}",
                size,
                self.max_dimension
            );
        }
        Ok(Box::new(CpuSurface::new(size)))
    }

    fn atlas_allocator(&self) -> Arc<dyn AtlasAllocator> {
        Arc::new(CpuAtlasAllocator {
            max_dimension: self.max_dimension,
        })
    }

    fn install_atlas(&mut self, atlas: Option<Arc<PackedAtlas>>) {
        self.atlas = atlas;
    }

    fn render(&mut self, list: &RenderList, surface: &mut dyn ErasedSurface) -> Result<()> {
        let s = surface
            .as_any_mut()
            .downcast_mut::<CpuSurface>()
            .ok_or_else(|| anyhow!("CpuBackend used with non-Cpu surface"))?;

        let size = s.size;
        let pixels = Arc::make_mut(&mut s.pixels);

        for item in &list.items {
            match item {
                DisplayItem::Clear { color } => {
                    let rgba = color.to_rgba8();
                    for px in pixels.chunks_exact_mut(4) {
                        px.copy_from_slice(&rgba);
                    }
                }
                DisplayItem::Stamp {
                    face,
                    transform,
                    uv,
                    side,
                } => {
                    let Some(atlas) = &self.atlas else {
                        log::warn!("Face[{}]: stamp skipped, no atlas uploaded", face);
                        continue;
                    };
                    stamp(pixels, size, atlas, *transform, uv, *side);
                }
            }
        }

        s.frame_id = s.frame_id.wrapping_add(1);
        Ok(())
    }

    fn snapshot(&mut self, surface: &mut dyn ErasedSurface) -> Result<PixelBuffer> {
        let s = surface
            .as_any_mut()
            .downcast_mut::<CpuSurface>()
            .ok_or_else(|| anyhow!("CpuBackend used with non-Cpu surface"))?;

        PixelBuffer::from_raw(
            s.pixels.as_ref().clone(),
            s.size.width,
            s.size.height,
            s.size.width * 4,
            PixelFormat::Rgba8,
        )
    }

    fn external_handle(&mut self, surface: &mut dyn ErasedSurface) -> Option<ExternalHandle> {
        let s = surface.as_any_mut().downcast_mut::<CpuSurface>()?;

        Some(ExternalHandle::CpuPixels {
            width: s.size.width,
            height: s.size.height,
            stride: s.size.width * 4,
            pixels: s.pixels.clone(),
            frame_id: s.frame_id,
        })
    }
}

/// Atlases live in plain memory; allocation only enforces the texture limit.
struct CpuAtlasAllocator {
    max_dimension: u32,
}

impl AtlasAllocator for CpuAtlasAllocator {
    fn allocate(&self, atlas: PackedAtlas) -> Result<Arc<PackedAtlas>> {
        if atlas.width() > self.max_dimension || atlas.height() > self.max_dimension {
            bail!(
                "atlas {}x{} exceeds the texture limit of {}",
                atlas.width(),
                atlas.height(),
                self.max_dimension
            );
        }
        Ok(Arc::new(atlas))
    }
}

/// Draw one face instance. Every canvas pixel whose centre maps inside the face square
/// samples the nearest atlas texel.
fn stamp(
    pixels: &mut [u8],
    size: SurfaceSize,
    atlas: &PackedAtlas,
    transform: Affine,
    uv: &UvRect,
    side: u32,
) {
    if side == 0 || transform.determinant().abs() < 1e-12 {
        return;
    }
    let inverse = transform.inverse();

    let (u0, v0, u1, v1) = uv.to_pixels(atlas.width(), atlas.height());
    if u1 <= u0 || v1 <= v0 {
        return;
    }
    let tex_w = (u1 - u0) as f64;
    let tex_h = (v1 - v0) as f64;
    let side_f = side as f64;

    let bbox = transform.transform_rect_bbox(Rect::new(0.0, 0.0, side_f, side_f));
    let x_start = bbox.x0.floor().max(0.0) as u32;
    let y_start = bbox.y0.floor().max(0.0) as u32;
    let x_end = (bbox.x1.ceil().max(0.0) as u32).min(size.width);
    let y_end = (bbox.y1.ceil().max(0.0) as u32).min(size.height);

    for y in y_start..y_end {
        for x in x_start..x_end {
            let local = inverse * Point::new(x as f64 + 0.5, y as f64 + 0.5);
            if local.x < 0.0 || local.y < 0.0 || local.x >= side_f || local.y >= side_f {
                continue;
            }

            let tx = u0 + ((local.x * tex_w / side_f) as u32).min(u1 - u0 - 1);
            let ty = v0 + ((local.y * tex_h / side_f) as u32).min(v1 - v0 - 1);
            let Some(texel) = atlas.raster.get_pixel_checked(tx, ty) else {
                continue;
            };

            let offset = (y as usize * size.width as usize + x as usize) * 4;
            let dst = &mut pixels[offset..offset + 4];
            blend_over(dst, texel.0);
        }
    }
}

/// Source-over in straight alpha.
pub(crate) fn blend_over(dst: &mut [u8], src: [u8; 4]) {
    match src[3] {
        0 => {}
        255 => dst.copy_from_slice(&src),
        sa => {
            let sa = sa as f32 / 255.0;
            let da = dst[3] as f32 / 255.0;
            let out_a = sa + da * (1.0 - sa);

            for c in 0..3 {
                let sc = src[c] as f32 / 255.0;
                let dc = dst[c] as f32 / 255.0;
                let out = (sc * sa + dc * da * (1.0 - sa)) / out_a;
                dst[c] = (out * 255.0).round().clamp(0.0, 255.0) as u8;
            }
            dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
        }
    }
}

pub struct CpuSurface {
    /// Size of the surface in pixels.
    pub size: SurfaceSize,
    /// RGBA8 pixels, shared with external handles until the next render
    pixels: Arc<Vec<u8>>,
    frame_id: u64,
}

impl CpuSurface {
    pub fn new(size: SurfaceSize) -> Self {
        Self {
            size,
            pixels: Arc::new(vec![0u8; size.area() * 4]),
            frame_id: 0,
        }
    }
}

impl ErasedSurface for CpuSurface {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn size(&self) -> SurfaceSize {
        self.size
    }
}
