use std::any::Any;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::assets::PackedAtlas;
use crate::render::backend::{
    AtlasAllocator, ErasedSurface, ExternalHandle, PixelBuffer, RenderBackend, SurfaceSize,
};
use crate::render::RenderList;

/// Null backend that counts work but does not produce any pixels.
#[derive(Debug, Default)]
pub struct NullBackend {
    /// Number of render lists executed
    pub renders: u64,
    /// Number of stamps seen in the last render list
    pub last_stamps: usize,
    /// Faces in the currently uploaded atlas
    pub atlas_faces: usize,
}

impl NullBackend {
    /// Creates a new instance of the null backend.
    pub fn new() -> Result<Self> {
        Ok(Self::default())
    }
}

impl RenderBackend for NullBackend {
    fn name(&self) -> &str {
        "NullBackend"
    }

    fn max_texture_dimension(&self) -> u32 {
        u32::MAX
    }

    fn create_surface(&self, size: SurfaceSize) -> Result<Box<dyn ErasedSurface + Send>> {
        Ok(Box::new(NullSurface::new(size)))
    }

    fn atlas_allocator(&self) -> Arc<dyn AtlasAllocator> {
        Arc::new(NullAtlasAllocator)
    }

    fn install_atlas(&mut self, atlas: Option<Arc<PackedAtlas>>) {
        self.atlas_faces = atlas.map(|a| a.uvs.len()).unwrap_or(0);
    }

    fn render(&mut self, list: &RenderList, surface: &mut dyn ErasedSurface) -> Result<()> {
        let s = surface
            .as_any_mut()
            .downcast_mut::<NullSurface>()
            .ok_or_else(|| anyhow!("NullBackend used with non-Null surface"))?;

        s.frame_id = s.frame_id.wrapping_add(1);
        self.renders += 1;
        self.last_stamps = list.stamp_count();
        Ok(())
    }

    fn snapshot(&mut self, surface: &mut dyn ErasedSurface) -> Result<PixelBuffer> {
        let s = surface
            .as_any_mut()
            .downcast_mut::<NullSurface>()
            .ok_or_else(|| anyhow!("NullBackend used with non-Null surface"))?;

        Ok(PixelBuffer::transparent(s.size.width, s.size.height))
    }

    fn external_handle(&mut self, surface: &mut dyn ErasedSurface) -> Option<ExternalHandle> {
        let s = surface.as_any_mut().downcast_mut::<NullSurface>()?;

        Some(ExternalHandle::NullHandle {
            width: s.size.width,
            height: s.size.height,
            frame_id: s.frame_id,
        })
    }
}

/// Accepts every atlas.
struct NullAtlasAllocator;

impl AtlasAllocator for NullAtlasAllocator {
    fn allocate(&self, atlas: PackedAtlas) -> Result<Arc<PackedAtlas>> {
        Ok(Arc::new(atlas))
    }
}

pub struct NullSurface {
    /// Size of the surface in pixels.
    pub size: SurfaceSize,
    /// Frame ID for the surface, used to track rendering frames.
    frame_id: u64,
}

impl NullSurface {
    pub fn new(size: SurfaceSize) -> Self {
        Self { size, frame_id: 0 }
    }
}

impl ErasedSurface for NullSurface {
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
