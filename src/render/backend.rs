use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::assets::PackedAtlas;
use crate::render::RenderList;

/// Size of a surface in pixels. It's a simple struct to hold width and height.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels covered by this size.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl std::fmt::Display for SurfaceSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Straight (non premultiplied) RGBA, 8 bits per channel
    Rgba8,
}

/// Handle the host can display. Ownership & sync are backend-specific; see docs per variant.
#[derive(Clone, Debug)]
pub enum ExternalHandle {
    /// CPU pixels in RGBA8, shared with the surface until the next recomposite.
    CpuPixels {
        width: u32,
        height: u32,
        stride: u32,
        pixels: Arc<Vec<u8>>,
        frame_id: u64,
    },

    /// Handle of a backend that does not produce pixels.
    NullHandle {
        width: u32,
        height: u32,
        frame_id: u64,
    },
}

/// CPU readback of a surface.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
}

impl PixelBuffer {
    pub fn from_raw(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
    ) -> anyhow::Result<Self> {
        if pixels.len() < (height as usize) * (stride as usize) || stride < width * 4 {
            anyhow::bail!(
                "pixel buffer of {} bytes too small for {}x{} (stride {})",
                pixels.len(),
                width,
                height,
                stride
            );
        }

        Ok(Self {
            pixels,
            width,
            height,
            stride,
            format,
        })
    }

    /// Fully transparent buffer of the given size.
    pub fn transparent(width: u32, height: u32) -> Self {
        Self {
            pixels: vec![0u8; width as usize * height as usize * 4],
            width,
            height,
            stride: width * 4,
            format: PixelFormat::Rgba8,
        }
    }

    /// RGBA value of the pixel at `(x, y)`, or `None` when outside the buffer.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.stride as usize + x as usize * 4;
        let px = self.pixels.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Pixel rows without stride padding.
    pub fn tight_rows(&self) -> Vec<u8> {
        let row_len = self.width as usize * 4;
        if self.stride as usize == row_len {
            return self.pixels[..row_len * self.height as usize].to_vec();
        }

        let mut out = Vec::with_capacity(row_len * self.height as usize);
        for row in self.pixels.chunks(self.stride as usize).take(self.height as usize) {
            out.extend_from_slice(&row[..row_len]);
        }
        out
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.pixels.len())
            .finish()
    }
}

/// Type-erased surface so the engine can hold it without generics.
pub trait ErasedSurface: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn size(&self) -> SurfaceSize;
}

/// Allocates backend storage for packed atlases.
///
/// Runs on the atlas worker, so a batch only reports success once its atlas has storage.
/// Installing the result on the owning thread cannot fail.
pub trait AtlasAllocator: Send + Sync {
    fn allocate(&self, atlas: PackedAtlas) -> anyhow::Result<Arc<PackedAtlas>>;
}

/// Core backend interface. Calls occur on the engine's owning thread.
pub trait RenderBackend {
    fn name(&self) -> &str;

    /// Largest texture side this backend can allocate.
    fn max_texture_dimension(&self) -> u32;

    /// Create a new canvas surface with the given size.
    fn create_surface(&self, size: SurfaceSize) -> anyhow::Result<Box<dyn ErasedSurface + Send>>;

    /// Allocator the atlas worker uses to place freshly packed atlases in backend storage.
    fn atlas_allocator(&self) -> Arc<dyn AtlasAllocator>;

    /// Make an allocated atlas the one used by subsequent renders. `None` releases it.
    fn install_atlas(&mut self, atlas: Option<Arc<PackedAtlas>>);

    /// Execute the render list against the given surface.
    fn render(&mut self, list: &RenderList, surface: &mut dyn ErasedSurface) -> anyhow::Result<()>;

    /// Read the surface back into CPU memory. Returns only after all rendering into the
    /// surface has finished.
    fn snapshot(&mut self, surface: &mut dyn ErasedSurface) -> anyhow::Result<PixelBuffer>;

    /// Returns an external handle for the surface, if supported.
    fn external_handle(&mut self, surface: &mut dyn ErasedSurface) -> Option<ExternalHandle>;
}
