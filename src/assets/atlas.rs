use image::{imageops, RgbaImage};

use crate::assets::DecodedFace;
use crate::engine::AtlasAllocationError;

/// Normalized rectangle inside the atlas, all edges in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UvRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl UvRect {
    /// Pixel rectangle `(x0, y0, x1, y1)` of this UV rect in an atlas of the given size.
    pub fn to_pixels(&self, atlas_width: u32, atlas_height: u32) -> (u32, u32, u32, u32) {
        let w = atlas_width as f32;
        let h = atlas_height as f32;
        (
            (self.left * w).round() as u32,
            (self.top * h).round() as u32,
            (self.right * w).round() as u32,
            (self.bottom * h).round() as u32,
        )
    }
}

/// One shared raster holding every face, plus each face's UV rect in input order.
#[derive(Clone)]
pub struct PackedAtlas {
    pub raster: RgbaImage,
    pub uvs: Vec<UvRect>,
}

impl PackedAtlas {
    pub fn width(&self) -> u32 {
        self.raster.width()
    }

    pub fn height(&self) -> u32 {
        self.raster.height()
    }

    /// Copy the pixels a UV rect covers out of the atlas.
    pub fn extract(&self, uv: &UvRect) -> RgbaImage {
        let (x0, y0, x1, y1) = uv.to_pixels(self.width(), self.height());
        imageops::crop_imm(&self.raster, x0, y0, x1 - x0, y1 - y0).to_image()
    }
}

impl std::fmt::Debug for PackedAtlas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackedAtlas")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("faces", &self.uvs.len())
            .finish()
    }
}

/// Shelf packer: `ceil(sqrt(n))` faces per row, rows stacked top to bottom.
#[derive(Debug, Clone, Copy)]
pub struct AtlasPacker {
    max_dimension: u32,
}

struct Slot {
    x: u32,
    y: u32,
}

impl AtlasPacker {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    /// Pack the faces in order. Fails without allocating anything when the atlas would not
    /// fit the texture limit. An empty input yields an empty atlas.
    pub fn generate(&self, faces: &[&DecodedFace]) -> Result<PackedAtlas, AtlasAllocationError> {
        if faces.is_empty() {
            return Ok(PackedAtlas {
                raster: RgbaImage::new(0, 0),
                uvs: Vec::new(),
            });
        }

        let group_size = (faces.len() as f64).sqrt().ceil() as usize;

        let mut slots = Vec::with_capacity(faces.len());
        let mut width: u64 = 0;
        let mut height: u64 = 0;
        for row in faces.chunks(group_size) {
            let mut x: u64 = 0;
            let mut row_height: u64 = 0;
            for face in row {
                slots.push((x, height));
                x += face.side as u64;
                row_height = row_height.max(face.side as u64);
            }
            width = width.max(x);
            height += row_height;
        }

        if width > u32::MAX as u64 || height > u32::MAX as u64 {
            return Err(AtlasAllocationError::Overflow);
        }
        let (width, height) = (width as u32, height as u32);
        if width > self.max_dimension || height > self.max_dimension {
            return Err(AtlasAllocationError::TooLarge {
                width,
                height,
                limit: self.max_dimension,
            });
        }

        let slots: Vec<Slot> = slots
            .into_iter()
            .map(|(x, y)| Slot {
                x: x as u32,
                y: y as u32,
            })
            .collect();

        let mut raster = RgbaImage::new(width, height);
        let mut uvs = Vec::with_capacity(faces.len());
        for (face, slot) in faces.iter().zip(&slots) {
            imageops::replace(&mut raster, &face.pixels, slot.x as i64, slot.y as i64);
            uvs.push(UvRect {
                left: slot.x as f32 / width as f32,
                top: slot.y as f32 / height as f32,
                right: (slot.x + face.side) as f32 / width as f32,
                bottom: (slot.y + face.side) as f32 / height as f32,
            });
        }

        log::debug!(
            "Atlas: packed {} faces into {}x{} ({} per row)",
            faces.len(),
            width,
            height,
            group_size
        );

        Ok(PackedAtlas { raster, uvs })
    }
}
