//! Face assets: decoding source images into square rasters and packing them into one
//! shared atlas.

mod atlas;
mod loader;

pub use atlas::{AtlasPacker, PackedAtlas, UvRect};
pub use loader::{DecodedFace, TextureLoader};
