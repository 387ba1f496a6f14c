use std::path::PathBuf;

use uuid::Uuid;

use crate::assets::UvRect;

/// A unique identifier for a face managed by the engine.
///
/// Ids are generated when a face is inserted and never reused, so asynchronous results
/// are always matched by id and never by position.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FaceId(Uuid);

impl FaceId {
    /// Create a new unique `FaceId` using a random UUID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a face.
///
/// ```text
/// Loading -> Ready
///         -> Failed(reason)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FaceState {
    /// Decode or atlas packing is still in flight
    #[default]
    Loading,
    /// Packed into the atlas and part of composition
    Ready,
    /// Loading failed; the face is permanently excluded from composition
    Failed(String),
}

/// One face in the mosaic.
#[derive(Debug, Clone)]
pub struct Face {
    /// Stable identity
    pub id: FaceId,
    /// Path the face was loaded from
    pub source: PathBuf,
    /// Current lifecycle state
    pub state: FaceState,
    /// Decoded source image size, known once ready
    pub image_size: Option<(u32, u32)>,
    /// Side of the square working raster
    pub texture_side: u32,
    /// Location in the current atlas
    pub uv: Option<UvRect>,
    /// Cached per-face scale factor for the current canvas and scale
    pub scale_factor: Option<f64>,
    /// Removal requested; the face stays out of composition until the atlas repack settles
    pub removing: bool,
}

impl Face {
    pub fn new(source: PathBuf) -> Self {
        Self {
            id: FaceId::new(),
            source,
            state: FaceState::Loading,
            image_size: None,
            texture_side: 0,
            uv: None,
            scale_factor: None,
            removing: false,
        }
    }

    /// True when the face can be stamped.
    pub fn is_ready(&self) -> bool {
        self.state == FaceState::Ready
            && !self.removing
            && self.uv.is_some()
            && self.image_size.is_some()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, FaceState::Failed(_))
    }
}
