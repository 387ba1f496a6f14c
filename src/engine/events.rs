//! Engine events.
//!
//! Events are broadcast to every subscriber of
//! [`MosaicEngine::subscribe_events`](crate::MosaicEngine::subscribe_events). Sending never
//! blocks and having no subscribers is not an error.

use std::path::PathBuf;

use crate::engine::face::FaceId;
use crate::render::backend::SurfaceSize;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    // ****************************************
    // ** Face set
    /// A batch of faces finished loading and is part of the atlas
    FacesAdded { ids: Vec<FaceId> },
    /// A batch of faces failed to load; none of them will be composited
    FacesFailed { ids: Vec<FaceId>, error: String },
    /// Faces were removed from the set
    FacesRemoved { ids: Vec<FaceId> },

    // ****************************************
    // ** Atlas
    /// A new atlas was uploaded to the backend
    AtlasRebuilt { width: u32, height: u32, faces: usize },
    /// The last face was removed and the atlas released
    AtlasCleared,

    // ****************************************
    // ** Rendering
    /// The canvas surface was reallocated
    CanvasRebuilt { size: SurfaceSize },
    /// The canvas was recomposited
    Composited { frame_id: u64, instances: usize },

    // ****************************************
    // ** Export
    /// A snapshot was written
    ExportFinished { path: PathBuf },
    /// A snapshot could not be written
    ExportFailed { path: PathBuf, error: String },
}
