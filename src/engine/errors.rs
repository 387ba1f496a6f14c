use std::path::PathBuf;

use crate::engine::face::FaceId;

/// The background worker went away before answering a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("background worker stopped before replying")]
pub struct WorkerGone;

/// A source image could not be turned into a face raster.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported or corrupt image {origin}: {source}")]
    Format {
        origin: String,
        #[source]
        source: image::ImageError,
    },

    #[error("image {origin} has no pixels")]
    Empty { origin: String },

    #[error("decoder task for {path} did not finish: {reason}")]
    Aborted { path: PathBuf, reason: String },
}

/// The backend cannot hold an atlas of the requested size.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AtlasAllocationError {
    #[error("atlas of {width}x{height} exceeds the texture limit of {limit}")]
    TooLarge { width: u32, height: u32, limit: u32 },

    #[error("atlas dimensions overflow")]
    Overflow,

    #[error("backend cannot allocate the atlas: {0}")]
    Rejected(String),

    #[error("atlas packing task did not finish: {0}")]
    Aborted(String),
}

/// Failure while adding a batch of faces. The whole batch fails together.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Atlas(#[from] AtlasAllocationError),

    #[error(transparent)]
    WorkerGone(#[from] WorkerGone),
}

/// Failure while reading back or writing the canvas.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("canvas readback failed: {0}")]
    Readback(String),

    #[error("png encoding failed: {0}")]
    Png(#[from] png::EncodingError),

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot infer export format from {0}")]
    UnknownFormat(PathBuf),

    #[error(transparent)]
    WorkerGone(#[from] WorkerGone),
}

/// Invalid engine configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("canvas must be at least 1x1, got {width}x{height}")]
    InvalidCanvas { width: u32, height: u32 },

    #[error("{name} must be finite, got {value}")]
    NotFinite { name: &'static str, value: f32 },

    #[error("texture limit must be greater than zero")]
    ZeroTextureLimit,

    #[error("channel capacity must be greater than zero")]
    ZeroChannelCapacity,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine must be created inside a tokio runtime")]
    NoRuntime,

    #[error("unknown face {0}")]
    UnknownFace(FaceId),

    #[error("render backend error: {0}")]
    Backend(#[from] anyhow::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Atlas(#[from] AtlasAllocationError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    WorkerGone(#[from] WorkerGone),
}
