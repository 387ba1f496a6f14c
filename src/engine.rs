//! Engine system: [`MosaicEngine`], its configuration, events and the face model.
//!
//! The engine is owned by one thread (the host's main/render thread). Decoding and atlas
//! packing run on a background worker; their results are marshaled back and applied by the
//! owning thread during [`MosaicEngine::render_frame`] or [`MosaicEngine::settle`].

mod config;
#[allow(clippy::module_inception)]
mod engine;
mod errors;
mod events;
pub mod face;
mod pending;
mod tick;
mod worker;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::MosaicEngine;
pub use errors::{
    AtlasAllocationError, ConfigError, DecodeError, EngineError, ExportError, LoadError,
    WorkerGone,
};
pub use events::EngineEvent;
pub use face::{Face, FaceId, FaceSet, FaceState};
pub use pending::Pending;
pub use tick::{CompositorStats, DirtyFlags, PresentedCanvas, TickResult};

/// Default capacity of the event channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;
