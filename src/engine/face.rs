//! Face model: a single user-supplied source image and the ordered set of faces.

#[allow(clippy::module_inception)]
mod face;
mod set;

pub use face::{Face, FaceId, FaceState};
pub use set::FaceSet;
