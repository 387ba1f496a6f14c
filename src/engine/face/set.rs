use std::path::PathBuf;

use crate::assets::UvRect;
use crate::engine::face::{Face, FaceId, FaceState};
use crate::render::backend::SurfaceSize;
use crate::render::face_scale_factor;

/// Ordered collection of faces. Insertion order is the placement order.
#[derive(Debug, Default, Clone)]
pub struct FaceSet {
    faces: Vec<Face>,
}

impl FaceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Face> {
        self.faces.iter()
    }

    /// Faces that take part in composition, in insertion order.
    pub fn ready(&self) -> impl Iterator<Item = &Face> {
        self.faces.iter().filter(|f| f.is_ready())
    }

    pub fn ids(&self) -> Vec<FaceId> {
        self.faces.iter().map(|f| f.id).collect()
    }

    pub fn get(&self, id: FaceId) -> Option<&Face> {
        self.faces.iter().find(|f| f.id == id)
    }

    pub fn get_mut(&mut self, id: FaceId) -> Option<&mut Face> {
        self.faces.iter_mut().find(|f| f.id == id)
    }

    pub fn contains(&self, id: FaceId) -> bool {
        self.get(id).is_some()
    }

    /// Append a new face in the loading state and return its id.
    pub fn insert_loading(&mut self, source: PathBuf) -> FaceId {
        let face = Face::new(source);
        let id = face.id;
        self.faces.push(face);
        id
    }

    /// True when the face exists and no removal is pending for it.
    pub fn is_live(&self, id: FaceId) -> bool {
        self.get(id).is_some_and(|f| !f.removing)
    }

    /// Take faces out of composition ahead of their removal. They stay in the set, in
    /// place, until the removal is either finished with [`remove`](Self::remove) or undone
    /// with [`cancel_removal`](Self::cancel_removal).
    pub fn begin_removal(&mut self, ids: &[FaceId]) {
        for face in self.faces.iter_mut().filter(|f| ids.contains(&f.id)) {
            face.removing = true;
        }
    }

    /// Put faces whose removal failed back into composition.
    pub fn cancel_removal(&mut self, ids: &[FaceId]) {
        for face in self.faces.iter_mut().filter(|f| ids.contains(&f.id)) {
            face.removing = false;
        }
    }

    /// Remove the given faces. Returns the ids that were actually present.
    pub fn remove(&mut self, ids: &[FaceId]) -> Vec<FaceId> {
        let mut removed = Vec::new();
        self.faces.retain(|f| {
            if ids.contains(&f.id) {
                removed.push(f.id);
                false
            } else {
                true
            }
        });
        removed
    }

    /// Mark a loading face as ready. Returns false when the face is gone.
    pub fn mark_ready(&mut self, id: FaceId, image_size: (u32, u32), side: u32, uv: UvRect) -> bool {
        let Some(face) = self.get_mut(id) else {
            return false;
        };

        face.state = FaceState::Ready;
        face.image_size = Some(image_size);
        face.texture_side = side;
        face.uv = Some(uv);
        face.scale_factor = None;
        true
    }

    /// Mark a face as failed. Returns false when the face is gone.
    pub fn mark_failed(&mut self, id: FaceId, reason: &str) -> bool {
        let Some(face) = self.get_mut(id) else {
            return false;
        };

        face.state = FaceState::Failed(reason.to_string());
        face.uv = None;
        face.scale_factor = None;
        true
    }

    /// Replace atlas locations after a repack. Unknown ids are ignored.
    pub fn apply_uvs(&mut self, uvs: &[(FaceId, UvRect)]) {
        for (id, uv) in uvs {
            if let Some(face) = self.get_mut(*id) {
                if face.state == FaceState::Ready {
                    face.uv = Some(*uv);
                }
            }
        }
    }

    /// Recompute the cached scale factor of every ready face.
    pub fn recalc_scales(&mut self, canvas: SurfaceSize, scale: f32) {
        for face in self.faces.iter_mut().filter(|f| f.state == FaceState::Ready) {
            face.scale_factor = face
                .image_size
                .map(|(w, h)| face_scale_factor(canvas, scale, w, h));
        }
    }
}
