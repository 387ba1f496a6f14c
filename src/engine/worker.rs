//! Background atlas worker.
//!
//! The worker owns a mirror of the decoded rasters of every packed face. It decodes new
//! batches, repacks the atlas, allocates it through the backend's
//! [`AtlasAllocator`](crate::render::backend::AtlasAllocator) and hands the results back to
//! the engine over a channel. The mirror only changes when a pack succeeds, which is also
//! the only case in which the engine commits the matching change to its face set.
//!
//! The worker never touches the [`FaceSet`](crate::FaceSet); the engine applies every reply
//! on its own thread.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};

use crate::assets::{AtlasPacker, DecodedFace, PackedAtlas, TextureLoader, UvRect};
use crate::engine::errors::{AtlasAllocationError, DecodeError, EngineError, LoadError};
use crate::engine::face::FaceId;
use crate::render::backend::AtlasAllocator;

/// Commands sent from the engine to the worker.
pub(crate) enum WorkerCommand {
    /// Decode a batch and add it to the atlas as a unit
    Load {
        faces: Vec<(FaceId, PathBuf)>,
        reply: oneshot::Sender<Result<Vec<FaceId>, LoadError>>,
    },
    /// Drop faces from the atlas and repack what remains
    Remove {
        ids: Vec<FaceId>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
}

impl std::fmt::Debug for WorkerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerCommand::Load { faces, .. } => write!(f, "Load({} faces)", faces.len()),
            WorkerCommand::Remove { ids, .. } => write!(f, "Remove({} faces)", ids.len()),
        }
    }
}

/// Metadata of a freshly decoded face.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoadedFace {
    pub id: FaceId,
    pub image_size: (u32, u32),
    pub side: u32,
}

/// A new atlas together with the location of every face in it. `atlas` is `None` when no
/// face is left.
#[derive(Debug, Clone)]
pub(crate) struct AtlasUpdate {
    pub atlas: Option<Arc<PackedAtlas>>,
    pub uvs: Vec<(FaceId, UvRect)>,
}

impl AtlasUpdate {
    pub fn uv_of(&self, id: FaceId) -> Option<UvRect> {
        self.uvs.iter().find(|(face, _)| *face == id).map(|(_, uv)| *uv)
    }
}

/// Results sent from the worker back to the engine.
#[derive(Debug)]
pub(crate) enum WorkerReply {
    Loaded {
        faces: Vec<LoadedFace>,
        update: AtlasUpdate,
    },
    LoadFailed {
        ids: Vec<FaceId>,
        error: String,
    },
    /// `update` is `None` when none of the removed faces were packed
    Repacked {
        ids: Vec<FaceId>,
        update: Option<AtlasUpdate>,
    },
    RepackFailed {
        ids: Vec<FaceId>,
        error: String,
    },
}

pub(crate) struct AtlasWorker {
    cmd_rx: mpsc::UnboundedReceiver<WorkerCommand>,
    reply_tx: mpsc::UnboundedSender<WorkerReply>,
    packer: AtlasPacker,
    allocator: Arc<dyn AtlasAllocator>,
    /// Decoded rasters of the packed faces, in atlas order
    packed: Vec<(FaceId, Arc<DecodedFace>)>,
}

impl AtlasWorker {
    pub fn new(
        cmd_rx: mpsc::UnboundedReceiver<WorkerCommand>,
        reply_tx: mpsc::UnboundedSender<WorkerReply>,
        packer: AtlasPacker,
        allocator: Arc<dyn AtlasAllocator>,
    ) -> Self {
        Self {
            cmd_rx,
            reply_tx,
            packer,
            allocator,
            packed: Vec::new(),
        }
    }

    /// Process commands one at a time until the engine drops its sender.
    pub async fn run(mut self) {
        while let Some(cmd) = self.cmd_rx.recv().await {
            log::debug!("Atlas: handling {:?}", cmd);
            if !self.handle_command(cmd).await {
                break;
            }
        }
        log::debug!("Atlas: worker stopped");
    }

    /// Returns false when the engine is gone.
    async fn handle_command(&mut self, cmd: WorkerCommand) -> bool {
        match cmd {
            WorkerCommand::Load { faces, reply } => {
                let ids: Vec<FaceId> = faces.iter().map(|(id, _)| *id).collect();
                match self.load_batch(faces).await {
                    Ok((loaded, update)) => {
                        let msg = WorkerReply::Loaded {
                            faces: loaded,
                            update,
                        };
                        if self.reply_tx.send(msg).is_err() {
                            return false;
                        }
                        let _ = reply.send(Ok(ids));
                    }
                    Err(e) => {
                        let msg = WorkerReply::LoadFailed {
                            ids,
                            error: e.to_string(),
                        };
                        if self.reply_tx.send(msg).is_err() {
                            return false;
                        }
                        let _ = reply.send(Err(e));
                    }
                }
            }
            WorkerCommand::Remove { ids, reply } => match self.remove(&ids).await {
                Ok(update) => {
                    if self
                        .reply_tx
                        .send(WorkerReply::Repacked { ids, update })
                        .is_err()
                    {
                        return false;
                    }
                    let _ = reply.send(Ok(()));
                }
                Err(e) => {
                    let msg = WorkerReply::RepackFailed {
                        ids,
                        error: e.to_string(),
                    };
                    if self.reply_tx.send(msg).is_err() {
                        return false;
                    }
                    let _ = reply.send(Err(e.into()));
                }
            },
        }
        true
    }

    /// Decode every face of the batch concurrently, then pack once for the whole batch.
    /// Nothing of the batch is kept unless every step succeeds.
    async fn load_batch(
        &mut self,
        faces: Vec<(FaceId, PathBuf)>,
    ) -> Result<(Vec<LoadedFace>, AtlasUpdate), LoadError> {
        let decodes = faces.into_iter().map(|(id, path)| async move {
            let task_path = path.clone();
            let result = tokio::task::spawn_blocking(move || TextureLoader::load_path(&task_path))
                .await
                .unwrap_or_else(|e| {
                    Err(DecodeError::Aborted {
                        path: path.clone(),
                        reason: e.to_string(),
                    })
                });
            (id, result)
        });

        let mut decoded = Vec::new();
        let mut first_error = None;
        for (id, result) in join_all(decodes).await {
            match result {
                Ok(face) => decoded.push((id, Arc::new(face))),
                Err(e) => {
                    log::warn!("Face[{}]: decode failed: {}", id, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e.into());
        }

        let mut candidate = self.packed.clone();
        candidate.extend(decoded.iter().cloned());
        let update = self.pack(&candidate).await?;
        self.packed = candidate;

        let loaded = decoded
            .iter()
            .map(|(id, face)| LoadedFace {
                id: *id,
                image_size: (face.image_width, face.image_height),
                side: face.side,
            })
            .collect();

        Ok((loaded, update))
    }

    async fn remove(&mut self, ids: &[FaceId]) -> Result<Option<AtlasUpdate>, AtlasAllocationError> {
        if !self.packed.iter().any(|(id, _)| ids.contains(id)) {
            return Ok(None);
        }

        let remaining: Vec<(FaceId, Arc<DecodedFace>)> = self
            .packed
            .iter()
            .filter(|(id, _)| !ids.contains(id))
            .cloned()
            .collect();

        let update = self.pack(&remaining).await?;
        self.packed = remaining;
        Ok(Some(update))
    }

    async fn pack(
        &self,
        faces: &[(FaceId, Arc<DecodedFace>)],
    ) -> Result<AtlasUpdate, AtlasAllocationError> {
        if faces.is_empty() {
            return Ok(AtlasUpdate {
                atlas: None,
                uvs: Vec::new(),
            });
        }

        let packer = self.packer;
        let allocator = self.allocator.clone();
        let rasters: Vec<Arc<DecodedFace>> = faces.iter().map(|(_, face)| face.clone()).collect();
        let packed = tokio::task::spawn_blocking(move || {
            let refs: Vec<&DecodedFace> = rasters.iter().map(|face| face.as_ref()).collect();
            let atlas = packer.generate(&refs)?;
            allocator
                .allocate(atlas)
                .map_err(|e| AtlasAllocationError::Rejected(e.to_string()))
        })
        .await
        .map_err(|e| AtlasAllocationError::Aborted(e.to_string()))??;

        let uvs = faces
            .iter()
            .map(|(id, _)| *id)
            .zip(packed.uvs.iter().copied())
            .collect();

        Ok(AtlasUpdate {
            atlas: Some(packed),
            uvs,
        })
    }
}
