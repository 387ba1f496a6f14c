use std::path::PathBuf;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::assets::AtlasPacker;
use crate::engine::events::EngineEvent;
use crate::engine::face::{FaceId, FaceSet};
use crate::engine::pending::Pending;
use crate::engine::tick::{CompositorStats, DirtyFlags, PresentedCanvas};
use crate::engine::worker::{AtlasUpdate, AtlasWorker, WorkerCommand, WorkerReply};
use crate::engine::{EngineConfig, EngineError, ExportError, LoadError};
use crate::render::backend::{PixelBuffer, RenderBackend, SurfaceSize};
use crate::render::export::{write_snapshot, ExportFormat};
use crate::render::{CanvasPresenter, Color, CompositionParameters, Letterbox, MosaicCompositor, Viewport};

/// The face mosaic engine.
///
/// Owned by one thread, which drives it with [`render_frame`](Self::render_frame). Loading,
/// atlas packing and export encoding run in the background; their results are applied on
/// the owning thread.
pub struct MosaicEngine {
    /// Configuration the engine was created with.
    config: EngineConfig,
    /// Active render backend.
    backend: Box<dyn RenderBackend + Send>,
    /// Faces in placement order.
    faces: FaceSet,
    /// Canvas surface, parameters and dirty flags.
    compositor: MosaicCompositor,
    /// Canvas to viewport mapping.
    presenter: CanvasPresenter,
    /// Commands to the atlas worker.
    cmd_tx: mpsc::UnboundedSender<WorkerCommand>,
    /// Results from the atlas worker, applied on this thread. Unbounded, so the worker
    /// never waits on a host that is not ticking.
    reply_rx: mpsc::UnboundedReceiver<WorkerReply>,
    /// Event bus towards the host.
    event_tx: broadcast::Sender<EngineEvent>,
    /// Worker commands whose reply has not been applied yet.
    in_flight: usize,
    /// Runtime the background work is spawned on.
    runtime: Handle,
}

impl std::fmt::Debug for MosaicEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MosaicEngine")
            .field("backend", &self.backend.name())
            .field("faces", &self.faces.len())
            .field("dirty", &self.compositor.dirty().to_string())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

impl MosaicEngine {
    /// Create a new engine. Must be called from within a tokio runtime.
    ///
    /// If `config` is `None`, [`EngineConfig::default`] is used.
    ///
    /// ```
    /// # use face_mosaic as fm;
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let backend = fm::render::backends::null::NullBackend::new().unwrap();
    /// let engine = fm::MosaicEngine::new(None, Box::new(backend)).unwrap();
    /// assert!(engine.faces().is_empty());
    /// # }
    /// ```
    pub fn new(config: Option<EngineConfig>, backend: Box<dyn RenderBackend + Send>) -> Result<Self, EngineError> {
        let config = config.unwrap_or_default();
        config.validate()?;

        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let limit = config.max_texture_dimension.min(backend.max_texture_dimension());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WorkerCommand>();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel::<WorkerReply>();
        let (event_tx, _first_rx) = broadcast::channel::<EngineEvent>(config.channel_capacity);

        let worker = AtlasWorker::new(
            cmd_rx,
            reply_tx,
            AtlasPacker::new(limit),
            backend.atlas_allocator(),
        );
        runtime.spawn(worker.run());

        let compositor = MosaicCompositor::new(config.parameters.clone());
        let presenter = CanvasPresenter::new(
            config.viewport,
            compositor.params().canvas_size,
            config.checker_cell,
        );

        log::info!(
            "Engine: created with {} backend, texture limit {}",
            backend.name(),
            limit
        );

        Ok(Self {
            config,
            backend,
            faces: FaceSet::new(),
            compositor,
            presenter,
            cmd_tx,
            reply_rx,
            event_tx,
            in_flight: 0,
            runtime,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn faces(&self) -> &FaceSet {
        &self.faces
    }

    pub fn parameters(&self) -> &CompositionParameters {
        self.compositor.params()
    }

    pub fn dirty(&self) -> DirtyFlags {
        self.compositor.dirty()
    }

    pub fn stats(&self) -> CompositorStats {
        self.compositor.stats()
    }

    pub fn viewport(&self) -> Viewport {
        self.presenter.viewport()
    }

    pub fn letterbox(&self) -> Letterbox {
        self.presenter.letterbox()
    }

    /// Decode and pack a batch of faces.
    ///
    /// The faces are inserted right away in the loading state, so their ids are stable from
    /// this call on. The batch becomes ready as a unit, or fails as a unit.
    pub fn add_faces<I, P>(&mut self, paths: I) -> Pending<Vec<FaceId>, LoadError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let batch: Vec<(FaceId, PathBuf)> = paths
            .into_iter()
            .map(|p| {
                let path = p.into();
                (self.faces.insert_loading(path.clone()), path)
            })
            .collect();

        if batch.is_empty() {
            return Pending::ready(Ok(Vec::new()));
        }

        for (id, path) in &batch {
            log::debug!("Face[{}]: loading {}", id, path.display());
        }

        let ids: Vec<FaceId> = batch.iter().map(|(id, _)| *id).collect();
        let (tx, rx) = oneshot::channel();
        let cmd = WorkerCommand::Load {
            faces: batch,
            reply: tx,
        };

        if self.cmd_tx.send(cmd).is_err() {
            log::error!("Engine: atlas worker is gone, {} faces cannot load", ids.len());
            let error = crate::engine::WorkerGone;
            self.fail_faces(&ids, &error.to_string());
            return Pending::ready(Err(error.into()));
        }

        self.in_flight += 1;
        Pending::new(rx)
    }

    /// Remove faces by id. They leave composition immediately and leave the face set once
    /// the atlas has been repacked without them, or released when no face is left.
    ///
    /// Fails without removing anything when one of the ids is unknown or already being
    /// removed. When the repack fails the faces are put back as they were.
    pub fn remove_faces(&mut self, ids: &[FaceId]) -> Pending<(), EngineError> {
        if let Some(unknown) = ids.iter().find(|id| !self.faces.is_live(**id)) {
            return Pending::ready(Err(EngineError::UnknownFace(*unknown)));
        }
        if ids.is_empty() {
            return Pending::ready(Ok(()));
        }

        let (tx, rx) = oneshot::channel();
        let cmd = WorkerCommand::Remove {
            ids: ids.to_vec(),
            reply: tx,
        };
        if self.cmd_tx.send(cmd).is_err() {
            return Pending::ready(Err(EngineError::WorkerGone(crate::engine::WorkerGone)));
        }

        for id in ids {
            log::debug!("Face[{}]: removal requested", id);
        }
        self.faces.begin_removal(ids);
        self.compositor.mark(DirtyFlags::FACE_SET);

        self.in_flight += 1;
        Pending::new(rx)
    }

    pub fn set_iterations(&mut self, iterations: u32) {
        self.compositor.set_iterations(iterations);
    }

    pub fn set_max_rotation(&mut self, fraction: f32) {
        self.compositor.set_max_rotation(fraction);
    }

    pub fn set_scale(&mut self, fraction: f32) {
        self.compositor.set_scale(fraction);
    }

    pub fn set_background_color(&mut self, color: Color) {
        self.compositor.set_background(color);
    }

    pub fn set_canvas_size(&mut self, width: u32, height: u32) {
        self.compositor.set_canvas_size(SurfaceSize::new(width, height));
    }

    pub fn set_seed(&mut self, seed: impl Into<Vec<u8>>) {
        self.compositor.set_seed(seed.into());
    }

    pub fn set_viewport_size(&mut self, width: u32, height: u32) {
        if self.presenter.set_viewport_size(width, height) {
            self.compositor.mark(DirtyFlags::VIEWPORT_RELAYOUT);
        }
    }

    /// Drive one draw tick: apply finished background work, consume the dirty flags and
    /// return what to display.
    pub fn render_frame(&mut self) -> Result<PresentedCanvas, EngineError> {
        self.drain_replies();

        let result = self.compositor.tick(self.backend.as_mut(), &mut self.faces)?;
        let canvas_size = self.compositor.params().canvas_size;

        if result.canvas_rebuilt {
            self.presenter.set_canvas_size(canvas_size);
            self.emit(EngineEvent::CanvasRebuilt { size: canvas_size });
        }
        if result.needs_relayout {
            self.presenter.relayout();
        }
        if let Some(instances) = result.composited {
            log::trace!(
                "Engine: frame {} with {} instances",
                self.compositor.frame_id(),
                instances
            );
            self.emit(EngineEvent::Composited {
                frame_id: self.compositor.frame_id(),
                instances,
            });
        }

        let backend = &mut self.backend;
        let handle = self
            .compositor
            .surface_mut()
            .and_then(|surface| backend.external_handle(surface));

        Ok(PresentedCanvas {
            frame_id: self.compositor.frame_id(),
            canvas_size,
            letterbox: self.presenter.letterbox(),
            composited: result.composited.is_some(),
            handle,
        })
    }

    /// Wait for every outstanding background operation and apply its result.
    pub async fn settle(&mut self) {
        while self.in_flight > 0 {
            match self.reply_rx.recv().await {
                Some(reply) => self.apply_reply(reply),
                None => {
                    log::error!("Engine: atlas worker stopped with {} replies outstanding", self.in_flight);
                    self.in_flight = 0;
                }
            }
        }
    }

    /// Read back the composited canvas, compositing first when anything is dirty.
    pub fn canvas_pixels(&mut self) -> Result<PixelBuffer, EngineError> {
        self.render_frame()?;
        let backend = &mut self.backend;
        let surface = self
            .compositor
            .surface_mut()
            .ok_or_else(|| anyhow::anyhow!("canvas surface missing"))?;
        Ok(backend.snapshot(surface)?)
    }

    /// Rasterize the whole viewport: checkerboard backdrop with the letterboxed canvas.
    pub fn present_to_viewport(&mut self) -> Result<PixelBuffer, EngineError> {
        let canvas = self.canvas_pixels()?;
        Ok(self.presenter.compose_viewport(&canvas))
    }

    /// Export the current composite. The canvas is read back on this thread once the
    /// composite is complete; encoding and writing happen in the background.
    pub fn export_snapshot(&mut self, path: impl Into<PathBuf>, format: ExportFormat) -> Pending<(), ExportError> {
        let path = path.into();

        let buffer = match self.canvas_pixels() {
            Ok(buffer) => buffer,
            Err(e) => {
                log::error!("Export: readback for {} failed: {}", path.display(), e);
                self.emit(EngineEvent::ExportFailed {
                    path,
                    error: e.to_string(),
                });
                return Pending::ready(Err(ExportError::Readback(e.to_string())));
            }
        };

        let (tx, rx) = oneshot::channel();
        let event_tx = self.event_tx.clone();
        self.runtime.spawn(async move {
            let task_path = path.clone();
            let result = tokio::task::spawn_blocking(move || write_snapshot(&buffer, &task_path, format))
                .await
                .unwrap_or_else(|e| Err(ExportError::Readback(e.to_string())));

            let event = match &result {
                Ok(()) => EngineEvent::ExportFinished { path },
                Err(e) => {
                    log::error!("Export: writing {} failed: {}", path.display(), e);
                    EngineEvent::ExportFailed {
                        path,
                        error: e.to_string(),
                    }
                }
            };
            let _ = event_tx.send(event);
            let _ = tx.send(result);
        });

        Pending::new(rx)
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn drain_replies(&mut self) {
        while let Ok(reply) = self.reply_rx.try_recv() {
            self.apply_reply(reply);
        }
    }

    fn apply_reply(&mut self, reply: WorkerReply) {
        self.in_flight = self.in_flight.saturating_sub(1);

        match reply {
            WorkerReply::Loaded { faces, update } => {
                self.install(&update);

                let mut added = Vec::new();
                for face in faces {
                    let Some(uv) = update.uv_of(face.id) else {
                        log::error!("Face[{}]: missing from the new atlas", face.id);
                        continue;
                    };
                    if !self.faces.mark_ready(face.id, face.image_size, face.side, uv) {
                        log::debug!("Face[{}]: removed while loading, result discarded", face.id);
                    } else if self.faces.is_live(face.id) {
                        log::debug!("Face[{}]: ready", face.id);
                        added.push(face.id);
                    } else {
                        log::debug!("Face[{}]: loaded with a removal pending", face.id);
                    }
                }

                self.faces.apply_uvs(&update.uvs);
                self.compositor.mark(DirtyFlags::FACE_SET);
                if !added.is_empty() {
                    self.emit(EngineEvent::FacesAdded { ids: added });
                }
            }
            WorkerReply::LoadFailed { ids, error } => {
                self.fail_faces(&ids, &error);
            }
            WorkerReply::Repacked { ids, update } => {
                let removed = self.faces.remove(&ids);
                for id in &removed {
                    log::debug!("Face[{}]: removed", id);
                }

                match update {
                    Some(update) => {
                        self.install(&update);
                        self.faces.apply_uvs(&update.uvs);
                    }
                    None => log::debug!("Atlas: {} removed faces were not packed, nothing to repack", ids.len()),
                }
                self.compositor.mark(DirtyFlags::FACE_SET);
                if !removed.is_empty() {
                    self.emit(EngineEvent::FacesRemoved { ids: removed });
                }
            }
            WorkerReply::RepackFailed { ids, error } => {
                log::error!("Atlas: repack after removing {} faces failed: {}", ids.len(), error);
                self.faces.cancel_removal(&ids);
                self.compositor.mark(DirtyFlags::FACE_SET);
            }
        }
    }

    fn install(&mut self, update: &AtlasUpdate) {
        self.backend.install_atlas(update.atlas.clone());

        match &update.atlas {
            Some(atlas) => {
                log::debug!("Atlas: installed {:?}", atlas);
                self.emit(EngineEvent::AtlasRebuilt {
                    width: atlas.width(),
                    height: atlas.height(),
                    faces: atlas.uvs.len(),
                });
            }
            None => {
                log::debug!("Atlas: cleared");
                self.emit(EngineEvent::AtlasCleared);
            }
        }
    }

    fn fail_faces(&mut self, ids: &[FaceId], error: &str) {
        let mut failed = Vec::new();
        for id in ids {
            if self.faces.mark_failed(*id, error) {
                log::warn!("Face[{}]: failed: {}", id, error);
                failed.push(*id);
            }
        }
        if !failed.is_empty() {
            self.emit(EngineEvent::FacesFailed {
                ids: failed,
                error: error.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::assets::PackedAtlas;
    use crate::engine::{AtlasAllocationError, DecodeError, EngineEvent, FaceState, DEFAULT_CHANNEL_CAPACITY};
    use crate::render::backend::{AtlasAllocator, ErasedSurface, ExternalHandle};
    use crate::render::RenderList;
    use crate::render::backends::cpu::CpuBackend;
    use crate::render::backends::null::NullBackend;
    use crate::render::PlacementRng;
    use crate::test_support::write_solid_png;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const GREEN: [u8; 4] = [0, 255, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn cpu_engine(config: Option<EngineConfig>) -> MosaicEngine {
        let _ = env_logger::builder().is_test(true).try_init();
        MosaicEngine::new(config, Box::new(CpuBackend::new().unwrap())).unwrap()
    }

    fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[test]
    fn engine_needs_a_runtime() {
        let backend = NullBackend::new().unwrap();
        let err = MosaicEngine::new(None, Box::new(backend)).unwrap_err();
        assert!(matches!(err, EngineError::NoRuntime));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.parameters.scale = f32::INFINITY;
        let err = MosaicEngine::new(Some(config), Box::new(NullBackend::new().unwrap())).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn empty_set_renders_background() {
        let config = EngineConfig::builder()
            .canvas_size(8, 4)
            .background(Color::from_u8(1, 2, 3, 255))
            .build()
            .unwrap();
        let mut engine = cpu_engine(Some(config));

        let pixels = engine.canvas_pixels().unwrap();
        assert_eq!((pixels.width, pixels.height), (8, 4));
        assert!(pixels.pixels.chunks(4).all(|px| px == [1, 2, 3, 255]));
    }

    #[tokio::test]
    async fn second_frame_without_changes_does_no_work() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_solid_png(dir.path(), "a.png", 10, 10, RED);
        let mut engine = cpu_engine(None);
        engine.add_faces([a]).await.unwrap();
        engine.settle().await;

        let first = engine.render_frame().unwrap();
        assert!(first.composited);
        let stats = engine.stats();

        let second = engine.render_frame().unwrap();
        assert!(!second.composited);
        assert_eq!(second.frame_id, first.frame_id);
        assert_eq!(engine.stats(), stats);
        assert_eq!(engine.dirty(), DirtyFlags::empty());
    }

    #[tokio::test]
    async fn same_inputs_give_identical_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_solid_png(dir.path(), "a.png", 30, 20, RED);
        let b = write_solid_png(dir.path(), "b.png", 12, 40, GREEN);

        let render = |paths: Vec<PathBuf>| async move {
            let config = EngineConfig::builder()
                .iterations(4)
                .max_rotation(0.4)
                .scale(0.2)
                .build()
                .unwrap();
            let mut engine = cpu_engine(Some(config));
            engine.add_faces(paths).await.unwrap();
            engine.settle().await;
            engine.canvas_pixels().unwrap()
        };

        let first = render(vec![a.clone(), b.clone()]).await;
        let second = render(vec![a, b]).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn one_seed_byte_changes_the_composite() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_solid_png(dir.path(), "a.png", 10, 10, RED);
        let b = write_solid_png(dir.path(), "b.png", 10, 10, GREEN);

        let mut engine = cpu_engine(None);
        engine.set_iterations(2);
        engine.add_faces([a, b]).await.unwrap();
        engine.settle().await;

        let before = engine.canvas_pixels().unwrap();
        engine.set_seed("Seee");
        let after = engine.canvas_pixels().unwrap();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn single_face_lands_where_the_first_draws_say() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_solid_png(dir.path(), "a.png", 100, 100, RED);
        let mut engine = cpu_engine(None);
        engine.add_faces([a]).await.unwrap();
        engine.settle().await;

        let mut rng = PlacementRng::from_seed_bytes(b"Seed");
        let p = rng.next_placement(0.0);
        let cx = 320.0 * (1.0 + p.tx as f64);
        let cy = 240.0 * (1.0 - p.ty as f64);

        let pixels = engine.canvas_pixels().unwrap();
        assert_eq!(pixels.pixel(cx as u32, cy as u32), Some(RED));

        let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0, 0);
        for y in 0..480 {
            for x in 0..640 {
                match pixels.pixel(x, y) {
                    Some(RED) => {
                        min_x = min_x.min(x);
                        min_y = min_y.min(y);
                        max_x = max_x.max(x);
                        max_y = max_y.max(y);
                    }
                    Some(px) => assert_eq!(px, [0, 0, 0, 255]),
                    None => unreachable!(),
                }
            }
        }

        // 0.5 * 480 = 240 pixels on a side, clipped by the canvas
        let expect = |centre: f64, limit: f64| {
            let lo = (centre - 120.0).max(0.0);
            let hi = (centre + 120.0).min(limit) - 1.0;
            (lo, hi)
        };
        let (ex0, ex1) = expect(cx, 640.0);
        let (ey0, ey1) = expect(cy, 480.0);
        assert!((min_x as f64 - ex0).abs() <= 1.0, "{} vs {}", min_x, ex0);
        assert!((max_x as f64 - ex1).abs() <= 1.0, "{} vs {}", max_x, ex1);
        assert!((min_y as f64 - ey0).abs() <= 1.0, "{} vs {}", min_y, ey0);
        assert!((max_y as f64 - ey1).abs() <= 1.0, "{} vs {}", max_y, ey1);
    }

    #[tokio::test]
    async fn removal_matches_a_fresh_set() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_solid_png(dir.path(), "a.png", 10, 10, RED);
        let b = write_solid_png(dir.path(), "b.png", 20, 20, GREEN);
        let c = write_solid_png(dir.path(), "c.png", 15, 30, BLUE);
        let config = EngineConfig::builder().scale(0.3).seed("Z").build().unwrap();

        let mut engine = cpu_engine(Some(config.clone()));
        let ids = engine.add_faces([a.clone(), b, c.clone()]).await.unwrap();
        engine.settle().await;
        engine.remove_faces(&[ids[1]]).await.unwrap();
        engine.settle().await;
        assert_eq!(engine.faces().ids(), vec![ids[0], ids[2]]);

        let mut fresh = cpu_engine(Some(config));
        fresh.add_faces([a, c]).await.unwrap();
        fresh.settle().await;

        assert_eq!(engine.canvas_pixels().unwrap(), fresh.canvas_pixels().unwrap());
    }

    #[tokio::test]
    async fn failed_batch_adds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_solid_png(dir.path(), "good.png", 10, 10, RED);
        let missing = dir.path().join("missing.png");
        let mut engine = cpu_engine(None);
        let mut events = engine.subscribe_events();

        let err = engine.add_faces([good, missing]).await.unwrap_err();
        assert!(matches!(err, LoadError::Decode(DecodeError::Io { .. })));
        engine.settle().await;

        assert_eq!(engine.faces().len(), 2);
        assert!(engine.faces().iter().all(|f| matches!(f.state, FaceState::Failed(_))));
        assert_eq!(engine.faces().ready().count(), 0);

        let pixels = engine.canvas_pixels().unwrap();
        assert!(pixels.pixels.chunks(4).all(|px| px == [0, 0, 0, 255]));
        assert!(drain(&mut events)
            .iter()
            .any(|ev| matches!(ev, EngineEvent::FacesFailed { ids, .. } if ids.len() == 2)));
    }

    #[tokio::test]
    async fn face_removed_while_loading_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_solid_png(dir.path(), "a.png", 10, 10, RED);
        let mut engine = cpu_engine(None);

        let mut events = engine.subscribe_events();
        let pending = engine.add_faces([a]);
        let id = engine.faces().ids()[0];
        assert_eq!(engine.faces().get(id).map(|f| f.state.clone()), Some(FaceState::Loading));

        let removal = engine.remove_faces(&[id]);
        assert!(engine.faces().get(id).is_some_and(|f| f.removing));
        assert!(matches!(
            engine.remove_faces(&[id]).await,
            Err(EngineError::UnknownFace(_))
        ));

        pending.await.unwrap();
        removal.await.unwrap();
        engine.settle().await;

        assert!(engine.faces().is_empty());
        let seen = drain(&mut events);
        assert!(!seen.iter().any(|ev| matches!(ev, EngineEvent::FacesAdded { .. })));
        assert!(seen.contains(&EngineEvent::FacesRemoved { ids: vec![id] }));
        let pixels = engine.canvas_pixels().unwrap();
        assert!(pixels.pixels.chunks(4).all(|px| px == [0, 0, 0, 255]));
    }

    #[tokio::test]
    async fn many_awaited_batches_without_ticking() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_solid_png(dir.path(), "a.png", 2, 2, RED);
        let config = EngineConfig::builder().channel_capacity(1).build().unwrap();
        let mut engine = MosaicEngine::new(Some(config), Box::new(NullBackend::new().unwrap())).unwrap();

        let batches = DEFAULT_CHANNEL_CAPACITY + 6;
        for n in 0..batches {
            let added = tokio::time::timeout(std::time::Duration::from_secs(5), engine.add_faces([a.clone()]))
                .await
                .unwrap_or_else(|_| panic!("batch {} never resolved", n));
            assert_eq!(added.unwrap().len(), 1);
        }

        engine.settle().await;
        assert_eq!(engine.faces().ready().count(), batches);
    }

    #[tokio::test]
    async fn failed_repack_leaves_the_face_set_alone() {
        let dir = tempfile::tempdir().unwrap();
        let small = write_solid_png(dir.path(), "small.png", 1, 1, RED);
        let big = write_solid_png(dir.path(), "big.png", 100, 100, GREEN);
        let config = EngineConfig::builder().max_texture_dimension(200).build().unwrap();
        let mut engine = MosaicEngine::new(Some(config), Box::new(NullBackend::new().unwrap())).unwrap();
        let mut events = engine.subscribe_events();

        // packs to 102x200; without the first face the top row grows to 201 wide
        let ids = engine
            .add_faces([small.clone(), small.clone(), big.clone(), big, small.clone(), small])
            .await
            .unwrap();
        engine.settle().await;

        let err = engine.remove_faces(&[ids[0]]).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Atlas(AtlasAllocationError::TooLarge { width: 201, height: 101, limit: 200 })
        ));
        engine.settle().await;
        assert_eq!(engine.faces().ids(), ids);
        assert_eq!(engine.faces().ready().count(), 6);
        drain(&mut events);

        // the atlas keeps matching the face set afterwards
        engine.remove_faces(&[ids[2]]).await.unwrap();
        engine.settle().await;
        assert_eq!(engine.faces().len(), 5);
        let seen = drain(&mut events);
        assert!(seen.contains(&EngineEvent::AtlasRebuilt {
            width: 102,
            height: 101,
            faces: 5
        }));
        assert!(seen.contains(&EngineEvent::FacesRemoved { ids: vec![ids[2]] }));
    }

    struct RejectAtlases;

    impl AtlasAllocator for RejectAtlases {
        fn allocate(&self, _atlas: PackedAtlas) -> anyhow::Result<Arc<PackedAtlas>> {
            anyhow::bail!("out of texture memory")
        }
    }

    /// Null backend that cannot hold any atlas.
    struct NoAtlasBackend(NullBackend);

    impl RenderBackend for NoAtlasBackend {
        fn name(&self) -> &str {
            "NoAtlasBackend"
        }

        fn max_texture_dimension(&self) -> u32 {
            self.0.max_texture_dimension()
        }

        fn create_surface(&self, size: SurfaceSize) -> anyhow::Result<Box<dyn ErasedSurface + Send>> {
            self.0.create_surface(size)
        }

        fn atlas_allocator(&self) -> Arc<dyn AtlasAllocator> {
            Arc::new(RejectAtlases)
        }

        fn install_atlas(&mut self, atlas: Option<Arc<PackedAtlas>>) {
            self.0.install_atlas(atlas)
        }

        fn render(&mut self, list: &RenderList, surface: &mut dyn ErasedSurface) -> anyhow::Result<()> {
            self.0.render(list, surface)
        }

        fn snapshot(&mut self, surface: &mut dyn ErasedSurface) -> anyhow::Result<PixelBuffer> {
            self.0.snapshot(surface)
        }

        fn external_handle(&mut self, surface: &mut dyn ErasedSurface) -> Option<ExternalHandle> {
            self.0.external_handle(surface)
        }
    }

    #[tokio::test]
    async fn atlas_allocation_failure_reaches_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_solid_png(dir.path(), "a.png", 10, 10, RED);
        let backend = NoAtlasBackend(NullBackend::new().unwrap());
        let mut engine = MosaicEngine::new(None, Box::new(backend)).unwrap();
        let mut events = engine.subscribe_events();

        let err = engine.add_faces([a]).await.unwrap_err();
        assert!(matches!(err, LoadError::Atlas(AtlasAllocationError::Rejected(_))));
        engine.settle().await;

        assert!(engine.faces().iter().all(|f| f.is_failed()));
        let seen = drain(&mut events);
        assert!(!seen.iter().any(|ev| matches!(ev, EngineEvent::FacesAdded { .. })));
        assert!(!seen.iter().any(|ev| matches!(ev, EngineEvent::AtlasRebuilt { .. })));
    }

    #[tokio::test]
    async fn unknown_id_is_rejected() {
        let mut engine = cpu_engine(None);
        let stranger = FaceId::new();
        let err = engine.remove_faces(&[stranger]).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownFace(id) if id == stranger));
    }

    #[tokio::test]
    async fn atlas_events_follow_the_face_set() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_solid_png(dir.path(), "a.png", 10, 10, RED);
        let b = write_solid_png(dir.path(), "b.png", 6, 6, GREEN);
        let mut engine = cpu_engine(None);
        let mut events = engine.subscribe_events();

        let ids = engine.add_faces([a, b]).await.unwrap();
        engine.settle().await;
        let seen = drain(&mut events);
        assert!(seen.contains(&EngineEvent::AtlasRebuilt {
            width: 16,
            height: 10,
            faces: 2
        }));
        assert!(seen.contains(&EngineEvent::FacesAdded { ids: ids.clone() }));

        engine.remove_faces(&ids).await.unwrap();
        engine.settle().await;
        let seen = drain(&mut events);
        assert!(seen.contains(&EngineEvent::FacesRemoved { ids }));
        assert!(seen.contains(&EngineEvent::AtlasCleared));
    }

    #[tokio::test]
    async fn canvas_resize_rebuilds_and_relayouts() {
        let config = EngineConfig::builder().viewport(800, 400).build().unwrap();
        let mut engine = cpu_engine(Some(config));
        let mut events = engine.subscribe_events();

        let frame = engine.render_frame().unwrap();
        assert!((frame.letterbox.height - 400.0).abs() < 1e-9);

        engine.set_canvas_size(400, 400);
        let frame = engine.render_frame().unwrap();
        assert_eq!(frame.canvas_size, SurfaceSize::new(400, 400));
        assert_eq!((frame.letterbox.x, frame.letterbox.width), (200.0, 400.0));
        assert!(drain(&mut events).contains(&EngineEvent::CanvasRebuilt {
            size: SurfaceSize::new(400, 400)
        }));
        assert_eq!(engine.stats().canvas_rebuilds, 2);
    }

    #[tokio::test]
    async fn viewport_change_does_not_recomposite() {
        let mut engine = cpu_engine(None);
        engine.render_frame().unwrap();
        let composites = engine.stats().composites;

        engine.set_viewport_size(320, 240);
        assert_eq!(engine.dirty(), DirtyFlags::VIEWPORT_RELAYOUT);
        let frame = engine.render_frame().unwrap();
        assert!(!frame.composited);
        assert_eq!(frame.letterbox.factor, 0.5);
        assert_eq!(engine.stats().composites, composites);
    }

    #[tokio::test]
    async fn viewport_image_has_viewport_size() {
        let config = EngineConfig::builder()
            .canvas_size(4, 2)
            .viewport(16, 16)
            .build()
            .unwrap();
        let mut engine = cpu_engine(Some(config));

        let out = engine.present_to_viewport().unwrap();
        assert_eq!((out.width, out.height), (16, 16));
        // canvas sits in rows 4..12
        assert_eq!(out.pixel(8, 8), Some([0, 0, 0, 255]));
        assert_ne!(out.pixel(8, 0), Some([0, 0, 0, 255]));
    }

    #[tokio::test]
    async fn export_matches_the_composite() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_solid_png(dir.path(), "a.png", 40, 20, BLUE);
        let out = dir.path().join("mosaic.png");
        let mut engine = cpu_engine(None);
        let mut events = engine.subscribe_events();
        engine.set_iterations(3);
        engine.add_faces([a]).await.unwrap();
        engine.settle().await;

        engine.export_snapshot(&out, ExportFormat::Png).await.unwrap();

        let decoded = image::open(&out).unwrap().into_rgba8();
        assert_eq!(decoded.dimensions(), (640, 480));
        assert_eq!(decoded.into_raw(), engine.canvas_pixels().unwrap().pixels);
        assert!(drain(&mut events).contains(&EngineEvent::ExportFinished { path: out }));
    }

    #[tokio::test]
    async fn export_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nope").join("mosaic.tiff");
        let mut engine = cpu_engine(None);

        let err = engine.export_snapshot(&out, ExportFormat::Tiff).await.unwrap_err();
        assert!(matches!(err, ExportError::Io { .. }));
        assert!(!out.exists());
    }
}
