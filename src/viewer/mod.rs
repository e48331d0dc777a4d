//! Host-facing viewer API.
//!
//! A [`Viewer`] owns one scene: the environment, the model registry, the
//! gizmo, the camera and the renderer handle. All calls happen on the host's
//! thread; only [`Viewer::load_new_model`] suspends, while its import runs on
//! a worker thread, and it touches no state until the import has finished.

pub mod config;
pub mod events;

pub use config::{ConfigError, ViewerOptions};
pub use events::{EventBus, Subscription, ViewerEvent};

use crate::assets::blob::{self, BlobStore};
use crate::assets::importer::{GltfImporter, Importer};
use crate::assets::{
    lifecycle, placement_for, AssetError, AssetLoader, ImportedAsset, PendingImport,
};
use crate::render::pick::{self, PickOutcome, Ray};
use crate::render::{
    CameraRig, DragCommit, FrameView, GizmoController, Renderer, TransformMode,
};
use crate::scene::host::{HostError, SceneHost};
use crate::scene::registry::{CommitError, ModelRegistry, ModelSummary, NewModel, SourceRef};
use crate::scene::{NodeId, ResourceHandle, SceneGraph, Transform};
use config::ModelLoadedCallback;
use glam::{Vec2, Vec3};
use std::path::Path;

/// Pointer travel (physical pixels) below which a press/release is a click.
const CLICK_TOLERANCE: f32 = 4.0;
const ORBIT_RADIANS_PER_PIXEL: f32 = 0.005;
const ZOOM_PER_LINE: f32 = 0.9;

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("viewer has been disposed")]
    Disposed,
}

/// What to load.
#[derive(Debug, Clone)]
pub enum ModelSource {
    /// File path, `file://` URL, or a `blob:` URL from
    /// [`Viewer::create_object_url`].
    Url(String),
    /// In-memory file contents. Registered as a temporary reference that is
    /// revoked when the model is removed.
    Bytes { name: String, bytes: Vec<u8> },
}

/// A load whose import is still running. Poll it with
/// [`PendingLoad::try_import`] and hand the result to [`Viewer::finish_load`].
pub struct PendingLoad {
    source_ref: SourceRef,
    file_name: Option<String>,
    file_size: Option<u64>,
    import: PendingImport,
}

impl PendingLoad {
    pub fn origin(&self) -> &str {
        self.import.origin()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn try_import(&mut self) -> Option<Result<ImportedAsset, AssetError>> {
        self.import.try_take()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PointerState {
    pressed_at: Option<Vec2>,
    dragging_gizmo: bool,
}

pub struct Viewer {
    container_id: String,
    graph: SceneGraph,
    host: SceneHost,
    registry: ModelRegistry,
    loader: AssetLoader,
    blobs: BlobStore,
    gizmo: GizmoController,
    rig: CameraRig,
    renderer: Box<dyn Renderer>,
    events: EventBus,
    on_model_loaded: Option<ModelLoadedCallback>,
    highlighted: Option<NodeId>,
    viewport: (u32, u32),
    pointer: PointerState,
    rendering: bool,
    disposed: bool,
}

/// Builds a viewer with the default glTF importer.
pub fn create_viewer(
    container_id: &str,
    options: ViewerOptions,
    renderer: Box<dyn Renderer>,
) -> Viewer {
    Viewer::new(container_id, options, renderer, Box::new(GltfImporter))
}

impl Viewer {
    pub fn new(
        container_id: &str,
        options: ViewerOptions,
        renderer: Box<dyn Renderer>,
        importer: Box<dyn Importer>,
    ) -> Self {
        let ViewerOptions {
            show_grid,
            marker_mode,
            background_color,
            on_model_loaded,
        } = options;
        let mut graph = SceneGraph::new();
        let host = SceneHost::new(&mut graph, show_grid, marker_mode, background_color);
        let events = EventBus::new();
        let registry = ModelRegistry::new(host.root(), events.clone());
        log::info!("viewer '{}' created", container_id);
        Self {
            container_id: container_id.to_string(),
            graph,
            host,
            registry,
            loader: AssetLoader::new(importer, placement_for(marker_mode)),
            blobs: BlobStore::new(),
            gizmo: GizmoController::new(),
            rig: CameraRig::default(),
            renderer,
            events,
            on_model_loaded,
            highlighted: None,
            viewport: (0, 0),
            pointer: PointerState::default(),
            rendering: true,
            disposed: false,
        }
    }

    // ---- observation ---------------------------------------------------

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(&ViewerEvent) + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn get_all_models(&self) -> Vec<ModelSummary> {
        self.registry.get_all()
    }

    pub fn get_active_model_index(&self) -> Option<usize> {
        self.registry.active_index()
    }

    pub fn get_active_model_info(&self) -> Option<ModelSummary> {
        self.registry.summary(self.registry.active_index()?)
    }

    pub fn model_count(&self) -> usize {
        self.registry.len()
    }

    pub fn transform_mode(&self) -> TransformMode {
        self.gizmo.mode()
    }

    pub fn transform_controls_visible(&self) -> bool {
        self.gizmo.visible()
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    pub fn host(&self) -> &SceneHost {
        &self.host
    }

    pub fn camera_rig(&self) -> &CameraRig {
        &self.rig
    }

    pub fn gizmo(&self) -> &GizmoController {
        &self.gizmo
    }

    pub fn highlighted(&self) -> Option<NodeId> {
        self.highlighted
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    // ---- temporary references -------------------------------------------

    /// Registers bytes as a temporary `blob:` reference loadable through
    /// [`ModelSource::Url`].
    pub fn create_object_url(&mut self, bytes: Vec<u8>) -> String {
        self.blobs.register(bytes)
    }

    pub fn revoke_object_url(&mut self, url: &str) -> bool {
        self.blobs.revoke(url)
    }

    // ---- loading ----------------------------------------------------------

    /// Loads, normalizes and registers a model, makes it active and frames
    /// the camera on it. Returns the new model's index.
    ///
    /// `file_name` and `file_size` override what the source implies, which
    /// matters for `blob:` URLs that carry no name of their own.
    ///
    /// The read and decode run on a worker thread; the viewer is not touched
    /// until they finish. Dropping the future discards the result, apart from
    /// a temporary reference created for `ModelSource::Bytes`, which stays
    /// registered until `dispose`.
    pub async fn load_new_model(
        &mut self,
        source: ModelSource,
        file_name: Option<String>,
        file_size: Option<u64>,
    ) -> Result<usize, ViewerError> {
        let mut load = self.start_load(source, file_name, file_size)?;
        let result = (&mut load.import).await;
        self.finish_load(load, result)
    }

    /// First half of [`Viewer::load_new_model`] for hosts that poll instead
    /// of awaiting: starts the import and returns without waiting for it.
    pub fn start_load(
        &mut self,
        source: ModelSource,
        file_name: Option<String>,
        file_size: Option<u64>,
    ) -> Result<PendingLoad, ViewerError> {
        if self.disposed {
            return Err(ViewerError::Disposed);
        }
        let (source_ref, file_name) = match source {
            ModelSource::Url(url) if blob::is_blob_url(&url) => {
                (SourceRef::Temporary(url), file_name)
            }
            ModelSource::Url(url) => (SourceRef::Url(url), file_name),
            ModelSource::Bytes { name, bytes } => (
                SourceRef::Temporary(self.blobs.register(bytes)),
                file_name.or(Some(name)),
            ),
        };
        log::info!("loading {}", source_ref.as_str());

        match self.loader.import(&source_ref, &self.blobs) {
            Ok(import) => Ok(PendingLoad {
                source_ref,
                file_name,
                file_size,
                import,
            }),
            Err(err) => Err(self.load_failed(&source_ref, err)),
        }
    }

    /// Second half of [`Viewer::load_new_model`]: registers the imported
    /// model, or cleans up after a failed import.
    pub fn finish_load(
        &mut self,
        load: PendingLoad,
        result: Result<ImportedAsset, AssetError>,
    ) -> Result<usize, ViewerError> {
        let PendingLoad {
            source_ref,
            file_name,
            file_size,
            ..
        } = load;
        if self.disposed {
            log::debug!("discarding {} finished after dispose", source_ref.as_str());
            return Err(ViewerError::Disposed);
        }
        let imported = match result {
            Ok(imported) => imported,
            Err(err) => return Err(self.load_failed(&source_ref, err)),
        };

        let mut prepared = self.loader.instantiate(&mut self.graph, imported);
        if let Some(name) = file_name {
            prepared.file_name = name;
        }
        if let Some(size) = file_size {
            prepared.file_size = size;
        }
        let size = prepared.size;
        let index = self.registry.add(
            &mut self.graph,
            NewModel {
                node: prepared.node,
                source_ref,
                file_name: prepared.file_name,
                file_size: prepared.file_size,
                transform: prepared.transform,
            },
        );
        self.select(index);
        self.frame_model(Some(index));
        if let Some(callback) = self.on_model_loaded.as_mut() {
            callback(size);
        }
        Ok(index)
    }

    fn load_failed(&mut self, source_ref: &SourceRef, err: AssetError) -> ViewerError {
        log::warn!("load of {} failed: {}", source_ref.as_str(), err);
        if let SourceRef::Temporary(url) = source_ref {
            self.blobs.revoke(url);
        }
        err.into()
    }

    // ---- selection --------------------------------------------------------

    /// Activates `index` and attaches the gizmo. Out-of-range indices are
    /// rejected.
    pub fn switch_to_model(&mut self, index: usize) -> bool {
        if self.disposed {
            return false;
        }
        self.select(index)
    }

    pub fn deselect(&mut self) {
        self.gizmo.detach();
        self.highlighted = None;
        self.registry.clear_active(&mut self.graph);
    }

    fn select(&mut self, index: usize) -> bool {
        if !self.registry.switch_active(&mut self.graph, index) {
            log::warn!("no model at index {}", index);
            return false;
        }
        self.attach_to_active();
        true
    }

    /// Points the gizmo and highlight at the active model, or clears both when
    /// there is none or it is hidden.
    fn attach_to_active(&mut self) {
        let Some(entry) = self.registry.active() else {
            self.gizmo.detach();
            self.highlighted = None;
            return;
        };
        let (id, node) = (entry.id(), entry.node());
        if self.gizmo.attach(&self.graph, id, node) {
            self.highlighted = Some(node);
        } else {
            self.highlighted = None;
        }
    }

    // ---- removal ----------------------------------------------------------

    pub fn remove_model(&mut self, index: usize) -> bool {
        if self.disposed {
            return false;
        }
        let Some(entry) = self.registry.get(index) else {
            log::warn!("remove: no model at index {}", index);
            return false;
        };
        if self.gizmo.attached_model() == Some(entry.id()) {
            self.gizmo.detach();
        }
        if self.highlighted == Some(entry.node()) {
            self.highlighted = None;
        }
        let Some(released) = self.registry.remove(&mut self.graph, &mut self.blobs, index) else {
            return false;
        };
        self.release(&released);
        self.attach_to_active();
        true
    }

    fn release(&mut self, released: &[ResourceHandle]) {
        let failures = lifecycle::notify_renderer(self.renderer.as_mut(), released);
        if failures > 0 {
            log::warn!("{} of {} release(s) failed", failures, released.len());
        }
    }

    // ---- transforms -------------------------------------------------------

    pub fn set_transform_mode(&mut self, mode: &str) -> bool {
        self.gizmo.set_mode_str(mode)
    }

    /// Shows or hides the gizmo. Returns the new visibility.
    pub fn toggle_transform_controls(&mut self) -> bool {
        self.gizmo.toggle_visible()
    }

    /// Shows or hides the gizmo handles without changing the attachment.
    pub fn set_transform_controls_visible(&mut self, visible: bool) {
        self.gizmo.set_visible(visible);
    }

    /// Uniform scale of the active model.
    pub fn set_scale(&mut self, scale: f32) -> bool {
        self.update_active_transform(|transform| transform.scale = Vec3::splat(scale))
    }

    /// Yaw of the active model in degrees.
    pub fn set_rotation_y(&mut self, degrees: f32) -> bool {
        self.update_active_transform(|transform| transform.rotation.y = degrees.to_radians())
    }

    pub fn set_position(&mut self, x: f32, y: f32, z: f32) -> bool {
        self.update_active_transform(|transform| transform.position = Vec3::new(x, y, z))
    }

    fn update_active_transform<F>(&mut self, edit: F) -> bool
    where
        F: FnOnce(&mut Transform),
    {
        if self.disposed {
            return false;
        }
        let Some(index) = self.registry.active_index() else {
            return false;
        };
        let Some(mut transform) = self.registry.get(index).map(|entry| entry.transform()) else {
            return false;
        };
        edit(&mut transform);
        match self.registry.commit_transform(&mut self.graph, index, transform) {
            Ok(()) => true,
            Err(CommitError::Rejected(reason)) => {
                log::warn!("ignored transform for model {}: {}", index, reason);
                false
            }
            Err(err) => {
                log::warn!("{}", err);
                false
            }
        }
    }

    // ---- visibility -------------------------------------------------------

    pub fn set_model_visibility(&mut self, index: usize, visible: bool) -> bool {
        if self.disposed || !self.registry.set_visibility(&mut self.graph, index, visible) {
            return false;
        }
        if self.registry.active_index() == Some(index) {
            self.attach_to_active();
        }
        true
    }

    // ---- camera -----------------------------------------------------------

    /// Frames the active model, or returns to the default pose when nothing is
    /// active.
    pub fn reset_camera(&mut self) {
        self.frame_model(self.registry.active_index());
    }

    fn frame_model(&mut self, index: Option<usize>) {
        let sphere = index
            .and_then(|index| self.registry.get(index))
            .map(|entry| self.graph.world_bounds(entry.node()))
            .filter(|bounds| bounds.is_valid())
            .map(|bounds| bounds.bounding_sphere());
        self.rig.frame(sphere);
    }

    pub fn orbit(&mut self, delta_pixels: Vec2) {
        self.rig.orbit(
            -delta_pixels.x * ORBIT_RADIANS_PER_PIXEL,
            delta_pixels.y * ORBIT_RADIANS_PER_PIXEL,
        );
    }

    /// Positive lines zoom in.
    pub fn zoom(&mut self, lines: f32) {
        self.rig.zoom(ZOOM_PER_LINE.powf(lines));
    }

    // ---- environment ------------------------------------------------------

    pub fn set_marker_texture(&mut self, path: &Path) -> Result<(), ViewerError> {
        if self.disposed {
            return Err(ViewerError::Disposed);
        }
        let released = self.host.set_marker_texture(&mut self.graph, path)?;
        self.release(&released);
        Ok(())
    }

    pub fn set_background_color(&mut self, color: [f32; 4]) {
        self.host.set_background_color(color);
    }

    // ---- pointer input ----------------------------------------------------

    fn ray_at(&self, screen: Vec2) -> Option<Ray> {
        let (width, height) = self.viewport;
        self.rig
            .camera
            .ray_from_screen(screen, Vec2::new(width as f32, height as f32))
    }

    /// Starts a gizmo drag when the press lands on a handle; otherwise the
    /// press may become a pick on release. Returns whether a drag started.
    pub fn pointer_down(&mut self, screen: Vec2) -> bool {
        if self.disposed {
            return false;
        }
        let Some(ray) = self.ray_at(screen) else {
            return false;
        };
        if self.gizmo.begin_drag(&self.graph, &self.rig.camera, &ray) {
            self.pointer = PointerState {
                pressed_at: None,
                dragging_gizmo: true,
            };
            return true;
        }
        self.pointer = PointerState {
            pressed_at: Some(screen),
            dragging_gizmo: false,
        };
        false
    }

    pub fn pointer_move(&mut self, screen: Vec2) -> DragCommit {
        if self.disposed || !self.pointer.dragging_gizmo {
            return DragCommit::Idle;
        }
        let Some(ray) = self.ray_at(screen) else {
            return DragCommit::Idle;
        };
        if !self.gizmo.drag_to(&mut self.graph, &ray) {
            return DragCommit::Idle;
        }
        self.gizmo.on_drag_update(&mut self.graph, &mut self.registry)
    }

    /// Ends a drag, or picks when the pointer barely moved since the press.
    pub fn pointer_up(&mut self, screen: Vec2) -> Option<PickOutcome> {
        let pointer = std::mem::take(&mut self.pointer);
        if pointer.dragging_gizmo {
            self.gizmo.end_drag();
            return None;
        }
        let pressed_at = pointer.pressed_at?;
        if pressed_at.distance(screen) > CLICK_TOLERANCE {
            return None;
        }
        Some(self.pick(screen))
    }

    /// Resolves a screen point to a model and selects it; anything else
    /// deselects.
    pub fn pick(&mut self, screen: Vec2) -> PickOutcome {
        if self.disposed {
            return PickOutcome::Missed;
        }
        let outcome = match self.ray_at(screen) {
            Some(ray) => pick::resolve_pick(&self.graph, &self.registry, &ray),
            None => PickOutcome::Missed,
        };
        match outcome {
            PickOutcome::Model { index, .. } => {
                self.select(index);
            }
            PickOutcome::Missed | PickOutcome::Unmanaged { .. } => self.deselect(),
        }
        log::debug!("pick at {:?}: {:?}", screen, outcome);
        outcome
    }

    // ---- frame loop -------------------------------------------------------

    pub fn resize(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
        if height > 0 {
            self.rig.set_aspect(width as f32 / height as f32);
        }
        self.renderer.resize(width, height);
    }

    /// Per-frame callback. Returns `false` once the viewer is disposed.
    pub fn render_frame(&mut self) -> bool {
        if self.disposed || !self.rendering {
            return false;
        }
        let frame = FrameView {
            graph: &self.graph,
            root: self.host.root(),
            camera: &self.rig.camera,
            background_color: self.host.background_color(),
            highlighted: self.highlighted,
            gizmo: self.gizmo.overlay(&self.graph, &self.rig.camera),
        };
        if let Err(err) = self.renderer.render(&frame) {
            log::warn!("render failed: {}", err);
        }
        true
    }

    // ---- teardown ---------------------------------------------------------

    /// Stops rendering and releases every model, the environment and all
    /// temporary references. Later calls do nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.rendering = false;
        self.gizmo.detach();
        self.highlighted = None;
        self.pointer = PointerState::default();

        let mut released = self.registry.dispose_all(&mut self.graph, &mut self.blobs);
        released.extend(self.host.dispose(&mut self.graph));
        let revoked = self.blobs.revoke_all();
        self.release(&released);
        log::info!(
            "viewer '{}' disposed: {} resource(s) released, {} temporary reference(s) revoked",
            self.container_id,
            released.len(),
            revoked
        );
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::importer::fixtures::TRIANGLE_GLTF;
    use crate::assets::importer::{GatedImporter, MeshImporter};
    use crate::render::testing::{Recording, RecordingRenderer};
    use std::cell::{Cell, RefCell};
    use std::future::Future;
    use std::rc::Rc;
    use std::task::Context;

    struct Harness {
        viewer: Viewer,
        recording: Rc<RefCell<Recording>>,
        events: Rc<RefCell<Vec<ViewerEvent>>>,
        _subscription: Subscription,
    }

    impl Harness {
        fn new(importer: MeshImporter) -> Self {
            Self::with_options(importer, ViewerOptions::default())
        }

        fn with_options(importer: MeshImporter, options: ViewerOptions) -> Self {
            let (renderer, recording) = RecordingRenderer::new();
            let mut viewer = Viewer::new("stage", options, Box::new(renderer), Box::new(importer));
            viewer.resize(800, 600);
            let events = Rc::new(RefCell::new(Vec::new()));
            let subscription = {
                let events = Rc::clone(&events);
                viewer.subscribe(move |event| events.borrow_mut().push(event.clone()))
            };
            Self {
                viewer,
                recording,
                events,
                _subscription: subscription,
            }
        }

        fn load(&mut self, name: &str) -> usize {
            let source = ModelSource::Bytes {
                name: name.to_string(),
                bytes: name.as_bytes().to_vec(),
            };
            pollster::block_on(self.viewer.load_new_model(source, None, None)).unwrap()
        }

        fn take_events(&self) -> Vec<ViewerEvent> {
            std::mem::take(&mut *self.events.borrow_mut())
        }

        fn center(&self) -> Vec2 {
            Vec2::new(400.0, 300.0)
        }
    }

    #[test]
    fn load_activates_and_frames() {
        let mut h = Harness::new(MeshImporter::cube(4.0));
        let index = h.load("a.glb");

        assert_eq!(index, 0);
        assert_eq!(h.viewer.get_active_model_index(), Some(0));
        let info = h.viewer.get_active_model_info().unwrap();
        assert_eq!(info.file_name, "a.glb");
        assert_eq!(info.file_size, 5);
        assert!(info.is_active);
        // framed on the normalized model resting on the ground
        assert!((h.viewer.camera_rig().camera.target.y - 1.0).abs() < 1e-4);
        assert!(h.viewer.gizmo().visible());
        assert_eq!(
            h.take_events(),
            vec![
                ViewerEvent::ModelListChanged { count: 1 },
                ViewerEvent::ActiveModelChanged {
                    index: Some(0),
                    previous_index: None
                },
            ]
        );
    }

    #[test]
    fn removing_first_of_two_keeps_second_active() {
        let mut h = Harness::new(MeshImporter::cube(1.0));
        h.load("a.glb");
        h.load("b.glb");
        assert_eq!(h.viewer.get_active_model_index(), Some(1));

        assert!(h.viewer.remove_model(0));
        assert_eq!(h.viewer.get_active_model_index(), Some(0));
        assert_eq!(h.viewer.get_active_model_info().unwrap().file_name, "b.glb");
        let node = h.viewer.registry.get(0).unwrap().node();
        assert_eq!(h.viewer.gizmo().attached_node(), Some(node));
        assert_eq!(h.viewer.highlighted(), Some(node));
    }

    #[test]
    fn removing_active_model_revokes_its_temporary_reference() {
        let mut h = Harness::new(MeshImporter::cube(1.0));
        h.load("a.glb");
        assert_eq!(h.viewer.blobs.len(), 1);

        assert!(h.viewer.remove_model(0));
        assert!(h.viewer.blobs.is_empty());
        assert_eq!(h.viewer.get_active_model_index(), None);
        assert!(h.viewer.gizmo().attached_node().is_none());
        // geometry + material of the single primitive
        assert_eq!(h.recording.borrow().released.len(), 2);
        assert!(!h.viewer.remove_model(0));
    }

    #[test]
    fn failed_load_adds_nothing_and_revokes() {
        let mut h = Harness::new(MeshImporter::failing());
        let source = ModelSource::Bytes {
            name: "broken.glb".to_string(),
            bytes: vec![0; 8],
        };
        let result = pollster::block_on(h.viewer.load_new_model(source, None, None));
        assert!(matches!(result, Err(ViewerError::Asset(_))));
        assert_eq!(h.viewer.model_count(), 0);
        assert!(h.viewer.blobs.is_empty());
        assert!(h.take_events().is_empty());
    }

    #[test]
    fn object_urls_load_as_temporary_references() {
        let mut h = Harness::new(MeshImporter::cube(1.0));
        let url = h.viewer.create_object_url(b"cube".to_vec());
        pollster::block_on(h.viewer.load_new_model(ModelSource::Url(url.clone()), None, None))
            .unwrap();
        assert!(h.viewer.blobs.contains(&url));
        h.viewer.remove_model(0);
        assert!(!h.viewer.blobs.contains(&url));
    }

    #[test]
    fn caller_metadata_names_object_url_models() {
        let mut h = Harness::new(MeshImporter::cube(1.0));
        let url = h.viewer.create_object_url(b"cube".to_vec());
        let source = ModelSource::Url(url.clone());
        pollster::block_on(h.viewer.load_new_model(
            source,
            Some("chair.glb".to_string()),
            Some(2048),
        ))
        .unwrap();
        let info = h.viewer.get_active_model_info().unwrap();
        assert_eq!(info.file_name, "chair.glb");
        assert_eq!(info.file_size, 2048);

        // Without metadata the size comes from the referenced bytes.
        let url = h.viewer.create_object_url(b"cube".to_vec());
        pollster::block_on(h.viewer.load_new_model(ModelSource::Url(url.clone()), None, None))
            .unwrap();
        let info = h.viewer.get_active_model_info().unwrap();
        assert_eq!(info.file_name, url);
        assert_eq!(info.file_size, 4);
    }

    #[test]
    fn load_suspends_until_the_import_finishes() {
        let (importer, gate) = GatedImporter::new(MeshImporter::cube(1.0));
        let (renderer, _) = RecordingRenderer::new();
        let mut viewer =
            Viewer::new("stage", ViewerOptions::default(), Box::new(renderer), Box::new(importer));
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        {
            let source = ModelSource::Bytes {
                name: "a.glb".to_string(),
                bytes: vec![1, 2, 3],
            };
            let mut load = Box::pin(viewer.load_new_model(source, None, None));
            assert!(load.as_mut().poll(&mut cx).is_pending());
            gate.send(()).unwrap();
            assert_eq!(pollster::block_on(load).unwrap(), 0);
        }
        assert_eq!(viewer.model_count(), 1);
    }

    #[test]
    fn dropped_load_leaves_the_viewer_untouched() {
        let (importer, gate) = GatedImporter::new(MeshImporter::cube(1.0));
        let (renderer, _) = RecordingRenderer::new();
        let mut viewer =
            Viewer::new("stage", ViewerOptions::default(), Box::new(renderer), Box::new(importer));
        let nodes = viewer.graph().node_count();
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        {
            let mut load =
                Box::pin(viewer.load_new_model(ModelSource::Url("chair.glb".into()), None, None));
            assert!(load.as_mut().poll(&mut cx).is_pending());
        }
        gate.send(()).unwrap();
        assert_eq!(viewer.model_count(), 0);
        assert_eq!(viewer.graph().node_count(), nodes);
        assert_eq!(viewer.get_active_model_index(), None);
    }

    #[test]
    fn polled_load_registers_once_the_import_is_ready() {
        let (importer, gate) = GatedImporter::new(MeshImporter::cube(1.0));
        let (renderer, _) = RecordingRenderer::new();
        let mut viewer =
            Viewer::new("stage", ViewerOptions::default(), Box::new(renderer), Box::new(importer));
        let source = ModelSource::Bytes {
            name: "a.glb".to_string(),
            bytes: vec![1, 2, 3],
        };
        let mut load = viewer.start_load(source, None, None).unwrap();
        assert_eq!(load.file_name(), Some("a.glb"));
        assert!(load.try_import().is_none());
        // The host keeps rendering while the import runs.
        assert!(viewer.render_frame());
        assert_eq!(viewer.model_count(), 0);

        gate.send(()).unwrap();
        let result = loop {
            if let Some(result) = load.try_import() {
                break result;
            }
            std::thread::yield_now();
        };
        assert_eq!(viewer.finish_load(load, result).unwrap(), 0);
        assert_eq!(viewer.get_active_model_info().unwrap().file_name, "a.glb");
    }

    #[test]
    fn load_finishing_after_dispose_is_discarded() {
        let mut h = Harness::new(MeshImporter::cube(1.0));
        let mut load = h
            .viewer
            .start_load(ModelSource::Url("chair.glb".into()), None, None)
            .unwrap();
        let result = pollster::block_on(&mut load.import);
        h.viewer.dispose();
        assert!(matches!(h.viewer.finish_load(load, result), Err(ViewerError::Disposed)));
        assert_eq!(h.viewer.model_count(), 0);
    }

    #[test]
    fn zero_volume_model_loads_at_unit_scale() {
        let mut h = Harness::new(MeshImporter::from_points(vec![Vec3::splat(2.0); 3]));
        h.load("point.glb");
        assert_eq!(h.viewer.get_active_model_info().unwrap().scale, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn set_position_round_trips() {
        let mut h = Harness::new(MeshImporter::cube(1.0));
        h.load("a.glb");
        h.take_events();

        assert!(h.viewer.set_position(1.0, 2.0, 3.0));
        assert_eq!(h.viewer.get_active_model_info().unwrap().position, [1.0, 2.0, 3.0]);
        assert!(matches!(
            h.take_events().as_slice(),
            [ViewerEvent::TransformChanged { index: 0, position, .. }] if *position == [1.0, 2.0, 3.0]
        ));
    }

    #[test]
    fn set_scale_rejects_degenerate_values() {
        let mut h = Harness::new(MeshImporter::cube(1.0));
        h.load("a.glb");
        assert!(h.viewer.set_scale(3.0));
        h.take_events();

        for bad in [f32::NAN, f32::INFINITY, 0.0, 0.0005] {
            assert!(!h.viewer.set_scale(bad));
            assert_eq!(h.viewer.get_active_model_info().unwrap().scale, [3.0; 3]);
        }
        assert!(h.take_events().is_empty());
    }

    #[test]
    fn set_rotation_y_takes_degrees() {
        let mut h = Harness::new(MeshImporter::cube(1.0));
        h.load("a.glb");
        assert!(h.viewer.set_rotation_y(45.0));
        let info = h.viewer.get_active_model_info().unwrap();
        assert!((info.rotation_deg[1] - 45.0).abs() < 1e-4);
    }

    #[test]
    fn transform_setters_need_an_active_model() {
        let mut h = Harness::new(MeshImporter::cube(1.0));
        assert!(!h.viewer.set_scale(2.0));
        assert!(!h.viewer.set_position(0.0, 0.0, 0.0));
    }

    #[test]
    fn unknown_transform_mode_is_rejected() {
        let mut h = Harness::new(MeshImporter::cube(1.0));
        assert!(h.viewer.set_transform_mode("scale"));
        assert!(!h.viewer.set_transform_mode("bogus"));
        assert_eq!(h.viewer.transform_mode(), TransformMode::Scale);
    }

    /// Flat triangle on the ground whose interior covers the bounds center,
    /// so a ray through the framed center hits it away from any edge.
    fn floor_triangle() -> MeshImporter {
        MeshImporter::from_points(vec![
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(0.0, 0.0, 1.5),
        ])
    }

    #[test]
    fn picking_the_model_selects_it_and_missing_deselects() {
        let mut h = Harness::new(floor_triangle());
        h.load("a.glb");
        h.load("b.glb");
        h.viewer.set_model_visibility(1, false);
        h.viewer.switch_to_model(0);
        h.viewer.reset_camera();
        h.take_events();

        let outcome = h.viewer.pick(h.center());
        assert!(matches!(outcome, PickOutcome::Model { index: 0, .. }));
        // already active: no event
        assert!(h.take_events().is_empty());

        let outcome = h.viewer.pick(Vec2::new(1.0, 1.0));
        assert_eq!(outcome, PickOutcome::Missed);
        assert!(h.viewer.gizmo().attached_node().is_none());
        assert!(h.viewer.highlighted().is_none());
        assert_eq!(
            h.take_events(),
            vec![ViewerEvent::ActiveModelChanged {
                index: None,
                previous_index: Some(0)
            }]
        );

        // nothing active any more: a second miss is silent
        h.viewer.pick(Vec2::new(1.0, 1.0));
        assert!(h.take_events().is_empty());
        assert!(!h.viewer.get_all_models()[1].visible);
    }

    #[test]
    fn picking_a_hidden_model_area_selects_the_visible_one() {
        let mut h = Harness::new(floor_triangle());
        h.load("a.glb");
        h.load("b.glb");
        h.viewer.set_model_visibility(1, false);
        h.viewer.reset_camera();

        let outcome = h.viewer.pick(h.center());
        assert!(matches!(outcome, PickOutcome::Model { index: 0, .. }));
        assert_eq!(h.viewer.get_active_model_index(), Some(0));
    }

    #[test]
    fn hiding_the_active_model_detaches_the_gizmo() {
        let mut h = Harness::new(MeshImporter::cube(1.0));
        h.load("a.glb");
        assert!(h.viewer.set_model_visibility(0, false));
        assert!(h.viewer.gizmo().attached_node().is_none());
        assert!(h.viewer.set_model_visibility(0, true));
        assert!(h.viewer.gizmo().attached_node().is_some());
    }

    #[test]
    fn transform_controls_visibility_is_explicit() {
        let mut h = Harness::new(MeshImporter::cube(1.0));
        h.load("a.glb");
        h.viewer.set_transform_controls_visible(false);
        assert!(!h.viewer.transform_controls_visible());
        h.viewer.set_transform_controls_visible(false);
        assert!(!h.viewer.transform_controls_visible());
        h.viewer.set_transform_controls_visible(true);
        assert!(h.viewer.transform_controls_visible());
        assert!(h.viewer.gizmo().attached_node().is_some());
    }

    #[test]
    fn click_without_movement_picks_drag_does_not() {
        let mut h = Harness::new(MeshImporter::cube(1.0));
        h.load("a.glb");
        h.viewer.toggle_transform_controls();

        assert!(!h.viewer.pointer_down(Vec2::new(1.0, 1.0)));
        assert_eq!(h.viewer.pointer_up(Vec2::new(200.0, 1.0)), None);
        assert_eq!(h.viewer.get_active_model_index(), Some(0));

        h.viewer.pointer_down(Vec2::new(1.0, 1.0));
        assert_eq!(h.viewer.pointer_up(Vec2::new(2.0, 1.0)), Some(PickOutcome::Missed));
        assert_eq!(h.viewer.get_active_model_index(), None);
    }

    #[test]
    fn marker_mode_plane_pick_deselects() {
        let options = ViewerOptions {
            marker_mode: true,
            ..ViewerOptions::default()
        };
        let mut h = Harness::with_options(floor_triangle(), options);
        h.load("a.glb");
        h.viewer.set_model_visibility(0, false);
        h.viewer.reset_camera();
        // The hidden model was framed; the reference plane under it is hit.
        // Offset sideways so the ray stays clear of the plane's diagonal.
        let outcome = h.viewer.pick(h.center() + Vec2::new(20.0, 0.0));
        assert!(matches!(outcome, PickOutcome::Unmanaged { .. }));
        assert_eq!(h.viewer.get_active_model_index(), None);
    }

    #[test]
    fn on_model_loaded_receives_normalized_size() {
        let seen = Rc::new(Cell::new(0.0f32));
        let options = {
            let seen = Rc::clone(&seen);
            ViewerOptions::default().with_on_model_loaded(move |size| seen.set(size))
        };
        let mut h = Harness::with_options(MeshImporter::cube(8.0), options);
        h.load("a.glb");
        assert!((seen.get() - 2.0).abs() < 1e-5);
    }

    #[test]
    fn render_frame_reports_highlight_and_stops_after_dispose() {
        let mut h = Harness::new(MeshImporter::cube(1.0));
        h.load("a.glb");
        assert!(h.viewer.render_frame());
        {
            let recording = h.recording.borrow();
            assert_eq!(recording.frames, 1);
            assert!(recording.last_highlight.is_some());
            assert!(recording.last_gizmo.is_some());
            assert_eq!(recording.viewport, Some((800, 600)));
        }

        h.viewer.dispose();
        assert!(!h.viewer.render_frame());
        assert_eq!(h.recording.borrow().frames, 1);
    }

    #[test]
    fn dispose_releases_everything_once() {
        let mut h = Harness::new(MeshImporter::cube(1.0));
        h.load("a.glb");
        h.load("b.glb");
        h.take_events();

        h.viewer.dispose();
        h.viewer.dispose();
        assert!(h.viewer.is_disposed());
        assert_eq!(h.viewer.graph().resource_counts(), (0, 0, 0));
        assert_eq!(h.viewer.graph().node_count(), 1);
        assert_eq!(h.recording.borrow().released.len(), 4);
        assert!(h.viewer.blobs.is_empty());
        assert!(h.take_events().is_empty());
        assert!(matches!(
            pollster::block_on(h.viewer.load_new_model(ModelSource::Url("x.glb".into()), None, None)),
            Err(ViewerError::Disposed)
        ));
    }

    #[test]
    fn dispose_survives_failing_releases() {
        let (mut renderer, recording) = RecordingRenderer::new();
        let mut viewer = Viewer::new(
            "stage",
            ViewerOptions::default(),
            Box::new(RecordingRenderer::default()),
            Box::new(MeshImporter::cube(1.0)),
        );
        let url = viewer.create_object_url(b"cube".to_vec());
        pollster::block_on(viewer.load_new_model(ModelSource::Url(url), None, None)).unwrap();
        let mesh = viewer
            .graph()
            .descendants(viewer.registry.get(0).unwrap().node())
            .into_iter()
            .find_map(|node| viewer.graph().node(node).and_then(|n| n.mesh()))
            .unwrap();
        renderer.fail_on = vec![ResourceHandle::Geometry(mesh.geometry)];
        viewer.renderer = Box::new(renderer);

        viewer.dispose();
        // the failing geometry is skipped; the material still goes through
        assert_eq!(
            recording.borrow().released,
            vec![ResourceHandle::Material(mesh.material)]
        );
        assert_eq!(viewer.graph().resource_counts(), (0, 0, 0));
    }

    #[test]
    fn gltf_viewer_loads_embedded_document() {
        let (renderer, _) = RecordingRenderer::new();
        let mut viewer = create_viewer("stage", ViewerOptions::default(), Box::new(renderer));
        let source = ModelSource::Bytes {
            name: "tri.gltf".to_string(),
            bytes: TRIANGLE_GLTF.as_bytes().to_vec(),
        };
        let index = pollster::block_on(viewer.load_new_model(source, None, None)).unwrap();
        let info = viewer.get_all_models().remove(index);
        assert_eq!(info.file_name, "tri.gltf");
        // 1x1 triangle scaled to the 2.0 free placement target
        assert!((info.scale[0] - 2.0).abs() < 1e-5);
        assert!(info.position[1].abs() < 1e-5);
    }
}
