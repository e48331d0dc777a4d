pub mod camera;
pub mod egui_overlay;
pub mod gizmo;
pub mod pick;
pub mod wireframe;

pub use camera::{Camera, CameraRig, OrbitLimits};
pub use gizmo::{DragCommit, GizmoAxis, GizmoController, GizmoOverlay, GizmoState, TransformMode};
pub use pick::{PickOutcome, Ray, RayHit};
pub use wireframe::WireframeRenderer;

use crate::scene::{NodeId, ResourceHandle, SceneGraph};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("renderer has no resource {0:?}")]
    UnknownResource(ResourceHandle),
    #[error("viewport {width}x{height} is not drawable")]
    EmptyViewport { width: u32, height: u32 },
    #[error("render backend failure: {0}")]
    Backend(String),
}

/// Everything a backend needs to draw one frame. Borrowed from the viewer
/// for the duration of [`Renderer::render`].
pub struct FrameView<'a> {
    pub graph: &'a SceneGraph,
    /// Only the subtree under this node is drawn.
    pub root: NodeId,
    pub camera: &'a Camera,
    pub background_color: [f32; 4],
    /// Active model node, drawn with a selection highlight.
    pub highlighted: Option<NodeId>,
    pub gizmo: Option<GizmoOverlay>,
}

/// Boundary to the graphics backend. The viewer only ever asks it to draw the
/// current scene and to release resources it no longer references.
pub trait Renderer {
    fn render(&mut self, frame: &FrameView<'_>) -> Result<(), RenderError>;

    fn resize(&mut self, width: u32, height: u32);

    /// Called once per released geometry, material or texture.
    fn release(&mut self, resource: ResourceHandle) -> Result<(), RenderError>;
}

/// Renderer that draws nothing; frames and releases are only counted.
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    pub frames: u64,
    pub released: u64,
    pub viewport: (u32, u32),
}

impl Renderer for HeadlessRenderer {
    fn render(&mut self, _frame: &FrameView<'_>) -> Result<(), RenderError> {
        self.frames += 1;
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn release(&mut self, resource: ResourceHandle) -> Result<(), RenderError> {
        self.released += 1;
        log::trace!("headless release {:?}", resource);
        Ok(())
    }
}
