//! Transform gizmo controller.
//!
//! The gizmo follows one model node at a time. A drag writes candidate
//! transforms straight onto the live node; [`GizmoController::on_drag_update`]
//! then either commits the node's transform to the registry or puts the node
//! back on the entry's last-known-good value.

use crate::render::camera::Camera;
use crate::render::pick::Ray;
use crate::scene::registry::{CommitError, ModelId, ModelRegistry};
use crate::scene::{NodeId, SceneGraph, Transform};
use glam::Vec3;
use std::fmt;
use std::str::FromStr;

/// Handle length as a fraction of the camera distance, so the gizmo keeps a
/// constant on-screen size.
const HANDLE_SCREEN_FRACTION: f32 = 0.15;
/// Pick tolerance around a handle, relative to the handle length.
const HANDLE_PICK_RADIUS: f32 = 0.08;
const UNIFORM_HANDLE_RADIUS: f32 = 0.12;
const RING_PICK_WIDTH: f32 = 0.1;
const MIN_PLANE_ALIGNMENT: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformMode {
    #[default]
    Translate,
    Rotate,
    Scale,
}

impl TransformMode {
    pub const ALL: [TransformMode; 3] = [Self::Translate, Self::Rotate, Self::Scale];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Translate => "translate",
            Self::Rotate => "rotate",
            Self::Scale => "scale",
        }
    }
}

impl fmt::Display for TransformMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transform mode '{0}'")]
pub struct UnknownMode(pub String);

impl FromStr for TransformMode {
    type Err = UnknownMode;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "translate" => Ok(Self::Translate),
            "rotate" => Ok(Self::Rotate),
            "scale" => Ok(Self::Scale),
            _ => Err(UnknownMode(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GizmoAxis {
    X,
    Y,
    Z,
    /// Scale mode only: the center handle scales all axes together.
    Uniform,
}

impl GizmoAxis {
    pub fn direction(&self) -> Option<Vec3> {
        match self {
            Self::X => Some(Vec3::X),
            Self::Y => Some(Vec3::Y),
            Self::Z => Some(Vec3::Z),
            Self::Uniform => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GizmoState {
    #[default]
    Detached,
    Attached { model: ModelId, node: NodeId },
}

/// Draw parameters for the renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GizmoOverlay {
    pub mode: TransformMode,
    pub origin: Vec3,
    pub axis_world_len: f32,
    pub active_axis: Option<GizmoAxis>,
}

/// Result of reconciling the node with the registry after a drag step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragCommit {
    Committed,
    RolledBack,
    Idle,
}

#[derive(Debug, Clone, Copy)]
struct DragInteraction {
    axis: GizmoAxis,
    origin: Vec3,
    plane_normal: Vec3,
    start_point: Vec3,
    start_transform: Transform,
}

#[derive(Debug, Default)]
pub struct GizmoController {
    state: GizmoState,
    mode: TransformMode,
    hidden: bool,
    drag: Option<DragInteraction>,
}

impl GizmoController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GizmoState {
        self.state
    }

    pub fn mode(&self) -> TransformMode {
        self.mode
    }

    pub fn attached_model(&self) -> Option<ModelId> {
        match self.state {
            GizmoState::Attached { model, .. } => Some(model),
            GizmoState::Detached => None,
        }
    }

    pub fn attached_node(&self) -> Option<NodeId> {
        match self.state {
            GizmoState::Attached { node, .. } => Some(node),
            GizmoState::Detached => None,
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Attached and not hidden by the user.
    pub fn visible(&self) -> bool {
        !self.hidden && self.attached_node().is_some()
    }

    /// Detaches first, then attaches to `node` if it is part of the drawn
    /// scene. An invalid target leaves the gizmo detached.
    pub fn attach(&mut self, graph: &SceneGraph, model: ModelId, node: NodeId) -> bool {
        self.detach();
        if !graph.is_attached(node) {
            log::warn!("gizmo: refusing to attach to {:?}, not in the scene", node);
            return false;
        }
        self.state = GizmoState::Attached { model, node };
        log::debug!("gizmo attached to {:?} ({} mode)", model, self.mode);
        true
    }

    pub fn detach(&mut self) {
        if self.state != GizmoState::Detached {
            log::debug!("gizmo detached");
        }
        self.state = GizmoState::Detached;
        self.drag = None;
    }

    /// Changes the manipulation mode. The attachment is kept; a drag in
    /// progress is abandoned.
    pub fn set_mode(&mut self, mode: TransformMode) {
        self.mode = mode;
        self.drag = None;
    }

    /// String form used by host bindings. Unknown names are rejected and the
    /// current mode is kept.
    pub fn set_mode_str(&mut self, mode: &str) -> bool {
        match mode.parse::<TransformMode>() {
            Ok(mode) => {
                self.set_mode(mode);
                true
            }
            Err(err) => {
                log::warn!("{}", err);
                false
            }
        }
    }

    /// Flips user visibility. Returns the new visibility flag.
    pub fn toggle_visible(&mut self) -> bool {
        self.set_visible(self.hidden)
    }

    pub fn set_visible(&mut self, visible: bool) -> bool {
        self.hidden = !visible;
        self.drag = None;
        visible
    }

    pub fn overlay(&self, graph: &SceneGraph, camera: &Camera) -> Option<GizmoOverlay> {
        if !self.visible() {
            return None;
        }
        let node = self.attached_node()?;
        let origin = graph.world_matrix(node).w_axis.truncate();
        Some(GizmoOverlay {
            mode: self.mode,
            origin,
            axis_world_len: handle_length(camera, origin),
            active_axis: self.drag.map(|drag| drag.axis),
        })
    }

    /// Nearest handle under `ray`, if any.
    pub fn hit_handle(&self, graph: &SceneGraph, camera: &Camera, ray: &Ray) -> Option<GizmoAxis> {
        let overlay = self.overlay(graph, camera)?;
        let origin = overlay.origin;
        let len = overlay.axis_world_len;
        let mut best: Option<(f32, GizmoAxis)> = None;
        let mut consider = |t: f32, axis: GizmoAxis| {
            if best.map_or(true, |(best_t, _)| t < best_t) {
                best = Some((t, axis));
            }
        };

        if self.mode == TransformMode::Scale {
            if let Some(t) = ray_sphere(ray, origin, len * UNIFORM_HANDLE_RADIUS) {
                consider(t, GizmoAxis::Uniform);
            }
        }
        for axis in [GizmoAxis::X, GizmoAxis::Y, GizmoAxis::Z] {
            let Some(direction) = axis.direction() else {
                continue;
            };
            match self.mode {
                TransformMode::Translate | TransformMode::Scale => {
                    let (t, distance) = ray_segment(ray, origin, origin + direction * len);
                    if distance <= len * HANDLE_PICK_RADIUS {
                        consider(t, axis);
                    }
                }
                TransformMode::Rotate => {
                    let Some(t) = ray_plane(ray, origin, direction) else {
                        continue;
                    };
                    let radius = ray.at(t).distance(origin);
                    if (radius - len).abs() <= len * RING_PICK_WIDTH {
                        consider(t, axis);
                    }
                }
            }
        }
        best.map(|(_, axis)| axis)
    }

    /// Starts a drag if `ray` hits a handle. Returns whether a drag began.
    pub fn begin_drag(&mut self, graph: &SceneGraph, camera: &Camera, ray: &Ray) -> bool {
        let Some(axis) = self.hit_handle(graph, camera, ray) else {
            return false;
        };
        let Some(node) = self.attached_node() else {
            return false;
        };
        let Some(start_transform) = graph.transform(node) else {
            return false;
        };
        let origin = graph.world_matrix(node).w_axis.truncate();
        let plane_normal = drag_plane_normal(self.mode, axis, camera.forward());
        let Some(t) = ray_plane(ray, origin, plane_normal) else {
            return false;
        };
        self.drag = Some(DragInteraction {
            axis,
            origin,
            plane_normal,
            start_point: ray.at(t),
            start_transform,
        });
        log::debug!("gizmo drag started on {:?} ({} mode)", axis, self.mode);
        true
    }

    /// Writes the candidate transform for `ray` onto the live node. The value
    /// is not validated here; see [`GizmoController::on_drag_update`].
    pub fn drag_to(&mut self, graph: &mut SceneGraph, ray: &Ray) -> bool {
        let (Some(drag), Some(node)) = (self.drag, self.attached_node()) else {
            return false;
        };
        let Some(t) = ray_plane(ray, drag.origin, drag.plane_normal) else {
            return false;
        };
        let point = ray.at(t);
        let candidate = drag_candidate(self.mode, &drag, point);
        graph.set_transform(node, candidate)
    }

    pub fn end_drag(&mut self) -> bool {
        self.drag.take().is_some()
    }

    /// Reconciles the live node with the registry: a valid transform is
    /// committed (emitting `TransformChanged`), an invalid one is rolled back
    /// silently.
    pub fn on_drag_update(&self, graph: &mut SceneGraph, registry: &mut ModelRegistry) -> DragCommit {
        let GizmoState::Attached { model, node } = self.state else {
            return DragCommit::Idle;
        };
        let (Some(index), Some(live)) = (registry.index_of(model), graph.transform(node)) else {
            return DragCommit::Idle;
        };
        match registry.commit_transform(graph, index, live) {
            Ok(()) => DragCommit::Committed,
            Err(CommitError::Rejected(reason)) => {
                log::warn!("gizmo: rolled back model {}: {}", index, reason);
                DragCommit::RolledBack
            }
            Err(err) => {
                log::warn!("gizmo: {}", err);
                DragCommit::Idle
            }
        }
    }
}

fn handle_length(camera: &Camera, origin: Vec3) -> f32 {
    (camera.position.distance(origin) * HANDLE_SCREEN_FRACTION).max(1e-3)
}

/// Plane the drag point moves in. Rotation uses the ring plane; axis drags
/// use the plane through the axis that faces the camera most.
fn drag_plane_normal(mode: TransformMode, axis: GizmoAxis, view: Vec3) -> Vec3 {
    let Some(direction) = axis.direction() else {
        return -view;
    };
    if mode == TransformMode::Rotate {
        return direction;
    }
    let normal = direction.cross(view).cross(direction);
    if normal.length_squared() < MIN_PLANE_ALIGNMENT {
        // Looking straight down the axis.
        return -view;
    }
    normal.normalize()
}

fn drag_candidate(mode: TransformMode, drag: &DragInteraction, point: Vec3) -> Transform {
    let mut transform = drag.start_transform;
    let start_offset = drag.start_point - drag.origin;
    let offset = point - drag.origin;
    match (mode, drag.axis.direction()) {
        (TransformMode::Translate, Some(direction)) => {
            transform.position += direction * (point - drag.start_point).dot(direction);
        }
        (TransformMode::Translate, None) => {
            transform.position += point - drag.start_point;
        }
        (TransformMode::Rotate, Some(direction)) => {
            let angle = direction
                .dot(start_offset.cross(offset))
                .atan2(start_offset.dot(offset));
            transform.rotation += direction * angle;
        }
        (TransformMode::Rotate, None) => {}
        (TransformMode::Scale, Some(direction)) => {
            // A collapsed handle gives a zero or non-finite factor; validation
            // rejects it.
            let factor = offset.dot(direction) / start_offset.dot(direction);
            transform.scale = transform.scale * (Vec3::ONE + direction * (factor - 1.0));
        }
        (TransformMode::Scale, None) => {
            let factor = offset.length() / start_offset.length();
            transform.scale *= factor;
        }
    }
    transform
}

/// Ray parameter and distance of the closest approach between `ray` and the
/// segment `a..b`.
fn ray_segment(ray: &Ray, a: Vec3, b: Vec3) -> (f32, f32) {
    let segment = b - a;
    let length_sq = segment.length_squared().max(1e-12);
    let w = ray.origin - a;
    let d_dot_s = ray.direction.dot(segment);
    let denom = length_sq - d_dot_s * d_dot_s;
    let s = if denom.abs() < 1e-9 {
        0.0
    } else {
        ((ray.direction.dot(w) * d_dot_s - segment.dot(w)) / -denom).clamp(0.0, 1.0)
    };
    let on_segment = a + segment * s;
    let t = (on_segment - ray.origin).dot(ray.direction).max(0.0);
    (t, ray.at(t).distance(on_segment))
}

fn ray_plane(ray: &Ray, point: Vec3, normal: Vec3) -> Option<f32> {
    let denom = normal.dot(ray.direction);
    if denom.abs() < 1e-6 {
        return None;
    }
    let t = normal.dot(point - ray.origin) / denom;
    (t >= 0.0 && t.is_finite()).then_some(t)
}

fn ray_sphere(ray: &Ray, center: Vec3, radius: f32) -> Option<f32> {
    let to_center = center - ray.origin;
    let t = to_center.dot(ray.direction);
    if t < 0.0 {
        return None;
    }
    let closest_sq = to_center.length_squared() - t * t;
    (closest_sq <= radius * radius).then_some(t)
}
