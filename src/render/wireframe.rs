//! Wireframe renderer
//!
//! Projects mesh edges, the ground grid and the gizmo into screen-space line
//! segments. The desktop host paints the segments with egui; nothing here
//! touches a GPU.

use crate::render::gizmo::{GizmoAxis, GizmoOverlay, TransformMode};
use crate::render::{FrameView, RenderError, Renderer};
use crate::scene::{NodeContent, NodeId, ResourceHandle, SceneGraph};
use glam::{Mat4, Vec2, Vec3, Vec4};
use std::cell::RefCell;
use std::rc::Rc;

const MAX_SEGMENTS: usize = 250_000;
const HIGHLIGHT_COLOR: [u8; 4] = [255, 174, 61, 255];
const GRID_COLOR: [u8; 4] = [90, 90, 100, 255];
const AXIS_COLORS: [[u8; 4]; 3] = [[230, 70, 70, 255], [90, 200, 90, 255], [80, 130, 240, 255]];
const ACTIVE_AXIS_COLOR: [u8; 4] = [255, 230, 80, 255];
const RING_SEGMENTS: usize = 48;
/// Clip-space w below which a point counts as behind the camera.
const NEAR_W: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    /// Physical pixels, origin top-left.
    pub from: Vec2,
    pub to: Vec2,
    pub color: [u8; 4],
}

/// Last frame produced by a [`WireframeRenderer`].
#[derive(Debug, Default)]
pub struct WireframeFrame {
    pub segments: Vec<Segment>,
    pub background_color: [f32; 4],
    pub viewport: (u32, u32),
    pub truncated: bool,
}

pub type SharedFrame = Rc<RefCell<WireframeFrame>>;

pub struct WireframeRenderer {
    frame: SharedFrame,
    viewport: (u32, u32),
}

impl WireframeRenderer {
    /// Returns the renderer and a handle through which the host reads frames.
    pub fn new(width: u32, height: u32) -> (Self, SharedFrame) {
        let frame = SharedFrame::default();
        (
            Self {
                frame: Rc::clone(&frame),
                viewport: (width, height),
            },
            frame,
        )
    }
}

impl Renderer for WireframeRenderer {
    fn render(&mut self, view: &FrameView<'_>) -> Result<(), RenderError> {
        let (width, height) = self.viewport;
        if width == 0 || height == 0 {
            return Err(RenderError::EmptyViewport { width, height });
        }
        let mut painter = Painter {
            view_projection: view.camera.view_projection(),
            viewport: Vec2::new(width as f32, height as f32),
            segments: Vec::new(),
            truncated: false,
        };

        let highlighted = view
            .highlighted
            .map(|node| view.graph.descendants(node))
            .unwrap_or_default();
        for node_id in view.graph.descendants(view.root) {
            let color = if highlighted.contains(&node_id) {
                Some(HIGHLIGHT_COLOR)
            } else {
                None
            };
            paint_node(&mut painter, view.graph, node_id, color);
        }
        if let Some(gizmo) = &view.gizmo {
            paint_gizmo(&mut painter, gizmo);
        }

        if painter.truncated {
            log::warn!("wireframe truncated at {} segments", MAX_SEGMENTS);
        }
        let mut frame = self.frame.borrow_mut();
        frame.segments = painter.segments;
        frame.background_color = view.background_color;
        frame.viewport = self.viewport;
        frame.truncated = painter.truncated;
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn release(&mut self, resource: ResourceHandle) -> Result<(), RenderError> {
        log::trace!("wireframe release {:?}", resource);
        Ok(())
    }
}

struct Painter {
    view_projection: Mat4,
    viewport: Vec2,
    segments: Vec<Segment>,
    truncated: bool,
}

impl Painter {
    fn line(&mut self, a: Vec3, b: Vec3, color: [u8; 4]) {
        if self.segments.len() >= MAX_SEGMENTS {
            self.truncated = true;
            return;
        }
        let clip_a = self.view_projection * a.extend(1.0);
        let clip_b = self.view_projection * b.extend(1.0);
        let Some((clip_a, clip_b)) = clip_near(clip_a, clip_b) else {
            return;
        };
        let from = self.to_screen(clip_a);
        let to = self.to_screen(clip_b);
        if from.is_finite() && to.is_finite() {
            self.segments.push(Segment { from, to, color });
        }
    }

    fn to_screen(&self, clip: Vec4) -> Vec2 {
        let ndc = clip.truncate() / clip.w;
        Vec2::new(
            (ndc.x + 1.0) * 0.5 * self.viewport.x,
            (1.0 - ndc.y) * 0.5 * self.viewport.y,
        )
    }
}

/// Trims the part of a clip-space segment that lies behind the camera.
fn clip_near(a: Vec4, b: Vec4) -> Option<(Vec4, Vec4)> {
    match (a.w >= NEAR_W, b.w >= NEAR_W) {
        (true, true) => Some((a, b)),
        (false, false) => None,
        (a_in, _) => {
            let t = (NEAR_W - a.w) / (b.w - a.w);
            let cut = a + (b - a) * t;
            if a_in {
                Some((a, cut))
            } else {
                Some((cut, b))
            }
        }
    }
}

fn paint_node(painter: &mut Painter, graph: &SceneGraph, id: NodeId, override_color: Option<[u8; 4]>) {
    let Some(node) = graph.node(id) else {
        return;
    };
    let world = graph.world_matrix(id);
    match node.content {
        NodeContent::Mesh(mesh) => {
            let Some(geometry) = graph.geometry(mesh.geometry) else {
                return;
            };
            let color = override_color.unwrap_or_else(|| {
                graph
                    .material(mesh.material)
                    .map(|material| to_rgba8(material.base_color))
                    .unwrap_or([200, 200, 200, 255])
            });
            for [a, b, c] in geometry.triangles() {
                let (a, b, c) = (
                    world.transform_point3(a),
                    world.transform_point3(b),
                    world.transform_point3(c),
                );
                painter.line(a, b, color);
                painter.line(b, c, color);
                painter.line(c, a, color);
            }
        }
        NodeContent::Grid { size, divisions } => {
            let half = size * 0.5;
            let divisions = divisions.max(1);
            let step = size / divisions as f32;
            for i in 0..=divisions {
                let offset = -half + step * i as f32;
                painter.line(
                    world.transform_point3(Vec3::new(offset, 0.0, -half)),
                    world.transform_point3(Vec3::new(offset, 0.0, half)),
                    GRID_COLOR,
                );
                painter.line(
                    world.transform_point3(Vec3::new(-half, 0.0, offset)),
                    world.transform_point3(Vec3::new(half, 0.0, offset)),
                    GRID_COLOR,
                );
            }
        }
        NodeContent::Empty | NodeContent::Light(_) => {}
    }
}

fn paint_gizmo(painter: &mut Painter, gizmo: &GizmoOverlay) {
    let origin = gizmo.origin;
    let len = gizmo.axis_world_len;
    for (index, axis) in [GizmoAxis::X, GizmoAxis::Y, GizmoAxis::Z].into_iter().enumerate() {
        let Some(direction) = axis.direction() else {
            continue;
        };
        let color = if gizmo.active_axis == Some(axis) {
            ACTIVE_AXIS_COLOR
        } else {
            AXIS_COLORS[index]
        };
        match gizmo.mode {
            TransformMode::Translate | TransformMode::Scale => {
                painter.line(origin, origin + direction * len, color);
            }
            TransformMode::Rotate => {
                let (u, v) = direction.any_orthonormal_pair();
                let point = |i: usize| {
                    let angle = i as f32 / RING_SEGMENTS as f32 * std::f32::consts::TAU;
                    origin + (u * angle.cos() + v * angle.sin()) * len
                };
                for i in 0..RING_SEGMENTS {
                    painter.line(point(i), point(i + 1), color);
                }
            }
        }
    }
    if gizmo.mode == TransformMode::Scale {
        let color = if gizmo.active_axis == Some(GizmoAxis::Uniform) {
            ACTIVE_AXIS_COLOR
        } else {
            [230, 230, 230, 255]
        };
        let h = len * 0.08;
        for direction in [Vec3::X, Vec3::Y, Vec3::Z] {
            painter.line(origin - direction * h, origin + direction * h, color);
        }
    }
}

fn to_rgba8(color: [f32; 4]) -> [u8; 4] {
    color.map(|channel| (channel.clamp(0.0, 1.0) * 255.0).round() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Camera;
    use crate::scene::{Geometry, Material, MeshRef};

    fn triangle_scene() -> (SceneGraph, NodeId) {
        let mut graph = SceneGraph::new();
        let geometry = graph.insert_geometry(Geometry {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            indices: vec![0, 1, 2],
        });
        let material = graph.insert_material(Material {
            name: "red".to_string(),
            base_color: [1.0, 0.0, 0.0, 1.0],
            base_color_texture: None,
        });
        let node = graph.create_node("tri", NodeContent::Mesh(MeshRef { geometry, material }));
        graph.add_child(graph.root(), node);
        (graph, node)
    }

    fn camera() -> Camera {
        Camera {
            position: Vec3::new(0.5, 0.5, 5.0),
            target: Vec3::new(0.5, 0.5, 0.0),
            aspect: 1.0,
            ..Camera::default()
        }
    }

    #[test]
    fn triangle_becomes_three_segments() {
        let (graph, node) = triangle_scene();
        let camera = camera();
        let (mut renderer, frame) = WireframeRenderer::new(100, 100);
        renderer
            .render(&FrameView {
                graph: &graph,
                root: graph.root(),
                camera: &camera,
                background_color: [0.1, 0.1, 0.1, 1.0],
                highlighted: Some(node),
                gizmo: None,
            })
            .unwrap();

        let frame = frame.borrow();
        assert_eq!(frame.segments.len(), 3);
        assert!(frame.segments.iter().all(|s| s.color == HIGHLIGHT_COLOR));
        // camera looks at the triangle's bounding-box center
        let center = (frame.segments[0].from + frame.segments[1].from + frame.segments[2].from) / 3.0;
        assert!(center.x > 30.0 && center.x < 70.0);
    }

    #[test]
    fn geometry_behind_the_camera_is_dropped() {
        let (graph, _) = triangle_scene();
        let camera = Camera {
            position: Vec3::new(0.5, 0.5, -5.0),
            target: Vec3::new(0.5, 0.5, -10.0),
            aspect: 1.0,
            ..Camera::default()
        };
        let (mut renderer, frame) = WireframeRenderer::new(100, 100);
        renderer
            .render(&FrameView {
                graph: &graph,
                root: graph.root(),
                camera: &camera,
                background_color: [0.0; 4],
                highlighted: None,
                gizmo: None,
            })
            .unwrap();
        assert!(frame.borrow().segments.is_empty());
    }

    #[test]
    fn empty_viewport_is_an_error() {
        let (graph, _) = triangle_scene();
        let camera = camera();
        let (mut renderer, _) = WireframeRenderer::new(0, 0);
        let result = renderer.render(&FrameView {
            graph: &graph,
            root: graph.root(),
            camera: &camera,
            background_color: [0.0; 4],
            highlighted: None,
            gizmo: None,
        });
        assert!(matches!(result, Err(RenderError::EmptyViewport { .. })));
    }
}
