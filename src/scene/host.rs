use crate::assets::lifecycle;
use crate::scene::{
    Geometry, Light, Material, MaterialId, MeshRef, NodeContent, NodeId, ResourceHandle,
    SceneGraph, Texture,
};
use glam::Vec3;
use std::path::Path;

const GRID_SIZE: f32 = 10.0;
const GRID_DIVISIONS: u32 = 10;
/// Edge length of the marker reference plane, matching the marker placement
/// target size.
const REFERENCE_PLANE_SIZE: f32 = 1.0;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("failed to decode marker texture {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("marker texture requires marker mode (no reference plane)")]
    NoReferencePlane,
    #[error("scene host already disposed")]
    Disposed,
}

/// Persistent environment of the viewer: lights, optional ground grid and
/// optional reference plane. Model nodes attach under [`SceneHost::root`].
pub struct SceneHost {
    root: NodeId,
    environment: Vec<NodeId>,
    grid: Option<NodeId>,
    reference_plane: Option<(NodeId, MaterialId)>,
    background_color: [f32; 4],
    disposed: bool,
}

impl SceneHost {
    pub fn new(
        graph: &mut SceneGraph,
        show_grid: bool,
        marker_mode: bool,
        background_color: [f32; 4],
    ) -> Self {
        let mut host = Self {
            root: graph.root(),
            environment: Vec::new(),
            grid: None,
            reference_plane: None,
            background_color,
            disposed: false,
        };

        let ambient = graph.create_node(
            "ambient light",
            NodeContent::Light(Light::Ambient {
                color: [1.0, 1.0, 1.0],
                intensity: 0.6,
            }),
        );
        host.add_environment_node(graph, ambient);

        let sun = graph.create_node(
            "sun",
            NodeContent::Light(Light::Directional {
                color: [1.0, 0.98, 0.92],
                intensity: 0.8,
                direction: Vec3::new(-5.0, -10.0, -7.5).normalize().to_array(),
            }),
        );
        host.add_environment_node(graph, sun);

        if show_grid {
            let grid = graph.create_node(
                "grid",
                NodeContent::Grid {
                    size: GRID_SIZE,
                    divisions: GRID_DIVISIONS,
                },
            );
            host.add_environment_node(graph, grid);
            host.grid = Some(grid);
        }

        if marker_mode {
            let plane = create_reference_plane(graph);
            host.add_environment_node(graph, plane.0);
            host.reference_plane = Some(plane);
        }

        log::info!(
            "scene host ready (grid: {}, marker mode: {})",
            show_grid,
            marker_mode
        );
        host
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn background_color(&self) -> [f32; 4] {
        self.background_color
    }

    pub fn set_background_color(&mut self, color: [f32; 4]) {
        self.background_color = color;
    }

    pub fn grid(&self) -> Option<NodeId> {
        self.grid
    }

    pub fn reference_plane(&self) -> Option<NodeId> {
        self.reference_plane.map(|(node, _)| node)
    }

    pub fn environment(&self) -> &[NodeId] {
        &self.environment
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Attaches `node` under the root as a non-model environment node.
    pub fn add_environment_node(&mut self, graph: &mut SceneGraph, node: NodeId) -> bool {
        if self.disposed || !graph.add_child(self.root, node) {
            return false;
        }
        if !self.environment.contains(&node) {
            self.environment.push(node);
        }
        true
    }

    /// Detaches an environment node without releasing it.
    pub fn remove_environment_node(&mut self, graph: &mut SceneGraph, node: NodeId) -> bool {
        let Some(position) = self.environment.iter().position(|&id| id == node) else {
            return false;
        };
        self.environment.remove(position);
        if self.grid == Some(node) {
            self.grid = None;
        }
        if self.reference_plane.map(|(plane, _)| plane) == Some(node) {
            self.reference_plane = None;
        }
        graph.detach(node);
        true
    }

    /// Decodes an image file and binds it to the reference plane. Returns the
    /// previous marker texture, if any, for release.
    pub fn set_marker_texture(
        &mut self,
        graph: &mut SceneGraph,
        path: &Path,
    ) -> Result<Vec<ResourceHandle>, HostError> {
        if self.disposed {
            return Err(HostError::Disposed);
        }
        let Some((_, material)) = self.reference_plane else {
            return Err(HostError::NoReferencePlane);
        };
        let decoded = image::open(path)
            .map_err(|source| HostError::Decode {
                path: path.display().to_string(),
                source,
            })?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        let texture = graph.insert_texture(Texture {
            label: path.display().to_string(),
            width,
            height,
            pixels: decoded.into_raw(),
        });

        let previous = graph.material_mut(material).and_then(|plane_material| {
            plane_material.base_color = [1.0; 4];
            plane_material.base_color_texture.replace(texture)
        });
        let mut released = Vec::new();
        if let Some(previous) = previous {
            if graph.remove_texture(previous).is_some() {
                released.push(ResourceHandle::Texture(previous));
            }
        }
        log::info!("marker texture {} ({}x{})", path.display(), width, height);
        Ok(released)
    }

    /// Releases every environment node and its resources. Safe to call twice.
    pub fn dispose(&mut self, graph: &mut SceneGraph) -> Vec<ResourceHandle> {
        if self.disposed {
            return Vec::new();
        }
        self.disposed = true;
        let mut released = Vec::new();
        for node in self.environment.drain(..) {
            released.extend(lifecycle::dispose_subtree(graph, node));
        }
        self.grid = None;
        self.reference_plane = None;
        log::info!("scene host disposed ({} resource(s))", released.len());
        released
    }
}

fn create_reference_plane(graph: &mut SceneGraph) -> (NodeId, MaterialId) {
    let h = REFERENCE_PLANE_SIZE * 0.5;
    let geometry = graph.insert_geometry(Geometry {
        positions: vec![
            Vec3::new(-h, 0.0, -h),
            Vec3::new(h, 0.0, -h),
            Vec3::new(h, 0.0, h),
            Vec3::new(-h, 0.0, h),
        ],
        indices: vec![0, 2, 1, 0, 3, 2],
    });
    let material = graph.insert_material(Material {
        name: "reference plane".to_string(),
        base_color: [0.9, 0.9, 0.9, 0.5],
        base_color_texture: None,
    });
    let node = graph.create_node(
        "reference plane",
        NodeContent::Mesh(MeshRef { geometry, material }),
    );
    (node, material)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(name: &str, rgba: [u8; 4]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("stageview-{}-{}.png", name, std::process::id()));
        image::save_buffer_with_format(
            &path,
            &[rgba, rgba, rgba, rgba].concat(),
            2,
            2,
            image::ColorType::Rgba8,
            image::ImageFormat::Png,
        )
        .unwrap();
        path
    }

    #[test]
    fn grid_and_plane_follow_options() {
        let mut graph = SceneGraph::new();
        let host = SceneHost::new(&mut graph, false, true, [0.0; 4]);
        assert!(host.grid().is_none());
        let plane = host.reference_plane().unwrap();
        assert!(graph.is_attached(plane));
        assert!(graph.node(plane).unwrap().pickable);
        // ambient, sun, plane
        assert_eq!(host.environment().len(), 3);
    }

    #[test]
    fn marker_texture_needs_reference_plane() {
        let mut graph = SceneGraph::new();
        let mut host = SceneHost::new(&mut graph, true, false, [0.0; 4]);
        let path = write_png("no-plane", [255, 0, 0, 255]);
        assert!(matches!(
            host.set_marker_texture(&mut graph, &path),
            Err(HostError::NoReferencePlane)
        ));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn replacing_marker_texture_releases_previous() {
        let mut graph = SceneGraph::new();
        let mut host = SceneHost::new(&mut graph, true, true, [0.0; 4]);
        let first = write_png("first", [255, 0, 0, 255]);
        let second = write_png("second", [0, 255, 0, 255]);

        assert!(host.set_marker_texture(&mut graph, &first).unwrap().is_empty());
        let released = host.set_marker_texture(&mut graph, &second).unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(graph.resource_counts().2, 1);

        let _ = std::fs::remove_file(first);
        let _ = std::fs::remove_file(second);
    }

    #[test]
    fn undecodable_marker_texture_is_an_error() {
        let mut graph = SceneGraph::new();
        let mut host = SceneHost::new(&mut graph, true, true, [0.0; 4]);
        let missing = std::env::temp_dir().join("stageview-definitely-missing.png");
        assert!(matches!(
            host.set_marker_texture(&mut graph, &missing),
            Err(HostError::Decode { .. })
        ));
    }

    #[test]
    fn removing_grid_and_plane_clears_them() {
        let mut graph = SceneGraph::new();
        let mut host = SceneHost::new(&mut graph, true, true, [0.0; 4]);
        let grid = host.grid().unwrap();
        let plane = host.reference_plane().unwrap();
        let before = host.environment().len();

        assert!(host.remove_environment_node(&mut graph, grid));
        assert!(host.grid().is_none());
        assert!(!graph.is_attached(grid));
        assert!(host.remove_environment_node(&mut graph, plane));
        assert!(host.reference_plane().is_none());
        assert!(!graph.is_attached(plane));
        assert_eq!(host.environment().len(), before - 2);
        assert!(!host.remove_environment_node(&mut graph, plane));

        // Marker textures need the plane that was just removed.
        let path = write_png("removed-plane", [0, 0, 255, 255]);
        assert!(matches!(
            host.set_marker_texture(&mut graph, &path),
            Err(HostError::NoReferencePlane)
        ));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn environment_nodes_are_added_once() {
        let mut graph = SceneGraph::new();
        let mut host = SceneHost::new(&mut graph, false, false, [0.0; 4]);
        let before = host.environment().len();
        let root_children = graph.node(host.root()).unwrap().children().len();
        let helper = graph.create_node("helper", NodeContent::Empty);

        assert!(host.add_environment_node(&mut graph, helper));
        assert!(host.add_environment_node(&mut graph, helper));
        assert_eq!(host.environment().len(), before + 1);
        assert_eq!(graph.node(host.root()).unwrap().children().len(), root_children + 1);
        assert!(graph.is_attached(helper));

        assert!(host.remove_environment_node(&mut graph, helper));
        assert!(!graph.is_attached(helper));
        assert!(graph.contains(helper));
        assert_eq!(host.environment().len(), before);
    }

    #[test]
    fn disposed_host_accepts_no_environment_nodes() {
        let mut graph = SceneGraph::new();
        let mut host = SceneHost::new(&mut graph, true, false, [0.0; 4]);
        host.dispose(&mut graph);
        let helper = graph.create_node("helper", NodeContent::Empty);
        assert!(!host.add_environment_node(&mut graph, helper));
        assert!(host.environment().is_empty());
        assert!(!graph.is_attached(helper));
    }

    #[test]
    fn dispose_is_idempotent_and_releases_plane() {
        let mut graph = SceneGraph::new();
        let mut host = SceneHost::new(&mut graph, true, true, [0.0; 4]);
        let released = host.dispose(&mut graph);
        assert_eq!(released.len(), 2);
        assert!(host.dispose(&mut graph).is_empty());
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.resource_counts(), (0, 0, 0));
    }
}
