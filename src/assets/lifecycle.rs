//! Teardown of loaded models and the environment.
//!
//! Every release is idempotent: resources already gone from the scene graph
//! are skipped, so disposing the same subtree twice releases nothing the
//! second time.

use crate::assets::blob::BlobStore;
use crate::render::Renderer;
use crate::scene::registry::{ModelEntry, SourceRef};
use crate::scene::{NodeContent, NodeId, ResourceHandle, SceneGraph};

/// Removes `node` and all of its descendants from the graph together with the
/// geometry, materials and textures they reference.
pub fn dispose_subtree(graph: &mut SceneGraph, node: NodeId) -> Vec<ResourceHandle> {
    let mut released = Vec::new();
    for id in graph.descendants(node) {
        if let Some(NodeContent::Mesh(mesh)) = graph.node(id).map(|n| n.content) {
            if graph.remove_geometry(mesh.geometry).is_some() {
                released.push(ResourceHandle::Geometry(mesh.geometry));
            }
            if let Some(material) = graph.remove_material(mesh.material) {
                released.push(ResourceHandle::Material(mesh.material));
                if let Some(texture) = material.base_color_texture {
                    if graph.remove_texture(texture).is_some() {
                        released.push(ResourceHandle::Texture(texture));
                    }
                }
            }
        }
        graph.remove_node(id);
    }
    released
}

/// Releases a model's scene resources and revokes its temporary source.
pub fn dispose_entry(
    graph: &mut SceneGraph,
    blobs: &mut BlobStore,
    entry: &ModelEntry,
) -> Vec<ResourceHandle> {
    let released = dispose_subtree(graph, entry.node());
    if let SourceRef::Temporary(url) = entry.source_ref() {
        blobs.revoke(url);
    }
    log::debug!(
        "disposed '{}': {} resource(s) released",
        entry.file_name(),
        released.len()
    );
    released
}

/// Hands released resources to the renderer. A failure for one resource is
/// logged and does not stop the rest.
pub fn notify_renderer(renderer: &mut dyn Renderer, released: &[ResourceHandle]) -> usize {
    let mut failures = 0;
    for handle in released {
        if let Err(err) = renderer.release(*handle) {
            failures += 1;
            log::warn!("renderer failed to release {:?}: {}", handle, err);
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Geometry, Material, MeshRef, Texture};
    use glam::Vec3;

    fn textured_pair(graph: &mut SceneGraph) -> NodeId {
        let texture = graph.insert_texture(Texture {
            label: "albedo".to_string(),
            width: 1,
            height: 1,
            pixels: vec![255; 4],
        });
        let material = graph.insert_material(Material {
            name: "shared".to_string(),
            base_color: [1.0; 4],
            base_color_texture: Some(texture),
        });
        let parent = graph.create_node("parent", NodeContent::Empty);
        for name in ["left", "right"] {
            let geometry = graph.insert_geometry(Geometry {
                positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
                indices: vec![0, 1, 2],
            });
            let child =
                graph.create_node(name, NodeContent::Mesh(MeshRef { geometry, material }));
            graph.add_child(parent, child);
        }
        parent
    }

    #[test]
    fn shared_material_and_texture_are_released_once() {
        let mut graph = SceneGraph::new();
        let parent = textured_pair(&mut graph);
        graph.add_child(graph.root(), parent);

        let released = dispose_subtree(&mut graph, parent);
        let materials = released
            .iter()
            .filter(|handle| matches!(handle, ResourceHandle::Material(_)))
            .count();
        let textures = released
            .iter()
            .filter(|handle| matches!(handle, ResourceHandle::Texture(_)))
            .count();
        assert_eq!(materials, 1);
        assert_eq!(textures, 1);
        assert_eq!(released.len(), 4);
        assert_eq!(graph.resource_counts(), (0, 0, 0));
        assert_eq!(graph.node_count(), 1);
        assert!(graph.node(graph.root()).unwrap().children().is_empty());
    }

    #[test]
    fn second_dispose_is_a_no_op() {
        let mut graph = SceneGraph::new();
        let parent = textured_pair(&mut graph);
        assert!(!dispose_subtree(&mut graph, parent).is_empty());
        assert!(dispose_subtree(&mut graph, parent).is_empty());
    }
}
