//! CPU ray picking
//!
//! Casts a world-space ray against every attached, pickable mesh in the scene
//! graph and reports the nearest hit. Triangles are tested in each node's
//! local space (the ray is carried through the inverse world matrix), so
//! non-uniform scale needs no special handling. A bounding-box slab test
//! rejects most meshes before any triangle is touched.

use crate::scene::bounds::Aabb;
use crate::scene::registry::{ModelId, ModelRegistry};
use crate::scene::{NodeId, SceneGraph};
use glam::Vec3;

const EPSILON: f32 = 1e-7;

// ========================================================================
// Ray
// ========================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    /// Unit length.
    pub direction: Vec3,
}

impl Ray {
    /// Returns `None` for a zero or non-finite direction.
    pub fn new(origin: Vec3, direction: Vec3) -> Option<Self> {
        if !origin.is_finite() {
            return None;
        }
        let direction = direction.try_normalize()?;
        Some(Self { origin, direction })
    }

    pub fn at(&self, distance: f32) -> Vec3 {
        self.origin + self.direction * distance
    }
}

/// Möller-Trumbore. Returns the distance along the ray for a hit in front of
/// the origin; back faces count.
pub fn intersect_triangle(ray: &Ray, triangle: [Vec3; 3]) -> Option<f32> {
    let [a, b, c] = triangle;
    let edge1 = b - a;
    let edge2 = c - a;
    let p = ray.direction.cross(edge2);
    let det = edge1.dot(p);
    if det.abs() < EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let t_vec = ray.origin - a;
    let u = t_vec.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = t_vec.cross(edge1);
    let v = ray.direction.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge2.dot(q) * inv_det;
    (t > EPSILON).then_some(t)
}

/// Slab test. Returns the entry distance (0 when the origin is inside).
pub fn intersect_aabb(ray: &Ray, bounds: &Aabb) -> Option<f32> {
    let inv = ray.direction.recip();
    let t1 = (bounds.min - ray.origin) * inv;
    let t2 = (bounds.max - ray.origin) * inv;
    let t_min = t1.min(t2).max_element();
    let t_max = t1.max(t2).min_element();
    if t_max < 0.0 || t_min > t_max {
        return None;
    }
    Some(t_min.max(0.0))
}

// ========================================================================
// Scene raycast
// ========================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub node: NodeId,
    /// World-space distance from the ray origin.
    pub distance: f32,
    pub point: Vec3,
}

/// Nearest hit among attached, pickable meshes.
pub fn raycast(graph: &SceneGraph, ray: &Ray) -> Option<RayHit> {
    let mut nearest: Option<RayHit> = None;
    for node_id in graph.descendants(graph.root()) {
        let Some(node) = graph.node(node_id) else {
            continue;
        };
        if !node.pickable {
            continue;
        }
        let Some(mesh) = node.mesh() else {
            continue;
        };
        let Some(geometry) = graph.geometry(mesh.geometry) else {
            continue;
        };

        let world = graph.world_matrix(node_id);
        let inverse = world.inverse();
        if !inverse.is_finite() {
            continue;
        }
        let Some(local_ray) = Ray::new(
            inverse.transform_point3(ray.origin),
            inverse.transform_vector3(ray.direction),
        ) else {
            continue;
        };
        if intersect_aabb(&local_ray, &geometry.bounds()).is_none() {
            continue;
        }

        for triangle in geometry.triangles() {
            let Some(t) = intersect_triangle(&local_ray, triangle) else {
                continue;
            };
            let point = world.transform_point3(local_ray.at(t));
            let distance = point.distance(ray.origin);
            if nearest.map_or(true, |hit| distance < hit.distance) {
                nearest = Some(RayHit {
                    node: node_id,
                    distance,
                    point,
                });
            }
        }
    }
    nearest
}

// ========================================================================
// Pick resolution
// ========================================================================

/// What a pointer pick resolved to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PickOutcome {
    Missed,
    /// Hit scene content no model owns (reference plane, environment).
    Unmanaged { node: NodeId },
    Model { id: ModelId, index: usize },
}

pub fn resolve_pick(graph: &SceneGraph, registry: &ModelRegistry, ray: &Ray) -> PickOutcome {
    let Some(hit) = raycast(graph, ray) else {
        return PickOutcome::Missed;
    };
    let owner = registry
        .owner_of(hit.node)
        .and_then(|id| registry.index_of(id).map(|index| (id, index)));
    match owner {
        Some((id, index)) => PickOutcome::Model { id, index },
        None => PickOutcome::Unmanaged { node: hit.node },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Geometry, Material, MeshRef, NodeContent, Transform};

    fn quad(graph: &mut SceneGraph, name: &str, z: f32) -> NodeId {
        let geometry = graph.insert_geometry(Geometry {
            positions: vec![
                Vec3::new(-1.0, -1.0, 0.0),
                Vec3::new(1.0, -1.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(-1.0, 1.0, 0.0),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
        });
        let material = graph.insert_material(Material {
            name: name.to_string(),
            base_color: [1.0; 4],
            base_color_texture: None,
        });
        let node = graph.create_node(name, NodeContent::Mesh(MeshRef { geometry, material }));
        graph.set_transform(
            node,
            Transform {
                position: Vec3::new(0.0, 0.0, z),
                ..Transform::IDENTITY
            },
        );
        graph.add_child(graph.root(), node);
        node
    }

    fn down_z() -> Ray {
        Ray::new(Vec3::new(0.2, 0.3, 10.0), Vec3::NEG_Z).unwrap()
    }

    #[test]
    fn triangle_hit_and_miss() {
        let ray = Ray::new(Vec3::new(0.2, 0.2, 1.0), Vec3::NEG_Z).unwrap();
        let tri = [Vec3::ZERO, Vec3::X, Vec3::Y];
        assert!((intersect_triangle(&ray, tri).unwrap() - 1.0).abs() < 1e-6);

        let behind = Ray::new(Vec3::new(0.2, 0.2, -1.0), Vec3::NEG_Z).unwrap();
        assert!(intersect_triangle(&behind, tri).is_none());
        let outside = Ray::new(Vec3::new(0.9, 0.9, 1.0), Vec3::NEG_Z).unwrap();
        assert!(intersect_triangle(&outside, tri).is_none());
    }

    #[test]
    fn raycast_returns_nearest() {
        let mut graph = SceneGraph::new();
        let _far = quad(&mut graph, "far", -2.0);
        let near = quad(&mut graph, "near", 1.0);

        let hit = raycast(&graph, &down_z()).unwrap();
        assert_eq!(hit.node, near);
        assert!((hit.distance - 9.0).abs() < 1e-4);
    }

    #[test]
    fn detached_and_unpickable_nodes_are_ignored() {
        let mut graph = SceneGraph::new();
        let near = quad(&mut graph, "near", 1.0);
        let far = quad(&mut graph, "far", -2.0);
        graph.detach(near);
        assert_eq!(raycast(&graph, &down_z()).unwrap().node, far);

        graph.node_mut(far).unwrap().pickable = false;
        assert!(raycast(&graph, &down_z()).is_none());
    }

    #[test]
    fn scaled_node_is_hit_in_local_space() {
        let mut graph = SceneGraph::new();
        let node = quad(&mut graph, "wide", 0.0);
        graph.set_transform(
            node,
            Transform {
                scale: Vec3::new(5.0, 1.0, 1.0),
                ..Transform::IDENTITY
            },
        );
        let ray = Ray::new(Vec3::new(4.0, 0.0, 3.0), Vec3::NEG_Z).unwrap();
        let hit = raycast(&graph, &ray).unwrap();
        assert!((hit.point - Vec3::new(4.0, 0.0, 0.0)).length() < 1e-4);
        assert!((hit.distance - 3.0).abs() < 1e-4);
    }

    #[test]
    fn aabb_slab_test() {
        let bounds = Aabb::UNIT;
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z).unwrap();
        assert!((intersect_aabb(&ray, &bounds).unwrap() - 4.5).abs() < 1e-6);
        let away = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::Z).unwrap();
        assert!(intersect_aabb(&away, &bounds).is_none());
    }
}
