pub mod bounds;
pub mod host;
pub mod registry;

use bounds::Aabb;
use glam::{Mat4, Vec3};
use slotmap::SlotMap;

slotmap::new_key_type! {
    pub struct NodeId;
    pub struct GeometryId;
    pub struct MaterialId;
    pub struct TextureId;
}

/// Local transform of a node. Rotation is Euler XYZ in radians, applied in
/// Z (roll) * Y (yaw) * X (pitch) order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        position: Vec3::ZERO,
        rotation: Vec3::ZERO,
        scale: Vec3::ONE,
    };

    pub fn matrix(&self) -> Mat4 {
        compose_transform_matrix(self.position, self.rotation, self.scale)
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.rotation.is_finite() && self.scale.is_finite()
    }

    pub fn rotation_deg(&self) -> Vec3 {
        Vec3::new(
            self.rotation.x.to_degrees(),
            self.rotation.y.to_degrees(),
            self.rotation.z.to_degrees(),
        )
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

pub fn compose_transform_matrix(position: Vec3, rotation: Vec3, scale: Vec3) -> Mat4 {
    Mat4::from_translation(position)
        * Mat4::from_rotation_z(rotation.z)
        * Mat4::from_rotation_y(rotation.y)
        * Mat4::from_rotation_x(rotation.x)
        * Mat4::from_scale(scale)
}

/// Triangle soup in local space.
#[derive(Debug, Clone, Default)]
pub struct Geometry {
    pub positions: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl Geometry {
    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.positions.iter().copied())
    }

    /// Iterates complete triangles, skipping any that reference missing vertices.
    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).filter_map(|tri| {
            let a = *self.positions.get(tri[0] as usize)?;
            let b = *self.positions.get(tri[1] as usize)?;
            let c = *self.positions.get(tri[2] as usize)?;
            Some([a, b, c])
        })
    }
}

#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub base_color: [f32; 4],
    pub base_color_texture: Option<TextureId>,
}

#[derive(Debug, Clone)]
pub struct Texture {
    pub label: String,
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8.
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    Geometry(GeometryId),
    Material(MaterialId),
    Texture(TextureId),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshRef {
    pub geometry: GeometryId,
    pub material: MaterialId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Light {
    Ambient {
        color: [f32; 3],
        intensity: f32,
    },
    Directional {
        color: [f32; 3],
        intensity: f32,
        direction: [f32; 3],
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeContent {
    Empty,
    Mesh(MeshRef),
    Light(Light),
    Grid { size: f32, divisions: u32 },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub transform: Transform,
    pub content: NodeContent,
    pub pickable: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn mesh(&self) -> Option<MeshRef> {
        match self.content {
            NodeContent::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }
}

/// Node arena plus the geometry/material/texture tables the nodes refer to.
///
/// Nodes created with [`SceneGraph::create_node`] start detached; only the
/// subtree under [`SceneGraph::root`] is drawn and picked.
pub struct SceneGraph {
    nodes: SlotMap<NodeId, Node>,
    geometries: SlotMap<GeometryId, Geometry>,
    materials: SlotMap<MaterialId, Material>,
    textures: SlotMap<TextureId, Texture>,
    root: NodeId,
}

impl SceneGraph {
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node {
            name: "root".to_string(),
            transform: Transform::IDENTITY,
            content: NodeContent::Empty,
            pickable: false,
            parent: None,
            children: Vec::new(),
        });
        Self {
            nodes,
            geometries: SlotMap::with_key(),
            materials: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            root,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn create_node(&mut self, name: impl Into<String>, content: NodeContent) -> NodeId {
        self.nodes.insert(Node {
            name: name.into(),
            transform: Transform::IDENTITY,
            content,
            pickable: matches!(content, NodeContent::Mesh(_)),
            parent: None,
            children: Vec::new(),
        })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|node| node.parent)
    }

    /// Reparents `child` under `parent`. Refuses unknown ids and cycles.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if parent == child || !self.contains(parent) || !self.contains(child) {
            return false;
        }
        if self.is_descendant_of(parent, child) {
            return false;
        }
        self.detach(child);
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(child);
        }
        true
    }

    /// Unlinks `id` from its parent. Returns `false` if it had none.
    pub fn detach(&mut self, id: NodeId) -> bool {
        let Some(parent) = self.parent(id) else {
            return false;
        };
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.retain(|&child| child != id);
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = None;
        }
        true
    }

    /// True when `ancestor` is `id` itself or any node on its parent chain.
    pub fn is_descendant_of(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == ancestor {
                return true;
            }
            current = self.parent(node_id);
        }
        false
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        self.contains(id) && self.is_descendant_of(id, self.root)
    }

    /// `id` and every node below it, parents before children.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(node_id) = stack.pop() {
            let Some(node) = self.nodes.get(node_id) else {
                continue;
            };
            out.push(node_id);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    pub fn transform(&self, id: NodeId) -> Option<Transform> {
        self.nodes.get(id).map(|node| node.transform)
    }

    pub fn set_transform(&mut self, id: NodeId, transform: Transform) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.transform = transform;
                true
            }
            None => false,
        }
    }

    /// Product of local matrices from the top of `id`'s parent chain down to `id`.
    pub fn world_matrix(&self, id: NodeId) -> Mat4 {
        let mut matrix = Mat4::IDENTITY;
        let mut current = Some(id);
        while let Some(node_id) = current {
            let Some(node) = self.nodes.get(node_id) else {
                break;
            };
            matrix = node.transform.matrix() * matrix;
            current = node.parent;
        }
        matrix
    }

    /// World-space bounds of every mesh in the subtree rooted at `id`.
    pub fn world_bounds(&self, id: NodeId) -> Aabb {
        let mut bounds = Aabb::EMPTY;
        for node_id in self.descendants(id) {
            let Some(mesh) = self.nodes.get(node_id).and_then(Node::mesh) else {
                continue;
            };
            let Some(geometry) = self.geometries.get(mesh.geometry) else {
                continue;
            };
            let local = geometry.bounds();
            if local.is_empty() {
                continue;
            }
            bounds = bounds.union(&local.transform(&self.world_matrix(node_id)));
        }
        bounds
    }

    /// Removes a single node, unlinking it from its parent. Children are
    /// orphaned, not removed.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        self.detach(id);
        let node = self.nodes.remove(id)?;
        for child in &node.children {
            if let Some(child_node) = self.nodes.get_mut(*child) {
                child_node.parent = None;
            }
        }
        Some(node)
    }

    pub fn insert_geometry(&mut self, geometry: Geometry) -> GeometryId {
        self.geometries.insert(geometry)
    }

    pub fn geometry(&self, id: GeometryId) -> Option<&Geometry> {
        self.geometries.get(id)
    }

    pub fn remove_geometry(&mut self, id: GeometryId) -> Option<Geometry> {
        self.geometries.remove(id)
    }

    pub fn insert_material(&mut self, material: Material) -> MaterialId {
        self.materials.insert(material)
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id)
    }

    pub fn material_mut(&mut self, id: MaterialId) -> Option<&mut Material> {
        self.materials.get_mut(id)
    }

    pub fn remove_material(&mut self, id: MaterialId) -> Option<Material> {
        self.materials.remove(id)
    }

    pub fn insert_texture(&mut self, texture: Texture) -> TextureId {
        self.textures.insert(texture)
    }

    pub fn texture(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id)
    }

    pub fn remove_texture(&mut self, id: TextureId) -> Option<Texture> {
        self.textures.remove(id)
    }

    pub fn resource_counts(&self) -> (usize, usize, usize) {
        (
            self.geometries.len(),
            self.materials.len(),
            self.textures.len(),
        )
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}
