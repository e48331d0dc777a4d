use crate::assets::AssetError;
use crate::scene::{Geometry, Texture, Transform};
use glam::{EulerRot, Quat, Vec3};
use std::path::Path;

/// Raw input handed to an [`Importer`].
#[derive(Debug, Clone, Copy)]
pub enum ImportInput<'a> {
    Path(&'a Path),
    /// In-memory document; `origin` names it in errors and logs.
    Bytes { bytes: &'a [u8], origin: &'a str },
}

impl ImportInput<'_> {
    pub fn origin(&self) -> String {
        match self {
            ImportInput::Path(path) => path.display().to_string(),
            ImportInput::Bytes { origin, .. } => origin.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportedPrimitive {
    pub geometry: Geometry,
    /// Index into [`ImportedScene::materials`].
    pub material: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ImportedNode {
    pub name: String,
    pub transform: Transform,
    pub primitives: Vec<ImportedPrimitive>,
    pub children: Vec<ImportedNode>,
}

impl ImportedNode {
    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
            + self
                .children
                .iter()
                .map(ImportedNode::primitive_count)
                .sum::<usize>()
    }
}

#[derive(Debug, Clone)]
pub struct ImportedMaterial {
    pub name: String,
    pub base_color: [f32; 4],
    /// Index into [`ImportedScene::textures`].
    pub base_color_texture: Option<usize>,
}

/// Scene-graph-ready data produced by an importer. Holds no live handles, so
/// an abandoned import leaves nothing to clean up.
#[derive(Debug, Clone, Default)]
pub struct ImportedScene {
    pub name: String,
    pub roots: Vec<ImportedNode>,
    pub materials: Vec<ImportedMaterial>,
    pub textures: Vec<Texture>,
}

impl ImportedScene {
    pub fn primitive_count(&self) -> usize {
        self.roots.iter().map(ImportedNode::primitive_count).sum()
    }
}

/// Runs on the import worker thread, hence `Send + Sync`.
pub trait Importer: Send + Sync {
    fn import(&self, input: ImportInput<'_>) -> Result<ImportedScene, AssetError>;
}

/// glTF 2.0 importer for `.gltf` (with embedded or sibling buffers) and `.glb`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GltfImporter;

impl Importer for GltfImporter {
    fn import(&self, input: ImportInput<'_>) -> Result<ImportedScene, AssetError> {
        let origin = input.origin();
        let imported = match input {
            ImportInput::Path(path) => gltf::import(path),
            ImportInput::Bytes { bytes, .. } => gltf::import_slice(bytes),
        };
        let (document, buffers, images) = match imported {
            Ok(parts) => parts,
            Err(gltf::Error::Io(source)) => {
                return Err(AssetError::Read {
                    path: origin,
                    source,
                })
            }
            Err(source) => return Err(AssetError::Gltf { origin, source }),
        };

        let Some(scene) = document
            .default_scene()
            .or_else(|| document.scenes().next())
        else {
            return Err(AssetError::EmptyDocument { origin });
        };

        let textures = images
            .into_iter()
            .enumerate()
            .map(|(index, data)| convert_image(&origin, index, data))
            .collect();
        let materials = document.materials().map(convert_material).collect();

        let mut skipped = 0usize;
        let roots: Vec<ImportedNode> = scene
            .nodes()
            .map(|node| convert_node(&node, &buffers, &mut skipped))
            .collect();

        let result = ImportedScene {
            name: scene.name().unwrap_or("scene").to_string(),
            roots,
            materials,
            textures,
        };
        if result.primitive_count() == 0 {
            if skipped > 0 {
                return Err(AssetError::UnsupportedPrimitives { origin, skipped });
            }
            return Err(AssetError::EmptyDocument { origin });
        }
        log::debug!(
            "imported {}: {} primitive(s), {} material(s), {} texture(s)",
            origin,
            result.primitive_count(),
            result.materials.len(),
            result.textures.len()
        );
        Ok(result)
    }
}

fn convert_node(
    node: &gltf::Node,
    buffers: &[gltf::buffer::Data],
    skipped: &mut usize,
) -> ImportedNode {
    let (translation, rotation, scale) = node.transform().decomposed();
    let (z, y, x) = Quat::from_array(rotation).to_euler(EulerRot::ZYX);
    let transform = Transform {
        position: Vec3::from(translation),
        rotation: Vec3::new(x, y, z),
        scale: Vec3::from(scale),
    };

    let mut primitives = Vec::new();
    if let Some(mesh) = node.mesh() {
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                log::warn!(
                    "skipping primitive {} of mesh {}: unsupported mode {:?}",
                    primitive.index(),
                    mesh.index(),
                    primitive.mode()
                );
                *skipped += 1;
                continue;
            }
            let reader = primitive.reader(|buffer| {
                buffers.get(buffer.index()).map(|data| data.0.as_slice())
            });
            let Some(positions) = reader.read_positions() else {
                log::warn!(
                    "skipping primitive {} of mesh {}: no positions",
                    primitive.index(),
                    mesh.index()
                );
                *skipped += 1;
                continue;
            };
            let positions: Vec<Vec3> = positions.map(Vec3::from).collect();
            let indices = match reader.read_indices() {
                Some(indices) => indices.into_u32().collect(),
                None => (0..positions.len() as u32).collect(),
            };
            primitives.push(ImportedPrimitive {
                geometry: Geometry { positions, indices },
                material: primitive.material().index(),
            });
        }
    }

    ImportedNode {
        name: node
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("node {}", node.index())),
        transform,
        primitives,
        children: node
            .children()
            .map(|child| convert_node(&child, buffers, skipped))
            .collect(),
    }
}

fn convert_material(material: gltf::Material) -> ImportedMaterial {
    let pbr = material.pbr_metallic_roughness();
    ImportedMaterial {
        name: material.name().unwrap_or("material").to_string(),
        base_color: pbr.base_color_factor(),
        base_color_texture: pbr
            .base_color_texture()
            .map(|info| info.texture().source().index()),
    }
}

fn convert_image(origin: &str, index: usize, data: gltf::image::Data) -> Texture {
    use gltf::image::Format;

    let label = format!("{origin}#image{index}");
    let pixels = match data.format {
        Format::R8G8B8A8 => data.pixels,
        Format::R8G8B8 => data
            .pixels
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], 255])
            .collect(),
        Format::R8G8 => data
            .pixels
            .chunks_exact(2)
            .flat_map(|px| [px[0], px[1], 0, 255])
            .collect(),
        Format::R8 => data
            .pixels
            .iter()
            .flat_map(|&v| [v, v, v, 255])
            .collect(),
        other => {
            log::warn!("{label}: unsupported pixel format {other:?}, using white");
            return Texture {
                label,
                width: 1,
                height: 1,
                pixels: vec![255; 4],
            };
        }
    };
    Texture {
        label,
        width: data.width,
        height: data.height,
        pixels,
    }
}

/// Test double producing fixed triangle meshes without touching the disk.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct MeshImporter {
    /// One entry per primitive, each a list of triangle corners.
    pub primitives: Vec<Vec<Vec3>>,
    pub fail: bool,
}

#[cfg(test)]
impl MeshImporter {
    pub fn cube(size: f32) -> Self {
        let h = size * 0.5;
        Self::from_points(vec![
            Vec3::new(-h, -h, -h),
            Vec3::new(h, -h, -h),
            Vec3::new(h, h, h),
            Vec3::new(-h, h, h),
            Vec3::new(-h, -h, h),
            Vec3::new(h, h, -h),
        ])
    }

    pub fn from_points(points: Vec<Vec3>) -> Self {
        Self {
            primitives: vec![points],
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            primitives: Vec::new(),
            fail: true,
        }
    }
}

#[cfg(test)]
impl Importer for MeshImporter {
    fn import(&self, input: ImportInput<'_>) -> Result<ImportedScene, AssetError> {
        if self.fail {
            return Err(AssetError::EmptyDocument {
                origin: input.origin(),
            });
        }
        let primitives = self
            .primitives
            .iter()
            .map(|points| ImportedPrimitive {
                geometry: Geometry {
                    positions: points.clone(),
                    indices: (0..points.len() as u32).collect(),
                },
                material: None,
            })
            .collect();
        Ok(ImportedScene {
            name: input.origin(),
            roots: vec![ImportedNode {
                name: "mesh".to_string(),
                transform: Transform::IDENTITY,
                primitives,
                children: Vec::new(),
            }],
            materials: Vec::new(),
            textures: Vec::new(),
        })
    }
}

/// Wraps another importer and blocks each import until the returned sender
/// fires or is dropped.
#[cfg(test)]
pub struct GatedImporter {
    inner: MeshImporter,
    gate: std::sync::Mutex<std::sync::mpsc::Receiver<()>>,
}

#[cfg(test)]
impl GatedImporter {
    pub fn new(inner: MeshImporter) -> (Self, std::sync::mpsc::Sender<()>) {
        let (sender, receiver) = std::sync::mpsc::channel();
        let importer = Self {
            inner,
            gate: std::sync::Mutex::new(receiver),
        };
        (importer, sender)
    }
}

#[cfg(test)]
impl Importer for GatedImporter {
    fn import(&self, input: ImportInput<'_>) -> Result<ImportedScene, AssetError> {
        if let Ok(gate) = self.gate.lock() {
            let _ = gate.recv();
        }
        self.inner.import(input)
    }
}
