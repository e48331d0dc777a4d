pub mod blob;
pub mod importer;
pub mod lifecycle;

use crate::scene::bounds::Aabb;
use crate::scene::registry::SourceRef;
use crate::scene::{
    Material, MaterialId, MeshRef, NodeContent, NodeId, SceneGraph, TextureId, Transform,
};
use blob::BlobStore;
use futures::channel::oneshot;
use glam::Vec3;
use importer::{ImportInput, ImportedNode, ImportedScene, Importer};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Extents at or below this are treated as degenerate and left unscaled.
const DEGENERATE_EXTENT: f32 = 1e-6;
const MIN_NORMALIZE_SCALE: f32 = 0.01;
const MAX_NORMALIZE_SCALE: f32 = 100.0;
const DEFAULT_BASE_COLOR: [f32; 4] = [0.8, 0.8, 0.8, 1.0];

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("failed to read asset at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse glTF {origin}: {source}")]
    Gltf {
        origin: String,
        #[source]
        source: gltf::Error,
    },
    #[error("{origin} contains no renderable geometry")]
    EmptyDocument { origin: String },
    #[error("{origin}: all {skipped} primitive(s) use unsupported modes")]
    UnsupportedPrimitives { origin: String, skipped: usize },
    #[error("temporary reference {url} is unknown or already revoked")]
    UnknownTemporaryRef { url: String },
    #[error("could not start import worker for {origin}: {source}")]
    Spawn {
        origin: String,
        #[source]
        source: std::io::Error,
    },
    #[error("import worker for {origin} stopped without a result")]
    Abandoned { origin: String },
}

/// Decides how large a freshly loaded model should appear.
pub trait PlacementStrategy {
    fn name(&self) -> &'static str;
    /// Largest bounding-box dimension after normalization.
    fn target_size(&self) -> f32;
}

/// Free-standing authoring on the ground grid.
#[derive(Debug, Default, Clone, Copy)]
pub struct FreePlacement;

impl PlacementStrategy for FreePlacement {
    fn name(&self) -> &'static str {
        "free"
    }

    fn target_size(&self) -> f32 {
        2.0
    }
}

/// Authoring relative to a flat reference plane; models are kept smaller.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerPlacement;

impl PlacementStrategy for MarkerPlacement {
    fn name(&self) -> &'static str {
        "marker"
    }

    fn target_size(&self) -> f32 {
        1.0
    }
}

pub fn placement_for(marker_mode: bool) -> Box<dyn PlacementStrategy> {
    if marker_mode {
        Box::new(MarkerPlacement)
    } else {
        Box::new(FreePlacement)
    }
}

/// Imported data plus the descriptive metadata of its source.
#[derive(Debug, Clone)]
pub struct ImportedAsset {
    pub scene: ImportedScene,
    pub file_name: String,
    pub file_size: u64,
}

/// A normalized node ready to be handed to the registry. The node is created
/// but not attached anywhere yet.
#[derive(Debug, Clone)]
pub struct PreparedModel {
    pub node: NodeId,
    pub transform: Transform,
    pub file_name: String,
    pub file_size: u64,
    /// Largest dimension after normalization.
    pub size: f32,
}

/// Work moved onto the import thread. Owns everything it reads.
enum ImportJob {
    Path { path: PathBuf, file_name: String },
    Bytes { bytes: Vec<u8>, origin: String },
}

impl ImportJob {
    fn run(self, importer: &dyn Importer) -> Result<ImportedAsset, AssetError> {
        match self {
            ImportJob::Path { path, file_name } => {
                let file_size = std::fs::metadata(&path)
                    .map(|meta| meta.len())
                    .unwrap_or_else(|err| {
                        log::debug!("no size for {}: {}", path.display(), err);
                        0
                    });
                let scene = importer.import(ImportInput::Path(&path))?;
                Ok(ImportedAsset {
                    scene,
                    file_name,
                    file_size,
                })
            }
            ImportJob::Bytes { bytes, origin } => {
                let scene = importer.import(ImportInput::Bytes {
                    bytes: &bytes,
                    origin: &origin,
                })?;
                Ok(ImportedAsset {
                    scene,
                    file_name: origin,
                    file_size: bytes.len() as u64,
                })
            }
        }
    }
}

/// An import running on its worker thread. Resolves once the worker has
/// read and decoded the source.
pub struct PendingImport {
    origin: String,
    receiver: oneshot::Receiver<Result<ImportedAsset, AssetError>>,
}

impl PendingImport {
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Non-blocking check for hosts that poll once per frame.
    pub fn try_take(&mut self) -> Option<Result<ImportedAsset, AssetError>> {
        match self.receiver.try_recv() {
            Ok(result) => result,
            Err(oneshot::Canceled) => Some(Err(self.abandoned())),
        }
    }

    fn abandoned(&self) -> AssetError {
        AssetError::Abandoned {
            origin: self.origin.clone(),
        }
    }
}

impl Future for PendingImport {
    type Output = Result<ImportedAsset, AssetError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(self.abandoned())),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct AssetLoader {
    importer: Arc<dyn Importer>,
    placement: Box<dyn PlacementStrategy>,
}

impl AssetLoader {
    pub fn new(importer: Box<dyn Importer>, placement: Box<dyn PlacementStrategy>) -> Self {
        log::debug!("asset loader using {} placement", placement.name());
        Self {
            importer: Arc::from(importer),
            placement,
        }
    }

    pub fn placement(&self) -> &dyn PlacementStrategy {
        self.placement.as_ref()
    }

    /// Starts reading and decoding a source on a worker thread. Touches no
    /// scene state; dropping the returned [`PendingImport`] discards the
    /// result when the worker finishes.
    pub fn import(
        &self,
        source: &SourceRef,
        blobs: &BlobStore,
    ) -> Result<PendingImport, AssetError> {
        let origin = source.as_str().to_string();
        let job = match source {
            SourceRef::Temporary(url) => {
                let bytes = blobs
                    .resolve(url)
                    .ok_or_else(|| AssetError::UnknownTemporaryRef { url: url.clone() })?;
                ImportJob::Bytes {
                    bytes: bytes.to_vec(),
                    origin: url.clone(),
                }
            }
            SourceRef::Url(url) => ImportJob::Path {
                path: local_path(url),
                file_name: file_name_of(url),
            },
        };

        let (sender, receiver) = oneshot::channel();
        let importer = Arc::clone(&self.importer);
        std::thread::Builder::new()
            .name("stageview-import".to_string())
            .spawn(move || {
                let result = job.run(importer.as_ref());
                if sender.send(result).is_err() {
                    log::debug!("import finished after its load was dropped");
                }
            })
            .map_err(|source| AssetError::Spawn {
                origin: origin.clone(),
                source,
            })?;
        Ok(PendingImport { origin, receiver })
    }

    /// Builds the imported data into the scene graph under a fresh wrapper
    /// node and normalizes it.
    pub fn instantiate(&self, graph: &mut SceneGraph, asset: ImportedAsset) -> PreparedModel {
        let ImportedAsset {
            scene,
            file_name,
            file_size,
        } = asset;

        let textures: Vec<TextureId> = scene
            .textures
            .into_iter()
            .map(|texture| graph.insert_texture(texture))
            .collect();
        let node = graph.create_node(file_name.clone(), NodeContent::Empty);
        let mut builder = NodeBuilder {
            materials: &scene.materials,
            textures: &textures,
            used_textures: vec![false; textures.len()],
        };
        for root in &scene.roots {
            let child = builder.build(graph, root);
            graph.add_child(node, child);
        }
        // Textures no material ended up referencing would otherwise leak.
        for (id, used) in textures.iter().zip(&builder.used_textures) {
            if !used {
                graph.remove_texture(*id);
            }
        }

        let (transform, size) = normalize(graph, node, self.placement.target_size());
        graph.set_transform(node, transform);
        log::info!(
            "prepared '{}' ({} bytes): scale {:.4}, size {:.3}",
            file_name,
            file_size,
            transform.scale.x,
            size
        );
        PreparedModel {
            node,
            transform,
            file_name,
            file_size,
            size,
        }
    }
}

struct NodeBuilder<'a> {
    materials: &'a [importer::ImportedMaterial],
    textures: &'a [TextureId],
    used_textures: Vec<bool>,
}

impl NodeBuilder<'_> {
    fn build(&mut self, graph: &mut SceneGraph, imported: &ImportedNode) -> NodeId {
        let node = match imported.primitives.as_slice() {
            [single] => {
                let mesh = self.mesh(graph, single);
                graph.create_node(imported.name.clone(), NodeContent::Mesh(mesh))
            }
            primitives => {
                let node = graph.create_node(imported.name.clone(), NodeContent::Empty);
                for (index, primitive) in primitives.iter().enumerate() {
                    let mesh = self.mesh(graph, primitive);
                    let child = graph.create_node(
                        format!("{} #{}", imported.name, index),
                        NodeContent::Mesh(mesh),
                    );
                    graph.add_child(node, child);
                }
                node
            }
        };
        graph.set_transform(node, imported.transform);
        for child in &imported.children {
            let child = self.build(graph, child);
            graph.add_child(node, child);
        }
        node
    }

    /// Every primitive gets its own material instance so teardown can release
    /// each exactly once.
    fn mesh(&mut self, graph: &mut SceneGraph, primitive: &importer::ImportedPrimitive) -> MeshRef {
        let geometry = graph.insert_geometry(primitive.geometry.clone());
        let material = self.material(graph, primitive.material);
        MeshRef { geometry, material }
    }

    fn material(&mut self, graph: &mut SceneGraph, index: Option<usize>) -> MaterialId {
        let materials = self.materials;
        let Some(source) = index.and_then(|index| materials.get(index)) else {
            return graph.insert_material(Material {
                name: "default".to_string(),
                base_color: DEFAULT_BASE_COLOR,
                base_color_texture: None,
            });
        };
        let texture = source.base_color_texture.and_then(|texture| {
            let id = *self.textures.get(texture)?;
            if self.used_textures[texture] {
                // Each texture has exactly one owning material.
                let copy = graph.texture(id)?.clone();
                return Some(graph.insert_texture(copy));
            }
            self.used_textures[texture] = true;
            Some(id)
        });
        graph.insert_material(Material {
            name: source.name.clone(),
            base_color: source.base_color,
            base_color_texture: texture,
        })
    }
}

/// Computes the initial transform of `node`: uniformly scaled so its largest
/// dimension matches `target_size`, horizontally centered and resting on y=0.
/// Returns the transform and the normalized largest dimension.
pub fn normalize(graph: &mut SceneGraph, node: NodeId, target_size: f32) -> (Transform, f32) {
    graph.set_transform(node, Transform::IDENTITY);
    let mut raw = graph.world_bounds(node);
    if !raw.is_valid() {
        log::warn!("non-finite or empty bounds, falling back to unit box");
        raw = Aabb::UNIT;
    }
    let max_dimension = raw.max_dimension();
    let scale = if !max_dimension.is_finite() || max_dimension <= DEGENERATE_EXTENT {
        1.0
    } else {
        (target_size / max_dimension).clamp(MIN_NORMALIZE_SCALE, MAX_NORMALIZE_SCALE)
    };

    // Bounds of the scaled model, before translation.
    let scaled = Aabb::new(raw.min * scale, raw.max * scale);
    let center = scaled.center();
    let position = Vec3::new(-center.x, -scaled.min.y, -center.z);
    let position = if position.is_finite() {
        position
    } else {
        log::warn!("non-finite placement, leaving model at the origin");
        Vec3::ZERO
    };
    let transform = Transform {
        position,
        rotation: Vec3::ZERO,
        scale: Vec3::splat(scale),
    };
    (transform, scaled.max_dimension())
}

/// Strips a `file://` scheme so URLs and plain paths resolve the same way.
fn local_path(url: &str) -> PathBuf {
    PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
}

pub fn file_name_of(url: &str) -> String {
    let trimmed = url.split(['?', '#']).next().unwrap_or(url);
    Path::new(trimmed)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("model")
        .to_string()
}
