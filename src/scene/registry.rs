use crate::assets::blob::BlobStore;
use crate::assets::lifecycle;
use crate::scene::{NodeId, ResourceHandle, SceneGraph, Transform};
use crate::viewer::events::{EventBus, ViewerEvent};
use glam::Vec3;
use std::collections::HashMap;

/// Smallest scale component any committed transform may carry.
pub const MIN_SCALE: f32 = 0.001;

/// Stable identity of a loaded model. Indices shift on removal; ids never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(u64);

/// Where a model's bytes came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    Url(String),
    /// `blob:` reference owned by the viewer's [`BlobStore`]; revoked on removal.
    Temporary(String),
}

impl SourceRef {
    pub fn as_str(&self) -> &str {
        match self {
            SourceRef::Url(url) | SourceRef::Temporary(url) => url,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, SourceRef::Temporary(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransformRejected {
    #[error("transform contains a non-finite component")]
    NonFinite,
    #[error("scale component below the minimum scale")]
    DegenerateScale,
}

/// Accepts only finite transforms whose scale never drops below [`MIN_SCALE`].
pub fn validate_transform(transform: &Transform) -> Result<(), TransformRejected> {
    if !transform.is_finite() {
        return Err(TransformRejected::NonFinite);
    }
    if transform.scale.min_element() < MIN_SCALE {
        return Err(TransformRejected::DegenerateScale);
    }
    Ok(())
}

#[derive(Debug)]
pub struct ModelEntry {
    id: ModelId,
    node: NodeId,
    source_ref: SourceRef,
    file_name: String,
    file_size: u64,
    transform: Transform,
    visible: bool,
}

impl ModelEntry {
    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn source_ref(&self) -> &SourceRef {
        &self.source_ref
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Last-known-good transform.
    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn position(&self) -> Vec3 {
        self.transform.position
    }

    pub fn rotation(&self) -> Vec3 {
        self.transform.rotation
    }

    pub fn scale(&self) -> Vec3 {
        self.transform.scale
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }
}

/// Everything needed to create a [`ModelEntry`]; produced by the asset loader.
#[derive(Debug, Clone)]
pub struct NewModel {
    pub node: NodeId,
    pub source_ref: SourceRef,
    pub file_name: String,
    pub file_size: u64,
    pub transform: Transform,
}

/// Copy of one entry's state for host panels. Never a live reference.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub index: usize,
    pub file_name: String,
    pub file_size: u64,
    pub is_active: bool,
    pub visible: bool,
    pub position: [f32; 3],
    pub rotation_deg: [f32; 3],
    pub scale: [f32; 3],
}

/// Ordered model entries, the active pointer and the node -> model lookup.
pub struct ModelRegistry {
    root: NodeId,
    entries: Vec<ModelEntry>,
    active: Option<usize>,
    owners: HashMap<NodeId, ModelId>,
    next_id: u64,
    events: EventBus,
}

impl ModelRegistry {
    pub fn new(root: NodeId, events: EventBus) -> Self {
        Self {
            root,
            entries: Vec::new(),
            active: None,
            owners: HashMap::new(),
            next_id: 1,
            events,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ModelEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active(&self) -> Option<&ModelEntry> {
        self.active.and_then(|index| self.entries.get(index))
    }

    pub fn index_of(&self, id: ModelId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    /// Reverse lookup from any node of a model's subtree to the owning model.
    pub fn owner_of(&self, node: NodeId) -> Option<ModelId> {
        self.owners.get(&node).copied()
    }

    /// Appends a visible entry and attaches its node under the root. Does not
    /// change the active entry.
    pub fn add(&mut self, graph: &mut SceneGraph, model: NewModel) -> usize {
        let id = ModelId(self.next_id);
        self.next_id += 1;
        for node in graph.descendants(model.node) {
            self.owners.insert(node, id);
        }
        graph.set_transform(model.node, model.transform);
        graph.add_child(self.root, model.node);

        self.entries.push(ModelEntry {
            id,
            node: model.node,
            source_ref: model.source_ref,
            file_name: model.file_name,
            file_size: model.file_size,
            transform: model.transform,
            visible: true,
        });
        let index = self.entries.len() - 1;
        log::info!(
            "registered model {:?} '{}' at index {}",
            id,
            self.entries[index].file_name,
            index
        );
        self.events.emit(ViewerEvent::ModelListChanged {
            count: self.entries.len(),
        });
        index
    }

    /// Makes `index` the active entry. Returns `false` for an out-of-range
    /// index; selecting the already-active entry succeeds without an event.
    pub fn switch_active(&mut self, graph: &mut SceneGraph, index: usize) -> bool {
        if index >= self.entries.len() {
            return false;
        }
        if self.active == Some(index) {
            return true;
        }
        let previous = self.active;
        if let Some(previous) = previous {
            self.sync_attachment(graph, previous);
        }
        self.active = Some(index);
        self.events.emit(ViewerEvent::ActiveModelChanged {
            index: Some(index),
            previous_index: previous,
        });
        true
    }

    /// Clears the active pointer. Emits only if something was active.
    pub fn clear_active(&mut self, graph: &mut SceneGraph) -> bool {
        let Some(previous) = self.active.take() else {
            return false;
        };
        self.sync_attachment(graph, previous);
        self.events.emit(ViewerEvent::ActiveModelChanged {
            index: None,
            previous_index: Some(previous),
        });
        true
    }

    /// Tears the entry down, splices it out and recomputes the active index.
    /// Returns the released resources, or `None` for an out-of-range index.
    pub fn remove(
        &mut self,
        graph: &mut SceneGraph,
        blobs: &mut BlobStore,
        index: usize,
    ) -> Option<Vec<ResourceHandle>> {
        let entry = self.entries.get(index)?;
        let released = lifecycle::dispose_entry(graph, blobs, entry);
        let entry = self.entries.remove(index);
        self.owners.retain(|_, owner| *owner != entry.id);

        self.active = match self.active {
            Some(active) if active == index => {
                if self.entries.is_empty() {
                    None
                } else {
                    Some(index.min(self.entries.len() - 1))
                }
            }
            Some(active) if index < active => Some(active - 1),
            other => other,
        };
        log::info!(
            "removed model '{}' (index {}), active now {:?}",
            entry.file_name,
            index,
            self.active
        );
        self.events.emit(ViewerEvent::ModelListChanged {
            count: self.entries.len(),
        });
        Some(released)
    }

    pub fn set_visibility(&mut self, graph: &mut SceneGraph, index: usize, visible: bool) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        entry.visible = visible;
        self.sync_attachment(graph, index);
        self.events
            .emit(ViewerEvent::VisibilityChanged { index, visible });
        true
    }

    /// Re-asserts the visibility invariant for one entry: visible entries are
    /// attached under the root, hidden ones are not. Never changes `visible`.
    pub fn sync_attachment(&self, graph: &mut SceneGraph, index: usize) {
        let Some(entry) = self.entries.get(index) else {
            return;
        };
        let attached = graph.parent(entry.node) == Some(self.root);
        if entry.visible && !attached {
            graph.add_child(self.root, entry.node);
        } else if !entry.visible && attached {
            graph.detach(entry.node);
        }
    }

    /// Validates and commits a transform, mirroring it onto the node and
    /// emitting `TransformChanged`. A rejected write leaves both the entry and
    /// the node on the last-known-good value.
    pub fn commit_transform(
        &mut self,
        graph: &mut SceneGraph,
        index: usize,
        transform: Transform,
    ) -> Result<(), CommitError> {
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(CommitError::UnknownIndex(index))?;
        if let Err(reason) = validate_transform(&transform) {
            graph.set_transform(entry.node, entry.transform);
            return Err(CommitError::Rejected(reason));
        }
        entry.transform = transform;
        graph.set_transform(entry.node, transform);
        self.events.emit(ViewerEvent::TransformChanged {
            index,
            position: transform.position.to_array(),
            rotation_deg: transform.rotation_deg().to_array(),
            scale: transform.scale.to_array(),
        });
        Ok(())
    }

    /// Puts the node back on the entry's last-known-good transform.
    pub fn rollback_node(&self, graph: &mut SceneGraph, index: usize) -> bool {
        match self.entries.get(index) {
            Some(entry) => graph.set_transform(entry.node, entry.transform),
            None => false,
        }
    }

    pub fn summary(&self, index: usize) -> Option<ModelSummary> {
        let entry = self.entries.get(index)?;
        Some(ModelSummary {
            index,
            file_name: entry.file_name.clone(),
            file_size: entry.file_size,
            is_active: self.active == Some(index),
            visible: entry.visible,
            position: entry.transform.position.to_array(),
            rotation_deg: entry.transform.rotation_deg().to_array(),
            scale: entry.transform.scale.to_array(),
        })
    }

    pub fn get_all(&self) -> Vec<ModelSummary> {
        (0..self.entries.len())
            .filter_map(|index| self.summary(index))
            .collect()
    }

    /// Releases every entry without emitting list events. Failures in one
    /// entry do not stop the rest.
    pub fn dispose_all(
        &mut self,
        graph: &mut SceneGraph,
        blobs: &mut BlobStore,
    ) -> Vec<ResourceHandle> {
        let mut released = Vec::new();
        for entry in &self.entries {
            released.extend(lifecycle::dispose_entry(graph, blobs, entry));
        }
        self.entries.clear();
        self.owners.clear();
        self.active = None;
        released
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommitError {
    #[error("no model at index {0}")]
    UnknownIndex(usize),
    #[error("transform rejected: {0}")]
    Rejected(#[source] TransformRejected),
}
