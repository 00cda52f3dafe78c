//! Arena-backed spatial resource hierarchy
//!
//! Nodes live in a flat arena and refer to their parent and children by
//! [`ResourceId`]. Ids carry a generation so an id of a removed resource never
//! aliases a resource that later reuses its arena slot.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::trace;

use crate::address::{self, AddressError};
use crate::resource::{Coordinate, Resource, ResourceKind};
use crate::tip::TipSpotState;
use crate::well::VolumeTracker;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("Resource name already in use: {0}")]
    DuplicateName(String),
    #[error("Resource {parent} is full ({max_children} children max)")]
    ResourceFull { parent: String, max_children: usize },
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Stale resource id: {0}")]
    StaleId(ResourceId),
    #[error("Cannot move {child} under {parent}: a resource cannot be its own ancestor")]
    WouldCreateCycle { child: String, parent: String },
    #[error("Cannot unassign the root resource {0}")]
    CannotRemoveRoot(String),
    #[error("Invalid deck slot {slot}, expected 1..={max}")]
    InvalidSlot { slot: u8, max: u8 },
    #[error("Deck slot {slot} is occupied by {occupant}")]
    SlotOccupied { slot: u8, occupant: String },
    #[error("Deck slot {0} is empty")]
    SlotEmpty(u8),
    #[error("{name} is a {actual}, expected a {expected}")]
    WrongKind {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error(transparent)]
    Address(#[from] AddressError),
}

/// Stable handle of a resource inside a [`ResourceTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    index: u32,
    generation: u32,
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// A resource that is part of a tree
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    pub size_x: f64,
    pub size_y: f64,
    pub size_z: f64,
    /// Offset relative to the parent's origin
    pub location: Coordinate,
    pub kind: ResourceKind,
    pub model: Option<String>,
    pub max_children: Option<usize>,
    parent: Option<ResourceId>,
    children: Vec<ResourceId>,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<ResourceId> {
        self.parent
    }

    pub fn children(&self) -> &[ResourceId] {
        &self.children
    }

    fn is_full(&self) -> bool {
        self.max_children
            .map(|max| self.children.len() >= max)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Spatial tree of resources rooted at a single node (usually a deck)
#[derive(Debug, Clone)]
pub struct ResourceTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    names: HashMap<String, ResourceId>,
    root: ResourceId,
}

impl ResourceTree {
    /// Create a tree whose root is `root` (with its subtree)
    pub fn new(root: Resource) -> Result<Self, ResourceError> {
        let mut tree = Self::empty();
        tree.check_names(&root)?;
        tree.root = tree.insert(root, None);
        Ok(tree)
    }

    /// A tree holding only `root`; children of `root` are dropped
    pub fn leaf(mut root: Resource) -> Self {
        root.children.clear();
        let mut tree = Self::empty();
        tree.root = tree.insert(root, None);
        tree
    }

    fn empty() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            names: HashMap::new(),
            root: ResourceId {
                index: 0,
                generation: 0,
            },
        }
    }

    pub fn root(&self) -> ResourceId {
        self.root
    }

    /// Number of resources in the tree
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: ResourceId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub fn get_mut(&mut self, id: ResourceId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    /// Like [`get`](Self::get) but with an error for stale ids
    pub fn node(&self, id: ResourceId) -> Result<&Node, ResourceError> {
        self.get(id).ok_or(ResourceError::StaleId(id))
    }

    pub fn node_mut(&mut self, id: ResourceId) -> Result<&mut Node, ResourceError> {
        self.get_mut(id).ok_or(ResourceError::StaleId(id))
    }

    /// Name of a resource, or its id when it no longer exists
    pub fn name_of(&self, id: ResourceId) -> String {
        self.get(id)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Look up a resource anywhere in the tree by name
    pub fn find(&self, name: &str) -> Option<ResourceId> {
        self.names.get(name).copied()
    }

    /// Like [`find`](Self::find) but with an error when missing
    pub fn find_required(&self, name: &str) -> Result<ResourceId, ResourceError> {
        self.find(name)
            .ok_or_else(|| ResourceError::NotFound(name.to_string()))
    }

    /// Direct child of `parent` with the given name
    pub fn get_child(&self, parent: ResourceId, name: &str) -> Option<ResourceId> {
        self.get(parent)?
            .children
            .iter()
            .copied()
            .find(|c| self.get(*c).map(|n| n.name == name).unwrap_or(false))
    }

    pub fn parent(&self, id: ResourceId) -> Option<ResourceId> {
        self.get(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: ResourceId) -> &[ResourceId] {
        self.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Ancestors of `id`, nearest first
    pub fn ancestors(&self, id: ResourceId) -> Vec<ResourceId> {
        let mut ancestors = Vec::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            ancestors.push(parent);
            current = self.parent(parent);
        }
        ancestors
    }

    /// All descendants of `id`, depth first, excluding `id`
    pub fn descendants(&self, id: ResourceId) -> Vec<ResourceId> {
        let mut out = Vec::new();
        let mut stack: Vec<ResourceId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Position of `id` in the root's coordinate frame
    pub fn absolute_location(&self, id: ResourceId) -> Result<Coordinate, ResourceError> {
        let mut location = self.node(id)?.location;
        for ancestor in self.ancestors(id) {
            location = location + self.node(ancestor)?.location;
        }
        Ok(location)
    }

    /// Insert a detached resource subtree under `parent` at `location`
    pub fn assign_child_resource(
        &mut self,
        parent: ResourceId,
        mut child: Resource,
        location: Coordinate,
    ) -> Result<ResourceId, ResourceError> {
        let parent_node = self.node(parent)?;
        if parent_node.is_full() {
            return Err(ResourceError::ResourceFull {
                parent: parent_node.name.clone(),
                max_children: parent_node.max_children.unwrap_or_default(),
            });
        }
        self.check_names(&child)?;

        child.location = location;
        let id = self.insert(child, Some(parent));
        if let Some(parent_node) = self.get_mut(parent) {
            parent_node.children.push(id);
        }
        trace!(parent = %self.name_of(parent), child = %self.name_of(id), "Assigned resource");
        Ok(id)
    }

    /// Remove `id` and its subtree, returning them detached with their state
    pub fn unassign_child_resource(&mut self, id: ResourceId) -> Result<Resource, ResourceError> {
        let node = self.node(id)?;
        let Some(parent) = node.parent else {
            return Err(ResourceError::CannotRemoveRoot(node.name.clone()));
        };

        if let Some(parent_node) = self.get_mut(parent) {
            parent_node.children.retain(|c| *c != id);
        }
        let resource = self.take(id).ok_or(ResourceError::StaleId(id))?;
        trace!(parent = %self.name_of(parent), child = %resource.name, "Unassigned resource");
        Ok(resource)
    }

    /// Re-parent `id` under `new_parent` without detaching it
    pub fn move_resource(
        &mut self,
        id: ResourceId,
        new_parent: ResourceId,
        location: Coordinate,
    ) -> Result<(), ResourceError> {
        let node = self.node(id)?;
        let old_parent = node
            .parent
            .ok_or_else(|| ResourceError::CannotRemoveRoot(node.name.clone()))?;
        let target = self.node(new_parent)?;

        if new_parent == id || self.ancestors(new_parent).contains(&id) {
            return Err(ResourceError::WouldCreateCycle {
                child: self.name_of(id),
                parent: self.name_of(new_parent),
            });
        }
        if old_parent != new_parent && target.is_full() {
            return Err(ResourceError::ResourceFull {
                parent: target.name.clone(),
                max_children: target.max_children.unwrap_or_default(),
            });
        }

        if let Some(old) = self.get_mut(old_parent) {
            old.children.retain(|c| *c != id);
        }
        if let Some(new) = self.get_mut(new_parent) {
            new.children.push(id);
        }
        let node = self.node_mut(id)?;
        node.parent = Some(new_parent);
        node.location = location;
        Ok(())
    }

    /// Owned copy of the subtree at `id`
    pub fn to_resource(&self, id: ResourceId) -> Result<Resource, ResourceError> {
        let node = self.node(id)?;
        let children = node
            .children
            .iter()
            .map(|c| self.to_resource(*c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Resource {
            name: node.name.clone(),
            size_x: node.size_x,
            size_y: node.size_y,
            size_z: node.size_z,
            location: node.location,
            kind: node.kind.clone(),
            model: node.model.clone(),
            max_children: node.max_children,
            children,
        })
    }

    /// Nearest plate or tip rack containing (or being) `id`
    pub fn labware_of(&self, id: ResourceId) -> Option<ResourceId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|r| self.get(*r).map(|n| n.kind.is_labware()).unwrap_or(false))
    }

    /// Item of a plate or tip rack by identifier, e.g. `"A1"`
    pub fn item(&self, labware: ResourceId, identifier: &str) -> Result<ResourceId, ResourceError> {
        let node = self.node(labware)?;
        let grid = node.kind.grid().ok_or_else(|| ResourceError::WrongKind {
            name: node.name.clone(),
            expected: "plate or tip_rack",
            actual: node.kind.category(),
        })?;
        let index = address::index_of(identifier, grid.num_items_y, grid.num_items_x)?;
        node.children
            .get(index)
            .copied()
            .ok_or_else(|| ResourceError::NotFound(format!("{}[{}]", node.name, identifier)))
    }

    /// Items of a plate or tip rack by range, e.g. `"A1:H1"`
    pub fn items(&self, labware: ResourceId, range: &str) -> Result<Vec<ResourceId>, ResourceError> {
        // Both corners must lie on the grid before the rectangle is expanded
        for corner in range.split(':') {
            self.item(labware, corner.trim())?;
        }
        address::parse_range(range)?
            .iter()
            .map(|identifier| self.item(labware, identifier))
            .collect()
    }

    /// The plate currently loaded into a plate reader
    pub fn get_plate(&self, reader: ResourceId) -> Result<Option<ResourceId>, ResourceError> {
        let node = self.node(reader)?;
        if node.kind != ResourceKind::PlateReader {
            return Err(ResourceError::WrongKind {
                name: node.name.clone(),
                expected: "plate_reader",
                actual: node.kind.category(),
            });
        }
        Ok(node
            .children
            .iter()
            .copied()
            .find(|c| matches!(self.get(*c).map(|n| &n.kind), Some(ResourceKind::Plate(_)))))
    }

    /// Volume tracker of a well
    pub fn well(&self, id: ResourceId) -> Result<&VolumeTracker, ResourceError> {
        let node = self.node(id)?;
        match &node.kind {
            ResourceKind::Well(tracker) => Ok(tracker),
            other => Err(wrong_kind(&node.name, "well", other)),
        }
    }

    pub fn well_mut(&mut self, id: ResourceId) -> Result<&mut VolumeTracker, ResourceError> {
        let node = self.node_mut(id)?;
        match &mut node.kind {
            ResourceKind::Well(tracker) => Ok(tracker),
            other => Err(wrong_kind(&node.name, "well", other)),
        }
    }

    /// Tip state of a tip spot
    pub fn tip_spot(&self, id: ResourceId) -> Result<&TipSpotState, ResourceError> {
        let node = self.node(id)?;
        match &node.kind {
            ResourceKind::TipSpot(state) => Ok(state),
            other => Err(wrong_kind(&node.name, "tip_spot", other)),
        }
    }

    pub fn tip_spot_mut(&mut self, id: ResourceId) -> Result<&mut TipSpotState, ResourceError> {
        let node = self.node_mut(id)?;
        match &mut node.kind {
            ResourceKind::TipSpot(state) => Ok(state),
            other => Err(wrong_kind(&node.name, "tip_spot", other)),
        }
    }

    fn check_names(&self, resource: &Resource) -> Result<(), ResourceError> {
        let mut seen = HashSet::new();
        for name in resource.names() {
            if self.names.contains_key(name) || !seen.insert(name) {
                return Err(ResourceError::DuplicateName(name.to_string()));
            }
        }
        Ok(())
    }

    fn insert(&mut self, resource: Resource, parent: Option<ResourceId>) -> ResourceId {
        let Resource {
            name,
            size_x,
            size_y,
            size_z,
            location,
            kind,
            model,
            max_children,
            children,
        } = resource;

        let id = self.alloc(Node {
            name: name.clone(),
            size_x,
            size_y,
            size_z,
            location,
            kind,
            model,
            max_children,
            parent,
            children: Vec::new(),
        });
        self.names.insert(name, id);

        let child_ids: Vec<ResourceId> = children
            .into_iter()
            .map(|child| self.insert(child, Some(id)))
            .collect();
        if let Some(node) = self.get_mut(id) {
            node.children = child_ids;
        }
        id
    }

    fn alloc(&mut self, node: Node) -> ResourceId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return ResourceId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        ResourceId {
            index,
            generation: 0,
        }
    }

    fn take(&mut self, id: ResourceId) -> Option<Resource> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.names.remove(&node.name);

        let children = node
            .children
            .iter()
            .filter_map(|child| self.take(*child))
            .collect();

        Some(Resource {
            name: node.name,
            size_x: node.size_x,
            size_y: node.size_y,
            size_z: node.size_z,
            location: node.location,
            kind: node.kind,
            model: node.model,
            max_children: node.max_children,
            children,
        })
    }
}

fn wrong_kind(name: &str, expected: &'static str, actual: &ResourceKind) -> ResourceError {
    ResourceError::WrongKind {
        name: name.to_string(),
        expected,
        actual: actual.category(),
    }
}
