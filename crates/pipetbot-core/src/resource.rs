//! Detached resource descriptions
//!
//! A [`Resource`] is an owned, self-contained subtree (a plate with its wells,
//! a tip rack with its tip spots). It becomes part of the spatial hierarchy
//! when assigned into a [`ResourceTree`](crate::tree::ResourceTree), and is
//! handed back, state included, when unassigned.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

use crate::tip::{TipDefinition, TipSpotState};
use crate::well::VolumeTracker;

/// A point or offset in deck space, in millimeters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Coordinate {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

impl Add for Coordinate {
    type Output = Coordinate;

    fn add(self, rhs: Coordinate) -> Coordinate {
        Coordinate::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Coordinate {
    type Output = Coordinate;

    fn sub(self, rhs: Coordinate) -> Coordinate {
        Coordinate::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// Grid of a plate or tip rack
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridInfo {
    /// Number of columns
    pub num_items_x: usize,
    /// Number of rows
    pub num_items_y: usize,
}

/// What a resource is, together with the state its variant carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceKind {
    /// Plain container without domain state
    Generic,
    /// Root of a deck layout
    Deck,
    /// Microplate whose children are wells
    Plate(GridInfo),
    /// Tip rack whose children are tip spots
    TipRack {
        grid: GridInfo,
        tip: TipDefinition,
    },
    /// A single well holding liquid
    Well(VolumeTracker),
    /// A single tip position
    TipSpot(TipSpotState),
    /// Plate reader with room for exactly one plate
    PlateReader,
}

impl ResourceKind {
    /// Short category name, used in labware definitions and logs
    pub fn category(&self) -> &'static str {
        match self {
            ResourceKind::Generic => "resource",
            ResourceKind::Deck => "deck",
            ResourceKind::Plate(_) => "plate",
            ResourceKind::TipRack { .. } => "tip_rack",
            ResourceKind::Well(_) => "well",
            ResourceKind::TipSpot(_) => "tip_spot",
            ResourceKind::PlateReader => "plate_reader",
        }
    }

    /// Plates and tip racks are labware that gets registered with a backend
    pub fn is_labware(&self) -> bool {
        matches!(self, ResourceKind::Plate(_) | ResourceKind::TipRack { .. })
    }

    /// Grid of item-holding labware
    pub fn grid(&self) -> Option<GridInfo> {
        match self {
            ResourceKind::Plate(grid) | ResourceKind::TipRack { grid, .. } => Some(*grid),
            _ => None,
        }
    }
}

/// An owned resource subtree that is not (or no longer) part of a tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Name, unique within any tree the resource joins
    pub name: String,
    pub size_x: f64,
    pub size_y: f64,
    pub size_z: f64,
    /// Offset relative to the parent's origin
    #[serde(default)]
    pub location: Coordinate,
    pub kind: ResourceKind,
    /// Catalog model name (e.g. "opentrons_96_filtertiprack_20ul")
    #[serde(default)]
    pub model: Option<String>,
    /// Maximum number of direct children, unlimited when `None`
    #[serde(default)]
    pub max_children: Option<usize>,
    #[serde(default)]
    pub children: Vec<Resource>,
}

impl Resource {
    /// Create a childless resource
    pub fn new(name: impl Into<String>, size_x: f64, size_y: f64, size_z: f64, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            size_x,
            size_y,
            size_z,
            location: Coordinate::zero(),
            kind,
            model: None,
            max_children: None,
            children: Vec::new(),
        }
    }

    /// A well of the given geometry and capacity, initially empty
    pub fn well(name: impl Into<String>, size_x: f64, size_y: f64, size_z: f64, max_volume: f64) -> Self {
        Self::new(name, size_x, size_y, size_z, ResourceKind::Well(VolumeTracker::new(max_volume)))
    }

    /// A tip spot holding a tip
    pub fn tip_spot(name: impl Into<String>, size_x: f64, size_y: f64, tip: TipDefinition) -> Self {
        Self::new(name, size_x, size_y, 0.0, ResourceKind::TipSpot(TipSpotState::new(tip)))
    }

    /// A plate reader that accepts a single plate
    pub fn plate_reader(name: impl Into<String>) -> Self {
        let mut reader = Self::new(name, 0.0, 0.0, 0.0, ResourceKind::PlateReader);
        reader.max_children = Some(1);
        reader
    }

    pub fn with_location(mut self, location: Coordinate) -> Self {
        self.location = location;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_children(mut self, max_children: usize) -> Self {
        self.max_children = Some(max_children);
        self
    }

    /// Append a child, keeping its own location
    pub fn push_child(&mut self, child: Resource) {
        self.children.push(child);
    }

    /// Names of this resource and all descendants, depth first
    pub fn names(&self) -> Vec<&str> {
        let mut names = vec![self.name.as_str()];
        for child in &self.children {
            names.extend(child.names());
        }
        names
    }

    /// Find a direct child by name
    pub fn child(&self, name: &str) -> Option<&Resource> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Current volume if this is a well
    pub fn volume(&self) -> Option<f64> {
        match &self.kind {
            ResourceKind::Well(tracker) => Some(tracker.volume()),
            _ => None,
        }
    }

    /// Mutable volume tracker if this is a well
    pub fn volume_tracker_mut(&mut self) -> Option<&mut VolumeTracker> {
        match &mut self.kind {
            ResourceKind::Well(tracker) => Some(tracker),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_arithmetic() {
        let a = Coordinate::new(1.0, 2.0, 3.0);
        let b = Coordinate::new(0.5, 0.5, 0.5);
        assert_eq!(a + b, Coordinate::new(1.5, 2.5, 3.5));
        assert_eq!(a - b, Coordinate::new(0.5, 1.5, 2.5));
        assert_eq!(Coordinate::zero() + a, a);
    }

    #[test]
    fn test_names_depth_first() {
        let mut parent = Resource::new("parent", 1.0, 1.0, 1.0, ResourceKind::Generic);
        let mut child = Resource::new("child", 1.0, 1.0, 1.0, ResourceKind::Generic);
        child.push_child(Resource::well("grandchild", 1.0, 1.0, 1.0, 10.0));
        parent.push_child(child);

        assert_eq!(parent.names(), vec!["parent", "child", "grandchild"]);
        assert!(parent.child("child").is_some());
        assert!(parent.child("grandchild").is_none());
    }

    #[test]
    fn test_plate_reader_has_single_slot() {
        let reader = Resource::plate_reader("plate_reader");
        assert_eq!(reader.max_children, Some(1));
        assert_eq!(reader.kind.category(), "plate_reader");
    }
}
