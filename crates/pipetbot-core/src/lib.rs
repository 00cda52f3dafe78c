//! pipetbot Core - Resource tree, labware, and deck model
//!
//! This crate provides the spatial model the liquid handler works against:
//! - An arena-backed resource tree with parent/child assignment rules
//! - Labware variants (plates, wells, tip racks, tip spots, plate readers)
//! - Liquid volume and tip presence bookkeeping
//! - A slotted deck that notifies listeners when labware is placed

pub mod address;
pub mod catalog;
pub mod deck;
pub mod labware;
pub mod resource;
pub mod tip;
pub mod tree;
pub mod well;

pub use address::AddressError;
pub use deck::Deck;
pub use labware::{create_plate, create_tip_rack, GridLayout, LabwareDefinition, WellDefinition};
pub use resource::{Coordinate, GridInfo, Resource, ResourceKind};
pub use tip::{TipDefinition, TipError, TipSpotState};
pub use tree::{Node, ResourceError, ResourceId, ResourceTree};
pub use well::{VolumeError, VolumeTracker};
