//! Deck with numbered slots that hold one labware each

use tracing::{debug, info};

use crate::resource::{Coordinate, Resource, ResourceKind};
use crate::tree::{ResourceError, ResourceId, ResourceTree};

/// OT-2 slot origins, slot 1 first
const OT2_SLOT_LOCATIONS: [Coordinate; 12] = [
    Coordinate::new(0.0, 0.0, 0.0),
    Coordinate::new(132.5, 0.0, 0.0),
    Coordinate::new(265.0, 0.0, 0.0),
    Coordinate::new(0.0, 90.5, 0.0),
    Coordinate::new(132.5, 90.5, 0.0),
    Coordinate::new(265.0, 90.5, 0.0),
    Coordinate::new(0.0, 181.0, 0.0),
    Coordinate::new(132.5, 181.0, 0.0),
    Coordinate::new(265.0, 181.0, 0.0),
    Coordinate::new(0.0, 271.5, 0.0),
    Coordinate::new(132.5, 271.5, 0.0),
    Coordinate::new(265.0, 271.5, 0.0),
];

/// Root of a layout: a resource tree plus a slot table
pub struct Deck {
    tree: ResourceTree,
    slot_locations: Vec<Coordinate>,
    slots: Vec<Option<ResourceId>>,
}

impl std::fmt::Debug for Deck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deck")
            .field("name", &self.tree.name_of(self.tree.root()))
            .field("slots", &self.slots)
            .finish()
    }
}

impl Deck {
    /// Create an empty deck with the given slot origins (slot 1 first)
    pub fn new(name: &str, size: Coordinate, slot_locations: Vec<Coordinate>) -> Self {
        let root = Resource::new(name, size.x, size.y, size.z, ResourceKind::Deck);
        Self {
            tree: ResourceTree::leaf(root),
            slots: vec![None; slot_locations.len()],
            slot_locations,
        }
    }

    /// The 12-slot Opentrons OT-2 deck
    pub fn ot2() -> Self {
        Self::new(
            "deck",
            Coordinate::new(624.3, 565.2, 900.0),
            OT2_SLOT_LOCATIONS.to_vec(),
        )
    }

    pub fn tree(&self) -> &ResourceTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut ResourceTree {
        &mut self.tree
    }

    pub fn root(&self) -> ResourceId {
        self.tree.root()
    }

    pub fn num_slots(&self) -> u8 {
        self.slots.len() as u8
    }

    /// Origin of a slot in deck coordinates
    pub fn slot_location(&self, slot: u8) -> Result<Coordinate, ResourceError> {
        let index = self.slot_index(slot)?;
        Ok(self.slot_locations[index])
    }

    /// Place labware into a free slot
    pub fn assign_child_at_slot(&mut self, resource: Resource, slot: u8) -> Result<ResourceId, ResourceError> {
        let index = self.slot_index(slot)?;
        if let Some(occupant) = self.labware_at(slot) {
            return Err(ResourceError::SlotOccupied {
                slot,
                occupant: self.tree.name_of(occupant),
            });
        }

        let name = resource.name.clone();
        let root = self.tree.root();
        let id = self
            .tree
            .assign_child_resource(root, resource, self.slot_locations[index])?;
        self.slots[index] = Some(id);
        info!(resource = %name, slot = slot, "Assigned resource to deck slot");
        Ok(id)
    }

    /// Remove the labware in a slot, returning it detached
    pub fn unassign_slot(&mut self, slot: u8) -> Result<Resource, ResourceError> {
        let index = self.slot_index(slot)?;
        let id = self.labware_at(slot).ok_or(ResourceError::SlotEmpty(slot))?;
        let resource = self.tree.unassign_child_resource(id)?;
        self.slots[index] = None;
        debug!(resource = %resource.name, slot = slot, "Cleared deck slot");
        Ok(resource)
    }

    /// Resource currently in a slot
    pub fn labware_at(&self, slot: u8) -> Option<ResourceId> {
        let index = self.slot_index(slot).ok()?;
        self.slots[index].filter(|id| self.tree.contains(*id))
    }

    /// Slot holding `id`, if it sits directly in one
    pub fn slot_of(&self, id: ResourceId) -> Option<u8> {
        self.slots
            .iter()
            .position(|s| *s == Some(id))
            .map(|i| (i + 1) as u8)
            .filter(|_| self.tree.contains(id))
    }

    /// All occupied slots in slot order
    pub fn labware(&self) -> Vec<(u8, ResourceId)> {
        (1..=self.num_slots())
            .filter_map(|slot| self.labware_at(slot).map(|id| (slot, id)))
            .collect()
    }

    /// Slot of the labware containing `id` (a well, tip spot, or the labware itself)
    pub fn slot_containing(&self, id: ResourceId) -> Option<u8> {
        std::iter::once(id)
            .chain(self.tree.ancestors(id))
            .find_map(|r| self.slot_of(r))
    }

    pub fn get_resource(&self, name: &str) -> Option<ResourceId> {
        self.tree.find(name)
    }

    /// Item of named labware, e.g. `get_item("plate", "A1")`
    pub fn get_item(&self, labware: &str, identifier: &str) -> Result<ResourceId, ResourceError> {
        let id = self.tree.find_required(labware)?;
        self.tree.item(id, identifier)
    }

    /// Items of named labware, e.g. `get_items("plate", "A1:H1")`
    pub fn get_items(&self, labware: &str, range: &str) -> Result<Vec<ResourceId>, ResourceError> {
        let id = self.tree.find_required(labware)?;
        self.tree.items(id, range)
    }

    /// Resolve a target string: `"plate"`, `"plate:A1"` or `"plate:A1:H1"`
    pub fn resolve(&self, target: &str) -> Result<Vec<ResourceId>, ResourceError> {
        match target.split_once(':') {
            Some((labware, range)) => self.get_items(labware.trim(), range.trim()),
            None => Ok(vec![self.tree.find_required(target.trim())?]),
        }
    }

    fn slot_index(&self, slot: u8) -> Result<usize, ResourceError> {
        if slot == 0 || slot as usize > self.slots.len() {
            return Err(ResourceError::InvalidSlot {
                slot,
                max: self.num_slots(),
            });
        }
        Ok(slot as usize - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{opentrons_96_filtertiprack_20ul, usascientific_96_wellplate_2point4ml_deep};

    #[test]
    fn test_assign_at_slot() {
        let mut deck = Deck::ot2();
        let rack = deck
            .assign_child_at_slot(opentrons_96_filtertiprack_20ul("tip_rack"), 1)
            .unwrap();
        let plate = deck
            .assign_child_at_slot(usascientific_96_wellplate_2point4ml_deep("plate"), 11)
            .unwrap();

        assert_eq!(deck.labware_at(1), Some(rack));
        assert_eq!(deck.slot_of(plate), Some(11));
        assert_eq!(deck.labware(), vec![(1, rack), (11, plate)]);
        assert_eq!(
            deck.tree().absolute_location(plate).unwrap(),
            Coordinate::new(132.5, 271.5, 0.0)
        );
    }

    #[test]
    fn test_slot_holds_one_labware() {
        let mut deck = Deck::ot2();
        deck.assign_child_at_slot(opentrons_96_filtertiprack_20ul("tip_rack"), 1)
            .unwrap();

        let err = deck
            .assign_child_at_slot(opentrons_96_filtertiprack_20ul("tip_rack_2"), 1)
            .unwrap_err();
        assert_eq!(
            err,
            ResourceError::SlotOccupied {
                slot: 1,
                occupant: "tip_rack".to_string()
            }
        );

        deck.unassign_slot(1).unwrap();
        assert!(deck
            .assign_child_at_slot(opentrons_96_filtertiprack_20ul("tip_rack_2"), 1)
            .is_ok());
    }

    #[test]
    fn test_invalid_slot() {
        let mut deck = Deck::ot2();
        for slot in [0, 13] {
            assert!(matches!(
                deck.assign_child_at_slot(opentrons_96_filtertiprack_20ul("tip_rack"), slot),
                Err(ResourceError::InvalidSlot { max: 12, .. })
            ));
        }
        assert_eq!(deck.unassign_slot(2).unwrap_err(), ResourceError::SlotEmpty(2));
    }

    #[test]
    fn test_resolve_targets() {
        let mut deck = Deck::ot2();
        let plate = deck
            .assign_child_at_slot(usascientific_96_wellplate_2point4ml_deep("plate"), 2)
            .unwrap();

        assert_eq!(deck.resolve("plate").unwrap(), vec![plate]);
        let a1 = deck.resolve("plate:A1").unwrap();
        assert_eq!(deck.tree().name_of(a1[0]), "plate_A1");
        assert_eq!(deck.resolve("plate:A1:H1").unwrap().len(), 8);
        assert_eq!(deck.slot_containing(a1[0]), Some(2));
        assert!(matches!(deck.resolve("missing:A1"), Err(ResourceError::NotFound(_))));
    }
}
