//! A small catalog of commonly used labware
//!
//! Only the labware needed to describe typical OT-2 layouts lives here;
//! anything else can be built with [`create_plate`] and [`create_tip_rack`].

use crate::labware::{create_plate, create_tip_rack, GridLayout};
use crate::resource::{Coordinate, Resource};
use crate::tip::TipDefinition;

/// Model names known to [`by_kind`]
pub const KINDS: &[&str] = &[
    "opentrons_96_filtertiprack_20ul",
    "usascientific_96_wellplate_2point4ml_deep",
];

/// Opentrons 96 filter tip rack, 20 uL
pub fn opentrons_96_filtertiprack_20ul(name: &str) -> Resource {
    let tip = TipDefinition {
        has_filter: true,
        total_tip_length: 39.2,
        maximal_volume: 20.0,
        fitting_depth: 8.25,
    };
    let layout = GridLayout {
        num_items_x: 12,
        num_items_y: 8,
        dx: 12.535,
        dy: 9.395,
        dz: 0.0,
        item_dx: 9.0,
        item_dy: 9.0,
        item_size_x: 3.69,
        item_size_y: 3.69,
    };
    create_tip_rack(name, Coordinate::new(127.76, 85.48, 64.69), layout, tip)
        .with_model("opentrons_96_filtertiprack_20ul")
}

/// USA Scientific 96 deep well plate, 2.4 mL
pub fn usascientific_96_wellplate_2point4ml_deep(name: &str) -> Resource {
    let layout = GridLayout {
        num_items_x: 12,
        num_items_y: 8,
        dx: 10.28,
        dy: 7.14,
        dz: 2.8,
        item_dx: 9.0,
        item_dy: 9.0,
        item_size_x: 8.2,
        item_size_y: 8.2,
    };
    create_plate(name, Coordinate::new(127.76, 85.48, 44.1), layout, 41.3, 2400.0)
        .with_model("usascientific_96_wellplate_2point4ml_deep")
}

/// Build catalog labware by model name
pub fn by_kind(kind: &str, name: &str) -> Option<Resource> {
    match kind {
        "opentrons_96_filtertiprack_20ul" => Some(opentrons_96_filtertiprack_20ul(name)),
        "usascientific_96_wellplate_2point4ml_deep" => {
            Some(usascientific_96_wellplate_2point4ml_deep(name))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;

    #[test]
    fn test_catalog_kinds_resolve() {
        for kind in KINDS {
            let resource = by_kind(kind, "lw").unwrap();
            assert_eq!(resource.model.as_deref(), Some(*kind));
            assert_eq!(resource.children.len(), 96);
        }
        assert!(by_kind("unknown", "lw").is_none());
    }

    #[test]
    fn test_tip_rack_items() {
        let rack = opentrons_96_filtertiprack_20ul("tip_rack");
        assert_eq!(rack.children[0].name, "tip_rack_A1");
        assert_eq!(rack.children[95].name, "tip_rack_H12");
        assert!(matches!(rack.children[0].kind, ResourceKind::TipSpot(_)));
    }

    #[test]
    fn test_deep_well_capacity() {
        let plate = usascientific_96_wellplate_2point4ml_deep("plate");
        match &plate.children[0].kind {
            ResourceKind::Well(tracker) => assert_eq!(tracker.max_volume(), 2400.0),
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
