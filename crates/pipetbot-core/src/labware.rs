//! Grid labware construction and backend-facing labware definitions

use serde::{Deserialize, Serialize};

use crate::address;
use crate::resource::{Coordinate, GridInfo, Resource, ResourceKind};
use crate::tip::TipDefinition;
use crate::tree::{ResourceError, ResourceId, ResourceTree};

/// Placement of items on a rectangular labware grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridLayout {
    /// Number of columns
    pub num_items_x: usize,
    /// Number of rows
    pub num_items_y: usize,
    /// Offset of the corner of item A1's column from the labware's left edge
    pub dx: f64,
    /// Offset of the corner of the bottom row from the labware's front edge
    pub dy: f64,
    /// Height of the item bottoms above the labware origin
    pub dz: f64,
    /// Column pitch
    pub item_dx: f64,
    /// Row pitch
    pub item_dy: f64,
    pub item_size_x: f64,
    pub item_size_y: f64,
}

impl GridLayout {
    /// Location of the item at zero-based `(row, column)`; row A is at the back
    pub fn item_location(&self, row: usize, column: usize) -> Coordinate {
        Coordinate::new(
            self.dx + column as f64 * self.item_dx,
            self.dy + (self.num_items_y - 1 - row) as f64 * self.item_dy,
            self.dz,
        )
    }

    pub fn grid(&self) -> GridInfo {
        GridInfo {
            num_items_x: self.num_items_x,
            num_items_y: self.num_items_y,
        }
    }

    fn items(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.num_items_x).flat_map(move |column| (0..self.num_items_y).map(move |row| (row, column)))
    }
}

/// Build a plate with one well per grid position, named `<plate>_<A1>`
pub fn create_plate(
    name: &str,
    size: Coordinate,
    layout: GridLayout,
    well_depth: f64,
    well_max_volume: f64,
) -> Resource {
    let mut plate = Resource::new(name, size.x, size.y, size.z, ResourceKind::Plate(layout.grid()));
    for (row, column) in layout.items() {
        let well = Resource::well(
            format!("{}_{}", name, address::format_identifier(row, column)),
            layout.item_size_x,
            layout.item_size_y,
            well_depth,
            well_max_volume,
        )
        .with_location(layout.item_location(row, column));
        plate.push_child(well);
    }
    plate
}

/// Build a full tip rack with one tip spot per grid position
pub fn create_tip_rack(name: &str, size: Coordinate, layout: GridLayout, tip: TipDefinition) -> Resource {
    let mut rack = Resource::new(
        name,
        size.x,
        size.y,
        size.z,
        ResourceKind::TipRack {
            grid: layout.grid(),
            tip,
        },
    );
    for (row, column) in layout.items() {
        let spot = Resource::tip_spot(
            format!("{}_{}", name, address::format_identifier(row, column)),
            layout.item_size_x,
            layout.item_size_y,
            tip,
        )
        .with_location(layout.item_location(row, column));
        rack.push_child(spot);
    }
    rack
}

/// One well (or tip spot) of a labware definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellDefinition {
    /// Resource name, e.g. "plate_A1"
    pub name: String,
    /// Grid identifier, e.g. "A1"
    pub identifier: String,
    /// Location relative to the labware origin
    pub location: Coordinate,
    pub size_x: f64,
    pub size_y: f64,
    pub depth: f64,
    /// Capacity in microliters (tip capacity for tip spots)
    pub total_liquid_volume: f64,
}

/// Everything a backend needs to register a piece of labware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabwareDefinition {
    /// Resource name, used as display name
    pub display_name: String,
    /// Catalog model name, falls back to the resource name
    pub load_name: String,
    pub category: String,
    pub dimensions: Coordinate,
    pub num_rows: usize,
    pub num_columns: usize,
    /// Well names per column, front to back as in `A1..H1`
    pub ordering: Vec<Vec<String>>,
    /// Wells in column-major order
    pub wells: Vec<WellDefinition>,
    pub is_tip_rack: bool,
    #[serde(default)]
    pub tip: Option<TipDefinition>,
}

impl LabwareDefinition {
    /// Describe the plate or tip rack at `id`
    pub fn from_tree(tree: &ResourceTree, id: ResourceId) -> Result<Self, ResourceError> {
        let node = tree.node(id)?;
        let (grid, tip) = match &node.kind {
            ResourceKind::Plate(grid) => (*grid, None),
            ResourceKind::TipRack { grid, tip } => (*grid, Some(*tip)),
            other => {
                return Err(ResourceError::WrongKind {
                    name: node.name().to_string(),
                    expected: "plate or tip_rack",
                    actual: other.category(),
                })
            }
        };

        let mut wells = Vec::with_capacity(node.children().len());
        for (index, child_id) in node.children().iter().enumerate() {
            let child = tree.node(*child_id)?;
            let row = index % grid.num_items_y;
            let column = index / grid.num_items_y;
            let total_liquid_volume = match &child.kind {
                ResourceKind::Well(tracker) => tracker.max_volume(),
                ResourceKind::TipSpot(state) => state.tip.maximal_volume,
                _ => 0.0,
            };
            wells.push(WellDefinition {
                name: child.name().to_string(),
                identifier: address::format_identifier(row, column),
                location: child.location,
                size_x: child.size_x,
                size_y: child.size_y,
                depth: child.size_z,
                total_liquid_volume,
            });
        }

        let ordering = wells
            .chunks(grid.num_items_y.max(1))
            .map(|column| column.iter().map(|w| w.name.clone()).collect())
            .collect();

        Ok(Self {
            display_name: node.name().to_string(),
            load_name: node.model.clone().unwrap_or_else(|| node.name().to_string()),
            category: node.kind.category().to_string(),
            dimensions: Coordinate::new(node.size_x, node.size_y, node.size_z),
            num_rows: grid.num_items_y,
            num_columns: grid.num_items_x,
            ordering,
            wells,
            is_tip_rack: tip.is_some(),
            tip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(columns: usize, rows: usize) -> GridLayout {
        GridLayout {
            num_items_x: columns,
            num_items_y: rows,
            dx: 10.0,
            dy: 5.0,
            dz: 1.0,
            item_dx: 9.0,
            item_dy: 9.0,
            item_size_x: 8.0,
            item_size_y: 8.0,
        }
    }

    #[test]
    fn test_create_plate_names_and_locations() {
        let plate = create_plate("plate", Coordinate::new(127.0, 85.0, 14.0), layout(3, 2), 10.0, 300.0);
        let names: Vec<_> = plate.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["plate_A1", "plate_B1", "plate_A2", "plate_B2", "plate_A3", "plate_B3"]
        );

        // Row A sits at the back (higher y) of the plate
        assert_eq!(plate.children[0].location, Coordinate::new(10.0, 14.0, 1.0));
        assert_eq!(plate.children[1].location, Coordinate::new(10.0, 5.0, 1.0));
        assert_eq!(plate.children[2].location, Coordinate::new(19.0, 14.0, 1.0));
    }

    #[test]
    fn test_labware_definition() {
        let tip = TipDefinition {
            has_filter: false,
            total_tip_length: 50.0,
            maximal_volume: 200.0,
            fitting_depth: 8.0,
        };
        let rack = create_tip_rack("rack", Coordinate::new(127.0, 85.0, 60.0), layout(2, 2), tip)
            .with_model("test_rack_200ul");
        let tree = ResourceTree::new(rack).unwrap();

        let definition = LabwareDefinition::from_tree(&tree, tree.root()).unwrap();
        assert_eq!(definition.load_name, "test_rack_200ul");
        assert_eq!(definition.display_name, "rack");
        assert!(definition.is_tip_rack);
        assert_eq!(definition.ordering, vec![
            vec!["rack_A1".to_string(), "rack_B1".to_string()],
            vec!["rack_A2".to_string(), "rack_B2".to_string()],
        ]);
        assert_eq!(definition.wells[3].identifier, "B2");
        assert_eq!(definition.wells[3].total_liquid_volume, 200.0);
    }

    #[test]
    fn test_definition_requires_labware() {
        let tree = ResourceTree::new(Resource::well("w", 1.0, 1.0, 1.0, 1.0)).unwrap();
        assert!(LabwareDefinition::from_tree(&tree, tree.root()).is_err());
    }
}
