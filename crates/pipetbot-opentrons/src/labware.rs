//! Opentrons labware definitions (schema version 2)
//!
//! Wells are keyed by resource name, so the well names sent with commands
//! match the ones the robot knows.

use std::collections::BTreeMap;

use pipetbot_core::LabwareDefinition;
use serde::{Deserialize, Serialize};

/// Namespace custom definitions are uploaded under
pub const NAMESPACE: &str = "pipetbot";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtLabwareDefinition {
    pub schema_version: u32,
    pub version: u32,
    pub namespace: String,
    pub metadata: OtMetadata,
    pub brand: OtBrand,
    pub parameters: OtParameters,
    pub ordering: Vec<Vec<String>>,
    pub corner_offset_from_slot: OtVector,
    pub dimensions: OtDimensions,
    pub wells: BTreeMap<String, OtWell>,
    pub groups: Vec<OtGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtMetadata {
    pub display_name: String,
    pub display_category: String,
    pub display_volume_units: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtBrand {
    pub brand: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtParameters {
    pub format: String,
    pub quirks: Vec<String>,
    pub is_tiprack: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tip_length: Option<f64>,
    pub is_magnetic_module_compatible: bool,
    pub load_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OtVector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtDimensions {
    pub x_dimension: f64,
    pub y_dimension: f64,
    pub z_dimension: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtWell {
    pub depth: f64,
    pub total_liquid_volume: f64,
    pub shape: String,
    pub x_dimension: f64,
    pub y_dimension: f64,
    /// Well center relative to the labware origin
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtGroup {
    pub wells: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

impl From<&LabwareDefinition> for OtLabwareDefinition {
    fn from(labware: &LabwareDefinition) -> Self {
        let wells: BTreeMap<String, OtWell> = labware
            .wells
            .iter()
            .map(|well| {
                let ot_well = OtWell {
                    depth: well.depth,
                    total_liquid_volume: well.total_liquid_volume,
                    shape: "rectangular".to_string(),
                    x_dimension: well.size_x,
                    y_dimension: well.size_y,
                    x: well.location.x + well.size_x / 2.0,
                    y: well.location.y + well.size_y / 2.0,
                    z: well.location.z,
                };
                (well.name.clone(), ot_well)
            })
            .collect();

        let display_category = if labware.is_tip_rack { "tipRack" } else { "wellPlate" };

        Self {
            schema_version: 2,
            version: 1,
            namespace: NAMESPACE.to_string(),
            metadata: OtMetadata {
                display_name: labware.display_name.clone(),
                display_category: display_category.to_string(),
                display_volume_units: "µL".to_string(),
            },
            brand: OtBrand {
                brand: "unknown".to_string(),
            },
            parameters: OtParameters {
                format: "irregular".to_string(),
                quirks: Vec::new(),
                is_tiprack: labware.is_tip_rack,
                tip_length: labware.tip.map(|tip| tip.total_tip_length),
                is_magnetic_module_compatible: false,
                load_name: labware.load_name.clone(),
            },
            ordering: labware.ordering.clone(),
            corner_offset_from_slot: OtVector { x: 0.0, y: 0.0, z: 0.0 },
            dimensions: OtDimensions {
                x_dimension: labware.dimensions.x,
                y_dimension: labware.dimensions.y,
                z_dimension: labware.dimensions.z,
            },
            groups: vec![OtGroup {
                wells: wells.keys().cloned().collect(),
                metadata: BTreeMap::new(),
            }],
            wells,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipetbot_core::catalog::{opentrons_96_filtertiprack_20ul, usascientific_96_wellplate_2point4ml_deep};
    use pipetbot_core::ResourceTree;

    fn definition(resource: pipetbot_core::Resource) -> LabwareDefinition {
        let tree = ResourceTree::new(resource).unwrap();
        LabwareDefinition::from_tree(&tree, tree.root()).unwrap()
    }

    #[test]
    fn test_tip_rack_definition() {
        let ot = OtLabwareDefinition::from(&definition(opentrons_96_filtertiprack_20ul("tip_rack")));

        assert_eq!(ot.metadata.display_name, "tip_rack");
        assert_eq!(ot.parameters.load_name, "opentrons_96_filtertiprack_20ul");
        assert!(ot.parameters.is_tiprack);
        assert_eq!(ot.parameters.tip_length, Some(39.2));
        assert_eq!(ot.wells.len(), 96);
        assert_eq!(ot.ordering.len(), 12);
        assert_eq!(ot.ordering[0][0], "tip_rack_A1");
        assert_eq!(ot.wells["tip_rack_A1"].total_liquid_volume, 20.0);
    }

    #[test]
    fn test_plate_json_shape() {
        let ot = OtLabwareDefinition::from(&definition(usascientific_96_wellplate_2point4ml_deep("plate")));
        let json = serde_json::to_value(&ot).unwrap();

        assert_eq!(json["schemaVersion"], 2);
        assert_eq!(json["namespace"], NAMESPACE);
        assert_eq!(json["metadata"]["displayCategory"], "wellPlate");
        assert_eq!(json["parameters"]["isTiprack"], false);
        assert!(json["parameters"].get("tipLength").is_none());
        assert_eq!(json["wells"]["plate_H12"]["totalLiquidVolume"], 2400.0);
        assert_eq!(json["groups"][0]["wells"].as_array().unwrap().len(), 96);
    }

    #[test]
    fn test_well_centers() {
        let ot = OtLabwareDefinition::from(&definition(usascientific_96_wellplate_2point4ml_deep("plate")));
        let a1 = &ot.wells["plate_A1"];
        let h1 = &ot.wells["plate_H1"];

        assert!((a1.x - 14.38).abs() < 1e-9);
        assert!((a1.y - 74.24).abs() < 1e-9);
        assert!((h1.y - 11.24).abs() < 1e-9);
        assert_eq!(a1.z, 2.8);
    }
}
