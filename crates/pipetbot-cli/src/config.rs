//! Configuration loading and deck construction

use anyhow::{anyhow, Context, Result};
use pipetbot_core::{catalog, Deck};
use pipetbot_handler::{BackendDescription, LiquidHandlerConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub handler: LiquidHandlerConfig,
    /// Backend description, e.g. `type = "RecordingBackend"`
    #[serde(default = "default_backend")]
    pub backend: BackendDescription,
    #[serde(default)]
    pub labware: Vec<LabwareConfig>,
    /// Initial well contents
    #[serde(default)]
    pub liquid: Vec<LiquidConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handler: LiquidHandlerConfig::default(),
            backend: default_backend(),
            labware: Vec::new(),
            liquid: Vec::new(),
        }
    }
}

fn default_backend() -> BackendDescription {
    BackendDescription::new("RecordingBackend")
        .with("num_channels", 8u64)
        .with("supports_96_head", false)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabwareConfig {
    /// Resource name, also the prefix of its well names
    pub name: String,
    /// Catalog model, e.g. "opentrons_96_filtertiprack_20ul"
    pub kind: String,
    /// Deck slot, 1-based
    pub slot: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidConfig {
    /// Target wells, e.g. "plate:A1" or "plate:A1:H12"
    pub wells: String,
    /// Volume in uL per well
    pub volume: f64,
}

impl Config {
    /// Build the OT-2 deck with the configured labware and liquids
    pub fn build_deck(&self) -> Result<Deck> {
        let mut deck = Deck::ot2();

        for labware in &self.labware {
            let resource = catalog::by_kind(&labware.kind, &labware.name).ok_or_else(|| {
                anyhow!(
                    "Unknown labware kind {} for {} (known: {})",
                    labware.kind,
                    labware.name,
                    catalog::KINDS.join(", ")
                )
            })?;
            deck.assign_child_at_slot(resource, labware.slot)
                .with_context(|| format!("Cannot place {} in slot {}", labware.name, labware.slot))?;
        }

        for liquid in &self.liquid {
            for well in deck.resolve(&liquid.wells)? {
                deck.tree_mut()
                    .well_mut(well)?
                    .set_volume(liquid.volume)
                    .with_context(|| format!("Cannot fill {}", liquid.wells))?;
            }
        }

        info!(
            labware = self.labware.len(),
            liquids = self.liquid.len(),
            "Deck built from configuration"
        );
        Ok(deck)
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save an example configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let config = Config {
        labware: vec![
            LabwareConfig {
                name: "tips".to_string(),
                kind: "opentrons_96_filtertiprack_20ul".to_string(),
                slot: 1,
            },
            LabwareConfig {
                name: "plate".to_string(),
                kind: "usascientific_96_wellplate_2point4ml_deep".to_string(),
                slot: 11,
            },
        ],
        liquid: vec![LiquidConfig {
            wells: "plate:A1:H1".to_string(),
            volume: 500.0,
        }],
        ..Config::default()
    };

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert!(config.handler.volume_tracking);
        assert_eq!(config.backend.backend_type, "RecordingBackend");
        assert!(config.labware.is_empty());
    }

    #[test]
    fn test_default_config_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipetbot.toml");
        save_default_config(&path).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.labware.len(), 2);
        assert_eq!(config.backend.get_u64("num_channels").unwrap(), 8);

        let deck = config.build_deck().unwrap();
        let plate = deck.labware_at(11).unwrap();
        let a1 = deck.get_item("plate", "A1").unwrap();
        assert_eq!(deck.tree().well(a1).unwrap().volume(), 500.0);
        assert_eq!(deck.tree().parent(a1), Some(plate));
        let a2 = deck.get_item("plate", "A2").unwrap();
        assert_eq!(deck.tree().well(a2).unwrap().volume(), 0.0);
    }

    #[test]
    fn test_parse_config() {
        let config: Config = toml::from_str(
            r#"
            [handler]
            tip_tracking = false

            [backend]
            type = "OpentronsBackend"
            host = "ot2.local"
            port = 31950

            [[labware]]
            name = "tips"
            kind = "opentrons_96_filtertiprack_20ul"
            slot = 3
            "#,
        )
        .unwrap();

        assert!(config.handler.volume_tracking);
        assert!(!config.handler.tip_tracking);
        assert_eq!(config.backend.get_str("host").unwrap(), "ot2.local");
        assert_eq!(config.backend.get_u16("port").unwrap(), 31950);
        assert_eq!(config.labware[0].slot, 3);
    }

    #[test]
    fn test_unknown_labware_kind() {
        let config = Config {
            labware: vec![LabwareConfig {
                name: "x".to_string(),
                kind: "mystery_plate".to_string(),
                slot: 1,
            }],
            ..Config::default()
        };
        let err = config.build_deck().unwrap_err();
        assert!(err.to_string().contains("mystery_plate"));
    }

    #[test]
    fn test_overfilled_well_is_rejected() {
        let config = Config {
            labware: vec![LabwareConfig {
                name: "plate".to_string(),
                kind: "usascientific_96_wellplate_2point4ml_deep".to_string(),
                slot: 2,
            }],
            liquid: vec![LiquidConfig {
                wells: "plate:A1".to_string(),
                volume: 5000.0,
            }],
            ..Config::default()
        };
        assert!(config.build_deck().is_err());
    }
}
