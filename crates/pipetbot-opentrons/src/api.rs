//! Capability interface of the Opentrons HTTP API

use anyhow::Result;
use async_trait::async_trait;
use pipetbot_core::Coordinate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A pipette reported by the robot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountedPipette {
    #[serde(rename = "pipetteId")]
    pub pipette_id: String,
    /// Model name, e.g. "p20_single_gen2"
    pub name: String,
}

/// Request to load a defined labware into a deck slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabwareLoad {
    pub load_name: String,
    pub namespace: String,
    pub slot: u8,
    pub version: u32,
    pub labware_id: String,
    pub display_name: String,
}

/// Calls the OT-2 robot server accepts within a run
#[async_trait]
pub trait OtApi: Send + Sync {
    /// Client for the robot at `host:port`; no request is made yet
    fn connect(host: &str, port: u16) -> Self
    where
        Self: Sized;

    /// Start a run and return its id
    async fn create_run(&mut self) -> Result<String>;

    /// Load the pipettes on the (left, right) mounts into the run
    async fn add_mounted_pipettes(&mut self) -> Result<(Option<MountedPipette>, Option<MountedPipette>)>;

    /// Upload a labware definition; the response carries its definition URI
    async fn define_labware(&mut self, definition: &Value) -> Result<Value>;

    /// Load a defined labware and return the id the robot assigned it
    async fn add_labware(&mut self, load: &LabwareLoad) -> Result<String>;

    async fn pick_up_tip(&mut self, labware_id: &str, well_name: &str, pipette_id: &str, offset: Coordinate)
        -> Result<()>;

    async fn drop_tip(&mut self, labware_id: &str, well_name: &str, pipette_id: &str, offset: Coordinate)
        -> Result<()>;

    async fn aspirate(
        &mut self,
        labware_id: &str,
        well_name: &str,
        pipette_id: &str,
        volume: f64,
        flow_rate: f64,
        offset: Coordinate,
    ) -> Result<()>;

    async fn dispense(
        &mut self,
        labware_id: &str,
        well_name: &str,
        pipette_id: &str,
        volume: f64,
        flow_rate: f64,
        offset: Coordinate,
    ) -> Result<()>;
}
