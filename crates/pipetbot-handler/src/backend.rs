//! Backend adapter interface
//!
//! A backend turns fully resolved commands (labware id, well name, pipette id,
//! volume, flow rate, offset) into hardware actions. The liquid handler does
//! all resource resolution and state checking before calling into it, and
//! propagates backend errors unchanged.

use async_trait::async_trait;
use pipetbot_core::{Coordinate, LabwareDefinition};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::description::BackendDescription;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend is not set up")]
    NotSetup,
    #[error("{0} is not implemented by this backend")]
    NotImplemented(&'static str),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Invalid backend description: {0}")]
    InvalidDescription(String),
    #[error("Unknown backend type: {0}")]
    UnknownType(String),
    #[error("Transport error: {0}")]
    TransportError(#[from] anyhow::Error),
}

/// Which side of the gantry a pipette is mounted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mount {
    Left,
    Right,
    /// Channel of a multi-channel head without a named mount
    Channel(usize),
}

/// A pipette as reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipette {
    /// Backend-facing pipette identifier
    pub id: String,
    /// Model name, e.g. "p20_single_gen2"
    pub name: String,
    pub mount: Mount,
    /// Flow rate used when a command gives none, in uL/s
    pub default_aspirate_flow_rate: Option<f64>,
    pub default_dispense_flow_rate: Option<f64>,
}

#[async_trait]
pub trait LiquidHandlerBackend: Send + Sync {
    /// Establish the control session; called once before any channel command
    async fn setup(&mut self) -> Result<(), BackendError>;

    /// Pipettes per channel, `None` for an empty mount; valid after setup
    fn pipettes(&self) -> Vec<Option<Pipette>>;

    /// The 96-channel head, if the hardware has one
    fn head96(&self) -> Option<Pipette> {
        None
    }

    /// Register labware placed at a deck slot and return its stable id
    async fn assigned_resource_callback(
        &mut self,
        labware: &LabwareDefinition,
        slot: u8,
    ) -> Result<String, BackendError>;

    /// Forget labware that left the deck
    async fn unassigned_resource_callback(&mut self, _labware_id: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn pick_up_tip(
        &mut self,
        labware_id: &str,
        well_name: &str,
        pipette_id: &str,
        offset: Coordinate,
    ) -> Result<(), BackendError>;

    async fn drop_tip(
        &mut self,
        labware_id: &str,
        well_name: &str,
        pipette_id: &str,
        offset: Coordinate,
    ) -> Result<(), BackendError>;

    async fn aspirate(
        &mut self,
        labware_id: &str,
        well_name: &str,
        pipette_id: &str,
        volume: f64,
        flow_rate: f64,
        offset: Coordinate,
    ) -> Result<(), BackendError>;

    async fn dispense(
        &mut self,
        labware_id: &str,
        well_name: &str,
        pipette_id: &str,
        volume: f64,
        flow_rate: f64,
        offset: Coordinate,
    ) -> Result<(), BackendError>;

    async fn pick_up_tips96(&mut self, _labware_id: &str, _offset: Coordinate) -> Result<(), BackendError> {
        Err(BackendError::NotImplemented("pick_up_tips96"))
    }

    async fn drop_tips96(&mut self, _labware_id: &str, _offset: Coordinate) -> Result<(), BackendError> {
        Err(BackendError::NotImplemented("drop_tips96"))
    }

    async fn aspirate96(
        &mut self,
        _labware_id: &str,
        _volume: f64,
        _flow_rate: f64,
        _offset: Coordinate,
    ) -> Result<(), BackendError> {
        Err(BackendError::NotImplemented("aspirate96"))
    }

    async fn dispense96(
        &mut self,
        _labware_id: &str,
        _volume: f64,
        _flow_rate: f64,
        _offset: Coordinate,
    ) -> Result<(), BackendError> {
        Err(BackendError::NotImplemented("dispense96"))
    }

    /// Plain description of the configuration, see [`BackendDescription`]
    fn serialize(&self) -> BackendDescription;
}

#[async_trait]
impl LiquidHandlerBackend for Box<dyn LiquidHandlerBackend> {
    async fn setup(&mut self) -> Result<(), BackendError> {
        (**self).setup().await
    }

    fn pipettes(&self) -> Vec<Option<Pipette>> {
        (**self).pipettes()
    }

    fn head96(&self) -> Option<Pipette> {
        (**self).head96()
    }

    async fn assigned_resource_callback(
        &mut self,
        labware: &LabwareDefinition,
        slot: u8,
    ) -> Result<String, BackendError> {
        (**self).assigned_resource_callback(labware, slot).await
    }

    async fn unassigned_resource_callback(&mut self, labware_id: &str) -> Result<(), BackendError> {
        (**self).unassigned_resource_callback(labware_id).await
    }

    async fn pick_up_tip(
        &mut self,
        labware_id: &str,
        well_name: &str,
        pipette_id: &str,
        offset: Coordinate,
    ) -> Result<(), BackendError> {
        (**self).pick_up_tip(labware_id, well_name, pipette_id, offset).await
    }

    async fn drop_tip(
        &mut self,
        labware_id: &str,
        well_name: &str,
        pipette_id: &str,
        offset: Coordinate,
    ) -> Result<(), BackendError> {
        (**self).drop_tip(labware_id, well_name, pipette_id, offset).await
    }

    async fn aspirate(
        &mut self,
        labware_id: &str,
        well_name: &str,
        pipette_id: &str,
        volume: f64,
        flow_rate: f64,
        offset: Coordinate,
    ) -> Result<(), BackendError> {
        (**self)
            .aspirate(labware_id, well_name, pipette_id, volume, flow_rate, offset)
            .await
    }

    async fn dispense(
        &mut self,
        labware_id: &str,
        well_name: &str,
        pipette_id: &str,
        volume: f64,
        flow_rate: f64,
        offset: Coordinate,
    ) -> Result<(), BackendError> {
        (**self)
            .dispense(labware_id, well_name, pipette_id, volume, flow_rate, offset)
            .await
    }

    async fn pick_up_tips96(&mut self, labware_id: &str, offset: Coordinate) -> Result<(), BackendError> {
        (**self).pick_up_tips96(labware_id, offset).await
    }

    async fn drop_tips96(&mut self, labware_id: &str, offset: Coordinate) -> Result<(), BackendError> {
        (**self).drop_tips96(labware_id, offset).await
    }

    async fn aspirate96(
        &mut self,
        labware_id: &str,
        volume: f64,
        flow_rate: f64,
        offset: Coordinate,
    ) -> Result<(), BackendError> {
        (**self).aspirate96(labware_id, volume, flow_rate, offset).await
    }

    async fn dispense96(
        &mut self,
        labware_id: &str,
        volume: f64,
        flow_rate: f64,
        offset: Coordinate,
    ) -> Result<(), BackendError> {
        (**self).dispense96(labware_id, volume, flow_rate, offset).await
    }

    fn serialize(&self) -> BackendDescription {
        (**self).serialize()
    }
}
