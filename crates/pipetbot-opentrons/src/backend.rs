//! Liquid handler backend for the Opentrons OT-2
//!
//! The left mount is channel 0 and the right mount channel 1. The OT-2 has
//! no 96-channel head, so the 96 commands keep their unsupported defaults.

use async_trait::async_trait;
use pipetbot_core::{Coordinate, LabwareDefinition};
use pipetbot_handler::{BackendDescription, BackendError, DeserializeBackend, LiquidHandlerBackend, Mount, Pipette};
use serde_json::Value;
use tracing::{debug, info};

use crate::api::{LabwareLoad, MountedPipette, OtApi};
use crate::labware::OtLabwareDefinition;
use crate::pipettes::default_flow_rates;

const TYPE_NAME: &str = "OpentronsBackend";

pub struct OpentronsBackend<A: OtApi> {
    host: String,
    port: u16,
    api: A,
    run_id: Option<String>,
    left: Option<MountedPipette>,
    right: Option<MountedPipette>,
}

impl<A: OtApi> std::fmt::Debug for OpentronsBackend<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpentronsBackend")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("run_id", &self.run_id)
            .field("left", &self.left)
            .field("right", &self.right)
            .finish()
    }
}

impl<A: OtApi> OpentronsBackend<A> {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let api = A::connect(&host, port);
        Self {
            host,
            port,
            api,
            run_id: None,
            left: None,
            right: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    /// Id of the run created during setup
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    fn ensure_setup(&self) -> Result<(), BackendError> {
        if self.run_id.is_none() {
            return Err(BackendError::NotSetup);
        }
        Ok(())
    }

    fn to_pipette(mounted: &MountedPipette, mount: Mount) -> Pipette {
        let flow_rates = default_flow_rates(&mounted.name);
        Pipette {
            id: mounted.pipette_id.clone(),
            name: mounted.name.clone(),
            mount,
            default_aspirate_flow_rate: flow_rates.map(|r| r.aspirate),
            default_dispense_flow_rate: flow_rates.map(|r| r.dispense),
        }
    }
}

/// Split a definition URI `namespace/load_name/version`
fn parse_definition_uri(uri: &str) -> Result<(String, String, u32), BackendError> {
    let parts: Vec<&str> = uri.split('/').collect();
    let [namespace, load_name, version] = parts.as_slice() else {
        return Err(BackendError::Protocol(format!("Malformed definition URI: {}", uri)));
    };
    let version = version
        .parse()
        .map_err(|_| BackendError::Protocol(format!("Invalid labware version in {}", uri)))?;
    Ok((namespace.to_string(), load_name.to_string(), version))
}

#[async_trait]
impl<A: OtApi> LiquidHandlerBackend for OpentronsBackend<A> {
    async fn setup(&mut self) -> Result<(), BackendError> {
        let run_id = self.api.create_run().await?;
        let (left, right) = self.api.add_mounted_pipettes().await?;
        info!(
            host = %self.host,
            port = self.port,
            run = %run_id,
            left = ?left.as_ref().map(|p| &p.name),
            right = ?right.as_ref().map(|p| &p.name),
            "Opentrons run created"
        );
        self.run_id = Some(run_id);
        self.left = left;
        self.right = right;
        Ok(())
    }

    fn pipettes(&self) -> Vec<Option<Pipette>> {
        vec![
            self.left.as_ref().map(|p| Self::to_pipette(p, Mount::Left)),
            self.right.as_ref().map(|p| Self::to_pipette(p, Mount::Right)),
        ]
    }

    async fn assigned_resource_callback(
        &mut self,
        labware: &LabwareDefinition,
        slot: u8,
    ) -> Result<String, BackendError> {
        self.ensure_setup()?;

        let definition = serde_json::to_value(OtLabwareDefinition::from(labware))
            .map_err(|e| BackendError::Protocol(format!("Cannot encode labware definition: {}", e)))?;
        let response = self.api.define_labware(&definition).await?;
        let uri = response
            .pointer("/data/definitionUri")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::Protocol("Labware definition response has no definitionUri".to_string()))?;
        let (namespace, load_name, version) = parse_definition_uri(uri)?;

        let load = LabwareLoad {
            load_name,
            namespace,
            slot,
            version,
            labware_id: labware.display_name.clone(),
            display_name: labware.display_name.clone(),
        };
        let labware_id = self.api.add_labware(&load).await?;
        info!(labware = %labware_id, uri = %uri, slot = slot, "Labware loaded on OT-2");
        Ok(labware_id)
    }

    async fn pick_up_tip(
        &mut self,
        labware_id: &str,
        well_name: &str,
        pipette_id: &str,
        offset: Coordinate,
    ) -> Result<(), BackendError> {
        self.ensure_setup()?;
        debug!(labware = %labware_id, well = %well_name, pipette = %pipette_id, "pick_up_tip");
        self.api
            .pick_up_tip(labware_id, well_name, pipette_id, offset)
            .await?;
        Ok(())
    }

    async fn drop_tip(
        &mut self,
        labware_id: &str,
        well_name: &str,
        pipette_id: &str,
        offset: Coordinate,
    ) -> Result<(), BackendError> {
        self.ensure_setup()?;
        debug!(labware = %labware_id, well = %well_name, pipette = %pipette_id, "drop_tip");
        self.api
            .drop_tip(labware_id, well_name, pipette_id, offset)
            .await?;
        Ok(())
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
        self.ensure_setup()?;
        debug!(labware = %labware_id, well = %well_name, volume = volume, flow_rate = flow_rate, "aspirate");
        self.api
            .aspirate(labware_id, well_name, pipette_id, volume, flow_rate, offset)
            .await?;
        Ok(())
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
        self.ensure_setup()?;
        debug!(labware = %labware_id, well = %well_name, volume = volume, flow_rate = flow_rate, "dispense");
        self.api
            .dispense(labware_id, well_name, pipette_id, volume, flow_rate, offset)
            .await?;
        Ok(())
    }

    fn serialize(&self) -> BackendDescription {
        BackendDescription::new(TYPE_NAME)
            .with("host", self.host.clone())
            .with("port", u64::from(self.port))
    }
}

impl<A: OtApi + 'static> DeserializeBackend for OpentronsBackend<A> {
    const TYPE_NAME: &'static str = TYPE_NAME;

    fn deserialize(description: &BackendDescription) -> Result<Self, BackendError> {
        description.expect_type(Self::TYPE_NAME)?;
        let host = description.get_str("host")?;
        let port = description.get_u16("port")?;
        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_definition_uri() {
        assert_eq!(
            parse_definition_uri("pipetbot/tip_rack/1").unwrap(),
            ("pipetbot".to_string(), "tip_rack".to_string(), 1)
        );
        assert!(matches!(
            parse_definition_uri("pipetbot/tip_rack"),
            Err(BackendError::Protocol(_))
        ));
        assert!(matches!(
            parse_definition_uri("pipetbot/tip_rack/v1"),
            Err(BackendError::Protocol(_))
        ));
    }
}
