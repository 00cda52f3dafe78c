//! Backend that records and logs every command instead of moving hardware
//!
//! Useful for dry runs of protocols and as a test double for the liquid
//! handler. Failures can be injected to exercise error propagation.

use async_trait::async_trait;
use pipetbot_core::{Coordinate, LabwareDefinition};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::backend::{BackendError, LiquidHandlerBackend, Mount, Pipette};
use crate::description::{BackendDescription, DeserializeBackend};

/// Flow rates reported for recording pipettes, in uL/s
pub const DEFAULT_ASPIRATE_FLOW_RATE: f64 = 100.0;
pub const DEFAULT_DISPENSE_FLOW_RATE: f64 = 180.0;

/// A command received by the recording backend
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum BackendCall {
    Setup,
    AssignLabware {
        labware_id: String,
        slot: u8,
    },
    UnassignLabware {
        labware_id: String,
    },
    PickUpTip {
        labware_id: String,
        well_name: String,
        pipette_id: String,
        offset: Coordinate,
    },
    DropTip {
        labware_id: String,
        well_name: String,
        pipette_id: String,
        offset: Coordinate,
    },
    Aspirate {
        labware_id: String,
        well_name: String,
        pipette_id: String,
        volume: f64,
        flow_rate: f64,
        offset: Coordinate,
    },
    Dispense {
        labware_id: String,
        well_name: String,
        pipette_id: String,
        volume: f64,
        flow_rate: f64,
        offset: Coordinate,
    },
    PickUpTips96 {
        labware_id: String,
    },
    DropTips96 {
        labware_id: String,
    },
    Aspirate96 {
        labware_id: String,
        volume: f64,
        flow_rate: f64,
    },
    Dispense96 {
        labware_id: String,
        volume: f64,
        flow_rate: f64,
    },
}

/// Records every call; never touches hardware
#[derive(Debug, Clone)]
pub struct RecordingBackend {
    num_channels: usize,
    supports_96_head: bool,
    run_id: Option<String>,
    calls: Vec<BackendCall>,
    fail_next: Option<String>,
}

impl RecordingBackend {
    /// A backend with `num_channels` independent channels and no 96 head
    pub fn new(num_channels: usize) -> Self {
        Self {
            num_channels,
            supports_96_head: false,
            run_id: None,
            calls: Vec::new(),
            fail_next: None,
        }
    }

    /// Also expose a 96-channel head
    pub fn with_96_head(mut self) -> Self {
        self.supports_96_head = true;
        self
    }

    /// Commands received so far, oldest first
    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Id of the run created by `setup`
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Make the next channel command fail with a protocol error
    pub fn fail_next_command(&mut self, message: impl Into<String>) {
        self.fail_next = Some(message.into());
    }

    fn pipette_id(channel: usize) -> String {
        format!("channel-{}", channel)
    }

    fn record(&mut self, call: BackendCall) -> Result<(), BackendError> {
        if self.run_id.is_none() {
            return Err(BackendError::NotSetup);
        }
        if let Some(message) = self.fail_next.take() {
            return Err(BackendError::Protocol(message));
        }
        info!(call = ?call, "Backend call");
        self.calls.push(call);
        Ok(())
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl LiquidHandlerBackend for RecordingBackend {
    async fn setup(&mut self) -> Result<(), BackendError> {
        let run_id = format!("run-{}", Uuid::new_v4());
        info!(run = %run_id, channels = self.num_channels, "Recording backend set up");
        self.run_id = Some(run_id);
        self.calls.push(BackendCall::Setup);
        Ok(())
    }

    fn pipettes(&self) -> Vec<Option<Pipette>> {
        (0..self.num_channels)
            .map(|channel| {
                Some(Pipette {
                    id: Self::pipette_id(channel),
                    name: "recording".to_string(),
                    mount: Mount::Channel(channel),
                    default_aspirate_flow_rate: Some(DEFAULT_ASPIRATE_FLOW_RATE),
                    default_dispense_flow_rate: Some(DEFAULT_DISPENSE_FLOW_RATE),
                })
            })
            .collect()
    }

    fn head96(&self) -> Option<Pipette> {
        self.supports_96_head.then(|| Pipette {
            id: "head96".to_string(),
            name: "recording96".to_string(),
            mount: Mount::Left,
            default_aspirate_flow_rate: Some(DEFAULT_ASPIRATE_FLOW_RATE),
            default_dispense_flow_rate: Some(DEFAULT_DISPENSE_FLOW_RATE),
        })
    }

    async fn assigned_resource_callback(
        &mut self,
        labware: &LabwareDefinition,
        slot: u8,
    ) -> Result<String, BackendError> {
        let labware_id = labware.display_name.clone();
        self.record(BackendCall::AssignLabware {
            labware_id: labware_id.clone(),
            slot,
        })?;
        Ok(labware_id)
    }

    async fn unassigned_resource_callback(&mut self, labware_id: &str) -> Result<(), BackendError> {
        self.record(BackendCall::UnassignLabware {
            labware_id: labware_id.to_string(),
        })
    }

    async fn pick_up_tip(
        &mut self,
        labware_id: &str,
        well_name: &str,
        pipette_id: &str,
        offset: Coordinate,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::PickUpTip {
            labware_id: labware_id.to_string(),
            well_name: well_name.to_string(),
            pipette_id: pipette_id.to_string(),
            offset,
        })
    }

    async fn drop_tip(
        &mut self,
        labware_id: &str,
        well_name: &str,
        pipette_id: &str,
        offset: Coordinate,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::DropTip {
            labware_id: labware_id.to_string(),
            well_name: well_name.to_string(),
            pipette_id: pipette_id.to_string(),
            offset,
        })
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
        self.record(BackendCall::Aspirate {
            labware_id: labware_id.to_string(),
            well_name: well_name.to_string(),
            pipette_id: pipette_id.to_string(),
            volume,
            flow_rate,
            offset,
        })
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
        self.record(BackendCall::Dispense {
            labware_id: labware_id.to_string(),
            well_name: well_name.to_string(),
            pipette_id: pipette_id.to_string(),
            volume,
            flow_rate,
            offset,
        })
    }

    async fn pick_up_tips96(&mut self, labware_id: &str, _offset: Coordinate) -> Result<(), BackendError> {
        if !self.supports_96_head {
            return Err(BackendError::NotImplemented("pick_up_tips96"));
        }
        self.record(BackendCall::PickUpTips96 {
            labware_id: labware_id.to_string(),
        })
    }

    async fn drop_tips96(&mut self, labware_id: &str, _offset: Coordinate) -> Result<(), BackendError> {
        if !self.supports_96_head {
            return Err(BackendError::NotImplemented("drop_tips96"));
        }
        self.record(BackendCall::DropTips96 {
            labware_id: labware_id.to_string(),
        })
    }

    async fn aspirate96(
        &mut self,
        labware_id: &str,
        volume: f64,
        flow_rate: f64,
        _offset: Coordinate,
    ) -> Result<(), BackendError> {
        if !self.supports_96_head {
            return Err(BackendError::NotImplemented("aspirate96"));
        }
        self.record(BackendCall::Aspirate96 {
            labware_id: labware_id.to_string(),
            volume,
            flow_rate,
        })
    }

    async fn dispense96(
        &mut self,
        labware_id: &str,
        volume: f64,
        flow_rate: f64,
        _offset: Coordinate,
    ) -> Result<(), BackendError> {
        if !self.supports_96_head {
            return Err(BackendError::NotImplemented("dispense96"));
        }
        self.record(BackendCall::Dispense96 {
            labware_id: labware_id.to_string(),
            volume,
            flow_rate,
        })
    }

    fn serialize(&self) -> BackendDescription {
        BackendDescription::new(Self::TYPE_NAME)
            .with("num_channels", self.num_channels as u64)
            .with("supports_96_head", self.supports_96_head)
    }
}

impl DeserializeBackend for RecordingBackend {
    const TYPE_NAME: &'static str = "RecordingBackend";

    fn deserialize(description: &BackendDescription) -> Result<Self, BackendError> {
        description.expect_type(Self::TYPE_NAME)?;
        let num_channels = match description.params.get("num_channels") {
            None => 1,
            Some(_) => description.get_u64("num_channels")? as usize,
        };
        let mut backend = Self::new(num_channels);
        backend.supports_96_head = description.get_bool_or("supports_96_head", false)?;
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commands_require_setup() {
        let mut backend = RecordingBackend::new(1);
        let err = backend
            .pick_up_tip("rack", "rack_A1", "channel-0", Coordinate::zero())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NotSetup));

        backend.setup().await.unwrap();
        assert!(backend.run_id().unwrap().starts_with("run-"));
        backend
            .pick_up_tip("rack", "rack_A1", "channel-0", Coordinate::zero())
            .await
            .unwrap();
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let mut backend = RecordingBackend::new(1);
        backend.setup().await.unwrap();
        backend.fail_next_command("pipette stalled");

        let err = backend
            .drop_tip("rack", "rack_A1", "channel-0", Coordinate::zero())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Protocol(ref m) if m == "pipette stalled"));
        assert!(backend
            .drop_tip("rack", "rack_A1", "channel-0", Coordinate::zero())
            .await
            .is_ok());
    }

    #[test]
    fn test_pipettes_per_channel() {
        let backend = RecordingBackend::new(2);
        let pipettes = backend.pipettes();
        assert_eq!(pipettes.len(), 2);
        assert_eq!(pipettes[1].as_ref().unwrap().id, "channel-1");
        assert!(backend.head96().is_none());
        assert!(RecordingBackend::new(1).with_96_head().head96().is_some());
    }

    #[test]
    fn test_serialize_round_trip() {
        let backend = RecordingBackend::new(8).with_96_head();
        let description = backend.serialize();
        assert_eq!(
            description.to_json(),
            serde_json::json!({"type": "RecordingBackend", "num_channels": 8, "supports_96_head": true})
        );

        let rebuilt = RecordingBackend::deserialize(&description).unwrap();
        assert_eq!(rebuilt.serialize(), description);

        let defaults = RecordingBackend::deserialize(&BackendDescription::new("RecordingBackend")).unwrap();
        assert_eq!(defaults.pipettes().len(), 1);
    }
}
