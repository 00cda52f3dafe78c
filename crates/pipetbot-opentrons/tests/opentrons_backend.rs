//! OpentronsBackend driven through the liquid handler against a mock robot

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use pipetbot_core::catalog::{opentrons_96_filtertiprack_20ul, usascientific_96_wellplate_2point4ml_deep};
use pipetbot_core::{Coordinate, Deck, ResourceId};
use pipetbot_handler::{
    BackendDescription, BackendRegistry, DeserializeBackend, ErrorKind, HandlerError, LiquidHandler,
    LiquidHandlerBackend,
};
use pipetbot_opentrons::{LabwareLoad, MountedPipette, OpentronsBackend, OtApi};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
enum OtCall {
    CreateRun,
    AddMountedPipettes,
    DefineLabware(String),
    AddLabware(LabwareLoad),
    PickUpTip(String, String, String, Coordinate),
    DropTip(String, String, String, Coordinate),
    Aspirate(String, String, String, f64, f64, Coordinate),
    Dispense(String, String, String, f64, f64, Coordinate),
}

#[derive(Debug, Default)]
struct MockOtApi {
    host: String,
    port: u16,
    calls: Vec<OtCall>,
    fail_next: bool,
}

impl MockOtApi {
    fn record(&mut self, call: OtCall) -> Result<()> {
        if std::mem::take(&mut self.fail_next) {
            return Err(anyhow!("connection refused"));
        }
        self.calls.push(call);
        Ok(())
    }
}

#[async_trait]
impl OtApi for MockOtApi {
    fn connect(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            ..Self::default()
        }
    }

    async fn create_run(&mut self) -> Result<String> {
        self.record(OtCall::CreateRun)?;
        Ok("run-id".to_string())
    }

    async fn add_mounted_pipettes(&mut self) -> Result<(Option<MountedPipette>, Option<MountedPipette>)> {
        self.record(OtCall::AddMountedPipettes)?;
        let pipette = |id: &str| MountedPipette {
            pipette_id: id.to_string(),
            name: "p20_single_gen2".to_string(),
        };
        Ok((Some(pipette("left-pipette-id")), Some(pipette("right-pipette-id"))))
    }

    async fn define_labware(&mut self, definition: &Value) -> Result<Value> {
        let name = definition["metadata"]["displayName"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let namespace = definition["namespace"].as_str().unwrap_or_default().to_string();
        self.record(OtCall::DefineLabware(name.clone()))?;
        Ok(json!({"data": {"definitionUri": format!("{}/{}/1", namespace, name)}}))
    }

    async fn add_labware(&mut self, load: &LabwareLoad) -> Result<String> {
        self.record(OtCall::AddLabware(load.clone()))?;
        Ok(load.labware_id.clone())
    }

    async fn pick_up_tip(&mut self, labware_id: &str, well_name: &str, pipette_id: &str, offset: Coordinate)
        -> Result<()> {
        self.record(OtCall::PickUpTip(
            labware_id.to_string(),
            well_name.to_string(),
            pipette_id.to_string(),
            offset,
        ))
    }

    async fn drop_tip(&mut self, labware_id: &str, well_name: &str, pipette_id: &str, offset: Coordinate)
        -> Result<()> {
        self.record(OtCall::DropTip(
            labware_id.to_string(),
            well_name.to_string(),
            pipette_id.to_string(),
            offset,
        ))
    }

    async fn aspirate(
        &mut self,
        labware_id: &str,
        well_name: &str,
        pipette_id: &str,
        volume: f64,
        flow_rate: f64,
        offset: Coordinate,
    ) -> Result<()> {
        self.record(OtCall::Aspirate(
            labware_id.to_string(),
            well_name.to_string(),
            pipette_id.to_string(),
            volume,
            flow_rate,
            offset,
        ))
    }

    async fn dispense(
        &mut self,
        labware_id: &str,
        well_name: &str,
        pipette_id: &str,
        volume: f64,
        flow_rate: f64,
        offset: Coordinate,
    ) -> Result<()> {
        self.record(OtCall::Dispense(
            labware_id.to_string(),
            well_name.to_string(),
            pipette_id.to_string(),
            volume,
            flow_rate,
            offset,
        ))
    }
}

type Handler = LiquidHandler<OpentronsBackend<MockOtApi>>;

struct Setup {
    lh: Handler,
    tip_rack: ResourceId,
    plate: ResourceId,
}

async fn setup() -> Setup {
    let mut lh = LiquidHandler::new(OpentronsBackend::<MockOtApi>::new("localhost", 1338), Deck::ot2());
    lh.setup().await.unwrap();
    let tip_rack = lh
        .assign_child_at_slot(opentrons_96_filtertiprack_20ul("tip_rack"), 1)
        .await
        .unwrap();
    let plate = lh
        .assign_child_at_slot(usascientific_96_wellplate_2point4ml_deep("plate"), 11)
        .await
        .unwrap();
    lh.backend_mut().api_mut().calls.clear();
    Setup { lh, tip_rack, plate }
}

fn last_call(lh: &Handler) -> &OtCall {
    lh.backend().api().calls.last().unwrap()
}

#[tokio::test]
async fn test_setup_reads_pipettes() {
    let mut lh = LiquidHandler::new(OpentronsBackend::<MockOtApi>::new("localhost", 1338), Deck::ot2());
    lh.setup().await.unwrap();

    assert_eq!(lh.backend().run_id(), Some("run-id"));
    assert_eq!(lh.backend().api().host, "localhost");
    assert_eq!(lh.backend().api().port, 1338);
    assert_eq!(lh.num_channels(), 2);

    let left = lh.channel(0).unwrap().pipette().unwrap();
    assert_eq!(left.id, "left-pipette-id");
    assert_eq!(left.default_aspirate_flow_rate, Some(3.78));
    assert_eq!(lh.channel(1).unwrap().pipette().unwrap().id, "right-pipette-id");
    assert!(lh.head96().is_none());
}

#[tokio::test]
async fn test_assigned_resource_callback() {
    let Setup { lh, tip_rack, plate } = setup().await;
    assert_eq!(lh.labware_id(tip_rack), Some("tip_rack"));
    assert_eq!(lh.labware_id(plate), Some("plate"));

    let mut lh = lh;
    lh.unassign_slot(11).await.unwrap();
    lh.assign_child_at_slot(usascientific_96_wellplate_2point4ml_deep("plate"), 11)
        .await
        .unwrap();
    let calls = &lh.backend().api().calls;
    assert_eq!(calls[0], OtCall::DefineLabware("plate".to_string()));
    assert_eq!(
        calls[1],
        OtCall::AddLabware(LabwareLoad {
            load_name: "plate".to_string(),
            namespace: "pipetbot".to_string(),
            slot: 11,
            version: 1,
            labware_id: "plate".to_string(),
            display_name: "plate".to_string(),
        })
    );
}

#[tokio::test]
async fn test_tip_pick_up() {
    let Setup { mut lh, tip_rack, .. } = setup().await;
    let a1 = lh.deck().get_item("tip_rack", "A1").unwrap();
    assert_eq!(lh.deck().tree().parent(a1), Some(tip_rack));

    lh.pick_up_tips(&[a1]).await.unwrap();
    assert_eq!(
        last_call(&lh),
        &OtCall::PickUpTip(
            "tip_rack".to_string(),
            "tip_rack_A1".to_string(),
            "left-pipette-id".to_string(),
            Coordinate::zero()
        )
    );
}

#[tokio::test]
async fn test_tip_drop() {
    let Setup { mut lh, .. } = setup().await;
    let a1 = lh.deck().get_item("tip_rack", "A1").unwrap();
    lh.pick_up_tips(&[a1]).await.unwrap();
    lh.drop_tips(&[a1]).await.unwrap();

    assert_eq!(
        last_call(&lh),
        &OtCall::DropTip(
            "tip_rack".to_string(),
            "tip_rack_A1".to_string(),
            "left-pipette-id".to_string(),
            Coordinate::zero()
        )
    );
}

#[tokio::test]
async fn test_aspirate() {
    let Setup { mut lh, .. } = setup().await;
    let a1 = lh.deck().get_item("tip_rack", "A1").unwrap();
    lh.pick_up_tips(&[a1]).await.unwrap();
    lh.aspirate(&[a1], &[10.0]).await.unwrap();

    assert_eq!(
        last_call(&lh),
        &OtCall::Aspirate(
            "tip_rack".to_string(),
            "tip_rack_A1".to_string(),
            "left-pipette-id".to_string(),
            10.0,
            3.78,
            Coordinate::zero()
        )
    );
}

#[tokio::test]
async fn test_dispense() {
    let Setup { mut lh, .. } = setup().await;
    let a1 = lh.deck().get_item("tip_rack", "A1").unwrap();
    lh.pick_up_tips(&[a1]).await.unwrap();
    lh.aspirate(&[a1], &[10.0]).await.unwrap();
    lh.no_volume_tracking().dispense(&[a1], &[10.0]).await.unwrap();

    assert_eq!(
        last_call(&lh),
        &OtCall::Dispense(
            "tip_rack".to_string(),
            "tip_rack_A1".to_string(),
            "left-pipette-id".to_string(),
            10.0,
            7.56,
            Coordinate::zero()
        )
    );
}

#[tokio::test]
async fn test_plate_wells() {
    let Setup { mut lh, plate, .. } = setup().await;
    let spot = lh.deck().get_item("tip_rack", "A1").unwrap();
    let well = lh.deck().tree().item(plate, "C5").unwrap();
    lh.set_well_volume(well, 100.0).unwrap();
    lh.pick_up_tips(&[spot]).await.unwrap();

    lh.aspirate(&[well], &[20.0]).await.unwrap();
    assert!(matches!(
        last_call(&lh),
        OtCall::Aspirate(labware, well_name, ..) if labware == "plate" && well_name == "plate_C5"
    ));
    assert_eq!(lh.well_volume(well).unwrap(), 80.0);
}

#[tokio::test]
async fn test_96_head_not_implemented() {
    let Setup { mut lh, tip_rack, plate } = setup().await;

    for err in [
        lh.pick_up_tips96(tip_rack).await.unwrap_err(),
        lh.drop_tips96(tip_rack).await.unwrap_err(),
        lh.aspirate_plate(plate, 100.0, None).await.unwrap_err(),
        lh.dispense_plate(plate, 100.0, None).await.unwrap_err(),
    ] {
        assert!(matches!(err, HandlerError::NotImplemented(_)));
        assert_eq!(err.kind(), ErrorKind::NotImplementedCapability);
    }
    assert!(lh.backend().api().calls.is_empty());
}

#[tokio::test]
async fn test_transport_error_keeps_state() {
    let Setup { mut lh, .. } = setup().await;
    let a1 = lh.deck().get_item("tip_rack", "A1").unwrap();
    lh.backend_mut().api_mut().fail_next = true;

    let err = lh.pick_up_tips(&[a1]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendProtocol);
    assert!(!lh.channel(0).unwrap().has_tip());
    assert!(lh.deck().tree().tip_spot(a1).unwrap().has_tip());
}

#[tokio::test]
async fn test_commands_before_setup() {
    let mut backend = OpentronsBackend::<MockOtApi>::new("localhost", 1338);
    let err = backend
        .pick_up_tip("tip_rack", "tip_rack_A1", "left-pipette-id", Coordinate::zero())
        .await
        .unwrap_err();
    assert!(matches!(err, pipetbot_handler::BackendError::NotSetup));
    assert!(backend.api().calls.is_empty());
}

#[test]
fn test_serialize() {
    let backend = OpentronsBackend::<MockOtApi>::new("localhost", 1337);
    let description = backend.serialize();
    assert_eq!(
        description.to_json(),
        json!({"type": "OpentronsBackend", "host": "localhost", "port": 1337})
    );

    let rebuilt = OpentronsBackend::<MockOtApi>::deserialize(&description).unwrap();
    assert_eq!(rebuilt.host(), "localhost");
    assert_eq!(rebuilt.port(), 1337);
    assert_eq!(rebuilt.serialize(), description);
}

#[test]
fn test_registry_builds_opentrons_backend() {
    let mut registry = BackendRegistry::with_defaults();
    registry.register::<OpentronsBackend<MockOtApi>>();

    let description: BackendDescription =
        serde_json::from_value(json!({"type": "OpentronsBackend", "host": "ot2.local", "port": 31950})).unwrap();
    let backend = registry.deserialize(&description).unwrap();
    assert_eq!(backend.serialize(), description);
    assert!(registry.types().contains(&"OpentronsBackend"));
}
