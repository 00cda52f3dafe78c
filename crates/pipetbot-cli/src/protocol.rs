//! Protocol files: a list of liquid handling steps
//!
//! ```toml
//! [[step]]
//! op = "pick_up_tips"
//! targets = "tips:A1:H1"
//!
//! [[step]]
//! op = "aspirate"
//! targets = "plate:A1:H1"
//! volumes = [10.0]
//! track_volume = false
//! ```
//!
//! Targets use the deck syntax `labware`, `labware:A1` or `labware:A1:H1`.

use anyhow::{anyhow, Context, Result};
use pipetbot_core::{Deck, ResourceError, ResourceId};
use pipetbot_handler::{ChannelOptions, HandlerError, LiquidHandler, LiquidHandlerBackend, TrackingKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

/// One command plus the tracking overrides in force while it runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub command: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_volume: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_tips: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    PickUpTips {
        targets: String,
        #[serde(default)]
        channels: Option<Vec<usize>>,
    },
    DropTips {
        targets: String,
        #[serde(default)]
        channels: Option<Vec<usize>>,
    },
    /// A single volume applies to every target
    Aspirate {
        targets: String,
        volumes: Vec<f64>,
        #[serde(default)]
        channels: Option<Vec<usize>>,
        #[serde(default)]
        flow_rates: Option<Vec<f64>>,
    },
    Dispense {
        targets: String,
        volumes: Vec<f64>,
        #[serde(default)]
        channels: Option<Vec<usize>>,
        #[serde(default)]
        flow_rates: Option<Vec<f64>>,
    },
    PickUpTips96 {
        tip_rack: String,
    },
    DropTips96 {
        tip_rack: String,
    },
    AspiratePlate {
        plate: String,
        volume: f64,
        #[serde(default)]
        flow_rate: Option<f64>,
    },
    DispensePlate {
        plate: String,
        volume: f64,
        #[serde(default)]
        flow_rate: Option<f64>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::PickUpTips { .. } => "pick_up_tips",
            Command::DropTips { .. } => "drop_tips",
            Command::Aspirate { .. } => "aspirate",
            Command::Dispense { .. } => "dispense",
            Command::PickUpTips96 { .. } => "pick_up_tips96",
            Command::DropTips96 { .. } => "drop_tips96",
            Command::AspiratePlate { .. } => "aspirate_plate",
            Command::DispensePlate { .. } => "dispense_plate",
        }
    }
}

/// A command with every target resolved against a deck
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    PickUpTips(Vec<ResourceId>, ChannelOptions),
    DropTips(Vec<ResourceId>, ChannelOptions),
    Aspirate(Vec<ResourceId>, Vec<f64>, ChannelOptions),
    Dispense(Vec<ResourceId>, Vec<f64>, ChannelOptions),
    PickUpTips96(ResourceId),
    DropTips96(ResourceId),
    AspiratePlate(ResourceId, f64, Option<f64>),
    DispensePlate(ResourceId, f64, Option<f64>),
}

fn options(channels: &Option<Vec<usize>>, flow_rates: Option<&Vec<f64>>) -> ChannelOptions {
    ChannelOptions {
        use_channels: channels.clone(),
        offsets: None,
        flow_rates: flow_rates.cloned(),
    }
}

fn volumes_for(volumes: &[f64], count: usize) -> Vec<f64> {
    match volumes {
        [single] => vec![*single; count],
        _ => volumes.to_vec(),
    }
}

fn labware(deck: &Deck, name: &str) -> Result<ResourceId, ResourceError> {
    deck.get_resource(name)
        .ok_or_else(|| ResourceError::NotFound(name.to_string()))
}

impl Step {
    pub fn resolve(&self, deck: &Deck) -> Result<Action, ResourceError> {
        let action = match &self.command {
            Command::PickUpTips { targets, channels } => {
                Action::PickUpTips(deck.resolve(targets)?, options(channels, None))
            }
            Command::DropTips { targets, channels } => Action::DropTips(deck.resolve(targets)?, options(channels, None)),
            Command::Aspirate {
                targets,
                volumes,
                channels,
                flow_rates,
            } => {
                let wells = deck.resolve(targets)?;
                let volumes = volumes_for(volumes, wells.len());
                Action::Aspirate(wells, volumes, options(channels, flow_rates.as_ref()))
            }
            Command::Dispense {
                targets,
                volumes,
                channels,
                flow_rates,
            } => {
                let wells = deck.resolve(targets)?;
                let volumes = volumes_for(volumes, wells.len());
                Action::Dispense(wells, volumes, options(channels, flow_rates.as_ref()))
            }
            Command::PickUpTips96 { tip_rack } => Action::PickUpTips96(labware(deck, tip_rack)?),
            Command::DropTips96 { tip_rack } => Action::DropTips96(labware(deck, tip_rack)?),
            Command::AspiratePlate {
                plate,
                volume,
                flow_rate,
            } => Action::AspiratePlate(labware(deck, plate)?, *volume, *flow_rate),
            Command::DispensePlate {
                plate,
                volume,
                flow_rate,
            } => Action::DispensePlate(labware(deck, plate)?, *volume, *flow_rate),
        };
        Ok(action)
    }
}

/// Load a protocol file
pub fn load_protocol(path: &Path) -> Result<Protocol> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    let protocol: Protocol = toml::from_str(&content).with_context(|| format!("Cannot parse {}", path.display()))?;
    info!(path = %path.display(), steps = protocol.steps.len(), "Loaded protocol");
    Ok(protocol)
}

/// Resolve every step against the deck without running anything
pub fn check(protocol: &Protocol, deck: &Deck) -> Result<Vec<Action>> {
    protocol
        .steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            step.resolve(deck)
                .with_context(|| format!("Step {} ({})", index + 1, step.command.name()))
        })
        .collect()
}

/// Run every step in order, stopping at the first failure
pub async fn run<B: LiquidHandlerBackend>(protocol: &Protocol, lh: &mut LiquidHandler<B>) -> Result<usize> {
    if !lh.is_setup() {
        return Err(anyhow!("Liquid handler must be set up before running a protocol"));
    }
    for (index, step) in protocol.steps.iter().enumerate() {
        let action = step
            .resolve(lh.deck())
            .with_context(|| format!("Step {} ({})", index + 1, step.command.name()))?;
        debug!(step = index + 1, op = step.command.name(), "Running step");
        run_step(lh, step, &action)
            .await
            .with_context(|| format!("Step {} ({}) failed", index + 1, step.command.name()))?;
    }
    Ok(protocol.steps.len())
}

async fn run_step<B: LiquidHandlerBackend>(
    lh: &mut LiquidHandler<B>,
    step: &Step,
    action: &Action,
) -> Result<(), HandlerError> {
    match step.track_volume {
        Some(enabled) => {
            let mut scope = lh.with_tracking(TrackingKind::Volume, enabled);
            run_with_tip_tracking(&mut *scope, step, action).await
        }
        None => run_with_tip_tracking(lh, step, action).await,
    }
}

async fn run_with_tip_tracking<B: LiquidHandlerBackend>(
    lh: &mut LiquidHandler<B>,
    step: &Step,
    action: &Action,
) -> Result<(), HandlerError> {
    match step.track_tips {
        Some(enabled) => {
            let mut scope = lh.with_tracking(TrackingKind::Tip, enabled);
            execute(&mut *scope, action).await
        }
        None => execute(lh, action).await,
    }
}

async fn execute<B: LiquidHandlerBackend>(lh: &mut LiquidHandler<B>, action: &Action) -> Result<(), HandlerError> {
    match action {
        Action::PickUpTips(spots, options) => lh.pick_up_tips_with(spots, options).await,
        Action::DropTips(spots, options) => lh.drop_tips_with(spots, options).await,
        Action::Aspirate(wells, volumes, options) => lh.aspirate_with(wells, volumes, options).await,
        Action::Dispense(wells, volumes, options) => lh.dispense_with(wells, volumes, options).await,
        Action::PickUpTips96(rack) => lh.pick_up_tips96(*rack).await,
        Action::DropTips96(rack) => lh.drop_tips96(*rack).await,
        Action::AspiratePlate(plate, volume, flow_rate) => lh.aspirate_plate(*plate, *volume, *flow_rate).await,
        Action::DispensePlate(plate, volume, flow_rate) => lh.dispense_plate(*plate, *volume, *flow_rate).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipetbot_core::catalog::{opentrons_96_filtertiprack_20ul, usascientific_96_wellplate_2point4ml_deep};
    use pipetbot_handler::{BackendCall, RecordingBackend};

    const TRANSFER: &str = r#"
        [[step]]
        op = "pick_up_tips"
        targets = "tips:A1:H1"

        [[step]]
        op = "aspirate"
        targets = "plate:A1:H1"
        volumes = [10]

        [[step]]
        op = "dispense"
        targets = "plate:A2:H2"
        volumes = [10]
        flow_rates = [50, 50, 50, 50, 50, 50, 50, 50]

        [[step]]
        op = "drop_tips"
        targets = "tips:A1:H1"
    "#;

    async fn handler() -> LiquidHandler<RecordingBackend> {
        let mut deck = Deck::ot2();
        deck.assign_child_at_slot(opentrons_96_filtertiprack_20ul("tips"), 1)
            .unwrap();
        deck.assign_child_at_slot(usascientific_96_wellplate_2point4ml_deep("plate"), 2)
            .unwrap();
        let mut lh = LiquidHandler::new(RecordingBackend::new(8), deck);
        lh.setup().await.unwrap();
        lh
    }

    #[test]
    fn test_parse_steps() {
        let protocol: Protocol = toml::from_str(TRANSFER).unwrap();
        assert_eq!(protocol.steps.len(), 4);
        assert_eq!(protocol.steps[0].command.name(), "pick_up_tips");
        assert!(matches!(
            &protocol.steps[2].command,
            Command::Dispense { flow_rates: Some(rates), .. } if rates.len() == 8
        ));
        assert_eq!(protocol.steps[1].track_volume, None);
    }

    #[tokio::test]
    async fn test_check_resolves_targets() {
        let lh = handler().await;
        let protocol: Protocol = toml::from_str(TRANSFER).unwrap();
        let actions = check(&protocol, lh.deck()).unwrap();
        assert!(matches!(&actions[1], Action::Aspirate(wells, volumes, _) if wells.len() == 8 && volumes == &vec![10.0; 8]));

        let bad: Protocol = toml::from_str(
            r#"
            [[step]]
            op = "pick_up_tips96"
            tip_rack = "nowhere"
            "#,
        )
        .unwrap();
        let err = check(&bad, lh.deck()).unwrap_err();
        assert!(format!("{:#}", err).contains("nowhere"));
    }

    #[tokio::test]
    async fn test_run_with_tracking_override() {
        let mut lh = handler().await;
        let protocol: Protocol = toml::from_str(TRANSFER).unwrap();

        // The plate starts empty, so the aspirate only passes untracked
        let err = run(&protocol, &mut lh).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Step 2 (aspirate) failed"));

        let mut lh = handler().await;
        let mut protocol = protocol;
        protocol.steps[1].track_volume = Some(false);
        protocol.steps[2].track_volume = Some(false);
        assert_eq!(run(&protocol, &mut lh).await.unwrap(), 4);

        let calls = lh.backend().calls();
        assert!(matches!(
            calls.iter().rev().nth(8),
            Some(BackendCall::Dispense { flow_rate, .. }) if *flow_rate == 50.0
        ));
        let a2 = lh.deck().get_item("plate", "A2").unwrap();
        assert_eq!(lh.well_volume(a2).unwrap(), 0.0);
        assert!(lh.tracking().is_enabled(TrackingKind::Volume));
    }

    #[tokio::test]
    async fn test_96_steps_without_head() {
        let mut lh = handler().await;
        let protocol: Protocol = toml::from_str(
            r#"
            [[step]]
            op = "pick_up_tips96"
            tip_rack = "tips"
            "#,
        )
        .unwrap();
        let err = run(&protocol, &mut lh).await.unwrap_err();
        let handler_err = err.downcast_ref::<HandlerError>().unwrap();
        assert!(matches!(handler_err, HandlerError::NotImplemented("pick_up_tips96")));
    }
}
