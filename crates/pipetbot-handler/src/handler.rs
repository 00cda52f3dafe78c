//! The liquid handler: validates commands against deck and channel state,
//! resolves them into backend calls, and keeps the bookkeeping in sync
//!
//! Every command is checked completely before the first backend call is
//! issued, so a doomed command never actuates hardware. Tracked state for a
//! channel is mutated only after that channel's backend call has returned
//! successfully.

use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};

use pipetbot_core::{
    Coordinate, Deck, LabwareDefinition, Resource, ResourceError, ResourceId, ResourceKind, TipDefinition,
    TipError, VolumeError,
};
use tracing::{debug, info, instrument, warn};

use crate::backend::{LiquidHandlerBackend, Pipette};
use crate::channel::{Channel, Head96, MountedTip};
use crate::config::LiquidHandlerConfig;
use crate::error::HandlerError;
use crate::tracking::{TrackingContext, TrackingKind};

/// Optional per-channel parameters of a command
///
/// Each list, when given, must have one entry per target. `flow_rates` is
/// only used by aspirate and dispense.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelOptions {
    /// Channels to use, defaults to the first channels with a pipette
    pub use_channels: Option<Vec<usize>>,
    /// Offsets from each target's default position, default zero
    pub offsets: Option<Vec<Coordinate>>,
    /// Flow rates in uL/s, default taken from the pipette
    pub flow_rates: Option<Vec<f64>>,
}

impl ChannelOptions {
    pub fn channels(channels: impl Into<Vec<usize>>) -> Self {
        Self {
            use_channels: Some(channels.into()),
            ..Self::default()
        }
    }

    pub fn with_offsets(mut self, offsets: impl Into<Vec<Coordinate>>) -> Self {
        self.offsets = Some(offsets.into());
        self
    }

    pub fn with_flow_rates(mut self, flow_rates: impl Into<Vec<f64>>) -> Self {
        self.flow_rates = Some(flow_rates.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LiquidOp {
    Aspirate,
    Dispense,
}

impl LiquidOp {
    fn name(self) -> &'static str {
        match self {
            LiquidOp::Aspirate => "aspirate",
            LiquidOp::Dispense => "dispense",
        }
    }

    fn default_flow_rate(self, pipette: &Pipette) -> Result<f64, HandlerError> {
        let rate = match self {
            LiquidOp::Aspirate => pipette.default_aspirate_flow_rate,
            LiquidOp::Dispense => pipette.default_dispense_flow_rate,
        };
        rate.ok_or_else(|| HandlerError::NoDefaultFlowRate {
            operation: self.name(),
            pipette: pipette.name.clone(),
        })
    }
}

/// A single-channel command with everything resolved for the backend
#[derive(Debug, Clone)]
struct ChannelOp {
    channel: usize,
    target: ResourceId,
    labware_id: String,
    well_name: String,
    pipette_id: String,
    offset: Coordinate,
}

/// Orchestrates pipetting commands against a deck through a backend
pub struct LiquidHandler<B: LiquidHandlerBackend> {
    backend: B,
    deck: Deck,
    config: LiquidHandlerConfig,
    tracking: TrackingContext,
    channels: Vec<Channel>,
    head96: Option<Head96>,
    /// Backend-facing ids of registered labware
    labware_ids: HashMap<ResourceId, String>,
    setup_finished: bool,
}

impl<B: LiquidHandlerBackend> std::fmt::Debug for LiquidHandler<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiquidHandler")
            .field("backend", &self.backend.serialize())
            .field("deck", &self.deck)
            .field("config", &self.config)
            .field("tracking", &self.tracking)
            .field("channels", &self.channels)
            .field("head96", &self.head96)
            .field("setup_finished", &self.setup_finished)
            .finish()
    }
}

impl<B: LiquidHandlerBackend> LiquidHandler<B> {
    pub fn new(backend: B, deck: Deck) -> Self {
        Self::with_config(backend, deck, LiquidHandlerConfig::default())
    }

    pub fn with_config(backend: B, deck: Deck, config: LiquidHandlerConfig) -> Self {
        Self {
            backend,
            deck,
            tracking: config.tracking_context(),
            config,
            channels: Vec::new(),
            head96: None,
            labware_ids: HashMap::new(),
            setup_finished: false,
        }
    }

    /// Set up the backend, read the mounted pipettes, and register every
    /// labware already on the deck
    #[instrument(skip(self))]
    pub async fn setup(&mut self) -> Result<(), HandlerError> {
        self.backend.setup().await?;

        self.channels = self.backend.pipettes().into_iter().map(Channel::new).collect();
        self.head96 = self.backend.head96().map(Head96::new);
        self.labware_ids.clear();

        for (slot, id) in self.deck.labware() {
            self.register_labware(id, slot).await?;
        }

        self.setup_finished = true;
        info!(
            channels = self.channels.len(),
            head96 = self.head96.is_some(),
            labware = self.labware_ids.len(),
            "Liquid handler set up"
        );
        Ok(())
    }

    pub fn is_setup(&self) -> bool {
        self.setup_finished
    }

    pub fn config(&self) -> &LiquidHandlerConfig {
        &self.config
    }

    pub fn deck(&self) -> &Deck {
        &self.deck
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, channel: usize) -> Option<&Channel> {
        self.channels.get(channel)
    }

    pub fn head96(&self) -> Option<&Head96> {
        self.head96.as_ref()
    }

    /// Backend id of registered labware
    pub fn labware_id(&self, labware: ResourceId) -> Option<&str> {
        self.labware_ids.get(&labware).map(String::as_str)
    }

    pub fn tracking(&self) -> &TrackingContext {
        &self.tracking
    }

    /// Current volume of a well
    pub fn well_volume(&self, well: ResourceId) -> Result<f64, HandlerError> {
        Ok(self.deck.tree().well(well)?.volume())
    }

    /// Overwrite the volume of a well, e.g. to describe a pre-filled plate
    pub fn set_well_volume(&mut self, well: ResourceId, volume: f64) -> Result<(), HandlerError> {
        let name = self.deck.tree().name_of(well);
        self.deck
            .tree_mut()
            .well_mut(well)?
            .set_volume(volume)
            .map_err(|source| HandlerError::WellVolume { well: name, source })
    }

    /// Enter a scope with `kind` tracking set to `enabled`; the scope ends
    /// when the returned guard is dropped
    pub fn with_tracking(&mut self, kind: TrackingKind, enabled: bool) -> TrackingGuard<'_, B> {
        self.tracking.push(kind, enabled);
        debug!(kind = %kind, enabled = enabled, "Entered tracking scope");
        TrackingGuard { handler: self, kind }
    }

    pub fn no_volume_tracking(&mut self) -> TrackingGuard<'_, B> {
        self.with_tracking(TrackingKind::Volume, false)
    }

    pub fn no_tip_tracking(&mut self) -> TrackingGuard<'_, B> {
        self.with_tracking(TrackingKind::Tip, false)
    }

    /// Place labware in a deck slot and register it with the backend
    ///
    /// If the backend rejects the labware it is taken off the deck again.
    pub async fn assign_child_at_slot(&mut self, resource: Resource, slot: u8) -> Result<ResourceId, HandlerError> {
        let id = self.deck.assign_child_at_slot(resource, slot)?;
        if self.setup_finished {
            if let Err(e) = self.register_labware(id, slot).await {
                warn!(slot = slot, error = %e, "Backend rejected labware, removing it from the deck");
                self.deck.unassign_slot(slot)?;
                return Err(e);
            }
        }
        Ok(id)
    }

    /// Take labware out of a deck slot and unregister it
    pub async fn unassign_slot(&mut self, slot: u8) -> Result<Resource, HandlerError> {
        let id = self
            .deck
            .labware_at(slot)
            .ok_or(ResourceError::SlotEmpty(slot))?;
        if let Some(labware_id) = self.labware_ids.get(&id).cloned() {
            self.backend.unassigned_resource_callback(&labware_id).await?;
            self.labware_ids.remove(&id);
        }
        Ok(self.deck.unassign_slot(slot)?)
    }

    /// Pick up one tip per target with the default channels
    pub async fn pick_up_tips(&mut self, tip_spots: &[ResourceId]) -> Result<(), HandlerError> {
        self.pick_up_tips_with(tip_spots, &ChannelOptions::default()).await
    }

    pub async fn pick_up_tips_with(
        &mut self,
        tip_spots: &[ResourceId],
        options: &ChannelOptions,
    ) -> Result<(), HandlerError> {
        self.ensure_setup()?;
        let ops = self.plan(tip_spots, options, false)?;
        let track_tips = self.tracking.is_enabled(TrackingKind::Tip);

        let mut tips = Vec::with_capacity(ops.len());
        let mut taken = HashSet::new();
        for op in &ops {
            if self.channel_state(op.channel)?.has_tip() {
                return Err(HandlerError::ChannelHasTip { channel: op.channel });
            }
            let spot = self.deck.tree().tip_spot(op.target)?;
            if track_tips {
                spot.check_take(&op.well_name)?;
                if !taken.insert(op.target) {
                    return Err(TipError::NoTipInSpot(op.well_name.clone()).into());
                }
            }
            tips.push(spot.tip);
        }

        for (op, tip) in ops.iter().zip(tips) {
            debug!(
                labware = %op.labware_id,
                well = %op.well_name,
                pipette = %op.pipette_id,
                channel = op.channel,
                "Picking up tip"
            );
            self.backend
                .pick_up_tip(&op.labware_id, &op.well_name, &op.pipette_id, op.offset)
                .await?;

            if track_tips {
                self.deck
                    .tree_mut()
                    .tip_spot_mut(op.target)?
                    .take_tip(&op.well_name)?;
            }
            self.channel_state_mut(op.channel)?
                .mount_tip(MountedTip::new(tip, op.well_name.clone()));
        }
        Ok(())
    }

    /// Drop the tips of the default channels into the given tip spots
    pub async fn drop_tips(&mut self, tip_spots: &[ResourceId]) -> Result<(), HandlerError> {
        self.drop_tips_with(tip_spots, &ChannelOptions::default()).await
    }

    pub async fn drop_tips_with(
        &mut self,
        tip_spots: &[ResourceId],
        options: &ChannelOptions,
    ) -> Result<(), HandlerError> {
        self.ensure_setup()?;
        let ops = self.plan(tip_spots, options, false)?;
        let track_tips = self.tracking.is_enabled(TrackingKind::Tip);

        let mut filled = HashSet::new();
        for op in &ops {
            if !self.channel_state(op.channel)?.has_tip() {
                return Err(HandlerError::ChannelHasNoTip { channel: op.channel });
            }
            let spot = self.deck.tree().tip_spot(op.target)?;
            if track_tips {
                spot.check_return(&op.well_name)?;
                if !filled.insert(op.target) {
                    return Err(TipError::SpotOccupied(op.well_name.clone()).into());
                }
            }
        }

        for op in &ops {
            debug!(
                labware = %op.labware_id,
                well = %op.well_name,
                pipette = %op.pipette_id,
                channel = op.channel,
                "Dropping tip"
            );
            self.backend
                .drop_tip(&op.labware_id, &op.well_name, &op.pipette_id, op.offset)
                .await?;

            if track_tips {
                self.deck
                    .tree_mut()
                    .tip_spot_mut(op.target)?
                    .return_tip(&op.well_name)?;
            }
            self.channel_state_mut(op.channel)?.remove_tip();
        }
        Ok(())
    }

    /// Aspirate `vols[i]` from `wells[i]` with the default channels
    pub async fn aspirate(&mut self, wells: &[ResourceId], vols: &[f64]) -> Result<(), HandlerError> {
        self.liquid_op(LiquidOp::Aspirate, wells, vols, &ChannelOptions::default())
            .await
    }

    pub async fn aspirate_with(
        &mut self,
        wells: &[ResourceId],
        vols: &[f64],
        options: &ChannelOptions,
    ) -> Result<(), HandlerError> {
        self.liquid_op(LiquidOp::Aspirate, wells, vols, options).await
    }

    /// Dispense `vols[i]` into `wells[i]` with the default channels
    pub async fn dispense(&mut self, wells: &[ResourceId], vols: &[f64]) -> Result<(), HandlerError> {
        self.liquid_op(LiquidOp::Dispense, wells, vols, &ChannelOptions::default())
            .await
    }

    pub async fn dispense_with(
        &mut self,
        wells: &[ResourceId],
        vols: &[f64],
        options: &ChannelOptions,
    ) -> Result<(), HandlerError> {
        self.liquid_op(LiquidOp::Dispense, wells, vols, options).await
    }

    /// Pick up a full rack of tips with the 96-channel head
    pub async fn pick_up_tips96(&mut self, tip_rack: ResourceId) -> Result<(), HandlerError> {
        self.ensure_setup()?;
        let head = self
            .head96
            .as_ref()
            .ok_or(HandlerError::NotImplemented("pick_up_tips96"))?;
        if head.has_tips() {
            return Err(HandlerError::Head96HasTip);
        }

        let (tip, spots) = self.tip_rack_contents(tip_rack)?;
        let track_tips = self.tracking.is_enabled(TrackingKind::Tip);
        if track_tips {
            for spot in &spots {
                let name = self.deck.tree().name_of(*spot);
                self.deck.tree().tip_spot(*spot)?.check_take(&name)?;
            }
        }
        let labware_id = self.registered_id(tip_rack)?;

        debug!(labware = %labware_id, "Picking up tips with 96 head");
        self.backend
            .pick_up_tips96(&labware_id, Coordinate::zero())
            .await?;

        if track_tips {
            for spot in &spots {
                let name = self.deck.tree().name_of(*spot);
                self.deck.tree_mut().tip_spot_mut(*spot)?.take_tip(&name)?;
            }
        }
        let source = self.deck.tree().name_of(tip_rack);
        if let Some(head) = self.head96.as_mut() {
            head.mount_tips(MountedTip::new(tip, source));
        }
        Ok(())
    }

    /// Put the 96 head's tips back into a tip rack
    pub async fn drop_tips96(&mut self, tip_rack: ResourceId) -> Result<(), HandlerError> {
        self.ensure_setup()?;
        let head = self
            .head96
            .as_ref()
            .ok_or(HandlerError::NotImplemented("drop_tips96"))?;
        if !head.has_tips() {
            return Err(HandlerError::Head96HasNoTip);
        }

        let (_, spots) = self.tip_rack_contents(tip_rack)?;
        let track_tips = self.tracking.is_enabled(TrackingKind::Tip);
        if track_tips {
            for spot in &spots {
                let name = self.deck.tree().name_of(*spot);
                self.deck.tree().tip_spot(*spot)?.check_return(&name)?;
            }
        }
        let labware_id = self.registered_id(tip_rack)?;

        debug!(labware = %labware_id, "Dropping tips with 96 head");
        self.backend
            .drop_tips96(&labware_id, Coordinate::zero())
            .await?;

        if track_tips {
            for spot in &spots {
                let name = self.deck.tree().name_of(*spot);
                self.deck.tree_mut().tip_spot_mut(*spot)?.return_tip(&name)?;
            }
        }
        if let Some(head) = self.head96.as_mut() {
            head.remove_tips();
        }
        Ok(())
    }

    /// Aspirate `volume` from every well of a plate with the 96 head
    pub async fn aspirate_plate(
        &mut self,
        plate: ResourceId,
        volume: f64,
        flow_rate: Option<f64>,
    ) -> Result<(), HandlerError> {
        self.plate_op(LiquidOp::Aspirate, plate, volume, flow_rate)
            .await
    }

    /// Dispense `volume` into every well of a plate with the 96 head
    pub async fn dispense_plate(
        &mut self,
        plate: ResourceId,
        volume: f64,
        flow_rate: Option<f64>,
    ) -> Result<(), HandlerError> {
        self.plate_op(LiquidOp::Dispense, plate, volume, flow_rate)
            .await
    }

    async fn liquid_op(
        &mut self,
        op_kind: LiquidOp,
        targets: &[ResourceId],
        vols: &[f64],
        options: &ChannelOptions,
    ) -> Result<(), HandlerError> {
        self.ensure_setup()?;
        if vols.len() != targets.len() {
            return Err(HandlerError::LengthMismatch {
                what: "volumes",
                expected: targets.len(),
                actual: vols.len(),
            });
        }
        if let Some(rates) = &options.flow_rates {
            if rates.len() != targets.len() {
                return Err(HandlerError::LengthMismatch {
                    what: "flow rates",
                    expected: targets.len(),
                    actual: rates.len(),
                });
            }
        }
        let ops = self.plan(targets, options, true)?;
        let track_volume = self.tracking.is_enabled(TrackingKind::Volume);

        let mut flow_rates = Vec::with_capacity(ops.len());
        let mut pending: HashMap<ResourceId, f64> = HashMap::new();
        for (i, (op, &volume)) in ops.iter().zip(vols).enumerate() {
            if !volume.is_finite() || volume < 0.0 {
                return Err(VolumeError::InvalidVolume(volume).into());
            }
            let channel = self.channel_state(op.channel)?;
            let tip = channel
                .tip()
                .ok_or(HandlerError::ChannelHasNoTip { channel: op.channel })?;
            let pipette = channel.pipette().ok_or(HandlerError::NoPipette(op.channel))?;
            let flow_rate = match options.flow_rates.as_ref().and_then(|r| r.get(i)) {
                Some(rate) => *rate,
                None => op_kind.default_flow_rate(pipette)?,
            };
            flow_rates.push(flow_rate);

            if !track_volume {
                continue;
            }
            let tip_check = match op_kind {
                LiquidOp::Aspirate => tip.volume.check_add(volume, 0.0),
                LiquidOp::Dispense => tip.volume.check_remove(volume, 0.0),
            };
            tip_check.map_err(|source| HandlerError::TipVolume {
                channel: op.channel,
                source,
            })?;

            // Tip spots and other non-well targets carry no liquid state
            if let Ok(well) = self.deck.tree().well(op.target) {
                let already = pending.entry(op.target).or_insert(0.0);
                let well_check = match op_kind {
                    LiquidOp::Aspirate => well.check_remove(volume, *already),
                    LiquidOp::Dispense => well.check_add(volume, *already),
                };
                well_check.map_err(|source| HandlerError::WellVolume {
                    well: op.well_name.clone(),
                    source,
                })?;
                *already += volume;
            }
        }

        for ((op, &volume), flow_rate) in ops.iter().zip(vols).zip(flow_rates) {
            debug!(
                labware = %op.labware_id,
                well = %op.well_name,
                pipette = %op.pipette_id,
                channel = op.channel,
                volume = volume,
                flow_rate = flow_rate,
                "{}",
                op_kind.name()
            );
            match op_kind {
                LiquidOp::Aspirate => {
                    self.backend
                        .aspirate(&op.labware_id, &op.well_name, &op.pipette_id, volume, flow_rate, op.offset)
                        .await?
                }
                LiquidOp::Dispense => {
                    self.backend
                        .dispense(&op.labware_id, &op.well_name, &op.pipette_id, volume, flow_rate, op.offset)
                        .await?
                }
            }

            if track_volume {
                self.apply_channel_volume(op_kind, op, volume)?;
            }
        }
        Ok(())
    }

    /// Record a liquid move whose volumes were validated before any backend call
    fn apply_channel_volume(&mut self, op_kind: LiquidOp, op: &ChannelOp, volume: f64) -> Result<(), HandlerError> {
        if let Ok(well) = self.deck.tree_mut().well_mut(op.target) {
            match op_kind {
                LiquidOp::Aspirate => well.commit_remove(volume),
                LiquidOp::Dispense => well.commit_add(volume),
            }
        }

        if let Some(tip) = self.channel_state_mut(op.channel)?.tip_mut() {
            match op_kind {
                LiquidOp::Aspirate => tip.volume.commit_add(volume),
                LiquidOp::Dispense => tip.volume.commit_remove(volume),
            }
        }
        Ok(())
    }

    async fn plate_op(
        &mut self,
        op_kind: LiquidOp,
        plate: ResourceId,
        volume: f64,
        flow_rate: Option<f64>,
    ) -> Result<(), HandlerError> {
        self.ensure_setup()?;
        let capability = match op_kind {
            LiquidOp::Aspirate => "aspirate_plate",
            LiquidOp::Dispense => "dispense_plate",
        };
        let head = self
            .head96
            .as_ref()
            .ok_or(HandlerError::NotImplemented(capability))?;
        let tips = head.tips().ok_or(HandlerError::Head96HasNoTip)?;
        if !volume.is_finite() || volume < 0.0 {
            return Err(VolumeError::InvalidVolume(volume).into());
        }
        let flow_rate = match flow_rate {
            Some(rate) => rate,
            None => op_kind.default_flow_rate(head.pipette())?,
        };

        let tree = self.deck.tree();
        let node = tree.node(plate)?;
        if !matches!(node.kind, ResourceKind::Plate(_)) {
            return Err(ResourceError::WrongKind {
                name: node.name().to_string(),
                expected: "plate",
                actual: node.kind.category(),
            }
            .into());
        }
        let wells = node.children().to_vec();

        let track_volume = self.tracking.is_enabled(TrackingKind::Volume);
        if track_volume {
            let tip_check = match op_kind {
                LiquidOp::Aspirate => tips.volume.check_add(volume, 0.0),
                LiquidOp::Dispense => tips.volume.check_remove(volume, 0.0),
            };
            tip_check.map_err(|source| HandlerError::TipVolume { channel: 0, source })?;
            for well in &wells {
                let tracker = tree.well(*well)?;
                let check = match op_kind {
                    LiquidOp::Aspirate => tracker.check_remove(volume, 0.0),
                    LiquidOp::Dispense => tracker.check_add(volume, 0.0),
                };
                check.map_err(|source| HandlerError::WellVolume {
                    well: tree.name_of(*well),
                    source,
                })?;
            }
        }
        let labware_id = self.registered_id(plate)?;

        debug!(labware = %labware_id, volume = volume, flow_rate = flow_rate, "{} with 96 head", op_kind.name());
        match op_kind {
            LiquidOp::Aspirate => {
                self.backend
                    .aspirate96(&labware_id, volume, flow_rate, Coordinate::zero())
                    .await?
            }
            LiquidOp::Dispense => {
                self.backend
                    .dispense96(&labware_id, volume, flow_rate, Coordinate::zero())
                    .await?
            }
        }

        if track_volume {
            for well in &wells {
                let tracker = self.deck.tree_mut().well_mut(*well)?;
                match op_kind {
                    LiquidOp::Aspirate => tracker.commit_remove(volume),
                    LiquidOp::Dispense => tracker.commit_add(volume),
                }
            }
            if let Some(tips) = self.head96.as_mut().and_then(Head96::tips_mut) {
                match op_kind {
                    LiquidOp::Aspirate => tips.volume.commit_add(volume),
                    LiquidOp::Dispense => tips.volume.commit_remove(volume),
                }
            }
        }
        Ok(())
    }

    async fn register_labware(&mut self, id: ResourceId, slot: u8) -> Result<(), HandlerError> {
        let node = self.deck.tree().node(id)?;
        if !node.kind.is_labware() {
            debug!(resource = %node.name(), slot = slot, "Not labware, skipping backend registration");
            return Ok(());
        }
        let definition = LabwareDefinition::from_tree(self.deck.tree(), id)?;
        let labware_id = self
            .backend
            .assigned_resource_callback(&definition, slot)
            .await?;
        info!(
            resource = %definition.display_name,
            labware_id = %labware_id,
            slot = slot,
            "Registered labware with backend"
        );
        self.labware_ids.insert(id, labware_id);
        Ok(())
    }

    fn ensure_setup(&self) -> Result<(), HandlerError> {
        if !self.setup_finished {
            return Err(HandlerError::NotSetup);
        }
        Ok(())
    }

    fn channel_state(&self, channel: usize) -> Result<&Channel, HandlerError> {
        self.channels
            .get(channel)
            .ok_or(HandlerError::NoSuchChannel(channel))
    }

    fn channel_state_mut(&mut self, channel: usize) -> Result<&mut Channel, HandlerError> {
        self.channels
            .get_mut(channel)
            .ok_or(HandlerError::NoSuchChannel(channel))
    }

    fn registered_id(&self, labware: ResourceId) -> Result<String, HandlerError> {
        self.labware_ids
            .get(&labware)
            .cloned()
            .ok_or_else(|| HandlerError::LabwareNotRegistered(self.deck.tree().name_of(labware)))
    }

    fn tip_rack_contents(&self, tip_rack: ResourceId) -> Result<(TipDefinition, Vec<ResourceId>), HandlerError> {
        let node = self.deck.tree().node(tip_rack)?;
        match &node.kind {
            ResourceKind::TipRack { tip, .. } => Ok((*tip, node.children().to_vec())),
            other => Err(ResourceError::WrongKind {
                name: node.name().to_string(),
                expected: "tip_rack",
                actual: other.category(),
            }
            .into()),
        }
    }

    /// Channels for a command of `count` targets
    fn resolve_channels(&self, use_channels: Option<&[usize]>, count: usize) -> Result<Vec<usize>, HandlerError> {
        let channels: Vec<usize> = match use_channels {
            Some(channels) => channels.to_vec(),
            None => self
                .channels
                .iter()
                .enumerate()
                .filter(|(_, c)| c.pipette().is_some())
                .map(|(i, _)| i)
                .take(count)
                .collect(),
        };
        if channels.len() != count {
            return Err(HandlerError::LengthMismatch {
                what: "channels",
                expected: count,
                actual: channels.len(),
            });
        }

        let mut seen = HashSet::new();
        for &channel in &channels {
            let state = self.channel_state(channel)?;
            if !seen.insert(channel) {
                return Err(HandlerError::DuplicateChannel(channel));
            }
            if state.pipette().is_none() {
                return Err(HandlerError::NoPipette(channel));
            }
        }
        Ok(channels)
    }

    /// Labware id and well name the backend knows a target by
    fn backend_target(&self, target: ResourceId, allow_wells: bool) -> Result<(String, String), HandlerError> {
        let tree = self.deck.tree();
        let node = tree.node(target)?;
        let accepted = match node.kind {
            ResourceKind::TipSpot(_) => true,
            ResourceKind::Well(_) => allow_wells,
            _ => false,
        };
        if !accepted {
            return Err(ResourceError::WrongKind {
                name: node.name().to_string(),
                expected: if allow_wells { "well or tip_spot" } else { "tip_spot" },
                actual: node.kind.category(),
            }
            .into());
        }

        let labware = node
            .parent()
            .and_then(|parent| tree.labware_of(parent))
            .ok_or_else(|| HandlerError::LabwareNotRegistered(node.name().to_string()))?;
        Ok((self.registered_id(labware)?, node.name().to_string()))
    }

    fn plan(
        &self,
        targets: &[ResourceId],
        options: &ChannelOptions,
        allow_wells: bool,
    ) -> Result<Vec<ChannelOp>, HandlerError> {
        if targets.is_empty() {
            return Err(HandlerError::NoTargets);
        }
        let channels = self.resolve_channels(options.use_channels.as_deref(), targets.len())?;
        let offsets = match &options.offsets {
            Some(offsets) if offsets.len() != targets.len() => {
                return Err(HandlerError::LengthMismatch {
                    what: "offsets",
                    expected: targets.len(),
                    actual: offsets.len(),
                })
            }
            Some(offsets) => offsets.clone(),
            None => vec![Coordinate::zero(); targets.len()],
        };

        targets
            .iter()
            .zip(channels)
            .zip(offsets)
            .map(|((&target, channel), offset)| {
                let (labware_id, well_name) = self.backend_target(target, allow_wells)?;
                let pipette_id = self
                    .channel_state(channel)?
                    .pipette()
                    .map(|p| p.id.clone())
                    .ok_or(HandlerError::NoPipette(channel))?;
                if let Ok(location) = self.deck.tree().absolute_location(target) {
                    tracing::trace!(resource = %well_name, location = %location, "Resolved target");
                }
                Ok(ChannelOp {
                    channel,
                    target,
                    labware_id,
                    well_name,
                    pipette_id,
                    offset,
                })
            })
            .collect()
    }
}

/// Scope guard returned by [`LiquidHandler::with_tracking`]
///
/// Derefs to the liquid handler, so commands are issued through the guard.
/// Dropping it restores the enclosing tracking setting, including on early
/// return and panic.
pub struct TrackingGuard<'a, B: LiquidHandlerBackend> {
    handler: &'a mut LiquidHandler<B>,
    kind: TrackingKind,
}

impl<B: LiquidHandlerBackend> Deref for TrackingGuard<'_, B> {
    type Target = LiquidHandler<B>;

    fn deref(&self) -> &LiquidHandler<B> {
        &*self.handler
    }
}

impl<B: LiquidHandlerBackend> DerefMut for TrackingGuard<'_, B> {
    fn deref_mut(&mut self) -> &mut LiquidHandler<B> {
        &mut *self.handler
    }
}

impl<B: LiquidHandlerBackend> Drop for TrackingGuard<'_, B> {
    fn drop(&mut self) {
        match self.handler.tracking.pop(self.kind) {
            Ok(_) => debug!(kind = %self.kind, "Left tracking scope"),
            Err(e) => warn!(error = %e, "Tracking scope was already closed"),
        }
    }
}
