//! Per-channel pipette and tip state

use pipetbot_core::{TipDefinition, VolumeTracker};

use crate::backend::Pipette;

/// A tip mounted on a channel, with the liquid it holds
#[derive(Debug, Clone, PartialEq)]
pub struct MountedTip {
    pub definition: TipDefinition,
    /// Name of the tip spot (or tip rack) the tip came from
    pub source: String,
    pub volume: VolumeTracker,
}

impl MountedTip {
    pub fn new(definition: TipDefinition, source: impl Into<String>) -> Self {
        Self {
            definition,
            source: source.into(),
            volume: VolumeTracker::new(definition.maximal_volume),
        }
    }
}

/// One physical pipetting channel
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pipette: Option<Pipette>,
    tip: Option<MountedTip>,
}

impl Channel {
    pub fn new(pipette: Option<Pipette>) -> Self {
        Self { pipette, tip: None }
    }

    pub fn pipette(&self) -> Option<&Pipette> {
        self.pipette.as_ref()
    }

    pub fn has_tip(&self) -> bool {
        self.tip.is_some()
    }

    pub fn tip(&self) -> Option<&MountedTip> {
        self.tip.as_ref()
    }

    pub(crate) fn tip_mut(&mut self) -> Option<&mut MountedTip> {
        self.tip.as_mut()
    }

    pub(crate) fn mount_tip(&mut self, tip: MountedTip) {
        self.tip = Some(tip);
    }

    pub(crate) fn remove_tip(&mut self) -> Option<MountedTip> {
        self.tip.take()
    }
}

/// The 96-channel head, moving all its tips together
#[derive(Debug, Clone, PartialEq)]
pub struct Head96 {
    pipette: Pipette,
    /// Every tip on the head holds the same liquid volume
    tips: Option<MountedTip>,
}

impl Head96 {
    pub fn new(pipette: Pipette) -> Self {
        Self {
            pipette,
            tips: None,
        }
    }

    pub fn pipette(&self) -> &Pipette {
        &self.pipette
    }

    pub fn has_tips(&self) -> bool {
        self.tips.is_some()
    }

    pub fn tips(&self) -> Option<&MountedTip> {
        self.tips.as_ref()
    }

    pub(crate) fn tips_mut(&mut self) -> Option<&mut MountedTip> {
        self.tips.as_mut()
    }

    pub(crate) fn mount_tips(&mut self, tips: MountedTip) {
        self.tips = Some(tips);
    }

    pub(crate) fn remove_tips(&mut self) -> Option<MountedTip> {
        self.tips.take()
    }
}
