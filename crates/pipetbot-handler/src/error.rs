//! Liquid handler errors and their classification

use pipetbot_core::{ResourceError, TipError, VolumeError};
use thiserror::Error;

use crate::backend::BackendError;
use crate::tracking::TrackingError;

/// Coarse classification of a [`HandlerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Tip or volume state forbids the command
    State,
    /// A slot or single-child resource is occupied, or a tracking scope was misused
    Capacity,
    /// The backend (or its hardware) lacks the requested capability
    NotImplementedCapability,
    /// The backend failed while talking to the hardware
    BackendProtocol,
    /// The command itself is malformed
    Usage,
}

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Liquid handler is not set up")]
    NotSetup,
    #[error("Command has no targets")]
    NoTargets,
    #[error("Expected {expected} {what}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Channel {0} does not exist")]
    NoSuchChannel(usize),
    #[error("Channel {0} is used more than once in one command")]
    DuplicateChannel(usize),
    #[error("Channel {0} has no pipette mounted")]
    NoPipette(usize),
    #[error("Channel {channel} already has a tip")]
    ChannelHasTip { channel: usize },
    #[error("Channel {channel} has no tip")]
    ChannelHasNoTip { channel: usize },
    #[error("96-channel head already has tips")]
    Head96HasTip,
    #[error("96-channel head has no tips")]
    Head96HasNoTip,
    #[error("Pipette {pipette} has no default {operation} flow rate")]
    NoDefaultFlowRate {
        operation: &'static str,
        pipette: String,
    },
    #[error("Labware {0} is not registered with the backend")]
    LabwareNotRegistered(String),
    #[error("{0} is not supported by the backend")]
    NotImplemented(&'static str),
    #[error("Well {well}: {source}")]
    WellVolume {
        well: String,
        #[source]
        source: VolumeError,
    },
    #[error("Tip on channel {channel}: {source}")]
    TipVolume {
        channel: usize,
        #[source]
        source: VolumeError,
    },
    #[error(transparent)]
    Volume(#[from] VolumeError),
    #[error(transparent)]
    Tip(#[from] TipError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Tracking(#[from] TrackingError),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

impl HandlerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::ChannelHasTip { .. }
            | HandlerError::ChannelHasNoTip { .. }
            | HandlerError::Head96HasTip
            | HandlerError::Head96HasNoTip
            | HandlerError::WellVolume { .. }
            | HandlerError::TipVolume { .. }
            | HandlerError::Volume(_)
            | HandlerError::Tip(_) => ErrorKind::State,
            HandlerError::Resource(
                ResourceError::SlotOccupied { .. } | ResourceError::ResourceFull { .. },
            )
            | HandlerError::Tracking(_) => ErrorKind::Capacity,
            HandlerError::NotImplemented(_) | HandlerError::Backend(BackendError::NotImplemented(_)) => {
                ErrorKind::NotImplementedCapability
            }
            HandlerError::Backend(_) => ErrorKind::BackendProtocol,
            _ => ErrorKind::Usage,
        }
    }
}
