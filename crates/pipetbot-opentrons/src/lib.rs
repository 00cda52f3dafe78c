//! pipetbot Opentrons - OT-2 backend for the liquid handler
//!
//! The robot is reached through the [`OtApi`] capability, which the HTTP
//! client implements. This crate turns resolved liquid handler commands into
//! calls on it and translates labware into Opentrons definitions.

pub mod api;
pub mod backend;
pub mod labware;
pub mod pipettes;

pub use api::{LabwareLoad, MountedPipette, OtApi};
pub use backend::OpentronsBackend;
pub use labware::OtLabwareDefinition;
pub use pipettes::{default_flow_rates, FlowRates};
