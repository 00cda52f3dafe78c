//! pipetbot Handler - Liquid handler orchestration and backend interface
//!
//! This crate sits between protocols and hardware:
//! - The [`LiquidHandler`] validates pipetting commands against deck state
//! - Scoped tracking guards switch volume and tip bookkeeping on and off
//! - The [`LiquidHandlerBackend`] trait is implemented per robot
//! - Backends serialize to a tagged description and are rebuilt from one

pub mod backend;
pub mod channel;
pub mod config;
pub mod description;
pub mod error;
pub mod handler;
pub mod recording;
pub mod tracking;

pub use backend::{BackendError, LiquidHandlerBackend, Mount, Pipette};
pub use channel::{Channel, Head96, MountedTip};
pub use config::LiquidHandlerConfig;
pub use description::{BackendDescription, BackendRegistry, DeserializeBackend};
pub use error::{ErrorKind, HandlerError};
pub use handler::{ChannelOptions, LiquidHandler, TrackingGuard};
pub use recording::{BackendCall, RecordingBackend};
pub use tracking::{TrackingContext, TrackingError, TrackingKind};
