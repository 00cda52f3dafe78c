//! Liquid handler configuration

use serde::{Deserialize, Serialize};

use crate::tracking::TrackingContext;

/// Settings fixed when a liquid handler is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidHandlerConfig {
    /// Track well and tip volumes unless a scope disables it
    #[serde(default = "default_true")]
    pub volume_tracking: bool,
    /// Track tip presence in tip spots unless a scope disables it
    #[serde(default = "default_true")]
    pub tip_tracking: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LiquidHandlerConfig {
    fn default() -> Self {
        Self {
            volume_tracking: true,
            tip_tracking: true,
        }
    }
}

impl LiquidHandlerConfig {
    /// Tracking context whose base matches this configuration
    pub fn tracking_context(&self) -> TrackingContext {
        TrackingContext::new(self.volume_tracking, self.tip_tracking)
    }
}
