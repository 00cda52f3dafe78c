//! Scoped toggles for automatic volume and tip bookkeeping
//!
//! Each kind of tracking is a stack of booleans. The bottom entry comes from
//! [`LiquidHandlerConfig`](crate::config::LiquidHandlerConfig) and can never
//! be popped; scopes push on entry and pop on exit, so leaving a scope always
//! restores whatever the enclosing scope had set.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingKind {
    /// Well and tip liquid volumes
    Volume,
    /// Tip presence in tip spots
    Tip,
}

impl std::fmt::Display for TrackingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackingKind::Volume => write!(f, "volume"),
            TrackingKind::Tip => write!(f, "tip"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackingError {
    #[error("No {0} tracking scope to exit")]
    StackUnderflow(TrackingKind),
}

/// Tracking state owned by one liquid handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingContext {
    volume: Vec<bool>,
    tip: Vec<bool>,
}

impl TrackingContext {
    pub fn new(volume_tracking: bool, tip_tracking: bool) -> Self {
        Self {
            volume: vec![volume_tracking],
            tip: vec![tip_tracking],
        }
    }

    fn stack(&self, kind: TrackingKind) -> &Vec<bool> {
        match kind {
            TrackingKind::Volume => &self.volume,
            TrackingKind::Tip => &self.tip,
        }
    }

    fn stack_mut(&mut self, kind: TrackingKind) -> &mut Vec<bool> {
        match kind {
            TrackingKind::Volume => &mut self.volume,
            TrackingKind::Tip => &mut self.tip,
        }
    }

    pub fn is_enabled(&self, kind: TrackingKind) -> bool {
        self.stack(kind).last().copied().unwrap_or(true)
    }

    /// Number of open scopes above the configured base
    pub fn depth(&self, kind: TrackingKind) -> usize {
        self.stack(kind).len().saturating_sub(1)
    }

    /// Enter a scope with tracking set to `enabled`
    pub fn push(&mut self, kind: TrackingKind, enabled: bool) {
        self.stack_mut(kind).push(enabled);
    }

    /// Leave the innermost scope, returning the setting it had
    pub fn pop(&mut self, kind: TrackingKind) -> Result<bool, TrackingError> {
        let stack = self.stack_mut(kind);
        if stack.len() <= 1 {
            return Err(TrackingError::StackUnderflow(kind));
        }
        Ok(stack.pop().unwrap_or(true))
    }
}

impl Default for TrackingContext {
    fn default() -> Self {
        Self::new(true, true)
    }
}
