//! Tip definitions and tip spot state

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TipError {
    #[error("Tip spot {0} has no tip")]
    NoTipInSpot(String),
    #[error("Tip spot {0} already holds a tip")]
    SpotOccupied(String),
}

/// Physical properties of a disposable tip
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TipDefinition {
    pub has_filter: bool,
    /// Overall tip length in millimeters
    pub total_tip_length: f64,
    /// Largest volume the tip can hold, in microliters
    pub maximal_volume: f64,
    /// Depth the pipette nozzle enters the tip, in millimeters
    #[serde(default)]
    pub fitting_depth: f64,
}

/// Tip presence in a tip spot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TipSpotState {
    pub tip: TipDefinition,
    #[serde(default = "default_true")]
    has_tip: bool,
}

fn default_true() -> bool {
    true
}

impl TipSpotState {
    /// A freshly racked spot, holding its tip
    pub fn new(tip: TipDefinition) -> Self {
        Self { tip, has_tip: true }
    }

    pub fn has_tip(&self) -> bool {
        self.has_tip
    }

    /// Validate a pick up without changing state
    pub fn check_take(&self, spot: &str) -> Result<(), TipError> {
        if !self.has_tip {
            return Err(TipError::NoTipInSpot(spot.to_string()));
        }
        Ok(())
    }

    /// Validate a drop without changing state
    pub fn check_return(&self, spot: &str) -> Result<(), TipError> {
        if self.has_tip {
            return Err(TipError::SpotOccupied(spot.to_string()));
        }
        Ok(())
    }

    /// Remove the tip from the spot
    pub fn take_tip(&mut self, spot: &str) -> Result<TipDefinition, TipError> {
        self.check_take(spot)?;
        self.has_tip = false;
        Ok(self.tip)
    }

    /// Put a tip back into the spot
    pub fn return_tip(&mut self, spot: &str) -> Result<(), TipError> {
        self.check_return(spot)?;
        self.has_tip = true;
        Ok(())
    }

    /// Force the presence flag, e.g. for partially used racks
    pub fn set_has_tip(&mut self, has_tip: bool) {
        self.has_tip = has_tip;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tip() -> TipDefinition {
        TipDefinition {
            has_filter: true,
            total_tip_length: 39.2,
            maximal_volume: 20.0,
            fitting_depth: 8.25,
        }
    }

    #[test]
    fn test_take_and_return() {
        let mut spot = TipSpotState::new(tip());
        assert!(spot.has_tip());

        let taken = spot.take_tip("A1").unwrap();
        assert_eq!(taken.maximal_volume, 20.0);
        assert!(!spot.has_tip());

        spot.return_tip("A1").unwrap();
        assert!(spot.has_tip());
    }

    #[test]
    fn test_take_from_empty_spot() {
        let mut spot = TipSpotState::new(tip());
        spot.set_has_tip(false);
        assert_eq!(spot.take_tip("A1"), Err(TipError::NoTipInSpot("A1".to_string())));
    }

    #[test]
    fn test_return_into_occupied_spot() {
        let mut spot = TipSpotState::new(tip());
        assert_eq!(spot.return_tip("A1"), Err(TipError::SpotOccupied("A1".to_string())));
    }
}
