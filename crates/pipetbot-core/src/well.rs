//! Liquid volume bookkeeping for wells and tips

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VolumeError {
    #[error("Too little liquid: tried to remove {requested} uL, only {available} uL available")]
    TooLittleLiquid { requested: f64, available: f64 },
    #[error("Too little capacity: tried to add {requested} uL, only {available} uL free")]
    TooLittleCapacity { requested: f64, available: f64 },
    #[error("Invalid volume: {0} uL")]
    InvalidVolume(f64),
}

/// Current and maximum volume of a liquid container, in microliters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeTracker {
    max_volume: f64,
    #[serde(default)]
    volume: f64,
}

impl VolumeTracker {
    /// Create an empty tracker
    pub fn new(max_volume: f64) -> Self {
        Self {
            max_volume,
            volume: 0.0,
        }
    }

    pub fn max_volume(&self) -> f64 {
        self.max_volume
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn free_volume(&self) -> f64 {
        self.max_volume - self.volume
    }

    /// Overwrite the current volume, e.g. when filling a plate before a run
    pub fn set_volume(&mut self, volume: f64) -> Result<(), VolumeError> {
        if !volume.is_finite() || volume < 0.0 {
            return Err(VolumeError::InvalidVolume(volume));
        }
        if volume > self.max_volume {
            return Err(VolumeError::TooLittleCapacity {
                requested: volume,
                available: self.max_volume,
            });
        }
        self.volume = volume;
        Ok(())
    }

    /// Check that `volume` can be removed after `pending` has already been removed
    pub fn check_remove(&self, volume: f64, pending: f64) -> Result<(), VolumeError> {
        validate(volume)?;
        let available = self.volume - pending;
        if volume > available {
            return Err(VolumeError::TooLittleLiquid {
                requested: volume,
                available,
            });
        }
        Ok(())
    }

    /// Check that `volume` fits after `pending` has already been added
    pub fn check_add(&self, volume: f64, pending: f64) -> Result<(), VolumeError> {
        validate(volume)?;
        let available = self.free_volume() - pending;
        if volume > available {
            return Err(VolumeError::TooLittleCapacity {
                requested: volume,
                available,
            });
        }
        Ok(())
    }

    pub fn remove_liquid(&mut self, volume: f64) -> Result<(), VolumeError> {
        self.check_remove(volume, 0.0)?;
        self.volume -= volume;
        Ok(())
    }

    pub fn add_liquid(&mut self, volume: f64) -> Result<(), VolumeError> {
        self.check_add(volume, 0.0)?;
        self.volume += volume;
        Ok(())
    }

    /// Record a removal that was already validated, clamped to `[0, max]`
    pub fn commit_remove(&mut self, volume: f64) {
        self.volume = (self.volume - volume).clamp(0.0, self.max_volume);
    }

    /// Record an addition that was already validated, clamped to `[0, max]`
    pub fn commit_add(&mut self, volume: f64) {
        self.volume = (self.volume + volume).clamp(0.0, self.max_volume);
    }
}

fn validate(volume: f64) -> Result<(), VolumeError> {
    if !volume.is_finite() || volume < 0.0 {
        return Err(VolumeError::InvalidVolume(volume));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove() {
        let mut tracker = VolumeTracker::new(100.0);
        tracker.add_liquid(60.0).unwrap();
        tracker.remove_liquid(25.0).unwrap();
        assert_eq!(tracker.volume(), 35.0);
        assert_eq!(tracker.free_volume(), 65.0);
    }

    #[test]
    fn test_commit_clamps_rounding_error() {
        let mut tracker = VolumeTracker::new(1.0);
        tracker.set_volume(0.6).unwrap();
        for volume in [0.15, 0.3, 0.15] {
            tracker.commit_remove(volume);
        }
        assert!(tracker.volume() >= 0.0);
        assert!(tracker.volume() < 1e-9);

        tracker.commit_add(0.7);
        tracker.commit_add(0.3000001);
        assert_eq!(tracker.volume(), 1.0);
    }

    #[test]
    fn test_remove_more_than_available() {
        let mut tracker = VolumeTracker::new(100.0);
        tracker.add_liquid(10.0).unwrap();
        let err = tracker.remove_liquid(10.5).unwrap_err();
        assert!(matches!(err, VolumeError::TooLittleLiquid { .. }));
        assert_eq!(tracker.volume(), 10.0);
    }

    #[test]
    fn test_add_beyond_capacity() {
        let mut tracker = VolumeTracker::new(100.0);
        tracker.set_volume(95.0).unwrap();
        let err = tracker.add_liquid(6.0).unwrap_err();
        assert!(matches!(err, VolumeError::TooLittleCapacity { .. }));
        assert_eq!(tracker.volume(), 95.0);
    }

    #[test]
    fn test_pending_volume_is_accounted() {
        let mut tracker = VolumeTracker::new(100.0);
        tracker.set_volume(20.0).unwrap();
        assert!(tracker.check_remove(15.0, 0.0).is_ok());
        assert!(tracker.check_remove(15.0, 10.0).is_err());
        assert!(tracker.check_add(70.0, 10.0).is_ok());
        assert!(tracker.check_add(71.0, 10.0).is_err());
    }

    #[test]
    fn test_negative_volume_rejected() {
        let mut tracker = VolumeTracker::new(100.0);
        assert_eq!(tracker.add_liquid(-1.0), Err(VolumeError::InvalidVolume(-1.0)));
        assert!(tracker.set_volume(f64::NAN).is_err());
    }
}
