//! Angle conventions for the reflectance setup.
//!
//! The operator thinks in the reflectance convention ("user angles"); the
//! motion controller's native reference frame is sign-inverted relative to it
//! ("device angles"). Mixing the two in one variable is the classic way to
//! send the stage to the wrong side of the sample, so the two frames are
//! distinct types and every crossing goes through [`UserAngle::to_device`] /
//! [`DeviceAngle::to_user`]. The motion port only ever sees [`DeviceAngle`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// An angle in the operator-facing reflectance convention, in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserAngle(f64);

/// An angle in the motion controller's native reference frame, in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAngle(f64);

impl UserAngle {
    /// Wrap a user-convention angle in degrees.
    pub fn new(degrees: f64) -> Self {
        Self(degrees)
    }

    /// The angle in degrees.
    pub fn degrees(self) -> f64 {
        self.0
    }

    /// Convert to the motion controller's frame (sign inversion).
    pub fn to_device(self) -> DeviceAngle {
        DeviceAngle(-self.0)
    }
}

impl DeviceAngle {
    /// Wrap a device-frame angle in degrees.
    pub fn new(degrees: f64) -> Self {
        Self(degrees)
    }

    /// The angle in degrees.
    pub fn degrees(self) -> f64 {
        self.0
    }

    /// Convert back to the operator-facing convention (sign inversion).
    pub fn to_user(self) -> UserAngle {
        UserAngle(-self.0)
    }
}

impl fmt::Display for UserAngle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}°", self.0)
    }
}

impl fmt::Display for DeviceAngle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}°(dev)", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_contract() {
        assert_eq!(UserAngle::new(45.0).to_device(), DeviceAngle::new(-45.0));
        assert_eq!(DeviceAngle::new(-45.0).to_user(), UserAngle::new(45.0));
    }

    #[test]
    fn round_trips_exactly() {
        for x in [0.0, 1.0, -12.5, 45.0, 89.999, 360.25, -720.125] {
            assert_eq!(UserAngle::new(x).to_device().to_user(), UserAngle::new(x));
            assert_eq!(DeviceAngle::new(x).to_user().to_device(), DeviceAngle::new(x));
        }
    }

    #[test]
    fn zero_is_shared() {
        // -0.0 == 0.0, so the origin is the same in both frames.
        assert_eq!(UserAngle::new(0.0).to_device().degrees(), 0.0);
    }
}
