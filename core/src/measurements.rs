//! Landmark observations and the Gaussian landmark sensor model.
//!
//! The vehicle's sensor reports the position of nearby landmarks relative to the vehicle (vehicle frame) without
//! knowing which map landmark produced each return. Observations are transformed into the map frame using a
//! particle's pose, associated with map landmarks, and scored with an axis-aligned bivariate Gaussian.
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt::{self, Display};

use crate::Pose;
use crate::error::{FilterError, Result};
use crate::map::MapLandmark;

/// A single landmark return.
///
/// Freshly sensed observations are in the vehicle frame and carry no landmark id. After transformation into the
/// map frame and data association, `id` holds the id of the matched map landmark.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkObservation {
    /// x-coordinate in meters (vehicle frame when sensed, map frame after transformation)
    pub x: f64,
    /// y-coordinate in meters
    pub y: f64,
    /// Associated map landmark, if any
    #[serde(skip)]
    pub id: Option<i32>,
}
impl Display for LandmarkObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "LandmarkObservation(-> {}: {:.3}, {:.3})", id, self.x, self.y),
            None => write!(f, "LandmarkObservation(?: {:.3}, {:.3})", self.x, self.y),
        }
    }
}
impl LandmarkObservation {
    pub fn new(x: f64, y: f64) -> Self {
        LandmarkObservation { x, y, id: None }
    }
    /// Transform a vehicle-frame observation into the map frame as seen from `pose`.
    ///
    /// `xm = xp + xc cos θ - yc sin θ`, `ym = yp + xc sin θ + yc cos θ`. The association is cleared.
    pub fn to_map_frame(&self, pose: &Pose) -> LandmarkObservation {
        let p = pose.isometry() * Point2::new(self.x, self.y);
        LandmarkObservation {
            x: p.x,
            y: p.y,
            id: None,
        }
    }
    /// Squared Euclidean distance to a map landmark.
    pub fn distance_squared_to(&self, landmark: &MapLandmark) -> f64 {
        let dx = self.x - landmark.x;
        let dy = self.y - landmark.y;
        dx * dx + dy * dy
    }
}

/// Landmark sensor noise: standard deviations `[σx (m), σy (m)]` of a map-frame landmark position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LandmarkNoise {
    pub x: f64,
    pub y: f64,
}
impl Default for LandmarkNoise {
    fn default() -> Self {
        LandmarkNoise { x: 0.3, y: 0.3 }
    }
}
impl From<[f64; 2]> for LandmarkNoise {
    fn from(values: [f64; 2]) -> Self {
        LandmarkNoise::new(values[0], values[1])
    }
}
impl LandmarkNoise {
    pub fn new(x: f64, y: f64) -> Self {
        LandmarkNoise { x, y }
    }
    /// Both standard deviations must be finite and strictly positive.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("x", self.x), ("y", self.y)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(FilterError::InvalidParameter(format!(
                    "landmark noise standard deviation '{name}' must be finite and positive, got {value}"
                )));
            }
        }
        Ok(())
    }
    /// Bivariate (zero-correlation) Gaussian density of an observation about a landmark.
    ///
    /// $$
    /// L = \frac{1}{2 \pi \sigma_x \sigma_y} \exp\left(-\frac{(x - \mu_x)^2}{2 \sigma_x^2} - \frac{(y - \mu_y)^2}{2 \sigma_y^2}\right)
    /// $$
    pub fn likelihood(&self, observation: &LandmarkObservation, landmark: &MapLandmark) -> f64 {
        let normalizer = 1.0 / (2.0 * PI * self.x * self.y);
        let exponent_x = (observation.x - landmark.x).powi(2) / (2.0 * self.x.powi(2));
        let exponent_y = (observation.y - landmark.y).powi(2) / (2.0 * self.y.powi(2));
        normalizer * (-(exponent_x + exponent_y)).exp()
    }
}
