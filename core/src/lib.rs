//! Landmark based Monte Carlo localization toolbox
//!
//! This crate estimates the planar pose (position and heading) of a moving vehicle with a particle filter. The
//! belief over the pose is represented as a fixed-size population of weighted hypotheses ("particles"). Each
//! estimation cycle moves every particle through a constant-turn-rate motion model, re-weights it against landmark
//! observations matched to a known map, and finally draws a new population in proportion to the weights.
//!
//! This crate is primarily built off of a small set of dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the rigid-body transforms between the vehicle and map frames.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provides random number generation for process and sensor noise.
//! - [`rstar`](https://crates.io/crates/rstar): Provides an R-tree for range queries against large landmark maps.
//!
//! All other functionality is auxiliary (e.g. configuration and dataset I/O).
//!
//! ## Crate overview
//!
//! - [association]: Landmark range queries and nearest-neighbor data association.
//! - [config]: Serializable filter configuration.
//! - [error]: The error type returned by the filter core.
//! - [map]: The static landmark map and its loader.
//! - [measurements]: Landmark observations, frame transforms and the Gaussian sensor model.
//! - [particle]: Particles, resampling strategies and the particle filter itself.
//! - [sim]: Offline replay of recorded datasets through the filter.
//!
//! ## Frames and conventions
//!
//! Two frames are used. The *map frame* is a fixed Cartesian frame in meters in which landmarks are surveyed. The
//! *vehicle frame* is attached to the vehicle with its x-axis pointing forward and its y-axis pointing to the left.
//! Headings are measured counter-clockwise from the map x-axis in radians. Headings are not wrapped by the motion
//! model; use [wrap_to_pi] when comparing them.
//!
//! ## Motion model
//!
//! The prediction step uses the constant-turn-rate ("bicycle") kinematic model:
//!
//! $$
//! x' = x + \frac{v}{\omega} \left( \sin(\theta + \omega \Delta t) - \sin \theta \right)
//! $$
//! $$
//! y' = y + \frac{v}{\omega} \left( \cos \theta - \cos(\theta + \omega \Delta t) \right)
//! $$
//! $$
//! \theta' = \theta + \omega \Delta t
//! $$
//!
//! Yaw rates with a magnitude below [YAW_RATE_EPSILON] are clamped to that threshold, which makes straight-line
//! motion the limiting case of the model rather than a division by zero.
pub mod association;
pub mod config;
pub mod error;
pub mod map;
pub mod measurements;
pub mod particle;
pub mod sim;

pub use error::{FilterError, Result};

use nalgebra::{Isometry2, Vector2};
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display};

/// Smallest yaw rate magnitude (rad/s) used by the motion model.
pub const YAW_RATE_EPSILON: f64 = 1e-5;

/// A planar pose in the map frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Position along the map x-axis in meters
    pub x: f64,
    /// Position along the map y-axis in meters
    pub y: f64,
    /// Heading in radians, counter-clockwise from the map x-axis
    pub theta: f64,
}
impl Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pose {{ x: {:.4}, y: {:.4}, theta: {:.4} }}",
            self.x, self.y, self.theta
        )
    }
}
impl From<[f64; 3]> for Pose {
    fn from(values: [f64; 3]) -> Self {
        Pose::new(values[0], values[1], values[2])
    }
}
impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Pose { x, y, theta }
    }
    /// Rigid transform taking vehicle-frame points into the map frame.
    pub fn isometry(&self) -> Isometry2<f64> {
        Isometry2::new(Vector2::new(self.x, self.y), self.theta)
    }
    /// Euclidean distance from this pose's position to a map-frame point.
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}

/// Commanded motion over a single control interval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlInput {
    /// Forward velocity in m/s
    pub velocity: f64,
    /// Yaw rate in rad/s, positive counter-clockwise
    pub yaw_rate: f64,
}
impl Display for ControlInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ControlInput {{ velocity: {:.4}, yaw_rate: {:.4} }}",
            self.velocity, self.yaw_rate
        )
    }
}
impl ControlInput {
    pub fn new(velocity: f64, yaw_rate: f64) -> Self {
        ControlInput { velocity, yaw_rate }
    }
}

/// Per-axis standard deviations of a pose: `[σx (m), σy (m), σθ (rad)]`.
///
/// Used both for the spread of the initial particle cloud and for the process noise injected by the
/// prediction step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseNoise {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}
impl From<[f64; 3]> for PoseNoise {
    fn from(values: [f64; 3]) -> Self {
        PoseNoise::new(values[0], values[1], values[2])
    }
}
impl PoseNoise {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        PoseNoise { x, y, theta }
    }
    /// Noise-free configuration, useful for deterministic propagation.
    pub fn zero() -> Self {
        PoseNoise::default()
    }
    /// Check that every standard deviation is finite and non-negative.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("x", self.x), ("y", self.y), ("theta", self.theta)] {
            if !value.is_finite() || value < 0.0 {
                return Err(FilterError::InvalidParameter(format!(
                    "pose noise standard deviation '{name}' must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Deterministic constant-turn-rate propagation of a pose.
///
/// This is the noise-free part of the prediction step. It is a pure function of its inputs so that it can be
/// applied to any number of particles independently.
///
/// # Arguments
/// * `pose` - The pose at the start of the interval
/// * `control` - The commanded velocity and yaw rate over the interval
/// * `dt` - The length of the interval in seconds
///
/// # Example
/// ```rust
/// use mcl::{forward, ControlInput, Pose};
///
/// let pose = Pose::new(0.0, 0.0, 0.0);
/// let next = forward(&pose, &ControlInput::new(1.0, 0.0), 1.0);
/// assert!((next.x - 1.0).abs() < 1e-4);
/// assert!(next.y.abs() < 1e-4);
/// ```
pub fn forward(pose: &Pose, control: &ControlInput, dt: f64) -> Pose {
    let yaw_rate = clamp_yaw_rate(control.yaw_rate);
    let radius = control.velocity / yaw_rate;
    let theta_1 = pose.theta + yaw_rate * dt;
    Pose {
        x: pose.x + radius * (theta_1.sin() - pose.theta.sin()),
        y: pose.y + radius * (pose.theta.cos() - theta_1.cos()),
        theta: theta_1,
    }
}
/// Keep the yaw rate away from zero while preserving the turning direction.
fn clamp_yaw_rate(yaw_rate: f64) -> f64 {
    if yaw_rate.abs() >= YAW_RATE_EPSILON {
        yaw_rate
    } else if yaw_rate < 0.0 {
        -YAW_RATE_EPSILON
    } else {
        YAW_RATE_EPSILON
    }
}

/// Wrap an angle to the range -π to π radians
///
/// # Example
/// ```rust
/// use mcl::wrap_to_pi;
/// use std::f64::consts::PI;
/// assert!((wrap_to_pi(3.0 * PI) - PI).abs() < 1e-12);
/// ```
pub fn wrap_to_pi(angle: f64) -> f64 {
    let mut wrapped = angle;
    while wrapped > std::f64::consts::PI {
        wrapped -= 2.0 * std::f64::consts::PI;
    }
    while wrapped < -std::f64::consts::PI {
        wrapped += 2.0 * std::f64::consts::PI;
    }
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_wrap_to_pi() {
        assert_approx_eq!(wrap_to_pi(3.0 * PI), PI, 1e-12);
        assert_approx_eq!(wrap_to_pi(-3.0 * PI), -PI, 1e-12);
        assert_eq!(wrap_to_pi(0.0), 0.0);
        assert_eq!(wrap_to_pi(PI), PI);
        assert_eq!(wrap_to_pi(-PI), -PI);
    }
    #[test]
    fn test_forward_turning() {
        // Quarter circle of radius 1 turning left from the origin
        let pose = Pose::new(0.0, 0.0, 0.0);
        let next = forward(&pose, &ControlInput::new(FRAC_PI_2, FRAC_PI_2), 1.0);
        assert_approx_eq!(next.x, 1.0, 1e-12);
        assert_approx_eq!(next.y, 1.0, 1e-12);
        assert_approx_eq!(next.theta, FRAC_PI_2, 1e-12);
    }
    #[test]
    fn test_forward_right_turn() {
        let pose = Pose::new(0.0, 0.0, 0.0);
        let next = forward(&pose, &ControlInput::new(FRAC_PI_2, -FRAC_PI_2), 1.0);
        assert_approx_eq!(next.x, 1.0, 1e-12);
        assert_approx_eq!(next.y, -1.0, 1e-12);
        assert_approx_eq!(next.theta, -FRAC_PI_2, 1e-12);
    }
    #[test]
    fn test_forward_straight_line_limit() {
        let pose = Pose::new(2.0, -1.0, 0.6);
        let control = ControlInput::new(3.0, 0.0);
        let dt = 0.5;
        let next = forward(&pose, &control, dt);
        assert_approx_eq!(next.x, 2.0 + 3.0 * dt * 0.6_f64.cos(), 1e-4);
        assert_approx_eq!(next.y, -1.0 + 3.0 * dt * 0.6_f64.sin(), 1e-4);
        assert_approx_eq!(next.theta, 0.6, 1e-4);
    }
    #[test]
    fn test_forward_small_negative_yaw_rate() {
        let pose = Pose::new(0.0, 0.0, 0.0);
        let next = forward(&pose, &ControlInput::new(1.0, -1e-9), 1.0);
        assert_approx_eq!(next.x, 1.0, 1e-4);
        assert!(next.theta < 0.0);
    }
    #[test]
    fn test_forward_is_deterministic() {
        let pose = Pose::new(1.5, 2.5, -0.3);
        let control = ControlInput::new(4.0, 0.2);
        let a = forward(&pose, &control, 0.1);
        let b = forward(&pose, &control, 0.1);
        assert_eq!(a, b);
    }
    #[test]
    fn test_pose_isometry_matches_rigid_transform() {
        let pose = Pose::new(4.0, 5.0, -FRAC_PI_2);
        let p = pose.isometry() * nalgebra::Point2::new(2.0, 2.0);
        assert_approx_eq!(p.x, 6.0, 1e-12);
        assert_approx_eq!(p.y, 3.0, 1e-12);
    }
    #[test]
    fn test_pose_noise_validation() {
        assert!(PoseNoise::new(0.3, 0.3, 0.01).validate().is_ok());
        assert!(PoseNoise::zero().validate().is_ok());
        assert!(PoseNoise::new(-0.1, 0.3, 0.01).validate().is_err());
        assert!(PoseNoise::new(0.1, f64::NAN, 0.01).validate().is_err());
    }
}
