//! Particle filter for landmark based localization.
//!
//! The filter keeps a fixed-size population of weighted pose hypotheses and runs the classic four stage cycle:
//!
//! 1. [ParticleFilter::init]: seed the population around a single noisy pose estimate (e.g. GPS).
//! 2. [ParticleFilter::predict]: move every particle through the constant-turn-rate model and add process noise.
//! 3. [ParticleFilter::update_weights]: transform the observations into the map frame for each particle, associate
//!    them with the nearest in-range landmark and weight the particle by the product of Gaussian likelihoods.
//! 4. [ParticleFilter::resample]: draw a new population with replacement in proportion to the weights.
//!
//! Prediction and weighting treat every particle independently. Weighting can therefore run on the rayon thread
//! pool; prediction stays sequential because all particles draw their noise from the filter's single seeded
//! random number generator.
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};
use std::str::FromStr;

use crate::association::{LandmarkIndex, associate};
use crate::config::FilterConfig;
use crate::error::{FilterError, Result};
use crate::measurements::{LandmarkNoise, LandmarkObservation};
use crate::{ControlInput, Pose, PoseNoise, forward};

/// A single weighted pose hypothesis.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Particle {
    /// Identifier, unique within a cycle and 1-based. Not an index into the particle set.
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    pub weight: f64,
    /// Ids of the landmarks matched during the last weighting pass.
    pub associations: Vec<i32>,
    /// Map-frame x-coordinates of the matched observations.
    pub sense_x: Vec<f64>,
    /// Map-frame y-coordinates of the matched observations.
    pub sense_y: Vec<f64>,
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("id", &self.id)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("theta", &self.theta)
            .field("weight", &self.weight)
            .field("associations", &self.associations.len())
            .finish()
    }
}
impl Particle {
    pub fn new(id: usize, pose: Pose, weight: f64) -> Particle {
        Particle {
            id,
            x: pose.x,
            y: pose.y,
            theta: pose.theta,
            weight,
            ..Particle::default()
        }
    }
    pub fn pose(&self) -> Pose {
        Pose::new(self.x, self.y, self.theta)
    }
    fn set_pose(&mut self, pose: Pose) {
        self.x = pose.x;
        self.y = pose.y;
        self.theta = pose.theta;
    }
    /// Attach association diagnostics for external reporting.
    ///
    /// The filter itself never reads these fields.
    pub fn set_associations(&mut self, associations: Vec<i32>, sense_x: Vec<f64>, sense_y: Vec<f64>) {
        self.associations = associations;
        self.sense_x = sense_x;
        self.sense_y = sense_y;
    }
    /// Matched landmark ids separated by single spaces.
    pub fn get_associations(&self) -> String {
        join_values(&self.associations)
    }
    /// Matched map-frame coordinates along one axis, separated by single spaces.
    ///
    /// Each value is printed with [SENSE_COORD_DIGITS] significant digits.
    pub fn get_sense_coord(&self, axis: Axis) -> String {
        let values = match axis {
            Axis::X => &self.sense_x,
            Axis::Y => &self.sense_y,
        };
        values
            .iter()
            .map(|&v| format_significant(v, SENSE_COORD_DIGITS))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
fn join_values<T: Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Significant digits of each coordinate in [Particle::get_sense_coord].
pub const SENSE_COORD_DIGITS: usize = 6;

/// Format a value with at most `digits` significant digits, trailing zeros dropped.
///
/// Magnitudes below `1e-4` or at least `10^digits` switch to scientific notation (`1.5e-7`).
fn format_significant(value: f64, digits: usize) -> String {
    if value == 0.0 || !value.is_finite() {
        return value.to_string();
    }
    let digits = digits.max(1);
    let exponent = value.abs().log10().floor() as i32;
    if exponent < -4 || exponent >= digits as i32 {
        let formatted = format!("{:.*e}", digits - 1, value);
        return match formatted.split_once('e') {
            Some((mantissa, exp)) => format!("{}e{}", trim_fraction(mantissa), exp),
            None => formatted,
        };
    }
    let decimals = (digits as i32 - 1 - exponent).max(0) as usize;
    trim_fraction(&format!("{:.*}", decimals, value)).to_string()
}
fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Coordinate axis selector for [Particle::get_sense_coord].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}
impl FromStr for Axis {
    type Err = FilterError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "X" => Ok(Axis::X),
            "Y" => Ok(Axis::Y),
            _ => Err(FilterError::InvalidParameter(format!(
                "unknown axis '{s}', expected X or Y"
            ))),
        }
    }
}

/// How a new particle population is drawn from the weighted one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum ResamplingStrategy {
    /// Stochastic ("resampling wheel") walk with uniform steps up to twice the maximum weight
    #[default]
    Wheel,
    /// Low-variance systematic resampling with a single random offset
    Systematic,
    /// Deterministic copies of the integer part of `N·w`, systematic draw on the remainders
    Residual,
}
impl ResamplingStrategy {
    /// Draw `weights.len()` indices into the weighted population.
    pub fn resample<R: Rng + ?Sized>(&self, weights: &[f64], rng: &mut R) -> Vec<usize> {
        match self {
            ResamplingStrategy::Wheel => wheel_resample(weights, rng),
            ResamplingStrategy::Systematic => systematic_resample(weights, rng),
            ResamplingStrategy::Residual => residual_resample(weights, rng),
        }
    }
}

fn max_weight(weights: &[f64]) -> f64 {
    weights.iter().copied().fold(0.0, f64::max)
}

/// Weights divided by their maximum, with negative and non-finite entries zeroed.
///
/// Every strategy works on these so that unnormalized weights near the edges of the `f64` range cannot overflow
/// or underflow the sampling ranges. `None` when no weight is positive and finite.
fn scaled_weights(weights: &[f64]) -> Option<Vec<f64>> {
    let w_max = weights
        .iter()
        .copied()
        .filter(|w| w.is_finite())
        .fold(0.0, f64::max);
    if weights.is_empty() || !(w_max > 0.0) {
        return None;
    }
    Some(
        weights
            .iter()
            .map(|&w| if w.is_finite() && w > 0.0 { w / w_max } else { 0.0 })
            .collect(),
    )
}

/// Resampling wheel.
///
/// Starting at a uniformly random index, an offset `β` is advanced by `U[0, 2·w_max)` for every draw and walked
/// around the wheel of weights until it falls inside a particle's slot. If no weight is positive the identity
/// selection is returned.
pub fn wheel_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let Some(weights) = scaled_weights(weights) else {
        return (0..n).collect();
    };
    // w_max is 1 after scaling
    let mut index = rng.random_range(0..n);
    let mut beta = 0.0;
    let mut selected = Vec::with_capacity(n);
    for _ in 0..n {
        beta += rng.random_range(0.0..2.0);
        while beta > weights[index] {
            beta -= weights[index];
            index = (index + 1) % n;
        }
        selected.push(index);
    }
    selected
}

/// Systematic resampling over the (not necessarily normalized) weights.
pub fn systematic_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let Some(weights) = scaled_weights(weights) else {
        return (0..n).collect();
    };
    // total lies in [1, n], so the step never underflows
    let total: f64 = weights.iter().sum();
    let step = total / n as f64;
    let mut position = rng.random_range(0.0..step);
    let mut selected = Vec::with_capacity(n);
    let mut i = 0;
    let mut cumsum = weights[0];
    for _ in 0..n {
        while position > cumsum && i + 1 < n {
            i += 1;
            cumsum += weights[i];
        }
        selected.push(i);
        position += step;
    }
    selected
}

/// Residual resampling.
///
/// Each particle first receives `floor(N·w_i)` copies (with normalized weights); the remaining slots are filled by
/// a systematic pass over the fractional remainders.
pub fn residual_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let Some(weights) = scaled_weights(weights) else {
        return (0..n).collect();
    };
    let total: f64 = weights.iter().sum();
    let mut selected = Vec::with_capacity(n);
    let mut residual = vec![0.0; n];
    for (i, &w) in weights.iter().enumerate() {
        let expected = w / total * n as f64;
        let copies = expected.floor() as usize;
        residual[i] = expected - copies as f64;
        selected.extend(std::iter::repeat_n(i, copies.min(n - selected.len())));
    }
    let remaining = n - selected.len();
    if remaining > 0 {
        let sum_residual: f64 = residual.iter().sum();
        let step = sum_residual / remaining as f64;
        let mut u = rng.random::<f64>() * step;
        let mut i = 0;
        let mut cumsum = residual[0];
        for _ in 0..remaining {
            while u > cumsum && i + 1 < n {
                i += 1;
                cumsum += residual[i];
            }
            selected.push(i);
            u += step;
        }
    }
    selected
}

/// What [ParticleFilter::estimate] reports as the current pose.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum PoseEstimateStrategy {
    /// The pose of the single highest-weight particle
    #[default]
    HighestWeight,
    /// Weight-averaged position with the heading averaged on the unit circle
    WeightedMean,
}

/// Monte Carlo localization filter.
///
/// # Example
///
/// ```rust
/// use mcl::particle::ParticleFilter;
/// use mcl::map::{LandmarkMap, MapLandmark};
/// use mcl::measurements::{LandmarkNoise, LandmarkObservation};
/// use mcl::{ControlInput, Pose, PoseNoise};
///
/// let map = LandmarkMap::new(vec![MapLandmark::new(1, 1.0, 0.0)]).unwrap();
/// let mut pf = ParticleFilter::new(5, 42).unwrap();
/// pf.init(&Pose::new(0.0, 0.0, 0.0), &PoseNoise::zero()).unwrap();
/// pf.predict(1.0, &PoseNoise::zero(), &ControlInput::new(1.0, 0.0)).unwrap();
/// pf.update_weights(10.0, &LandmarkNoise::new(0.3, 0.3), &[LandmarkObservation::new(0.0, 0.0)], &map)
///     .unwrap();
/// pf.resample().unwrap();
/// assert_eq!(pf.particles().len(), 5);
/// ```
#[derive(Clone)]
pub struct ParticleFilter {
    num_particles: usize,
    particles: Vec<Particle>,
    is_initialized: bool,
    resampling_strategy: ResamplingStrategy,
    estimate_strategy: PoseEstimateStrategy,
    parallel: bool,
    rng: StdRng,
}
impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min_weight = self
            .particles
            .iter()
            .map(|p| p.weight)
            .fold(f64::INFINITY, f64::min);
        let max_weight = self.particles.iter().map(|p| p.weight).fold(0.0, f64::max);
        let mut s = f.debug_struct("ParticleFilter");
        s.field("num_particles", &self.num_particles)
            .field("is_initialized", &self.is_initialized)
            .field("resampling_strategy", &self.resampling_strategy)
            .field("effective_particles", &self.effective_sample_size());
        if self.is_initialized {
            s.field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            );
        }
        if let Some(estimate) = self.estimate() {
            s.field(
                "estimate",
                &format_args!("({:.3}, {:.3}, {:.4} rad)", estimate.x, estimate.y, estimate.theta),
            );
        }
        s.finish()
    }
}
impl ParticleFilter {
    /// Create an uninitialized filter holding `num_particles` particles once [ParticleFilter::init] runs.
    ///
    /// # Arguments
    /// * `num_particles` - Fixed population size, must be positive
    /// * `seed` - Seed of the filter's random number generator
    pub fn new(num_particles: usize, seed: u64) -> Result<Self> {
        if num_particles == 0 {
            return Err(FilterError::InvalidParameter(
                "number of particles must be positive".to_string(),
            ));
        }
        Ok(ParticleFilter {
            num_particles,
            particles: Vec::new(),
            is_initialized: false,
            resampling_strategy: ResamplingStrategy::default(),
            estimate_strategy: PoseEstimateStrategy::default(),
            parallel: false,
            rng: StdRng::seed_from_u64(seed),
        })
    }
    /// Create an uninitialized filter from a validated configuration.
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        config.validate()?;
        Ok(ParticleFilter::new(config.num_particles, config.seed)?
            .with_resampling_strategy(config.resampling_strategy)
            .with_estimate_strategy(config.estimate_strategy)
            .with_parallel(config.parallel))
    }
    pub fn with_resampling_strategy(mut self, strategy: ResamplingStrategy) -> Self {
        self.resampling_strategy = strategy;
        self
    }
    pub fn with_estimate_strategy(mut self, strategy: PoseEstimateStrategy) -> Self {
        self.estimate_strategy = strategy;
        self
    }
    /// Weight particles on the rayon thread pool.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }
    pub fn num_particles(&self) -> usize {
        self.num_particles
    }
    /// Read-only access to the current particle set (empty before initialization).
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }
    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized {
            Ok(())
        } else {
            Err(FilterError::NotInitialized)
        }
    }
    /// Seed the particle set around an initial pose estimate.
    ///
    /// Each coordinate is drawn independently from a Gaussian centered on the estimate. All weights start at 1.0
    /// and particle `i` receives id `i + 1`.
    pub fn init(&mut self, pose: &Pose, std: &PoseNoise) -> Result<()> {
        if self.is_initialized {
            return Err(FilterError::AlreadyInitialized);
        }
        std.validate()?;
        let dist_x = normal(pose.x, std.x)?;
        let dist_y = normal(pose.y, std.y)?;
        let dist_theta = normal(pose.theta, std.theta)?;
        let mut particles = Vec::with_capacity(self.num_particles);
        for i in 0..self.num_particles {
            let sampled = Pose::new(
                dist_x.sample(&mut self.rng),
                dist_y.sample(&mut self.rng),
                dist_theta.sample(&mut self.rng),
            );
            particles.push(Particle::new(i + 1, sampled, 1.0));
        }
        self.particles = particles;
        self.is_initialized = true;
        debug!(
            "Initialized {} particles around {}",
            self.num_particles, pose
        );
        Ok(())
    }
    /// Propagate every particle over one control interval.
    ///
    /// # Arguments
    /// * `dt` - Interval length in seconds
    /// * `std` - Standard deviations of the zero-mean process noise added to x, y and theta
    /// * `control` - Commanded velocity and yaw rate
    pub fn predict(&mut self, dt: f64, std: &PoseNoise, control: &ControlInput) -> Result<()> {
        self.ensure_initialized()?;
        if !dt.is_finite() || dt < 0.0 {
            return Err(FilterError::InvalidParameter(format!(
                "time step must be finite and non-negative, got {dt}"
            )));
        }
        std.validate()?;
        let noise_x = normal(0.0, std.x)?;
        let noise_y = normal(0.0, std.y)?;
        let noise_theta = normal(0.0, std.theta)?;
        for particle in self.particles.iter_mut() {
            let predicted = forward(&particle.pose(), control, dt);
            particle.set_pose(Pose::new(
                predicted.x + noise_x.sample(&mut self.rng),
                predicted.y + noise_y.sample(&mut self.rng),
                predicted.theta + noise_theta.sample(&mut self.rng),
            ));
        }
        debug!("Predicted {} particles with {}", self.particles.len(), control);
        Ok(())
    }
    /// Weight every particle against a batch of vehicle-frame observations and normalize the weights.
    ///
    /// On [FilterError::ZeroTotalWeight] the unnormalized weights are left in place (all zero or non-finite in
    /// sum); deciding on a recovery such as [ParticleFilter::set_uniform_weights] is up to the caller.
    ///
    /// # Arguments
    /// * `sensor_range` - Landmarks farther than this from a particle are not considered for association
    /// * `noise` - Landmark measurement noise
    /// * `observations` - Observations in the vehicle frame
    /// * `index` - Range query over the landmark map
    pub fn update_weights<I: LandmarkIndex + ?Sized>(
        &mut self,
        sensor_range: f64,
        noise: &LandmarkNoise,
        observations: &[LandmarkObservation],
        index: &I,
    ) -> Result<()> {
        self.ensure_initialized()?;
        if sensor_range.is_nan() || sensor_range < 0.0 {
            return Err(FilterError::InvalidParameter(format!(
                "sensor range must be non-negative, got {sensor_range}"
            )));
        }
        noise.validate()?;
        if self.parallel {
            self.particles.par_iter_mut().try_for_each(|particle| {
                weigh_particle(particle, sensor_range, noise, observations, index)
            })?;
        } else {
            self.particles.iter_mut().try_for_each(|particle| {
                weigh_particle(particle, sensor_range, noise, observations, index)
            })?;
        }
        self.normalize_weights()
    }
    fn normalize_weights(&mut self) -> Result<()> {
        let total: f64 = self.particles.iter().map(|p| p.weight).sum();
        if !(total > 0.0 && total.is_finite()) {
            warn!(
                "Total particle weight is {} across {} particles; weights left unnormalized",
                total,
                self.particles.len()
            );
            return Err(FilterError::ZeroTotalWeight(total));
        }
        for particle in self.particles.iter_mut() {
            particle.weight /= total;
        }
        Ok(())
    }
    /// Reset every weight to `1/N`.
    pub fn set_uniform_weights(&mut self) {
        let uniform = 1.0 / self.particles.len().max(1) as f64;
        for particle in self.particles.iter_mut() {
            particle.weight = uniform;
        }
    }
    /// Replace the particle set with a weighted draw (with replacement) from itself.
    ///
    /// The new set has the same size and fresh ids `1..=N`. If no particle has a positive, finite weight the set
    /// is left unchanged.
    pub fn resample(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        let weights: Vec<f64> = self.particles.iter().map(|p| p.weight).collect();
        let w_max = max_weight(&weights);
        if !(w_max > 0.0 && w_max.is_finite()) {
            warn!("Maximum particle weight is {}; skipping resampling", w_max);
            return Ok(());
        }
        let selected = self.resampling_strategy.resample(&weights, &mut self.rng);
        self.particles = selected
            .into_iter()
            .enumerate()
            .map(|(i, k)| {
                let mut particle = self.particles[k].clone();
                particle.id = i + 1;
                particle
            })
            .collect();
        debug!(
            "Resampled {} particles, effective sample size now {:.1}",
            self.particles.len(),
            self.effective_sample_size()
        );
        Ok(())
    }
    /// The particle with the highest weight (the first one on ties).
    pub fn best_particle(&self) -> Option<&Particle> {
        let mut best: Option<&Particle> = None;
        for particle in &self.particles {
            match best {
                Some(b) if particle.weight <= b.weight => {}
                _ => best = Some(particle),
            }
        }
        best
    }
    /// Weight-averaged pose, with the heading averaged as a unit vector.
    pub fn weighted_mean(&self) -> Option<Pose> {
        let total: f64 = self.particles.iter().map(|p| p.weight).sum();
        if !(total > 0.0 && total.is_finite()) {
            return None;
        }
        let (mut x, mut y, mut sin, mut cos) = (0.0, 0.0, 0.0, 0.0);
        for particle in &self.particles {
            let w = particle.weight / total;
            x += w * particle.x;
            y += w * particle.y;
            sin += w * particle.theta.sin();
            cos += w * particle.theta.cos();
        }
        Some(Pose::new(x, y, sin.atan2(cos)))
    }
    /// Current pose estimate according to the configured [PoseEstimateStrategy].
    pub fn estimate(&self) -> Option<Pose> {
        match self.estimate_strategy {
            PoseEstimateStrategy::HighestWeight => self.best_particle().map(Particle::pose),
            PoseEstimateStrategy::WeightedMean => self.weighted_mean(),
        }
    }
    /// N_eff = 1 / sum(w_i^2) over the normalized weights
    pub fn effective_sample_size(&self) -> f64 {
        let total: f64 = self.particles.iter().map(|p| p.weight).sum();
        if !(total > 0.0 && total.is_finite()) {
            return 0.0;
        }
        let sum_of_squares: f64 = self
            .particles
            .iter()
            .map(|p| (p.weight / total).powi(2))
            .sum();
        1.0 / sum_of_squares
    }
}

fn normal(mean: f64, std_dev: f64) -> Result<Normal<f64>> {
    Normal::new(mean, std_dev).map_err(|e| FilterError::InvalidParameter(e.to_string()))
}

/// Compute one particle's unnormalized weight and record its association diagnostics.
///
/// Observations that could not be associated (no landmark in range) contribute the multiplicative identity.
fn weigh_particle<I: LandmarkIndex + ?Sized>(
    particle: &mut Particle,
    sensor_range: f64,
    noise: &LandmarkNoise,
    observations: &[LandmarkObservation],
    index: &I,
) -> Result<()> {
    let pose = particle.pose();
    let mut transformed: Vec<LandmarkObservation> =
        observations.iter().map(|o| o.to_map_frame(&pose)).collect();
    let candidates = index.landmarks_in_range(pose.x, pose.y, sensor_range);
    associate(&candidates, &mut transformed);

    let mut weight = 1.0;
    let mut associations = Vec::with_capacity(transformed.len());
    let mut sense_x = Vec::with_capacity(transformed.len());
    let mut sense_y = Vec::with_capacity(transformed.len());
    for observation in &transformed {
        let Some(id) = observation.id else {
            continue;
        };
        let landmark = index.landmark(id).ok_or(FilterError::UnknownLandmark(id))?;
        weight *= noise.likelihood(observation, landmark);
        associations.push(id);
        sense_x.push(observation.x);
        sense_y.push(observation.y);
    }
    particle.weight = weight;
    particle.set_associations(associations, sense_x, sense_y);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{LandmarkMap, MapLandmark};
    use assert_approx_eq::assert_approx_eq;

    fn single_landmark_map() -> LandmarkMap {
        LandmarkMap::new(vec![MapLandmark::new(1, 1.0, 0.0)]).unwrap()
    }
    fn initialized_filter(n: usize, seed: u64, std: PoseNoise) -> ParticleFilter {
        let mut pf = ParticleFilter::new(n, seed).unwrap();
        pf.init(&Pose::new(1.0, 2.0, 0.5), &std).unwrap();
        pf
    }

    #[test]
    fn test_init_assigns_ids_and_unit_weights() {
        let pf = initialized_filter(100, 1, PoseNoise::new(0.3, 0.3, 0.01));
        assert!(pf.is_initialized());
        assert_eq!(pf.particles().len(), 100);
        for (i, particle) in pf.particles().iter().enumerate() {
            assert_eq!(particle.id, i + 1);
            assert_eq!(particle.weight, 1.0);
        }
    }
    #[test]
    fn test_init_zero_noise_copies_estimate() {
        let pf = initialized_filter(10, 1, PoseNoise::zero());
        for particle in pf.particles() {
            assert_eq!(particle.pose(), Pose::new(1.0, 2.0, 0.5));
        }
    }
    #[test]
    fn test_init_spread_matches_noise() {
        let pf = initialized_filter(5000, 3, PoseNoise::new(2.0, 0.5, 0.1));
        let n = pf.particles().len() as f64;
        let mean_x = pf.particles().iter().map(|p| p.x).sum::<f64>() / n;
        let var_x = pf
            .particles()
            .iter()
            .map(|p| (p.x - mean_x).powi(2))
            .sum::<f64>()
            / n;
        assert_approx_eq!(mean_x, 1.0, 0.1);
        assert_approx_eq!(var_x.sqrt(), 2.0, 0.1);
    }
    #[test]
    fn test_init_twice_is_rejected() {
        let mut pf = initialized_filter(10, 1, PoseNoise::zero());
        assert_eq!(
            pf.init(&Pose::default(), &PoseNoise::zero()),
            Err(FilterError::AlreadyInitialized)
        );
    }
    #[test]
    fn test_zero_particles_is_rejected() {
        assert!(matches!(
            ParticleFilter::new(0, 1),
            Err(FilterError::InvalidParameter(_))
        ));
    }
    #[test]
    fn test_negative_noise_is_rejected() {
        let mut pf = ParticleFilter::new(10, 1).unwrap();
        assert!(pf.init(&Pose::default(), &PoseNoise::new(-1.0, 0.0, 0.0)).is_err());
        assert!(!pf.is_initialized());
    }
    #[test]
    fn test_operations_before_init_fail() {
        let mut pf = ParticleFilter::new(10, 1).unwrap();
        let map = single_landmark_map();
        assert_eq!(
            pf.predict(0.1, &PoseNoise::zero(), &ControlInput::new(1.0, 0.0)),
            Err(FilterError::NotInitialized)
        );
        assert_eq!(
            pf.update_weights(10.0, &LandmarkNoise::default(), &[], &map),
            Err(FilterError::NotInitialized)
        );
        assert_eq!(pf.resample(), Err(FilterError::NotInitialized));
        assert!(pf.particles().is_empty());
    }
    #[test]
    fn test_predict_zero_noise_is_deterministic() {
        let mut pf = initialized_filter(20, 9, PoseNoise::zero());
        let control = ControlInput::new(3.0, 0.4);
        pf.predict(0.1, &PoseNoise::zero(), &control).unwrap();
        let expected = forward(&Pose::new(1.0, 2.0, 0.5), &control, 0.1);
        for particle in pf.particles() {
            assert_eq!(particle.pose(), expected);
            assert_eq!(particle.weight, 1.0);
        }
    }
    #[test]
    fn test_predict_with_noise_centered_on_model() {
        let mut pf = initialized_filter(4000, 11, PoseNoise::zero());
        let control = ControlInput::new(5.0, 0.1);
        pf.predict(1.0, &PoseNoise::new(0.3, 0.3, 0.01), &control)
            .unwrap();
        let expected = forward(&Pose::new(1.0, 2.0, 0.5), &control, 1.0);
        let n = pf.particles().len() as f64;
        let mean_x = pf.particles().iter().map(|p| p.x).sum::<f64>() / n;
        let mean_y = pf.particles().iter().map(|p| p.y).sum::<f64>() / n;
        assert_approx_eq!(mean_x, expected.x, 0.05);
        assert_approx_eq!(mean_y, expected.y, 0.05);
        assert!(pf.particles().iter().any(|p| p.x != expected.x));
    }
    #[test]
    fn test_update_weights_normalizes() {
        let mut pf = initialized_filter(200, 5, PoseNoise::new(0.5, 0.5, 0.05));
        let map = LandmarkMap::new(vec![
            MapLandmark::new(1, 5.0, 3.0),
            MapLandmark::new(2, 2.0, 1.0),
            MapLandmark::new(3, 6.0, 1.0),
        ])
        .unwrap();
        let observations = vec![
            LandmarkObservation::new(2.0, 2.0),
            LandmarkObservation::new(3.0, -2.0),
        ];
        pf.update_weights(50.0, &LandmarkNoise::new(0.3, 0.3), &observations, &map)
            .unwrap();
        let total: f64 = pf.particles().iter().map(|p| p.weight).sum();
        assert_approx_eq!(total, 1.0, 1e-9);
        for particle in pf.particles() {
            assert_eq!(particle.associations.len(), 2);
            assert_eq!(particle.sense_x.len(), 2);
        }
    }
    #[test]
    fn test_no_landmarks_in_range_gives_uniform_weights() {
        let mut pf = initialized_filter(10, 5, PoseNoise::new(0.5, 0.5, 0.05));
        let map = LandmarkMap::new(vec![MapLandmark::new(1, 500.0, 500.0)]).unwrap();
        pf.update_weights(
            10.0,
            &LandmarkNoise::default(),
            &[LandmarkObservation::new(1.0, 0.0)],
            &map,
        )
        .unwrap();
        for particle in pf.particles() {
            assert_approx_eq!(particle.weight, 0.1, 1e-12);
            assert!(particle.associations.is_empty());
        }
    }
    #[test]
    fn test_no_observations_gives_uniform_weights() {
        let mut pf = initialized_filter(4, 5, PoseNoise::new(0.5, 0.5, 0.05));
        pf.update_weights(10.0, &LandmarkNoise::default(), &[], &single_landmark_map())
            .unwrap();
        for particle in pf.particles() {
            assert_approx_eq!(particle.weight, 0.25, 1e-12);
        }
    }
    #[test]
    fn test_zero_total_weight_is_reported_and_resample_is_noop() {
        let mut pf = ParticleFilter::new(6, 2).unwrap();
        pf.init(&Pose::default(), &PoseNoise::new(0.1, 0.1, 0.01))
            .unwrap();
        let before: Vec<Pose> = pf.particles().iter().map(Particle::pose).collect();
        let result = pf.update_weights(
            10.0,
            &LandmarkNoise::new(0.01, 0.01),
            &[LandmarkObservation::new(-100.0, 0.0)],
            &single_landmark_map(),
        );
        assert_eq!(result, Err(FilterError::ZeroTotalWeight(0.0)));
        assert!(pf.particles().iter().all(|p| p.weight == 0.0));

        pf.resample().unwrap();
        let after: Vec<Pose> = pf.particles().iter().map(Particle::pose).collect();
        assert_eq!(before, after);

        pf.set_uniform_weights();
        assert!(pf.particles().iter().all(|p| p.weight == 1.0 / 6.0));
    }
    #[test]
    fn test_parallel_weighting_matches_sequential() {
        let map = LandmarkMap::new(vec![
            MapLandmark::new(1, 5.0, 3.0),
            MapLandmark::new(2, 2.0, 1.0),
            MapLandmark::new(3, 6.0, 1.0),
        ])
        .unwrap();
        let observations = vec![
            LandmarkObservation::new(2.0, 2.0),
            LandmarkObservation::new(3.0, -2.0),
        ];
        let mut sequential = initialized_filter(300, 8, PoseNoise::new(1.0, 1.0, 0.1));
        let mut parallel = initialized_filter(300, 8, PoseNoise::new(1.0, 1.0, 0.1)).with_parallel(true);
        for pf in [&mut sequential, &mut parallel] {
            pf.update_weights(20.0, &LandmarkNoise::new(0.5, 0.5), &observations, &map)
                .unwrap();
        }
        assert_eq!(sequential.particles(), parallel.particles());
    }
    #[test]
    fn test_resample_keeps_cardinality_and_renumbers() {
        for strategy in [
            ResamplingStrategy::Wheel,
            ResamplingStrategy::Systematic,
            ResamplingStrategy::Residual,
        ] {
            let mut pf = initialized_filter(50, 4, PoseNoise::new(1.0, 1.0, 0.1))
                .with_resampling_strategy(strategy);
            pf.update_weights(
                30.0,
                &LandmarkNoise::new(0.5, 0.5),
                &[LandmarkObservation::new(0.0, 0.0)],
                &single_landmark_map(),
            )
            .unwrap();
            pf.resample().unwrap();
            assert_eq!(pf.particles().len(), 50);
            let ids: Vec<usize> = pf.particles().iter().map(|p| p.id).collect();
            assert_eq!(ids, (1..=50).collect::<Vec<_>>());
        }
    }
    #[test]
    fn test_wheel_resample_proportional() {
        let weights = [0.1, 0.2, 0.7];
        let mut rng = StdRng::seed_from_u64(1234);
        let mut counts = [0usize; 3];
        let mut draws = 0;
        while draws < 100_000 {
            for i in wheel_resample(&weights, &mut rng) {
                counts[i] += 1;
                draws += 1;
            }
        }
        // Three-draw passes start from a uniform index, which skews frequencies by about 1%
        for (count, weight) in counts.iter().zip(weights) {
            assert_approx_eq!(*count as f64 / draws as f64, weight, 0.02);
        }
    }
    #[test]
    fn test_systematic_and_residual_proportional() {
        let weights: Vec<f64> = [0.1, 0.2, 0.7]
            .iter()
            .cycle()
            .take(300)
            .map(|w| w / 100.0)
            .collect();
        let mut rng = StdRng::seed_from_u64(99);
        for strategy in [ResamplingStrategy::Systematic, ResamplingStrategy::Residual] {
            let mut counts = [0usize; 3];
            for _ in 0..200 {
                for i in strategy.resample(&weights, &mut rng) {
                    counts[i % 3] += 1;
                }
            }
            let total = counts.iter().sum::<usize>() as f64;
            assert_approx_eq!(counts[0] as f64 / total, 0.1, 0.01);
            assert_approx_eq!(counts[1] as f64 / total, 0.2, 0.01);
            assert_approx_eq!(counts[2] as f64 / total, 0.7, 0.01);
        }
    }
    #[test]
    fn test_resample_zero_weights_returns_identity() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(wheel_resample(&[0.0, 0.0, 0.0], &mut rng), vec![0, 1, 2]);
        assert_eq!(systematic_resample(&[0.0, 0.0], &mut rng), vec![0, 1]);
        assert_eq!(residual_resample(&[0.0], &mut rng), vec![0]);
        assert!(wheel_resample(&[], &mut rng).is_empty());
    }
    #[test]
    fn test_resample_extreme_weights_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(5);
        for strategy in [
            ResamplingStrategy::Wheel,
            ResamplingStrategy::Systematic,
            ResamplingStrategy::Residual,
        ] {
            let huge = strategy.resample(&[f64::MAX, f64::MAX], &mut rng);
            assert_eq!(huge.len(), 2);
            assert!(huge.iter().all(|&i| i < 2));
            // total / n underflows to zero without scaling
            let tiny = strategy.resample(&[5e-324, 0.0, 0.0], &mut rng);
            assert_eq!(tiny, vec![0, 0, 0]);
            let mixed = strategy.resample(&[f64::NAN, 1.0, -2.0], &mut rng);
            assert_eq!(mixed, vec![1, 1, 1]);
        }
    }
    #[test]
    fn test_resample_after_overflowing_total_weight() {
        let mut pf = ParticleFilter::new(2, 6).unwrap();
        pf.init(&Pose::new(1.0, 0.0, 0.0), &PoseNoise::zero())
            .unwrap();
        let map = LandmarkMap::new(vec![MapLandmark::new(1, 1.0, 0.0)]).unwrap();
        let result = pf.update_weights(
            10.0,
            &LandmarkNoise::new(4e-155, 4e-155),
            &[LandmarkObservation::new(0.0, 0.0)],
            &map,
        );
        assert_eq!(result, Err(FilterError::ZeroTotalWeight(f64::INFINITY)));
        assert!(pf.particles().iter().all(|p| p.weight.is_finite()));

        pf.resample().unwrap();
        assert_eq!(pf.particles().len(), 2);
        for particle in pf.particles() {
            assert_eq!(particle.pose(), Pose::new(1.0, 0.0, 0.0));
        }
    }
    #[test]
    fn test_best_particle_and_weighted_mean() {
        let mut pf = ParticleFilter::new(3, 1).unwrap();
        pf.init(&Pose::default(), &PoseNoise::zero()).unwrap();
        pf.particles[0].set_pose(Pose::new(0.0, 0.0, 0.1));
        pf.particles[1].set_pose(Pose::new(2.0, 4.0, -0.1));
        pf.particles[2].set_pose(Pose::new(4.0, 8.0, 0.0));
        pf.particles[0].weight = 0.25;
        pf.particles[1].weight = 0.5;
        pf.particles[2].weight = 0.25;
        assert_eq!(pf.best_particle().unwrap().id, 2);
        assert_eq!(pf.estimate(), Some(Pose::new(2.0, 4.0, -0.1)));

        let mean = pf.weighted_mean().unwrap();
        assert_approx_eq!(mean.x, 2.0, 1e-12);
        assert_approx_eq!(mean.y, 4.0, 1e-12);
        assert!(mean.theta < 0.0 && mean.theta > -0.1);

        let pf = pf.with_estimate_strategy(PoseEstimateStrategy::WeightedMean);
        assert_eq!(pf.estimate(), Some(mean));
        assert_approx_eq!(pf.effective_sample_size(), 1.0 / 0.375, 1e-12);
    }
    #[test]
    fn test_weighted_mean_heading_wraps() {
        let mut pf = ParticleFilter::new(2, 1).unwrap();
        pf.init(&Pose::default(), &PoseNoise::zero()).unwrap();
        pf.particles[0].theta = std::f64::consts::PI - 0.1;
        pf.particles[1].theta = -std::f64::consts::PI + 0.1;
        let mean = pf.weighted_mean().unwrap();
        assert_approx_eq!(mean.theta.abs(), std::f64::consts::PI, 1e-9);
    }
    #[test]
    fn test_association_diagnostics() {
        let mut particle = Particle::new(1, Pose::default(), 1.0);
        particle.set_associations(vec![3, 14, 15], vec![1.5, -2.0, 10.25], vec![0.5, 4.0, -7.0]);
        assert_eq!(particle.get_associations(), "3 14 15");
        assert_eq!(particle.get_sense_coord(Axis::X), "1.5 -2 10.25");
        assert_eq!(particle.get_sense_coord(Axis::Y), "0.5 4 -7");
        assert_eq!(Particle::default().get_associations(), "");
        assert_eq!(Particle::default().get_sense_coord(Axis::X), "");
    }
    #[test]
    fn test_sense_coord_six_significant_digits() {
        let mut particle = Particle::default();
        particle.set_associations(
            vec![1, 2, 3, 4],
            vec![3.14159265, 123456.78, 0.000123456789, -2.5e-7],
            vec![1234567.0, 0.0, 99.99999999, -0.1],
        );
        assert_eq!(particle.get_sense_coord(Axis::X), "3.14159 123457 0.000123457 -2.5e-7");
        assert_eq!(particle.get_sense_coord(Axis::Y), "1.23457e6 0 100 -0.1");
    }
    #[test]
    fn test_axis_parsing() {
        assert_eq!("X".parse::<Axis>(), Ok(Axis::X));
        assert_eq!("y".parse::<Axis>(), Ok(Axis::Y));
        assert!("z".parse::<Axis>().is_err());
    }
    #[test]
    fn test_update_records_sense_coordinates() {
        let mut pf = ParticleFilter::new(1, 1).unwrap();
        pf.init(&Pose::new(4.0, 5.0, -std::f64::consts::FRAC_PI_2), &PoseNoise::zero())
            .unwrap();
        let map = LandmarkMap::new(vec![
            MapLandmark::new(1, 5.0, 3.0),
            MapLandmark::new(2, 2.0, 1.0),
        ])
        .unwrap();
        pf.update_weights(
            50.0,
            &LandmarkNoise::new(0.3, 0.3),
            &[LandmarkObservation::new(2.0, 2.0)],
            &map,
        )
        .unwrap();
        let particle = &pf.particles()[0];
        assert_eq!(particle.associations, vec![1]);
        assert_approx_eq!(particle.sense_x[0], 6.0, 1e-9);
        assert_approx_eq!(particle.sense_y[0], 3.0, 1e-9);
        assert_approx_eq!(particle.weight, 1.0, 1e-12);
    }
}
