//! Offline replay of recorded localization datasets.
//!
//! A dataset directory holds the landmark map, the control inputs, the ground-truth trajectory, and one
//! observation file per timestep:
//!
//! ```text
//! <dir>/map_data.txt                       x y id
//! <dir>/control_data.txt                   velocity yaw_rate
//! <dir>/gt_data.txt                        x y theta
//! <dir>/observation/observations_000001.txt  x y   (vehicle frame)
//! ```
//!
//! The files have no header row and may be tab, comma or space delimited. [run_localization] drives a
//! [ParticleFilter] through the recorded timesteps and scores its pose estimate against ground truth.
use log::{debug, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::association::{LandmarkIndex, RTreeLandmarkIndex};
use crate::config::{ErrorLimits, FilterConfig, SpatialIndexKind};
use crate::error::{FilterError, Result};
use crate::map::LandmarkMap;
use crate::measurements::{LandmarkNoise, LandmarkObservation};
use crate::particle::ParticleFilter;
use crate::{ControlInput, Pose, PoseNoise, wrap_to_pi};

pub const MAP_FILE: &str = "map_data.txt";
pub const CONTROL_FILE: &str = "control_data.txt";
pub const GROUND_TRUTH_FILE: &str = "gt_data.txt";
pub const OBSERVATION_DIR: &str = "observation";

/// Path of the observation file for a 1-based timestep.
pub fn observation_path<P: AsRef<Path>>(dir: P, step: usize) -> PathBuf {
    dir.as_ref()
        .join(OBSERVATION_DIR)
        .join(format!("observations_{step:06}.txt"))
}

/// Reads headerless, delimited records into any positional serde type.
///
/// The delimiter is taken from the first non-empty line: a tab if present, otherwise a comma, otherwise runs of
/// whitespace.
pub fn read_records<T: DeserializeOwned, P: AsRef<Path>>(
    path: P,
) -> std::result::Result<Vec<T>, Box<dyn Error>> {
    let content = fs::read_to_string(path)?;
    let first_line = content.lines().find(|line| !line.trim().is_empty());
    let (delimiter, content) = match first_line {
        Some(line) if line.contains('\t') => (b'\t', content),
        Some(line) if line.contains(',') => (b',', content),
        _ => {
            let collapsed: Vec<String> = content
                .lines()
                .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
                .collect();
            (b' ', collapsed.join("\n"))
        }
    };
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: T = result?;
        records.push(record);
    }
    Ok(records)
}

/// Writes records as space delimited rows without a header, the layout [read_records] accepts.
pub fn write_records<T: Serialize, P: AsRef<Path>>(records: &[T], path: P) -> io::Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(b' ')
        .from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// A recorded run: map, controls, ground truth and per-step observations.
#[derive(Clone, Debug)]
pub struct Dataset {
    pub map: LandmarkMap,
    /// Control applied over the interval following each timestep.
    pub controls: Vec<ControlInput>,
    pub ground_truth: Vec<Pose>,
    /// Vehicle-frame observations for each timestep.
    pub observations: Vec<Vec<LandmarkObservation>>,
}
impl Dataset {
    /// Load a dataset directory.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mcl::sim::Dataset;
    ///
    /// let dataset = Dataset::from_dir("./data").expect("Failed to read dataset");
    /// println!("{} timesteps", dataset.len());
    /// ```
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> std::result::Result<Self, Box<dyn Error>> {
        let dir = dir.as_ref();
        let map = LandmarkMap::from_file(dir.join(MAP_FILE))?;
        let controls: Vec<ControlInput> = read_records(dir.join(CONTROL_FILE))?;
        let ground_truth: Vec<Pose> = read_records(dir.join(GROUND_TRUTH_FILE))?;
        if ground_truth.len() != controls.len() {
            return Err(format!(
                "dataset '{}' has {} control rows but {} ground truth rows",
                dir.display(),
                controls.len(),
                ground_truth.len()
            )
            .into());
        }
        let mut observations = Vec::with_capacity(controls.len());
        for step in 1..=controls.len() {
            let path = observation_path(dir, step);
            let batch: Vec<LandmarkObservation> = read_records(&path)
                .map_err(|e| format!("failed to read '{}': {}", path.display(), e))?;
            observations.push(batch);
        }
        info!(
            "Loaded dataset '{}': {} landmarks, {} timesteps",
            dir.display(),
            map.len(),
            controls.len()
        );
        Ok(Dataset {
            map,
            controls,
            ground_truth,
            observations,
        })
    }
    /// Write the dataset in the directory layout [Dataset::from_dir] reads.
    pub fn to_dir<P: AsRef<Path>>(&self, dir: P) -> io::Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir.join(OBSERVATION_DIR))?;
        write_records(self.map.landmarks(), dir.join(MAP_FILE))?;
        write_records(&self.controls, dir.join(CONTROL_FILE))?;
        write_records(&self.ground_truth, dir.join(GROUND_TRUTH_FILE))?;
        for (i, batch) in self.observations.iter().enumerate() {
            let path = observation_path(dir, i + 1);
            if batch.is_empty() {
                File::create(path)?;
            } else {
                write_records(batch, path)?;
            }
        }
        Ok(())
    }
    /// Number of timesteps.
    pub fn len(&self) -> usize {
        self.controls.len()
    }
    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}

/// One row of a replay result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: usize,
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    pub gt_x: f64,
    pub gt_y: f64,
    pub gt_theta: f64,
    pub error_x: f64,
    pub error_y: f64,
    /// Absolute heading error, wrapped to [0, π]
    pub error_yaw: f64,
    /// Cumulative mean errors up to and including this step
    pub mean_error_x: f64,
    pub mean_error_y: f64,
    pub mean_error_yaw: f64,
    /// Effective sample size after weighting
    pub effective_particles: f64,
    /// The weights collapsed to zero and were reset to uniform at this step
    pub weights_reset: bool,
}

/// Outcome of replaying a dataset through the filter.
#[derive(Clone, Debug)]
pub struct LocalizationResult {
    pub steps: Vec<StepResult>,
    pub limits: ErrorLimits,
    pub elapsed: Duration,
}
impl LocalizationResult {
    /// Cumulative mean `(x, y, yaw)` error over the whole run.
    pub fn cumulative_error(&self) -> Option<(f64, f64, f64)> {
        self.steps
            .last()
            .map(|s| (s.mean_error_x, s.mean_error_y, s.mean_error_yaw))
    }
    /// True when every cumulative mean error is within its limit.
    pub fn passed(&self) -> bool {
        match self.cumulative_error() {
            Some((x, y, yaw)) => x <= self.limits.x && y <= self.limits.y && yaw <= self.limits.yaw,
            None => false,
        }
    }
    /// Number of steps at which the weights had to be reset.
    pub fn weight_resets(&self) -> usize {
        self.steps.iter().filter(|s| s.weights_reset).count()
    }
    /// Writes the per-step results to a CSV file with a header row.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        for step in &self.steps {
            writer.serialize(step)?;
        }
        writer.flush()?;
        Ok(())
    }
    /// Human readable one-line summary.
    pub fn summary(&self) -> String {
        match self.cumulative_error() {
            Some((x, y, yaw)) => format!(
                "{} steps in {:.3} s, cumulative mean error x: {:.3} m, y: {:.3} m, yaw: {:.4} rad ({})",
                self.steps.len(),
                self.elapsed.as_secs_f64(),
                x,
                y,
                yaw,
                if self.passed() { "pass" } else { "fail" }
            ),
            None => "no steps".to_string(),
        }
    }
}
/// Replay a dataset through a filter built from `config`.
///
/// Step 0 seeds the filter around a GPS fix (ground truth plus `gps_noise`); every later step first predicts with
/// the previous step's control. Observations are corrupted with `landmark_noise` before weighting. If the weights
/// collapse to zero they are reset to uniform and the run continues.
pub fn run_localization(dataset: &Dataset, config: &FilterConfig) -> Result<LocalizationResult> {
    match config.spatial_index {
        SpatialIndexKind::Linear => run_with_index(dataset, config, &dataset.map),
        SpatialIndexKind::RTree => {
            let index = RTreeLandmarkIndex::new(dataset.map.clone());
            run_with_index(dataset, config, &index)
        }
    }
}

fn run_with_index<I: LandmarkIndex + ?Sized>(
    dataset: &Dataset,
    config: &FilterConfig,
    index: &I,
) -> Result<LocalizationResult> {
    if dataset.controls.len() != dataset.ground_truth.len()
        || dataset.observations.len() != dataset.ground_truth.len()
    {
        return Err(FilterError::InvalidParameter(format!(
            "dataset has {} controls, {} ground truth poses and {} observation batches",
            dataset.controls.len(),
            dataset.ground_truth.len(),
            dataset.observations.len()
        )));
    }
    let mut filter = ParticleFilter::from_config(config)?;
    // Measurement noise gets its own stream so the filter's draws do not depend on the dataset
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
    let gps = PoseSampler::new(&config.gps_noise)?;
    let sensor = ObservationSampler::new(&config.landmark_noise)?;

    let start = Instant::now();
    let mut steps: Vec<StepResult> = Vec::with_capacity(dataset.len());
    let (mut sum_x, mut sum_y, mut sum_yaw) = (0.0, 0.0, 0.0);
    for (i, truth) in dataset.ground_truth.iter().enumerate() {
        if i == 0 {
            let fix = gps.sample(truth, &mut rng);
            filter.init(&fix, &config.gps_noise)?;
        } else {
            filter.predict(config.delta_t, &config.process_noise, &dataset.controls[i - 1])?;
        }

        let observations: Vec<LandmarkObservation> = dataset.observations[i]
            .iter()
            .map(|o| sensor.sample(o, &mut rng))
            .collect();
        let weights_reset = match filter.update_weights(
            config.sensor_range,
            &config.landmark_noise,
            &observations,
            index,
        ) {
            Ok(()) => false,
            Err(FilterError::ZeroTotalWeight(total)) => {
                warn!(
                    "Step {}: total particle weight {} is not normalizable, resetting to uniform",
                    i, total
                );
                filter.set_uniform_weights();
                true
            }
            Err(e) => return Err(e),
        };

        let estimate = filter.estimate().ok_or(FilterError::NotInitialized)?;
        let error_x = (estimate.x - truth.x).abs();
        let error_y = (estimate.y - truth.y).abs();
        let error_yaw = wrap_to_pi(estimate.theta - truth.theta).abs();
        sum_x += error_x;
        sum_y += error_y;
        sum_yaw += error_yaw;
        let n = (i + 1) as f64;
        steps.push(StepResult {
            step: i,
            x: estimate.x,
            y: estimate.y,
            theta: estimate.theta,
            gt_x: truth.x,
            gt_y: truth.y,
            gt_theta: truth.theta,
            error_x,
            error_y,
            error_yaw,
            mean_error_x: sum_x / n,
            mean_error_y: sum_y / n,
            mean_error_yaw: sum_yaw / n,
            effective_particles: filter.effective_sample_size(),
            weights_reset,
        });
        debug!(
            "Step {}: estimate {} error ({:.3}, {:.3}, {:.4})",
            i, estimate, error_x, error_y, error_yaw
        );

        filter.resample()?;
    }
    let result = LocalizationResult {
        steps,
        limits: config.error_limits,
        elapsed: start.elapsed(),
    };
    info!("{}", result.summary());
    Ok(result)
}

/// Gaussian corruption of a ground-truth pose.
struct PoseSampler {
    x: Normal<f64>,
    y: Normal<f64>,
    theta: Normal<f64>,
}
impl PoseSampler {
    fn new(std: &PoseNoise) -> Result<Self> {
        std.validate()?;
        Ok(PoseSampler {
            x: zero_mean(std.x)?,
            y: zero_mean(std.y)?,
            theta: zero_mean(std.theta)?,
        })
    }
    fn sample(&self, pose: &Pose, rng: &mut StdRng) -> Pose {
        Pose::new(
            pose.x + self.x.sample(rng),
            pose.y + self.y.sample(rng),
            pose.theta + self.theta.sample(rng),
        )
    }
}

/// Gaussian corruption of a vehicle-frame observation.
struct ObservationSampler {
    x: Normal<f64>,
    y: Normal<f64>,
}
impl ObservationSampler {
    fn new(noise: &LandmarkNoise) -> Result<Self> {
        noise.validate()?;
        Ok(ObservationSampler {
            x: zero_mean(noise.x)?,
            y: zero_mean(noise.y)?,
        })
    }
    fn sample(&self, observation: &LandmarkObservation, rng: &mut StdRng) -> LandmarkObservation {
        LandmarkObservation::new(
            observation.x + self.x.sample(rng),
            observation.y + self.y.sample(rng),
        )
    }
}

fn zero_mean(std_dev: f64) -> Result<Normal<f64>> {
    Normal::new(0.0, std_dev).map_err(|e| FilterError::InvalidParameter(e.to_string()))
}
