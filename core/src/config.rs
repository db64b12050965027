//! Serializable configuration for the localization filter and the replay harness.
//!
//! A [FilterConfig] can be written to and read from JSON, YAML or TOML. [FilterConfig::to_file] and
//! [FilterConfig::from_file] pick the [ConfigFormat] from the file extension.
//!
//! # Example
//!
//! ```toml
//! num_particles = 1000
//! seed = 42
//! delta_t = 0.1
//! sensor_range = 50.0
//! resampling_strategy = "wheel"
//! estimate_strategy = "highest_weight"
//! spatial_index = "linear"
//! parallel = false
//!
//! [gps_noise]
//! x = 0.3
//! y = 0.3
//! theta = 0.01
//!
//! [process_noise]
//! x = 0.3
//! y = 0.3
//! theta = 0.01
//!
//! [landmark_noise]
//! x = 0.3
//! y = 0.3
//!
//! [error_limits]
//! x = 1.0
//! y = 1.0
//! yaw = 0.05
//! ```
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use crate::PoseNoise;
use crate::error::{FilterError, Result};
use crate::measurements::LandmarkNoise;
use crate::particle::{PoseEstimateStrategy, ResamplingStrategy};

fn default_num_particles() -> usize {
    1000
}
/// Default seed value for reproducible runs
fn default_seed() -> u64 {
    42
}
fn default_delta_t() -> f64 {
    0.1
}
fn default_sensor_range() -> f64 {
    50.0
}
fn default_pose_noise() -> PoseNoise {
    PoseNoise::new(0.3, 0.3, 0.01)
}

/// Which [crate::association::LandmarkIndex] implementation to build over the map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialIndexKind {
    /// Scan every landmark for every particle
    #[default]
    Linear,
    /// Range queries through an R-tree
    RTree,
}

/// Maximum acceptable cumulative mean errors for a replayed run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorLimits {
    /// Position error along x in meters
    pub x: f64,
    /// Position error along y in meters
    pub y: f64,
    /// Heading error in radians
    pub yaw: f64,
}
impl Default for ErrorLimits {
    fn default() -> Self {
        ErrorLimits {
            x: 1.0,
            y: 1.0,
            yaw: 0.05,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Number of particles, fixed for the lifetime of the filter.
    #[serde(default = "default_num_particles")]
    pub num_particles: usize,
    /// Random number generator seed for deterministic runs.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Control interval in seconds.
    #[serde(default = "default_delta_t")]
    pub delta_t: f64,
    /// Landmark sensor range in meters.
    #[serde(default = "default_sensor_range")]
    pub sensor_range: f64,
    #[serde(default)]
    pub resampling_strategy: ResamplingStrategy,
    #[serde(default)]
    pub estimate_strategy: PoseEstimateStrategy,
    #[serde(default)]
    pub spatial_index: SpatialIndexKind,
    /// Weight particles on the rayon thread pool.
    #[serde(default)]
    pub parallel: bool,
    /// Spread of the initial pose estimate (GPS) used to seed the particle cloud.
    #[serde(default = "default_pose_noise")]
    pub gps_noise: PoseNoise,
    /// Process noise injected by the prediction step.
    #[serde(default = "default_pose_noise")]
    pub process_noise: PoseNoise,
    /// Landmark measurement noise.
    #[serde(default)]
    pub landmark_noise: LandmarkNoise,
    #[serde(default)]
    pub error_limits: ErrorLimits,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            num_particles: default_num_particles(),
            seed: default_seed(),
            delta_t: default_delta_t(),
            sensor_range: default_sensor_range(),
            gps_noise: default_pose_noise(),
            process_noise: default_pose_noise(),
            landmark_noise: LandmarkNoise::default(),
            resampling_strategy: ResamplingStrategy::default(),
            estimate_strategy: PoseEstimateStrategy::default(),
            spatial_index: SpatialIndexKind::default(),
            parallel: false,
            error_limits: ErrorLimits::default(),
        }
    }
}

impl FilterConfig {
    /// Check every numeric parameter against its domain.
    pub fn validate(&self) -> Result<()> {
        if self.num_particles == 0 {
            return Err(FilterError::InvalidParameter(
                "number of particles must be positive".to_string(),
            ));
        }
        if !self.delta_t.is_finite() || self.delta_t <= 0.0 {
            return Err(FilterError::InvalidParameter(format!(
                "time step must be finite and positive, got {}",
                self.delta_t
            )));
        }
        if self.sensor_range.is_nan() || self.sensor_range < 0.0 {
            return Err(FilterError::InvalidParameter(format!(
                "sensor range must be non-negative, got {}",
                self.sensor_range
            )));
        }
        self.gps_noise.validate()?;
        self.process_noise.validate()?;
        self.landmark_noise.validate()
    }
    /// Serialize to text in the given format (JSON is pretty-printed).
    pub fn to_string_as(&self, format: ConfigFormat) -> io::Result<String> {
        match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self).map_err(io::Error::other),
            ConfigFormat::Yaml => serde_yaml::to_string(self).map_err(io::Error::other),
            ConfigFormat::Toml => toml::to_string(self).map_err(io::Error::other),
        }
    }
    /// Parse text in the given format. Missing fields take their defaults.
    pub fn from_str_as(text: &str, format: ConfigFormat) -> io::Result<Self> {
        let parsed: std::result::Result<Self, String> = match format {
            ConfigFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
            ConfigFormat::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
            ConfigFormat::Toml => toml::from_str(text).map_err(|e| e.to_string()),
        };
        parsed.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
    /// Write the configuration, choosing the format by file extension (.json/.yaml/.yml/.toml).
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        let text = self.to_string_as(ConfigFormat::from_path(path)?)?;
        fs::write(path, text).map_err(|e| with_path(e, path))
    }
    /// Read a configuration, choosing the format by file extension (.json/.yaml/.yml/.toml).
    ///
    /// Errors name the offending file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let text = fs::read_to_string(path).map_err(|e| with_path(e, path))?;
        Self::from_str_as(&text, format).map_err(|e| with_path(e, path))
    }
}

/// Serialization format of a configuration file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}
impl ConfigFormat {
    /// Format implied by a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        match ext.as_deref() {
            Some("json") => Ok(ConfigFormat::Json),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "unsupported configuration file '{}', expected .json, .yaml, .yml or .toml",
                    path.display()
                ),
            )),
        }
    }
}

fn with_path(err: io::Error, path: &Path) -> io::Error {
    io::Error::new(err.kind(), format!("{}: {}", path.display(), err))
}
