//! Common utility functions for the replay tool.
//!
//! This module contains:
//! - Logger initialization
//! - Dataset directory validation and discovery

use log::{Level, LevelFilter};
use mcl::sim::{CONTROL_FILE, GROUND_TRUTH_FILE, MAP_FILE, OBSERVATION_DIR};
use std::error::Error;
use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Timestamp layout of every log line.
const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Initialize the logger.
///
/// # Arguments
/// * `level` - Default level for every module; `RUST_LOG` may refine it per module
/// * `log_file` - Optional log file, appended to (logs to stderr if None)
///
/// # Errors
/// Returns an error if the log file cannot be opened or a logger is already installed.
pub fn init_logger(level: LevelFilter, log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.parse_default_env();
    builder.format(|buf, record| {
        let timestamp = chrono::Local::now().format(LOG_TIME_FORMAT).to_string();
        writeln!(
            buf,
            "{}",
            format_log_line(&timestamp, record.level(), record.target(), record.args())
        )
    });
    if let Some(path) = log_file {
        builder.target(env_logger::Target::Pipe(Box::new(open_log_file(path)?)));
    }
    builder.try_init()?;
    Ok(())
}

/// `<timestamp> <LEVEL> [<module>] <message>`
pub fn format_log_line(timestamp: &str, level: Level, target: &str, message: &dyn Display) -> String {
    format!("{timestamp} {level:<5} [{target}] {message}")
}

/// Open a log file for appending, creating missing parent directories.
pub fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// True if `dir` holds the map, control and ground truth files plus an observation directory.
pub fn is_dataset_dir(dir: &Path) -> bool {
    dir.is_dir()
        && [MAP_FILE, CONTROL_FILE, GROUND_TRUTH_FILE]
            .iter()
            .all(|name| dir.join(name).is_file())
        && dir.join(OBSERVATION_DIR).is_dir()
}

/// Resolve the dataset directories to replay.
///
/// `input` is either a dataset directory itself or a directory whose immediate subdirectories are datasets.
///
/// # Returns
/// A sorted vector of dataset directories.
///
/// # Errors
/// Returns an error if the path does not exist or no dataset is found.
pub fn get_dataset_dirs(input: &Path) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    if !input.exists() {
        return Err(format!("Input path '{}' does not exist.", input.display()).into());
    }
    if !input.is_dir() {
        return Err(format!("Input path '{}' is not a directory.", input.display()).into());
    }
    if is_dataset_dir(input) {
        return Ok(vec![input.to_path_buf()]);
    }
    let mut datasets: Vec<PathBuf> = std::fs::read_dir(input)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| is_dataset_dir(path))
        .collect();
    if datasets.is_empty() {
        return Err(format!("No datasets found in directory '{}'.", input.display()).into());
    }
    datasets.sort();
    Ok(datasets)
}

/// Output CSV path for a dataset.
///
/// A single dataset writes to `output` directly when it has a file extension; otherwise every dataset writes
/// `<output>/<dataset name>.csv`.
pub fn result_path(output: &Path, dataset: &Path, is_multiple: bool) -> PathBuf {
    if !is_multiple && output.extension().is_some() {
        return output.to_path_buf();
    }
    let name = dataset
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset");
    output.join(format!("{name}.csv"))
}
