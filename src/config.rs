use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub container_dir: Option<PathBuf>,
    pub output_csv: Option<PathBuf>,
    pub playback_fps: f32,
    pub window_width: f32,
    pub window_height: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            container_dir: None,
            output_csv: None,
            playback_fps: 8.0,
            window_width: 1300.0,
            window_height: 850.0,
        }
    }
}

impl Config {
    fn validate(self, origin: &str) -> Result<Self> {
        if !(self.playback_fps.is_finite() && self.playback_fps > 0.0) {
            return Err(Error::Config(format!(
                "playback_fps in {} must be positive, got {}",
                origin, self.playback_fps
            )));
        }
        if let Some(dir) = &self.container_dir {
            if !dir.is_dir() {
                return Err(Error::Config(format!(
                    "container_dir specified in {} ('{}') is not a valid directory.",
                    origin,
                    dir.display()
                )));
            }
        }
        Ok(self)
    }
}

pub fn parse_config(contents: &str, origin: &str) -> Result<Config> {
    let config = toml::from_str::<Config>(contents).map_err(|e| Error::Config(format!("Failed to parse {}: {}", origin, e)))?;
    config.validate(origin)
}

pub fn load_config_from_file(file_path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(file_path).map_err(|e| {
        Error::Config(format!(
            "Failed to read {}: {}. Please ensure it exists.",
            file_path.display(),
            e
        ))
    })?;
    parse_config(&contents, &file_path.display().to_string())
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub container_dir: Option<PathBuf>,
    pub output_csv: Option<PathBuf>,
    pub playback_fps: Option<f32>,
}

/// Everything a review session needs to start, after overrides are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub container: PathBuf,
    pub output: PathBuf,
    pub fps: f32,
    pub window: [f32; 2],
}

impl Config {
    pub fn resolve(self, overrides: Overrides) -> Result<Settings> {
        let container = overrides.container_dir.or(self.container_dir).ok_or_else(|| {
            Error::Config("no container directory: pass --container or set container_dir".to_string())
        })?;
        let output = overrides
            .output_csv
            .or(self.output_csv)
            .ok_or_else(|| Error::Config("no output table: pass --output or set output_csv".to_string()))?;
        let fps = overrides.playback_fps.unwrap_or(self.playback_fps);
        if !(fps.is_finite() && fps > 0.0) {
            return Err(Error::Config(format!("--fps must be positive, got {fps}")));
        }
        Ok(Settings {
            container,
            output,
            fps,
            window: [self.window_width, self.window_height],
        })
    }
}

/// An explicitly requested file must exist; the default one is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => load_config_from_file(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                load_config_from_file(default)
            } else {
                Ok(Config::default())
            }
        }
    }
}
