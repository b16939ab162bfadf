use crate::error::{FixtureError, Result};
use crate::format::ContainerFormat;
use crate::spec::FixtureMatrix;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub general: GeneralConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub matrix: FixtureMatrix,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralConfig {
    pub target_dir: Utf8PathBuf,
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_encoder_timeout")]
    pub encoder_timeout_secs: u64,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: Utf8PathBuf,
    #[serde(default)]
    pub overwrite: OverwritePolicy,
}

impl GenerationConfig {
    pub fn encoder_timeout(&self) -> Duration {
        Duration::from_secs(self.encoder_timeout_secs)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            encoder_timeout_secs: default_encoder_timeout(),
            ffmpeg_path: default_ffmpeg_path(),
            overwrite: OverwritePolicy::default(),
        }
    }
}

/// What to do when an existing manifest no longer matches the files on disk
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    /// Abort before writing anything
    #[default]
    Refuse,
    /// Regenerate and replace the drifted fixtures
    Force,
}

/// Per-invocation settings threaded through a run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub target_dir: Utf8PathBuf,
    pub manifest_name: String,
    pub formats: Option<Vec<ContainerFormat>>,
    pub overwrite: OverwritePolicy,
    pub dry_run: bool,
    pub workers: usize,
    pub encoder_timeout: Duration,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            target_dir: config.general.target_dir.clone(),
            manifest_name: config.general.manifest_name.clone(),
            formats: None,
            overwrite: config.generation.overwrite,
            dry_run: false,
            workers: config.generation.workers.max(1),
            encoder_timeout: config.generation.encoder_timeout(),
        }
    }

    pub fn manifest_path(&self) -> Utf8PathBuf {
        self.target_dir.join(&self.manifest_name)
    }

    /// Whether a format passes the optional filter
    pub fn includes(&self, format: ContainerFormat) -> bool {
        self.formats
            .as_ref()
            .is_none_or(|formats| formats.contains(&format))
    }
}

// Default value functions
fn default_target_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("target/test-fixtures")
}

fn default_manifest_name() -> String {
    "manifest.toml".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

const fn default_encoder_timeout() -> u64 {
    60
}

fn default_ffmpeg_path() -> Utf8PathBuf {
    Utf8PathBuf::from("ffmpeg")
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::find_config_file()?;
        Self::load_from_path(&config_path)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| FixtureError::Config(format!("Failed to read config: {}", e)))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)
            .map_err(|e| FixtureError::Config(format!("Failed to parse config: {}", e)))?;

        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Load the first config file found, or the defaults when there is none
    ///
    /// A file that exists but fails to parse is still an error.
    pub fn discover() -> Result<Self> {
        match Self::find_config_file() {
            Ok(path) => {
                debug!("Loading config from {}", path.display());
                Self::load_from_path(path)
            }
            Err(_) => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn find_config_file() -> Result<PathBuf> {
        let candidates = [
            dirs::config_dir().map(|p| p.join("audiofix/audiofix.toml")),
            Some(PathBuf::from("audiofix.toml")),
        ];

        for candidate in candidates.into_iter().flatten() {
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        Err(FixtureError::Config("Config file not found".to_owned()))
    }

    fn expand_paths(&mut self) {
        fn expand_tilde(path: &Utf8PathBuf) -> Utf8PathBuf {
            let path_str = path.as_str();
            if let Some(rest) = path_str.strip_prefix("~/") {
                if let Some(home) = dirs::home_dir().and_then(|h| Utf8PathBuf::try_from(h).ok()) {
                    return home.join(rest);
                }
            }
            path.clone()
        }

        self.general.target_dir = expand_tilde(&self.general.target_dir);
        self.generation.ffmpeg_path = expand_tilde(&self.generation.ffmpeg_path);
    }

    fn validate(&self) -> Result<()> {
        if self.general.manifest_name.is_empty() || self.general.manifest_name.contains('/') {
            return Err(FixtureError::Config(format!(
                "Invalid manifest name: {:?}",
                self.general.manifest_name
            )));
        }
        if self.generation.encoder_timeout_secs == 0 {
            return Err(FixtureError::Config(
                "encoder_timeout_secs must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig {
                target_dir: default_target_dir(),
                manifest_name: default_manifest_name(),
                log_level: default_log_level(),
            },
            generation: GenerationConfig::default(),
            matrix: FixtureMatrix::default(),
        }
    }
}
